//! Container run configuration
//!
//! Contains data structures used by container runtimes.
//! The actual execution logic is in the runtime implementations.

use std::collections::BTreeMap;
use std::path::Path;

/// Container configuration for a build or assembly run
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Container image to use
    pub image: String,
    /// Working directory inside the container
    pub workdir: String,
    /// Volume mounts (host:container format)
    pub volumes: Vec<String>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Network mode
    pub network: String,
    /// Run with extended privileges (loop devices for image assembly)
    pub privileged: bool,
}

impl ContainerConfig {
    /// Non-privileged configuration with host networking
    pub fn new(image: impl Into<String>, workdir: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            workdir: workdir.into(),
            volumes: Vec::new(),
            env: BTreeMap::new(),
            network: "host".to_string(),
            privileged: false,
        }
    }

    /// Add a bind mount
    pub fn mount(&mut self, host: &Path, container: &str) {
        self.volumes.push(format!("{}:{}", host.display(), container));
    }

    /// Host path mounted at `container`, if any
    pub fn host_path_for(&self, container: &str) -> Option<&str> {
        self.volumes.iter().find_map(|v| {
            v.rsplit_once(':')
                .filter(|(_, target)| *target == container)
                .map(|(host, _)| host)
        })
    }
}
