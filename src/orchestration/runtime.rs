//! Container runtime abstraction
//!
//! Provides a trait for container operations that can be implemented
//! by different backends (docker or podman CLIs, or a test double).

use crate::error::DistroResult;
use crate::orchestration::container::ContainerConfig;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

/// Inputs for building an image
#[derive(Debug, Clone)]
pub struct ImageBuildRequest<'a> {
    /// Build context directory
    pub context_dir: &'a Path,
    /// Definition file, if not `<context>/Dockerfile`
    pub dockerfile: Option<&'a Path>,
    /// Tag applied to the result
    pub tag: &'a str,
    /// `--build-arg` values
    pub build_args: BTreeMap<String, String>,
    /// `--label` values
    pub labels: BTreeMap<String, String>,
}

/// Abstract container runtime interface
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check if the runtime is available on this system
    async fn is_available(&self) -> DistroResult<bool>;

    /// Read a label from a local image. `None` if the image or label is missing.
    async fn image_label(&self, image: &str, label: &str) -> DistroResult<Option<String>>;

    /// Pull an image from its registry
    async fn pull(&self, image: &str) -> DistroResult<()>;

    /// Add a tag to a local image
    async fn tag(&self, source: &str, target: &str) -> DistroResult<()>;

    /// Push a local image to its registry
    async fn push(&self, image: &str) -> DistroResult<()>;

    /// Build an image, streaming output into the log
    async fn build_image(&self, request: &ImageBuildRequest<'_>) -> DistroResult<()>;

    /// Run a container to completion and return its exit code
    async fn run(&self, config: &ContainerConfig, command: &[String]) -> DistroResult<i32>;

    /// Get the human-readable runtime name for display
    fn runtime_name(&self) -> &'static str;
}
