//! Configuration schema for distrobuild
//!
//! Configuration is stored at `~/.config/distrobuild/config.toml`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable overriding `builder.expiration_hours`
pub const EXPIRATION_HOURS_ENV: &str = "DISTROBUILD_IMAGE_EXPIRATION_HOURS";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Repository layout
    pub workspace: WorkspaceConfig,

    /// Artifact store settings
    pub store: StoreConfig,

    /// Container engine settings
    pub runtime: RuntimeConfig,

    /// Build-environment image settings
    pub builder: BuilderConfig,

    /// Distribution image assembly settings
    pub image: ImageConfig,
}

impl Config {
    /// Resolve a config-relative path against the workspace root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.root.join(path)
        }
    }

    /// Artifact store root, falling back to the user cache directory
    pub fn store_root(&self) -> PathBuf {
        match &self.store.root {
            Some(root) => self.resolve(root),
            None => dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join("distrobuild")
                .join("artifacts"),
        }
    }

    /// Directory holding the image assembly scripts and templates
    pub fn image_builder_dir(&self) -> PathBuf {
        self.resolve(&self.image.builder_dir)
    }
}

/// Repository layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Root that relative paths in this file resolve against
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

/// Artifact store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Cache root (default: `~/.cache/distrobuild/artifacts`)
    pub root: Option<PathBuf>,
}

/// Supported container engines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Docker,
    Podman,
}

impl Engine {
    /// Executable name for this engine
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.binary())
    }
}

/// Container engine settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Engine used for builds and image assembly
    pub engine: Engine,
}

/// Build-environment image settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Local image name (tagged with `latest` and the definition checksum)
    pub name: String,

    /// Shared registry prefix, e.g. `registry.example.com/builders`
    pub registry: Option<String>,

    /// Definition file hashed first
    pub dockerfile: PathBuf,

    /// Build-definition tree hashed after the definition file
    pub definition_dir: PathBuf,

    /// Optional script used instead of a plain image build
    pub build_script: Option<PathBuf>,

    /// Environment forced on when running the build script
    pub build_env: BTreeMap<String, String>,

    /// Rebuild images older than this many hours
    pub expiration_hours: u64,

    /// File and directory names skipped when hashing the definition tree
    pub exclude: Vec<String>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            name: "distro_builder".to_string(),
            registry: None,
            dockerfile: PathBuf::from("docker/Dockerfile"),
            definition_dir: PathBuf::from("build"),
            build_script: None,
            build_env: BTreeMap::from([("BUILD_TOOLING".to_string(), "1".to_string())]),
            expiration_hours: 24,
            exclude: vec![
                "__pycache__".to_string(),
                ".pytest_cache".to_string(),
                ".mypy_cache".to_string(),
            ],
        }
    }
}

impl BuilderConfig {
    /// Image reference for a tag of the local builder image
    pub fn local_ref(&self, tag: &str) -> String {
        format!("{}:{}", self.name, tag)
    }

    /// Image reference in the shared registry, if one is configured
    pub fn remote_ref(&self, tag: &str) -> Option<String> {
        self.registry
            .as_ref()
            .map(|registry| format!("{}/{}:{}", registry.trim_end_matches('/'), self.name, tag))
    }
}

/// Distribution image assembly settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Directory mounted as `/image_builder` in the assembly container
    pub builder_dir: PathBuf,

    /// Template directory (relative to `builder_dir`) receiving hook files
    pub template_dir: PathBuf,

    /// Output file stem produced by the assembly script
    pub output_name: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            builder_dir: PathBuf::from("image_builder"),
            template_dir: PathBuf::from("templates/centos-09.0"),
            output_name: "Distro-Image.x86_64-1.0.install".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[builder]"));
        assert!(toml.contains("[image]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.builder.name, "distro_builder");
        assert_eq!(config.builder.expiration_hours, 24);
        assert_eq!(config.runtime.engine, Engine::Docker);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [runtime]
            engine = "podman"

            [builder]
            registry = "registry.example.com/builders/"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.runtime.engine.binary(), "podman");
        assert_eq!(
            config.builder.remote_ref("abc123").as_deref(),
            Some("registry.example.com/builders/distro_builder:abc123")
        );
        assert_eq!(config.image.output_name, "Distro-Image.x86_64-1.0.install");
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        let mut config = Config::default();
        config.workspace.root = PathBuf::from("/repo");
        assert_eq!(config.resolve(Path::new("/abs")), PathBuf::from("/abs"));
        assert_eq!(
            config.image_builder_dir(),
            PathBuf::from("/repo/image_builder")
        );
    }

    #[test]
    fn store_root_from_config() {
        let mut config = Config::default();
        config.workspace.root = PathBuf::from("/repo");
        config.store.root = Some(PathBuf::from("cache"));
        assert_eq!(config.store_root(), PathBuf::from("/repo/cache"));
    }
}
