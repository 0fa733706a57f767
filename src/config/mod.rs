//! Configuration management for distrobuild

pub mod schema;

pub use schema::Config;

use crate::error::{DistroError, DistroResult};
use schema::EXPIRATION_HOURS_ENV;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("distrobuild")
            .join("config.toml")
    }

    /// Load configuration, using defaults if the file does not exist.
    ///
    /// Environment overrides are applied after the file is read, and the
    /// workspace root is made absolute against the current directory.
    pub async fn load(&self) -> DistroResult<Config> {
        let mut config = if self.config_path.exists() {
            self.load_from_file(&self.config_path).await?
        } else {
            debug!("Config file not found, using defaults");
            Config::default()
        };

        apply_env_overrides(&mut config)?;
        config.workspace.root = absolute_root(&config.workspace.root).await?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> DistroResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| DistroError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| DistroError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> DistroResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DistroError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            DistroError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply environment-style settings on top of the file configuration
fn apply_env_overrides(config: &mut Config) -> DistroResult<()> {
    if let Ok(value) = std::env::var(EXPIRATION_HOURS_ENV) {
        config.builder.expiration_hours = parse_hours(&value)?;
        debug!(
            "Image expiration set to {}h from {}",
            config.builder.expiration_hours, EXPIRATION_HOURS_ENV
        );
    }
    Ok(())
}

/// Absolute form of the workspace root, canonical when it exists
async fn absolute_root(root: &Path) -> DistroResult<PathBuf> {
    let root = if root.is_absolute() {
        root.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| DistroError::io("reading current directory", e))?
            .join(root)
    };

    match fs::canonicalize(&root).await {
        Ok(canonical) => Ok(canonical),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(root),
        Err(e) => Err(DistroError::io(
            format!("resolving workspace root {}", root.display()),
            e,
        )),
    }
}

fn parse_hours(value: &str) -> DistroResult<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| DistroError::SettingInvalid {
            key: EXPIRATION_HOURS_ENV.to_string(),
            reason: format!("'{}': {}", value, e),
        })
}
