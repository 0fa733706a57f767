//! Error types for distrobuild
//!
//! All modules use `DistroResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for distrobuild operations
pub type DistroResult<T> = Result<T, DistroError>;

/// All errors that can occur while building a distribution image
#[derive(Error, Debug)]
pub enum DistroError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Invalid setting {key}: {reason}")]
    SettingInvalid { key: String, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Manifest errors
    #[error("Manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Invalid manifest {path}: {reason}")]
    ManifestInvalid { path: PathBuf, reason: String },

    #[error("No distribution formats specified in manifest (expected one of: usb, pxe, onie)")]
    NoDistributionFormats,

    // Component errors
    #[error("Component '{0}' not found in manifest")]
    ComponentNotFound(String),

    #[error("Component '{0}' is not a known build component")]
    UnknownComponent(String),

    #[error("Component '{component}' depends on '{dependency}', but '{dependency}' is not defined in the manifest")]
    MissingDependency {
        component: String,
        dependency: String,
    },

    #[error("Component '{component}': {reason}")]
    ComponentInvalid { component: String, reason: String },

    #[error("Build script not found for '{component}': {path}")]
    BuildScriptNotFound { component: String, path: PathBuf },

    #[error("Expected exactly 1 data file for {component}, got {count}")]
    DataFileCount { component: String, count: usize },

    #[error("{component}: expected exactly 1 artifact matching '{pattern}' in {dir}, found {count}")]
    ArtifactMatch {
        component: String,
        pattern: String,
        dir: PathBuf,
        count: usize,
    },

    #[error("Invalid build graph: {0}")]
    GraphInvalid(String),

    // Build errors
    #[error("Build of '{component}' failed with exit code {code}")]
    BuildFailed { component: String, code: i32 },

    #[error("Base image build failed with exit code {0}")]
    ImageAssemblyFailed(i32),

    #[error("No component artifacts found; cannot build image")]
    NothingToStage,

    #[error("Image build hook '{hook}' specified, but file not found: {path}")]
    HookNotFound { hook: String, path: PathBuf },

    #[error("{component}: compression failed: {reason}")]
    Compression { component: String, reason: String },

    // Artifact store errors
    #[error("Artifact store error for key '{key}': {reason}")]
    Store { key: String, reason: String },

    // Download errors
    #[error("Download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("Transient failure from {service}: {reason}")]
    Transient { service: String, reason: String },

    // Container errors
    #[error("Container runtime '{0}' not available")]
    RuntimeUnavailable(String),

    #[error("Image pull failed: {image}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("Image build failed: {tag}: {reason}")]
    ImageBuild { tag: String, reason: String },

    #[error("Image push failed: {image}: {reason}")]
    ImagePush { image: String, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DistroError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a store error for a key
    pub fn store(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Store {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable
    ///
    /// Only failures reported by a remote backend as temporary qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::RuntimeUnavailable(_) => {
                Some("Install docker or podman, or set [runtime] engine in the config")
            }
            Self::NoDistributionFormats => {
                Some("Add a \"distribution_formats\" object with a usb, pxe or onie entry")
            }
            Self::MissingDependency { .. } => Some("Add the dependency to the manifest"),
            Self::Transient { .. } => Some("The remote service is busy; re-run the build"),
            Self::BuildFailed { .. } => Some("Re-run with -vv to see the container output"),
            _ => None,
        }
    }
}
