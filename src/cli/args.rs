//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// distrobuild - build multi-component distribution images
///
/// Builds each component in dependency order inside a cached builder
/// image, then assembles installable USB, PXE and ONIE images.
#[derive(Parser, Debug)]
#[command(name = "distrobuild")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DISTROBUILD_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build components or a full distribution image from a manifest
    Build(BuildArgs),

    /// Inspect or manage the artifact store
    Cache(CacheArgs),

    /// Inspect or refresh the builder image
    BuilderImage(BuilderImageArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Image manifest (JSON)
    pub manifest: PathBuf,

    /// Build only these components and their dependencies
    pub components: Vec<String>,

    /// Assemble a debug image
    #[arg(long, conflicts_with = "components")]
    pub debug_image: bool,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List stored artifact keys
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove one stored artifact
    Invalidate {
        /// Store key (see `cache list`)
        key: String,
    },

    /// Remove every stored artifact
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the builder-image command
#[derive(Parser, Debug)]
pub struct BuilderImageArgs {
    /// Subcommand for builder-image
    #[command(subcommand)]
    pub action: BuilderImageAction,
}

/// Builder image subcommands
#[derive(Subcommand, Debug)]
pub enum BuilderImageAction {
    /// Show the definition checksum and whether a rebuild is due
    Status {
        /// Directory the image definition paths resolve against
        /// (default: workspace root)
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Pull or build the image if needed
    Ensure,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for list commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}
