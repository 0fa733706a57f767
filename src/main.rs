//! distrobuild - distribution image build orchestrator
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use distrobuild::cli::{Cli, Commands};
use distrobuild::config::ConfigManager;
use distrobuild::error::DistroResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> DistroResult<()> {
    let cli = Cli::parse();

    // 0 = warn, 1 = info, 2+ = debug; RUST_LOG wins when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("distrobuild=warn"),
        1 => EnvFilter::new("distrobuild=info"),
        _ => EnvFilter::new("distrobuild=debug"),
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    debug!("Config file: {}", config_manager.path().display());
    let config = config_manager.load().await?;

    match cli.command {
        Commands::Build(args) => distrobuild::cli::commands::build(args, &config).await,
        Commands::Cache(args) => distrobuild::cli::commands::cache(args, &config).await,
        Commands::BuilderImage(args) => {
            distrobuild::cli::commands::builder_image(args, &config).await
        }
        Commands::Config(args) => {
            distrobuild::cli::commands::config(args, &config, &config_manager).await
        }
    }
}
