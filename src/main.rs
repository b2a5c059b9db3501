//! Embercache - unified CLI entrypoint.
//!
//! Usage:
//!   embercache serve --config config/embercache.toml
//!   embercache config validate --config config/embercache.toml

use anyhow::Result;
use clap::Parser;
use embercache::cli::commands::{run_config_validate, run_serve};
use embercache::cli::{Cli, Commands, ConfigAction};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/embercache.toml"));

    match cli.command {
        Commands::Serve => run_serve(&config_path).await,
        Commands::Config { action } => match action {
            ConfigAction::Validate => run_config_validate(&config_path),
        },
    }
}
