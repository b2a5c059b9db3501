//! CLI surface.
//!
//! Usage:
//!   embercache serve --config config/embercache.toml
//!   embercache config validate --config config/embercache.toml

pub mod commands;

use clap::{Parser, Subcommand};

/// Embercache coordinator CLI.
#[derive(Debug, Parser)]
#[command(name = "embercache", version, about = "Coherent near-cache coordinator")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the coordinating cache server.
    Serve,
    /// Configuration utilities.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// `config` subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Parse and validate the configuration file.
    Validate,
}
