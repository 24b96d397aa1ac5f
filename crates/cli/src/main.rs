//! # Campaigns CLI
//!
//! Command-line tools around the campaigns engine.
//!
//! This binary lets users inspect campaign patches locally and keep a stored
//! set of changesets in step with GitHub without running a server.
//!
//! # Commands
//!
//! - `diff` - Page through the file diffs of a patch
//! - `preview` - Show files as they look after a patch is applied
//! - `stat` - Count the lines a patch adds, changes and deletes
//! - `sync` - Refresh the changesets of a store snapshot from GitHub
//! - `config` - Manage configuration files
//!
//! # Examples
//!
//! ```bash
//! # Show the first two files of a patch
//! campaigns diff upgrade.diff --first 2
//!
//! # Preview a patch against a checkout
//! campaigns preview --base ./repo upgrade.diff
//!
//! # Sync every changeset that is due
//! campaigns sync --snapshot campaigns.json
//! ```

#![deny(missing_docs)]

use clap::{Parser, Subcommand};
use tracing::{error, info, instrument};

/// Command implementations for the CLI.
mod commands;

/// Configuration management for the CLI.
mod config;

/// Error types specific to the CLI.
mod errors;

use commands::{
    config_cmd::ConfigCommands, diff::DiffArgs, preview::PreviewArgs, stat::StatArgs,
    sync::SyncArgs,
};
use errors::CliError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Command-line interface structure for the campaigns tools.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// The subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Page through the file diffs of a patch
    Diff(DiffArgs),

    /// Show files after a patch is applied to a local directory
    Preview(PreviewArgs),

    /// Count added, changed and deleted lines of a patch
    Stat(StatArgs),

    /// Refresh stored changesets from GitHub
    Sync(SyncArgs),

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Main entry point for the campaigns CLI.
///
/// Initializes logging from `CAMPAIGNS_LOG`, parses the command line and
/// dispatches to the command handler. The returned error decides the exit
/// code.
#[tokio::main]
#[instrument]
async fn main() -> Result<(), CliError> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().pretty())
        .with(EnvFilter::from_env("CAMPAIGNS_LOG"))
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let result = match cli.command {
        Commands::Diff(args) => commands::diff::execute(args).await,
        Commands::Preview(args) => commands::preview::execute(args).await,
        Commands::Stat(args) => commands::stat::execute(args).await,
        Commands::Sync(args) => commands::sync::execute(args).await,
        Commands::Config(cmd) => commands::config_cmd::execute(cmd).await,
    };

    if let Err(e) = result {
        error!("Error executing command: {}", e);
        return Err(e);
    }

    Ok(())
}
