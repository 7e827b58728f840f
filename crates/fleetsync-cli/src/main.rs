//! Command-line interface for the fleetsync cloud sync engine.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sync` | Run one full sync cycle and print the report |
//! | `watch` | Sync on an interval until Ctrl-C |
//! | `status` | List local sensors with sync status and watermark |
//! | `pending` | Replay queued local changes only |
//! | `config` | Show, locate or create the configuration file |
//!
//! Configuration lives in `~/.config/fleetsync/config.toml` (or the platform
//! equivalent). `FLEETSYNC_TOKEN` overrides the configured API token.

mod cli;
mod commands;
mod config;
mod format;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use config::Config;
use format::FormatOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let opts = FormatOptions {
        no_color: cli.no_color,
    };

    match cli.command {
        Commands::Config { action } => {
            let config = Config::load(&config_path)
                .with_context(|| format!("Failed to load {}", config_path.display()))?;
            commands::cmd_config(action, &config_path, &config)?;
        }
        command => {
            let config = Config::load_validated(&config_path)
                .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;
            tracing::debug!("Loaded configuration from {}", config_path.display());

            match command {
                Commands::Sync { format } => commands::cmd_sync(&config, format, &opts).await?,
                Commands::Watch { interval } => commands::cmd_watch(&config, interval).await?,
                Commands::Status { format } => commands::cmd_status(&config, format, &opts)?,
                Commands::Pending => commands::cmd_pending(&config, cli.quiet).await?,
                Commands::Config { .. } => unreachable!("handled above"),
            }
        }
    }

    Ok(())
}
