// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # rolekeeper CLI
//!
//! The `rolekeeper` binary runs the temporary role daemon and talks to it.
//!
//! ## Commands
//!
//! - `rolekeeper serve [--dry-run]` - Run the daemon (expiry worker + HTTP API)
//! - `rolekeeper grant add|list|revoke` - Grant operations against a running daemon
//! - `rolekeeper config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use rolekeeper_cli::commands::{self, ConfigCommand, GrantCommand};
use rolekeeper_cli::daemon;
use rolekeeper_core::domain::config::AssistantConfigManifest;

/// rolekeeper - Temporary roles that remove themselves
#[derive(Parser)]
#[command(name = "rolekeeper")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "ROLEKEEPER_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Daemon HTTP API port used by client commands
    #[arg(long, global = true, env = "ROLEKEEPER_API_PORT", default_value = "8750")]
    port: u16,

    /// Daemon HTTP API host used by client commands
    #[arg(long, global = true, env = "ROLEKEEPER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true, env = "ROLEKEEPER_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    #[command(name = "serve")]
    Serve {
        /// Keep grants in memory and log platform calls instead of making them
        #[arg(long)]
        dry_run: bool,
    },

    /// Temporary grant operations
    #[command(name = "grant")]
    Grant {
        #[command(subcommand)]
        command: GrantCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { dry_run }) => {
            let config = AssistantConfigManifest::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            let logging = &config.spec.observability.logging;
            let level = cli.log_level.as_deref().unwrap_or(&logging.level);
            init_logging(level, &logging.format)?;

            daemon::start_daemon(config, dry_run).await
        }
        Some(Commands::Grant { command }) => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), "compact")?;
            commands::grant::handle_command(command, &cli.host, cli.port).await
        }
        Some(Commands::Config { command }) => {
            init_logging(cli.log_level.as_deref().unwrap_or("warn"), "compact")?;
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
