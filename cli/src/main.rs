// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Fleet Control Plane CLI
//!
//! The `fleetctl` binary hosts the agent coordination engine.
//!
//! ## Commands
//!
//! - `fleetctl serve` - Run the coordination engine until Ctrl-C
//! - `fleetctl simulate` - Drive a synthetic fleet through the engine
//! - `fleetctl config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use fleet_control::commands::{self, ConfigCommand, ServeArgs, SimulateArgs};
use fleet_control_core::domain::control_plane_config::ControlPlaneConfigManifest;

/// Fleet control plane - coordinate edge agents, operations and configuration
#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "FLEET_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the config value
    #[arg(long, global = true, env = "FLEET_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json); defaults to the config value
    #[arg(long, global = true, env = "FLEET_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordination engine
    #[command(name = "serve")]
    Serve(ServeArgs),

    /// Simulate a fleet against an in-process engine
    #[command(name = "simulate")]
    Simulate(SimulateArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Config commands report their own load errors, so fall back quietly
    let manifest = ControlPlaneConfigManifest::load_or_default(cli.config.clone()).ok();
    let observability = manifest
        .as_ref()
        .map(|m| m.spec.observability.clone())
        .unwrap_or_default();
    let level = cli.log_level.unwrap_or(observability.log_level);
    let format = cli.log_format.unwrap_or(observability.log_format);
    init_logging(&level, &format)?;

    match cli.command {
        Some(Commands::Serve(args)) => commands::serve::run(args, cli.config).await,
        Some(Commands::Simulate(args)) => commands::simulate::run(args, cli.config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
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
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().with_target(true).init(),
        _ => builder.with_target(false).compact().init(),
    }

    Ok(())
}
