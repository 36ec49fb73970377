// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use fleet_control_core::domain::control_plane_config::ControlPlaneConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./fleet-config.yaml)
        #[arg(short, long, default_value = "./fleet-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(&output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        for (n, path) in ControlPlaneConfigManifest::search_paths().iter().enumerate() {
            let marker = if path.exists() { "✓".green() } else { "-".dimmed() };
            println!("  {}. {} {}", n + 2, marker, path.display());
        }
        println!();
    }

    let config = ControlPlaneConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    let spec = &config.spec;

    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    println!("{}", "Dispatcher:".bold());
    println!("  Max batch size: {}", spec.dispatcher.max_batch_size);
    match spec.dispatcher.redelivery_after_heartbeats {
        0 => println!("  Redelivery after heartbeats: {}", "(disabled)".dimmed()),
        n => println!("  Redelivery after heartbeats: {}", n),
    }
    println!("  Redelivery timeout: {:?}", spec.dispatcher.redelivery_timeout);
    println!("  Sweep interval: {:?}", spec.dispatcher.sweep_interval);
    println!("  Terminal retention: {:?}", spec.dispatcher.terminal_retention);
    println!();

    println!("{}", "Configuration Cache:".bold());
    match spec.cache.ttl {
        Some(ttl) => println!("  TTL: {:?}", ttl),
        None => println!("  TTL: {}", "(never expires)".dimmed()),
    }
    println!("  Generation timeout: {:?}", spec.cache.generation_timeout);
    println!("  Content types:");
    for content_type in &spec.cache.content_types {
        if content_type.required_parameters.is_empty() {
            println!("    - {}", content_type.content_type.bold());
        } else {
            println!(
                "    - {} (requires: {})",
                content_type.content_type.bold(),
                content_type.required_parameters.join(", ")
            );
        }
    }
    println!();

    println!("{}", "Observability:".bold());
    println!("  Log level: {}", spec.observability.log_level);
    println!("  Log format: {}", spec.observability.log_format);
    match spec.observability.metrics_port {
        Some(port) => println!("  Metrics port: {}", port),
        None => println!("  Metrics port: {}", "(disabled)".dimmed()),
    }
    println!("  Event bus capacity: {}", spec.observability.event_bus_capacity);
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = ControlPlaneConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: &Path, with_examples: bool) -> Result<()> {
    if with_examples {
        std::fs::write(output, include_str!("../../templates/config-with-examples.yaml"))
            .with_context(|| format!("Failed to write config to {:?}", output))?;
    } else {
        ControlPlaneConfigManifest::default()
            .to_yaml_file(output)
            .with_context(|| format!("Failed to write config to {:?}", output))?;
    }

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_configs_validate() {
        let dir = tempfile::tempdir().unwrap();
        for examples in [false, true] {
            let path = dir.path().join(format!("config-{examples}.yaml"));
            generate(&path, examples).await.unwrap();
            let manifest = ControlPlaneConfigManifest::from_yaml_file(&path).unwrap();
            manifest.validate().unwrap();
        }
    }
}
