// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `fleetctl simulate` - drive a synthetic fleet through the engine
//!
//! Every simulated agent runs as its own task: it heartbeats, acknowledges
//! (or rejects, or ignores) what it receives, and pulls its configuration
//! artifact. Agents share flows, so their configuration pulls contend on
//! the same cache keys.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info};

use fleet_control_core::application::{CacheStats, FleetCoordinator};
use fleet_control_core::domain::cache::Parameters;
use fleet_control_core::domain::control_plane_config::ControlPlaneConfigManifest;
use fleet_control_core::domain::heartbeat::Heartbeat;
use fleet_control_core::domain::operation::{AckOutcome, NewOperation};
use fleet_control_core::infrastructure::generator::DigestManifestGenerator;

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of simulated agents
    #[arg(long, default_value_t = 10)]
    pub agents: usize,

    /// Heartbeat rounds per agent
    #[arg(long, default_value_t = 5)]
    pub rounds: usize,

    /// Operations queued per agent before the first round
    #[arg(long, default_value_t = 4)]
    pub operations: usize,

    /// Distinct flows shared by the fleet
    #[arg(long, default_value_t = 3)]
    pub flows: usize,

    /// Pause between rounds, in milliseconds
    #[arg(long, default_value_t = 10)]
    pub interval_ms: u64,

    /// Simulated generator latency, in milliseconds
    #[arg(long, default_value_t = 25)]
    pub generator_latency_ms: u64,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SimulationSummary {
    pub agents: usize,
    pub heartbeats: u64,
    pub delivered: u64,
    pub acknowledged: u64,
    pub rejected: u64,
    pub requeued: u64,
    pub config_pulls: u64,
    pub not_modified: u64,
    pub errors: u64,
    pub cache: CacheStats,
}

impl SimulationSummary {
    fn absorb(&mut self, other: &SimulationSummary) {
        self.heartbeats += other.heartbeats;
        self.delivered += other.delivered;
        self.acknowledged += other.acknowledged;
        self.rejected += other.rejected;
        self.requeued += other.requeued;
        self.config_pulls += other.config_pulls;
        self.not_modified += other.not_modified;
        self.errors += other.errors;
    }
}

pub async fn run(args: SimulateArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = ControlPlaneConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    let summary = simulate(&config, &args).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}", "Simulation complete".bold().green());
    println!("  Agents:          {}", summary.agents);
    println!("  Heartbeats:      {}", summary.heartbeats);
    println!("  Delivered:       {}", summary.delivered);
    println!("  Acknowledged:    {}", summary.acknowledged);
    println!("  Rejected:        {}", summary.rejected);
    println!("  Requeued:        {}", summary.requeued);
    println!("  Config pulls:    {} ({} not modified)", summary.config_pulls, summary.not_modified);
    println!(
        "  Cache:           {} hits, {} misses, {} joined, {} generations",
        summary.cache.hits, summary.cache.misses, summary.cache.joined, summary.cache.generations
    );
    if summary.errors > 0 {
        println!("  {}", format!("Errors:          {}", summary.errors).red());
    }
    Ok(())
}

/// Run the simulation and return its totals.
pub async fn simulate(config: &ControlPlaneConfigManifest, args: &SimulateArgs) -> Result<SimulationSummary> {
    let generator = DigestManifestGenerator::new().with_latency(Duration::from_millis(args.generator_latency_ms));
    let coordinator = Arc::new(FleetCoordinator::in_memory(config, Arc::new(generator))?);

    let content_type = config
        .spec
        .cache
        .content_types
        .first()
        .context("No content types configured")?
        .clone();

    for agent in 0..args.agents {
        for n in 0..args.operations {
            let request = NewOperation::new(agent_name(agent), format!("directive-{n}"))
                .for_device(format!("{}-dev-{}", agent_name(agent), n % 2))
                .with_argument("sequence", n.to_string());
            coordinator.enqueue(request).await?;
        }
    }
    info!(
        agents = args.agents,
        operations = args.agents * args.operations,
        "Simulated fleet seeded"
    );

    let mut tasks = JoinSet::new();
    for agent in 0..args.agents {
        let coordinator = coordinator.clone();
        let args = args.clone();
        let mut parameters = Parameters::new();
        for name in &content_type.required_parameters {
            parameters.insert(name.clone(), vec![format!("flow-{}", agent % args.flows.max(1))]);
        }
        let content_type = content_type.content_type.clone();

        tasks.spawn(async move { run_agent(coordinator, agent, args, content_type, parameters).await });
    }

    let mut summary = SimulationSummary {
        agents: args.agents,
        ..SimulationSummary::default()
    };
    while let Some(joined) = tasks.join_next().await {
        summary.absorb(&joined.context("Simulated agent task panicked")?);
    }
    summary.cache = coordinator.cache_stats();
    Ok(summary)
}

fn agent_name(index: usize) -> String {
    format!("sim-agent-{index:03}")
}

async fn run_agent(
    coordinator: Arc<FleetCoordinator>,
    index: usize,
    args: SimulateArgs,
    content_type: String,
    parameters: Parameters,
) -> SimulationSummary {
    let agent = agent_name(index);
    let mut summary = SimulationSummary::default();
    let mut known_version: Option<String> = None;

    for round in 0..args.rounds {
        let heartbeat = Heartbeat::new(
            agent.as_str(),
            Some(format!("{agent}-dev-{}", round % 2)),
            json!({ "round": round, "uptime_ms": round as u64 * args.interval_ms }),
        );
        match coordinator.handle_heartbeat(heartbeat, None).await {
            Ok(response) => {
                summary.heartbeats += 1;
                summary.requeued += response.requeued.len() as u64;
                summary.delivered += response.operations.len() as u64;

                for (n, operation) in response.operations.iter().enumerate() {
                    // Leave some first deliveries unacknowledged to exercise redelivery
                    if operation.delivery_attempts == 1 && (index + n) % 5 == 0 {
                        continue;
                    }
                    let outcome = if (index + n) % 7 == 0 {
                        AckOutcome::Rejected
                    } else {
                        AckOutcome::Acknowledged
                    };
                    match coordinator.acknowledge(operation.id, outcome).await {
                        Ok(_) if outcome == AckOutcome::Rejected => summary.rejected += 1,
                        Ok(_) => summary.acknowledged += 1,
                        Err(e) => {
                            debug!(agent = %agent, error = %e, "Acknowledgement failed");
                            summary.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                debug!(agent = %agent, error = %e, "Heartbeat failed");
                summary.errors += 1;
            }
        }

        match coordinator
            .get_cache_file_if_modified(&content_type, &parameters, known_version.as_deref())
            .await
        {
            Ok(result) => {
                summary.config_pulls += 1;
                if !result.is_modified() {
                    summary.not_modified += 1;
                }
                known_version = Some(result.info().version_token().to_string());
            }
            Err(e) => {
                debug!(agent = %agent, error = %e, "Configuration pull failed");
                summary.errors += 1;
            }
        }

        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_small_fleet_runs_clean() {
        let mut config = ControlPlaneConfigManifest::default();
        config.spec.dispatcher.redelivery_after_heartbeats = 1;
        let args = SimulateArgs {
            agents: 4,
            rounds: 4,
            operations: 3,
            flows: 2,
            interval_ms: 1,
            generator_latency_ms: 5,
            json: true,
        };

        let summary = simulate(&config, &args).await.unwrap();
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.heartbeats, 16);
        assert_eq!(summary.config_pulls, 16);
        assert_eq!(summary.cache.generations, 2);
        assert!(summary.requeued > 0);
        assert_eq!(summary.acknowledged + summary.rejected, 12);
    }
}
