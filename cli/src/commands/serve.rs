// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `fleetctl serve` - host the coordination engine
//!
//! Builds an in-memory coordinator from the loaded configuration, starts the
//! redelivery sweeper and event logger, optionally exposes Prometheus
//! metrics, and runs until Ctrl-C.

use anyhow::{Context, Result};
use clap::Args;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use fleet_control_core::application::{EventLogger, FleetCoordinator, RedeliverySweeper, RedeliverySweeperConfig};
use fleet_control_core::domain::control_plane_config::ControlPlaneConfigManifest;
use fleet_control_core::infrastructure::generator::DigestManifestGenerator;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Prometheus exporter port (overrides config)
    #[arg(long, env = "FLEET_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Replay persisted heartbeats into the agent view before serving
    #[arg(long)]
    pub rebuild: bool,
}

pub async fn run(args: ServeArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = ControlPlaneConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    if let Some(port) = args.metrics_port.or(config.spec.observability.metrics_port) {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus metrics exporter listening");
    }

    let coordinator = Arc::new(
        FleetCoordinator::in_memory(&config, Arc::new(DigestManifestGenerator::new()))
            .context("Failed to build coordinator")?,
    );
    if args.rebuild {
        let agents = coordinator.tracker().rebuild().await?;
        info!(agents, "Agent view rebuilt");
    }

    let event_logger = Arc::new(EventLogger::new(coordinator.event_bus().clone()));
    let logger_shutdown = event_logger.shutdown_token();
    let logger_handle = event_logger.start();

    let sweeper = Arc::new(RedeliverySweeper::new(
        coordinator.clone(),
        RedeliverySweeperConfig::from(&config.spec.dispatcher),
    ));
    let sweeper_shutdown = sweeper.shutdown_token();
    let sweeper_handle = sweeper.start();

    info!(
        name = %config.metadata.name,
        content_types = config.spec.cache.content_types.len(),
        "Fleet control plane running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    sweeper_shutdown.cancel();
    logger_shutdown.cancel();

    let shutdown = async {
        join_background("redelivery sweeper", sweeper_handle).await;
        if let Some(logged) = join_background("event logger", logger_handle).await {
            info!(events = logged, "Event logger drained");
        }
    };
    if tokio::time::timeout(Duration::from_secs(10), shutdown).await.is_err() {
        warn!("Background tasks did not stop within 10s");
    }

    let stats = coordinator.cache_stats();
    info!(
        agents = coordinator.list_agent_states().len(),
        cache_entries = stats.entries,
        cache_hits = stats.hits,
        cache_misses = stats.misses,
        "Fleet control plane stopped"
    );
    Ok(())
}

/// Wait for a background task, reporting a panic or abort instead of
/// swallowing it.
async fn join_background<T>(name: &str, handle: JoinHandle<T>) -> Option<T> {
    match handle.await {
        Ok(value) => Some(value),
        Err(e) if e.is_panic() => {
            warn!(task = name, error = %e, "Background task panicked");
            None
        }
        Err(e) => {
            warn!(task = name, error = %e, "Background task did not finish cleanly");
            None
        }
    }
}
