// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Redelivery Sweeper - Background task for delivery timeouts and retention
//!
//! Periodically requeues operations left `DELIVERED` past the redelivery
//! timeout, purges terminal operations past their retention, evicts expired
//! cache entries, and releases idle agent lock slots.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Time-driven half of the redelivery policy

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::coordinator::FleetCoordinator;
use crate::domain::control_plane_config::DispatcherSettings;

#[derive(Debug, Clone)]
pub struct RedeliverySweeperConfig {
    pub interval: Duration,
    /// Terminal operations older than this are deleted.
    pub terminal_retention: Duration,
    pub enabled: bool,
}

impl From<&DispatcherSettings> for RedeliverySweeperConfig {
    fn from(settings: &DispatcherSettings) -> Self {
        Self {
            interval: settings.sweep_interval,
            terminal_retention: settings.terminal_retention,
            enabled: !settings.sweep_interval.is_zero(),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub purged: usize,
    pub evicted: usize,
    pub released_locks: usize,
}

pub struct RedeliverySweeper {
    coordinator: Arc<FleetCoordinator>,
    config: RedeliverySweeperConfig,
    shutdown_token: CancellationToken,
}

impl RedeliverySweeper {
    pub fn new(coordinator: Arc<FleetCoordinator>, config: RedeliverySweeperConfig) -> Self {
        Self {
            coordinator,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Redelivery sweeper is disabled");
            return;
        }

        info!(
            interval = ?self.config.interval,
            terminal_retention = ?self.config.terminal_retention,
            "Starting redelivery sweeper background task"
        );

        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.sweep().await {
                        Ok(report) if report != SweepReport::default() => {
                            info!(
                                requeued = report.requeued,
                                purged = report.purged,
                                evicted = report.evicted,
                                released_locks = report.released_locks,
                                "Redelivery sweep completed"
                            );
                        }
                        Ok(_) => debug!("Redelivery sweep found nothing to do"),
                        Err(e) => warn!("Redelivery sweep failed: {}", e),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Redelivery sweeper received shutdown signal");
                    break;
                }
            }
        }

        info!("Redelivery sweeper stopped");
    }

    /// Run one sweep cycle.
    pub async fn sweep(&self) -> anyhow::Result<SweepReport> {
        let now = Utc::now();
        let dispatcher = self.coordinator.dispatcher();

        let requeued = dispatcher.requeue_expired(now).await?.len();
        let purged = dispatcher
            .purge_terminal(self.config.terminal_retention, now)
            .await?;
        let evicted = self.coordinator.cache().evict_expired(now);
        let released_locks = self.coordinator.prune_agent_locks();

        Ok(SweepReport {
            requeued,
            purged,
            evicted,
            released_locks,
        })
    }
}
