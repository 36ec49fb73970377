// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Event Logger Application Service
//!
//! Subscribes to the event bus and writes every domain event to the tracing
//! log under the `fleet::events` target, giving an audit trail of heartbeats,
//! operation transitions and cache activity.
//!
//! Runs until the bus closes or its shutdown token fires. Lagging is logged
//! and skipped; the logger never takes the process down.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::events::{AgentEvent, CacheEvent, OperationEvent};
use crate::infrastructure::event_bus::{DomainEvent, EventBus, EventBusError};

pub struct EventLogger {
    event_bus: Arc<EventBus>,
    shutdown_token: CancellationToken,
}

impl EventLogger {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            event_bus,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the background logging task.
    ///
    /// Subscribes before returning, so no event published after this call is
    /// missed.
    pub fn start(self: Arc<Self>) -> JoinHandle<u64> {
        info!("Starting event logger background task");
        let mut receiver = self.event_bus.subscribe();

        tokio::spawn(async move {
            let mut events_logged = 0u64;
            loop {
                tokio::select! {
                    received = receiver.recv() => match received {
                        Ok(event) => {
                            events_logged += 1;
                            log_event(&event);
                        }
                        Err(EventBusError::Lagged(n)) => {
                            warn!(dropped = n, "Event logger fell behind; events dropped");
                        }
                        Err(EventBusError::Closed) | Err(EventBusError::Empty) => {
                            info!("Event bus closed; event logger exiting");
                            break;
                        }
                    },
                    _ = self.shutdown_token.cancelled() => {
                        debug!("Event logger received shutdown signal");
                        break;
                    }
                }
            }
            info!(events_logged, "Event logger stopped");
            events_logged
        })
    }
}

fn log_event(event: &DomainEvent) {
    match event {
        DomainEvent::Agent(AgentEvent::HeartbeatRecorded {
            agent_id,
            first_heartbeat,
            ..
        }) => {
            debug!(target: "fleet::events", %agent_id, first_heartbeat, "heartbeat_recorded");
        }
        DomainEvent::Agent(AgentEvent::AgentForgotten { agent_id, .. }) => {
            info!(target: "fleet::events", %agent_id, "agent_forgotten");
        }
        DomainEvent::Operation(op) => {
            let operation_id = op.operation_id();
            let agent_id = op.agent_id();
            match op {
                OperationEvent::OperationQueued { directive, .. } => {
                    info!(target: "fleet::events", %operation_id, %agent_id, %directive, "operation_queued");
                }
                OperationEvent::OperationDelivered { delivery_attempt, .. } => {
                    info!(target: "fleet::events", %operation_id, %agent_id, delivery_attempt, "operation_delivered");
                }
                OperationEvent::OperationAcknowledged { .. } => {
                    info!(target: "fleet::events", %operation_id, %agent_id, "operation_acknowledged");
                }
                OperationEvent::OperationRejected { .. } => {
                    warn!(target: "fleet::events", %operation_id, %agent_id, "operation_rejected");
                }
                OperationEvent::OperationRequeued { reason, .. } => {
                    warn!(target: "fleet::events", %operation_id, %agent_id, reason = reason.as_str(), "operation_requeued");
                }
                OperationEvent::OperationDeleted { .. } => {
                    info!(target: "fleet::events", %operation_id, %agent_id, "operation_deleted");
                }
            }
        }
        DomainEvent::Cache(CacheEvent::EntryStored {
            cache_key,
            content_type,
            version_token,
            ..
        }) => {
            info!(target: "fleet::events", %cache_key, %content_type, %version_token, "cache_entry_stored");
        }
        DomainEvent::Cache(CacheEvent::EntryInvalidated {
            cache_key,
            content_type,
            ..
        }) => {
            info!(target: "fleet::events", %cache_key, %content_type, "cache_entry_invalidated");
        }
        DomainEvent::Cache(CacheEvent::GenerationFailed {
            cache_key,
            content_type,
            error,
            ..
        }) => {
            warn!(target: "fleet::events", %cache_key, %content_type, %error, "cache_generation_failed");
        }
    }
}
