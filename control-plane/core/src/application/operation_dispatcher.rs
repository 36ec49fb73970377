// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Operation Dispatcher
//!
//! Queues directives per agent and hands them out on heartbeat, with
//! at-least-once delivery.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Own the operation lifecycle: enqueue, batch delivery,
//!   acknowledgement, redelivery, deletion and retention
//!
//! ## Locking
//!
//! Batch selection runs under the agent lock shared with the tracker, so two
//! concurrent deliveries for one agent never select the same operation. Every
//! mutation of a single operation runs under that operation's lock. The order
//! is always agent lock, then operation lock; acknowledgement and the
//! redelivery sweeps take operation locks only.
//!
//! ## Redelivery
//!
//! A `DELIVERED` operation goes back to `QUEUED` when
//!
//! - `redelivery_after_heartbeats` further heartbeats of its agent arrive
//!   without an acknowledgement,
//! - it has stayed delivered for `redelivery_timeout` (`requeue_expired`), or
//! - its agent sends the first heartbeat this process has seen, since the
//!   response carrying the batch may have been lost.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::application::keyed_lock::{KeyedGuard, KeyedLocks};
use crate::domain::agent::{AgentId, DeviceId};
use crate::domain::control_plane_config::DispatcherSettings;
use crate::domain::error::{CoordinationError, CoordinationResult};
use crate::domain::events::{OperationEvent, RequeueReason};
use crate::domain::operation::{AckOutcome, NewOperation, Operation, OperationId, OperationState};
use crate::domain::repository::OperationRepository;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Batch size used when a caller passes `0`.
    pub max_batch_size: usize,
    /// Heartbeats without an ack before redelivery; `0` disables the rule.
    pub redelivery_after_heartbeats: u32,
    pub redelivery_timeout: Duration,
    pub terminal_retention: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&DispatcherSettings::default())
    }
}

impl From<&DispatcherSettings> for DispatcherConfig {
    fn from(settings: &DispatcherSettings) -> Self {
        Self {
            max_batch_size: settings.max_batch_size.max(1),
            redelivery_after_heartbeats: settings.redelivery_after_heartbeats,
            redelivery_timeout: settings.redelivery_timeout,
            terminal_retention: settings.terminal_retention,
        }
    }
}

pub struct OperationDispatcher {
    repository: Arc<dyn OperationRepository>,
    agent_locks: Arc<KeyedLocks<AgentId>>,
    operation_locks: KeyedLocks<OperationId>,
    /// Delivered operations per agent and the heartbeats seen since delivery.
    awaiting_ack: DashMap<AgentId, HashMap<OperationId, u32>>,
    sequence: AtomicU64,
    config: DispatcherConfig,
    event_bus: Arc<EventBus>,
}

impl OperationDispatcher {
    pub fn new(
        repository: Arc<dyn OperationRepository>,
        agent_locks: Arc<KeyedLocks<AgentId>>,
        config: DispatcherConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            repository,
            agent_locks,
            operation_locks: KeyedLocks::new(),
            awaiting_ack: DashMap::new(),
            sequence: AtomicU64::new(0),
            config,
            event_bus,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub async fn enqueue(&self, request: NewOperation) -> CoordinationResult<Operation> {
        if request.agent_id.is_blank() {
            return Err(CoordinationError::invalid("operation agent id must not be empty"));
        }
        if request.directive.trim().is_empty() {
            return Err(CoordinationError::invalid("operation directive must not be empty"));
        }
        if request.target_device_id.as_ref().is_some_and(DeviceId::is_blank) {
            return Err(CoordinationError::invalid("target device id must not be blank"));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let operation = Operation::queued(request, sequence, Utc::now());
        let operation = self.repository.save(&operation).await?;

        metrics::counter!("fleet_operations_enqueued_total").increment(1);
        info!(
            operation_id = %operation.id,
            agent_id = %operation.agent_id,
            directive = %operation.directive,
            "Operation queued"
        );
        self.event_bus.publish_operation_event(OperationEvent::OperationQueued {
            operation_id: operation.id,
            agent_id: operation.agent_id.clone(),
            directive: operation.directive.clone(),
            queued_at: operation.created_at,
        });
        Ok(operation)
    }

    /// Select and deliver the agent's oldest queued operations.
    pub async fn operations_for_delivery(
        &self,
        agent_id: &AgentId,
        max_batch: usize,
    ) -> CoordinationResult<Vec<Operation>> {
        if agent_id.is_blank() {
            return Err(CoordinationError::invalid("agent id must not be empty"));
        }
        let guard = self.agent_locks.lock(agent_id).await;
        self.deliver_locked(&guard, max_batch).await
    }

    /// Deliver a batch while the caller holds the agent lock.
    ///
    /// The batch is all-or-nothing: if persisting any transition fails, the
    /// operations already moved in this batch are restored to `QUEUED`.
    pub(crate) async fn deliver_locked(
        &self,
        guard: &KeyedGuard<AgentId>,
        max_batch: usize,
    ) -> CoordinationResult<Vec<Operation>> {
        let agent_id = guard.key();
        let limit = if max_batch == 0 {
            self.config.max_batch_size
        } else {
            max_batch
        };

        let mut candidates: Vec<Operation> = self
            .repository
            .list_by_agent(agent_id)
            .await?
            .into_iter()
            .filter(|op| op.state == OperationState::Queued)
            .collect();
        candidates.sort_by(Operation::delivery_order);

        let now = Utc::now();
        let mut held = Vec::new();
        let mut originals: Vec<Operation> = Vec::new();
        let mut delivered: Vec<Operation> = Vec::new();

        for candidate in candidates {
            if delivered.len() >= limit {
                break;
            }
            let op_guard = self.operation_locks.lock(&candidate.id).await;
            // Re-read under the operation lock; an admin delete may have won
            let current = match self.repository.get_by_id(candidate.id).await {
                Ok(Some(current)) if current.state == OperationState::Queued => current,
                Ok(_) => continue,
                Err(e) => {
                    self.rollback(&originals).await;
                    return Err(e.into());
                }
            };

            let mut next = current.clone();
            if let Err(e) = next.mark_delivered(now) {
                self.rollback(&originals).await;
                return Err(e.into());
            }
            match self.repository.save(&next).await {
                Ok(saved) => {
                    originals.push(current);
                    delivered.push(saved);
                    held.push(op_guard);
                }
                Err(e) => {
                    error!(
                        agent_id = %agent_id,
                        operation_id = %next.id,
                        error = %e,
                        "Failed to persist delivery; rolling back batch"
                    );
                    self.rollback(&originals).await;
                    return Err(e.into());
                }
            }
        }
        if delivered.is_empty() {
            debug!(agent_id = %agent_id, "No queued operations to deliver");
            return Ok(delivered);
        }

        // Track before releasing the operation locks so an ack cannot land first
        {
            let mut pending = self.awaiting_ack.entry(agent_id.clone()).or_default();
            for op in &delivered {
                pending.insert(op.id, 0);
            }
        }
        drop(held);

        metrics::counter!("fleet_operations_delivered_total").increment(delivered.len() as u64);
        info!(agent_id = %agent_id, count = delivered.len(), "Delivering operations");
        for op in &delivered {
            self.event_bus.publish_operation_event(OperationEvent::OperationDelivered {
                operation_id: op.id,
                agent_id: op.agent_id.clone(),
                delivery_attempt: op.delivery_attempts,
                delivered_at: op.last_state_change_at,
            });
        }
        Ok(delivered)
    }

    async fn rollback(&self, originals: &[Operation]) {
        for original in originals {
            if let Err(e) = self.repository.save(original).await {
                error!(
                    operation_id = %original.id,
                    error = %e,
                    "Failed to roll back delivered operation"
                );
            }
        }
    }

    pub async fn acknowledge(
        &self,
        operation_id: OperationId,
        outcome: AckOutcome,
    ) -> CoordinationResult<Operation> {
        let _guard = self.operation_locks.lock(&operation_id).await;
        let current = self.load(operation_id).await?;

        let mut next = current.clone();
        next.finalize(outcome, Utc::now())?;
        let saved = self.repository.save(&next).await?;
        self.forget_pending(&saved.agent_id, saved.id);

        metrics::counter!("fleet_operations_finalized_total", "outcome" => outcome.as_str())
            .increment(1);
        info!(
            operation_id = %saved.id,
            agent_id = %saved.agent_id,
            outcome = outcome.as_str(),
            "Operation finalized"
        );
        let event = match outcome {
            AckOutcome::Acknowledged => OperationEvent::OperationAcknowledged {
                operation_id: saved.id,
                agent_id: saved.agent_id.clone(),
                acknowledged_at: saved.last_state_change_at,
            },
            AckOutcome::Rejected => OperationEvent::OperationRejected {
                operation_id: saved.id,
                agent_id: saved.agent_id.clone(),
                rejected_at: saved.last_state_change_at,
            },
        };
        self.event_bus.publish_operation_event(event);
        Ok(saved)
    }

    /// Apply heartbeat-driven redelivery for the agent whose lock is held.
    ///
    /// Returns the operations put back in the queue.
    pub(crate) async fn observe_heartbeat_locked(
        &self,
        guard: &KeyedGuard<AgentId>,
        first_heartbeat: bool,
    ) -> CoordinationResult<Vec<Operation>> {
        let agent_id = guard.key();

        if first_heartbeat {
            self.awaiting_ack.remove(agent_id);
            let delivered: Vec<Operation> = self
                .repository
                .list_by_agent(agent_id)
                .await?
                .into_iter()
                .filter(|op| op.state == OperationState::Delivered)
                .collect();
            let mut requeued = Vec::with_capacity(delivered.len());
            for op in delivered {
                if let Some(op) = self.requeue(op.id, RequeueReason::AgentRestarted, None).await? {
                    requeued.push(op);
                }
            }
            return Ok(requeued);
        }

        let threshold = self.config.redelivery_after_heartbeats;
        if threshold == 0 {
            return Ok(Vec::new());
        }

        let due: Vec<OperationId> = match self.awaiting_ack.get_mut(agent_id) {
            Some(mut pending) => pending
                .iter_mut()
                .filter_map(|(id, seen)| {
                    *seen += 1;
                    (*seen >= threshold).then_some(*id)
                })
                .collect(),
            None => Vec::new(),
        };

        let mut requeued = Vec::with_capacity(due.len());
        for id in due {
            if let Some(op) = self.requeue(id, RequeueReason::MissedHeartbeats, None).await? {
                requeued.push(op);
            }
        }
        Ok(requeued)
    }

    /// Requeue operations delivered longer than the redelivery timeout.
    ///
    /// Failures on individual operations are logged and skipped.
    pub async fn requeue_expired(&self, now: DateTime<Utc>) -> CoordinationResult<Vec<Operation>> {
        let expired: Vec<Operation> = self
            .repository
            .list()
            .await?
            .into_iter()
            .filter(|op| {
                op.state == OperationState::Delivered
                    && elapsed_at_least(op.last_state_change_at, now, self.config.redelivery_timeout)
            })
            .collect();

        let mut requeued = Vec::with_capacity(expired.len());
        for op in expired {
            match self
                .requeue(op.id, RequeueReason::Timeout, Some(op.last_state_change_at))
                .await
            {
                Ok(Some(op)) => requeued.push(op),
                Ok(None) => {}
                Err(e) => warn!(operation_id = %op.id, error = %e, "Failed to requeue expired operation"),
            }
        }
        Ok(requeued)
    }

    /// Reset one operation from `DELIVERED` to `QUEUED`.
    ///
    /// With `observed` set, the reset only happens if the operation has not
    /// changed state since that instant. `Ok(None)` means nothing to do.
    async fn requeue(
        &self,
        operation_id: OperationId,
        reason: RequeueReason,
        observed: Option<DateTime<Utc>>,
    ) -> CoordinationResult<Option<Operation>> {
        let _guard = self.operation_locks.lock(&operation_id).await;
        let current = match self.repository.get_by_id(operation_id).await? {
            Some(op) if op.state == OperationState::Delivered => op,
            Some(op) => {
                self.forget_pending(&op.agent_id, op.id);
                return Ok(None);
            }
            None => return Ok(None),
        };
        if observed.is_some_and(|at| at != current.last_state_change_at) {
            return Ok(None);
        }

        let mut next = current;
        next.reset_for_redelivery(Utc::now())?;
        let saved = self.repository.save(&next).await?;
        self.forget_pending(&saved.agent_id, saved.id);

        metrics::counter!("fleet_operations_requeued_total", "reason" => reason.as_str()).increment(1);
        warn!(
            operation_id = %saved.id,
            agent_id = %saved.agent_id,
            reason = reason.as_str(),
            delivery_attempts = saved.delivery_attempts,
            "Operation requeued for redelivery"
        );
        self.event_bus.publish_operation_event(OperationEvent::OperationRequeued {
            operation_id: saved.id,
            agent_id: saved.agent_id.clone(),
            reason,
            requeued_at: saved.last_state_change_at,
        });
        Ok(Some(saved))
    }

    /// Retire an acknowledged or rejected operation.
    pub async fn delete_operation(&self, operation_id: OperationId) -> CoordinationResult<Operation> {
        self.delete(operation_id, false).await
    }

    /// Delete an operation in any state (administrative).
    pub async fn admin_delete_operation(&self, operation_id: OperationId) -> CoordinationResult<Operation> {
        self.delete(operation_id, true).await
    }

    async fn delete(&self, operation_id: OperationId, force: bool) -> CoordinationResult<Operation> {
        let _guard = self.operation_locks.lock(&operation_id).await;
        let mut operation = self.load(operation_id).await?;
        let from = operation.state;
        let now = Utc::now();
        if force {
            operation.force_delete(now)?;
        } else {
            operation.mark_deleted(now)?;
        }

        self.repository.delete_by_id(operation_id).await?;
        self.forget_pending(&operation.agent_id, operation_id);

        info!(
            operation_id = %operation_id,
            agent_id = %operation.agent_id,
            from = from.as_str(),
            forced = force,
            "Operation deleted"
        );
        self.event_bus.publish_operation_event(OperationEvent::OperationDeleted {
            operation_id,
            agent_id: operation.agent_id.clone(),
            deleted_at: operation.last_state_change_at,
        });
        Ok(operation)
    }

    /// Delete terminal operations whose last transition is older than
    /// `older_than`. Returns how many were removed.
    pub async fn purge_terminal(&self, older_than: Duration, now: DateTime<Utc>) -> CoordinationResult<usize> {
        let stale: Vec<OperationId> = self
            .repository
            .list()
            .await?
            .into_iter()
            .filter(|op| op.state.is_terminal() && elapsed_at_least(op.last_state_change_at, now, older_than))
            .map(|op| op.id)
            .collect();

        let mut purged = 0;
        for id in stale {
            match self.delete(id, false).await {
                Ok(_) => purged += 1,
                // Raced with another delete
                Err(CoordinationError::NotFound { .. }) => {}
                Err(e) => warn!(operation_id = %id, error = %e, "Failed to purge terminal operation"),
            }
        }

        let released = self.operation_locks.prune();
        if purged > 0 {
            info!(purged, released_locks = released, "Purged terminal operations");
        }
        Ok(purged)
    }

    pub async fn get_operation(&self, operation_id: OperationId) -> CoordinationResult<Operation> {
        self.load(operation_id).await
    }

    pub async fn list_operations(&self) -> CoordinationResult<Vec<Operation>> {
        Ok(self.repository.list().await?)
    }

    pub async fn list_operations_by_agent(&self, agent_id: &AgentId) -> CoordinationResult<Vec<Operation>> {
        Ok(self.repository.list_by_agent(agent_id).await?)
    }

    pub async fn list_operations_by_device(&self, device_id: &DeviceId) -> CoordinationResult<Vec<Operation>> {
        Ok(self.repository.list_by_device(device_id).await?)
    }

    /// Operations of the agent delivered and still waiting for an ack.
    pub fn awaiting_ack_count(&self, agent_id: &AgentId) -> usize {
        self.awaiting_ack.get(agent_id).map(|p| p.len()).unwrap_or(0)
    }

    async fn load(&self, operation_id: OperationId) -> CoordinationResult<Operation> {
        self.repository
            .get_by_id(operation_id)
            .await?
            .ok_or_else(|| CoordinationError::NotFound {
                entity: "operation",
                id: operation_id.to_string(),
            })
    }

    fn forget_pending(&self, agent_id: &AgentId, operation_id: OperationId) {
        self.awaiting_ack
            .remove_if_mut(agent_id, |_, pending| {
                pending.remove(&operation_id);
                pending.is_empty()
            });
    }
}

fn elapsed_at_least(since: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> bool {
    (now - since)
        .to_std()
        .map(|elapsed| elapsed >= threshold)
        .unwrap_or(false)
}
