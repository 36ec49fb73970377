// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Operation Aggregate
//!
//! A directive queued for delivery to one agent, optionally aimed at one of
//! its devices.
//!
//! ## Lifecycle
//!
//! ```text
//! QUEUED ──deliver──▶ DELIVERED ──ack──▶ ACKNOWLEDGED ──▶ DELETED
//!    ▲                    │      └─reject─▶ REJECTED ────▶ DELETED
//!    └──── redelivery ────┘
//! ```
//!
//! Every transition stamps `last_state_change_at`, which never moves
//! backwards. The only edge that points back toward `QUEUED` is the explicit
//! redelivery reset; `delivery_attempts` counts every hand-off, so a
//! redelivered operation reports more than one. Administrative deletion may
//! skip straight to `DELETED` from any state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::agent::{AgentId, DeviceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    Queued,
    Delivered,
    Acknowledged,
    Rejected,
    Deleted,
}

impl OperationState {
    /// Acknowledged and rejected operations await only deletion.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Acknowledged | OperationState::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Queued => "QUEUED",
            OperationState::Delivered => "DELIVERED",
            OperationState::Acknowledged => "ACKNOWLEDGED",
            OperationState::Rejected => "REJECTED",
            OperationState::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome an agent reports for a delivered operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckOutcome {
    Acknowledged,
    Rejected,
}

impl AckOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckOutcome::Acknowledged => "acknowledged",
            AckOutcome::Rejected => "rejected",
        }
    }
}

impl From<AckOutcome> for OperationState {
    fn from(outcome: AckOutcome) -> Self {
        match outcome {
            AckOutcome::Acknowledged => OperationState::Acknowledged,
            AckOutcome::Rejected => OperationState::Rejected,
        }
    }
}

/// Request to queue a directive; becomes an [`Operation`] once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOperation {
    pub agent_id: AgentId,
    pub target_device_id: Option<DeviceId>,
    pub directive: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
}

impl NewOperation {
    pub fn new(agent_id: impl Into<AgentId>, directive: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            target_device_id: None,
            directive: directive.into(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn for_device(mut self, device_id: impl Into<DeviceId>) -> Self {
        self.target_device_id = Some(device_id.into());
        self
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub agent_id: AgentId,
    pub target_device_id: Option<DeviceId>,
    pub directive: String,
    pub arguments: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub state: OperationState,
    pub last_state_change_at: DateTime<Utc>,
    /// Enqueue counter; orders operations sharing a `created_at`.
    pub sequence: u64,
    /// Number of times the operation has been handed to its agent.
    pub delivery_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("operation {operation_id} cannot move from {from} to {to}")]
    InvalidTransition {
        operation_id: OperationId,
        from: OperationState,
        to: OperationState,
    },
}

impl Operation {
    pub fn queued(request: NewOperation, sequence: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: OperationId::new(),
            agent_id: request.agent_id,
            target_device_id: request.target_device_id,
            directive: request.directive,
            arguments: request.arguments,
            created_at: now,
            state: OperationState::Queued,
            last_state_change_at: now,
            sequence,
            delivery_attempts: 0,
        }
    }

    /// Oldest first: `created_at`, then enqueue sequence.
    pub fn delivery_order(a: &Operation, b: &Operation) -> Ordering {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.sequence.cmp(&b.sequence))
    }

    pub fn mark_delivered(&mut self, now: DateTime<Utc>) -> Result<(), OperationError> {
        self.transition(OperationState::Queued, OperationState::Delivered, now)?;
        self.delivery_attempts += 1;
        Ok(())
    }

    pub fn finalize(&mut self, outcome: AckOutcome, now: DateTime<Utc>) -> Result<(), OperationError> {
        self.transition(OperationState::Delivered, outcome.into(), now)
    }

    /// Put a delivered-but-unacknowledged operation back in the queue.
    pub fn reset_for_redelivery(&mut self, now: DateTime<Utc>) -> Result<(), OperationError> {
        self.transition(OperationState::Delivered, OperationState::Queued, now)
    }

    /// Retire a terminal operation.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) -> Result<(), OperationError> {
        if !self.state.is_terminal() {
            return Err(self.invalid(OperationState::Deleted));
        }
        self.stamp(OperationState::Deleted, now);
        Ok(())
    }

    /// Administrative delete; allowed from every state but `DELETED`.
    pub fn force_delete(&mut self, now: DateTime<Utc>) -> Result<(), OperationError> {
        if self.state == OperationState::Deleted {
            return Err(self.invalid(OperationState::Deleted));
        }
        self.stamp(OperationState::Deleted, now);
        Ok(())
    }

    fn transition(
        &mut self,
        expected: OperationState,
        to: OperationState,
        now: DateTime<Utc>,
    ) -> Result<(), OperationError> {
        if self.state != expected {
            return Err(self.invalid(to));
        }
        self.stamp(to, now);
        Ok(())
    }

    fn stamp(&mut self, to: OperationState, now: DateTime<Utc>) {
        self.state = to;
        self.last_state_change_at = now.max(self.last_state_change_at);
    }

    fn invalid(&self, to: OperationState) -> OperationError {
        OperationError::InvalidTransition {
            operation_id: self.id,
            from: self.state,
            to,
        }
    }
}
