// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{AgentId, DeviceId};
use crate::domain::cache::{CacheKey, ContentType};
use crate::domain::heartbeat::HeartbeatId;
use crate::domain::operation::OperationId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentEvent {
    HeartbeatRecorded {
        agent_id: AgentId,
        device_id: Option<DeviceId>,
        heartbeat_id: HeartbeatId,
        first_heartbeat: bool,
        recorded_at: DateTime<Utc>,
    },
    AgentForgotten {
        agent_id: AgentId,
        forgotten_at: DateTime<Utc>,
    },
}

impl AgentEvent {
    pub fn agent_id(&self) -> &AgentId {
        match self {
            AgentEvent::HeartbeatRecorded { agent_id, .. } => agent_id,
            AgentEvent::AgentForgotten { agent_id, .. } => agent_id,
        }
    }
}

/// Why a delivered operation went back to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequeueReason {
    /// Too many heartbeats passed without an ack.
    MissedHeartbeats,
    /// Delivered longer than the redelivery timeout.
    Timeout,
    /// The agent's first heartbeat since the view was (re)built.
    AgentRestarted,
}

impl RequeueReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequeueReason::MissedHeartbeats => "missed_heartbeats",
            RequeueReason::Timeout => "timeout",
            RequeueReason::AgentRestarted => "agent_restarted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationEvent {
    OperationQueued {
        operation_id: OperationId,
        agent_id: AgentId,
        directive: String,
        queued_at: DateTime<Utc>,
    },
    OperationDelivered {
        operation_id: OperationId,
        agent_id: AgentId,
        delivery_attempt: u32,
        delivered_at: DateTime<Utc>,
    },
    OperationAcknowledged {
        operation_id: OperationId,
        agent_id: AgentId,
        acknowledged_at: DateTime<Utc>,
    },
    OperationRejected {
        operation_id: OperationId,
        agent_id: AgentId,
        rejected_at: DateTime<Utc>,
    },
    OperationRequeued {
        operation_id: OperationId,
        agent_id: AgentId,
        reason: RequeueReason,
        requeued_at: DateTime<Utc>,
    },
    OperationDeleted {
        operation_id: OperationId,
        agent_id: AgentId,
        deleted_at: DateTime<Utc>,
    },
}

impl OperationEvent {
    pub fn agent_id(&self) -> &AgentId {
        match self {
            OperationEvent::OperationQueued { agent_id, .. } => agent_id,
            OperationEvent::OperationDelivered { agent_id, .. } => agent_id,
            OperationEvent::OperationAcknowledged { agent_id, .. } => agent_id,
            OperationEvent::OperationRejected { agent_id, .. } => agent_id,
            OperationEvent::OperationRequeued { agent_id, .. } => agent_id,
            OperationEvent::OperationDeleted { agent_id, .. } => agent_id,
        }
    }

    pub fn operation_id(&self) -> OperationId {
        match self {
            OperationEvent::OperationQueued { operation_id, .. } => *operation_id,
            OperationEvent::OperationDelivered { operation_id, .. } => *operation_id,
            OperationEvent::OperationAcknowledged { operation_id, .. } => *operation_id,
            OperationEvent::OperationRejected { operation_id, .. } => *operation_id,
            OperationEvent::OperationRequeued { operation_id, .. } => *operation_id,
            OperationEvent::OperationDeleted { operation_id, .. } => *operation_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CacheEvent {
    EntryStored {
        cache_key: CacheKey,
        content_type: ContentType,
        version_token: String,
        stored_at: DateTime<Utc>,
    },
    EntryInvalidated {
        cache_key: CacheKey,
        content_type: ContentType,
        invalidated_at: DateTime<Utc>,
    },
    GenerationFailed {
        cache_key: CacheKey,
        content_type: ContentType,
        error: String,
        failed_at: DateTime<Utc>,
    },
}
