// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::agent::{AgentId, DeviceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeartbeatId(pub Uuid);

impl HeartbeatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HeartbeatId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HeartbeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Periodic status report from an agent. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub id: HeartbeatId,
    pub agent_id: AgentId,
    pub device_id: Option<DeviceId>,
    pub timestamp: DateTime<Utc>,
    /// Opaque agent-reported status; the core never interprets it.
    pub status: serde_json::Value,
}

impl Heartbeat {
    pub fn new(
        agent_id: impl Into<AgentId>,
        device_id: Option<impl Into<DeviceId>>,
        status: serde_json::Value,
    ) -> Self {
        Self {
            id: HeartbeatId::new(),
            agent_id: agent_id.into(),
            device_id: device_id.map(Into::into),
            timestamp: Utc::now(),
            status,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
