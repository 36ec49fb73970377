// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent & Device Identity
//!
//! Agents are fleet member processes; each agent may host zero or more
//! devices. Both identifiers are opaque strings resolved by the transport
//! layer before they reach the core.
//!
//! [`AgentState`] is a materialized view derived from heartbeats. It is never
//! the source of truth and can always be rebuilt by replaying them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::domain::heartbeat::Heartbeat;

/// Identifier of an agent process, stable for the agent's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the identifier is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a device hosted by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Last-known view of an agent, folded from its heartbeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: AgentId,
    /// Timestamp of the earliest heartbeat folded into this view.
    pub first_heartbeat_at: DateTime<Utc>,
    /// Latest heartbeat timestamp; never moves backwards.
    pub last_heartbeat_at: DateTime<Utc>,
    /// Every device the agent has reported on.
    pub last_known_device_ids: BTreeSet<DeviceId>,
    pub heartbeat_count: u64,
    /// Status payload of the most recent heartbeat by timestamp.
    pub last_status: serde_json::Value,
}

impl AgentState {
    /// Start a view from the agent's first observed heartbeat.
    pub fn from_heartbeat(heartbeat: &Heartbeat) -> Self {
        let mut last_known_device_ids = BTreeSet::new();
        if let Some(device_id) = &heartbeat.device_id {
            last_known_device_ids.insert(device_id.clone());
        }

        Self {
            agent_id: heartbeat.agent_id.clone(),
            first_heartbeat_at: heartbeat.timestamp,
            last_heartbeat_at: heartbeat.timestamp,
            last_known_device_ids,
            heartbeat_count: 1,
            last_status: heartbeat.status.clone(),
        }
    }

    /// Fold another heartbeat of the same agent into the view.
    ///
    /// Out-of-order heartbeats still count and contribute devices, but do not
    /// rewind `last_heartbeat_at` or replace a newer status.
    pub fn apply(&mut self, heartbeat: &Heartbeat) {
        debug_assert_eq!(self.agent_id, heartbeat.agent_id);

        self.heartbeat_count += 1;
        if let Some(device_id) = &heartbeat.device_id {
            self.last_known_device_ids.insert(device_id.clone());
        }
        if heartbeat.timestamp < self.first_heartbeat_at {
            self.first_heartbeat_at = heartbeat.timestamp;
        }
        if heartbeat.timestamp >= self.last_heartbeat_at {
            self.last_heartbeat_at = heartbeat.timestamp;
            self.last_status = heartbeat.status.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_blank_identifiers() {
        assert!(AgentId::new("").is_blank());
        assert!(AgentId::new("  ").is_blank());
        assert!(!AgentId::new("agent-1").is_blank());
        assert!(DeviceId::new("\t").is_blank());
    }

    #[test]
    fn test_apply_keeps_latest_status() {
        let now = Utc::now();
        let first = Heartbeat::new("agent-1", Some("dev-a"), json!({"phase": "boot"}))
            .with_timestamp(now);
        let mut state = AgentState::from_heartbeat(&first);

        let late = Heartbeat::new("agent-1", Some("dev-b"), json!({"phase": "running"}))
            .with_timestamp(now + Duration::seconds(10));
        state.apply(&late);

        let stale = Heartbeat::new("agent-1", None::<&str>, json!({"phase": "stale"}))
            .with_timestamp(now - Duration::seconds(10));
        state.apply(&stale);

        assert_eq!(state.heartbeat_count, 3);
        assert_eq!(state.last_heartbeat_at, now + Duration::seconds(10));
        assert_eq!(state.first_heartbeat_at, now - Duration::seconds(10));
        assert_eq!(state.last_status, json!({"phase": "running"}));
        assert_eq!(state.last_known_device_ids.len(), 2);
    }
}
