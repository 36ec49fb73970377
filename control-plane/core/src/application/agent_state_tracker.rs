// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent State Tracker
//!
//! Ingests heartbeats and maintains the per-agent materialized view.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Persist heartbeats, fold them into `AgentState`, and tell
//!   callers when an agent is seen for the first time
//!
//! The heartbeat is persisted before the view changes; a provider failure
//! leaves the view untouched. Recording is serialized per agent through the
//! shared agent lock map, the same one the dispatcher uses for delivery.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::keyed_lock::{KeyedGuard, KeyedLocks};
use crate::domain::agent::{AgentId, AgentState};
use crate::domain::error::{CoordinationError, CoordinationResult};
use crate::domain::events::AgentEvent;
use crate::domain::heartbeat::Heartbeat;
use crate::domain::repository::HeartbeatRepository;
use crate::infrastructure::event_bus::EventBus;

/// Result of recording one heartbeat.
#[derive(Debug, Clone)]
pub struct HeartbeatOutcome {
    pub heartbeat: Heartbeat,
    pub state: AgentState,
    /// First heartbeat this tracker has seen for the agent.
    pub first_heartbeat: bool,
}

pub struct AgentStateTracker {
    repository: Arc<dyn HeartbeatRepository>,
    states: DashMap<AgentId, AgentState>,
    locks: Arc<KeyedLocks<AgentId>>,
    event_bus: Arc<EventBus>,
}

impl AgentStateTracker {
    pub fn new(
        repository: Arc<dyn HeartbeatRepository>,
        locks: Arc<KeyedLocks<AgentId>>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            repository,
            states: DashMap::new(),
            locks,
            event_bus,
        }
    }

    pub async fn record_heartbeat(&self, heartbeat: Heartbeat) -> CoordinationResult<HeartbeatOutcome> {
        validate(&heartbeat)?;
        let guard = self.locks.lock(&heartbeat.agent_id).await;
        self.record_heartbeat_locked(&guard, heartbeat).await
    }

    /// Record a heartbeat while the caller already holds the agent's lock.
    pub(crate) async fn record_heartbeat_locked(
        &self,
        guard: &KeyedGuard<AgentId>,
        heartbeat: Heartbeat,
    ) -> CoordinationResult<HeartbeatOutcome> {
        validate(&heartbeat)?;
        if guard.key() != &heartbeat.agent_id {
            return Err(CoordinationError::invalid(format!(
                "heartbeat for agent '{}' recorded under the lock of '{}'",
                heartbeat.agent_id,
                guard.key()
            )));
        }

        let heartbeat = self.repository.save(&heartbeat).await.map_err(|e| {
            warn!(agent_id = %heartbeat.agent_id, error = %e, "Failed to persist heartbeat");
            CoordinationError::from(e)
        })?;

        let mut first_heartbeat = false;
        let state = self
            .states
            .entry(heartbeat.agent_id.clone())
            .and_modify(|state| state.apply(&heartbeat))
            .or_insert_with(|| {
                first_heartbeat = true;
                AgentState::from_heartbeat(&heartbeat)
            })
            .clone();

        metrics::counter!("fleet_heartbeats_total").increment(1);
        if first_heartbeat {
            info!(
                agent_id = %heartbeat.agent_id,
                device_id = ?heartbeat.device_id.as_ref().map(|d| d.as_str()),
                "First heartbeat from agent"
            );
        } else {
            debug!(
                agent_id = %heartbeat.agent_id,
                heartbeat_count = state.heartbeat_count,
                "Heartbeat recorded"
            );
        }

        self.event_bus.publish_agent_event(AgentEvent::HeartbeatRecorded {
            agent_id: heartbeat.agent_id.clone(),
            device_id: heartbeat.device_id.clone(),
            heartbeat_id: heartbeat.id,
            first_heartbeat,
            recorded_at: Utc::now(),
        });

        Ok(HeartbeatOutcome {
            heartbeat,
            state,
            first_heartbeat,
        })
    }

    /// Undo the view entry created by a first heartbeat whose follow-up work
    /// failed, so the retried heartbeat is reported as first seen again.
    ///
    /// The persisted heartbeat stays; `rebuild` still replays it.
    pub(crate) fn revert_first_heartbeat_locked(&self, guard: &KeyedGuard<AgentId>) -> Option<AgentState> {
        let (agent_id, state) = self.states.remove(guard.key())?;
        warn!(agent_id = %agent_id, "Reverted first heartbeat after failed follow-up");
        Some(state)
    }

    pub fn get_agent_state(&self, agent_id: &AgentId) -> Option<AgentState> {
        self.states.get(agent_id).map(|state| state.clone())
    }

    /// Snapshot of every known agent, ordered by agent id.
    pub fn list_agent_states(&self) -> Vec<AgentState> {
        let mut states: Vec<AgentState> = self.states.iter().map(|entry| entry.value().clone()).collect();
        states.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        states
    }

    /// Replace the view with one replayed from the provider's heartbeats.
    ///
    /// Agents present in the replay are no longer reported as first seen.
    pub async fn rebuild(&self) -> CoordinationResult<usize> {
        let heartbeats = self.repository.list().await?;
        let mut rebuilt: HashMap<AgentId, AgentState> = HashMap::new();
        for heartbeat in &heartbeats {
            match rebuilt.get_mut(&heartbeat.agent_id) {
                Some(state) => state.apply(heartbeat),
                None => {
                    rebuilt.insert(heartbeat.agent_id.clone(), AgentState::from_heartbeat(heartbeat));
                }
            }
        }

        self.states.clear();
        let agents = rebuilt.len();
        for (agent_id, state) in rebuilt {
            self.states.insert(agent_id, state);
        }

        info!(agents, heartbeats = heartbeats.len(), "Rebuilt agent state view");
        Ok(agents)
    }

    /// Drop an agent from the view. Its next heartbeat counts as a first one.
    pub async fn forget_agent(&self, agent_id: &AgentId) -> Option<AgentState> {
        let _guard = self.locks.lock(agent_id).await;
        let (_, state) = self.states.remove(agent_id)?;
        info!(agent_id = %agent_id, "Forgot agent");
        self.event_bus.publish_agent_event(AgentEvent::AgentForgotten {
            agent_id: agent_id.clone(),
            forgotten_at: Utc::now(),
        });
        Some(state)
    }

    pub fn agent_count(&self) -> usize {
        self.states.len()
    }
}

fn validate(heartbeat: &Heartbeat) -> CoordinationResult<()> {
    if heartbeat.agent_id.is_blank() {
        return Err(CoordinationError::invalid("heartbeat agent id must not be empty"));
    }
    if heartbeat.device_id.as_ref().is_some_and(|d| d.is_blank()) {
        return Err(CoordinationError::invalid("heartbeat device id must not be blank"));
    }
    Ok(())
}
