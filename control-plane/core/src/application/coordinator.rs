// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fleet Coordinator
//!
//! Facade wiring the agent state tracker, the operation dispatcher, and the
//! configuration cache into the surface a transport layer calls.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** One entry point per inbound request; owns the shared agent
//!   lock map so heartbeat handling and delivery serialize per agent
//!
//! `handle_heartbeat` records the heartbeat, applies heartbeat-driven
//! redelivery, and selects the next batch, all under a single hold of the
//! agent's lock.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::application::agent_state_tracker::AgentStateTracker;
use crate::application::config_cache::{CacheConfig, CacheStats, ConfigurationCache};
use crate::application::keyed_lock::KeyedLocks;
use crate::application::operation_dispatcher::{DispatcherConfig, OperationDispatcher};
use crate::domain::agent::{AgentId, AgentState, DeviceId};
use crate::domain::cache::{CacheFileInfo, CacheKey, ConditionalFileInfo, Parameters};
use crate::domain::control_plane_config::ControlPlaneConfigManifest;
use crate::domain::error::{CoordinationError, CoordinationResult};
use crate::domain::generator::ConfigurationGenerator;
use crate::domain::heartbeat::{Heartbeat, HeartbeatId};
use crate::domain::operation::{AckOutcome, NewOperation, Operation, OperationId};
use crate::domain::repository::{HeartbeatRepository, OperationRepository};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::repositories::{InMemoryHeartbeatRepository, InMemoryOperationRepository};

/// What an agent receives in reply to a heartbeat.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatResponse {
    pub heartbeat_id: HeartbeatId,
    pub agent_state: AgentState,
    pub first_heartbeat: bool,
    /// Operations now delivered to the agent, oldest first.
    pub operations: Vec<Operation>,
    /// Operations reset to `QUEUED` while handling this heartbeat.
    pub requeued: Vec<OperationId>,
}

pub struct FleetCoordinator {
    tracker: Arc<AgentStateTracker>,
    dispatcher: Arc<OperationDispatcher>,
    cache: ConfigurationCache,
    agent_locks: Arc<KeyedLocks<AgentId>>,
    event_bus: Arc<EventBus>,
}

impl FleetCoordinator {
    pub fn new(
        heartbeats: Arc<dyn HeartbeatRepository>,
        operations: Arc<dyn OperationRepository>,
        generator: Arc<dyn ConfigurationGenerator>,
        dispatcher_config: DispatcherConfig,
        cache_config: CacheConfig,
        event_bus: Arc<EventBus>,
    ) -> CoordinationResult<Self> {
        let agent_locks = Arc::new(KeyedLocks::new());
        let tracker = Arc::new(AgentStateTracker::new(
            heartbeats,
            agent_locks.clone(),
            event_bus.clone(),
        ));
        let dispatcher = Arc::new(OperationDispatcher::new(
            operations,
            agent_locks.clone(),
            dispatcher_config,
            event_bus.clone(),
        ));
        let cache = ConfigurationCache::new(generator, cache_config, event_bus.clone())?;

        Ok(Self {
            tracker,
            dispatcher,
            cache,
            agent_locks,
            event_bus,
        })
    }

    /// Coordinator over in-memory repositories, configured from a manifest.
    pub fn in_memory(
        config: &ControlPlaneConfigManifest,
        generator: Arc<dyn ConfigurationGenerator>,
    ) -> CoordinationResult<Self> {
        let event_bus = Arc::new(EventBus::new(config.spec.observability.event_bus_capacity));
        Self::new(
            Arc::new(InMemoryHeartbeatRepository::new()),
            Arc::new(InMemoryOperationRepository::new()),
            generator,
            DispatcherConfig::from(&config.spec.dispatcher),
            CacheConfig::from(&config.spec.cache),
            event_bus,
        )
    }

    pub async fn handle_heartbeat(
        &self,
        heartbeat: Heartbeat,
        max_batch: Option<usize>,
    ) -> CoordinationResult<HeartbeatResponse> {
        if heartbeat.agent_id.is_blank() {
            return Err(CoordinationError::invalid("heartbeat agent id must not be empty"));
        }

        let guard = self.agent_locks.lock(&heartbeat.agent_id).await;
        let outcome = self.tracker.record_heartbeat_locked(&guard, heartbeat).await?;
        let dispatched = async {
            let requeued = self
                .dispatcher
                .observe_heartbeat_locked(&guard, outcome.first_heartbeat)
                .await?;
            let operations = self
                .dispatcher
                .deliver_locked(&guard, max_batch.unwrap_or(0))
                .await?;
            Ok::<_, CoordinationError>((requeued, operations))
        }
        .await;
        let (requeued, operations) = match dispatched {
            Ok(dispatched) => dispatched,
            Err(e) => {
                // Keep the agent "first seen" so a retry still requeues its stale deliveries
                if outcome.first_heartbeat {
                    self.tracker.revert_first_heartbeat_locked(&guard);
                }
                return Err(e);
            }
        };
        drop(guard);

        if outcome.first_heartbeat && !requeued.is_empty() {
            info!(
                agent_id = %outcome.state.agent_id,
                requeued = requeued.len(),
                "Requeued operations left delivered before agent was first seen"
            );
        }
        debug!(
            agent_id = %outcome.state.agent_id,
            delivered = operations.len(),
            requeued = requeued.len(),
            "Heartbeat handled"
        );

        Ok(HeartbeatResponse {
            heartbeat_id: outcome.heartbeat.id,
            agent_state: outcome.state,
            first_heartbeat: outcome.first_heartbeat,
            operations,
            requeued: requeued.iter().map(|op| op.id).collect(),
        })
    }

    pub async fn enqueue(&self, request: NewOperation) -> CoordinationResult<Operation> {
        self.dispatcher.enqueue(request).await
    }

    pub async fn acknowledge(&self, operation_id: OperationId, outcome: AckOutcome) -> CoordinationResult<Operation> {
        self.dispatcher.acknowledge(operation_id, outcome).await
    }

    pub async fn operations_for_delivery(&self, agent_id: &AgentId, max_batch: usize) -> CoordinationResult<Vec<Operation>> {
        self.dispatcher.operations_for_delivery(agent_id, max_batch).await
    }

    pub async fn get_cache_file_info(&self, content_type: &str, parameters: &Parameters) -> CoordinationResult<CacheFileInfo> {
        self.cache.get_cache_file_info(content_type, parameters).await
    }

    pub async fn get_cache_file_if_modified(
        &self,
        content_type: &str,
        parameters: &Parameters,
        known_version: Option<&str>,
    ) -> CoordinationResult<ConditionalFileInfo> {
        self.cache
            .get_cache_file_if_modified(content_type, parameters, known_version)
            .await
    }

    pub fn invalidate_cache_entry(&self, key: &CacheKey) -> bool {
        self.cache.invalidate(key)
    }

    pub fn get_agent_state(&self, agent_id: &AgentId) -> Option<AgentState> {
        self.tracker.get_agent_state(agent_id)
    }

    pub fn list_agent_states(&self) -> Vec<AgentState> {
        self.tracker.list_agent_states()
    }

    pub async fn get_operation(&self, operation_id: OperationId) -> CoordinationResult<Operation> {
        self.dispatcher.get_operation(operation_id).await
    }

    pub async fn list_operations_by_agent(&self, agent_id: &AgentId) -> CoordinationResult<Vec<Operation>> {
        self.dispatcher.list_operations_by_agent(agent_id).await
    }

    pub async fn list_operations_by_device(&self, device_id: &DeviceId) -> CoordinationResult<Vec<Operation>> {
        self.dispatcher.list_operations_by_device(device_id).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Release lock slots of agents nobody is currently handling.
    pub fn prune_agent_locks(&self) -> usize {
        self.agent_locks.prune()
    }

    pub fn tracker(&self) -> &Arc<AgentStateTracker> {
        &self.tracker
    }

    pub fn dispatcher(&self) -> &Arc<OperationDispatcher> {
        &self.dispatcher
    }

    pub fn cache(&self) -> &ConfigurationCache {
        &self.cache
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}
