// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for heartbeat ingestion through the coordinator.

use async_trait::async_trait;
use fleet_control_core::application::{AgentStateTracker, CacheConfig, DispatcherConfig, FleetCoordinator, KeyedLocks};
use fleet_control_core::domain::agent::{AgentId, DeviceId};
use fleet_control_core::domain::error::ErrorKind;
use fleet_control_core::domain::events::AgentEvent;
use fleet_control_core::domain::heartbeat::{Heartbeat, HeartbeatId};
use fleet_control_core::domain::operation::{NewOperation, Operation, OperationId, OperationState};
use fleet_control_core::domain::repository::{HeartbeatRepository, OperationRepository, RepositoryError};
use fleet_control_core::infrastructure::event_bus::{DomainEvent, EventBus};
use fleet_control_core::infrastructure::generator::DigestManifestGenerator;
use fleet_control_core::infrastructure::repositories::{InMemoryHeartbeatRepository, InMemoryOperationRepository};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Heartbeat store that is always down.
struct UnavailableHeartbeatRepository;

#[async_trait]
impl HeartbeatRepository for UnavailableHeartbeatRepository {
    async fn save(&self, _heartbeat: &Heartbeat) -> Result<Heartbeat, RepositoryError> {
        Err(RepositoryError::Unavailable("connection refused".to_string()))
    }

    async fn list(&self) -> Result<Vec<Heartbeat>, RepositoryError> {
        Err(RepositoryError::Unavailable("connection refused".to_string()))
    }

    async fn list_by_agent(&self, _agent_id: &AgentId) -> Result<Vec<Heartbeat>, RepositoryError> {
        Err(RepositoryError::Unavailable("connection refused".to_string()))
    }

    async fn list_by_device(&self, _device_id: &DeviceId) -> Result<Vec<Heartbeat>, RepositoryError> {
        Err(RepositoryError::Unavailable("connection refused".to_string()))
    }

    async fn get_by_id(&self, _id: HeartbeatId) -> Result<Option<Heartbeat>, RepositoryError> {
        Err(RepositoryError::Unavailable("connection refused".to_string()))
    }

    async fn delete_by_id(&self, _id: HeartbeatId) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("connection refused".to_string()))
    }

    async fn delete_all(&self) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_persistence_failure_leaves_view_and_queue_untouched() {
    let coordinator = FleetCoordinator::new(
        Arc::new(UnavailableHeartbeatRepository),
        Arc::new(InMemoryOperationRepository::new()),
        Arc::new(DigestManifestGenerator::new()),
        DispatcherConfig::default(),
        CacheConfig::default(),
        Arc::new(EventBus::new(16)),
    )
    .unwrap();
    let op = coordinator.enqueue(NewOperation::new("a", "sync")).await.unwrap();

    let err = coordinator
        .handle_heartbeat(Heartbeat::new("a", None::<&str>, json!({})), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert!(coordinator.get_agent_state(&AgentId::new("a")).is_none());

    // Nothing was delivered on the failed heartbeat
    let stored = coordinator.get_operation(op.id).await.unwrap();
    assert_eq!(stored.delivery_attempts, 0);
}

/// Operation store whose next per-agent listing can be made to fail.
#[derive(Default)]
struct StutteringOperationRepository {
    inner: InMemoryOperationRepository,
    fail_next_listing: AtomicBool,
}

#[async_trait]
impl OperationRepository for StutteringOperationRepository {
    async fn save(&self, operation: &Operation) -> Result<Operation, RepositoryError> {
        self.inner.save(operation).await
    }

    async fn list(&self) -> Result<Vec<Operation>, RepositoryError> {
        self.inner.list().await
    }

    async fn list_by_agent(&self, agent_id: &AgentId) -> Result<Vec<Operation>, RepositoryError> {
        if self.fail_next_listing.swap(false, Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("read timed out".to_string()));
        }
        self.inner.list_by_agent(agent_id).await
    }

    async fn list_by_device(&self, device_id: &DeviceId) -> Result<Vec<Operation>, RepositoryError> {
        self.inner.list_by_device(device_id).await
    }

    async fn get_by_id(&self, id: OperationId) -> Result<Option<Operation>, RepositoryError> {
        self.inner.get_by_id(id).await
    }

    async fn delete_by_id(&self, id: OperationId) -> Result<(), RepositoryError> {
        self.inner.delete_by_id(id).await
    }

    async fn delete_all(&self) -> Result<(), RepositoryError> {
        self.inner.delete_all().await
    }
}

#[tokio::test]
async fn test_failed_first_heartbeat_is_first_again_on_retry() {
    let operations = Arc::new(StutteringOperationRepository::default());
    let coordinator = FleetCoordinator::new(
        Arc::new(InMemoryHeartbeatRepository::new()),
        operations.clone(),
        Arc::new(DigestManifestGenerator::new()),
        DispatcherConfig::default(),
        CacheConfig::default(),
        Arc::new(EventBus::new(16)),
    )
    .unwrap();
    let agent = AgentId::new("a");
    let op = coordinator.enqueue(NewOperation::new("a", "sync")).await.unwrap();

    let first = coordinator
        .handle_heartbeat(Heartbeat::new("a", None::<&str>, json!({})), None)
        .await
        .unwrap();
    assert_eq!(first.operations.len(), 1);

    // Agent comes back after the control plane lost track of it
    coordinator.tracker().forget_agent(&agent).await.unwrap();
    operations.fail_next_listing.store(true, Ordering::SeqCst);

    let err = coordinator
        .handle_heartbeat(Heartbeat::new("a", None::<&str>, json!({})), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert!(coordinator.get_agent_state(&agent).is_none());
    assert_eq!(
        coordinator.get_operation(op.id).await.unwrap().state,
        OperationState::Delivered
    );

    let retried = coordinator
        .handle_heartbeat(Heartbeat::new("a", None::<&str>, json!({})), None)
        .await
        .unwrap();
    assert!(retried.first_heartbeat);
    assert_eq!(retried.requeued, vec![op.id]);
    assert_eq!(retried.operations.len(), 1);
    assert_eq!(retried.operations[0].delivery_attempts, 2);
}

#[tokio::test]
async fn test_view_tracks_devices_and_latest_status() {
    let coordinator = FleetCoordinator::in_memory(
        &Default::default(),
        Arc::new(DigestManifestGenerator::new()),
    )
    .unwrap();
    let mut events = coordinator.event_bus().subscribe_agent(AgentId::new("edge-7"));

    for (device, phase) in [(Some("cam-1"), "boot"), (Some("cam-2"), "sync"), (None, "idle")] {
        coordinator
            .handle_heartbeat(Heartbeat::new("edge-7", device, json!({ "phase": phase })), None)
            .await
            .unwrap();
    }
    coordinator
        .handle_heartbeat(Heartbeat::new("edge-8", None::<&str>, json!({})), None)
        .await
        .unwrap();

    let state = coordinator.get_agent_state(&AgentId::new("edge-7")).unwrap();
    assert_eq!(state.heartbeat_count, 3);
    assert_eq!(state.last_status, json!({"phase": "idle"}));
    assert_eq!(
        state.last_known_device_ids.iter().map(DeviceId::as_str).collect::<Vec<_>>(),
        vec!["cam-1", "cam-2"]
    );
    assert_eq!(coordinator.list_agent_states().len(), 2);

    match events.recv().await.unwrap() {
        DomainEvent::Agent(AgentEvent::HeartbeatRecorded { first_heartbeat, device_id, .. }) => {
            assert!(first_heartbeat);
            assert_eq!(device_id, Some(DeviceId::new("cam-1")));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_rebuild_replays_persisted_heartbeats() {
    let repository = Arc::new(InMemoryHeartbeatRepository::new());
    let bus = Arc::new(EventBus::new(16));
    let tracker = AgentStateTracker::new(repository.clone(), Arc::new(KeyedLocks::new()), bus.clone());
    for agent in ["a", "b", "a"] {
        tracker
            .record_heartbeat(Heartbeat::new(agent, None::<&str>, json!({})))
            .await
            .unwrap();
    }

    let restarted = AgentStateTracker::new(repository, Arc::new(KeyedLocks::new()), bus);
    assert!(restarted.list_agent_states().is_empty());
    assert_eq!(restarted.rebuild().await.unwrap(), 2);
    assert_eq!(
        restarted.get_agent_state(&AgentId::new("a")).unwrap().heartbeat_count,
        2
    );
}
