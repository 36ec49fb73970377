// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! In-memory implementations of the persistence-provider traits defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Store heartbeats and operations for development, tests and
//!   single-node deployments
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! Each repository is an arena keyed by record id plus secondary indexes on
//! agent and device ids, all behind one `RwLock` so a record and its index
//! entries change together. Instances are explicitly constructed and cheap to
//! clone; clones share storage.
//!
//! Durable backends implement the same traits and drop in without touching
//! the application layer.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::domain::agent::{AgentId, DeviceId};
use crate::domain::heartbeat::{Heartbeat, HeartbeatId};
use crate::domain::operation::{Operation, OperationId};
use crate::domain::repository::{HeartbeatRepository, OperationRepository, RepositoryError};

/// Arena of records with agent and device indexes.
struct Arena<Id, R> {
    records: HashMap<Id, R>,
    by_agent: HashMap<AgentId, Vec<Id>>,
    by_device: HashMap<DeviceId, Vec<Id>>,
}

impl<Id: Copy + Eq + Hash, R: Clone> Arena<Id, R> {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            by_agent: HashMap::new(),
            by_device: HashMap::new(),
        }
    }

    fn upsert(&mut self, id: Id, agent_id: &AgentId, device_id: Option<&DeviceId>, record: R) {
        if self.records.insert(id, record).is_none() {
            self.by_agent.entry(agent_id.clone()).or_default().push(id);
            if let Some(device_id) = device_id {
                self.by_device.entry(device_id.clone()).or_default().push(id);
            }
        }
    }

    fn remove(&mut self, id: Id, agent_id: &AgentId, device_id: Option<&DeviceId>) {
        if self.records.remove(&id).is_none() {
            return;
        }
        unindex(&mut self.by_agent, agent_id, id);
        if let Some(device_id) = device_id {
            unindex(&mut self.by_device, device_id, id);
        }
    }

    fn collect(&self, ids: Option<&Vec<Id>>) -> Vec<R> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.records.get(id).cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    fn clear(&mut self) {
        self.records.clear();
        self.by_agent.clear();
        self.by_device.clear();
    }
}

fn unindex<K: Eq + Hash, Id: PartialEq>(index: &mut HashMap<K, Vec<Id>>, key: &K, id: Id) {
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|existing| *existing != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

fn by_timestamp(mut heartbeats: Vec<Heartbeat>) -> Vec<Heartbeat> {
    heartbeats.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    heartbeats
}

fn in_delivery_order(mut operations: Vec<Operation>) -> Vec<Operation> {
    operations.sort_by(Operation::delivery_order);
    operations
}

#[derive(Clone)]
pub struct InMemoryHeartbeatRepository {
    arena: Arc<RwLock<Arena<HeartbeatId, Heartbeat>>>,
    retention_per_agent: Option<usize>,
}

impl InMemoryHeartbeatRepository {
    pub fn new() -> Self {
        Self {
            arena: Arc::new(RwLock::new(Arena::new())),
            retention_per_agent: None,
        }
    }

    /// Keep at most `limit` heartbeats per agent, dropping the oldest.
    pub fn with_retention(limit: usize) -> Self {
        Self {
            retention_per_agent: Some(limit.max(1)),
            ..Self::new()
        }
    }

    fn enforce_retention(arena: &mut Arena<HeartbeatId, Heartbeat>, agent_id: &AgentId, limit: usize) {
        let mut retained = arena.collect(arena.by_agent.get(agent_id));
        if retained.len() <= limit {
            return;
        }
        retained.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let excess = retained.len() - limit;
        for heartbeat in retained.into_iter().take(excess) {
            arena.remove(heartbeat.id, &heartbeat.agent_id, heartbeat.device_id.as_ref());
        }
    }
}

impl Default for InMemoryHeartbeatRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HeartbeatRepository for InMemoryHeartbeatRepository {
    async fn save(&self, heartbeat: &Heartbeat) -> Result<Heartbeat, RepositoryError> {
        let mut arena = self.arena.write();
        if arena.records.contains_key(&heartbeat.id) {
            return Err(RepositoryError::Inconsistent(format!(
                "heartbeat {} already recorded",
                heartbeat.id
            )));
        }
        arena.upsert(
            heartbeat.id,
            &heartbeat.agent_id,
            heartbeat.device_id.as_ref(),
            heartbeat.clone(),
        );
        if let Some(limit) = self.retention_per_agent {
            Self::enforce_retention(&mut arena, &heartbeat.agent_id, limit);
        }
        Ok(heartbeat.clone())
    }

    async fn list(&self) -> Result<Vec<Heartbeat>, RepositoryError> {
        let arena = self.arena.read();
        Ok(by_timestamp(arena.records.values().cloned().collect()))
    }

    async fn list_by_agent(&self, agent_id: &AgentId) -> Result<Vec<Heartbeat>, RepositoryError> {
        let arena = self.arena.read();
        Ok(by_timestamp(arena.collect(arena.by_agent.get(agent_id))))
    }

    async fn list_by_device(&self, device_id: &DeviceId) -> Result<Vec<Heartbeat>, RepositoryError> {
        let arena = self.arena.read();
        Ok(by_timestamp(arena.collect(arena.by_device.get(device_id))))
    }

    async fn get_by_id(&self, id: HeartbeatId) -> Result<Option<Heartbeat>, RepositoryError> {
        let arena = self.arena.read();
        Ok(arena.records.get(&id).cloned())
    }

    async fn delete_by_id(&self, id: HeartbeatId) -> Result<(), RepositoryError> {
        let mut arena = self.arena.write();
        if let Some(heartbeat) = arena.records.get(&id).cloned() {
            arena.remove(id, &heartbeat.agent_id, heartbeat.device_id.as_ref());
        }
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), RepositoryError> {
        self.arena.write().clear();
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryOperationRepository {
    arena: Arc<RwLock<Arena<OperationId, Operation>>>,
}

impl InMemoryOperationRepository {
    pub fn new() -> Self {
        Self {
            arena: Arc::new(RwLock::new(Arena::new())),
        }
    }
}

impl Default for InMemoryOperationRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationRepository for InMemoryOperationRepository {
    async fn save(&self, operation: &Operation) -> Result<Operation, RepositoryError> {
        let mut arena = self.arena.write();
        if let Some(existing) = arena.records.get(&operation.id) {
            // Index keys are fixed at creation
            if existing.agent_id != operation.agent_id
                || existing.target_device_id != operation.target_device_id
            {
                return Err(RepositoryError::Inconsistent(format!(
                    "operation {} cannot change its agent or target device",
                    operation.id
                )));
            }
        }
        arena.upsert(
            operation.id,
            &operation.agent_id,
            operation.target_device_id.as_ref(),
            operation.clone(),
        );
        Ok(operation.clone())
    }

    async fn list(&self) -> Result<Vec<Operation>, RepositoryError> {
        let arena = self.arena.read();
        Ok(in_delivery_order(arena.records.values().cloned().collect()))
    }

    async fn list_by_agent(&self, agent_id: &AgentId) -> Result<Vec<Operation>, RepositoryError> {
        let arena = self.arena.read();
        Ok(in_delivery_order(arena.collect(arena.by_agent.get(agent_id))))
    }

    async fn list_by_device(&self, device_id: &DeviceId) -> Result<Vec<Operation>, RepositoryError> {
        let arena = self.arena.read();
        Ok(in_delivery_order(arena.collect(arena.by_device.get(device_id))))
    }

    async fn get_by_id(&self, id: OperationId) -> Result<Option<Operation>, RepositoryError> {
        let arena = self.arena.read();
        Ok(arena.records.get(&id).cloned())
    }

    async fn delete_by_id(&self, id: OperationId) -> Result<(), RepositoryError> {
        let mut arena = self.arena.write();
        if let Some(operation) = arena.records.get(&id).cloned() {
            arena.remove(id, &operation.agent_id, operation.target_device_id.as_ref());
        }
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), RepositoryError> {
        self.arena.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::operation::{NewOperation, OperationState};
    use chrono::{Duration, Utc};
    use serde_json::json;

    #[tokio::test]
    async fn test_heartbeat_indexes() {
        let repo = InMemoryHeartbeatRepository::new();
        let now = Utc::now();
        let a1 = Heartbeat::new("a", Some("d1"), json!({})).with_timestamp(now);
        let a2 = Heartbeat::new("a", None::<&str>, json!({})).with_timestamp(now - Duration::seconds(5));
        let b1 = Heartbeat::new("b", Some("d1"), json!({})).with_timestamp(now);

        for hb in [&a1, &a2, &b1] {
            repo.save(hb).await.unwrap();
        }

        let by_agent = repo.list_by_agent(&AgentId::new("a")).await.unwrap();
        assert_eq!(by_agent.iter().map(|h| h.id).collect::<Vec<_>>(), vec![a2.id, a1.id]);
        assert_eq!(repo.list_by_device(&DeviceId::new("d1")).await.unwrap().len(), 2);
        assert_eq!(repo.list().await.unwrap().len(), 3);

        repo.delete_by_id(a1.id).await.unwrap();
        assert_eq!(repo.list_by_device(&DeviceId::new("d1")).await.unwrap().len(), 1);
        assert!(repo.get_by_id(a1.id).await.unwrap().is_none());

        repo.delete_all().await.unwrap();
        assert!(repo.list().await.unwrap().is_empty());
        assert!(repo.list_by_agent(&AgentId::new("a")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeats_are_immutable() {
        let repo = InMemoryHeartbeatRepository::new();
        let hb = Heartbeat::new("a", None::<&str>, json!({"v": 1}));
        repo.save(&hb).await.unwrap();

        let err = repo.save(&hb).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Inconsistent(_)));
    }

    #[tokio::test]
    async fn test_heartbeat_retention() {
        let repo = InMemoryHeartbeatRepository::with_retention(2);
        let now = Utc::now();
        for offset in 0..4 {
            let hb = Heartbeat::new("a", None::<&str>, json!({ "n": offset }))
                .with_timestamp(now + Duration::seconds(offset));
            repo.save(&hb).await.unwrap();
        }

        let kept = repo.list_by_agent(&AgentId::new("a")).await.unwrap();
        let ns: Vec<_> = kept.iter().map(|h| h.status["n"].clone()).collect();
        assert_eq!(ns, vec![json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_operation_upsert_keeps_indexes() {
        let repo = InMemoryOperationRepository::new();
        let mut op = Operation::queued(NewOperation::new("a", "restart").for_device("d1"), 0, Utc::now());
        repo.save(&op).await.unwrap();

        op.mark_delivered(Utc::now()).unwrap();
        repo.save(&op).await.unwrap();

        let listed = repo.list_by_agent(&AgentId::new("a")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].state, OperationState::Delivered);
        assert_eq!(repo.list_by_device(&DeviceId::new("d1")).await.unwrap().len(), 1);

        let mut moved = op.clone();
        moved.agent_id = AgentId::new("b");
        assert!(matches!(
            repo.save(&moved).await,
            Err(RepositoryError::Inconsistent(_))
        ));
    }
}
