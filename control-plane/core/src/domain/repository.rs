// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Persistence Provider Interfaces
//!
//! Storage contracts for the two persisted records, following the
//! Repository pattern: one repository per record type, interface defined in
//! the domain layer, implementations in `crate::infrastructure::repositories`.
//!
//! | Trait | Record | Implementations |
//! |-------|--------|----------------|
//! | `HeartbeatRepository` | `Heartbeat` | `InMemoryHeartbeatRepository` |
//! | `OperationRepository` | `Operation` | `InMemoryOperationRepository` |
//!
//! Records carry their identifiers from construction; `save` returns the
//! record as stored. Implementations report every failure as a typed
//! [`RepositoryError`] and never retry on the caller's behalf.
//!
//! Cache entries are deliberately absent: they are not required to survive a
//! restart and live inside `ConfigurationCache`.

use async_trait::async_trait;

use crate::domain::agent::{AgentId, DeviceId};
use crate::domain::heartbeat::{Heartbeat, HeartbeatId};
use crate::domain::operation::{Operation, OperationId};

/// Repository interface for heartbeats (append-only).
#[async_trait]
pub trait HeartbeatRepository: Send + Sync {
    /// Persist a heartbeat
    async fn save(&self, heartbeat: &Heartbeat) -> Result<Heartbeat, RepositoryError>;

    /// List all retained heartbeats, oldest first
    async fn list(&self) -> Result<Vec<Heartbeat>, RepositoryError>;

    /// List heartbeats reported by an agent, oldest first
    async fn list_by_agent(&self, agent_id: &AgentId) -> Result<Vec<Heartbeat>, RepositoryError>;

    /// List heartbeats that named a device, oldest first
    async fn list_by_device(&self, device_id: &DeviceId) -> Result<Vec<Heartbeat>, RepositoryError>;

    async fn get_by_id(&self, id: HeartbeatId) -> Result<Option<Heartbeat>, RepositoryError>;

    async fn delete_by_id(&self, id: HeartbeatId) -> Result<(), RepositoryError>;

    async fn delete_all(&self) -> Result<(), RepositoryError>;
}

/// Repository interface for operations (create or update by id).
#[async_trait]
pub trait OperationRepository: Send + Sync {
    /// Save operation (create or update)
    async fn save(&self, operation: &Operation) -> Result<Operation, RepositoryError>;

    /// List all operations in delivery order
    async fn list(&self) -> Result<Vec<Operation>, RepositoryError>;

    /// List an agent's operations in delivery order
    async fn list_by_agent(&self, agent_id: &AgentId) -> Result<Vec<Operation>, RepositoryError>;

    /// List operations targeting a device, in delivery order
    async fn list_by_device(&self, device_id: &DeviceId) -> Result<Vec<Operation>, RepositoryError>;

    async fn get_by_id(&self, id: OperationId) -> Result<Option<Operation>, RepositoryError>;

    async fn delete_by_id(&self, id: OperationId) -> Result<(), RepositoryError>;

    async fn delete_all(&self) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage inconsistent: {0}")]
    Inconsistent(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
