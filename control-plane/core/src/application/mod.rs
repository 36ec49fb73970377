// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Application Layer
//!
//! Services that coordinate domain types and infrastructure adapters.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`keyed_lock`] | `KeyedLocks` per-key async mutex map |
//! | [`agent_state_tracker`] | Heartbeat ingestion and the agent view |
//! | [`operation_dispatcher`] | Operation queue, delivery, acks, redelivery |
//! | [`config_cache`] | Single-flight configuration artifact cache |
//! | [`coordinator`] | `FleetCoordinator` facade |
//! | [`redelivery_sweeper`] | Periodic timeout and retention sweep |
//! | [`event_logger`] | Event bus audit logging |

pub mod agent_state_tracker;
pub mod config_cache;
pub mod coordinator;
pub mod event_logger;
pub mod keyed_lock;
pub mod operation_dispatcher;
pub mod redelivery_sweeper;

pub use agent_state_tracker::{AgentStateTracker, HeartbeatOutcome};
pub use config_cache::{CacheConfig, CacheStats, ConfigurationCache};
pub use coordinator::{FleetCoordinator, HeartbeatResponse};
pub use event_logger::EventLogger;
pub use keyed_lock::{KeyedGuard, KeyedLocks};
pub use operation_dispatcher::{DispatcherConfig, OperationDispatcher};
pub use redelivery_sweeper::{RedeliverySweeper, RedeliverySweeperConfig, SweepReport};
