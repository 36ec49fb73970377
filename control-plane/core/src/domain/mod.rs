// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Layer
//!
//! Pure types for the coordination engine. No I/O.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`agent`] | `AgentId`, `DeviceId`, `AgentState` |
//! | [`heartbeat`] | `Heartbeat`, `HeartbeatId` |
//! | [`operation`] | `Operation`, `OperationState`, `AckOutcome` |
//! | [`cache`] | `CacheKey`, `CacheEntry`, `ContentTypeRegistry` |
//! | [`generator`] | `ConfigurationGenerator` |
//! | [`repository`] | `HeartbeatRepository`, `OperationRepository` |
//! | [`events`] | `AgentEvent`, `OperationEvent`, `CacheEvent` |
//! | [`error`] | `CoordinationError`, `ErrorKind` |
//! | [`control_plane_config`] | `ControlPlaneConfigManifest` |

pub mod agent;
pub mod heartbeat;
pub mod operation;
pub mod cache;
pub mod generator;
pub mod repository;
pub mod events;
pub mod error;
pub mod control_plane_config;
