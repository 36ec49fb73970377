// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `fleet-control-core` - Agent Coordination Engine
//!
//! The control-plane core that edge agents talk to: heartbeat ingestion,
//! operation queuing and delivery, and the configuration-artifact cache.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | identities, records, repository and generator contracts, errors, config |
//! | [`application`] | Application | `AgentStateTracker`, `OperationDispatcher`, `ConfigurationCache`, `FleetCoordinator` |
//! | [`infrastructure`] | Infrastructure | in-memory repositories, event bus, reference generator |
//!
//! Transport, authentication and durable storage live outside this crate and
//! reach it only through the traits in [`domain::repository`] and
//! [`domain::generator`].

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
