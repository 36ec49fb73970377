// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Infrastructure Layer
//!
//! Adapters behind the domain traits.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`repositories`] | `InMemoryHeartbeatRepository`, `InMemoryOperationRepository` |
//! | [`event_bus`] | `EventBus`, `DomainEvent` broadcast channel |
//! | [`generator`] | `DigestManifestGenerator` |

pub mod event_bus;
pub mod generator;
pub mod repositories;
