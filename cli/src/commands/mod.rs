// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the fleet control CLI

pub mod config;
pub mod serve;
pub mod simulate;

pub use self::config::ConfigCommand;
pub use self::serve::ServeArgs;
pub use self::simulate::SimulateArgs;
