// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the rolekeeper CLI

pub mod config;
pub mod grant;

pub use self::config::ConfigCommand;
pub use self::grant::GrantCommand;
