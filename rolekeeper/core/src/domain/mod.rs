// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Grant aggregate, value objects and the ports the application layer
//! depends on.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and contracts with no I/O of their own

pub mod clock;
pub mod config;
pub mod duration;
pub mod events;
pub mod gateway;
pub mod grant;
pub mod repository;
