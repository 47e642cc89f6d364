// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Platform gateway adapters.
//!
//! - **DiscordGateway** - Discord REST API (production)
//! - **RecordingGateway** - in-memory membership and notice log (dry runs, tests)

pub mod discord;
pub mod recording;

pub use discord::DiscordGateway;
pub use recording::{Delivery, RecordingGateway};
