// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod expiry_scheduler;
pub mod grant_lifecycle;
pub mod repository_factory;

// Re-export use cases for convenience
pub use expiry_scheduler::{CancelOutcome, ExpiryHandler, ExpiryScheduler, TimerState};
pub use grant_lifecycle::{
    ExpiryOutcome, ExpiryReport, GrantLifecycleService, GrantReceipt, GrantRequest, RevokeOutcome,
    StandardGrantLifecycleService,
};
