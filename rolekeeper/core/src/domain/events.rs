// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::grant::{ActorId, GrantId, GrantKey};

/// Grant lifecycle events published on the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GrantEvent {
    Granted {
        grant_id: GrantId,
        key: GrantKey,
        actor_id: ActorId,
        expires_at: DateTime<Utc>,
        granted_at: DateTime<Utc>,
    },
    /// Capability applied but the record could not be persisted; nothing will
    /// remove it automatically.
    Unscheduled {
        key: GrantKey,
        error: String,
        failed_at: DateTime<Utc>,
    },
    Expired {
        key: GrantKey,
        capability_removed: bool,
        records_deleted: u64,
        expired_at: DateTime<Utc>,
    },
    Revoked {
        grant_id: GrantId,
        key: GrantKey,
        actor_id: ActorId,
        revoked_at: DateTime<Utc>,
    },
    RemovalFailed {
        key: GrantKey,
        error: String,
        failed_at: DateTime<Utc>,
    },
}

impl GrantEvent {
    pub fn key(&self) -> &GrantKey {
        match self {
            GrantEvent::Granted { key, .. }
            | GrantEvent::Unscheduled { key, .. }
            | GrantEvent::Expired { key, .. }
            | GrantEvent::Revoked { key, .. }
            | GrantEvent::RemovalFailed { key, .. } => key,
        }
    }
}
