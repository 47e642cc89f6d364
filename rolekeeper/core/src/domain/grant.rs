// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Temporary Grant Aggregate
//!
//! A grant attaches a capability (a platform role) to a subject (a member)
//! inside a scope (a community) until an absolute expiry instant.
//!
//! Grants are immutable once persisted. Extending a grant means issuing a new
//! one; ending a grant means deleting its record, either when the expiry
//! timer fires or when an operator revokes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::duration::DurationError;
use crate::domain::gateway::GatewayError;
use crate::domain::repository::RepositoryError;

// ============================================================================
// Value Objects
// ============================================================================

macro_rules! platform_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

platform_id!(
    /// Community (tenant) a grant belongs to. Discord guild snowflake.
    ScopeId
);
platform_id!(
    /// Member receiving the capability.
    SubjectId
);
platform_id!(
    /// Role being granted.
    CapabilityId
);
platform_id!(
    /// Member or operator who issued a command.
    ActorId
);
platform_id!(
    /// Channel receiving audit log entries.
    ChannelId
);

/// Store-assigned grant identifier (monotonic, unique).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantId(pub i64);

impl std::fmt::Display for GrantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The (scope, subject, capability) triple identifying a logical grant.
///
/// Storage does not enforce uniqueness on the triple; deletion is keyed on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantKey {
    pub scope_id: ScopeId,
    pub subject_id: SubjectId,
    pub capability_id: CapabilityId,
}

impl GrantKey {
    pub fn new(
        scope_id: impl Into<ScopeId>,
        subject_id: impl Into<SubjectId>,
        capability_id: impl Into<CapabilityId>,
    ) -> Self {
        Self {
            scope_id: scope_id.into(),
            subject_id: subject_id.into(),
            capability_id: capability_id.into(),
        }
    }
}

impl std::fmt::Display for GrantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.scope_id, self.subject_id, self.capability_id)
    }
}

// ============================================================================
// Aggregate
// ============================================================================

/// A persisted temporary grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub id: GrantId,
    #[serde(flatten)]
    pub key: GrantKey,
    /// Absolute expiry instant, millisecond precision.
    pub expires_at: DateTime<Utc>,
}

impl GrantRecord {
    pub fn new(id: GrantId, key: GrantKey, expires_at: DateTime<Utc>) -> Self {
        Self {
            id,
            key,
            expires_at: truncate_to_millis(expires_at),
        }
    }

    /// Rebuild a record from its persisted epoch-millisecond form.
    pub fn from_remove_at(id: GrantId, key: GrantKey, remove_at: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(remove_at).map(|expires_at| Self { id, key, expires_at })
    }

    /// Expiry as epoch milliseconds (the `removeAt` column).
    pub fn remove_at(&self) -> i64 {
        self.expires_at.timestamp_millis()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left until expiry, clamped at zero for overdue grants.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Drop sub-millisecond precision so in-memory and persisted forms agree.
pub fn truncate_to_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(instant.timestamp_millis()).unwrap_or(instant)
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    #[error("Invalid duration: {0}")]
    InvalidDuration(#[from] DurationError),

    #[error("{0} already holds this role")]
    AlreadyGranted(GrantKey),

    #[error("Could not apply role: {0}")]
    ApplyFailed(#[source] GatewayError),

    #[error("Could not persist grant: {0}")]
    Persistence(#[from] RepositoryError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Grant {0} not found")]
    NotFound(GrantId),
}
