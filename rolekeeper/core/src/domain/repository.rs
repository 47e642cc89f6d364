// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Domain Repository Interfaces
//!
//! Persistence contract for the grant aggregate. The repository is the single
//! source of truth for which grants are live; the expiry scheduler only keeps
//! a projection of it and is rebuilt from [`GrantRepository::list_all`] on
//! every start.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `GrantRepository` | `GrantRecord` | `InMemoryGrantRepository`, `SqliteGrantRepository` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::grant::{GrantId, GrantKey, GrantRecord, ScopeId};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    Sqlite(SqliteConfig),
}

#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

#[async_trait]
pub trait GrantRepository: Send + Sync {
    /// Append a new record and return its assigned id.
    async fn create(&self, key: &GrantKey, expires_at: DateTime<Utc>) -> Result<GrantId, RepositoryError>;

    async fn find_by_id(&self, id: GrantId) -> Result<Option<GrantRecord>, RepositoryError>;

    /// Records matching the triple, oldest first.
    async fn find_by_key(&self, key: &GrantKey) -> Result<Vec<GrantRecord>, RepositoryError>;

    async fn find_by_scope(&self, scope_id: &ScopeId) -> Result<Vec<GrantRecord>, RepositoryError>;

    /// Every persisted record, in no particular order.
    async fn list_all(&self) -> Result<Vec<GrantRecord>, RepositoryError>;

    /// Remove all records matching the triple. Returns how many were removed;
    /// zero is not an error.
    async fn delete(&self, key: &GrantKey) -> Result<u64, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                RepositoryError::Unavailable(err.to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}
