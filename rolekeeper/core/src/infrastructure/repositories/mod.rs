// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the `GrantRepository` abstraction
//! defined in the domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve grant records
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **SqliteGrantRepository** - `temp_roles` table in a SQLite file; survives restarts
//! - **InMemoryGrantRepository** - HashMap-backed storage for tests and dry runs

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::grant::{truncate_to_millis, GrantId, GrantKey, GrantRecord, ScopeId};
use crate::domain::repository::{GrantRepository, RepositoryError};

#[derive(Default)]
struct GrantTable {
    next_id: i64,
    rows: BTreeMap<GrantId, GrantRecord>,
}

/// Ids are assigned monotonically and never reused, matching the SQLite
/// `AUTOINCREMENT` column.
#[derive(Clone, Default)]
pub struct InMemoryGrantRepository {
    table: Arc<RwLock<GrantTable>>,
}

impl InMemoryGrantRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GrantRepository for InMemoryGrantRepository {
    async fn create(&self, key: &GrantKey, expires_at: DateTime<Utc>) -> Result<GrantId, RepositoryError> {
        let mut table = self.table.write();
        table.next_id += 1;
        let id = GrantId(table.next_id);
        table
            .rows
            .insert(id, GrantRecord::new(id, key.clone(), truncate_to_millis(expires_at)));
        Ok(id)
    }

    async fn find_by_id(&self, id: GrantId) -> Result<Option<GrantRecord>, RepositoryError> {
        Ok(self.table.read().rows.get(&id).cloned())
    }

    async fn find_by_key(&self, key: &GrantKey) -> Result<Vec<GrantRecord>, RepositoryError> {
        let table = self.table.read();
        Ok(table.rows.values().filter(|r| &r.key == key).cloned().collect())
    }

    async fn find_by_scope(&self, scope_id: &ScopeId) -> Result<Vec<GrantRecord>, RepositoryError> {
        let table = self.table.read();
        Ok(table
            .rows
            .values()
            .filter(|r| &r.key.scope_id == scope_id)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<GrantRecord>, RepositoryError> {
        Ok(self.table.read().rows.values().cloned().collect())
    }

    async fn delete(&self, key: &GrantKey) -> Result<u64, RepositoryError> {
        let mut table = self.table.write();
        let before = table.rows.len();
        table.rows.retain(|_, r| &r.key != key);
        Ok((before - table.rows.len()) as u64)
    }
}
