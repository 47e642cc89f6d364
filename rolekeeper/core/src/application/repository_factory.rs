// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates the concrete grant repository for the configured storage backend,
//! keeping the domain layer free of infrastructure dependencies.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Select and construct the `GrantRepository` implementation

use std::sync::Arc;

use crate::domain::repository::{GrantRepository, RepositoryError, StorageBackend};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::sqlite::SqliteGrantRepository;
use crate::infrastructure::repositories::InMemoryGrantRepository;

/// Creates a GrantRepository implementation based on the configured backend.
///
/// The SQLite backend opens (and if needed creates) the database file and
/// ensures the `temp_roles` table exists before returning.
pub async fn create_grant_repository(
    backend: &StorageBackend,
) -> Result<Arc<dyn GrantRepository>, RepositoryError> {
    match backend {
        StorageBackend::InMemory => Ok(Arc::new(InMemoryGrantRepository::new())),
        StorageBackend::Sqlite(config) => {
            let database = Database::new(&config.connection_string, config.max_connections).await?;
            Ok(Arc::new(SqliteGrantRepository::new(database.get_pool().clone())))
        }
    }
}
