// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Connection Pool
//!
//! Wraps `sqlx::sqlite::SqlitePool` in a thin `Database` newtype that is
//! injected into `SqliteGrantRepository`.
//!
//! The `temp_roles` table layout is shared with earlier deployments of the
//! bot, so an existing `data.sqlite` is picked up as-is: column names and the
//! millisecond `removeAt` encoding must not change.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use crate::domain::repository::RepositoryError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS temp_roles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    guildId TEXT NOT NULL,
    userId TEXT NOT NULL,
    roleId TEXT NOT NULL,
    removeAt INTEGER NOT NULL
)
"#;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let in_memory = connection_string.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(connection_string)?.create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `sqlite::memory:` is its own database, so the
        // pool must hold exactly one connection and never recycle it.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;
        let database = Self { pool };
        database.migrate().await?;

        info!(url = connection_string, "Grant store connected and table is ready");
        Ok(database)
    }

    /// Create the `temp_roles` table if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::new("sqlite::memory:", 5).await.unwrap();
        db.migrate().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM temp_roles")
            .fetch_one(db.get_pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_creates_missing_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.sqlite");
        let url = format!("sqlite://{}", path.display());

        Database::new(&url, 2).await.unwrap();
        assert!(path.exists());
    }
}
