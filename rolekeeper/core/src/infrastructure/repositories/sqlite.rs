// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Grant Repository
//!
//! Production `GrantRepository` implementation backed by the `temp_roles`
//! table via `sqlx`. Expiry instants are stored as epoch milliseconds in
//! `removeAt`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::error;

use crate::domain::grant::{GrantId, GrantKey, GrantRecord, ScopeId};
use crate::domain::repository::{GrantRepository, RepositoryError};

pub struct SqliteGrantRepository {
    pool: SqlitePool,
}

impl SqliteGrantRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &SqliteRow) -> Result<GrantRecord, RepositoryError> {
        let id: i64 = row.try_get("id")?;
        let guild_id: String = row.try_get("guildId")?;
        let user_id: String = row.try_get("userId")?;
        let role_id: String = row.try_get("roleId")?;
        let remove_at: i64 = row.try_get("removeAt")?;

        GrantRecord::from_remove_at(GrantId(id), GrantKey::new(guild_id, user_id, role_id), remove_at)
            .ok_or_else(|| {
                RepositoryError::Serialization(format!(
                    "Grant {} has out-of-range removeAt {}",
                    id, remove_at
                ))
            })
    }

    fn rows_to_records(rows: Vec<SqliteRow>) -> Vec<GrantRecord> {
        rows.iter()
            .filter_map(|row| match Self::row_to_record(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    let row_id = row.try_get::<i64, _>("id").ok();
                    error!(
                        row_id = ?row_id,
                        error = %e,
                        "Unreadable grant row will never be scheduled; fix or delete it in temp_roles"
                    );
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl GrantRepository for SqliteGrantRepository {
    async fn create(&self, key: &GrantKey, expires_at: DateTime<Utc>) -> Result<GrantId, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO temp_roles (guildId, userId, roleId, removeAt)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(key.scope_id.as_str())
        .bind(key.subject_id.as_str())
        .bind(key.capability_id.as_str())
        .bind(expires_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save grant: {}", e)))?;

        Ok(GrantId(result.last_insert_rowid()))
    }

    async fn find_by_id(&self, id: GrantId) -> Result<Option<GrantRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, guildId, userId, roleId, removeAt FROM temp_roles WHERE id = ?1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn find_by_key(&self, key: &GrantKey) -> Result<Vec<GrantRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, guildId, userId, roleId, removeAt
            FROM temp_roles
            WHERE guildId = ?1 AND userId = ?2 AND roleId = ?3
            ORDER BY id ASC
            "#,
        )
        .bind(key.scope_id.as_str())
        .bind(key.subject_id.as_str())
        .bind(key.capability_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::rows_to_records(rows))
    }

    async fn find_by_scope(&self, scope_id: &ScopeId) -> Result<Vec<GrantRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, guildId, userId, roleId, removeAt
            FROM temp_roles
            WHERE guildId = ?1
            ORDER BY removeAt ASC
            "#,
        )
        .bind(scope_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::rows_to_records(rows))
    }

    async fn list_all(&self) -> Result<Vec<GrantRecord>, RepositoryError> {
        let rows = sqlx::query("SELECT id, guildId, userId, roleId, removeAt FROM temp_roles")
            .fetch_all(&self.pool)
            .await?;

        Ok(Self::rows_to_records(rows))
    }

    async fn delete(&self, key: &GrantKey) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM temp_roles WHERE guildId = ?1 AND userId = ?2 AND roleId = ?3",
        )
        .bind(key.scope_id.as_str())
        .bind(key.subject_id.as_str())
        .bind(key.capability_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to delete grant: {}", e)))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::db::Database;
    use chrono::Duration;

    async fn repository() -> SqliteGrantRepository {
        let db = Database::new("sqlite::memory:", 1).await.unwrap();
        SqliteGrantRepository::new(db.get_pool().clone())
    }

    #[tokio::test]
    async fn test_create_and_find_preserves_millisecond_expiry() {
        let repo = repository().await;
        let key = GrantKey::new("111", "222", "333");
        let expires_at = DateTime::from_timestamp_millis(1_900_000_000_123).unwrap();

        let id = repo.create(&key, expires_at).await.unwrap();
        let record = repo.find_by_id(id).await.unwrap().unwrap();

        assert_eq!(record.key, key);
        assert_eq!(record.remove_at(), 1_900_000_000_123);
        assert_eq!(record.expires_at, expires_at);
    }

    #[tokio::test]
    async fn test_delete_by_triple() {
        let repo = repository().await;
        let key = GrantKey::new("g", "u", "r");
        let now = Utc::now();

        repo.create(&key, now).await.unwrap();
        repo.create(&key, now + Duration::minutes(5)).await.unwrap();
        repo.create(&GrantKey::new("g", "u", "other"), now).await.unwrap();

        let found = repo.find_by_key(&key).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].id < found[1].id);

        assert_eq!(repo.delete(&key).await.unwrap(), 2);
        assert_eq!(repo.delete(&key).await.unwrap(), 0);
        assert_eq!(repo.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_missing_id() {
        let repo = repository().await;
        assert!(repo.find_by_id(GrantId(42)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reads_rows_written_by_other_clients() {
        let db = Database::new("sqlite::memory:", 1).await.unwrap();
        sqlx::query(
            "INSERT INTO temp_roles (guildId, userId, roleId, removeAt) VALUES ('g', 'u', 'r', 1700000000000)",
        )
        .execute(db.get_pool())
        .await
        .unwrap();

        let repo = SqliteGrantRepository::new(db.get_pool().clone());
        let all = repo.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, GrantKey::new("g", "u", "r"));
        assert_eq!(all[0].remove_at(), 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_out_of_range_row_is_skipped_but_deletable() {
        let db = Database::new("sqlite::memory:", 1).await.unwrap();
        sqlx::query("INSERT INTO temp_roles (guildId, userId, roleId, removeAt) VALUES ('g', 'u', 'bad', ?1)")
            .bind(i64::MAX)
            .execute(db.get_pool())
            .await
            .unwrap();

        let repo = SqliteGrantRepository::new(db.get_pool().clone());
        repo.create(&GrantKey::new("g", "u", "good"), Utc::now()).await.unwrap();

        let all = repo.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key.capability_id.as_str(), "good");

        assert_eq!(repo.delete(&GrantKey::new("g", "u", "bad")).await.unwrap(), 1);
    }
}
