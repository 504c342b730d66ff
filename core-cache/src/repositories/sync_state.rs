//! Per-scope sync state repository

use crate::error::Result;
use crate::models::{SyncState, GLOBAL_SCOPE};
use async_trait::async_trait;
use sqlx::{query_as, SqlitePool};

#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    async fn get(&self, entity_type: &str, entity_id: &str) -> Result<Option<SyncState>>;

    /// State of the whole-account scope, if any sync ever started
    async fn get_global(&self) -> Result<Option<SyncState>> {
        self.get(GLOBAL_SCOPE, GLOBAL_SCOPE).await
    }

    /// Insert or replace by (`entity_type`, `entity_id`)
    async fn upsert(&self, state: &SyncState) -> Result<()>;
}

pub struct SqliteSyncStateRepository {
    pool: SqlitePool,
}

impl SqliteSyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncStateRepository for SqliteSyncStateRepository {
    async fn get(&self, entity_type: &str, entity_id: &str) -> Result<Option<SyncState>> {
        let state = query_as::<_, SyncState>(
            "SELECT * FROM sync_state WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    async fn upsert(&self, state: &SyncState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (
                entity_type, entity_id, entity_name,
                last_full_sync_at, last_incremental_sync_at, next_sync_due_at,
                total_pages_synced, pages_added_last_sync, pages_updated_last_sync,
                pages_deleted_last_sync, last_sync_duration_seconds, last_sync_error,
                api_calls_last_sync, sync_status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                entity_name = excluded.entity_name,
                last_full_sync_at = excluded.last_full_sync_at,
                last_incremental_sync_at = excluded.last_incremental_sync_at,
                next_sync_due_at = excluded.next_sync_due_at,
                total_pages_synced = excluded.total_pages_synced,
                pages_added_last_sync = excluded.pages_added_last_sync,
                pages_updated_last_sync = excluded.pages_updated_last_sync,
                pages_deleted_last_sync = excluded.pages_deleted_last_sync,
                last_sync_duration_seconds = excluded.last_sync_duration_seconds,
                last_sync_error = excluded.last_sync_error,
                api_calls_last_sync = excluded.api_calls_last_sync,
                sync_status = excluded.sync_status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.entity_type)
        .bind(&state.entity_id)
        .bind(&state.entity_name)
        .bind(state.last_full_sync_at)
        .bind(state.last_incremental_sync_at)
        .bind(state.next_sync_due_at)
        .bind(state.total_pages_synced)
        .bind(state.pages_added_last_sync)
        .bind(state.pages_updated_last_sync)
        .bind(state.pages_deleted_last_sync)
        .bind(state.last_sync_duration_seconds)
        .bind(&state.last_sync_error)
        .bind(state.api_calls_last_sync)
        .bind(state.sync_status)
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::SyncStatus;

    #[tokio::test]
    async fn test_global_state_round_trip() {
        let repo = SqliteSyncStateRepository::new(create_test_pool().await.unwrap());
        assert!(repo.get_global().await.unwrap().is_none());

        let mut state = SyncState::global();
        state.sync_status = SyncStatus::Syncing;
        repo.upsert(&state).await.unwrap();

        state.sync_status = SyncStatus::Completed;
        state.last_full_sync_at = Some(1_700_000_000);
        state.pages_added_last_sync = 12;
        repo.upsert(&state).await.unwrap();

        let loaded = repo.get_global().await.unwrap().unwrap();
        assert_eq!(loaded.sync_status, SyncStatus::Completed);
        assert_eq!(loaded.last_full_sync_at, Some(1_700_000_000));
        assert_eq!(loaded.pages_added_last_sync, 12);
    }

    #[tokio::test]
    async fn test_scopes_are_independent() {
        let repo = SqliteSyncStateRepository::new(create_test_pool().await.unwrap());
        let mut notebook = SyncState::new("notebook", "nb-1");
        notebook.entity_name = Some("Work".to_string());
        repo.upsert(&notebook).await.unwrap();

        assert!(repo.get_global().await.unwrap().is_none());
        let loaded = repo.get("notebook", "nb-1").await.unwrap().unwrap();
        assert_eq!(loaded.entity_name.as_deref(), Some("Work"));
    }
}
