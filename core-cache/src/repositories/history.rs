//! Append-only sync history repository

use crate::error::Result;
use crate::models::{HistoryStatus, SyncHistory};
use async_trait::async_trait;
use sqlx::{query_as, SqlitePool};

#[async_trait]
pub trait SyncHistoryRepository: Send + Sync {
    /// Append one immutable record
    async fn append(&self, record: &SyncHistory) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<SyncHistory>>;

    async fn find_by_job(&self, job_id: &str) -> Result<Option<SyncHistory>>;

    /// Newest first
    async fn recent(&self, limit: i64) -> Result<Vec<SyncHistory>>;

    /// Number of records with `status` started at or after `since`
    async fn count_with_status_since(&self, status: HistoryStatus, since: i64) -> Result<i64>;
}

pub struct SqliteSyncHistoryRepository {
    pool: SqlitePool,
}

impl SqliteSyncHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncHistoryRepository for SqliteSyncHistoryRepository {
    async fn append(&self, record: &SyncHistory) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_history (
                id, job_id, sync_type, status, started_at, completed_at,
                duration_seconds, notebook_id, section_id,
                pages_fetched, pages_added, pages_updated, pages_deleted,
                pages_skipped, api_calls_made, errors_encountered, error_details,
                total_wait_time_seconds, rate_limit_hits, triggered_by, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.job_id)
        .bind(record.sync_type)
        .bind(record.status)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.duration_seconds)
        .bind(&record.notebook_id)
        .bind(&record.section_id)
        .bind(record.pages_fetched)
        .bind(record.pages_added)
        .bind(record.pages_updated)
        .bind(record.pages_deleted)
        .bind(record.pages_skipped)
        .bind(record.api_calls_made)
        .bind(record.errors_encountered)
        .bind(&record.error_details)
        .bind(record.total_wait_time_seconds)
        .bind(record.rate_limit_hits)
        .bind(record.triggered_by)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SyncHistory>> {
        let record = query_as::<_, SyncHistory>("SELECT * FROM sync_history WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_by_job(&self, job_id: &str) -> Result<Option<SyncHistory>> {
        let record = query_as::<_, SyncHistory>(
            "SELECT * FROM sync_history WHERE job_id = ? ORDER BY started_at DESC LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<SyncHistory>> {
        let records = query_as::<_, SyncHistory>(
            "SELECT * FROM sync_history ORDER BY started_at DESC, created_at DESC LIMIT ?",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn count_with_status_since(&self, status: HistoryStatus, since: i64) -> Result<i64> {
        let (count,): (i64,) = query_as(
            "SELECT COUNT(*) FROM sync_history WHERE status = ? AND started_at >= ?",
        )
        .bind(status)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{SyncType, TriggerSource};

    fn record(status: HistoryStatus, started_at: i64) -> SyncHistory {
        let mut record = SyncHistory::new(SyncType::Full, status, started_at);
        record.triggered_by = Some(TriggerSource::Manual);
        record
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let repo = SqliteSyncHistoryRepository::new(create_test_pool().await.unwrap());
        let mut entry = record(HistoryStatus::PartialSuccess, 100);
        entry.job_id = Some("job-1".to_string());
        entry.errors_encountered = 2;
        entry.total_wait_time_seconds = 4.5;
        repo.append(&entry).await.unwrap();

        let loaded = repo.find_by_id(&entry.id).await.unwrap().unwrap();
        assert_eq!(loaded, entry);
        assert_eq!(repo.find_by_job("job-1").await.unwrap().unwrap().id, entry.id);
    }

    #[tokio::test]
    async fn test_recent_is_newest_first_and_bounded() {
        let repo = SqliteSyncHistoryRepository::new(create_test_pool().await.unwrap());
        for started_at in [10, 30, 20] {
            repo.append(&record(HistoryStatus::Success, started_at))
                .await
                .unwrap();
        }

        let recent = repo.recent(2).await.unwrap();
        let started: Vec<_> = recent.iter().map(|r| r.started_at).collect();
        assert_eq!(started, vec![30, 20]);
    }

    #[tokio::test]
    async fn test_count_failures_in_window() {
        let repo = SqliteSyncHistoryRepository::new(create_test_pool().await.unwrap());
        repo.append(&record(HistoryStatus::Failed, 50)).await.unwrap();
        repo.append(&record(HistoryStatus::Failed, 150)).await.unwrap();
        repo.append(&record(HistoryStatus::Success, 160)).await.unwrap();

        let failures = repo
            .count_with_status_since(HistoryStatus::Failed, 100)
            .await
            .unwrap();
        assert_eq!(failures, 1);
    }
}
