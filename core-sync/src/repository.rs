//! # Sync Job Repository
//!
//! Provides database persistence for sync jobs.
//!
//! ## Overview
//!
//! This repository handles CRUD operations for the `sync_jobs` table:
//! - Creating new sync jobs
//! - Updating job progress and status after every page
//! - Querying jobs by id, status or recency
//! - Failing jobs left active by a previous process

use crate::job::{JobProgress, JobStatus, SyncJob, SyncJobId};
use crate::{Result, SyncError};
use async_trait::async_trait;
use core_cache::{now_timestamp, SyncType, TriggerSource};
use sqlx::{FromRow, SqlitePool};

/// Message recorded on jobs failed by [`SyncJobRepository::fail_interrupted`]
pub const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository trait for sync job persistence
#[async_trait]
pub trait SyncJobRepository: Send + Sync {
    /// Insert a new sync job
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn insert(&self, job: &SyncJob) -> Result<()>;

    /// Update an existing sync job
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` if the job doesn't exist
    async fn update(&self, job: &SyncJob) -> Result<()>;

    /// Find a sync job by ID
    async fn find_by_id(&self, id: &SyncJobId) -> Result<Option<SyncJob>>;

    /// Get sync jobs by status, newest first
    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<SyncJob>>;

    /// Most recent jobs, newest first
    async fn recent(&self, limit: u32) -> Result<Vec<SyncJob>>;

    /// Mark every queued, running or paused job as failed
    ///
    /// Returns the number of jobs changed.
    async fn fail_interrupted(&self) -> Result<u64>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of SyncJobRepository
pub struct SqliteSyncJobRepository {
    pool: SqlitePool,
}

impl SqliteSyncJobRepository {
    /// Create a new SQLite sync job repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a sync job
#[derive(Debug, FromRow)]
struct SyncJobRow {
    job_id: String,
    sync_type: String,
    trigger_source: String,
    notebook_ids: Option<String>,
    status: String,
    total_pages: i64,
    pages_processed: i64,
    pages_added: i64,
    pages_updated: i64,
    pages_deleted: i64,
    pages_skipped: i64,
    api_calls_made: i64,
    elapsed_seconds: i64,
    estimated_remaining_seconds: Option<i64>,
    error_count: i64,
    last_error: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    updated_at: i64,
}

impl TryFrom<SyncJobRow> for SyncJob {
    type Error = SyncError;

    fn try_from(row: SyncJobRow) -> Result<Self> {
        let sync_type: SyncType = row
            .sync_type
            .parse()
            .map_err(|_| SyncError::InvalidSyncType(row.sync_type.clone()))?;
        let trigger: TriggerSource = row.trigger_source.parse().map_err(|_| {
            SyncError::Database(format!("Invalid trigger_source: {}", row.trigger_source))
        })?;
        let status: JobStatus = row.status.parse()?;

        let notebook_ids = row.notebook_ids.map(|ids| {
            ids.split(',')
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        });

        let progress = JobProgress {
            total_pages: to_u64(row.total_pages),
            pages_processed: to_u64(row.pages_processed),
            pages_added: to_u64(row.pages_added),
            pages_updated: to_u64(row.pages_updated),
            pages_deleted: to_u64(row.pages_deleted),
            pages_skipped: to_u64(row.pages_skipped),
            api_calls_made: to_u64(row.api_calls_made),
            error_count: to_u64(row.error_count),
            elapsed_seconds: to_u64(row.elapsed_seconds),
            estimated_remaining_seconds: row.estimated_remaining_seconds.map(to_u64),
        };

        Ok(SyncJob {
            id: SyncJobId::from_string(&row.job_id)?,
            sync_type,
            trigger,
            notebook_ids,
            status,
            progress,
            last_error: row.last_error,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}

fn to_u64(value: i64) -> u64 {
    value.max(0) as u64
}

fn db_err(e: sqlx::Error) -> SyncError {
    SyncError::Database(e.to_string())
}

#[async_trait]
impl SyncJobRepository for SqliteSyncJobRepository {
    async fn insert(&self, job: &SyncJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_jobs (
                job_id, sync_type, trigger_source, notebook_ids, status,
                progress_percent, total_pages, pages_processed,
                pages_added, pages_updated, pages_deleted, pages_skipped,
                api_calls_made, elapsed_seconds, estimated_remaining_seconds,
                error_count, last_error, can_pause, can_cancel,
                created_at, started_at, completed_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.sync_type.as_str())
        .bind(job.trigger.as_str())
        .bind(job.notebook_ids.as_ref().map(|ids| ids.join(",")))
        .bind(job.status.as_str())
        .bind(job.progress.percent())
        .bind(job.progress.total_pages as i64)
        .bind(job.progress.pages_processed as i64)
        .bind(job.progress.pages_added as i64)
        .bind(job.progress.pages_updated as i64)
        .bind(job.progress.pages_deleted as i64)
        .bind(job.progress.pages_skipped as i64)
        .bind(job.progress.api_calls_made as i64)
        .bind(job.progress.elapsed_seconds as i64)
        .bind(job.progress.estimated_remaining_seconds.map(|s| s as i64))
        .bind(job.progress.error_count as i64)
        .bind(&job.last_error)
        .bind(job.can_pause())
        .bind(job.can_cancel())
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn update(&self, job: &SyncJob) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs SET
                sync_type = ?,
                status = ?,
                progress_percent = ?,
                total_pages = ?,
                pages_processed = ?,
                pages_added = ?,
                pages_updated = ?,
                pages_deleted = ?,
                pages_skipped = ?,
                api_calls_made = ?,
                elapsed_seconds = ?,
                estimated_remaining_seconds = ?,
                error_count = ?,
                last_error = ?,
                can_pause = ?,
                can_cancel = ?,
                started_at = ?,
                completed_at = ?,
                updated_at = ?
            WHERE job_id = ?
            "#,
        )
        .bind(job.sync_type.as_str())
        .bind(job.status.as_str())
        .bind(job.progress.percent())
        .bind(job.progress.total_pages as i64)
        .bind(job.progress.pages_processed as i64)
        .bind(job.progress.pages_added as i64)
        .bind(job.progress.pages_updated as i64)
        .bind(job.progress.pages_deleted as i64)
        .bind(job.progress.pages_skipped as i64)
        .bind(job.progress.api_calls_made as i64)
        .bind(job.progress.elapsed_seconds as i64)
        .bind(job.progress.estimated_remaining_seconds.map(|s| s as i64))
        .bind(job.progress.error_count as i64)
        .bind(&job.last_error)
        .bind(job.can_pause())
        .bind(job.can_cancel())
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .bind(job.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(SyncError::JobNotFound {
                job_id: job.id.to_string(),
            });
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &SyncJobId) -> Result<Option<SyncJob>> {
        let row = sqlx::query_as::<_, SyncJobRow>("SELECT * FROM sync_jobs WHERE job_id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(SyncJob::try_from).transpose()
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<SyncJob>> {
        let rows = sqlx::query_as::<_, SyncJobRow>(
            "SELECT * FROM sync_jobs WHERE status = ? ORDER BY created_at DESC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(SyncJob::try_from)
            .collect::<Result<Vec<_>>>()
    }

    async fn recent(&self, limit: u32) -> Result<Vec<SyncJob>> {
        let rows = sqlx::query_as::<_, SyncJobRow>(
            "SELECT * FROM sync_jobs ORDER BY created_at DESC, updated_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(SyncJob::try_from)
            .collect::<Result<Vec<_>>>()
    }

    async fn fail_interrupted(&self) -> Result<u64> {
        let now = now_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs SET
                status = 'failed',
                last_error = ?,
                can_pause = 0,
                can_cancel = 0,
                estimated_remaining_seconds = NULL,
                completed_at = ?,
                updated_at = ?
            WHERE status IN ('queued', 'running', 'paused')
            "#,
        )
        .bind(INTERRUPTED_MESSAGE)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::PageOutcome;
    use core_cache::db::create_test_pool;

    async fn repo() -> SqliteSyncJobRepository {
        SqliteSyncJobRepository::new(create_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = repo().await;
        let job = SyncJob::new(SyncType::Smart, TriggerSource::Scheduled)
            .with_notebooks(vec!["nb-1".to_string(), "nb-2".to_string()]);
        repo.insert(&job).await.unwrap();

        let found = repo.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(found, job);
        assert_eq!(
            found.notebook_ids,
            Some(vec!["nb-1".to_string(), "nb-2".to_string()])
        );
    }

    #[tokio::test]
    async fn test_update_progress_and_status() {
        let repo = repo().await;
        let job = SyncJob::new(SyncType::Full, TriggerSource::Manual);
        repo.insert(&job).await.unwrap();

        let mut job = job.start(SyncType::Full).unwrap();
        job.set_total_pages(3).unwrap();
        job.record_page(PageOutcome::Added).unwrap();
        job.record_error("page p2: boom");
        repo.update(&job).await.unwrap();

        let found = repo.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Running);
        assert_eq!(found.progress.total_pages, 3);
        assert_eq!(found.progress.pages_added, 1);
        assert_eq!(found.progress.error_count, 1);
        assert_eq!(found.last_error.as_deref(), Some("page p2: boom"));

        let (can_pause, percent): (bool, f64) =
            sqlx::query_as("SELECT can_pause, progress_percent FROM sync_jobs WHERE job_id = ?")
                .bind(job.id.as_str())
                .fetch_one(&repo.pool)
                .await
                .unwrap();
        assert!(can_pause);
        assert!((percent - 33.3).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_update_missing_job() {
        let repo = repo().await;
        let job = SyncJob::new(SyncType::Full, TriggerSource::Manual);
        assert!(matches!(
            repo.update(&job).await,
            Err(SyncError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_by_status_and_recent() {
        let repo = repo().await;
        let queued = SyncJob::new(SyncType::Full, TriggerSource::Manual);
        let mut done = SyncJob::new(SyncType::Incremental, TriggerSource::Api);
        done.created_at -= 10;
        let done = done
            .start(SyncType::Incremental)
            .unwrap()
            .complete()
            .unwrap();
        repo.insert(&queued).await.unwrap();
        repo.insert(&done).await.unwrap();

        let completed = repo.find_by_status(JobStatus::Completed).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, done.id);

        let recent = repo.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, queued.id);
        assert_eq!(repo.recent(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_interrupted() {
        let repo = repo().await;
        let running = SyncJob::new(SyncType::Full, TriggerSource::Manual)
            .start(SyncType::Full)
            .unwrap();
        let done = SyncJob::new(SyncType::Full, TriggerSource::Manual)
            .start(SyncType::Full)
            .unwrap()
            .complete()
            .unwrap();
        repo.insert(&running).await.unwrap();
        repo.insert(&done).await.unwrap();

        assert_eq!(repo.fail_interrupted().await.unwrap(), 1);

        let failed = repo.find_by_id(&running.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.last_error.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert!(!failed.can_cancel());

        let untouched = repo.find_by_id(&done.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, JobStatus::Completed);
    }
}
