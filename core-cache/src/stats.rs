//! Aggregate cache statistics and the coarse health label

use crate::error::Result;
use crate::models::{now_timestamp, CacheHealth, CacheStats, HistoryStatus};
use crate::repositories::{
    SqliteSyncHistoryRepository, SqliteSyncStateRepository, SyncHistoryRepository,
    SyncStateRepository,
};
use sqlx::{query_as, SqlitePool};
use tracing::debug;

/// Windows and thresholds used to derive [`CacheStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsOptions {
    /// Documents not synced within this many seconds count as stale
    pub stale_after_secs: i64,
    /// Failed history rows within this many seconds count as recent
    pub failure_window_secs: i64,
    /// More recent failures than this label the cache `error`
    pub error_failure_threshold: i64,
    /// More stale documents than this label the cache `needs_sync`
    pub needs_sync_stale_threshold: i64,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            stale_after_secs: 24 * 3600,
            failure_window_secs: 24 * 3600,
            error_failure_threshold: 5,
            needs_sync_stale_threshold: 100,
        }
    }
}

/// Derive the health label from counts
pub fn classify_health(recent_failures: i64, stale_documents: i64, options: &StatsOptions) -> CacheHealth {
    if recent_failures > options.error_failure_threshold {
        CacheHealth::Error
    } else if stale_documents > options.needs_sync_stale_threshold {
        CacheHealth::NeedsSync
    } else {
        CacheHealth::Healthy
    }
}

/// Compute statistics over the whole cache at the current time
pub async fn compute_stats(pool: &SqlitePool, options: &StatsOptions) -> Result<CacheStats> {
    compute_stats_at(pool, options, now_timestamp()).await
}

pub(crate) async fn compute_stats_at(
    pool: &SqlitePool,
    options: &StatsOptions,
    now: i64,
) -> Result<CacheStats> {
    let (total_documents,): (i64,) =
        query_as("SELECT COUNT(*) FROM documents WHERE is_deleted = 0")
            .fetch_one(pool)
            .await?;

    let (total_images,): (i64,) = query_as("SELECT COUNT(*) FROM images")
        .fetch_one(pool)
        .await?;

    let (unindexed_documents,): (i64,) = query_as(
        r#"
        SELECT COUNT(*) FROM documents
        WHERE is_deleted = 0 AND (indexed_at IS NULL OR indexed_at < last_synced_at)
        "#,
    )
    .fetch_one(pool)
    .await?;

    let (stale_documents,): (i64,) = query_as(
        "SELECT COUNT(*) FROM documents WHERE is_deleted = 0 AND last_synced_at < ?",
    )
    .bind(now - options.stale_after_secs)
    .fetch_one(pool)
    .await?;

    let state = SqliteSyncStateRepository::new(pool.clone())
        .get_global()
        .await?;

    let recent_failures = SqliteSyncHistoryRepository::new(pool.clone())
        .count_with_status_since(HistoryStatus::Failed, now - options.failure_window_secs)
        .await?;

    let cache_size_mb = database_size_mb(pool).await;

    let sync_health = classify_health(recent_failures, stale_documents, options);

    debug!(
        total_documents,
        stale_documents,
        recent_failures,
        health = %sync_health,
        "Computed cache stats"
    );

    Ok(CacheStats {
        total_documents,
        total_images,
        unindexed_documents,
        stale_documents,
        last_full_sync: state.as_ref().and_then(|s| s.last_full_sync_at),
        last_incremental_sync: state.as_ref().and_then(|s| s.last_incremental_sync_at),
        recent_failures,
        cache_size_mb,
        sync_health,
    })
}

/// Database size from `page_count * page_size`, `None` if the pragmas fail
async fn database_size_mb(pool: &SqlitePool) -> Option<f64> {
    let page_count: (i64,) = query_as("PRAGMA page_count").fetch_one(pool).await.ok()?;
    let page_size: (i64,) = query_as("PRAGMA page_size").fetch_one(pool).await.ok()?;
    let bytes = page_count.0 as f64 * page_size.0 as f64;
    Some((bytes / (1024.0 * 1024.0) * 100.0).round() / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{CachedDocument, CachedImage, SyncHistory, SyncState, SyncType};
    use crate::repositories::{
        DocumentRepository, ImageRepository, SqliteDocumentRepository, SqliteImageRepository,
    };

    #[test]
    fn test_classify_health_thresholds() {
        let options = StatsOptions::default();
        assert_eq!(classify_health(0, 0, &options), CacheHealth::Healthy);
        assert_eq!(classify_health(5, 100, &options), CacheHealth::Healthy);
        assert_eq!(classify_health(0, 101, &options), CacheHealth::NeedsSync);
        assert_eq!(classify_health(6, 500, &options), CacheHealth::Error);
    }

    #[tokio::test]
    async fn test_empty_cache_is_healthy() {
        let pool = create_test_pool().await.unwrap();
        let stats = compute_stats(&pool, &StatsOptions::default()).await.unwrap();

        assert_eq!(stats.total_documents, 0);
        assert_eq!(stats.total_images, 0);
        assert_eq!(stats.last_full_sync, None);
        assert_eq!(stats.sync_health, CacheHealth::Healthy);
        assert!(stats.cache_size_mb.unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn test_counts_and_windows() {
        let pool = create_test_pool().await.unwrap();
        let documents = SqliteDocumentRepository::new(pool.clone());
        let now = 1_000_000;

        let mut fresh = CachedDocument::new("fresh", "nb", "sec", "Fresh");
        fresh.last_synced_at = now - 10;
        let mut stale = CachedDocument::new("stale", "nb", "sec", "Stale");
        stale.last_synced_at = now - 48 * 3600;
        let gone = CachedDocument::new("gone", "nb", "sec", "Gone");
        documents.bulk_upsert(&[fresh, stale, gone]).await.unwrap();
        documents.mark_deleted(&["gone".to_string()]).await.unwrap();
        documents.mark_indexed("fresh", 3, 1).await.unwrap();

        SqliteImageRepository::new(pool.clone())
            .upsert(&CachedImage::new("fresh", 0, "fr/fresh_0.png"))
            .await
            .unwrap();

        let history = SqliteSyncHistoryRepository::new(pool.clone());
        history
            .append(&SyncHistory::new(SyncType::Full, HistoryStatus::Failed, now - 60))
            .await
            .unwrap();
        history
            .append(&SyncHistory::new(SyncType::Full, HistoryStatus::Failed, now - 30 * 3600))
            .await
            .unwrap();

        let mut state = SyncState::global();
        state.last_full_sync_at = Some(now - 3600);
        SqliteSyncStateRepository::new(pool.clone())
            .upsert(&state)
            .await
            .unwrap();

        let stats = compute_stats_at(&pool, &StatsOptions::default(), now)
            .await
            .unwrap();

        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.total_images, 1);
        assert_eq!(stats.unindexed_documents, 1);
        assert_eq!(stats.stale_documents, 1);
        assert_eq!(stats.recent_failures, 1);
        assert_eq!(stats.last_full_sync, Some(now - 3600));
        assert_eq!(stats.sync_health, CacheHealth::Healthy);
    }
}
