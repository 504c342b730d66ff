//! # Notes Cache
//!
//! Durable local mirror of the remote notebook hierarchy.
//!
//! ## Overview
//!
//! This crate manages:
//! - SQLite schema and embedded migrations
//! - Documents with tombstones, a version counter and indexing status
//! - Image metadata plus the on-disk image store
//! - Per-scope sync state and the append-only sync history
//! - Aggregate stats and a coarse health label
//!
//! Live job records (`sync_jobs`) share the same database but are owned by
//! `core-sync`.

pub mod db;
pub mod error;
pub mod image_store;
pub mod models;
pub mod repositories;
pub mod stats;

pub use error::{CacheError, Result};
pub use image_store::{ImageStore, StagedImage, StoredImage};
pub use models::{
    now_timestamp, CacheHealth, CacheStats, CachedDocument, CachedImage, DocumentSyncInfo,
    HistoryStatus, SyncHistory, SyncState, SyncStatus, SyncType, TriggerSource, GLOBAL_SCOPE,
};
pub use stats::StatsOptions;

use repositories::{
    DocumentRepository, ImageRepository, SqliteDocumentRepository, SqliteImageRepository,
    SqliteSyncHistoryRepository, SqliteSyncStateRepository, SyncHistoryRepository,
    SyncStateRepository,
};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;

/// Handles to every cache repository over one pool
#[derive(Clone)]
pub struct CacheStore {
    pool: SqlitePool,
    pub documents: Arc<dyn DocumentRepository>,
    pub images: Arc<dyn ImageRepository>,
    pub sync_state: Arc<dyn SyncStateRepository>,
    pub history: Arc<dyn SyncHistoryRepository>,
    pub image_store: ImageStore,
}

impl CacheStore {
    pub fn new(pool: SqlitePool, image_dir: impl Into<PathBuf>) -> Self {
        Self {
            documents: Arc::new(SqliteDocumentRepository::new(pool.clone())),
            images: Arc::new(SqliteImageRepository::new(pool.clone())),
            sync_state: Arc::new(SqliteSyncStateRepository::new(pool.clone())),
            history: Arc::new(SqliteSyncHistoryRepository::new(pool.clone())),
            image_store: ImageStore::new(image_dir),
            pool,
        }
    }

    /// Open (or create) the cache database at `database_path`
    pub async fn open(
        database_path: impl Into<PathBuf>,
        image_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let pool = db::create_pool(db::DatabaseConfig::new(database_path)).await?;
        Ok(Self::new(pool, image_dir))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn stats(&self, options: &StatsOptions) -> Result<CacheStats> {
        stats::compute_stats(&self.pool, options).await
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("image_dir", &self.image_store.root())
            .finish_non_exhaustive()
    }
}
