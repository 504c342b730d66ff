//! Domain models for the notes cache
//!
//! Rows map one-to-one onto the tables created by `migrations/0001_initial.sql`.
//! All timestamps are unix epoch seconds.

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Current unix time in seconds
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

// =============================================================================
// Enumerations
// =============================================================================

/// Synchronization strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SyncType {
    /// Re-traverse and re-upsert everything
    Full,
    /// Metadata diff, then fetch only changed/new pages
    Incremental,
    /// Pick full or incremental from staleness and last-run health
    Smart,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Full => "full",
            SyncType::Incremental => "incremental",
            SyncType::Smart => "smart",
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(SyncType::Full),
            "incremental" => Ok(SyncType::Incremental),
            "smart" => Ok(SyncType::Smart),
            _ => Err(CacheError::invalid(
                "sync_type",
                format!("Unknown sync type: {}", s),
            )),
        }
    }
}

/// What initiated a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TriggerSource {
    Manual,
    Scheduled,
    Auto,
    Api,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Scheduled => "scheduled",
            TriggerSource::Auto => "auto",
            TriggerSource::Api => "api",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerSource {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(TriggerSource::Manual),
            "scheduled" => Ok(TriggerSource::Scheduled),
            "auto" => Ok(TriggerSource::Auto),
            "api" => Ok(TriggerSource::Api),
            _ => Err(CacheError::invalid(
                "trigger_source",
                format!("Unknown trigger source: {}", s),
            )),
        }
    }
}

/// Status of a sync scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
    Paused,
    Completed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
            SyncStatus::Paused => "paused",
            SyncStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded in the history log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum HistoryStatus {
    Success,
    /// Completed with per-page errors
    PartialSuccess,
    Failed,
    Cancelled,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Success => "success",
            HistoryStatus::PartialSuccess => "partial_success",
            HistoryStatus::Failed => "failed",
            HistoryStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Documents
// =============================================================================

/// One remote page mirrored locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CachedDocument {
    /// Stable remote page identifier
    pub page_id: String,
    pub html_content: String,
    pub plain_text: Option<String>,

    // Hierarchy
    pub notebook_id: String,
    pub notebook_name: Option<String>,
    pub section_id: String,
    pub section_name: Option<String>,
    pub page_title: String,

    // Remote metadata
    pub author: Option<String>,
    pub created_date: Option<i64>,
    /// Remote last-modified time; the incremental diff key
    pub modified_date: Option<i64>,
    pub source_url: Option<String>,
    /// Comma-separated tags
    pub tags: Option<String>,

    // Sync tracking
    pub last_synced_at: i64,
    /// Incremented on every upsert of an existing row
    pub sync_version: i64,
    /// Tombstone flag
    pub is_deleted: bool,

    // Indexing status, owned by the downstream indexer
    pub indexed_at: Option<i64>,
    pub chunk_count: i64,
    pub image_count: i64,

    /// Free-form JSON
    pub extra_metadata: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl CachedDocument {
    /// A fresh, never-indexed document synced now
    pub fn new(
        page_id: impl Into<String>,
        notebook_id: impl Into<String>,
        section_id: impl Into<String>,
        page_title: impl Into<String>,
    ) -> Self {
        let now = now_timestamp();
        Self {
            page_id: page_id.into(),
            html_content: String::new(),
            plain_text: None,
            notebook_id: notebook_id.into(),
            notebook_name: None,
            section_id: section_id.into(),
            section_name: None,
            page_title: page_title.into(),
            author: None,
            created_date: None,
            modified_date: None,
            source_url: None,
            tags: None,
            last_synced_at: now,
            sync_version: 1,
            is_deleted: false,
            indexed_at: None,
            chunk_count: 0,
            image_count: 0,
            extra_metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate document data
    pub fn validate(&self) -> Result<(), String> {
        if self.page_id.trim().is_empty() {
            return Err("Page id cannot be empty".to_string());
        }
        if self.notebook_id.trim().is_empty() || self.section_id.trim().is_empty() {
            return Err(format!(
                "Page {} is missing its notebook or section id",
                self.page_id
            ));
        }
        Ok(())
    }

    /// Whether the downstream indexer still has to (re)process this page
    pub fn needs_indexing(&self) -> bool {
        !self.is_deleted && self.indexed_at.map_or(true, |at| at < self.last_synced_at)
    }

    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .as_deref()
            .map(|tags| {
                tags.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Lightweight projection used by the incremental diff
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct DocumentSyncInfo {
    pub page_id: String,
    pub notebook_id: String,
    pub section_id: String,
    pub modified_date: Option<i64>,
    pub is_deleted: bool,
}

// =============================================================================
// Images
// =============================================================================

/// One image belonging to a page, keyed by (`page_id`, `image_index`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CachedImage {
    pub id: Option<i64>,
    pub page_id: String,
    pub image_index: i64,

    /// Path relative to the image store root
    pub file_path: String,
    pub file_size_bytes: Option<i64>,
    pub mime_type: Option<String>,
    /// Hex sha256 of the stored bytes
    pub content_hash: Option<String>,

    pub alt_text: Option<String>,
    /// Reserved for downstream enrichment
    pub vision_analysis: Option<String>,
    pub analyzed_at: Option<i64>,

    /// Remote resource URL, kept to re-fetch without re-parsing HTML
    pub resource_url: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl CachedImage {
    pub fn new(page_id: impl Into<String>, image_index: i64, file_path: impl Into<String>) -> Self {
        let now = now_timestamp();
        Self {
            id: None,
            page_id: page_id.into(),
            image_index,
            file_path: file_path.into(),
            file_size_bytes: None,
            mime_type: None,
            content_hash: None,
            alt_text: None,
            vision_analysis: None,
            analyzed_at: None,
            resource_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// Sync state
// =============================================================================

/// Scope used by the orchestrator for whole-account syncs
pub const GLOBAL_SCOPE: &str = "global";

/// Per-scope sync bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SyncState {
    /// 'global', 'notebook' or 'section'
    pub entity_type: String,
    pub entity_id: String,
    pub entity_name: Option<String>,

    pub last_full_sync_at: Option<i64>,
    pub last_incremental_sync_at: Option<i64>,
    pub next_sync_due_at: Option<i64>,

    pub total_pages_synced: i64,
    pub pages_added_last_sync: i64,
    pub pages_updated_last_sync: i64,
    pub pages_deleted_last_sync: i64,
    pub last_sync_duration_seconds: Option<i64>,
    pub last_sync_error: Option<String>,
    pub api_calls_last_sync: i64,

    pub sync_status: SyncStatus,

    pub created_at: i64,
    pub updated_at: i64,
}

impl SyncState {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let now = now_timestamp();
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            entity_name: None,
            last_full_sync_at: None,
            last_incremental_sync_at: None,
            next_sync_due_at: None,
            total_pages_synced: 0,
            pages_added_last_sync: 0,
            pages_updated_last_sync: 0,
            pages_deleted_last_sync: 0,
            last_sync_duration_seconds: None,
            last_sync_error: None,
            api_calls_last_sync: 0,
            sync_status: SyncStatus::Idle,
            created_at: now,
            updated_at: now,
        }
    }

    /// The whole-account scope
    pub fn global() -> Self {
        Self::new(GLOBAL_SCOPE, GLOBAL_SCOPE)
    }

    /// Most recent successful sync of either kind
    pub fn last_sync_at(&self) -> Option<i64> {
        match (self.last_full_sync_at, self.last_incremental_sync_at) {
            (Some(full), Some(incremental)) => Some(full.max(incremental)),
            (full, incremental) => full.or(incremental),
        }
    }
}

// =============================================================================
// Sync history
// =============================================================================

/// Immutable audit record of one sync attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SyncHistory {
    pub id: String,
    pub job_id: Option<String>,
    pub sync_type: SyncType,
    pub status: HistoryStatus,

    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub duration_seconds: Option<i64>,

    pub notebook_id: Option<String>,
    pub section_id: Option<String>,

    pub pages_fetched: i64,
    pub pages_added: i64,
    pub pages_updated: i64,
    pub pages_deleted: i64,
    pub pages_skipped: i64,
    pub api_calls_made: i64,
    pub errors_encountered: i64,
    pub error_details: Option<String>,

    pub total_wait_time_seconds: f64,
    pub rate_limit_hits: i64,

    pub triggered_by: Option<TriggerSource>,
    pub created_at: i64,
}

impl SyncHistory {
    pub fn new(sync_type: SyncType, status: HistoryStatus, started_at: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: None,
            sync_type,
            status,
            started_at,
            completed_at: None,
            duration_seconds: None,
            notebook_id: None,
            section_id: None,
            pages_fetched: 0,
            pages_added: 0,
            pages_updated: 0,
            pages_deleted: 0,
            pages_skipped: 0,
            api_calls_made: 0,
            errors_encountered: 0,
            error_details: None,
            total_wait_time_seconds: 0.0,
            rate_limit_hits: 0,
            triggered_by: None,
            created_at: now_timestamp(),
        }
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Coarse cache health label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheHealth {
    Healthy,
    NeedsSync,
    Error,
}

impl CacheHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheHealth::Healthy => "healthy",
            CacheHealth::NeedsSync => "needs_sync",
            CacheHealth::Error => "error",
        }
    }
}

impl fmt::Display for CacheHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate cache statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_documents: i64,
    pub total_images: i64,
    pub unindexed_documents: i64,
    /// Not synced within the stale window
    pub stale_documents: i64,
    pub last_full_sync: Option<i64>,
    pub last_incremental_sync: Option<i64>,
    /// Failed history rows within the failure window
    pub recent_failures: i64,
    pub cache_size_mb: Option<f64>,
    pub sync_health: CacheHealth,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_type_round_trip() {
        for sync_type in [SyncType::Full, SyncType::Incremental, SyncType::Smart] {
            assert_eq!(sync_type.as_str().parse::<SyncType>().unwrap(), sync_type);
        }
        assert_eq!("FULL".parse::<SyncType>().unwrap(), SyncType::Full);
        assert!("partial".parse::<SyncType>().is_err());
    }

    #[test]
    fn test_history_status_display() {
        assert_eq!(HistoryStatus::PartialSuccess.to_string(), "partial_success");
        assert_eq!(SyncStatus::Completed.to_string(), "completed");
        assert_eq!(CacheHealth::NeedsSync.as_str(), "needs_sync");
    }

    #[test]
    fn test_document_needs_indexing() {
        let mut doc = CachedDocument::new("p1", "nb1", "s1", "Title");
        assert!(doc.needs_indexing());

        doc.indexed_at = Some(doc.last_synced_at);
        assert!(!doc.needs_indexing());

        doc.indexed_at = Some(doc.last_synced_at - 1);
        assert!(doc.needs_indexing());

        doc.is_deleted = true;
        assert!(!doc.needs_indexing());
    }

    #[test]
    fn test_document_validation() {
        assert!(CachedDocument::new("p1", "nb1", "s1", "T").validate().is_ok());
        assert!(CachedDocument::new(" ", "nb1", "s1", "T").validate().is_err());
        assert!(CachedDocument::new("p1", "", "s1", "T").validate().is_err());
    }

    #[test]
    fn test_tag_list() {
        let mut doc = CachedDocument::new("p1", "nb1", "s1", "T");
        assert!(doc.tag_list().is_empty());
        doc.tags = Some("work, todo,,ideas".to_string());
        assert_eq!(doc.tag_list(), vec!["work", "todo", "ideas"]);
    }

    #[test]
    fn test_sync_state_last_sync_at() {
        let mut state = SyncState::global();
        assert_eq!(state.last_sync_at(), None);
        state.last_full_sync_at = Some(100);
        assert_eq!(state.last_sync_at(), Some(100));
        state.last_incremental_sync_at = Some(250);
        assert_eq!(state.last_sync_at(), Some(250));
        assert_eq!(state.entity_type, GLOBAL_SCOPE);
    }
}
