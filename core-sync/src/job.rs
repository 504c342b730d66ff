//! # Sync Job State Machine
//!
//! Manages the lifecycle of sync jobs with validated state transitions.
//!
//! ## Overview
//!
//! A `SyncJob` is the live, mutable projection of one sync attempt. It is
//! created `Queued`, moved to `Running` when the orchestrator picks it up,
//! and may bounce between `Running` and `Paused` at page boundaries before
//! settling in a terminal state. Progress counters are only written while the
//! job is running.
//!
//! ## State Machine
//!
//! ```text
//! Queued → Running ⇄ Paused
//!    │        │        │
//!    │        ├──────→ Completed
//!    │        ├──────→ Failed ←──┤
//!    └────────┴──────→ Cancelled ←┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncJob, SyncType, TriggerSource};
//!
//! let job = SyncJob::new(SyncType::Smart, TriggerSource::Manual);
//! let mut job = job.start(SyncType::Incremental)?;
//! job.set_total_pages(120)?;
//! job.record_page(PageOutcome::Added)?;
//! let job = job.complete()?;
//! ```

use crate::{Result, SyncError};
use core_cache::{now_timestamp, HistoryStatus, SyncType, TriggerSource};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncJobId(Uuid);

impl SyncJobId {
    /// Create a new random sync job ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a sync job ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidJobId(e.to_string()))?,
        ))
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SyncJobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// The current status of a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, orchestrator not yet started
    Queued,
    Running,
    /// Waiting at a page boundary for resume or cancel
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Check if this status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Check if this status represents an active state
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for JobStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Progress Types
// ============================================================================

/// What happened to one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Added,
    Updated,
    Skipped,
    /// Processing failed; the page is counted as processed
    Failed,
}

/// Running totals of a sync job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total_pages: u64,
    pub pages_processed: u64,
    pub pages_added: u64,
    pub pages_updated: u64,
    pub pages_deleted: u64,
    pub pages_skipped: u64,
    pub api_calls_made: u64,
    pub error_count: u64,
    pub elapsed_seconds: u64,
    pub estimated_remaining_seconds: Option<u64>,
}

impl JobProgress {
    /// Progress percentage (0-100)
    pub fn percent(&self) -> f64 {
        if self.total_pages == 0 {
            return 0.0;
        }
        let percent = self.pages_processed as f64 / self.total_pages as f64 * 100.0;
        (percent.min(100.0) * 10.0).round() / 10.0
    }

    /// Linear extrapolation of the remaining time from the pace so far
    pub fn estimate_remaining(&self) -> Option<u64> {
        if self.pages_processed == 0 || self.total_pages <= self.pages_processed {
            return None;
        }
        let per_page = self.elapsed_seconds as f64 / self.pages_processed as f64;
        let remaining = self.total_pages - self.pages_processed;
        Some((per_page * remaining as f64).round() as u64)
    }
}

// ============================================================================
// Sync Job Entity
// ============================================================================

/// A sync job with state machine semantics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: SyncJobId,
    /// Requested strategy until started, the resolved one afterwards
    pub sync_type: SyncType,
    pub trigger: TriggerSource,
    /// Optional subset of notebooks to traverse
    pub notebook_ids: Option<Vec<String>>,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
}

impl SyncJob {
    /// Create a new sync job in queued state
    pub fn new(sync_type: SyncType, trigger: TriggerSource) -> Self {
        let now = now_timestamp();
        Self {
            id: SyncJobId::new(),
            sync_type,
            trigger,
            notebook_ids: None,
            status: JobStatus::Queued,
            progress: JobProgress::default(),
            last_error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Restrict the traversal to the given notebooks
    pub fn with_notebooks(mut self, notebook_ids: Vec<String>) -> Self {
        self.notebook_ids = if notebook_ids.is_empty() {
            None
        } else {
            Some(notebook_ids)
        };
        self
    }

    /// Start the job with the concrete strategy the orchestrator will run
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not queued or `resolved` is `Smart`
    pub fn start(mut self, resolved: SyncType) -> Result<Self> {
        self.validate_transition(JobStatus::Running)?;
        if resolved == SyncType::Smart {
            return Err(SyncError::InvalidSyncType(
                "smart must be resolved before a job starts".to_string(),
            ));
        }
        self.sync_type = resolved;
        self.status = JobStatus::Running;
        self.started_at = Some(now_timestamp());
        self.touch();
        Ok(self)
    }

    pub fn pause(mut self) -> Result<Self> {
        self.validate_transition(JobStatus::Paused)?;
        self.status = JobStatus::Paused;
        self.touch();
        Ok(self)
    }

    pub fn resume(mut self) -> Result<Self> {
        if self.status != JobStatus::Paused {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: JobStatus::Running.as_str().to_string(),
                reason: "Only a paused job can be resumed".to_string(),
            });
        }
        self.status = JobStatus::Running;
        self.touch();
        Ok(self)
    }

    pub fn complete(mut self) -> Result<Self> {
        self.validate_transition(JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.progress.estimated_remaining_seconds = None;
        self.finish();
        Ok(self)
    }

    pub fn fail(mut self, message: impl Into<String>) -> Result<Self> {
        self.validate_transition(JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.last_error = Some(message.into());
        self.progress.estimated_remaining_seconds = None;
        self.finish();
        Ok(self)
    }

    pub fn cancel(mut self) -> Result<Self> {
        self.validate_transition(JobStatus::Cancelled)?;
        self.status = JobStatus::Cancelled;
        self.progress.estimated_remaining_seconds = None;
        self.finish();
        Ok(self)
    }

    pub fn can_pause(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Queued | JobStatus::Running | JobStatus::Paused
        )
    }

    /// Set the number of pages this run expects to visit
    pub fn set_total_pages(&mut self, total_pages: u64) -> Result<()> {
        self.ensure_running("set_total_pages")?;
        self.progress.total_pages = total_pages;
        self.touch();
        Ok(())
    }

    /// Count one processed page
    pub fn record_page(&mut self, outcome: PageOutcome) -> Result<()> {
        self.ensure_running("record_page")?;
        self.progress.pages_processed += 1;
        match outcome {
            PageOutcome::Added => self.progress.pages_added += 1,
            PageOutcome::Updated => self.progress.pages_updated += 1,
            PageOutcome::Skipped => self.progress.pages_skipped += 1,
            PageOutcome::Failed => self.progress.error_count += 1,
        }
        self.touch();
        Ok(())
    }

    /// Count pages skipped without a visit (unchanged in an incremental diff)
    pub fn record_skipped(&mut self, count: u64) -> Result<()> {
        self.ensure_running("record_skipped")?;
        self.progress.pages_skipped += count;
        self.progress.pages_processed += count;
        self.touch();
        Ok(())
    }

    pub fn record_deleted(&mut self, count: u64) -> Result<()> {
        self.ensure_running("record_deleted")?;
        self.progress.pages_deleted += count;
        self.touch();
        Ok(())
    }

    /// Record a non-fatal error without counting a page
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.progress.error_count += 1;
        self.last_error = Some(message.into());
        self.touch();
    }

    /// Refresh elapsed time, API call count and the remaining-time estimate
    pub fn update_timing(&mut self, api_calls_made: u64) {
        if let Some(started_at) = self.started_at {
            self.progress.elapsed_seconds = (now_timestamp() - started_at).max(0) as u64;
        }
        self.progress.api_calls_made = api_calls_made;
        self.progress.estimated_remaining_seconds = self.progress.estimate_remaining();
        self.touch();
    }

    /// Get the duration of the job in seconds
    ///
    /// Returns None if the job hasn't started or completed yet
    pub fn duration_secs(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).max(0) as u64),
            _ => None,
        }
    }

    fn finish(&mut self) {
        let now = now_timestamp();
        self.completed_at = Some(now);
        if let Some(started_at) = self.started_at {
            self.progress.elapsed_seconds = (now - started_at).max(0) as u64;
        }
        self.updated_at = now;
    }

    fn touch(&mut self) {
        self.updated_at = now_timestamp();
    }

    fn ensure_running(&self, operation: &str) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: operation.to_string(),
                reason: "Job must be running to update progress".to_string(),
            });
        }
        Ok(())
    }

    /// Validate a state transition
    fn validate_transition(&self, to: JobStatus) -> Result<()> {
        let valid = match (self.status, to) {
            (JobStatus::Queued, JobStatus::Running) => true,
            (JobStatus::Queued, JobStatus::Cancelled) => true,
            (JobStatus::Queued, JobStatus::Failed) => true,

            (JobStatus::Running, JobStatus::Paused) => true,
            (JobStatus::Running, JobStatus::Completed) => true,
            (JobStatus::Running, JobStatus::Failed) => true,
            (JobStatus::Running, JobStatus::Cancelled) => true,

            (JobStatus::Paused, JobStatus::Running) => true,
            (JobStatus::Paused, JobStatus::Failed) => true,
            (JobStatus::Paused, JobStatus::Cancelled) => true,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Views
// ============================================================================

/// Status snapshot returned to pollers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub sync_type: SyncType,
    pub trigger: TriggerSource,
    pub status: JobStatus,
    pub progress_percent: f64,
    pub total_pages: u64,
    pub pages_processed: u64,
    pub pages_added: u64,
    pub pages_updated: u64,
    pub pages_deleted: u64,
    pub pages_skipped: u64,
    pub api_calls_made: u64,
    pub error_count: u64,
    pub elapsed_seconds: u64,
    pub estimated_remaining_seconds: Option<u64>,
    pub can_pause: bool,
    pub can_cancel: bool,
    pub last_error: Option<String>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl From<&SyncJob> for JobStatusView {
    fn from(job: &SyncJob) -> Self {
        Self {
            job_id: job.id.to_string(),
            sync_type: job.sync_type,
            trigger: job.trigger,
            status: job.status,
            progress_percent: job.progress.percent(),
            total_pages: job.progress.total_pages,
            pages_processed: job.progress.pages_processed,
            pages_added: job.progress.pages_added,
            pages_updated: job.progress.pages_updated,
            pages_deleted: job.progress.pages_deleted,
            pages_skipped: job.progress.pages_skipped,
            api_calls_made: job.progress.api_calls_made,
            error_count: job.progress.error_count,
            elapsed_seconds: job.progress.elapsed_seconds,
            estimated_remaining_seconds: job.progress.estimated_remaining_seconds,
            can_pause: job.can_pause(),
            can_cancel: job.can_cancel(),
            last_error: job.last_error.clone(),
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// Summary of a finished sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub job_id: String,
    /// Strategy actually executed (never `Smart`)
    pub sync_type: SyncType,
    pub status: JobStatus,
    pub pages_fetched: u64,
    pub pages_added: u64,
    pub pages_updated: u64,
    pub pages_deleted: u64,
    pub pages_skipped: u64,
    pub api_calls_made: u64,
    pub rate_limit_hits: u64,
    pub total_wait_secs: f64,
    pub error_count: u64,
    /// First error messages, newline separated
    pub error_details: Option<String>,
    pub started_at: i64,
    pub completed_at: i64,
    pub duration_seconds: u64,
}

impl SyncResult {
    /// History status for this outcome
    pub fn history_status(&self) -> HistoryStatus {
        match self.status {
            JobStatus::Completed if self.error_count > 0 => HistoryStatus::PartialSuccess,
            JobStatus::Completed => HistoryStatus::Success,
            JobStatus::Cancelled => HistoryStatus::Cancelled,
            _ => HistoryStatus::Failed,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
