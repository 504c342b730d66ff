//! # Sync Orchestrator
//!
//! Drives one sync job from start to a terminal state.
//!
//! ## Overview
//!
//! A run walks notebooks → sections → pages through the [`RemoteGate`],
//! diffs the listing against the cache and writes every page as its own
//! idempotent upsert:
//!
//! - **Full**: every listed page is fetched and upserted
//! - **Incremental**: a metadata-only listing is partitioned into unchanged
//!   (skipped), changed/new (fetched) and remote-absent (tombstoned)
//! - **Smart**: resolved to one of the above before the job starts
//!
//! Failing to list notebooks or sections aborts the run. Anything that goes
//! wrong with a single section listing, page or image is counted and the run
//! moves on.
//!
//! Pause and cancel requests arrive through [`SyncControl`] and are honored
//! only between two pages, so the cache always holds whole pages. A run that
//! outlives its time budget stops the same way and ends as failed with
//! [`SyncError::Timeout`].
//!
//! Images of a page are staged next to their slots and only moved into place
//! once the page's document and image rows are written.

use crate::control::{Checkpoint, SyncControl};
use crate::extract::{extract_images, extract_text, is_data_url, ImageRef};
use crate::gate::{GateStats, RemoteGate};
use crate::job::{JobStatus, PageOutcome, SyncJob, SyncJobId, SyncResult};
use crate::rate_limiter::AdaptiveRateLimiter;
use crate::repository::SyncJobRepository;
use crate::{Result, SyncError};
use bridge_traits::{NotebookSource, PageMeta};
use core_cache::{
    now_timestamp, CacheStore, CachedDocument, CachedImage, DocumentSyncInfo, HistoryStatus,
    StagedImage, SyncHistory, SyncState, SyncStatus, SyncType,
};
use core_runtime::config::SyncPolicyConfig;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_runtime::logging::strip_path;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Error summaries kept in the history record
const MAX_ERROR_DETAILS: usize = 10;

// ============================================================================
// Strategy Selection
// ============================================================================

/// Pick the concrete strategy for a requested one
///
/// `Smart` runs a full sync when there has never been one, when the last one
/// is older than `full_sync_staleness_secs`, or when the previous run ended in
/// error; incremental otherwise. `Incremental` without any previous sync
/// timestamp falls back to full.
pub fn choose_strategy(
    requested: SyncType,
    state: Option<&SyncState>,
    now: i64,
    full_sync_staleness_secs: i64,
) -> SyncType {
    match requested {
        SyncType::Full => SyncType::Full,
        SyncType::Incremental => match state.and_then(SyncState::last_sync_at) {
            Some(_) => SyncType::Incremental,
            None => SyncType::Full,
        },
        SyncType::Smart => {
            let Some(state) = state else {
                return SyncType::Full;
            };
            let Some(last_full) = state.last_full_sync_at else {
                return SyncType::Full;
            };
            if now - last_full > full_sync_staleness_secs || state.sync_status == SyncStatus::Error
            {
                SyncType::Full
            } else {
                SyncType::Incremental
            }
        }
    }
}

// ============================================================================
// Run State
// ============================================================================

/// A listed page with the names of its parents
#[derive(Debug, Clone)]
struct PageTarget {
    meta: PageMeta,
    notebook_name: String,
    section_name: String,
}

#[derive(Debug, Default)]
struct RemoteListing {
    pages: Vec<PageTarget>,
    /// Sections whose page listing failed; their cached pages are left alone
    failed_sections: HashSet<String>,
}

/// An image fetched for a page and staged beside its slot
struct FetchedImage {
    row: CachedImage,
    staged: StagedImage,
}

struct Run {
    job: SyncJob,
    control: SyncControl,
    gate: RemoteGate,
    pages_fetched: u64,
    errors: Vec<String>,
}

impl Run {
    /// Count an error that does not fail the current page
    fn record_error(&mut self, message: String) {
        self.job.record_error(message.clone());
        self.errors.push(message);
    }

    fn page_error(&mut self, message: String) {
        self.job.last_error = Some(message.clone());
        self.errors.push(message);
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Collaborators of a sync, constructed once and shared by every run
pub struct SyncOrchestrator {
    cache: CacheStore,
    jobs: Arc<dyn SyncJobRepository>,
    source: Arc<dyn NotebookSource>,
    limiter: Arc<AdaptiveRateLimiter>,
    event_bus: Arc<EventBus>,
    policy: SyncPolicyConfig,
}

impl SyncOrchestrator {
    pub fn new(
        cache: CacheStore,
        jobs: Arc<dyn SyncJobRepository>,
        source: Arc<dyn NotebookSource>,
        limiter: Arc<AdaptiveRateLimiter>,
        event_bus: Arc<EventBus>,
        policy: SyncPolicyConfig,
    ) -> Self {
        Self {
            cache,
            jobs,
            source,
            limiter,
            event_bus,
            policy,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn jobs(&self) -> &Arc<dyn SyncJobRepository> {
        &self.jobs
    }

    pub fn limiter(&self) -> &Arc<AdaptiveRateLimiter> {
        &self.limiter
    }

    pub fn policy(&self) -> &SyncPolicyConfig {
        &self.policy
    }

    /// Resolve `requested` against the current global sync state
    pub async fn resolve_strategy(&self, requested: SyncType) -> Result<SyncType> {
        let state = self.cache.sync_state.get_global().await?;
        Ok(choose_strategy(
            requested,
            state.as_ref(),
            now_timestamp(),
            self.policy.full_sync_staleness_secs(),
        ))
    }

    /// Run a queued job to a terminal state
    ///
    /// The job must already be persisted. Traversal failures end the job as
    /// `failed` and are reported in the returned result; an `Err` means the
    /// outcome itself could not be recorded.
    #[instrument(skip(self, job, control), fields(job_id = %job.id, requested = %job.sync_type))]
    pub async fn run(&self, job: SyncJob, control: SyncControl) -> Result<SyncResult> {
        let gate = RemoteGate::new(Arc::clone(&self.source), Arc::clone(&self.limiter));
        let mut run = Run {
            job,
            control,
            gate,
            pages_fetched: 0,
            errors: Vec::new(),
        };

        let outcome = self.execute(&mut run).await;
        self.finalize(run, outcome).await
    }

    /// Fail a job whose run was torn down before it could finish
    ///
    /// Does nothing if the job already reached a terminal state.
    pub async fn abandon(&self, job_id: &SyncJobId, message: &str) -> Result<()> {
        let job = self
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| SyncError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        if job.status.is_terminal() {
            return Ok(());
        }

        warn!(job_id = %job_id, message, "Abandoning sync job");
        let job = job.fail(message)?;
        let result = self.build_result(&job, GateStats::default(), 0, &[message.to_string()]);
        self.record_outcome(&job, &result).await?;
        Ok(())
    }

    async fn execute(&self, run: &mut Run) -> Result<()> {
        let resolved = self.resolve_strategy(run.job.sync_type).await?;

        if run.control.is_cancelled() {
            run.job.sync_type = resolved;
            return Err(self.stop_error(&run.control));
        }

        run.job = run.job.clone().start(resolved)?;
        self.jobs.update(&run.job).await?;
        self.update_state(|state| {
            state.sync_status = SyncStatus::Syncing;
        })
        .await?;

        info!(sync_type = %resolved, trigger = %run.job.trigger, "Sync started");
        self.emit(SyncEvent::Started {
            job_id: run.job.id.to_string(),
            sync_type: resolved.to_string(),
            trigger: run.job.trigger.to_string(),
        });

        match resolved {
            SyncType::Full => self.sync_full(run).await,
            SyncType::Incremental => self.sync_incremental(run).await,
            SyncType::Smart => Err(SyncError::InvalidSyncType(
                "smart sync was not resolved".to_string(),
            )),
        }
    }

    async fn sync_full(&self, run: &mut Run) -> Result<()> {
        let listing = self.list_remote(run).await?;
        let index = self.cache.documents.sync_index().await?;

        run.job.set_total_pages(listing.pages.len() as u64)?;
        self.report_progress(run).await?;

        self.process_pages(run, listing.pages, &index).await
    }

    async fn sync_incremental(&self, run: &mut Run) -> Result<()> {
        let listing = self.list_remote(run).await?;
        let index = self.cache.documents.sync_index().await?;

        let remote_ids: HashSet<&str> = listing.pages.iter().map(|p| p.meta.id.as_str()).collect();
        let scope: Option<HashSet<&str>> = run
            .job
            .notebook_ids
            .as_ref()
            .map(|ids| ids.iter().map(String::as_str).collect());

        let removed: Vec<String> = index
            .values()
            .filter(|info| !info.is_deleted)
            .filter(|info| !remote_ids.contains(info.page_id.as_str()))
            .filter(|info| !listing.failed_sections.contains(&info.section_id))
            .filter(|info| {
                scope
                    .as_ref()
                    .map_or(true, |scope| scope.contains(info.notebook_id.as_str()))
            })
            .map(|info| info.page_id.clone())
            .collect();

        let total = listing.pages.len() as u64;
        let (changed, unchanged): (Vec<PageTarget>, Vec<PageTarget>) = listing
            .pages
            .into_iter()
            .partition(|target| needs_fetch(index.get(&target.meta.id), &target.meta));

        info!(
            total,
            changed = changed.len(),
            unchanged = unchanged.len(),
            removed = removed.len(),
            "Incremental diff computed"
        );

        run.job.set_total_pages(total)?;
        run.job.record_skipped(unchanged.len() as u64)?;

        if !removed.is_empty() {
            let tombstoned = self.cache.documents.mark_deleted(&removed).await?;
            run.job.record_deleted(tombstoned)?;
        }
        self.report_progress(run).await?;

        self.process_pages(run, changed, &index).await
    }

    /// Metadata pass over the hierarchy
    async fn list_remote(&self, run: &mut Run) -> Result<RemoteListing> {
        let mut notebooks = run.gate.list_notebooks().await?;
        if let Some(wanted) = &run.job.notebook_ids {
            notebooks.retain(|notebook| wanted.contains(&notebook.id));
        }
        debug!(notebooks = notebooks.len(), "Listed notebooks");

        let mut listing = RemoteListing::default();
        for notebook in notebooks {
            let sections = run.gate.list_sections(&notebook.id).await?;
            debug!(notebook_id = %notebook.id, sections = sections.len(), "Listed sections");

            for section in sections {
                self.checkpoint(run).await?;

                let listed = run.gate.list_pages(&section.id).await;
                match listed {
                    Ok(pages) => {
                        // The traversal is authoritative for placement
                        listing.pages.extend(pages.into_iter().map(|mut meta| {
                            meta.notebook_id.clone_from(&notebook.id);
                            meta.section_id.clone_from(&section.id);
                            PageTarget {
                                meta,
                                notebook_name: notebook.display_name.clone(),
                                section_name: section.display_name.clone(),
                            }
                        }));
                    }
                    Err(e) => {
                        error!(section_id = %section.id, error = %e, "Failed to list pages");
                        run.record_error(format!("Section {}: {}", section.display_name, e));
                        listing.failed_sections.insert(section.id.clone());
                    }
                }
            }
        }

        Ok(listing)
    }

    async fn process_pages(
        &self,
        run: &mut Run,
        targets: Vec<PageTarget>,
        index: &HashMap<String, DocumentSyncInfo>,
    ) -> Result<()> {
        for target in targets {
            self.checkpoint(run).await?;

            let page_id = target.meta.id.clone();
            let synced = self.sync_page(run, &target, index.get(&page_id)).await;
            let outcome = match synced {
                Ok(outcome) => {
                    run.pages_fetched += 1;
                    outcome
                }
                Err(e) => {
                    error!(page_id = %page_id, error = %e, "Failed to sync page");
                    run.page_error(format!("Page {}: {}", page_id, e));
                    PageOutcome::Failed
                }
            };

            run.job.record_page(outcome)?;
            self.report_progress(run).await?;
        }

        Ok(())
    }

    /// Fetch one page and write it with its images
    async fn sync_page(
        &self,
        run: &mut Run,
        target: &PageTarget,
        cached: Option<&DocumentSyncInfo>,
    ) -> Result<PageOutcome> {
        let meta = &target.meta;
        let is_new = cached.map_or(true, |info| info.is_deleted);

        let html = match run.gate.get_page_content(&meta.id).await? {
            Some(html) => html,
            None => {
                warn!(page_id = %meta.id, "Page returned no content");
                String::new()
            }
        };
        let plain_text = extract_text(&html);
        let image_refs = extract_images(&html);

        let cached_images = self.cache.images.find_by_page(&meta.id).await?;
        let reuse_images =
            !is_new && !cached_images.is_empty() && cached_images.len() == image_refs.len();

        let fetched = if reuse_images {
            debug!(page_id = %meta.id, count = cached_images.len(), "Reusing cached images");
            None
        } else {
            Some(self.download_images(run, &meta.id, &image_refs).await)
        };

        let mut document = CachedDocument::new(
            meta.id.clone(),
            meta.notebook_id.clone(),
            meta.section_id.clone(),
            meta.title.clone(),
        );
        document.html_content = html;
        document.plain_text = Some(plain_text);
        document.notebook_name = Some(target.notebook_name.clone());
        document.section_name = Some(target.section_name.clone());
        document.author = meta.author.clone();
        document.created_date = meta.created_at;
        document.modified_date = meta.modified_at;
        document.source_url = meta.web_url.clone();
        document.image_count = fetched.as_ref().map_or(cached_images.len(), Vec::len) as i64;

        if let Err(e) = self.write_page(&document, fetched.as_deref()).await {
            if let Some(fetched) = &fetched {
                self.discard_images(fetched).await;
            }
            return Err(e);
        }
        if let Some(fetched) = &fetched {
            self.commit_images(&meta.id, fetched, &cached_images).await;
        }

        Ok(if is_new {
            PageOutcome::Added
        } else {
            PageOutcome::Updated
        })
    }

    /// Write the document row, then its image rows when they were refetched
    async fn write_page(
        &self,
        document: &CachedDocument,
        fetched: Option<&[FetchedImage]>,
    ) -> Result<()> {
        self.cache.documents.upsert(document).await?;

        if let Some(fetched) = fetched {
            let rows: Vec<CachedImage> = fetched.iter().map(|image| image.row.clone()).collect();
            self.cache
                .images
                .replace_for_page(&document.page_id, &rows)
                .await?;
        }
        Ok(())
    }

    /// Download and stage the images of a page, skipping any that fail
    async fn download_images(
        &self,
        run: &mut Run,
        page_id: &str,
        image_refs: &[ImageRef],
    ) -> Vec<FetchedImage> {
        let policy = &self.limiter.config().image_policy;
        let mut fetched = Vec::with_capacity(image_refs.len());

        for (position, image_ref) in image_refs.iter().enumerate() {
            let Some(url) = image_ref.download_url() else {
                debug!(page_id, position, "Image without a source");
                continue;
            };

            let downloaded = run.gate.download_image(url, policy).await;
            let bytes = match downloaded {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    debug!(page_id, position, "Image returned no data");
                    continue;
                }
                Err(e) => {
                    warn!(page_id, position, error = %e, "Failed to download image, skipping it");
                    run.record_error(format!("Image {} of page {}: {}", position, page_id, e));
                    continue;
                }
            };

            let index = fetched.len() as i64;
            let staged = match self.cache.image_store.stage(page_id, index, &bytes).await {
                Ok(staged) => staged,
                Err(e) => {
                    warn!(page_id, index, error = %e, "Failed to store image, skipping it");
                    run.record_error(format!("Image {} of page {}: {}", position, page_id, e));
                    continue;
                }
            };

            let stored = &staged.image;
            let mut row = CachedImage::new(page_id, index, stored.relative_path.clone());
            row.file_size_bytes = Some(stored.size_bytes);
            row.mime_type = Some(stored.mime_type.clone());
            row.content_hash = Some(stored.content_hash.clone());
            row.alt_text = image_ref.alt.clone();
            row.resource_url = (!is_data_url(url)).then(|| url.to_string());
            fetched.push(FetchedImage { row, staged });
        }

        fetched
    }

    /// Move staged images into their slots and drop files no row points at
    async fn commit_images(&self, page_id: &str, fetched: &[FetchedImage], previous: &[CachedImage]) {
        for image in fetched {
            match self.cache.image_store.commit(&image.staged).await {
                Ok(()) => debug!(page_id, file = strip_path(&image.row.file_path), "Stored image"),
                Err(e) => error!(
                    page_id,
                    file = strip_path(&image.row.file_path),
                    error = %e,
                    "Failed to move image into place"
                ),
            }
        }

        let kept: HashSet<&str> = fetched.iter().map(|image| image.row.file_path.as_str()).collect();
        for stale in previous.iter().filter(|image| !kept.contains(image.file_path.as_str())) {
            match self.cache.image_store.remove(&stale.file_path).await {
                Ok(()) => debug!(page_id, file = strip_path(&stale.file_path), "Removed stale image"),
                Err(e) => warn!(
                    page_id,
                    file = strip_path(&stale.file_path),
                    error = %e,
                    "Failed to remove stale image file"
                ),
            }
        }
    }

    async fn discard_images(&self, fetched: &[FetchedImage]) {
        for image in fetched {
            if let Err(e) = self.cache.image_store.discard(&image.staged).await {
                warn!(
                    file = strip_path(image.staged.staging_path()),
                    error = %e,
                    "Failed to discard staged image"
                );
            }
        }
    }

    /// Honor pause, cancel and expiry at a page boundary
    ///
    /// Fails with `Cancelled` or `Timeout` when the run must stop.
    async fn checkpoint(&self, run: &mut Run) -> Result<()> {
        match run.control.checkpoint() {
            Checkpoint::Continue => Ok(()),
            Checkpoint::Expire => {
                warn!(job_id = %run.job.id, "Time budget spent, stopping");
                Err(self.stop_error(&run.control))
            }
            Checkpoint::Cancel => {
                info!(job_id = %run.job.id, "Cancellation requested");
                Err(SyncError::Cancelled)
            }
            Checkpoint::Pause => {
                run.job = run.job.clone().pause()?;
                self.jobs.update(&run.job).await?;
                self.update_state(|state| state.sync_status = SyncStatus::Paused)
                    .await?;
                info!(job_id = %run.job.id, "Sync paused");
                self.emit(SyncEvent::Paused {
                    job_id: run.job.id.to_string(),
                    pages_processed: run.job.progress.pages_processed,
                });

                if !run.control.wait_while_paused().await {
                    info!(job_id = %run.job.id, "Stopped while paused");
                    return Err(self.stop_error(&run.control));
                }

                run.job = run.job.clone().resume()?;
                self.jobs.update(&run.job).await?;
                self.update_state(|state| state.sync_status = SyncStatus::Syncing)
                    .await?;
                info!(job_id = %run.job.id, "Sync resumed");
                self.emit(SyncEvent::Resumed {
                    job_id: run.job.id.to_string(),
                });
                Ok(())
            }
        }
    }

    fn stop_error(&self, control: &SyncControl) -> SyncError {
        if control.is_expired() {
            SyncError::Timeout(self.policy.sync_timeout_secs)
        } else {
            SyncError::Cancelled
        }
    }

    async fn report_progress(&self, run: &mut Run) -> Result<()> {
        run.job.update_timing(run.gate.stats().api_calls);
        self.jobs.update(&run.job).await?;

        let progress = &run.job.progress;
        self.emit(SyncEvent::Progress {
            job_id: run.job.id.to_string(),
            pages_processed: progress.pages_processed,
            total_pages: progress.total_pages,
            percent: progress.percent(),
            estimated_remaining_secs: progress.estimated_remaining_seconds,
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------------

    async fn finalize(&self, mut run: Run, outcome: Result<()>) -> Result<SyncResult> {
        let stats = run.gate.stats();
        run.job.update_timing(stats.api_calls);

        let job = match outcome {
            Ok(()) => run.job.complete()?,
            Err(SyncError::Cancelled) => run.job.cancel()?,
            Err(e) => {
                error!(job_id = %run.job.id, error = %e, "Sync failed");
                let message = e.to_string();
                run.errors.push(message.clone());
                run.job.fail(message)?
            }
        };

        let result = self.build_result(&job, stats, run.pages_fetched, &run.errors);
        self.record_outcome(&job, &result).await?;
        Ok(result)
    }

    fn build_result(
        &self,
        job: &SyncJob,
        stats: GateStats,
        pages_fetched: u64,
        errors: &[String],
    ) -> SyncResult {
        let completed_at = job.completed_at.unwrap_or_else(now_timestamp);
        let started_at = job.started_at.unwrap_or(job.created_at);
        let error_details = (!errors.is_empty()).then(|| {
            errors
                .iter()
                .take(MAX_ERROR_DETAILS)
                .cloned()
                .collect::<Vec<_>>()
                .join("; ")
        });

        SyncResult {
            job_id: job.id.to_string(),
            sync_type: job.sync_type,
            status: job.status,
            pages_fetched,
            pages_added: job.progress.pages_added,
            pages_updated: job.progress.pages_updated,
            pages_deleted: job.progress.pages_deleted,
            pages_skipped: job.progress.pages_skipped,
            api_calls_made: stats.api_calls.max(job.progress.api_calls_made),
            rate_limit_hits: stats.rate_limit_hits,
            total_wait_secs: stats.total_wait.as_secs_f64(),
            error_count: job.progress.error_count,
            error_details,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).max(0) as u64,
        }
    }

    /// Persist the terminal job, append history, update the global state and
    /// emit the closing event
    async fn record_outcome(&self, job: &SyncJob, result: &SyncResult) -> Result<()> {
        self.jobs.update(job).await?;

        let status = result.history_status();
        let mut history = SyncHistory::new(result.sync_type, status, result.started_at);
        history.job_id = Some(result.job_id.clone());
        history.completed_at = Some(result.completed_at);
        history.duration_seconds = Some(result.duration_seconds as i64);
        history.notebook_id = match job.notebook_ids.as_deref() {
            Some([only]) => Some(only.clone()),
            _ => None,
        };
        history.pages_fetched = result.pages_fetched as i64;
        history.pages_added = result.pages_added as i64;
        history.pages_updated = result.pages_updated as i64;
        history.pages_deleted = result.pages_deleted as i64;
        history.pages_skipped = result.pages_skipped as i64;
        history.api_calls_made = result.api_calls_made as i64;
        history.errors_encountered = result.error_count as i64;
        history.error_details = result.error_details.clone();
        history.total_wait_time_seconds = result.total_wait_secs;
        history.rate_limit_hits = result.rate_limit_hits as i64;
        history.triggered_by = Some(job.trigger);
        self.cache.history.append(&history).await?;

        self.update_state(|state| match status {
            HistoryStatus::Success | HistoryStatus::PartialSuccess => {
                state.sync_status = SyncStatus::Completed;
                match result.sync_type {
                    SyncType::Incremental => {
                        state.last_incremental_sync_at = Some(result.completed_at)
                    }
                    _ => state.last_full_sync_at = Some(result.completed_at),
                }
                state.total_pages_synced = result.pages_fetched as i64;
                state.pages_added_last_sync = result.pages_added as i64;
                state.pages_updated_last_sync = result.pages_updated as i64;
                state.pages_deleted_last_sync = result.pages_deleted as i64;
                state.last_sync_duration_seconds = Some(result.duration_seconds as i64);
                state.api_calls_last_sync = result.api_calls_made as i64;
                state.last_sync_error = result.error_details.clone();
            }
            HistoryStatus::Cancelled => {
                state.sync_status = SyncStatus::Idle;
            }
            HistoryStatus::Failed => {
                state.sync_status = SyncStatus::Error;
                state.last_sync_error = job.last_error.clone();
                state.api_calls_last_sync = result.api_calls_made as i64;
            }
        })
        .await?;

        let job_id = result.job_id.clone();
        match job.status {
            JobStatus::Completed => {
                info!(
                    job_id = %job_id,
                    added = result.pages_added,
                    updated = result.pages_updated,
                    deleted = result.pages_deleted,
                    skipped = result.pages_skipped,
                    errors = result.error_count,
                    duration_secs = result.duration_seconds,
                    "Sync completed"
                );
                self.emit(SyncEvent::Completed {
                    job_id,
                    pages_added: result.pages_added,
                    pages_updated: result.pages_updated,
                    pages_deleted: result.pages_deleted,
                    pages_skipped: result.pages_skipped,
                    error_count: result.error_count,
                    duration_secs: result.duration_seconds,
                });
            }
            JobStatus::Cancelled => {
                info!(job_id = %job_id, pages_processed = job.progress.pages_processed, "Sync cancelled");
                self.emit(SyncEvent::Cancelled {
                    job_id,
                    pages_processed: job.progress.pages_processed,
                });
            }
            _ => {
                self.emit(SyncEvent::Failed {
                    job_id,
                    message: job.last_error.clone().unwrap_or_default(),
                    pages_processed: job.progress.pages_processed,
                });
            }
        }

        Ok(())
    }

    async fn update_state<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut SyncState),
    {
        let mut state = self
            .cache
            .sync_state
            .get_global()
            .await?
            .unwrap_or_else(SyncState::global);
        apply(&mut state);
        state.updated_at = now_timestamp();
        self.cache.sync_state.upsert(&state).await?;
        Ok(())
    }

    fn emit(&self, event: SyncEvent) {
        self.event_bus.emit(CoreEvent::Sync(event)).ok();
    }
}

/// Whether a listed page must be fetched
///
/// Only a strictly newer remote modification time counts as a change; equal
/// timestamps are treated as unchanged content.
fn needs_fetch(cached: Option<&DocumentSyncInfo>, remote: &PageMeta) -> bool {
    let Some(cached) = cached else {
        return true;
    };
    if cached.is_deleted {
        return true;
    }
    match (cached.modified_date, remote.modified_at) {
        (Some(cached), Some(remote)) => remote > cached,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 24 * 60 * 60;

    fn state_with(last_full: Option<i64>, status: SyncStatus) -> SyncState {
        let mut state = SyncState::global();
        state.last_full_sync_at = last_full;
        state.sync_status = status;
        state
    }

    fn info(modified: Option<i64>, is_deleted: bool) -> DocumentSyncInfo {
        DocumentSyncInfo {
            page_id: "p1".to_string(),
            notebook_id: "nb".to_string(),
            section_id: "sec".to_string(),
            modified_date: modified,
            is_deleted,
        }
    }

    fn meta(modified: Option<i64>) -> PageMeta {
        PageMeta {
            id: "p1".to_string(),
            title: "Page".to_string(),
            created_at: None,
            modified_at: modified,
            author: None,
            web_url: None,
            section_id: "sec".to_string(),
            notebook_id: "nb".to_string(),
        }
    }

    #[test]
    fn test_smart_without_state_is_full() {
        assert_eq!(choose_strategy(SyncType::Smart, None, 1000, 7 * DAY), SyncType::Full);
        let never = state_with(None, SyncStatus::Completed);
        assert_eq!(
            choose_strategy(SyncType::Smart, Some(&never), 1000, 7 * DAY),
            SyncType::Full
        );
    }

    #[test]
    fn test_smart_with_recent_full_sync_is_incremental() {
        let now = 100 * DAY;
        let state = state_with(Some(now - DAY), SyncStatus::Completed);
        assert_eq!(
            choose_strategy(SyncType::Smart, Some(&state), now, 7 * DAY),
            SyncType::Incremental
        );
    }

    #[test]
    fn test_smart_with_stale_or_failed_state_is_full() {
        let now = 100 * DAY;
        let stale = state_with(Some(now - 8 * DAY), SyncStatus::Completed);
        assert_eq!(
            choose_strategy(SyncType::Smart, Some(&stale), now, 7 * DAY),
            SyncType::Full
        );

        let failed = state_with(Some(now - DAY), SyncStatus::Error);
        assert_eq!(
            choose_strategy(SyncType::Smart, Some(&failed), now, 7 * DAY),
            SyncType::Full
        );
    }

    #[test]
    fn test_incremental_without_history_falls_back_to_full() {
        assert_eq!(
            choose_strategy(SyncType::Incremental, None, 0, 7 * DAY),
            SyncType::Full
        );
        let mut state = SyncState::global();
        state.last_incremental_sync_at = Some(10);
        assert_eq!(
            choose_strategy(SyncType::Incremental, Some(&state), 20, 7 * DAY),
            SyncType::Incremental
        );
    }

    #[test]
    fn test_needs_fetch() {
        assert!(needs_fetch(None, &meta(Some(10))));
        assert!(needs_fetch(Some(&info(Some(10), false)), &meta(Some(11))));
        assert!(!needs_fetch(Some(&info(Some(10), false)), &meta(Some(10))));
        assert!(!needs_fetch(Some(&info(Some(12), false)), &meta(Some(10))));
        assert!(needs_fetch(Some(&info(Some(10), true)), &meta(Some(10))));
        assert!(needs_fetch(Some(&info(None, false)), &meta(Some(10))));
        assert!(needs_fetch(Some(&info(Some(10), false)), &meta(None)));
    }
}
