//! Core service façade and bootstrap helpers.
//!
//! This crate wires a [`CoreConfig`] into a running sync engine: it opens the
//! cache, picks the remote source (an injected [`NotebookSource`] or the
//! OneNote adapter over the configured HTTP client), builds the shared rate
//! limiter and event bus, and exposes the control surface host applications
//! call: trigger, poll, pause, resume, cancel, stats, health and history.
//!
//! Desktop hosts enable the `desktop-shims` feature, which supplies the
//! reqwest-based HTTP client when none is injected.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::{CoreService, SyncType, TriggerSource};
//!
//! let config = CoreConfig::builder()
//!     .database_path("data/notes_cache.db")
//!     .image_dir("data/images")
//!     .access_token(token)
//!     .build()?;
//!
//! let core = CoreService::bootstrap(config).await?;
//! let job_id = core.trigger_sync(SyncType::Smart, TriggerSource::Manual).await?;
//! let status = core.job_status(&job_id.to_string()).await?;
//! ```

pub mod error;
pub mod health;

pub use error::{CoreError, Result};
pub use health::{HealthReport, HealthStatus};

pub use core_cache::{CacheStats, SyncHistory, SyncType, TriggerSource};
pub use core_sync::{JobStatusView, RateLimiterStats, SyncJobId, SyncRequest};

use std::sync::Arc;

use bridge_traits::source::NotebookSource;
use core_cache::{now_timestamp, CacheStore, StatsOptions};
use core_runtime::config::{CoreConfig, HealthThresholds, SyncPolicyConfig};
use core_runtime::events::{CoreEvent, EventBus};
use core_sync::{
    AdaptiveRateLimiter, SqliteSyncJobRepository, SyncCoordinator, SyncJobRepository,
    SyncOrchestrator,
};
use provider_onenote::OneNoteConnector;
use tokio::sync::broadcast;
use tracing::{info, instrument};

/// Largest history page a caller may request
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    cache: CacheStore,
    coordinator: Arc<SyncCoordinator>,
    limiter: Arc<AdaptiveRateLimiter>,
    event_bus: Arc<EventBus>,
    policy: SyncPolicyConfig,
    health: HealthThresholds,
}

impl CoreService {
    /// Open the cache at the configured path and start the engine.
    ///
    /// Jobs a previous process left running are failed here.
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        let cache = CacheStore::open(&config.database_path, &config.image_dir).await?;
        Self::with_cache(config, cache).await
    }

    /// Start the engine over an already opened cache.
    pub async fn with_cache(config: CoreConfig, cache: CacheStore) -> Result<Self> {
        config.validate()?;
        let source = resolve_source(&config)?;

        let event_bus = Arc::new(EventBus::new(config.sync_policy.event_buffer_size));
        let limiter = Arc::new(
            AdaptiveRateLimiter::new(config.rate_limit.clone())?
                .with_event_bus(Arc::clone(&event_bus)),
        );
        let jobs: Arc<dyn SyncJobRepository> =
            Arc::new(SqliteSyncJobRepository::new(cache.pool().clone()));

        let orchestrator = Arc::new(SyncOrchestrator::new(
            cache.clone(),
            jobs,
            source,
            Arc::clone(&limiter),
            Arc::clone(&event_bus),
            config.sync_policy.clone(),
        ));
        let coordinator = Arc::new(SyncCoordinator::new(orchestrator).await?);

        info!(
            database = %config.database_path.display(),
            requests_per_minute = config.rate_limit.requests_per_minute,
            "Core service ready"
        );

        Ok(Self {
            cache,
            coordinator,
            limiter,
            event_bus,
            policy: config.sync_policy,
            health: config.health,
        })
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    // ========================================================================
    // Sync control
    // ========================================================================

    /// Start a sync in the background and return its job id.
    #[instrument(skip(self))]
    pub async fn trigger_sync(
        &self,
        sync_type: SyncType,
        trigger: TriggerSource,
    ) -> Result<SyncJobId> {
        self.trigger(SyncRequest::new(sync_type, trigger)).await
    }

    pub async fn trigger(&self, request: SyncRequest) -> Result<SyncJobId> {
        Ok(self.coordinator.start_sync(request).await?)
    }

    /// Current status of a job
    ///
    /// # Errors
    ///
    /// `InvalidJobId` for malformed ids, `JobNotFound` for unknown ones
    pub async fn job_status(&self, job_id: &str) -> Result<JobStatusView> {
        let id = SyncJobId::from_string(job_id)?;
        let job = self.coordinator.get_job(&id).await?;
        Ok(JobStatusView::from(&job))
    }

    /// Status of the active job, if any
    pub async fn current_job(&self) -> Result<Option<JobStatusView>> {
        match self.coordinator.current_job_id().await {
            Some(id) => {
                let job = self.coordinator.get_job(&id).await?;
                Ok(Some(JobStatusView::from(&job)))
            }
            None => Ok(None),
        }
    }

    pub async fn recent_jobs(&self, limit: u32) -> Result<Vec<JobStatusView>> {
        let jobs = self
            .coordinator
            .recent_jobs(limit.clamp(1, MAX_HISTORY_LIMIT))
            .await?;
        Ok(jobs.iter().map(JobStatusView::from).collect())
    }

    pub async fn pause_sync(&self) -> Result<SyncJobId> {
        Ok(self.coordinator.pause_current().await?)
    }

    pub async fn resume_sync(&self) -> Result<SyncJobId> {
        Ok(self.coordinator.resume_current().await?)
    }

    pub async fn cancel_sync(&self) -> Result<SyncJobId> {
        Ok(self.coordinator.cancel_current().await?)
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<()> {
        let id = SyncJobId::from_string(job_id)?;
        Ok(self.coordinator.cancel_job(&id).await?)
    }

    pub async fn is_sync_active(&self) -> bool {
        self.coordinator.is_sync_active().await
    }

    // ========================================================================
    // Observability
    // ========================================================================

    fn stats_options(&self) -> StatsOptions {
        StatsOptions {
            stale_after_secs: self.policy.stale_document_secs(),
            failure_window_secs: self.policy.recent_failure_window_secs(),
            error_failure_threshold: self.health.error_failure_threshold,
            needs_sync_stale_threshold: self.health.needs_sync_stale_threshold,
        }
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        Ok(self.cache.stats(&self.stats_options()).await?)
    }

    pub async fn health_report(&self) -> Result<HealthReport> {
        let stats = self.cache_stats().await?;
        Ok(health::assess(
            &stats,
            &self.health,
            self.policy.full_sync_staleness_secs(),
            now_timestamp(),
        ))
    }

    /// Recent sync attempts, newest first
    ///
    /// `None` uses the configured default; explicit limits are clamped to
    /// `1..=100`.
    pub async fn sync_history(&self, limit: Option<u32>) -> Result<Vec<SyncHistory>> {
        let limit = limit
            .unwrap_or(self.policy.history_limit)
            .clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.cache.history.recent(i64::from(limit)).await?)
    }

    pub async fn rate_limiter_stats(&self) -> RateLimiterStats {
        self.limiter.stats().await
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }
}

fn resolve_source(config: &CoreConfig) -> Result<Arc<dyn NotebookSource>> {
    if let Some(source) = &config.notebook_source {
        return Ok(Arc::clone(source));
    }

    let token = config
        .access_token
        .clone()
        .ok_or_else(|| CoreError::CapabilityMissing {
            capability: "NotebookSource".to_string(),
            message: "No remote source and no access token configured".to_string(),
        })?;
    let http_client = config
        .http_client
        .clone()
        .ok_or_else(|| CoreError::CapabilityMissing {
            capability: "HttpClient".to_string(),
            message: "The OneNote adapter needs an HTTP client".to_string(),
        })?;

    Ok(Arc::new(OneNoteConnector::new(http_client, token)))
}
