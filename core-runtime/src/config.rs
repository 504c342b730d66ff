//! # Core Configuration Module
//!
//! Provides configuration management for the notesync core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds every dependency and tuning knob the sync engine needs.
//! It enforces fail-fast validation so a misconfigured engine never starts.
//!
//! ## Required Settings
//!
//! - `database_path` - SQLite cache file
//! - `image_dir` - Directory for downloaded page images
//! - A remote source: either a ready `NotebookSource`, or an access token
//!   (the OneNote adapter is then built over the `HttpClient`)
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `HttpClient` - HTTP operations (desktop default: reqwest)
//!
//! When the `desktop-shims` feature is enabled, the reqwest-backed
//! `HttpClient` is injected automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, RateLimitConfig};
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/notes_cache.db")
//!     .image_dir("/data/images")
//!     .access_token(token)
//!     .rate_limit(RateLimitConfig::new().with_requests_per_minute(20.0))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // Missing image directory and remote source
//! let config = CoreConfig::builder()
//!     .database_path("/data/notes_cache.db")
//!     .build()
//!     .expect("Should fail - missing required settings");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{HttpClient, NotebookSource};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Rate limiting
// ============================================================================

/// Stricter pacing applied to binary image downloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePolicy {
    /// Fixed delay between two image downloads of the same page
    pub pacing_ms: u64,
    /// Fallback wait after a 429 on an image endpoint
    pub rate_limit_wait_secs: u64,
    /// Attempts per image before it is skipped
    pub max_attempts: u32,
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self {
            pacing_ms: 3_000,
            rate_limit_wait_secs: 600,
            max_attempts: 3,
        }
    }
}

impl ImagePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pacing_ms(mut self, pacing_ms: u64) -> Self {
        self.pacing_ms = pacing_ms;
        self
    }

    pub fn with_rate_limit_wait_secs(mut self, secs: u64) -> Self {
        self.rate_limit_wait_secs = secs;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.rate_limit_wait_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "Image policy max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Adaptive rate limiter tuning.
///
/// `requests_per_minute` is both the starting rate and the ceiling the limiter
/// climbs back to after throttling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_minute: f64,
    /// Token bucket capacity
    pub burst_size: u32,
    /// Hard minimum gap between two grants, regardless of tokens
    pub min_interval_ms: u64,
    /// Wait after a 429 that carried no `Retry-After`
    pub rate_limit_fallback_secs: u64,
    /// Consecutive successes before the rate is nudged up
    pub success_threshold: u32,
    pub speedup_factor: f64,
    /// Multiplier applied on every 429
    pub rate_limit_factor: f64,
    pub rate_limit_floor_rpm: f64,
    /// Consecutive non-429 errors before the rate is reduced
    pub error_threshold: u32,
    pub error_factor: f64,
    pub error_floor_rpm: f64,
    /// 429 retries per remote call before it counts as a failure
    pub max_rate_limit_retries: u32,
    /// Attempts for 5xx/network failures (first try included)
    pub max_transient_retries: u32,
    /// Base backoff for transient failures, doubled per attempt
    pub transient_backoff_ms: u64,
    pub image_policy: ImagePolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 30.0,
            burst_size: 5,
            min_interval_ms: 1_500,
            rate_limit_fallback_secs: 60,
            success_threshold: 50,
            speedup_factor: 1.1,
            rate_limit_factor: 0.5,
            rate_limit_floor_rpm: 30.0,
            error_threshold: 5,
            error_factor: 0.8,
            error_floor_rpm: 50.0,
            max_rate_limit_retries: 3,
            max_transient_retries: 3,
            transient_backoff_ms: 2_000,
            image_policy: ImagePolicy::default(),
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_requests_per_minute(mut self, rpm: f64) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    pub fn with_burst_size(mut self, burst_size: u32) -> Self {
        self.burst_size = burst_size;
        self
    }

    pub fn with_min_interval_ms(mut self, min_interval_ms: u64) -> Self {
        self.min_interval_ms = min_interval_ms;
        self
    }

    pub fn with_rate_limit_fallback_secs(mut self, secs: u64) -> Self {
        self.rate_limit_fallback_secs = secs;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold;
        self
    }

    pub fn with_max_rate_limit_retries(mut self, retries: u32) -> Self {
        self.max_rate_limit_retries = retries;
        self
    }

    pub fn with_max_transient_retries(mut self, attempts: u32) -> Self {
        self.max_transient_retries = attempts;
        self
    }

    pub fn with_transient_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.transient_backoff_ms = backoff_ms;
        self
    }

    pub fn with_image_policy(mut self, policy: ImagePolicy) -> Self {
        self.image_policy = policy;
        self
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn rate_limit_fallback(&self) -> Duration {
        Duration::from_secs(self.rate_limit_fallback_secs)
    }

    pub fn transient_backoff(&self) -> Duration {
        Duration::from_millis(self.transient_backoff_ms)
    }

    /// Lowest rate a 429 may push the limiter to.
    ///
    /// Never above half the configured rate, so the first 429 always at
    /// least halves throughput.
    pub fn effective_rate_limit_floor(&self) -> f64 {
        self.rate_limit_floor_rpm.min(self.requests_per_minute / 2.0)
    }

    /// Lowest rate repeated server errors may push the limiter to.
    pub fn effective_error_floor(&self) -> f64 {
        self.error_floor_rpm.min(self.requests_per_minute / 2.0)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.requests_per_minute.is_finite() && self.requests_per_minute > 0.0) {
            return Err(Error::Config(
                "requests_per_minute must be a positive number".to_string(),
            ));
        }
        if self.burst_size == 0 {
            return Err(Error::Config("burst_size must be at least 1".to_string()));
        }
        if self.min_interval_ms > 60_000 {
            return Err(Error::Config(
                "min_interval_ms exceeds maximum of 60 seconds (60,000ms)".to_string(),
            ));
        }
        if self.speedup_factor <= 1.0 {
            return Err(Error::Config(
                "speedup_factor must be greater than 1.0".to_string(),
            ));
        }
        for (name, factor) in [
            ("rate_limit_factor", self.rate_limit_factor),
            ("error_factor", self.error_factor),
        ] {
            if !(factor > 0.0 && factor < 1.0) {
                return Err(Error::Config(format!(
                    "{} must be between 0 and 1 (exclusive)",
                    name
                )));
            }
        }
        if self.rate_limit_floor_rpm <= 0.0 || self.error_floor_rpm <= 0.0 {
            return Err(Error::Config(
                "Rate floors must be positive so sync always makes progress".to_string(),
            ));
        }
        if self.success_threshold == 0 || self.error_threshold == 0 {
            return Err(Error::Config(
                "success_threshold and error_threshold must be at least 1".to_string(),
            ));
        }
        if self.max_transient_retries == 0 {
            return Err(Error::Config(
                "max_transient_retries must be at least 1".to_string(),
            ));
        }
        self.image_policy.validate()
    }
}

// ============================================================================
// Sync policy
// ============================================================================

/// Sync orchestration and bookkeeping policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPolicyConfig {
    /// Smart sync runs a full sync when the last one is older than this
    pub full_sync_staleness_days: u32,
    /// Documents not synced within this window count as stale
    pub stale_document_hours: u32,
    /// Window for the recent-failure count in stats
    pub recent_failure_window_hours: u32,
    /// Default number of history entries returned
    pub history_limit: u32,
    /// Time budget of a single background sync; once spent, the run stops at
    /// its next page boundary
    pub sync_timeout_secs: u64,
    /// How long a run past its budget may take to reach a page boundary
    /// before it is torn down
    pub sync_timeout_grace_secs: u64,
    pub event_buffer_size: usize,
}

/// Hard cap on history listings.
pub const MAX_HISTORY_LIMIT: u32 = 100;

impl Default for SyncPolicyConfig {
    fn default() -> Self {
        Self {
            full_sync_staleness_days: 7,
            stale_document_hours: 24,
            recent_failure_window_hours: 24,
            history_limit: 20,
            sync_timeout_secs: 6 * 60 * 60,
            sync_timeout_grace_secs: 10 * 60,
            event_buffer_size: 100,
        }
    }
}

impl SyncPolicyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_full_sync_staleness_days(mut self, days: u32) -> Self {
        self.full_sync_staleness_days = days;
        self
    }

    pub fn with_stale_document_hours(mut self, hours: u32) -> Self {
        self.stale_document_hours = hours;
        self
    }

    pub fn with_recent_failure_window_hours(mut self, hours: u32) -> Self {
        self.recent_failure_window_hours = hours;
        self
    }

    pub fn with_history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_sync_timeout_secs(mut self, secs: u64) -> Self {
        self.sync_timeout_secs = secs;
        self
    }

    pub fn with_sync_timeout_grace_secs(mut self, secs: u64) -> Self {
        self.sync_timeout_grace_secs = secs;
        self
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn sync_timeout_grace(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_grace_secs)
    }

    pub fn full_sync_staleness_secs(&self) -> i64 {
        i64::from(self.full_sync_staleness_days) * 86_400
    }

    pub fn stale_document_secs(&self) -> i64 {
        i64::from(self.stale_document_hours) * 3_600
    }

    pub fn recent_failure_window_secs(&self) -> i64 {
        i64::from(self.recent_failure_window_hours) * 3_600
    }

    pub fn validate(&self) -> Result<()> {
        if self.history_limit == 0 || self.history_limit > MAX_HISTORY_LIMIT {
            return Err(Error::Config(format!(
                "history_limit must be between 1 and {}",
                MAX_HISTORY_LIMIT
            )));
        }
        if self.sync_timeout_secs == 0 {
            return Err(Error::Config(
                "sync_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.sync_timeout_grace_secs == 0 {
            return Err(Error::Config(
                "sync_timeout_grace_secs must be greater than 0".to_string(),
            ));
        }
        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "event_buffer_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Health thresholds
// ============================================================================

/// Thresholds that derive the cache health label and recommendations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// More recent failures than this ⇒ `error`
    pub error_failure_threshold: i64,
    /// More stale documents than this ⇒ `needs_sync`
    pub needs_sync_stale_threshold: i64,
    /// More unindexed documents than this ⇒ re-index recommendation
    pub unindexed_recommendation_threshold: i64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            error_failure_threshold: 5,
            needs_sync_stale_threshold: 100,
            unindexed_recommendation_threshold: 50,
        }
    }
}

impl HealthThresholds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.error_failure_threshold < 0
            || self.needs_sync_stale_threshold < 0
            || self.unindexed_recommendation_threshold < 0
        {
            return Err(Error::Config(
                "Health thresholds cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// CoreConfig
// ============================================================================

/// Core configuration for the notesync engine.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite cache file
    pub database_path: PathBuf,

    /// Root directory for downloaded page images
    pub image_dir: PathBuf,

    /// Ready-made remote source (takes precedence over `access_token`)
    pub notebook_source: Option<Arc<dyn NotebookSource>>,

    /// Bearer token for the OneNote adapter
    pub access_token: Option<String>,

    /// HTTP client for the OneNote adapter
    pub http_client: Option<Arc<dyn HttpClient>>,

    pub rate_limit: RateLimitConfig,
    pub sync_policy: SyncPolicyConfig,
    pub health: HealthThresholds,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("image_dir", &self.image_dir)
            .field(
                "notebook_source",
                &self
                    .notebook_source
                    .as_ref()
                    .map(|_| "NotebookSource { ... }"),
            )
            .field(
                "access_token",
                &self
                    .access_token
                    .as_deref()
                    .map(|token| crate::logging::redact_if_sensitive("access_token", token)),
            )
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .field("rate_limit", &self.rate_limit)
            .field("sync_policy", &self.sync_policy)
            .field("health", &self.health)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.image_dir.as_os_str().is_empty() {
            return Err(Error::Config("Image directory cannot be empty".to_string()));
        }

        if self.notebook_source.is_none() {
            match self.access_token.as_deref() {
                None => return Err(remote_source_missing_error()),
                Some(token) if token.trim().is_empty() => {
                    return Err(Error::Config("Access token cannot be empty".to_string()))
                }
                Some(_) => {}
            }
            if self.http_client.is_none() {
                return Err(http_client_missing_error());
            }
        }

        self.rate_limit.validate()?;
        self.sync_policy.validate()?;
        self.health.validate()
    }
}

fn remote_source_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "NotebookSource".to_string(),
        message: "A remote source is required. Inject one with .notebook_source() \
                  or provide an access token with .access_token() to use the OneNote adapter."
            .to_string(),
    }
}

fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for the OneNote adapter. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default ReqwestHttpClient. \
                 Otherwise inject one with .http_client()."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Option<Arc<dyn HttpClient>>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new().map_err(|e| Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: e.to_string(),
    })?;
    let client: Arc<dyn HttpClient> = Arc::new(client);
    Ok(Some(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Option<Arc<dyn HttpClient>>> {
    Ok(None)
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    image_dir: Option<PathBuf>,
    notebook_source: Option<Arc<dyn NotebookSource>>,
    access_token: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    rate_limit: Option<RateLimitConfig>,
    sync_policy: Option<SyncPolicyConfig>,
    health: Option<HealthThresholds>,
}

impl CoreConfigBuilder {
    /// Sets the SQLite cache path.
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().database_path("/data/notes_cache.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the directory that receives downloaded images.
    pub fn image_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.image_dir = Some(path.into());
        self
    }

    /// Injects a ready remote source (tests, alternative backends).
    pub fn notebook_source(mut self, source: Arc<dyn NotebookSource>) -> Self {
        self.notebook_source = Some(source);
        self
    }

    /// Sets the bearer token used by the OneNote adapter.
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) is used when the
    /// `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    pub fn sync_policy(mut self, config: SyncPolicyConfig) -> Self {
        self.sync_policy = Some(config);
        self
    }

    pub fn health_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.health = Some(thresholds);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - Required paths are missing
    /// - No remote source and no access token
    /// - Any tuning value fails validation
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let image_dir = self.image_dir.ok_or_else(|| {
            Error::Config("Image directory is required. Use .image_dir() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => Some(client),
            None if self.notebook_source.is_none() => provide_default_http_client()?,
            None => None,
        };

        let config = CoreConfig {
            database_path,
            image_dir,
            notebook_source: self.notebook_source,
            access_token: self.access_token,
            http_client,
            rate_limit: self.rate_limit.unwrap_or_default(),
            sync_policy: self.sync_policy.unwrap_or_default(),
            health: self.health.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}
