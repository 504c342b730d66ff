//! # Sync Engine
//!
//! Mirrors a remote notebook hierarchy into the local cache.
//!
//! ## Overview
//!
//! This crate owns everything that happens while a sync runs:
//! - Pacing every remote call under an empirically discovered rate limit
//! - Walking notebooks, sections and pages and diffing them against the cache
//! - Per-page upserts of documents and images with failure isolation
//! - The job lifecycle, its persistence and cooperative pause/cancel
//!
//! ## Components
//!
//! - **Adaptive Rate Limiter** (`rate_limiter`): Self-tuning token bucket shared by all calls
//! - **Remote Gate** (`gate`): Wraps adapter calls with the limiter and the retry policy
//! - **Extraction** (`extract`): Plain text and image references from page HTML
//! - **Sync Job State Machine** (`job`): Job lifecycle with validated state transitions
//! - **Repository** (`repository`): Database persistence for sync jobs
//! - **Control** (`control`): Pause/cancel handle checked between pages
//! - **Sync Orchestrator** (`orchestrator`): Full, incremental and smart strategies
//! - **Sync Coordinator** (`coordinator`): Background execution and the control surface

pub mod control;
pub mod coordinator;
pub mod error;
pub mod extract;
pub mod gate;
pub mod job;
pub mod orchestrator;
pub mod rate_limiter;
pub mod repository;

pub use control::{Checkpoint, SyncControl};
pub use coordinator::{SyncCoordinator, SyncRequest};
pub use error::{Result, SyncError};
pub use gate::{GateStats, RemoteGate};
pub use job::{
    JobProgress, JobStatus, JobStatusView, PageOutcome, SyncJob, SyncJobId, SyncResult,
};
pub use orchestrator::{choose_strategy, SyncOrchestrator};
pub use rate_limiter::{AdaptiveRateLimiter, LimiterPhase, RateLimiterStats};
pub use repository::{SqliteSyncJobRepository, SyncJobRepository, INTERRUPTED_MESSAGE};

pub use core_cache::{SyncType, TriggerSource};
