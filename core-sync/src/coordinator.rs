//! # Sync Coordinator
//!
//! Runs sync jobs in the background and exposes the control surface.
//!
//! ## Overview
//!
//! Triggering a sync persists a queued job, spawns a task that hands it to
//! the [`SyncOrchestrator`] and returns the job id right away. Callers poll
//! the job by id. At most one job is active per coordinator; a second
//! trigger while one is active fails with [`SyncError::SyncInProgress`].
//!
//! Pause, resume and cancel only flip the [`SyncControl`] of the active job.
//! The orchestrator task is the only writer of job status, so a request is
//! reflected in the job record once the current page has been committed.
//!
//! The whole run is bounded by the configured sync timeout. A run that hits
//! it is asked to stop at its next page boundary and ends as failed. Only a
//! run still busy after the grace period is torn down; its job is then
//! failed by the coordinator.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncCoordinator, TriggerSource};
//!
//! let coordinator = SyncCoordinator::new(orchestrator).await?;
//! let job_id = coordinator.start_smart(TriggerSource::Manual).await?;
//!
//! let job = coordinator.get_job(&job_id).await?;
//! println!("Progress: {}%", job.progress.percent());
//!
//! coordinator.cancel_current().await?;
//! ```

use crate::control::SyncControl;
use crate::job::{SyncJob, SyncJobId};
use crate::orchestrator::SyncOrchestrator;
use crate::repository::SyncJobRepository;
use crate::{Result, SyncError};
use core_cache::{SyncType, TriggerSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

/// Parameters of a sync trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub sync_type: SyncType,
    pub trigger: TriggerSource,
    /// Restrict the traversal to these notebooks; empty means all
    pub notebook_ids: Vec<String>,
}

impl SyncRequest {
    pub fn new(sync_type: SyncType, trigger: TriggerSource) -> Self {
        Self {
            sync_type,
            trigger,
            notebook_ids: Vec::new(),
        }
    }

    pub fn with_notebooks(mut self, notebook_ids: Vec<String>) -> Self {
        self.notebook_ids = notebook_ids;
        self
    }
}

/// Active sync job tracking
#[derive(Debug, Clone)]
struct ActiveSync {
    job_id: SyncJobId,
    control: SyncControl,
}

/// Background runner and control surface for sync jobs
pub struct SyncCoordinator {
    orchestrator: Arc<SyncOrchestrator>,
    jobs: Arc<dyn SyncJobRepository>,
    sync_timeout: Duration,
    sync_timeout_grace: Duration,
    active: Arc<Mutex<Option<ActiveSync>>>,
}

impl SyncCoordinator {
    /// Create a coordinator and fail jobs a previous process left active
    ///
    /// # Errors
    ///
    /// Returns an error if the job table cannot be updated
    pub async fn new(orchestrator: Arc<SyncOrchestrator>) -> Result<Self> {
        let jobs = Arc::clone(orchestrator.jobs());
        let sync_timeout = orchestrator.policy().sync_timeout();
        let sync_timeout_grace = orchestrator.policy().sync_timeout_grace();

        let interrupted = jobs.fail_interrupted().await?;
        if interrupted > 0 {
            warn!(count = interrupted, "Failed sync jobs interrupted by a restart");
        }

        Ok(Self {
            orchestrator,
            jobs,
            sync_timeout,
            sync_timeout_grace,
            active: Arc::new(Mutex::new(None)),
        })
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    #[instrument(skip(self))]
    pub async fn start_full(&self, trigger: TriggerSource) -> Result<SyncJobId> {
        self.start_sync(SyncRequest::new(SyncType::Full, trigger))
            .await
    }

    #[instrument(skip(self))]
    pub async fn start_incremental(&self, trigger: TriggerSource) -> Result<SyncJobId> {
        self.start_sync(SyncRequest::new(SyncType::Incremental, trigger))
            .await
    }

    #[instrument(skip(self))]
    pub async fn start_smart(&self, trigger: TriggerSource) -> Result<SyncJobId> {
        self.start_sync(SyncRequest::new(SyncType::Smart, trigger))
            .await
    }

    /// Queue a job and run it in the background
    ///
    /// # Errors
    ///
    /// Returns `SyncInProgress` if another job is active, or a database
    /// error if the job cannot be persisted
    pub async fn start_sync(&self, request: SyncRequest) -> Result<SyncJobId> {
        let job = SyncJob::new(request.sync_type, request.trigger)
            .with_notebooks(request.notebook_ids);
        let job_id = job.id;
        let control = SyncControl::new();

        {
            let mut active = self.active.lock().await;
            if let Some(current) = active.as_ref() {
                return Err(SyncError::SyncInProgress {
                    job_id: current.job_id.to_string(),
                });
            }

            self.jobs.insert(&job).await?;
            *active = Some(ActiveSync {
                job_id,
                control: control.clone(),
            });
        }

        info!(
            job_id = %job_id,
            sync_type = %request.sync_type,
            trigger = %request.trigger,
            "Queued sync job"
        );

        let coordinator = self.clone_for_task();
        tokio::spawn(async move {
            coordinator.run_sync_task(job, control).await;
        });

        Ok(job_id)
    }

    /// Clone for background task
    fn clone_for_task(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            jobs: Arc::clone(&self.jobs),
            sync_timeout: self.sync_timeout,
            sync_timeout_grace: self.sync_timeout_grace,
            active: Arc::clone(&self.active),
        }
    }

    #[instrument(skip(self, job, control), fields(job_id = %job.id))]
    async fn run_sync_task(&self, job: SyncJob, control: SyncControl) {
        let job_id = job.id;
        let run = self.orchestrator.run(job, control.clone());
        tokio::pin!(run);

        let outcome = match timeout(self.sync_timeout, &mut run).await {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                warn!(
                    timeout_secs = self.sync_timeout.as_secs(),
                    "Sync time budget spent, stopping at the next page boundary"
                );
                control.expire();
                timeout(self.sync_timeout_grace, &mut run).await.ok()
            }
        };

        match outcome {
            Some(Ok(result)) => {
                info!(status = %result.status, "Sync task finished");
            }
            Some(Err(e)) => {
                error!(error = %e, "Sync task could not record its outcome");
                if let Err(e) = self.orchestrator.abandon(&job_id, &e.to_string()).await {
                    error!(error = %e, "Failed to mark sync job as failed");
                }
            }
            None => {
                error!(
                    grace_secs = self.sync_timeout_grace.as_secs(),
                    "Sync did not reach a page boundary in time, tearing it down"
                );
                let message = SyncError::Timeout(self.sync_timeout.as_secs()).to_string();
                if let Err(e) = self.orchestrator.abandon(&job_id, &message).await {
                    error!(error = %e, "Failed to mark sync job as failed");
                }
            }
        }

        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|current| current.job_id == job_id) {
            *active = None;
        }
    }

    async fn current(&self) -> Result<ActiveSync> {
        self.active
            .lock()
            .await
            .clone()
            .ok_or(SyncError::NoActiveSync)
    }

    /// Request a pause of the active job at its next page boundary
    #[instrument(skip(self))]
    pub async fn pause_current(&self) -> Result<SyncJobId> {
        let current = self.current().await?;
        if current.control.pause() {
            info!(job_id = %current.job_id, "Pause requested");
        }
        Ok(current.job_id)
    }

    #[instrument(skip(self))]
    pub async fn resume_current(&self) -> Result<SyncJobId> {
        let current = self.current().await?;
        if current.control.resume() {
            info!(job_id = %current.job_id, "Resume requested");
        }
        Ok(current.job_id)
    }

    #[instrument(skip(self))]
    pub async fn cancel_current(&self) -> Result<SyncJobId> {
        let current = self.current().await?;
        current.control.cancel();
        info!(job_id = %current.job_id, "Cancellation requested");
        Ok(current.job_id)
    }

    /// Cancel a job by id
    ///
    /// # Errors
    ///
    /// Returns `JobNotFound` for unknown ids and `InvalidStateTransition` if
    /// the job exists but is no longer active
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn cancel_job(&self, job_id: &SyncJobId) -> Result<()> {
        {
            let active = self.active.lock().await;
            if let Some(current) = active.as_ref().filter(|c| c.job_id == *job_id) {
                current.control.cancel();
                info!("Cancellation requested");
                return Ok(());
            }
        }

        let job = self.get_job(job_id).await?;
        Err(SyncError::InvalidStateTransition {
            from: job.status.to_string(),
            to: "cancelled".to_string(),
            reason: "Job is not active".to_string(),
        })
    }

    pub async fn get_job(&self, job_id: &SyncJobId) -> Result<SyncJob> {
        self.jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| SyncError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Most recent jobs, newest first
    pub async fn recent_jobs(&self, limit: u32) -> Result<Vec<SyncJob>> {
        self.jobs.recent(limit).await
    }

    pub async fn is_sync_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn current_job_id(&self) -> Option<SyncJobId> {
        self.active.lock().await.as_ref().map(|current| current.job_id)
    }
}
