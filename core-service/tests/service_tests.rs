//! End-to-end tests of the service façade over an on-disk cache

use async_trait::async_trait;
use bridge_traits::{BridgeError, Notebook, NotebookSource, PageBatch, PageMeta, Section};
use bytes::Bytes;
use core_runtime::config::{CoreConfig, ImagePolicy, RateLimitConfig};
use core_runtime::events::{CoreEvent, SyncEvent};
use core_service::{CoreError, CoreService, HealthStatus, SyncType, TriggerSource};
use core_sync::{JobStatus, SyncError};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

type BridgeResult<T> = std::result::Result<T, BridgeError>;

struct StaticSource;

#[async_trait]
impl NotebookSource for StaticSource {
    async fn list_notebooks(&self) -> BridgeResult<Vec<Notebook>> {
        Ok(vec![Notebook {
            id: "nb-1".to_string(),
            display_name: "Work".to_string(),
        }])
    }

    async fn list_sections(&self, notebook_id: &str) -> BridgeResult<Vec<Section>> {
        Ok(vec![Section {
            id: "s-1".to_string(),
            display_name: "Plans".to_string(),
            notebook_id: notebook_id.to_string(),
        }])
    }

    async fn list_page_batch(
        &self,
        section_id: &str,
        _continuation: Option<String>,
    ) -> BridgeResult<PageBatch> {
        let pages = ["p1", "p2"]
            .iter()
            .map(|id| PageMeta {
                id: id.to_string(),
                title: format!("Page {}", id),
                created_at: Some(100),
                modified_at: Some(200),
                author: Some("Ada".to_string()),
                web_url: None,
                section_id: section_id.to_string(),
                notebook_id: "nb-1".to_string(),
            })
            .collect();
        Ok(PageBatch { pages, next: None })
    }

    async fn get_page_content(&self, page_id: &str) -> BridgeResult<Option<String>> {
        Ok(Some(format!("<html><body><p>Body of {}</p></body></html>", page_id)))
    }

    async fn download_image(&self, _url: &str) -> BridgeResult<Option<Bytes>> {
        Ok(None)
    }
}

async fn service(dir: &TempDir) -> CoreService {
    let limits = RateLimitConfig::new()
        .with_requests_per_minute(6000.0)
        .with_burst_size(100)
        .with_min_interval_ms(0)
        .with_image_policy(ImagePolicy::new().with_pacing_ms(0));

    let config = CoreConfig::builder()
        .database_path(dir.path().join("cache.db"))
        .image_dir(dir.path().join("images"))
        .notebook_source(Arc::new(StaticSource))
        .rate_limit(limits)
        .build()
        .unwrap();

    CoreService::bootstrap(config).await.unwrap()
}

/// Waits for the job to reach a terminal state and for its outcome to be recorded
async fn wait_until_finished(core: &CoreService, job_id: &str) -> JobStatus {
    for _ in 0..500 {
        let view = core.job_status(job_id).await.unwrap();
        if view.status.is_terminal() && !core.is_sync_active().await {
            return view.status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish", job_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_trigger_and_poll_full_sync() {
    let dir = tempfile::tempdir().unwrap();
    let core = service(&dir).await;
    let mut events = core.subscribe_events();

    let job_id = core
        .trigger_sync(SyncType::Full, TriggerSource::Manual)
        .await
        .unwrap()
        .to_string();

    assert_eq!(wait_until_finished(&core, &job_id).await, JobStatus::Completed);

    let view = core.job_status(&job_id).await.unwrap();
    assert_eq!(view.pages_added, 2);
    assert_eq!(view.progress_percent, 100.0);
    assert!(!view.can_pause);
    assert!(!view.can_cancel);

    let stats = core.cache_stats().await.unwrap();
    assert_eq!(stats.total_documents, 2);
    assert!(stats.last_full_sync.is_some());

    let report = core.health_report().await.unwrap();
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.recommendations.is_empty());

    let history = core.sync_history(None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].job_id.as_deref(), Some(job_id.as_str()));

    let mut saw_started = false;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Sync(SyncEvent::Started { job_id: id, .. }) = event {
            saw_started = id == job_id;
        }
    }
    assert!(saw_started);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_history_limit_is_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let core = service(&dir).await;

    for sync_type in [SyncType::Full, SyncType::Incremental] {
        let job_id = core
            .trigger_sync(sync_type, TriggerSource::Scheduled)
            .await
            .unwrap()
            .to_string();
        wait_until_finished(&core, &job_id).await;
    }

    assert_eq!(core.sync_history(Some(0)).await.unwrap().len(), 1);
    assert_eq!(core.sync_history(Some(500)).await.unwrap().len(), 2);

    let history = core.sync_history(None).await.unwrap();
    let incremental = history
        .iter()
        .find(|record| record.sync_type == SyncType::Incremental)
        .unwrap();
    assert_eq!(incremental.pages_skipped, 2);
    assert_eq!(incremental.pages_added, 0);
}

#[tokio::test]
async fn test_control_without_active_job() {
    let dir = tempfile::tempdir().unwrap();
    let core = service(&dir).await;

    assert!(matches!(
        core.pause_sync().await,
        Err(CoreError::Sync(SyncError::NoActiveSync))
    ));
    assert!(matches!(
        core.cancel_sync().await,
        Err(CoreError::Sync(SyncError::NoActiveSync))
    ));
    assert!(core.current_job().await.unwrap().is_none());
}

#[tokio::test]
async fn test_job_status_rejects_bad_ids() {
    let dir = tempfile::tempdir().unwrap();
    let core = service(&dir).await;

    assert!(matches!(
        core.job_status("not-a-uuid").await,
        Err(CoreError::Sync(SyncError::InvalidJobId(_)))
    ));
    assert!(matches!(
        core.job_status("6f1c1f8e-9a4b-4c1d-8f7e-2b3c4d5e6f70").await,
        Err(CoreError::Sync(SyncError::JobNotFound { .. }))
    ));
}

#[tokio::test]
async fn test_empty_cache_recommends_full_sync() {
    let dir = tempfile::tempdir().unwrap();
    let core = service(&dir).await;

    let report = core.health_report().await.unwrap();

    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.total_documents, 0);
    assert_eq!(report.recommendations.len(), 1);
    assert!(report.recommendations[0].contains("full sync"));
}

#[test]
fn test_config_without_source_or_client_is_rejected() {
    let result = CoreConfig::builder()
        .database_path("cache.db")
        .image_dir("images")
        .build();

    assert!(result.is_err());
}
