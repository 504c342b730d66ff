//! # Remote Gate
//!
//! Single entry point for every call the orchestrator makes to the remote
//! source. Each call waits on the shared [`AdaptiveRateLimiter`], feeds the
//! outcome back into it and applies the retry policy:
//!
//! - 429: `record_error(true)`, `handle_rate_limit_error`, retry (bounded);
//!   never counted as a page failure while retries remain
//! - 5xx / network: exponential backoff (`transient_backoff`, ×2 per attempt)
//! - anything else: returned to the caller unchanged
//!
//! Paged listings go through the gate one batch at a time, so every batch
//! waits on the limiter and a retry resumes at the batch that failed.
//!
//! Image downloads follow the stricter [`ImagePolicy`]: fixed pacing between
//! downloads, a long wait on 429 and a bounded number of attempts after which
//! the last error is returned so the caller can skip the image. Inline
//! `data:` images are decoded locally and never touch the limiter.
//!
//! A gate is created per sync run so its counters are per-run figures.

use crate::extract::{decode_data_url, is_data_url};
use crate::rate_limiter::AdaptiveRateLimiter;
use bridge_traits::{BridgeError, Notebook, NotebookSource, PageMeta, Section};
use bytes::Bytes;
use core_runtime::config::ImagePolicy;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Per-run call accounting
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GateStats {
    pub api_calls: u64,
    pub rate_limit_hits: u64,
    pub total_wait: Duration,
}

pub struct RemoteGate {
    source: Arc<dyn NotebookSource>,
    limiter: Arc<AdaptiveRateLimiter>,
    api_calls: AtomicU64,
    rate_limit_hits: AtomicU64,
    wait_nanos: AtomicU64,
    last_image_at: Mutex<Option<Instant>>,
}

impl RemoteGate {
    pub fn new(source: Arc<dyn NotebookSource>, limiter: Arc<AdaptiveRateLimiter>) -> Self {
        Self {
            source,
            limiter,
            api_calls: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
            wait_nanos: AtomicU64::new(0),
            last_image_at: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            api_calls: self.api_calls.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            total_wait: Duration::from_nanos(self.wait_nanos.load(Ordering::Relaxed)),
        }
    }

    pub fn limiter(&self) -> &Arc<AdaptiveRateLimiter> {
        &self.limiter
    }

    pub async fn list_notebooks(&self) -> bridge_traits::error::Result<Vec<Notebook>> {
        let source = self.source.as_ref();
        self.call("list_notebooks", move || source.list_notebooks())
            .await
    }

    pub async fn list_sections(
        &self,
        notebook_id: &str,
    ) -> bridge_traits::error::Result<Vec<Section>> {
        let source = self.source.as_ref();
        self.call("list_sections", move || source.list_sections(notebook_id))
            .await
    }

    pub async fn list_pages(&self, section_id: &str) -> bridge_traits::error::Result<Vec<PageMeta>> {
        let source = self.source.as_ref();
        let mut pages = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let token = continuation.take();
            let batch = self
                .call("list_pages", || {
                    source.list_page_batch(section_id, token.clone())
                })
                .await?;
            pages.extend(batch.pages);
            match batch.next {
                Some(next) => continuation = Some(next),
                None => return Ok(pages),
            }
        }
    }

    pub async fn get_page_content(
        &self,
        page_id: &str,
    ) -> bridge_traits::error::Result<Option<String>> {
        let source = self.source.as_ref();
        self.call("get_page_content", move || source.get_page_content(page_id))
            .await
    }

    /// Fetch one image
    ///
    /// `Ok(None)` means the resource had no data. An error means the image
    /// has to be skipped: a malformed `data:` URL, a permanent failure, or
    /// retries used up.
    pub async fn download_image(
        &self,
        url: &str,
        policy: &ImagePolicy,
    ) -> bridge_traits::error::Result<Option<Bytes>> {
        if is_data_url(url) {
            return decode_data_url(url).map(|bytes| Some(Bytes::from(bytes))).ok_or_else(|| {
                BridgeError::OperationFailed("Malformed data URL image".to_string())
            });
        }

        let attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.pace_images(policy.pacing()).await;
            self.acquire().await;
            self.api_calls.fetch_add(1, Ordering::Relaxed);

            let result = self.source.download_image(url).await;
            *self.last_image_at.lock().await = Some(Instant::now());

            match result {
                Ok(Some(bytes)) if !bytes.is_empty() => {
                    self.limiter.record_success().await;
                    return Ok(Some(bytes));
                }
                Ok(_) => {
                    self.limiter.record_success().await;
                    debug!(url, "Image resource returned no data");
                    return Ok(None);
                }
                Err(e @ BridgeError::RateLimited { .. }) => {
                    self.limiter.record_error(true).await;
                    self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                    if attempt >= attempts {
                        warn!(attempts, "Image download still rate limited, giving up");
                        return Err(e);
                    }
                    warn!(
                        attempt,
                        wait_secs = policy.rate_limit_wait_secs,
                        "Image download rate limited, pausing image downloads"
                    );
                    let started = Instant::now();
                    self.limiter
                        .handle_rate_limit_error(Some(policy.rate_limit_wait()))
                        .await;
                    self.add_wait(started.elapsed());
                }
                Err(e) if e.is_transient() => {
                    self.limiter.record_error(false).await;
                    if attempt >= attempts {
                        warn!(attempts, error = %e, "Image download retries exhausted");
                        return Err(e);
                    }
                    self.backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, mut f: F) -> bridge_traits::error::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bridge_traits::error::Result<T>>,
    {
        let config = self.limiter.config();
        let mut rate_limit_retries = 0;
        let mut transient_attempts = 0;

        loop {
            self.acquire().await;
            self.api_calls.fetch_add(1, Ordering::Relaxed);

            match f().await {
                Ok(value) => {
                    self.limiter.record_success().await;
                    return Ok(value);
                }
                Err(BridgeError::RateLimited { retry_after_secs }) => {
                    self.limiter.record_error(true).await;
                    self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                    if rate_limit_retries >= config.max_rate_limit_retries {
                        warn!(operation, "Rate limit retries exhausted");
                        return Err(BridgeError::RateLimited { retry_after_secs });
                    }
                    rate_limit_retries += 1;

                    let started = Instant::now();
                    self.limiter
                        .handle_rate_limit_error(retry_after_secs.map(Duration::from_secs))
                        .await;
                    self.add_wait(started.elapsed());
                }
                Err(e) if e.is_transient() => {
                    self.limiter.record_error(false).await;
                    transient_attempts += 1;
                    if transient_attempts >= config.max_transient_retries.max(1) {
                        warn!(operation, error = %e, "Transient retries exhausted");
                        return Err(e);
                    }
                    debug!(operation, attempt = transient_attempts, error = %e, "Retrying after transient error");
                    self.backoff(transient_attempts).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn acquire(&self) {
        let started = Instant::now();
        self.limiter.acquire(true).await;
        self.add_wait(started.elapsed());
    }

    async fn backoff(&self, attempt: u32) {
        let base = self.limiter.config().transient_backoff();
        let delay = base.saturating_mul(1 << attempt.saturating_sub(1).min(16));
        sleep(delay).await;
        self.add_wait(delay);
    }

    async fn pace_images(&self, pacing: Duration) {
        let last = *self.last_image_at.lock().await;
        if let Some(last) = last {
            let ready_at = last + pacing;
            let now = Instant::now();
            if ready_at > now {
                let delay = ready_at - now;
                sleep(delay).await;
                self.add_wait(delay);
            }
        }
    }

    fn add_wait(&self, wait: Duration) {
        let nanos = u64::try_from(wait.as_nanos()).unwrap_or(u64::MAX);
        self.wait_nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result;
    use bridge_traits::PageBatch;
    use core_runtime::config::RateLimitConfig;
    use mockall::mock;
    use std::sync::atomic::AtomicUsize;

    mock! {
        Source {}

        #[async_trait]
        impl NotebookSource for Source {
            async fn list_notebooks(&self) -> Result<Vec<Notebook>>;
            async fn list_sections(&self, notebook_id: &str) -> Result<Vec<Section>>;
            async fn list_page_batch(
                &self,
                section_id: &str,
                continuation: Option<String>,
            ) -> Result<PageBatch>;
            async fn get_page_content(&self, page_id: &str) -> Result<Option<String>>;
            async fn download_image(&self, url: &str) -> Result<Option<Bytes>>;
        }
    }

    fn gate(source: MockSource) -> RemoteGate {
        let config = RateLimitConfig::new()
            .with_requests_per_minute(600.0)
            .with_burst_size(10)
            .with_min_interval_ms(0);
        RemoteGate::new(
            Arc::new(source),
            Arc::new(AdaptiveRateLimiter::new(config).unwrap()),
        )
    }

    fn notebook() -> Notebook {
        Notebook {
            id: "nb-1".to_string(),
            display_name: "Work".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_call_counts_once() {
        let mut source = MockSource::new();
        source
            .expect_list_notebooks()
            .times(1)
            .returning(|| Ok(vec![notebook()]));
        let gate = gate(source);

        let notebooks = gate.list_notebooks().await.unwrap();
        assert_eq!(notebooks.len(), 1);
        assert_eq!(gate.stats().api_calls, 1);
        assert_eq!(gate.stats().rate_limit_hits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried_after_retry_after() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut source = MockSource::new();
        {
            let calls = Arc::clone(&calls);
            source.expect_list_sections().returning(move |_| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(BridgeError::RateLimited {
                        retry_after_secs: Some(7),
                    })
                } else {
                    Ok(Vec::new())
                }
            });
        }
        let gate = gate(source);
        let start = Instant::now();

        assert!(gate.list_sections("nb-1").await.unwrap().is_empty());
        assert!(start.elapsed() >= Duration::from_secs(7));

        let stats = gate.stats();
        assert_eq!(stats.api_calls, 2);
        assert_eq!(stats.rate_limit_hits, 1);
        assert!(stats.total_wait >= Duration::from_secs(7));
        assert!(gate.limiter().requests_per_minute().await <= 300.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_are_bounded() {
        let mut source = MockSource::new();
        source.expect_list_page_batch().times(4).returning(|_, _| {
            Err(BridgeError::RateLimited {
                retry_after_secs: Some(1),
            })
        });
        let gate = gate(source);

        let result = gate.list_pages("sec-1").await;
        assert!(matches!(result, Err(BridgeError::RateLimited { .. })));
        assert_eq!(gate.stats().rate_limit_hits, 4);
    }

    fn page(id: &str) -> PageMeta {
        PageMeta {
            id: id.to_string(),
            title: id.to_string(),
            created_at: None,
            modified_at: Some(1),
            author: None,
            web_url: None,
            section_id: "sec-1".to_string(),
            notebook_id: "nb-1".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_page_batch_is_gated_and_retried_alone() {
        let second_batch_calls = Arc::new(AtomicUsize::new(0));
        let mut source = MockSource::new();
        source
            .expect_list_page_batch()
            .withf(|_, continuation| continuation.is_none())
            .times(1)
            .returning(|_, _| {
                Ok(PageBatch {
                    pages: vec![page("p1")],
                    next: Some("batch-2".to_string()),
                })
            });
        {
            let calls = Arc::clone(&second_batch_calls);
            source
                .expect_list_page_batch()
                .withf(|_, continuation| continuation.as_deref() == Some("batch-2"))
                .times(2)
                .returning(move |_, _| {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(BridgeError::RateLimited {
                            retry_after_secs: Some(5),
                        })
                    } else {
                        Ok(PageBatch {
                            pages: vec![page("p2")],
                            next: None,
                        })
                    }
                });
        }
        let gate = gate(source);
        let start = Instant::now();

        let pages = gate.list_pages("sec-1").await.unwrap();

        let ids: Vec<&str> = pages.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
        assert!(start.elapsed() >= Duration::from_secs(5));
        let stats = gate.stats();
        assert_eq!(stats.api_calls, 3);
        assert_eq!(stats.rate_limit_hits, 1);
        assert_eq!(gate.limiter().stats().await.total_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_back_off_exponentially() {
        let mut source = MockSource::new();
        source
            .expect_get_page_content()
            .times(3)
            .returning(|_| Err(BridgeError::Unavailable("503".to_string())));
        let gate = gate(source);
        let start = Instant::now();

        let result = gate.get_page_content("p1").await;
        assert!(matches!(result, Err(BridgeError::Unavailable(_))));
        // 2s + 4s between the three attempts
        assert!(start.elapsed() >= Duration::from_secs(6));
        assert_eq!(gate.stats().api_calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let mut source = MockSource::new();
        source
            .expect_get_page_content()
            .times(1)
            .returning(|_| Err(BridgeError::NotFound("p1".to_string())));
        let gate = gate(source);

        assert!(matches!(
            gate.get_page_content("p1").await,
            Err(BridgeError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_url_images_skip_the_network() {
        let source = MockSource::new();
        let gate = gate(source);

        let bytes = gate
            .download_image("data:image/png;base64,aGVsbG8=", &ImagePolicy::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&bytes[..], b"hello");
        assert!(gate
            .download_image("data:image/png;base64,!!!", &ImagePolicy::default())
            .await
            .is_err());
        assert_eq!(gate.stats().api_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_downloads_are_paced() {
        let mut source = MockSource::new();
        source
            .expect_download_image()
            .times(2)
            .returning(|_| Ok(Some(Bytes::from_static(b"img"))));
        let gate = gate(source);
        let policy = ImagePolicy::default();
        let start = Instant::now();

        assert!(gate.download_image("https://x/1", &policy).await.unwrap().is_some());
        assert!(gate.download_image("https://x/2", &policy).await.unwrap().is_some());
        assert!(start.elapsed() >= policy.pacing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_rate_limit_waits_then_gives_up() {
        let mut source = MockSource::new();
        source.expect_download_image().times(3).returning(|_| {
            Err(BridgeError::RateLimited {
                retry_after_secs: Some(1),
            })
        });
        let gate = gate(source);
        let policy = ImagePolicy::default();
        let start = Instant::now();

        assert!(matches!(
            gate.download_image("https://x/1", &policy).await,
            Err(BridgeError::RateLimited { .. })
        ));
        // Two long waits between three attempts
        assert!(start.elapsed() >= policy.rate_limit_wait() * 2);
        assert_eq!(gate.stats().rate_limit_hits, 3);
    }
}
