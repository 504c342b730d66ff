//! Remote Notebook Source Abstraction
//!
//! The contract a remote document store must satisfy to be mirrored into the
//! local cache: a notebook → section → page hierarchy, page HTML and image
//! bytes.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A top-level notebook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notebook {
    pub id: String,
    pub display_name: String,
}

/// A section inside a notebook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub display_name: String,
    pub notebook_id: String,
}

/// Lightweight page metadata returned by page listings
///
/// Carries everything the incremental diff needs (id, modification time and
/// hierarchy pointers) without the page body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub id: String,
    pub title: String,
    /// Unix timestamp (seconds)
    pub created_at: Option<i64>,
    /// Unix timestamp (seconds); the diff key for incremental sync
    pub modified_at: Option<i64>,
    pub author: Option<String>,
    pub web_url: Option<String>,
    pub section_id: String,
    pub notebook_id: String,
}

/// One batch of a paged page listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageBatch {
    pub pages: Vec<PageMeta>,
    /// Opaque continuation for the next batch; `None` on the last one
    pub next: Option<String>,
}

/// Remote document store
///
/// Implementations talk to one remote backend. They report throttling as
/// [`BridgeError::RateLimited`](crate::error::BridgeError::RateLimited) and
/// retryable failures as [`BridgeError::Unavailable`](crate::error::BridgeError::Unavailable);
/// pacing and retries are applied by the caller.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::source::NotebookSource;
///
/// async fn count_pages(source: &dyn NotebookSource) -> Result<usize> {
///     let mut total = 0;
///     for notebook in source.list_notebooks().await? {
///         for section in source.list_sections(&notebook.id).await? {
///             total += source.list_pages(&section.id).await?.len();
///         }
///     }
///     Ok(total)
/// }
/// ```
#[async_trait]
pub trait NotebookSource: Send + Sync {
    /// List every notebook visible to the account
    async fn list_notebooks(&self) -> Result<Vec<Notebook>>;

    /// List the sections of one notebook
    async fn list_sections(&self, notebook_id: &str) -> Result<Vec<Section>>;

    /// Fetch one batch of a section's pages
    ///
    /// `continuation` is `None` for the first batch and otherwise the `next`
    /// value of the previous one.
    async fn list_page_batch(
        &self,
        section_id: &str,
        continuation: Option<String>,
    ) -> Result<PageBatch>;

    /// List every page of one section, following continuations
    async fn list_pages(&self, section_id: &str) -> Result<Vec<PageMeta>> {
        let mut pages = Vec::new();
        let mut continuation = None;
        loop {
            let batch = self.list_page_batch(section_id, continuation).await?;
            pages.extend(batch.pages);
            match batch.next {
                Some(next) => continuation = Some(next),
                None => return Ok(pages),
            }
        }
    }

    /// Fetch the HTML body of a page; `None` when the remote returns no body
    async fn get_page_content(&self, page_id: &str) -> Result<Option<String>>;

    /// Fetch raw image bytes from a resource URL; `None` when the body is empty
    async fn download_image(&self, url: &str) -> Result<Option<Bytes>>;
}
