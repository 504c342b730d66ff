//! Microsoft Graph OneNote connector
//!
//! Implements the `NotebookSource` trait for the `/me/onenote` API.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::source::{Notebook, NotebookSource, PageBatch, PageMeta, Section};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::OneNoteError;
use crate::types::{GraphErrorBody, GraphNotebook, GraphPage, GraphSection, ODataCollection};

/// OneNote API base URL
const ONENOTE_API_BASE: &str = "https://graph.microsoft.com/v1.0/me/onenote";

/// Host whose resources require the bearer token
const GRAPH_HOST: &str = "https://graph.microsoft.com/";

/// Page size for page listings (Graph maximum)
const PAGE_LISTING_SIZE: u32 = 100;

/// Fields to request for page resources
const PAGE_FIELDS: &str = "id,title,createdDateTime,lastModifiedDateTime,createdBy,links";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const UNKNOWN_AUTHOR: &str = "Unknown";

/// Microsoft Graph OneNote connector
///
/// Implements `NotebookSource` over Graph v1.0.
///
/// # Features
///
/// - Notebook, section and paginated page listings (`@odata.nextLink`)
/// - Page HTML and image resource downloads
/// - Throttling surfaced as `RateLimited` with the parsed `Retry-After`
/// - OAuth 2.0 bearer authentication via `HttpClient`
///
/// Pacing and retries are left to the caller.
///
/// # Example
///
/// ```ignore
/// use provider_onenote::OneNoteConnector;
/// use bridge_traits::source::NotebookSource;
///
/// let connector = OneNoteConnector::new(http_client, access_token);
/// let notebooks = connector.list_notebooks().await?;
/// ```
pub struct OneNoteConnector {
    /// HTTP client for API requests
    http_client: Arc<dyn HttpClient>,

    /// OAuth 2.0 access token with `Notes.Read` scope
    access_token: String,

    base_url: String,
}

impl OneNoteConnector {
    pub fn new(http_client: Arc<dyn HttpClient>, access_token: String) -> Self {
        Self {
            http_client,
            access_token,
            base_url: ONENOTE_API_BASE.to_string(),
        }
    }

    /// Point the connector at a different API root (national clouds, test servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Parse RFC 3339 timestamp to Unix timestamp
    fn parse_timestamp(rfc3339: &str) -> Option<i64> {
        DateTime::parse_from_rfc3339(rfc3339)
            .ok()
            .map(|dt| dt.with_timezone(&Utc).timestamp())
    }

    /// `Retry-After` as seconds, accepting both delta-seconds and HTTP-date forms
    fn retry_after(response: &HttpResponse, now: DateTime<Utc>) -> Option<u64> {
        if let Some(secs) = response.retry_after_secs() {
            return Some(secs);
        }

        let value = response.header("Retry-After")?;
        let at = DateTime::parse_from_rfc2822(value.trim()).ok()?;
        let secs = (at.with_timezone(&Utc) - now).num_seconds().max(0);
        u64::try_from(secs).ok()
    }

    /// Map a Graph response status onto the provider error taxonomy
    fn check_status(
        response: HttpResponse,
        resource: &str,
    ) -> std::result::Result<HttpResponse, OneNoteError> {
        if response.is_success() {
            return Ok(response);
        }

        let status_code = response.status;
        if response.is_rate_limited() {
            return Err(OneNoteError::RateLimited {
                retry_after_seconds: Self::retry_after(&response, Utc::now()),
            });
        }
        if response.is_server_error() {
            return Err(OneNoteError::ServiceUnavailable { status_code });
        }

        let message = response
            .json::<GraphErrorBody>()
            .ok()
            .and_then(|body| body.error.message.or(body.error.code))
            .unwrap_or_else(|| format!("HTTP {}", status_code));

        Err(match status_code {
            401 | 403 => OneNoteError::AuthenticationFailed(message),
            404 => OneNoteError::NotFound {
                resource: resource.to_string(),
            },
            _ => OneNoteError::ApiError {
                status_code,
                message,
            },
        })
    }

    #[instrument(skip(self, accept))]
    async fn get(
        &self,
        url: &str,
        accept: &str,
        resource: &str,
    ) -> std::result::Result<HttpResponse, OneNoteError> {
        let mut request = HttpRequest::get(url)
            .header("Accept", accept)
            .timeout(REQUEST_TIMEOUT);
        if url.starts_with(GRAPH_HOST) || url.starts_with(&self.base_url) {
            request = request.bearer_token(&self.access_token);
        }

        let response = self.http_client.execute(request).await?;
        debug!(status = response.status, "Graph response");
        Self::check_status(response, resource)
    }

    /// Fetch one batch of a Graph collection
    async fn get_batch<T: DeserializeOwned>(
        &self,
        url: &str,
        resource: &str,
    ) -> std::result::Result<ODataCollection<T>, OneNoteError> {
        let response = self.get(url, "application/json", resource).await?;
        response
            .json()
            .map_err(|e| OneNoteError::ParseError(e.to_string()))
    }

    /// Fetch every batch of a Graph collection
    async fn get_collection<T: DeserializeOwned>(
        &self,
        first_url: String,
        resource: &str,
    ) -> std::result::Result<Vec<T>, OneNoteError> {
        let mut items = Vec::new();
        let mut next = Some(first_url);
        let mut batches = 0u32;

        while let Some(url) = next.take() {
            let batch: ODataCollection<T> = self.get_batch(&url, resource).await?;
            batches += 1;
            items.extend(batch.value);
            next = batch.next_link;
        }

        debug!(resource, batches, count = items.len(), "Fetched collection");
        Ok(items)
    }

    fn convert_page(page: GraphPage, section_id: &str) -> PageMeta {
        let author = page
            .created_by
            .and_then(|identity| identity.user)
            .and_then(|user| user.display_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

        let web_url = page
            .links
            .and_then(|links| links.one_note_web_url)
            .and_then(|link| link.href);

        PageMeta {
            id: page.id,
            title: page.title.unwrap_or_default(),
            created_at: page
                .created_date_time
                .as_deref()
                .and_then(Self::parse_timestamp),
            modified_at: page
                .last_modified_date_time
                .as_deref()
                .and_then(Self::parse_timestamp),
            author: Some(author),
            web_url,
            section_id: page
                .parent_section
                .map(|parent| parent.id)
                .unwrap_or_else(|| section_id.to_string()),
            notebook_id: page
                .parent_notebook
                .map(|parent| parent.id)
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl NotebookSource for OneNoteConnector {
    #[instrument(skip(self))]
    async fn list_notebooks(&self) -> Result<Vec<Notebook>> {
        let url = format!("{}/notebooks", self.base_url);
        let notebooks: Vec<GraphNotebook> = self.get_collection(url, "notebooks").await?;

        info!(count = notebooks.len(), "Listed notebooks");
        Ok(notebooks
            .into_iter()
            .map(|notebook| Notebook {
                display_name: notebook.display_name.unwrap_or_else(|| notebook.id.clone()),
                id: notebook.id,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn list_sections(&self, notebook_id: &str) -> Result<Vec<Section>> {
        let url = format!(
            "{}/notebooks/{}/sections",
            self.base_url,
            urlencoding::encode(notebook_id)
        );
        let resource = format!("notebook {}", notebook_id);
        let sections: Vec<GraphSection> = self.get_collection(url, &resource).await?;

        info!(count = sections.len(), "Listed sections");
        Ok(sections
            .into_iter()
            .map(|section| Section {
                display_name: section.display_name.unwrap_or_else(|| section.id.clone()),
                id: section.id,
                notebook_id: notebook_id.to_string(),
            })
            .collect())
    }

    /// One `@odata.nextLink` batch per call; the link is the continuation
    #[instrument(skip(self, continuation))]
    async fn list_page_batch(
        &self,
        section_id: &str,
        continuation: Option<String>,
    ) -> Result<PageBatch> {
        let url = match continuation {
            Some(next_link) => next_link,
            None => format!(
                "{}/sections/{}/pages?$select={}&$top={}",
                self.base_url,
                urlencoding::encode(section_id),
                PAGE_FIELDS,
                PAGE_LISTING_SIZE
            ),
        };
        let resource = format!("section {}", section_id);
        let batch: ODataCollection<GraphPage> = self.get_batch(&url, &resource).await?;

        info!(
            count = batch.value.len(),
            more = batch.next_link.is_some(),
            "Listed page batch"
        );
        Ok(PageBatch {
            pages: batch
                .value
                .into_iter()
                .map(|page| Self::convert_page(page, section_id))
                .collect(),
            next: batch.next_link,
        })
    }

    #[instrument(skip(self))]
    async fn get_page_content(&self, page_id: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/pages/{}/content",
            self.base_url,
            urlencoding::encode(page_id)
        );
        let resource = format!("page {}", page_id);

        match self.get(&url, "text/html", &resource).await {
            Ok(response) => {
                let html = response.text()?;
                debug!(chars = html.len(), "Fetched page content");
                Ok(Some(html))
            }
            Err(OneNoteError::NotFound { .. }) => {
                warn!("Page content not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, url))]
    async fn download_image(&self, url: &str) -> Result<Option<Bytes>> {
        match self.get(url, "*/*", "image").await {
            Ok(response) if response.body.is_empty() => Ok(None),
            Ok(response) => {
                debug!(bytes = response.body.len(), "Downloaded image");
                Ok(Some(response.body))
            }
            Err(OneNoteError::NotFound { .. }) => {
                warn!("Image resource not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::BridgeError;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
        }
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn connector(mock: MockHttpClient) -> OneNoteConnector {
        OneNoteConnector::new(Arc::new(mock), "test_token".to_string())
    }

    #[tokio::test]
    async fn test_list_notebooks_success() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .withf(|req| {
                req.url == "https://graph.microsoft.com/v1.0/me/onenote/notebooks"
                    && req.headers.get("Authorization").map(String::as_str)
                        == Some("Bearer test_token")
            })
            .times(1)
            .returning(|_| {
                Ok(response(
                    200,
                    r#"{"value":[{"id":"nb-1","displayName":"Work"},{"id":"nb-2"}]}"#,
                ))
            });

        let notebooks = connector(mock).list_notebooks().await.unwrap();

        assert_eq!(notebooks.len(), 2);
        assert_eq!(notebooks[0].display_name, "Work");
        assert_eq!(notebooks[1].display_name, "nb-2");
    }

    #[tokio::test]
    async fn test_list_sections_carries_notebook_id() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .withf(|req| req.url.ends_with("/notebooks/nb%201/sections"))
            .times(1)
            .returning(|_| Ok(response(200, r#"{"value":[{"id":"s-1","displayName":"Plans"}]}"#)));

        let sections = connector(mock).list_sections("nb 1").await.unwrap();

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].notebook_id, "nb 1");
        assert_eq!(sections[0].display_name, "Plans");
    }

    #[tokio::test]
    async fn test_list_pages_follows_next_link() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute().times(2).returning(|req| {
            if req.url.contains("skip=1") {
                Ok(response(
                    200,
                    r#"{"value":[{"id":"p2","title":"Backlog"}]}"#,
                ))
            } else {
                assert!(req.url.contains("/sections/s-1/pages?$select="));
                Ok(response(
                    200,
                    r#"{
                        "value":[{
                            "id":"p1",
                            "title":"Roadmap",
                            "createdDateTime":"2024-01-01T00:00:00Z",
                            "lastModifiedDateTime":"2024-01-02T00:00:00Z",
                            "createdBy":{"user":{"displayName":"Ada"}},
                            "links":{"oneNoteWebUrl":{"href":"https://onenote.example/p1"}}
                        }],
                        "@odata.nextLink":"https://graph.microsoft.com/v1.0/me/onenote/sections/s-1/pages?skip=1"
                    }"#,
                ))
            }
        });

        let pages = connector(mock).list_pages("s-1").await.unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].title, "Roadmap");
        assert_eq!(pages[0].created_at, Some(1_704_067_200));
        assert_eq!(pages[0].modified_at, Some(1_704_153_600));
        assert_eq!(pages[0].author.as_deref(), Some("Ada"));
        assert_eq!(pages[0].web_url.as_deref(), Some("https://onenote.example/p1"));
        assert_eq!(pages[0].section_id, "s-1");
        assert_eq!(pages[1].author.as_deref(), Some("Unknown"));
        assert_eq!(pages[1].modified_at, None);
    }

    #[tokio::test]
    async fn test_page_batch_surfaces_next_link_and_throttling() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute().times(2).returning(|req| {
            if req.url.contains("skip=1") {
                let mut resp = response(429, "");
                resp.headers.insert("Retry-After".to_string(), "3".to_string());
                Ok(resp)
            } else {
                Ok(response(
                    200,
                    r#"{
                        "value":[{"id":"p1","title":"Roadmap"}],
                        "@odata.nextLink":"https://graph.microsoft.com/v1.0/me/onenote/sections/s-1/pages?skip=1"
                    }"#,
                ))
            }
        });
        let connector = connector(mock);

        let first = connector.list_page_batch("s-1", None).await.unwrap();
        assert_eq!(first.pages.len(), 1);
        let next = first.next.unwrap();
        assert!(next.ends_with("pages?skip=1"));

        let err = connector
            .list_page_batch("s-1", Some(next))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::RateLimited {
                retry_after_secs: Some(3)
            }
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_maps_retry_after() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute().times(1).returning(|_| {
            let mut resp = response(429, "");
            resp.headers.insert("retry-after".to_string(), "12".to_string());
            Ok(resp)
        });

        let err = connector(mock).list_notebooks().await.unwrap_err();

        assert!(matches!(
            err,
            BridgeError::RateLimited {
                retry_after_secs: Some(12)
            }
        ));
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_retry_after_http_date() {
        let now = Utc::now();
        let at = now + chrono::Duration::seconds(120);
        let mut resp = response(429, "");
        resp.headers.insert(
            "Retry-After".to_string(),
            at.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );

        let secs = OneNoteConnector::retry_after(&resp, now).unwrap();
        assert!((119..=120).contains(&secs));

        let past = now - chrono::Duration::seconds(30);
        resp.headers.insert(
            "Retry-After".to_string(),
            past.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
        assert_eq!(OneNoteConnector::retry_after(&resp, now), Some(0));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Ok(response(503, "unavailable")));

        let err = connector(mock).list_sections("nb-1").await.unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_client_error_uses_graph_message() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute().times(1).returning(|_| {
            Ok(response(
                400,
                r#"{"error":{"code":"20102","message":"The specified resource ID does not exist."}}"#,
            ))
        });

        let err = connector(mock).list_pages("bad").await.unwrap_err();

        match err {
            BridgeError::OperationFailed(msg) => {
                assert!(msg.contains("The specified resource ID does not exist."))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_section_is_not_found() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Ok(response(404, "")));

        let err = connector(mock).list_pages("gone").await.unwrap_err();

        assert!(matches!(err, BridgeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_page_content() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .withf(|req| {
                req.url.ends_with("/pages/p1/content")
                    && req.headers.get("Accept").map(String::as_str) == Some("text/html")
            })
            .times(1)
            .returning(|_| Ok(response(200, "<html><body><p>Hello</p></body></html>")));

        let html = connector(mock).get_page_content("p1").await.unwrap();

        assert_eq!(html.as_deref(), Some("<html><body><p>Hello</p></body></html>"));
    }

    #[tokio::test]
    async fn test_missing_page_content_is_none() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Ok(response(404, "")));

        let html = connector(mock).get_page_content("p1").await.unwrap();

        assert!(html.is_none());
    }

    #[tokio::test]
    async fn test_download_image_authenticates_graph_resources_only() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute().times(2).returning(|req| {
            let has_auth = req.headers.contains_key("Authorization");
            if req.url.starts_with("https://graph.microsoft.com/") {
                assert!(has_auth);
            } else {
                assert!(!has_auth);
            }
            Ok(response(200, "png-bytes"))
        });
        let connector = connector(mock);

        let graph = connector
            .download_image("https://graph.microsoft.com/v1.0/me/onenote/resources/r1/$value")
            .await
            .unwrap();
        let external = connector
            .download_image("https://cdn.example.com/image.png")
            .await
            .unwrap();

        assert_eq!(graph, Some(Bytes::from("png-bytes")));
        assert_eq!(external, Some(Bytes::from("png-bytes")));
    }

    #[tokio::test]
    async fn test_transport_failure_passes_through() {
        let mut mock = MockHttpClient::new();
        mock.expect_execute()
            .times(1)
            .returning(|_| Err(BridgeError::Unavailable("connection reset".to_string())));

        let err = connector(mock).get_page_content("p1").await.unwrap_err();

        assert!(err.is_transient());
    }
}
