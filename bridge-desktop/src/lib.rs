//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest` with rustls and connection pooling;
//!   `execute_with_retry` adds transport-level retries for connection
//!   failures and 5xx responses
//!
//! Throttling (HTTP 429) is never retried here. It is surfaced to the caller
//! untouched so the adaptive rate limiter in `core-sync` can react to it.
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use bridge_desktop::ReqwestHttpClient;
//! use provider_onenote::OneNoteConnector;
//!
//! let http_client = Arc::new(ReqwestHttpClient::new()?);
//! let source = OneNoteConnector::new(http_client, access_token);
//! ```

mod http;

pub use http::ReqwestHttpClient;
