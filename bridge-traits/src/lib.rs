//! # Host Bridge Traits
//!
//! Capability traits the sync core depends on but does not implement itself.
//!
//! ## Overview
//!
//! This crate defines the contract between the core library and the outside
//! world. Each trait represents a capability that the core requires but that
//! is supplied by a platform crate (`bridge-desktop`) or a remote adapter
//! (`provider-onenote`).
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations with TLS and timeouts
//! - [`NotebookSource`](source::NotebookSource) - Notebook/section/page listing, page HTML and image fetch
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Adapters
//! should:
//!
//! - Report HTTP 429 as `BridgeError::RateLimited` with the `Retry-After` value
//! - Report 5xx and network failures as `BridgeError::Unavailable`
//! - Provide actionable error messages with the failing resource id
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds so a single adapter can be
//! shared between the request handler and the background sync task.

pub mod error;
pub mod http;
pub mod source;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use source::{Notebook, NotebookSource, PageBatch, PageMeta, Section};
