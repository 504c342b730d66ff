//! # OneNote Provider
//!
//! Implements `NotebookSource` for the Microsoft Graph OneNote API.
//!
//! ## Overview
//!
//! This module provides:
//! - Notebook, section and page listing with `@odata.nextLink` pagination
//! - Page HTML and image resource downloads
//! - Graph status mapping to `BridgeError` (429 with `Retry-After`, 5xx, 404)
//!
//! Pacing and retries are not done here; the sync engine wraps every call.

pub mod connector;
pub mod error;
pub mod types;

pub use connector::OneNoteConnector;
pub use error::{OneNoteError, Result};
