//! # Cache Repositories
//!
//! One repository per table, each a trait with a SQLite implementation.
//!
//! - `DocumentRepository` - Mirrored pages, tombstones and indexing status
//! - `ImageRepository` - Image metadata owned by a page
//! - `SyncStateRepository` - Per-scope sync bookkeeping
//! - `SyncHistoryRepository` - Append-only audit log
//!
//! Live job records are owned by `core-sync`.

pub mod document;
pub mod history;
pub mod image;
pub mod sync_state;

pub use document::{DocumentRepository, SqliteDocumentRepository};
pub use history::{SqliteSyncHistoryRepository, SyncHistoryRepository};
pub use image::{ImageRepository, SqliteImageRepository};
pub use sync_state::{SqliteSyncStateRepository, SyncStateRepository};
