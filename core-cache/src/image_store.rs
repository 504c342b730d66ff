//! On-disk storage for page images
//!
//! Files are laid out as `{root}/{page_id[..8]}/{page_id}_{index}.png`; the
//! relative part of that path is what the `images` table stores.
//!
//! Writes go through a staging file next to the final slot. The sync commits a
//! staged image only after the page's rows are written, so a failed or
//! interrupted page never leaves cached rows pointing at replaced bytes.

use crate::error::{CacheError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Metadata of one stored image file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// Path relative to the store root, always with `/` separators
    pub relative_path: String,
    pub size_bytes: i64,
    pub mime_type: String,
    /// Hex sha256 of the bytes
    pub content_hash: String,
}

/// Image bytes written beside their slot, waiting to be committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedImage {
    pub image: StoredImage,
    staging_path: String,
}

impl StagedImage {
    pub fn staging_path(&self) -> &str {
        &self.staging_path
    }
}

const STAGING_SUFFIX: &str = ".partial";

#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative path for an image of a page
    pub fn relative_path(page_id: &str, image_index: i64) -> String {
        let prefix: String = page_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .take(8)
            .collect();
        let file_stem: String = page_id
            .chars()
            .map(|c| if c == '/' || c == '\\' || c == '!' { '_' } else { c })
            .collect();
        let prefix = if prefix.is_empty() { "_".to_string() } else { prefix };
        format!("{}/{}_{}.png", prefix, file_stem, image_index)
    }

    pub fn absolute_path(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path)
    }

    /// Write image bytes to a staging file beside their slot
    ///
    /// The file at the slot itself is untouched until [`ImageStore::commit`].
    pub async fn stage(&self, page_id: &str, image_index: i64, bytes: &[u8]) -> Result<StagedImage> {
        if bytes.is_empty() {
            return Err(CacheError::invalid("image", "Image data is empty"));
        }

        let relative_path = Self::relative_path(page_id, image_index);
        let staging_path = format!("{}{}", relative_path, STAGING_SUFFIX);
        let path = self.absolute_path(&staging_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;

        let image = StoredImage {
            relative_path,
            size_bytes: bytes.len() as i64,
            mime_type: detect_mime_type(bytes).to_string(),
            content_hash: content_hash(bytes),
        };

        debug!(
            page_id,
            image_index,
            size_bytes = image.size_bytes,
            mime_type = %image.mime_type,
            "Staged image"
        );

        Ok(StagedImage {
            image,
            staging_path,
        })
    }

    /// Move a staged image into its slot, replacing any previous file
    pub async fn commit(&self, staged: &StagedImage) -> Result<()> {
        fs::rename(
            self.absolute_path(&staged.staging_path),
            self.absolute_path(&staged.image.relative_path),
        )
        .await?;
        Ok(())
    }

    /// Drop a staged image without touching its slot
    pub async fn discard(&self, staged: &StagedImage) -> Result<()> {
        self.remove(&staged.staging_path).await
    }

    /// Stage and commit in one step
    pub async fn save(&self, page_id: &str, image_index: i64, bytes: &[u8]) -> Result<StoredImage> {
        let staged = self.stage(page_id, image_index, bytes).await?;
        self.commit(&staged).await?;
        Ok(staged.image)
    }

    pub async fn read(&self, relative_path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.absolute_path(relative_path)).await?)
    }

    /// Remove a stored file; a missing file is not an error
    pub async fn remove(&self, relative_path: &str) -> Result<()> {
        match fs::remove_file(self.absolute_path(relative_path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Hex-encoded sha256 of `bytes`
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Guess a MIME type from magic bytes
pub fn detect_mime_type(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [b'B', b'M', ..] => "image/bmp",
        _ => "application/octet-stream",
    }
}
