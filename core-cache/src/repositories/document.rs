//! Document repository trait and implementation

use crate::error::{CacheError, Result};
use crate::models::{now_timestamp, CachedDocument, DocumentSyncInfo};
use async_trait::async_trait;
use sqlx::{query_as, Sqlite, SqlitePool};
use std::collections::HashMap;
use tracing::debug;

/// Document repository interface
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Find a document by page id, tombstoned rows included
    async fn find_by_id(&self, page_id: &str) -> Result<Option<CachedDocument>>;

    /// All non-tombstoned documents, most recently modified first
    async fn get_all(&self) -> Result<Vec<CachedDocument>>;

    /// Non-tombstoned documents whose `indexed_at` is null or older than
    /// `last_synced_at`, oldest sync first
    async fn needing_indexing(&self, limit: i64) -> Result<Vec<CachedDocument>>;

    /// Non-tombstoned documents with a remote modification after `since`
    async fn modified_since(&self, since: i64) -> Result<Vec<CachedDocument>>;

    /// Page ids of every non-tombstoned document
    async fn active_page_ids(&self) -> Result<Vec<String>>;

    /// Diff projection of every row, keyed by page id
    async fn sync_index(&self) -> Result<HashMap<String, DocumentSyncInfo>>;

    /// Insert or update by `page_id`
    ///
    /// On update the row is un-tombstoned, `sync_version` is incremented and
    /// `last_synced_at` is kept strictly newer than `indexed_at` so the page is
    /// picked up again by the indexer. Indexing columns are left untouched.
    ///
    /// # Errors
    /// Returns error if validation fails or a database error occurs
    async fn upsert(&self, document: &CachedDocument) -> Result<()>;

    /// Upsert many documents in one transaction
    async fn bulk_upsert(&self, documents: &[CachedDocument]) -> Result<usize>;

    /// Record that the downstream indexer processed a page
    ///
    /// # Errors
    /// Returns `NotFound` if the page does not exist
    async fn mark_indexed(&self, page_id: &str, chunk_count: i64, image_count: i64)
        -> Result<()>;

    /// Tombstone pages; returns how many rows changed
    async fn mark_deleted(&self, page_ids: &[String]) -> Result<u64>;

    /// Count non-tombstoned documents
    async fn count(&self) -> Result<i64>;
}

/// SQLite implementation of DocumentRepository
pub struct SqliteDocumentRepository {
    pool: SqlitePool,
}

impl SqliteDocumentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const UPSERT_SQL: &str = r#"
    INSERT INTO documents (
        page_id, html_content, plain_text,
        notebook_id, notebook_name, section_id, section_name, page_title,
        author, created_date, modified_date, source_url, tags,
        last_synced_at, sync_version, is_deleted,
        indexed_at, chunk_count, image_count,
        extra_metadata, created_at, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 0, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(page_id) DO UPDATE SET
        html_content = excluded.html_content,
        plain_text = excluded.plain_text,
        notebook_id = excluded.notebook_id,
        notebook_name = excluded.notebook_name,
        section_id = excluded.section_id,
        section_name = excluded.section_name,
        page_title = excluded.page_title,
        author = excluded.author,
        created_date = excluded.created_date,
        modified_date = excluded.modified_date,
        source_url = excluded.source_url,
        tags = excluded.tags,
        last_synced_at = MAX(excluded.last_synced_at, COALESCE(documents.indexed_at + 1, 0)),
        sync_version = documents.sync_version + 1,
        is_deleted = 0,
        extra_metadata = excluded.extra_metadata,
        updated_at = excluded.updated_at
"#;

async fn upsert_with<'e, E>(executor: E, document: &CachedDocument) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    document
        .validate()
        .map_err(|msg| CacheError::invalid("document", msg))?;

    sqlx::query(UPSERT_SQL)
        .bind(&document.page_id)
        .bind(&document.html_content)
        .bind(&document.plain_text)
        .bind(&document.notebook_id)
        .bind(&document.notebook_name)
        .bind(&document.section_id)
        .bind(&document.section_name)
        .bind(&document.page_title)
        .bind(&document.author)
        .bind(document.created_date)
        .bind(document.modified_date)
        .bind(&document.source_url)
        .bind(&document.tags)
        .bind(document.last_synced_at)
        .bind(document.indexed_at)
        .bind(document.chunk_count)
        .bind(document.image_count)
        .bind(&document.extra_metadata)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(executor)
        .await?;

    Ok(())
}

#[async_trait]
impl DocumentRepository for SqliteDocumentRepository {
    async fn find_by_id(&self, page_id: &str) -> Result<Option<CachedDocument>> {
        let document =
            query_as::<_, CachedDocument>("SELECT * FROM documents WHERE page_id = ?")
                .bind(page_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(document)
    }

    async fn get_all(&self) -> Result<Vec<CachedDocument>> {
        let documents = query_as::<_, CachedDocument>(
            "SELECT * FROM documents WHERE is_deleted = 0 ORDER BY modified_date DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(documents)
    }

    async fn needing_indexing(&self, limit: i64) -> Result<Vec<CachedDocument>> {
        let documents = query_as::<_, CachedDocument>(
            r#"
            SELECT * FROM documents
            WHERE is_deleted = 0
              AND (indexed_at IS NULL OR indexed_at < last_synced_at)
            ORDER BY last_synced_at ASC
            LIMIT ?
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(documents)
    }

    async fn modified_since(&self, since: i64) -> Result<Vec<CachedDocument>> {
        let documents = query_as::<_, CachedDocument>(
            r#"
            SELECT * FROM documents
            WHERE is_deleted = 0 AND modified_date > ?
            ORDER BY modified_date DESC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(documents)
    }

    async fn active_page_ids(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            query_as("SELECT page_id FROM documents WHERE is_deleted = 0 ORDER BY page_id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn sync_index(&self) -> Result<HashMap<String, DocumentSyncInfo>> {
        let rows = query_as::<_, DocumentSyncInfo>(
            "SELECT page_id, notebook_id, section_id, modified_date, is_deleted FROM documents",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|info| (info.page_id.clone(), info))
            .collect())
    }

    async fn upsert(&self, document: &CachedDocument) -> Result<()> {
        upsert_with(&self.pool, document).await
    }

    async fn bulk_upsert(&self, documents: &[CachedDocument]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for document in documents {
            upsert_with(&mut *tx, document).await?;
        }
        tx.commit().await?;

        debug!(count = documents.len(), "Bulk upserted documents");
        Ok(documents.len())
    }

    async fn mark_indexed(
        &self,
        page_id: &str,
        chunk_count: i64,
        image_count: i64,
    ) -> Result<()> {
        let now = now_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET indexed_at = MAX(?, last_synced_at),
                chunk_count = ?,
                image_count = ?,
                updated_at = ?
            WHERE page_id = ?
            "#,
        )
        .bind(now)
        .bind(chunk_count)
        .bind(image_count)
        .bind(now)
        .bind(page_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CacheError::NotFound {
                entity_type: "Document".to_string(),
                id: page_id.to_string(),
            });
        }

        Ok(())
    }

    async fn mark_deleted(&self, page_ids: &[String]) -> Result<u64> {
        if page_ids.is_empty() {
            return Ok(0);
        }

        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;
        let mut changed = 0;
        for page_id in page_ids {
            let result = sqlx::query(
                "UPDATE documents SET is_deleted = 1, updated_at = ? WHERE page_id = ? AND is_deleted = 0",
            )
            .bind(now)
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
            changed += result.rows_affected();
        }
        tx.commit().await?;

        Ok(changed)
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = query_as("SELECT COUNT(*) FROM documents WHERE is_deleted = 0")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
