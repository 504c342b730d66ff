//! Image metadata repository

use crate::error::{CacheError, Result};
use crate::models::CachedImage;
use async_trait::async_trait;
use sqlx::{query_as, Sqlite, SqlitePool};

#[async_trait]
pub trait ImageRepository: Send + Sync {
    /// Images of a page ordered by `image_index`
    async fn find_by_page(&self, page_id: &str) -> Result<Vec<CachedImage>>;

    /// Insert or update by (`page_id`, `image_index`)
    async fn upsert(&self, image: &CachedImage) -> Result<()>;

    /// Replace a page's whole image set in one transaction
    async fn replace_for_page(&self, page_id: &str, images: &[CachedImage]) -> Result<()>;

    /// Remove every image row of a page; returns how many were removed
    async fn delete_for_page(&self, page_id: &str) -> Result<u64>;

    async fn count(&self) -> Result<i64>;
}

pub struct SqliteImageRepository {
    pool: SqlitePool,
}

impl SqliteImageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

async fn upsert_with<'e, E>(executor: E, image: &CachedImage) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    if image.image_index < 0 {
        return Err(CacheError::invalid(
            "image_index",
            format!("Image index must be non-negative, got {}", image.image_index),
        ));
    }

    sqlx::query(
        r#"
        INSERT INTO images (
            page_id, image_index, file_path, file_size_bytes, mime_type,
            content_hash, alt_text, vision_analysis, analyzed_at,
            resource_url, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(page_id, image_index) DO UPDATE SET
            file_path = excluded.file_path,
            file_size_bytes = excluded.file_size_bytes,
            mime_type = excluded.mime_type,
            content_hash = excluded.content_hash,
            alt_text = excluded.alt_text,
            resource_url = excluded.resource_url,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&image.page_id)
    .bind(image.image_index)
    .bind(&image.file_path)
    .bind(image.file_size_bytes)
    .bind(&image.mime_type)
    .bind(&image.content_hash)
    .bind(&image.alt_text)
    .bind(&image.vision_analysis)
    .bind(image.analyzed_at)
    .bind(&image.resource_url)
    .bind(image.created_at)
    .bind(image.updated_at)
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait]
impl ImageRepository for SqliteImageRepository {
    async fn find_by_page(&self, page_id: &str) -> Result<Vec<CachedImage>> {
        let images = query_as::<_, CachedImage>(
            "SELECT * FROM images WHERE page_id = ? ORDER BY image_index",
        )
        .bind(page_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(images)
    }

    async fn upsert(&self, image: &CachedImage) -> Result<()> {
        upsert_with(&self.pool, image).await
    }

    async fn replace_for_page(&self, page_id: &str, images: &[CachedImage]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM images WHERE page_id = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;

        for image in images {
            if image.page_id != page_id {
                return Err(CacheError::invalid(
                    "page_id",
                    format!("Image belongs to {} not {}", image.page_id, page_id),
                ));
            }
            upsert_with(&mut *tx, image).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_for_page(&self, page_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM images WHERE page_id = ?")
            .bind(page_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = query_as("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::CachedDocument;
    use crate::repositories::{DocumentRepository, SqliteDocumentRepository};

    async fn setup() -> (SqlitePool, SqliteImageRepository) {
        let pool = create_test_pool().await.unwrap();
        let documents = SqliteDocumentRepository::new(pool.clone());
        documents
            .upsert(&CachedDocument::new("page-1", "nb", "sec", "Page"))
            .await
            .unwrap();
        (pool.clone(), SqliteImageRepository::new(pool))
    }

    #[tokio::test]
    async fn test_upsert_and_find_ordered() {
        let (_pool, repo) = setup().await;
        repo.upsert(&CachedImage::new("page-1", 1, "page-1/page-1_1.png"))
            .await
            .unwrap();
        repo.upsert(&CachedImage::new("page-1", 0, "page-1/page-1_0.png"))
            .await
            .unwrap();

        let mut updated = CachedImage::new("page-1", 0, "page-1/page-1_0.png");
        updated.alt_text = Some("diagram".to_string());
        repo.upsert(&updated).await.unwrap();

        let images = repo.find_by_page("page-1").await.unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].image_index, 0);
        assert_eq!(images[0].alt_text.as_deref(), Some("diagram"));
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_replace_for_page() {
        let (_pool, repo) = setup().await;
        for i in 0..3 {
            repo.upsert(&CachedImage::new("page-1", i, format!("p/{i}.png")))
                .await
                .unwrap();
        }

        repo.replace_for_page("page-1", &[CachedImage::new("page-1", 0, "p/new.png")])
            .await
            .unwrap();

        let images = repo.find_by_page("page-1").await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].file_path, "p/new.png");
    }

    #[tokio::test]
    async fn test_image_requires_parent_document() {
        let (_pool, repo) = setup().await;
        let result = repo.upsert(&CachedImage::new("orphan", 0, "x.png")).await;
        assert!(matches!(result, Err(CacheError::Database(_))));
    }

    #[tokio::test]
    async fn test_delete_for_page() {
        let (_pool, repo) = setup().await;
        repo.upsert(&CachedImage::new("page-1", 0, "a.png")).await.unwrap();
        assert_eq!(repo.delete_for_page("page-1").await.unwrap(), 1);
        assert!(repo.find_by_page("page-1").await.unwrap().is_empty());
    }
}
