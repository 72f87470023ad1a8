//! Catalog content repository: course embeddings and usage counts.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use lerno_core::{CatalogRepository, ContentUsage, CourseEmbedding, Error, Result};

/// PostgreSQL implementation of [`CatalogRepository`].
#[derive(Clone)]
pub struct PgCatalogRepository {
    pool: PgPool,
}

impl PgCatalogRepository {
    /// Create a new repository over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn usage(
        &self,
        join_table: &str,
        content_table: &str,
        id_column: &str,
        tenant_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<ContentUsage>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // Distinct course names per content item; array_agg keeps one row
        // per item with the usage list attached.
        let query = format!(
            "SELECT c.id, c.title,
                    array_agg(DISTINCT co.title) AS course_names
             FROM {content_table} c
             JOIN {join_table} j ON j.{id_column} = c.id
             JOIN courses co ON co.id = j.course_id
             WHERE c.tenant_id = $1 AND c.id = ANY($2)
             GROUP BY c.id, c.title"
        );

        let rows = sqlx::query(&query)
            .bind(tenant_id)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| ContentUsage {
                id: row.get("id"),
                title: row.get("title"),
                course_names: row.get("course_names"),
            })
            .collect())
    }
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    async fn course_embeddings(&self, tenant_id: Uuid) -> Result<Vec<CourseEmbedding>> {
        let rows = sqlx::query(
            "SELECT id, title, status, embedding
             FROM courses
             WHERE tenant_id = $1 AND embedding IS NOT NULL",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let vector: Vector = row.get("embedding");
                CourseEmbedding {
                    id: row.get("id"),
                    title: row.get("title"),
                    status: row.get("status"),
                    embedding: vector.into(),
                }
            })
            .collect())
    }

    async fn video_usage(&self, tenant_id: Uuid, video_ids: &[Uuid]) -> Result<Vec<ContentUsage>> {
        self.usage("course_videos", "videos", "video_id", tenant_id, video_ids)
            .await
    }

    async fn module_usage(
        &self,
        tenant_id: Uuid,
        module_ids: &[Uuid],
    ) -> Result<Vec<ContentUsage>> {
        self.usage(
            "course_modules",
            "modules",
            "module_id",
            tenant_id,
            module_ids,
        )
        .await
    }

    async fn store_course_embedding(
        &self,
        tenant_id: Uuid,
        course_id: Uuid,
        embedding: &[f32],
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE courses SET embedding = $1 WHERE id = $2 AND tenant_id = $3",
        )
        .bind(Vector::from(embedding.to_vec()))
        .bind(course_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::InvalidInput(format!(
                "course {course_id} not found for tenant {tenant_id}"
            )));
        }
        Ok(())
    }
}
