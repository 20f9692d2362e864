//! SQLite-backed [`VectorStore`].
//!
//! Passages are stored in a single `passages` table with the embedding as a
//! little-endian `f32` BLOB and metadata as JSON text. Queries load every
//! row, evaluate the filter in Rust, and rank by cosine similarity, which is
//! adequate for a single handbook (a few thousand passages).

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{AssistantError, Result};
use crate::migrate;
use crate::models::RetrievedDocument;

use super::{nearest, StoredPassage, VectorQuery, VectorStore};

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn add(
        &self,
        id: &str,
        embedding: &[f32],
        document: &str,
        metadata: &Map<String, Value>,
    ) -> Result<()> {
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| AssistantError::StoreQueryFailed(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO passages (id, seq, document, embedding, dims, metadata_json)
            VALUES (?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM passages), ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document = excluded.document,
                embedding = excluded.embedding,
                dims = excluded.dims,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(id)
        .bind(document)
        .bind(vec_to_blob(embedding))
        .bind(embedding.len() as i64)
        .bind(metadata_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query(&self, query: &VectorQuery<'_>) -> Result<Vec<RetrievedDocument>> {
        let rows = sqlx::query(
            "SELECT id, document, embedding, metadata_json FROM passages ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut passages = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            let metadata = match serde_json::from_str::<Value>(&metadata_json) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
            passages.push(StoredPassage {
                id: row.get("id"),
                document: row.get("document"),
                embedding: blob_to_vec(&blob),
                metadata,
            });
        }

        tracing::trace!(rows = passages.len(), "sqlite store scanned passages");
        Ok(nearest(passages.iter(), query))
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM passages")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
