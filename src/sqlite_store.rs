//! SQLite-backed [`KnowledgeStore`].
//!
//! Embeddings are stored as little-endian `f32` BLOBs in `document_chunks`.
//! Similarity is brute-force cosine computed in process over the chunks of
//! active knowledge-base documents; archived documents and user uploads
//! never match.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use concierge_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use concierge_core::error::Result;
use concierge_core::models::{Chunk, ChunkMatch};
use concierge_core::store::KnowledgeStore;

use crate::db::db_error;

pub struct SqliteKnowledgeStore {
    pool: SqlitePool,
    model: String,
}

impl SqliteKnowledgeStore {
    /// `model` is recorded with every inserted row.
    pub fn new(pool: SqlitePool, model: impl Into<String>) -> Self {
        Self {
            pool,
            model: model.into(),
        }
    }
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn insert_chunk(&self, chunk: &Chunk, embedding: &[f32]) -> Result<()> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO document_chunks
                (id, document_id, chunk_index, chunk_text, hash, embedding, dims, model, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(vec_to_blob(embedding))
        .bind(embedding.len() as i64)
        .bind(&self.model)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn match_chunks(
        &self,
        embedding: &[f32],
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<ChunkMatch>> {
        let rows = sqlx::query(
            "SELECT c.document_id, c.chunk_index, c.chunk_text, c.embedding
             FROM document_chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE d.status = 'active' AND d.document_type = 'knowledge_base'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut matches: Vec<ChunkMatch> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(embedding, &blob_to_vec(&blob));
                (similarity >= threshold).then(|| ChunkMatch {
                    document_id: row.get("document_id"),
                    chunk_index: row.get("chunk_index"),
                    chunk_text: row.get("chunk_text"),
                    similarity,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete_chunks(&self, document_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn count_chunks(&self, document_id: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(count as u64)
    }
}
