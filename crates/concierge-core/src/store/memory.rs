//! In-memory [`KnowledgeStore`] for tests and single-process demos.
//!
//! Rows live in a `Vec` behind `std::sync::RwLock`. Similarity search is
//! brute-force cosine over every stored vector.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{Chunk, ChunkMatch};

use super::KnowledgeStore;

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    rows: RwLock<Vec<StoredChunk>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk texts of a document in index order.
    pub fn chunk_texts(&self, document_id: &str) -> Result<Vec<String>> {
        let rows = self.read()?;
        let mut found: Vec<&StoredChunk> = rows
            .iter()
            .filter(|r| r.chunk.document_id == document_id)
            .collect();
        found.sort_by_key(|r| r.chunk.chunk_index);
        Ok(found.into_iter().map(|r| r.chunk.text.clone()).collect())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<StoredChunk>>> {
        self.rows
            .read()
            .map_err(|_| Error::upstream("memory store", "lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<StoredChunk>>> {
        self.rows
            .write()
            .map_err(|_| Error::upstream("memory store", "lock poisoned"))
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn insert_chunk(&self, chunk: &Chunk, embedding: &[f32]) -> Result<()> {
        let mut rows = self.write()?;
        let duplicate = rows.iter().any(|r| {
            r.chunk.document_id == chunk.document_id && r.chunk.chunk_index == chunk.chunk_index
        });
        if duplicate {
            return Err(Error::upstream(
                "memory store",
                format!(
                    "chunk {} of document {} already stored",
                    chunk.chunk_index, chunk.document_id
                ),
            ));
        }
        rows.push(StoredChunk {
            chunk: chunk.clone(),
            vector: embedding.to_vec(),
        });
        Ok(())
    }

    async fn match_chunks(
        &self,
        embedding: &[f32],
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<ChunkMatch>> {
        let rows = self.read()?;
        let mut matches: Vec<ChunkMatch> = rows
            .iter()
            .filter_map(|r| {
                let similarity = cosine_similarity(embedding, &r.vector);
                (similarity >= threshold).then(|| ChunkMatch {
                    document_id: r.chunk.document_id.clone(),
                    chunk_index: r.chunk.chunk_index,
                    chunk_text: r.chunk.text.clone(),
                    similarity,
                })
            })
            .collect();
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete_chunks(&self, document_id: &str) -> Result<u64> {
        let mut rows = self.write()?;
        let before = rows.len();
        rows.retain(|r| r.chunk.document_id != document_id);
        Ok((before - rows.len()) as u64)
    }

    async fn count_chunks(&self, document_id: &str) -> Result<u64> {
        let rows = self.read()?;
        Ok(rows
            .iter()
            .filter(|r| r.chunk.document_id == document_id)
            .count() as u64)
    }
}
