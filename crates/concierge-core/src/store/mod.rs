//! Vector store abstraction.
//!
//! The [`KnowledgeStore`] trait is everything the ingestion pipeline and
//! the prompt assembler need from the database: append one embedded chunk,
//! run a thresholded nearest-neighbour query, and drop a document's chunks.
//! How similarity is computed (brute force, an index, a remote procedure)
//! is the backend's business.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Chunk, ChunkMatch};

/// Storage for embedded knowledge-base chunks.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_chunk`](KnowledgeStore::insert_chunk) | Persist one chunk and its embedding |
/// | [`match_chunks`](KnowledgeStore::match_chunks) | Thresholded top-k similarity query |
/// | [`delete_chunks`](KnowledgeStore::delete_chunks) | Remove every chunk of a document |
/// | [`count_chunks`](KnowledgeStore::count_chunks) | Number of chunks stored for a document |
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Insert one row. Chunks are immutable once written.
    async fn insert_chunk(&self, chunk: &Chunk, embedding: &[f32]) -> Result<()>;

    /// Return up to `top_k` chunks whose similarity to `embedding` is at
    /// least `threshold`, ordered by descending similarity. Ties are broken
    /// arbitrarily. No qualifying row yields an empty vector, not an error.
    async fn match_chunks(
        &self,
        embedding: &[f32],
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<ChunkMatch>>;

    /// Delete every chunk owned by `document_id`, returning how many went.
    async fn delete_chunks(&self, document_id: &str) -> Result<u64>;

    async fn count_chunks(&self, document_id: &str) -> Result<u64>;
}
