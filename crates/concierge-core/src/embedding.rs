//! Embedder contract and vector utilities.
//!
//! Defines the [`Embedder`] trait that every embedding backend implements,
//! plus pure helper functions for vector serialization and similarity
//! computation.
//!
//! Concrete backends (OpenAI, disabled) live in the `concierge` app crate.
//! An embedder makes exactly one remote call per text and never retries on
//! its own; callers decide whether a failure skips a chunk or aborts.

use async_trait::async_trait;

use crate::error::Result;

/// Text → fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-ada-002"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a single text.
    ///
    /// Transport and API failures surface as
    /// [`Error::EmbeddingFailed`](crate::error::Error::EmbeddingFailed).
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Encode a vector as little-endian `f32` bytes for BLOB storage.
///
/// ```rust
/// use concierge_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![0.25f32, -1.0];
/// assert_eq!(vec_to_blob(&v).len(), 8);
/// assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB written by [`vec_to_blob`]. Trailing bytes that do not
/// form a whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm operand, so a malformed stored vector can never outrank a
/// real match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_layout_is_little_endian() {
        let blob = vec_to_blob(&[1.0f32]);
        assert_eq!(blob, 1.0f32.to_le_bytes().to_vec());
        let restored = blob_to_vec(&vec_to_blob(&[3.5, -0.001, 0.0]));
        assert_eq!(restored, vec![3.5, -0.001, 0.0]);
    }

    #[test]
    fn test_blob_ignores_partial_trailing_bytes() {
        let mut blob = vec_to_blob(&[2.0f32]);
        blob.push(0xff);
        assert_eq!(blob_to_vec(&blob), vec![2.0]);
    }

    #[test]
    fn test_cosine_cases() {
        let cases: [(&[f32], &[f32], f32); 5] = [
            (&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0], 1.0),
            (&[1.0, 0.0], &[0.0, 1.0], 0.0),
            (&[1.0, 0.0], &[-1.0, 0.0], -1.0),
            (&[], &[], 0.0),
            (&[1.0, 2.0], &[1.0], 0.0),
        ];
        for (a, b, want) in cases {
            let got = cosine_similarity(a, b);
            assert!((got - want).abs() < 1e-6, "{:?} vs {:?}: {}", a, b, got);
        }
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
