//! Embedding service: dense (768-d) and optional sparse vectors for
//! documents and queries (spec §2, §4.1, §6).

#[cfg(feature = "embeddings")]
mod local;

#[cfg(feature = "embeddings")]
pub use local::FastEmbedService;

use std::collections::BTreeMap;

/// Dimensionality of the dense embedding space (spec §3: "embedding (dense, 768-d)").
pub const DENSE_DIMENSIONS: usize = 768;

/// A sparse vector: term index → weight, akin to BM42/SPLADE output (spec §6).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product against another sparse vector, aligned on shared indices.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let map: BTreeMap<u32, f32> = self.indices.iter().copied().zip(self.values.iter().copied()).collect();
        other
            .indices
            .iter()
            .zip(other.values.iter())
            .filter_map(|(idx, val)| map.get(idx).map(|v| v * val))
            .sum()
    }
}

/// What side of an asymmetric embedding model a text is on (spec §6: the
/// adapter may prefix text with "search_document: " / "search_query: ").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedSide {
    Document,
    Query,
}

/// Embedding service error.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding model initialization failed: {0}")]
    ModelInit(String),
    #[error("embedding generation failed: {0}")]
    EmbeddingFailed(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Produces dense (and optionally sparse) vectors for documents and queries.
/// Implementors guard model load behind a one-time lazy initializer and are
/// thread-safe once loaded (spec §5, §9).
pub trait EmbeddingService: Send + Sync {
    fn dense(&self, text: &str, side: EmbedSide) -> Result<Vec<f32>, EmbeddingError>;

    fn dense_batch(&self, texts: &[&str], side: EmbedSide) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.dense(t, side)).collect()
    }

    /// Sparse embedding; `None` when the implementation has no sparse model
    /// (hybrid search then degrades to dense-only, per spec §4.1).
    fn sparse(&self, _text: &str) -> Result<Option<SparseVector>, EmbeddingError> {
        Ok(None)
    }

    fn dimensions(&self) -> usize {
        DENSE_DIMENSIONS
    }
}

/// Cosine similarity between two equal-length dense vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 { dot / denom } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![0.1, 0.2, 0.3, 0.4];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn sparse_dot_product_on_disjoint_indices_is_zero() {
        let a = SparseVector { indices: vec![1, 2], values: vec![1.0, 1.0] };
        let b = SparseVector { indices: vec![3, 4], values: vec![1.0, 1.0] };
        assert_eq!(a.dot(&b), 0.0);
    }

    #[test]
    fn sparse_dot_product_on_shared_indices() {
        let a = SparseVector { indices: vec![1, 2], values: vec![2.0, 3.0] };
        let b = SparseVector { indices: vec![2, 3], values: vec![5.0, 1.0] };
        assert_eq!(a.dot(&b), 15.0);
    }
}
