//! Reranker service: pairwise relevance scores for (query, document) (spec
//! §2, §4.4.4, §6). Cross-encoder when available, BM25-like term overlap
//! fallback otherwise.

#[cfg(feature = "embeddings")]
mod cross_encoder;

#[cfg(feature = "embeddings")]
pub use cross_encoder::CrossEncoderReranker;

/// One reranked candidate.
#[derive(Debug, Clone)]
pub struct RerankedResult<T> {
    pub item: T,
    pub score: f32,
    pub original_rank: usize,
}

#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum RerankerError {
    #[error("reranker model initialization failed: {0}")]
    ModelInit(String),
    #[error("reranking failed: {0}")]
    RerankFailed(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub trait Reranker: Send + Sync {
    /// Score and reorder `candidates` by relevance to `query`. `top_k`
    /// truncates; `None` keeps the full candidate set.
    fn rerank<T: Clone>(
        &self,
        query: &str,
        candidates: Vec<(T, String)>,
        top_k: Option<usize>,
    ) -> Result<Vec<RerankedResult<T>>, RerankerError>;

    fn has_cross_encoder(&self) -> bool {
        false
    }
}

/// BM25-inspired term overlap score, used when no cross-encoder is loaded
/// (spec §4.4.4 falls back to this implicitly via the reranker contract).
pub fn bm25_like_score(query: &str, document: &str) -> f32 {
    let query_lower = query.to_lowercase();
    let terms: Vec<&str> = query_lower.split_whitespace().collect();
    let doc_lower = document.to_lowercase();
    let doc_len = document.len() as f32;
    if doc_len == 0.0 || terms.is_empty() {
        return 0.0;
    }

    let k1 = 1.2_f32;
    let b = 0.75_f32;
    let avg_doc_len = 500.0_f32;

    let mut score = 0.0;
    for term in &terms {
        let tf = doc_lower.matches(term).count() as f32;
        if tf > 0.0 {
            let numerator = tf * (k1 + 1.0);
            let denominator = tf + k1 * (1.0 - b + b * (doc_len / avg_doc_len));
            score += numerator / denominator;
        }
    }
    score / terms.len() as f32
}

/// Reranker implementation that only ever uses the BM25-like fallback —
/// used when the `embeddings` feature is disabled, or as the always-on
/// fallback the cross-encoder reranker delegates to on model failure.
#[derive(Debug, Clone, Default)]
pub struct FallbackReranker;

impl Reranker for FallbackReranker {
    fn rerank<T: Clone>(
        &self,
        query: &str,
        candidates: Vec<(T, String)>,
        top_k: Option<usize>,
    ) -> Result<Vec<RerankedResult<T>>, RerankerError> {
        if query.is_empty() {
            return Err(RerankerError::InvalidInput("query cannot be empty".into()));
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut results: Vec<RerankedResult<T>> = candidates
            .into_iter()
            .enumerate()
            .map(|(rank, (item, text))| RerankedResult {
                item,
                score: bm25_like_score(query, &text),
                original_rank: rank,
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(k) = top_k {
            results.truncate(k);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_rerank_orders_by_term_overlap() {
        let reranker = FallbackReranker;
        let candidates = vec![
            (1, "the quick brown fox".to_string()),
            (2, "a lazy dog sleeps".to_string()),
            (3, "the fox jumps over".to_string()),
        ];
        let results = reranker.rerank("fox", candidates, Some(2)).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].item == 1 || results[0].item == 3);
    }

    #[test]
    fn empty_query_is_rejected() {
        let reranker = FallbackReranker;
        assert!(reranker.rerank("", vec![(1, "x".to_string())], None).is_err());
    }

    #[test]
    fn empty_candidates_is_empty_result() {
        let reranker = FallbackReranker;
        let candidates: Vec<(i32, String)> = vec![];
        assert!(reranker.rerank("q", candidates, None).unwrap().is_empty());
    }
}
