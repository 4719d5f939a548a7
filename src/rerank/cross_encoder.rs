//! Cross-encoder reranker backed by fastembed's Jina Reranker v1 Turbo.

use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::Mutex;

use super::{bm25_like_score, RerankedResult, Reranker, RerankerError};

/// Loads lazily via [`CrossEncoderReranker::new`] — construction never
/// blocks; `init()` downloads and loads the model explicitly (call during
/// process startup, not on a hot path or in tests).
pub struct CrossEncoderReranker {
    model: Mutex<Option<TextRerank>>,
}

impl Default for CrossEncoderReranker {
    fn default() -> Self {
        Self::new()
    }
}

impl CrossEncoderReranker {
    pub fn new() -> Self {
        Self { model: Mutex::new(None) }
    }

    /// Download and load the cross-encoder model. Falls back silently to
    /// BM25-like scoring if this is never called or fails.
    pub fn init(&self) {
        let mut guard = self.model.lock().expect("reranker model lock poisoned");
        if guard.is_some() {
            return;
        }
        let options = RerankInitOptions::new(RerankerModel::JINARerankerV1TurboEn)
            .with_show_download_progress(true);
        match TextRerank::try_new(options) {
            Ok(model) => *guard = Some(model),
            Err(e) => tracing::warn!("cross-encoder reranker unavailable, using BM25 fallback: {e}"),
        }
    }
}

impl Reranker for CrossEncoderReranker {
    fn has_cross_encoder(&self) -> bool {
        self.model.lock().map(|g| g.is_some()).unwrap_or(false)
    }

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

        let mut guard = self.model.lock().expect("reranker model lock poisoned");
        if let Some(model) = guard.as_mut() {
            let documents: Vec<&str> = candidates.iter().map(|(_, t)| t.as_str()).collect();
            if let Ok(scored) = model.rerank(query, &documents, false, None) {
                let mut results: Vec<RerankedResult<T>> = scored
                    .into_iter()
                    .filter_map(|r| candidates.get(r.index).map(|(item, _)| RerankedResult {
                        item: item.clone(),
                        score: r.score,
                        original_rank: r.index,
                    }))
                    .collect();
                results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
                if let Some(k) = top_k {
                    results.truncate(k);
                }
                return Ok(results);
            }
            tracing::debug!("cross-encoder rerank call failed, falling back to BM25 for this call");
        }
        drop(guard);

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
    fn uninitialized_reranker_has_no_cross_encoder() {
        let reranker = CrossEncoderReranker::new();
        assert!(!reranker.has_cross_encoder());
    }

    #[test]
    fn falls_back_to_bm25_without_init() {
        let reranker = CrossEncoderReranker::new();
        let candidates = vec![(1, "fox fox fox".to_string()), (2, "completely unrelated".to_string())];
        let results = reranker.rerank("fox", candidates, None).unwrap();
        assert_eq!(results[0].item, 1);
    }
}
