//! Result fusion: Reciprocal Rank Fusion and learned (query-class weighted)
//! fusion of dense and sparse score lists (spec §4.4.3, §4.5).

use std::collections::HashMap;

/// Query class used to pick a learned-fusion weight pair (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryClass {
    Conceptual,
    ExactMatch,
    Hybrid,
}

/// Classify by regex+length heuristics: short, code-like, or quoted queries
/// are exact-match; long natural-language queries are conceptual; everything
/// else is the balanced default (spec §4.5).
pub fn classify_query(query: &str) -> QueryClass {
    let trimmed = query.trim();
    let looks_exact = trimmed.contains('"')
        || trimmed.contains('(')
        || trimmed.contains('{')
        || trimmed.contains('=')
        || trimmed.split_whitespace().count() <= 2;
    if looks_exact {
        return QueryClass::ExactMatch;
    }

    let word_count = trimmed.split_whitespace().count();
    let is_question = trimmed.ends_with('?')
        || ["what ", "how ", "why ", "when ", "where "]
            .iter()
            .any(|p| trimmed.to_lowercase().starts_with(p));
    if word_count >= 6 || is_question {
        return QueryClass::Conceptual;
    }

    QueryClass::Hybrid
}

/// Learned-fusion weight table (spec §4.4.3): `(w_dense, w_sparse)`.
pub fn learned_weights(class: QueryClass) -> (f32, f32) {
    match class {
        QueryClass::Conceptual => (0.7, 0.3),
        QueryClass::ExactMatch => (0.3, 0.7),
        QueryClass::Hybrid => (0.5, 0.5),
    }
}

/// Reciprocal Rank Fusion: `score(d) = Σ 1/(k + rank_i(d))` across both lists.
pub fn reciprocal_rank_fusion(dense: &[(String, f32)], sparse: &[(String, f32)], k: f32) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    for (rank, (id, _)) in dense.iter().enumerate() {
        *scores.entry(id.clone()).or_default() += 1.0 / (k + rank as f32 + 1.0);
    }
    for (rank, (id, _)) in sparse.iter().enumerate() {
        *scores.entry(id.clone()).or_default() += 1.0 / (k + rank as f32 + 1.0);
    }
    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}

fn min_max_normalize(scores: &[(String, f32)]) -> HashMap<String, f32> {
    if scores.is_empty() {
        return HashMap::new();
    }
    let min = scores.iter().map(|(_, s)| *s).fold(f32::INFINITY, f32::min);
    let max = scores.iter().map(|(_, s)| *s).fold(f32::NEG_INFINITY, f32::max);
    let range = (max - min).max(f32::EPSILON);
    scores.iter().map(|(id, s)| (id.clone(), (s - min) / range)).collect()
}

/// Learned fusion: normalise each list to [0,1], then combine with the
/// query-class weight pair (spec §4.4.3, §4.5).
pub fn learned_fusion(dense: &[(String, f32)], sparse: &[(String, f32)], class: QueryClass) -> Vec<(String, f32)> {
    let (w_dense, w_sparse) = learned_weights(class);
    let dense_norm = min_max_normalize(dense);
    let sparse_norm = min_max_normalize(sparse);

    let mut combined: HashMap<String, f32> = HashMap::new();
    for (id, score) in &dense_norm {
        *combined.entry(id.clone()).or_default() += w_dense * score;
    }
    for (id, score) in &sparse_norm {
        *combined.entry(id.clone()).or_default() += w_sparse * score;
    }

    let mut results: Vec<(String, f32)> = combined.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_rewards_items_in_both_lists() {
        let dense = vec![("a".to_string(), 0.9), ("b".to_string(), 0.8)];
        let sparse = vec![("b".to_string(), 0.95), ("c".to_string(), 0.7)];
        let fused = reciprocal_rank_fusion(&dense, &sparse, 60.0);
        assert_eq!(fused[0].0, "b");
    }

    #[test]
    fn classify_short_queries_as_exact_match() {
        assert_eq!(classify_query("ENOSPC"), QueryClass::ExactMatch);
        assert_eq!(classify_query("fn main()"), QueryClass::ExactMatch);
    }

    #[test]
    fn classify_questions_as_conceptual() {
        assert_eq!(
            classify_query("how to recover from postgres full disk on ci"),
            QueryClass::Conceptual
        );
    }

    #[test]
    fn learned_weights_match_spec_table() {
        assert_eq!(learned_weights(QueryClass::Conceptual), (0.7, 0.3));
        assert_eq!(learned_weights(QueryClass::ExactMatch), (0.3, 0.7));
        assert_eq!(learned_weights(QueryClass::Hybrid), (0.5, 0.5));
    }

    #[test]
    fn learned_fusion_favors_dense_for_conceptual_queries() {
        let dense = vec![("x".to_string(), 1.0), ("y".to_string(), 0.0)];
        let sparse = vec![("x".to_string(), 0.0), ("y".to_string(), 1.0)];
        let fused = learned_fusion(&dense, &sparse, QueryClass::Conceptual);
        assert_eq!(fused[0].0, "x");
    }
}
