//! Query intelligence: typo correction, synonym expansion, and intent
//! classification ahead of retrieval (spec §4.4.1).

use std::collections::HashMap;

/// A small domain synonym map. Keys and values both count as vocabulary for
/// typo correction (spec §4.4.1: "against a known vocabulary (synonym map
/// keys+values)").
fn synonym_map() -> &'static HashMap<&'static str, &'static [&'static str]> {
    use std::sync::OnceLock;
    static MAP: OnceLock<HashMap<&'static str, &'static [&'static str]>> = OnceLock::new();
    MAP.get_or_init(|| {
        HashMap::from([
            ("error", &["bug", "failure", "exception"][..]),
            ("bug", &["error", "defect"][..]),
            ("fix", &["solution", "resolve", "patch"][..]),
            ("solution", &["fix", "resolution"][..]),
            ("decision", &["choice", "tradeoff"][..]),
            ("pattern", &["approach", "idiom"][..]),
            ("config", &["configuration", "settings"][..]),
            ("database", &["db", "datastore"][..]),
            ("deploy", &["deployment", "release"][..]),
            ("docker", &["container"][..]),
            ("slow", &["latency", "performance"][..]),
            ("crash", &["panic", "failure"][..]),
        ])
    })
}

fn vocabulary() -> Vec<&'static str> {
    synonym_map().iter().flat_map(|(k, v)| std::iter::once(*k).chain(v.iter().copied())).collect()
}

/// Typo correction threshold (spec §4.4.1): string-ratio ≥ 0.6 for words
/// longer than 3 chars.
const TYPO_RATIO_THRESHOLD: f64 = 0.6;
const MIN_WORD_LEN_FOR_CORRECTION: usize = 4;
const MAX_SYNONYMS_PER_WORD: usize = 2;

/// Correct a single word against the vocabulary if it is not already in it
/// and a close enough match exists (spec §4.4.1).
fn correct_word(word: &str) -> Option<&'static str> {
    if word.len() <= MIN_WORD_LEN_FOR_CORRECTION - 1 || vocabulary().contains(&word) {
        return None;
    }
    vocabulary()
        .into_iter()
        .map(|candidate| (candidate, strsim::jaro_winkler(word, candidate)))
        .filter(|(_, ratio)| *ratio >= TYPO_RATIO_THRESHOLD)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(candidate, _)| candidate)
}

/// Expand a single word into up to [`MAX_SYNONYMS_PER_WORD`] synonyms.
fn expand_word(word: &str) -> Vec<&'static str> {
    synonym_map().get(word).map(|syns| syns.iter().take(MAX_SYNONYMS_PER_WORD).copied().collect()).unwrap_or_default()
}

/// The query after typo correction and synonym expansion, with the original
/// preserved for audit (spec §4.4.1).
#[derive(Debug, Clone)]
pub struct EnhancedQuery {
    pub original: String,
    pub enhanced: String,
    pub corrections: Vec<(String, String)>,
}

/// Run typo correction then synonym expansion over `query` (spec §4.4.1).
pub fn enhance_query(query: &str) -> EnhancedQuery {
    let mut corrections = Vec::new();
    let mut corrected_words = Vec::new();

    for word in query.split_whitespace() {
        let lower = word.to_lowercase();
        match correct_word(&lower) {
            Some(fixed) if fixed != lower => {
                corrections.push((word.to_string(), fixed.to_string()));
                corrected_words.push(fixed.to_string());
            }
            _ => corrected_words.push(lower),
        }
    }

    let mut expanded_words = corrected_words.clone();
    for word in &corrected_words {
        expanded_words.extend(expand_word(word).into_iter().map(str::to_string));
    }

    EnhancedQuery { original: query.to_string(), enhanced: expanded_words.join(" "), corrections }
}

/// The four intents a query is scored against (spec §4.4.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentScores {
    pub temporal: f64,
    pub relationship: f64,
    pub exact_match: f64,
    pub conceptual: f64,
}

const TEMPORAL_KEYWORDS: &[&str] = &["yesterday", "last week", "before", "after", "when", "ago", "since", "on "];
const RELATIONSHIP_KEYWORDS: &[&str] = &["related to", "caused", "fixed by", "similar to", "connected", "linked"];
const CONCEPTUAL_KEYWORDS: &[&str] = &["why", "how", "what is", "explain", "understand", "concept"];

fn looks_exact_match(query: &str) -> bool {
    query.contains('"') || query.contains('(') || query.contains('{') || query.split_whitespace().count() <= 2
}

/// Score a query against all four intents from keyword/regex signals (spec
/// §4.4.1). Scores are independent, not normalised to sum to 1 — the
/// routing table compares each against its own threshold.
pub fn classify_intent(query: &str) -> IntentScores {
    let lower = query.to_lowercase();
    let word_count = lower.split_whitespace().count().max(1) as f64;

    let temporal_hits = TEMPORAL_KEYWORDS.iter().filter(|k| lower.contains(*k)).count() as f64;
    let relationship_hits = RELATIONSHIP_KEYWORDS.iter().filter(|k| lower.contains(*k)).count() as f64;
    let conceptual_hits = CONCEPTUAL_KEYWORDS.iter().filter(|k| lower.contains(*k)).count() as f64;

    IntentScores {
        temporal: (temporal_hits / 1.0).min(1.0) * if temporal_hits > 0.0 { 0.8 } else { 0.0 },
        relationship: (relationship_hits / 1.0).min(1.0) * if relationship_hits > 0.0 { 0.75 } else { 0.0 },
        exact_match: if looks_exact_match(&lower) { 0.85 } else { (2.0 / word_count).min(0.5) },
        conceptual: if conceptual_hits > 0.0 { 0.8 } else { (word_count / 12.0).min(0.6) },
    }
}

/// Retrieval strategy chosen by the routing table (spec §4.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalPlan {
    SparseOnlyNoRerank,
    HybridWithGraphExpansion,
    HybridWithRecency,
    CompositeHybridRerank { recency: bool },
    SemanticRerank,
}

/// Route a query to a retrieval plan from its intent scores (spec §4.4.1
/// routing table, checked in the documented order).
pub fn route(scores: IntentScores) -> RetrievalPlan {
    if scores.exact_match > 0.7 {
        return RetrievalPlan::SparseOnlyNoRerank;
    }
    if scores.relationship > 0.6 {
        return RetrievalPlan::HybridWithGraphExpansion;
    }
    if scores.temporal > 0.6 {
        return RetrievalPlan::HybridWithRecency;
    }
    let above_half = [scores.temporal, scores.relationship, scores.exact_match, scores.conceptual]
        .iter()
        .filter(|s| **s > 0.5)
        .count();
    if above_half >= 2 {
        return RetrievalPlan::CompositeHybridRerank { recency: scores.temporal > 0.5 };
    }
    RetrievalPlan::SemanticRerank
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typo_is_corrected_when_close_enough() {
        let enhanced = enhance_query("databse crashed");
        assert!(enhanced.corrections.iter().any(|(orig, _)| orig == "databse"));
    }

    #[test]
    fn exact_vocabulary_word_is_not_corrected() {
        assert_eq!(correct_word("error"), None);
    }

    #[test]
    fn synonym_expansion_adds_up_to_two_words() {
        let enhanced = enhance_query("fix the bug");
        assert!(enhanced.enhanced.split_whitespace().count() > 3);
    }

    #[test]
    fn original_is_preserved_for_audit() {
        let enhanced = enhance_query("Fix The Bug");
        assert_eq!(enhanced.original, "Fix The Bug");
    }

    #[test]
    fn short_quoted_query_routes_to_sparse_only() {
        let scores = classify_intent("\"ENOSPC\"");
        assert_eq!(route(scores), RetrievalPlan::SparseOnlyNoRerank);
    }

    #[test]
    fn relationship_query_routes_to_graph_expansion() {
        let scores = classify_intent("what memories are related to this outage");
        assert_eq!(route(scores), RetrievalPlan::HybridWithGraphExpansion);
    }

    #[test]
    fn plain_conceptual_question_routes_to_semantic_rerank() {
        let scores = classify_intent("why does the cache layer exist in this architecture");
        assert!(matches!(route(scores), RetrievalPlan::SemanticRerank | RetrievalPlan::CompositeHybridRerank { .. }));
    }
}
