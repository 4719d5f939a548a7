//! Relationship inference: on-write (synchronous, bounded) and batch
//! (scheduled, corpus-wide) edge discovery (spec §4.10).

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::error::Result;
use crate::model::{EmbeddedRelation, Memory, MemoryType, Relation, RelationType};
use crate::quality;
use crate::store::VectorStore;

fn is_solution_like(memory_type: MemoryType) -> bool {
    matches!(memory_type, MemoryType::Learning | MemoryType::Decision | MemoryType::Docs)
}

/// Same-type similarity above which a neighbour is SIMILAR_TO rather than
/// the weaker RELATED (spec §4.10 "same type → SIMILAR_TO/RELATED").
const SIMILAR_TO_THRESHOLD: f32 = 0.85;

/// Classify what relation a neighbour should get relative to `source`, by
/// the same type/similarity heuristic used both on-write and when composing
/// read-only suggestions (spec §4.10).
pub fn classify_relation(source: &Memory, neighbor: &Memory, similarity: f32) -> Relation {
    if source.memory_type == MemoryType::Error && is_solution_like(neighbor.memory_type) && neighbor.created_at >= source.created_at {
        Relation::new(neighbor.id.clone(), source.id.clone(), RelationType::Fixes)
    } else if neighbor.memory_type == source.memory_type && similarity >= SIMILAR_TO_THRESHOLD {
        Relation::new(source.id.clone(), neighbor.id.clone(), RelationType::SimilarTo)
    } else {
        Relation::new(source.id.clone(), neighbor.id.clone(), RelationType::Related)
    }
}

/// Fetch the other endpoint of a just-created relation, append the
/// reciprocal embedded relation, and recompute its quality score —
/// `relations` is itself a quality-affecting field (spec §3, §4.2, §8
/// property 1 "quality freshness"). A no-op if the endpoint no longer
/// exists. Every call site that upserts a graph edge must pair it with this.
pub fn reciprocate(
    vector_store: &dyn VectorStore,
    other_id: &str,
    back_to: &str,
    relation_type: RelationType,
    now: DateTime<Utc>,
) -> Result<()> {
    if let Some(mut other) = vector_store.get(other_id)? {
        other.relations.push(EmbeddedRelation { target_id: back_to.to_string(), relation_type, created_at: now });
        let (score, components) = quality::score(&other, now);
        other.quality_score = score;
        other.quality_components = components;
        vector_store.set_payload(&other.id, &other)?;
    }
    Ok(())
}

/// On-write inference (spec §4.10): given up to `max_relationships` dense
/// neighbours (already filtered to the same project), classify each by
/// simple type heuristics and emit the edges to create. The caller is
/// responsible for persisting the returned edges and, for each, recomputing
/// quality on both endpoints through the payload-update wrapper.
pub fn infer_on_write(source: &Memory, neighbors: &[(Memory, f32)], max_relationships: usize) -> Vec<Relation> {
    let mut ranked: Vec<&(Memory, f32)> = neighbors.iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    ranked
        .into_iter()
        .take(max_relationships)
        .map(|(neighbor, similarity)| classify_relation(source, neighbor, *similarity))
        .collect()
}

/// Batch error→solution linking (spec §4.10): similarity threshold above
/// which a forward-in-time LEARNING/DECISION/DOCS memory counts as a fix.
pub const ERROR_SOLUTION_THRESHOLD: f32 = 0.85;
/// Batch RELATED linking: recency window and per-memory candidate cap.
pub const RELATED_RECENCY_DAYS: i64 = 7;
pub const RELATED_TOP_N: usize = 3;
pub const RELATED_THRESHOLD: f32 = 0.75;

/// For one unresolved error, pick the best forward-in-time solution-like
/// candidate above [`ERROR_SOLUTION_THRESHOLD`], if any.
pub fn infer_error_solution(error: &Memory, candidates: &[(Memory, f32)]) -> Option<Relation> {
    if error.resolved {
        return None;
    }
    candidates
        .iter()
        .filter(|(m, sim)| {
            is_solution_like(m.memory_type) && m.created_at >= error.created_at && *sim >= ERROR_SOLUTION_THRESHOLD
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(solution, _)| Relation::new(solution.id.clone(), error.id.clone(), RelationType::Fixes))
}

/// For a recent memory (age ≤ [`RELATED_RECENCY_DAYS`]), emit RELATED edges
/// to its top-N neighbours above [`RELATED_THRESHOLD`] (spec §4.10).
pub fn infer_related(memory: &Memory, neighbors: &[(Memory, f32)], now: DateTime<Utc>) -> Vec<Relation> {
    if memory.age_days(now) > RELATED_RECENCY_DAYS {
        return Vec::new();
    }
    let mut ranked: Vec<&(Memory, f32)> = neighbors.iter().filter(|(_, sim)| *sim >= RELATED_THRESHOLD).collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
        .into_iter()
        .take(RELATED_TOP_N)
        .map(|(neighbor, _)| Relation::new(memory.id.clone(), neighbor.id.clone(), RelationType::Related))
        .collect()
}

/// Temporal FOLLOWS edges: within a project, consecutive memories (sorted by
/// `created_at`) within `follows_max_gap_minutes` of each other (spec §4.10).
pub fn infer_temporal_follows(project_memories_sorted_by_time: &[Memory], follows_max_gap_minutes: i64) -> Vec<Relation> {
    project_memories_sorted_by_time
        .windows(2)
        .filter_map(|pair| {
            let (earlier, later) = (&pair[0], &pair[1]);
            let gap = (later.created_at - earlier.created_at).num_minutes();
            if gap <= follows_max_gap_minutes {
                Some(Relation::new(earlier.id.clone(), later.id.clone(), RelationType::Follows))
            } else {
                None
            }
        })
        .collect()
}

fn causal_phrase_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:caused by|due to|because of)\s+(.{10,120})").unwrap())
}

/// Extract the text following a causal phrase ("caused by", "due to",
/// "because of"), if content matches one (spec §4.10).
pub fn extract_causal_phrase(content: &str) -> Option<String> {
    causal_phrase_regex()
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().split(['.', ';', '\n']).next().unwrap_or("").trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Word-overlap ratio between the extracted causal phrase and a candidate's
/// content — a simple, explainable matcher rather than another embedding call.
fn word_overlap(phrase: &str, content: &str) -> f32 {
    let phrase_words: std::collections::HashSet<String> =
        phrase.split_whitespace().map(|w| w.to_lowercase()).collect();
    if phrase_words.is_empty() {
        return 0.0;
    }
    let content_lower = content.to_lowercase();
    let matched = phrase_words.iter().filter(|w| content_lower.contains(w.as_str())).count();
    matched as f32 / phrase_words.len() as f32
}

/// Causal detection (spec §4.10): if `memory.content` matches a causal
/// phrase, link `memory CAUSES other` for the best-overlapping candidate.
pub fn infer_causal(memory: &Memory, candidates: &[Memory]) -> Option<Relation> {
    let phrase = extract_causal_phrase(&memory.content)?;
    candidates
        .iter()
        .filter(|c| c.id != memory.id)
        .map(|c| (c, word_overlap(&phrase, &c.content)))
        .filter(|(_, score)| *score >= 0.5)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(other, _)| Relation::new(memory.id.clone(), other.id.clone(), RelationType::Causes))
}

/// "Near-duplicate but distinct" band: above same-type SIMILAR_TO linking,
/// below the write-time dedup merge threshold. Pairs in this band are
/// flagged for human review rather than silently merged or linked
/// (SPEC_FULL §11 "interference detection").
pub const INTERFERENCE_LOWER: f32 = 0.88;
pub const INTERFERENCE_UPPER: f32 = 0.92;

/// One candidate pair surfaced by [`find_interference_candidates`].
#[derive(Debug, Clone, PartialEq)]
pub struct InterferenceCandidate {
    pub memory_id: String,
    pub neighbor_id: String,
    pub similarity: f32,
}

/// Flag same-type, same-project neighbours whose similarity falls in the
/// near-duplicate-but-distinct band, skipping any pair already linked (a
/// prior SIMILAR_TO/SUPERSEDES/CONTRADICTS edge means the pair has already
/// been resolved one way or another).
pub fn find_interference_candidates(
    memory: &Memory,
    same_type_project_neighbors: &[(Memory, f32)],
    already_linked: &std::collections::HashSet<String>,
) -> Vec<InterferenceCandidate> {
    same_type_project_neighbors
        .iter()
        .filter(|(neighbor, sim)| {
            neighbor.id != memory.id
                && neighbor.memory_type == memory.memory_type
                && neighbor.project == memory.project
                && (INTERFERENCE_LOWER..INTERFERENCE_UPPER).contains(sim)
                && !already_linked.contains(&neighbor.id)
        })
        .map(|(neighbor, sim)| InterferenceCandidate {
            memory_id: memory.id.clone(),
            neighbor_id: neighbor.id.clone(),
            similarity: *sim,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn memory_of(memory_type: MemoryType, content: &str) -> Memory {
        let mut m = Memory::new(memory_type, content);
        m.tags = HashSet::from(["a".into(), "b".into()]);
        m
    }

    #[test]
    fn error_gets_fixes_edge_from_later_solution() {
        let mut error = memory_of(MemoryType::Error, "docker build fails with ENOSPC no space left on device");
        error.created_at = Utc::now() - chrono::Duration::hours(2);
        let mut solution = memory_of(MemoryType::Learning, "prune docker images regularly to avoid disk pressure");
        solution.created_at = Utc::now();

        let relations = infer_on_write(&error, &[(solution.clone(), 0.9)], 5);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].relation_type, RelationType::Fixes);
        assert_eq!(relations[0].source_id, solution.id);
        assert_eq!(relations[0].target_id, error.id);
    }

    #[test]
    fn same_type_high_similarity_is_similar_to() {
        let a = memory_of(MemoryType::Pattern, "repository pattern isolates data access behind an interface");
        let b = memory_of(MemoryType::Pattern, "use repository pattern to isolate data access from business logic");
        let relations = infer_on_write(&a, &[(b, 0.9)], 5);
        assert_eq!(relations[0].relation_type, RelationType::SimilarTo);
    }

    #[test]
    fn on_write_respects_max_relationships_cap() {
        let a = memory_of(MemoryType::Learning, "learned something about rust lifetimes and borrowing");
        let neighbors: Vec<(Memory, f32)> = (0..10)
            .map(|i| (memory_of(MemoryType::Learning, "another unrelated learning entry here"), 0.5 + i as f32 * 0.01))
            .collect();
        let relations = infer_on_write(&a, &neighbors, 5);
        assert_eq!(relations.len(), 5);
    }

    #[test]
    fn resolved_errors_get_no_solution_edge() {
        let mut error = memory_of(MemoryType::Error, "something broke badly during the deploy process");
        error.resolved = true;
        let solution = memory_of(MemoryType::Learning, "here is how we fixed the deploy issue last time");
        assert!(infer_error_solution(&error, &[(solution, 0.95)]).is_none());
    }

    #[test]
    fn causal_phrase_is_extracted() {
        let phrase = extract_causal_phrase("the outage was caused by a misconfigured load balancer health check");
        assert_eq!(phrase.as_deref(), Some("a misconfigured load balancer health check"));
    }

    #[test]
    fn causal_detection_links_best_overlap_candidate() {
        let effect = memory_of(MemoryType::Learning, "the outage was caused by a misconfigured load balancer health check");
        let candidate = memory_of(MemoryType::Error, "misconfigured load balancer health check caused repeated 502s");
        let unrelated = memory_of(MemoryType::Docs, "unrelated documentation about onboarding new engineers");
        let relation = infer_causal(&effect, &[candidate.clone(), unrelated]).expect("should find a causal match");
        assert_eq!(relation.target_id, candidate.id);
        assert_eq!(relation.relation_type, RelationType::Causes);
    }

    #[test]
    fn temporal_follows_respects_gap() {
        let mut first = memory_of(MemoryType::Context, "first event in the sequence of work done today");
        first.created_at = Utc::now();
        let mut close = memory_of(MemoryType::Context, "second event shortly after the first one occurred");
        close.created_at = first.created_at + chrono::Duration::minutes(10);
        let mut far = memory_of(MemoryType::Context, "third event much later after a long gap of time");
        far.created_at = first.created_at + chrono::Duration::hours(5);

        let relations = infer_temporal_follows(&[first, close, far], 30);
        assert_eq!(relations.len(), 1);
    }

    #[test]
    fn interference_flags_near_duplicate_same_type_pair() {
        let a = memory_of(MemoryType::Decision, "use kafka for the event bus between services");
        let b = memory_of(MemoryType::Decision, "adopt kafka as the event bus across services");
        let linked = std::collections::HashSet::new();
        let candidates = find_interference_candidates(&a, &[(b.clone(), 0.9)], &linked);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].neighbor_id, b.id);
    }

    #[test]
    fn interference_skips_already_linked_pairs() {
        let a = memory_of(MemoryType::Decision, "use kafka for the event bus between services");
        let b = memory_of(MemoryType::Decision, "adopt kafka as the event bus across services");
        let linked = std::collections::HashSet::from([b.id.clone()]);
        let candidates = find_interference_candidates(&a, &[(b, 0.9)], &linked);
        assert!(candidates.is_empty());
    }

    #[test]
    fn interference_ignores_pairs_outside_the_band() {
        let a = memory_of(MemoryType::Decision, "use kafka for the event bus between services");
        let b = memory_of(MemoryType::Decision, "adopt kafka as the event bus across services");
        let linked = std::collections::HashSet::new();
        assert!(find_interference_candidates(&a, &[(b.clone(), 0.95)], &linked).is_empty());
        assert!(find_interference_candidates(&a, &[(b, 0.5)], &linked).is_empty());
    }
}
