//! Background job scheduler: fixed periodic jobs, each serialised within
//! its lock group (spec §4.13).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

use crate::audit::SqliteAuditTrail;
use crate::consolidation;
use crate::embeddings::EmbeddingService;
use crate::error::{EngramError, Result};
use crate::forgetting::{self, DecayOutcome};
use crate::lifecycle;
use crate::model::{AuditAction, AuditEntry, Memory, MemoryState};
use crate::quality;
use crate::relations;
use crate::session;
use crate::settings::Settings;
use crate::store::{Filter, GraphStore, VectorStore};

/// Jobs are serialised within their group; different groups run freely in
/// parallel (spec §4.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockGroup {
    QualityAndPromotion,
    Consolidation,
    MemoryStrength,
    GraphOperations,
}

impl LockGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockGroup::QualityAndPromotion => "quality_and_promotion",
            LockGroup::Consolidation => "consolidation",
            LockGroup::MemoryStrength => "memory_strength",
            LockGroup::GraphOperations => "graph_operations",
        }
    }
}

/// The fixed set of periodic jobs (spec §4.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobId {
    QualityAndPromotion,
    StateTransitions,
    StrengthDecay,
    RelationshipInference,
    Consolidation,
    SessionConsolidation,
}

impl JobId {
    pub fn lock_group(&self) -> LockGroup {
        match self {
            JobId::QualityAndPromotion | JobId::StateTransitions => LockGroup::QualityAndPromotion,
            JobId::StrengthDecay => LockGroup::MemoryStrength,
            JobId::RelationshipInference => LockGroup::GraphOperations,
            JobId::Consolidation | JobId::SessionConsolidation => LockGroup::Consolidation,
        }
    }

    /// Default tick interval, in hours (spec §4.13).
    pub fn default_interval_hours(&self) -> i64 {
        match self {
            JobId::QualityAndPromotion => 24,
            JobId::StateTransitions => 12,
            JobId::StrengthDecay => 24,
            JobId::RelationshipInference => 24,
            JobId::Consolidation => 24,
            JobId::SessionConsolidation => 12,
        }
    }
}

/// Pages of a vector-store scroll, batch_size-bounded (spec §4.13
/// backpressure note, default 100).
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Lock-acquisition timeout; expiry skips the tick and logs (spec §4.13).
const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns one reentrant-free async mutex per lock group.
pub struct JobLocks {
    locks: HashMap<LockGroup, Arc<AsyncMutex<()>>>,
}

impl Default for JobLocks {
    fn default() -> Self {
        let locks = [LockGroup::QualityAndPromotion, LockGroup::Consolidation, LockGroup::MemoryStrength, LockGroup::GraphOperations]
            .into_iter()
            .map(|g| (g, Arc::new(AsyncMutex::new(()))))
            .collect();
        Self { locks }
    }
}

impl JobLocks {
    /// Run `job` under its lock group's mutex, bounded by [`LOCK_TIMEOUT`].
    /// Failure to acquire logs and is treated as a skipped tick, not an error.
    pub async fn run_guarded<F, Fut>(&self, job: JobId, f: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let group = job.lock_group();
        let mutex = self.locks.get(&group).expect("all lock groups are initialised");
        match tokio::time::timeout(LOCK_TIMEOUT, mutex.lock()).await {
            Ok(_guard) => {
                if let Err(e) = f().await {
                    tracing::error!(job = ?job, error = %e, "scheduled job failed");
                }
            }
            Err(_) => {
                tracing::warn!(job = ?job, group = group.as_str(), "lock acquisition timed out, skipping tick");
            }
        }
    }
}

fn scroll_all(vector_store: &dyn VectorStore, filter: &Filter, batch_size: usize) -> Result<Vec<Memory>> {
    let mut out = Vec::new();
    let mut offset = 0;
    loop {
        let page = vector_store.scroll(filter, batch_size, offset)?;
        let got = page.memories.len();
        out.extend(page.memories);
        match page.next_offset {
            Some(next) => offset = next,
            None => break,
        }
        if got == 0 {
            break;
        }
    }
    Ok(out)
}

/// Recompute the seven-component quality score for every non-archived
/// memory, then promote candidates whose quality clears the bar (spec §4.7,
/// §4.13 "quality update, tier promotion batch").
pub fn run_quality_and_promotion(vector_store: &dyn VectorStore, settings: &Settings, now: DateTime<Utc>) -> Result<usize> {
    let memories = scroll_all(vector_store, &Filter::default(), DEFAULT_BATCH_SIZE)?;
    let mut promoted = 0;

    let mut rescored: Vec<Memory> = Vec::with_capacity(memories.len());
    for mut memory in memories {
        let (score, components) = quality::score(&memory, now);
        memory.quality_score = score;
        memory.quality_components = components;
        memory.quality_history.push(crate::model::QualitySnapshot { score, at: now });
        vector_store.set_payload(&memory.id, &memory)?;
        rescored.push(memory);
    }

    let candidates = quality::promotion_candidates(rescored.iter(), now, Some(settings.memory_min_quality_score));
    for candidate in candidates {
        if let Some(mut memory) = vector_store.get(&candidate.memory_id)? {
            if lifecycle::apply_transition(&mut memory, candidate.to, "quality-driven promotion", now).is_ok() {
                let (score, components) = quality::score(&memory, now);
                memory.quality_score = score;
                memory.quality_components = components;
                vector_store.set_payload(&memory.id, &memory)?;
                promoted += 1;
            }
        }
    }
    Ok(promoted)
}

/// Run the full lifecycle-state evaluation over every memory (spec §4.6,
/// §4.13 "state transitions").
pub fn run_state_transitions(vector_store: &dyn VectorStore, settings: &Settings, now: DateTime<Utc>) -> Result<usize> {
    let memories = scroll_all(vector_store, &Filter { include_archived: true, ..Default::default() }, DEFAULT_BATCH_SIZE)?;
    let mut transitioned = 0;

    for mut memory in memories {
        let evaluation = if memory.state == MemoryState::Archived {
            lifecycle::evaluate_archived(&memory, now, settings.purge_retention_days)
        } else {
            lifecycle::evaluate(&memory, now)
        };

        if let Some(eval) = evaluation {
            if eval.to == MemoryState::Purged {
                vector_store.delete(&[memory.id.clone()])?;
                transitioned += 1;
                continue;
            }
            if lifecycle::apply_transition(&mut memory, eval.to, eval.reason, now).is_ok() {
                let (score, components) = quality::score(&memory, now);
                memory.quality_score = score;
                memory.quality_components = components;
                vector_store.set_payload(&memory.id, &memory)?;
                transitioned += 1;
            }
        }
    }
    Ok(transitioned)
}

/// Apply the forgetting curve to every unpinned memory (spec §4.8, §4.13
/// "strength decay").
pub fn run_strength_decay(vector_store: &dyn VectorStore, settings: &Settings, now: DateTime<Utc>) -> Result<usize> {
    let memories = scroll_all(vector_store, &Filter::default(), DEFAULT_BATCH_SIZE)?;
    let mut affected = 0;

    for mut memory in memories {
        let (strength, outcome) =
            forgetting::apply_decay(&memory, now, settings.memory_archive_threshold, settings.memory_purge_threshold, settings.memory_purge_enabled);
        memory.memory_strength = strength;
        memory.last_decay_update = now;

        match outcome {
            DecayOutcome::Purge => {
                vector_store.delete(&[memory.id.clone()])?;
                affected += 1;
            }
            DecayOutcome::Archive => {
                if lifecycle::apply_transition(&mut memory, MemoryState::Archived, "decayed below archive threshold", now).is_ok() {
                    vector_store.set_payload(&memory.id, &memory)?;
                    affected += 1;
                }
            }
            DecayOutcome::Keep => {
                vector_store.set_payload(&memory.id, &memory)?;
            }
        }
    }
    Ok(affected)
}

/// Batch relationship inference: error→solution links, recency-scoped
/// RELATED edges, and causal detection over recently-created memories
/// (spec §4.10, §4.13 "relationship inference").
pub fn run_relationship_inference(
    vector_store: &dyn VectorStore,
    graph_store: &dyn GraphStore,
    embeddings: &dyn EmbeddingService,
    now: DateTime<Utc>,
) -> Result<usize> {
    let filter = Filter { created_after: Some(now - chrono::Duration::days(relations::RELATED_RECENCY_DAYS)), ..Default::default() };
    let recent = scroll_all(vector_store, &filter, DEFAULT_BATCH_SIZE)?;
    let mut new_edges = 0;

    for memory in &recent {
        let dense = embeddings
            .dense(&memory.content, crate::embeddings::EmbedSide::Query)
            .map_err(|e| EngramError::External(e.to_string()))?;
        let neighbor_filter = Filter { project: memory.project.clone(), ..Default::default() };
        let hits = vector_store.search_dense(&dense, &neighbor_filter, 8, 0.5)?;
        let candidates: Vec<(Memory, f32)> = hits.into_iter().filter(|h| h.memory.id != memory.id).map(|h| (h.memory, h.score)).collect();

        if memory.memory_type == crate::model::MemoryType::Error {
            if let Some(relation) = relations::infer_error_solution(memory, &candidates) {
                graph_store.upsert_edge(&relation)?;
                relations::reciprocate(vector_store, &relation.source_id, &relation.target_id, relation.relation_type, now)?;
                relations::reciprocate(vector_store, &relation.target_id, &relation.source_id, relation.relation_type, now)?;
                new_edges += 1;
            }
        }
        for relation in relations::infer_related(memory, &candidates, now) {
            graph_store.upsert_edge(&relation)?;
            relations::reciprocate(vector_store, &relation.source_id, &relation.target_id, relation.relation_type, now)?;
            relations::reciprocate(vector_store, &relation.target_id, &relation.source_id, relation.relation_type, now)?;
            new_edges += 1;
        }
        let plain_candidates: Vec<Memory> = candidates.into_iter().map(|(m, _)| m).collect();
        if let Some(relation) = relations::infer_causal(memory, &plain_candidates) {
            graph_store.upsert_edge(&relation)?;
            relations::reciprocate(vector_store, &relation.source_id, &relation.target_id, relation.relation_type, now)?;
            relations::reciprocate(vector_store, &relation.target_id, &relation.source_id, relation.relation_type, now)?;
            new_edges += 1;
        }
    }
    Ok(new_edges)
}

/// Consolidate clusters of similar, aged memories into summary memories
/// (spec §4.11, §4.13 "consolidation").
pub fn run_consolidation(
    vector_store: &dyn VectorStore,
    graph_store: &dyn GraphStore,
    embeddings: &dyn EmbeddingService,
    audit: &SqliteAuditTrail,
    settings: &Settings,
    now: DateTime<Utc>,
) -> Result<usize> {
    let cutoff = now - chrono::Duration::days(settings.consolidation_older_than_days);
    let filter = Filter { created_before: Some(cutoff), ..Default::default() };
    let aged = scroll_all(vector_store, &filter, DEFAULT_BATCH_SIZE)?;
    if aged.len() < consolidation::MIN_CLUSTER_SIZE {
        return Ok(0);
    }

    let mut items = Vec::with_capacity(aged.len());
    let mut by_id: HashMap<String, Memory> = HashMap::new();
    for memory in aged {
        let dense = embeddings.dense(&memory.content, crate::embeddings::EmbedSide::Document).map_err(|e| EngramError::External(e.to_string()))?;
        items.push((memory.id.clone(), dense));
        by_id.insert(memory.id.clone(), memory);
    }

    let mut clusters = consolidation::hierarchical_cluster(&items, 0.85, consolidation::MIN_CLUSTER_SIZE);
    if clusters.is_empty() {
        clusters = consolidation::greedy_cluster(&items, 0.85, consolidation::MIN_CLUSTER_SIZE);
    }

    let mut consolidated_count = 0;
    for cluster_ids in clusters {
        let cluster: Vec<Memory> = cluster_ids.iter().filter_map(|id| by_id.get(id).cloned()).collect();
        if cluster.len() < consolidation::MIN_CLUSTER_SIZE {
            continue;
        }
        let result = consolidation::merge_cluster(&cluster, None);
        let dense = embeddings
            .dense(&result.consolidated.content, crate::embeddings::EmbedSide::Document)
            .map_err(|e| EngramError::External(e.to_string()))?;
        vector_store.upsert(&result.consolidated, &crate::store::Vectors { dense, sparse: None })?;
        graph_store.create_node(&result.consolidated)?;

        for source_id in &result.source_ids {
            if let Some(mut source) = vector_store.get(source_id)? {
                let edge = crate::model::Relation::new(result.consolidated.id.clone(), source.id.clone(), crate::model::RelationType::PartOf);
                graph_store.upsert_edge(&edge)?;
                if lifecycle::apply_transition(&mut source, MemoryState::Archived, "consolidated into summary memory", now).is_ok() {
                    vector_store.set_payload(&source.id, &source)?;
                }
            }
        }

        audit.append(
            &AuditEntry::new(&result.consolidated.id, AuditAction::Create, "consolidation_job")
                .with_reason(format!("consolidated {} source memories", result.source_ids.len())),
        )?;
        consolidated_count += 1;
    }
    Ok(consolidated_count)
}

/// Consolidate every session that has gone quiet for at least
/// `session_consolidation_delay_hours` and has no existing summary (spec
/// §4.13 "session consolidation", §4.14).
pub fn run_session_consolidation(
    vector_store: &dyn VectorStore,
    graph_store: &dyn GraphStore,
    audit: &SqliteAuditTrail,
    settings: &Settings,
    now: DateTime<Utc>,
) -> Result<usize> {
    let all = scroll_all(vector_store, &Filter::default(), DEFAULT_BATCH_SIZE)?;

    let mut by_session: HashMap<String, Vec<Memory>> = HashMap::new();
    for memory in all {
        if let Some(session_id) = memory.session_id.clone() {
            by_session.entry(session_id).or_default().push(memory);
        }
    }

    let mut consolidated = 0;
    for (session_id, members) in by_session {
        if !session::is_due_for_consolidation(&members, now, settings.session_consolidation_delay_hours) {
            continue;
        }
        if session::consolidate_session(vector_store, graph_store, audit, &session_id, settings.follows_max_gap_minutes, now)?.is_some() {
            consolidated += 1;
        }
    }
    Ok(consolidated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryType;
    use crate::store::{SqliteGraphStore, SqliteVectorStore, Vectors};

    #[tokio::test]
    async fn locks_serialise_within_a_group() {
        let locks = JobLocks::default();
        let counter = Arc::new(AsyncMutex::new(0));

        let c1 = counter.clone();
        locks
            .run_guarded(JobId::QualityAndPromotion, || async move {
                *c1.lock().await += 1;
                Ok(())
            })
            .await;

        assert_eq!(*counter.lock().await, 1);
    }

    #[test]
    fn quality_and_promotion_recomputes_scores() {
        let vs = SqliteVectorStore::open_in_memory().unwrap();
        let mut m = Memory::new(MemoryType::Learning, "a well-formed memory with enough content to pass every rule");
        m.tags = std::collections::HashSet::from(["rust".into(), "testing".into()]);
        m.created_at = Utc::now() - chrono::Duration::days(10);
        vs.upsert(&m, &Vectors { dense: vec![0.0; crate::embeddings::DENSE_DIMENSIONS], sparse: None }).unwrap();

        let settings = Settings::default();
        let changed = run_quality_and_promotion(&vs, &settings, Utc::now()).unwrap();
        let after = vs.get(&m.id).unwrap().unwrap();
        assert_ne!(after.quality_score, 0.0);
        let _ = changed;
    }

    #[test]
    fn strength_decay_archives_weak_memories() {
        let vs = SqliteVectorStore::open_in_memory().unwrap();
        let mut m = Memory::new(MemoryType::Learning, "a memory nobody has touched in a very long time at all");
        m.memory_strength = 0.01;
        m.importance_score = 0.1;
        m.last_decay_update = Utc::now() - chrono::Duration::days(400);
        vs.upsert(&m, &Vectors { dense: vec![0.0; crate::embeddings::DENSE_DIMENSIONS], sparse: None }).unwrap();

        let settings = Settings::default();
        run_strength_decay(&vs, &settings, Utc::now()).unwrap();
        let after = vs.get(&m.id).unwrap().unwrap();
        assert_eq!(after.state, MemoryState::Archived);
    }

    #[test]
    fn consolidation_merges_aged_similar_cluster() {
        let vs = SqliteVectorStore::open_in_memory().unwrap();
        let gs = SqliteGraphStore::open_in_memory().unwrap();
        let audit = SqliteAuditTrail::open_in_memory().unwrap();
        struct Stub;
        impl EmbeddingService for Stub {
            fn dense(&self, text: &str, _side: crate::embeddings::EmbedSide) -> std::result::Result<Vec<f32>, crate::embeddings::EmbeddingError> {
                let mut v = vec![1.0, 0.0, 0.0];
                v.resize(crate::embeddings::DENSE_DIMENSIONS, 0.0);
                if text.contains("unrelated") {
                    v[1] = 5.0;
                }
                Ok(v)
            }
        }
        let embeddings = Stub;
        for i in 0..4 {
            let mut m = Memory::new(MemoryType::Learning, format!("shared learning content number {i} about the same recurring topic"));
            m.tags = std::collections::HashSet::from(["rust".into()]);
            m.created_at = Utc::now() - chrono::Duration::days(30);
            let dense = embeddings.dense(&m.content, crate::embeddings::EmbedSide::Document).unwrap();
            vs.upsert(&m, &Vectors { dense, sparse: None }).unwrap();
        }

        let mut settings = Settings::default();
        settings.consolidation_older_than_days = 7;
        let count = run_consolidation(&vs, &gs, &embeddings, &audit, &settings, Utc::now()).unwrap();
        assert_eq!(count, 1);
    }
}
