//! Service context: owns every adapter/engine and exposes the Core API
//! surface the transport layer consumes (spec §6).

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::audit::SqliteAuditTrail;
use crate::cache::SqliteQueryCache;
use crate::embeddings::{EmbedSide, EmbeddingService};
use crate::error::{EngramError, Result};
use crate::lifecycle;
use crate::model::{
    AuditAction, AuditEntry, ChangeType, Memory, MemoryState, MemoryType, Relation, RelationType, UserFeedback,
    VersionSnapshot,
};
use crate::pipeline::query::{QueryRequest, QueryResult};
use crate::pipeline::write::{Draft, WriteOutcome};
use crate::pipeline::{query, write};
use crate::quality;
use crate::relations;
use crate::rerank::{FallbackReranker, RerankedResult, Reranker, RerankerError};
#[cfg(feature = "embeddings")]
use crate::rerank::CrossEncoderReranker;
use crate::scheduler;
use crate::scheduler::{JobId, JobLocks};
use crate::settings::Settings;
use crate::store::{Filter, GraphStore, VectorStore};

/// Single-implementation reranker facade: picks the cross-encoder when the
/// `embeddings` feature is enabled, falling back to BM25-like scoring
/// otherwise (spec §4.4.4). A plain enum rather than `Box<dyn Reranker>`
/// since [`Reranker::rerank`] is generic and therefore not object-safe.
pub enum RerankerHandle {
    Fallback(FallbackReranker),
    #[cfg(feature = "embeddings")]
    CrossEncoder(CrossEncoderReranker),
}

impl Default for RerankerHandle {
    fn default() -> Self {
        RerankerHandle::Fallback(FallbackReranker)
    }
}

impl Reranker for RerankerHandle {
    fn rerank<T: Clone>(
        &self,
        query: &str,
        candidates: Vec<(T, String)>,
        top_k: Option<usize>,
    ) -> std::result::Result<Vec<RerankedResult<T>>, RerankerError> {
        match self {
            RerankerHandle::Fallback(r) => r.rerank(query, candidates, top_k),
            #[cfg(feature = "embeddings")]
            RerankerHandle::CrossEncoder(r) => r.rerank(query, candidates, top_k),
        }
    }

    fn has_cross_encoder(&self) -> bool {
        match self {
            RerankerHandle::Fallback(r) => r.has_cross_encoder(),
            #[cfg(feature = "embeddings")]
            RerankerHandle::CrossEncoder(r) => r.has_cross_encoder(),
        }
    }
}

/// Snapshot returned by [`ServiceContext::scheduler_status`] (spec §6
/// `scheduler_status()`).
#[derive(Debug, Clone)]
pub struct SchedulerStatusEntry {
    pub job: JobId,
    pub last_run: Option<DateTime<Utc>>,
    pub last_result: Option<Result<usize, String>>,
}

/// Outcome of a manually triggered job (spec §6 `trigger_job(job_id)`).
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: JobId,
    pub affected: usize,
}

/// One candidate relation surfaced by [`ServiceContext::suggest_related`],
/// for a human to confirm before it is persisted via [`ServiceContext::link_memories`].
#[derive(Debug, Clone)]
pub struct RelationSuggestion {
    pub relation: Relation,
    pub similarity: f32,
}

#[derive(Default)]
struct SchedulerState {
    last_run: std::collections::HashMap<&'static str, DateTime<Utc>>,
    last_result: std::collections::HashMap<&'static str, Result<usize, String>>,
}

/// Owns every storage adapter, engine, and setting, and is the single
/// entry point the transport layer drives (spec §6 "Core API surface").
/// Cloning is cheap: every field is an `Arc` or small value, mirroring how
/// the write/query pipelines are passed borrowed references today.
pub struct ServiceContext {
    pub vector_store: Arc<dyn VectorStore>,
    pub graph_store: Arc<dyn GraphStore>,
    pub embeddings: Arc<dyn EmbeddingService>,
    pub audit: Arc<SqliteAuditTrail>,
    pub cache: Arc<SqliteQueryCache>,
    pub reranker: Arc<RerankerHandle>,
    settings: RwLock<Settings>,
    settings_path: Option<std::path::PathBuf>,
    locks: JobLocks,
    scheduler_state: RwLock<SchedulerState>,
}

impl ServiceContext {
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        graph_store: Arc<dyn GraphStore>,
        embeddings: Arc<dyn EmbeddingService>,
        audit: Arc<SqliteAuditTrail>,
        cache: Arc<SqliteQueryCache>,
        reranker: Arc<RerankerHandle>,
        settings: Settings,
        settings_path: Option<std::path::PathBuf>,
    ) -> Self {
        Self {
            vector_store,
            graph_store,
            embeddings,
            audit,
            cache,
            reranker,
            settings: RwLock::new(settings),
            settings_path,
            locks: JobLocks::default(),
            scheduler_state: RwLock::new(SchedulerState::default()),
        }
    }

    /// Current settings snapshot (spec §4.13 "reload-per-tick settings
    /// source" — scheduler ticks call [`Self::reload_settings`] first).
    pub fn settings(&self) -> Settings {
        self.settings.read().expect("settings lock poisoned").clone()
    }

    /// Re-read the settings file plus environment overrides.
    pub fn reload_settings(&self) {
        let fresh = Settings::load(self.settings_path.as_deref());
        *self.settings.write().expect("settings lock poisoned") = fresh;
    }

    // -- Write path -----------------------------------------------------

    /// `store_memory(draft, deduplicate=true) -> Memory` (spec §6).
    pub fn store_memory(&self, draft: Draft, deduplicate: bool) -> Result<Memory> {
        let settings = self.settings();
        let outcome = write::store_memory(
            self.vector_store.as_ref(),
            self.graph_store.as_ref(),
            self.embeddings.as_ref(),
            &self.audit,
            &settings,
            draft,
            deduplicate,
            Utc::now(),
        )?;
        Ok(match outcome {
            WriteOutcome::Created(m) | WriteOutcome::Merged(m) => m,
        })
    }

    // -- Read path --------------------------------------------------------

    /// `search_memories(query, search_mode, use_cache, use_reranking,
    /// use_graph_expansion) -> List<SearchResult>` (spec §6). `use_cache`
    /// and `use_reranking` are expressed on the request itself: set
    /// `request.filter` to force a cache bypass, or `request.search_mode =
    /// Keyword` to skip rerank (mirroring how the pipeline already decides
    /// both internally).
    pub fn search_memories(&self, request: QueryRequest) -> Result<Vec<QueryResult>> {
        let settings = self.settings();
        query::search(
            self.vector_store.as_ref(),
            self.graph_store.as_ref(),
            self.embeddings.as_ref(),
            &self.cache,
            self.reranker.as_ref(),
            &settings,
            request,
            Utc::now(),
        )
    }

    pub fn get_memory(&self, id: &str) -> Result<Option<Memory>> {
        self.vector_store.get(id)
    }

    /// The payload-update wrapper (spec §4.2), the only mutation path for
    /// in-place edits. `patch` is a JSON object merged onto the stored
    /// payload. Recomputes quality only when `recalc_quality` is set and
    /// `patch` touches a quality-affecting field.
    pub fn update(&self, id: &str, patch: &Value, recalc_quality: bool, run_enrichment: bool) -> Result<Memory> {
        let current = self.vector_store.get(id)?.ok_or_else(|| EngramError::NotFound(id.to_string()))?;
        let before = serde_json::to_value(&current)?;

        // Step 1: apply the patch atomically.
        let mut updated = crate::audit::apply_patch(&current, patch)?;

        // Step 2: optional enrichment of missing derived fields.
        if run_enrichment {
            let enrichment = write::derive_enrichment(
                updated.memory_type,
                &updated.content,
                updated.project.as_deref(),
                &updated.prevention,
                &updated.rationale,
                &updated.alternatives,
                &updated.context,
            );
            updated.prevention = updated.prevention.clone().or(enrichment.prevention);
            updated.rationale = updated.rationale.clone().or(enrichment.rationale);
            updated.alternatives = updated.alternatives.clone().or(enrichment.alternatives);
            updated.context = updated.context.clone().or(enrichment.context);
        }

        // Step 3: recompute quality iff the patch touched a quality-affecting field.
        let touches_quality_field = crate::model::validation::QualityAffectingFields::from_patch(patch).any();
        if recalc_quality && touches_quality_field {
            let (score, components) = quality::score(&updated, Utc::now());
            updated.quality_score = score;
            updated.quality_components = components;
        }

        // Record the pre-patch state as a version snapshot before bumping
        // current_version, so version_history stays in lockstep (spec §8
        // property 3: len(version_history) == current_version - 1).
        updated.version_history.push(VersionSnapshot {
            version: current.current_version,
            change_type: ChangeType::Edited,
            created_at: Utc::now(),
            content: current.content.clone(),
            importance_score: current.importance_score,
            tags: current.tags.iter().cloned().collect(),
            error_message: current.error_message.clone(),
            solution: current.solution.clone(),
            decision: current.decision.clone(),
            rationale: current.rationale.clone(),
        });
        updated.updated_at = Utc::now();
        updated.current_version += 1;
        self.vector_store.set_payload(id, &updated)?;

        self.audit.append(
            &AuditEntry::new(id, AuditAction::Update, "service_context")
                .with_values(Some(before), Some(serde_json::to_value(&updated)?)),
        )?;
        Ok(updated)
    }

    /// `update_memory(id, patch) -> Memory` (spec §6): the default-settings
    /// entry point onto [`Self::update`].
    pub fn update_memory(&self, id: &str, patch: &Value) -> Result<Memory> {
        self.update(id, patch, true, false)
    }

    pub fn delete_memory(&self, id: &str) -> Result<()> {
        self.vector_store.delete(&[id.to_string()])?;
        self.graph_store.delete_node(id)?;
        self.audit.append(&AuditEntry::new(id, AuditAction::Delete, "service_context"))?;
        Ok(())
    }

    pub fn archive_memory(&self, id: &str) -> Result<Memory> {
        let mut memory = self.vector_store.get(id)?.ok_or_else(|| EngramError::NotFound(id.to_string()))?;
        if memory.state == MemoryState::Archived {
            return Err(EngramError::Conflict(format!("memory {id} is already archived")));
        }
        lifecycle::apply_transition(&mut memory, MemoryState::Archived, "manually archived", Utc::now())
            .map_err(|e| EngramError::Internal(e.to_string()))?;
        let (score, components) = quality::score(&memory, Utc::now());
        memory.quality_score = score;
        memory.quality_components = components;
        self.vector_store.set_payload(id, &memory)?;
        self.audit.append(&AuditEntry::new(id, AuditAction::Archive, "service_context"))?;
        Ok(memory)
    }

    /// `mark_resolved(id, solution) -> Memory` (spec §6): rejects an
    /// attempt to re-resolve an already-resolved error without a patch
    /// (spec §7 "already resolved error" conflict).
    pub fn mark_resolved(&self, id: &str, solution: impl Into<String>) -> Result<Memory> {
        let current = self.vector_store.get(id)?.ok_or_else(|| EngramError::NotFound(id.to_string()))?;
        if current.resolved {
            return Err(EngramError::Conflict(format!("memory {id} is already resolved")));
        }
        let patch = serde_json::json!({ "solution": solution.into(), "resolved": true });
        self.update(id, &patch, true, false)
    }

    /// `link_memories(src, tgt, relation_type) -> ()` (spec §6).
    pub fn link_memories(&self, source_id: &str, target_id: &str, relation_type: RelationType) -> Result<()> {
        self.vector_store.get(source_id)?.ok_or_else(|| EngramError::NotFound(source_id.to_string()))?;
        self.vector_store.get(target_id)?.ok_or_else(|| EngramError::NotFound(target_id.to_string()))?;
        let relation = Relation::new(source_id, target_id, relation_type);
        self.graph_store.upsert_edge(&relation)?;
        let now = Utc::now();
        relations::reciprocate(self.vector_store.as_ref(), source_id, target_id, relation_type, now)?;
        relations::reciprocate(self.vector_store.as_ref(), target_id, source_id, relation_type, now)?;
        Ok(())
    }

    /// Read-only graph neighbours plus high-similarity non-linked memories,
    /// each paired with the relation type a human would be asked to confirm
    /// (SPEC_FULL §11 "suggestions").
    pub fn suggest_related(&self, id: &str, limit: usize) -> Result<Vec<RelationSuggestion>> {
        let memory = self.vector_store.get(id)?.ok_or_else(|| EngramError::NotFound(id.to_string()))?;
        let already_linked: std::collections::HashSet<String> =
            self.graph_store.neighbors(id, 1)?.into_iter().map(|(neighbor_id, _, _)| neighbor_id).collect();

        let dense = self.embeddings.dense(&memory.content, EmbedSide::Query).map_err(|e| EngramError::External(e.to_string()))?;
        let filter = Filter { project: memory.project.clone(), ..Default::default() };
        let hits = self.vector_store.search_dense(&dense, &filter, limit + already_linked.len() + 1, 0.5)?;

        let mut ranked: Vec<(Memory, f32)> = hits
            .into_iter()
            .filter(|hit| hit.memory.id != id && !already_linked.contains(&hit.memory.id))
            .map(|hit| (hit.memory, hit.score))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(neighbor, similarity)| RelationSuggestion { relation: relations::classify_relation(&memory, &neighbor, similarity), similarity })
            .collect())
    }

    /// Same-type, same-project pairs in the "near-duplicate but distinct"
    /// band, for a human to review (SPEC_FULL §11 "interference detection").
    /// Scoped to `project` to keep the pairwise scan bounded.
    pub fn find_interference_candidates(&self, project: Option<&str>) -> Result<Vec<relations::InterferenceCandidate>> {
        let filter = Filter { project: project.map(str::to_string), ..Default::default() };
        let memories = self.scroll_all(&filter)?;

        let mut linked: std::collections::HashMap<String, std::collections::HashSet<String>> = std::collections::HashMap::new();
        for memory in &memories {
            let neighbor_ids = self.graph_store.neighbors(&memory.id, 1)?.into_iter().map(|(id, _, _)| id).collect();
            linked.insert(memory.id.clone(), neighbor_ids);
        }

        let mut embedded = Vec::with_capacity(memories.len());
        for memory in &memories {
            let dense = self.embeddings.dense(&memory.content, EmbedSide::Document).map_err(|e| EngramError::External(e.to_string()))?;
            embedded.push((memory.clone(), dense));
        }

        let mut candidates = Vec::new();
        for (i, (memory, dense)) in embedded.iter().enumerate() {
            let neighbors: Vec<(Memory, f32)> = embedded[i + 1..]
                .iter()
                .map(|(other, other_dense)| (other.clone(), crate::embeddings::cosine_similarity(dense, other_dense)))
                .collect();
            let empty = std::collections::HashSet::new();
            let already_linked = linked.get(&memory.id).unwrap_or(&empty);
            candidates.extend(relations::find_interference_candidates(memory, &neighbors, already_linked));
        }
        Ok(candidates)
    }

    /// Rank candidate memories for a working context by recency, quality and
    /// tag overlap with `recent_tags` (SPEC_FULL §11 "recommendations").
    pub fn recommend_for_context(&self, project: Option<&str>, recent_tags: &[String], limit: usize) -> Result<Vec<Memory>> {
        let filter = Filter { project: project.map(str::to_string), ..Default::default() };
        let candidates = self.scroll_all(&filter)?;
        let now = Utc::now();
        let recent_tags: std::collections::HashSet<&str> = recent_tags.iter().map(String::as_str).collect();

        let mut scored: Vec<(f64, Memory)> = candidates
            .into_iter()
            .map(|memory| {
                let overlap = if recent_tags.is_empty() {
                    0.0
                } else {
                    memory.tags.iter().filter(|t| recent_tags.contains(t.as_str())).count() as f64 / recent_tags.len() as f64
                };
                let recency = 1.0 / (1.0 + memory.age_days(now) as f64 / 7.0);
                let score = 0.4 * recency + 0.4 * memory.quality_score + 0.2 * overlap;
                (score, memory)
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(limit).map(|(_, memory)| memory).collect())
    }

    fn scroll_all(&self, filter: &Filter) -> Result<Vec<Memory>> {
        let mut out = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.vector_store.scroll(filter, 200, offset)?;
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

    /// `get_context(project?, hours, types?, include_documents?,
    /// document_limit?) -> List<Memory>` (spec §6): recent memories within
    /// the window, optionally capped on how many DOCS-type entries ride
    /// along.
    pub fn get_context(
        &self,
        project: Option<&str>,
        hours: i64,
        types: Option<&[MemoryType]>,
        include_documents: bool,
        document_limit: Option<usize>,
    ) -> Result<Vec<Memory>> {
        let cutoff = Utc::now() - chrono::Duration::hours(hours);
        let filter = Filter { project: project.map(str::to_string), created_after: Some(cutoff), ..Default::default() };
        let memories = self.scroll_all(&filter)?;

        let mut docs_seen = 0usize;
        let mut out = Vec::new();
        for memory in memories {
            if let Some(allowed) = types {
                if !allowed.contains(&memory.memory_type) {
                    continue;
                }
            }
            if memory.memory_type == MemoryType::Docs {
                if !include_documents {
                    continue;
                }
                if let Some(limit) = document_limit {
                    if docs_seen >= limit {
                        continue;
                    }
                }
                docs_seen += 1;
            }
            out.push(memory);
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// `rate_memory(id, rating 1..5, feedback?) -> Memory` (spec §6).
    pub fn rate_memory(&self, id: &str, rating: u8, feedback: Option<String>) -> Result<Memory> {
        if !(1..=5).contains(&rating) {
            return Err(EngramError::Validation(crate::error::QualityReport {
                score: 0.0,
                warnings: vec![crate::model::validation::ValidationWarning {
                    rule: "rating_range",
                    message: format!("rating {rating} is outside the 1..5 range"),
                    suggestion: "submit a rating between 1 and 5".to_string(),
                }],
                example: "{rating: 4, feedback: \"accurate and actionable\"}".to_string(),
                duplicate_hint: None,
            }));
        }

        let mut current = self.vector_store.get(id)?.ok_or_else(|| EngramError::NotFound(id.to_string()))?;
        let now = Utc::now();
        let total = current.user_rating * current.user_rating_count as f64 + rating as f64;
        current.user_rating_count += 1;
        current.user_rating = total / current.user_rating_count as f64;
        if let Some(comment) = feedback {
            current.user_feedback.push(UserFeedback { rating, comment: Some(comment), at: now });
        }
        let (score, components) = quality::score(&current, now);
        current.quality_score = score;
        current.quality_components = components;
        self.vector_store.set_payload(id, &current)?;
        self.audit.append(
            &AuditEntry::new(id, AuditAction::QualityUpdate, "service_context").with_reason("user rating submitted"),
        )?;
        Ok(current)
    }

    /// `restore_to_version(id, target_timestamp) -> Memory` (spec §6): finds
    /// the snapshot closest to but not after `target_timestamp`.
    pub fn restore_to_version(&self, id: &str, target_timestamp: DateTime<Utc>) -> Result<Memory> {
        let current = self.vector_store.get(id)?.ok_or_else(|| EngramError::NotFound(id.to_string()))?;
        let target = current
            .version_history
            .iter()
            .filter(|v| v.created_at <= target_timestamp)
            .max_by_key(|v| v.created_at)
            .cloned()
            .ok_or_else(|| EngramError::NotFound(format!("no version of {id} at or before {target_timestamp}")))?;

        let now = Utc::now();
        let mut restored = crate::audit::restore_to_version(&current, &target, now);
        restored.content = write::clean_content(&restored.content);
        restored.tags = write::normalize_tags(restored.tags);
        let (score, components) = quality::score(&restored, now);
        restored.quality_score = score;
        restored.quality_components = components;

        self.vector_store.set_payload(id, &restored)?;
        self.audit.append(
            &AuditEntry::new(id, AuditAction::Restore, "service_context")
                .with_reason(format!("restored to version {}", target.version)),
        )?;
        Ok(restored)
    }

    /// `undo_last_change(id) -> Memory` (spec §6).
    pub fn undo_last_change(&self, id: &str) -> Result<Memory> {
        let current = self.vector_store.get(id)?.ok_or_else(|| EngramError::NotFound(id.to_string()))?;
        let entry = self
            .audit
            .find_undoable(id)?
            .ok_or_else(|| EngramError::Conflict(format!("no undoable change for {id}")))?;
        let mut restored = crate::audit::undo(&current, &entry)?;
        let (score, components) = quality::score(&restored, Utc::now());
        restored.quality_score = score;
        restored.quality_components = components;
        self.vector_store.set_payload(id, &restored)?;
        self.audit.append(&AuditEntry::new(id, AuditAction::Restore, "service_context").with_reason("undo last change"))?;
        Ok(restored)
    }

    // -- Scheduler --------------------------------------------------------

    fn record_result(&self, job: JobId, result: &Result<usize>) {
        let mut state = self.scheduler_state.write().expect("scheduler state lock poisoned");
        state.last_run.insert(job_key(job), Utc::now());
        state.last_result.insert(job_key(job), result.as_ref().map(|n| *n).map_err(|e| e.to_string()));
    }

    /// `scheduler_status() -> ...` (spec §6): last run time and outcome per job.
    pub fn scheduler_status(&self) -> Vec<SchedulerStatusEntry> {
        let state = self.scheduler_state.read().expect("scheduler state lock poisoned");
        [
            JobId::QualityAndPromotion,
            JobId::StateTransitions,
            JobId::StrengthDecay,
            JobId::RelationshipInference,
            JobId::Consolidation,
            JobId::SessionConsolidation,
        ]
        .into_iter()
        .map(|job| SchedulerStatusEntry {
            job,
            last_run: state.last_run.get(job_key(job)).copied(),
            last_result: state.last_result.get(job_key(job)).cloned(),
        })
        .collect()
    }

    /// `trigger_job(job_id) -> ...` (spec §6): run one job immediately,
    /// still serialised by its lock group (spec §4.13).
    pub async fn trigger_job(&self, job: JobId) -> Result<JobOutcome> {
        self.reload_settings();
        let settings = self.settings();
        let now = Utc::now();
        let mut outcome: Option<Result<usize>> = None;

        self.locks
            .run_guarded(job, || async {
                let result: Result<usize> = match job {
                    JobId::QualityAndPromotion => scheduler::run_quality_and_promotion(self.vector_store.as_ref(), &settings, now),
                    JobId::StateTransitions => scheduler::run_state_transitions(self.vector_store.as_ref(), &settings, now),
                    JobId::StrengthDecay => scheduler::run_strength_decay(self.vector_store.as_ref(), &settings, now),
                    JobId::RelationshipInference => scheduler::run_relationship_inference(
                        self.vector_store.as_ref(),
                        self.graph_store.as_ref(),
                        self.embeddings.as_ref(),
                        now,
                    ),
                    JobId::Consolidation => scheduler::run_consolidation(
                        self.vector_store.as_ref(),
                        self.graph_store.as_ref(),
                        self.embeddings.as_ref(),
                        &self.audit,
                        &settings,
                        now,
                    ),
                    JobId::SessionConsolidation => scheduler::run_session_consolidation(
                        self.vector_store.as_ref(),
                        self.graph_store.as_ref(),
                        &self.audit,
                        &settings,
                        now,
                    ),
                };
                let ran_ok = result.is_ok();
                outcome = Some(result);
                if ran_ok {
                    Ok(())
                } else {
                    Err(EngramError::Internal(format!("{job:?} failed")))
                }
            })
            .await;

        match outcome {
            Some(result) => {
                self.record_result(job, &result);
                result.map(|affected| JobOutcome { job, affected })
            }
            None => Err(EngramError::LockTimeout(format!("{job:?}"))),
        }
    }
}

fn job_key(job: JobId) -> &'static str {
    match job {
        JobId::QualityAndPromotion => "quality_and_promotion",
        JobId::StateTransitions => "state_transitions",
        JobId::StrengthDecay => "strength_decay",
        JobId::RelationshipInference => "relationship_inference",
        JobId::Consolidation => "consolidation",
        JobId::SessionConsolidation => "session_consolidation",
    }
}
