//! The write pipeline: clean → enrich → validate → dedup → embed → store →
//! infer relations → auto-supersede → initial quality (spec §4.3).

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::audit::SqliteAuditTrail;
use crate::embeddings::EmbeddingService;
use crate::error::{EngramError, QualityReport, Result};
use crate::lifecycle;
use crate::model::validation::{validate_common, validate_type_specific};
use crate::model::{AuditAction, AuditEntry, ChangeType, EmbeddedRelation, Memory, MemoryType, Relation, RelationType, VersionSnapshot};
use crate::quality;
use crate::relations;
use crate::settings::{QualityEnforcement, Settings};
use crate::store::{Filter, GraphStore, VectorStore, Vectors};

/// Strip control characters and collapse redundant whitespace (spec §4.3
/// step 1).
pub fn clean_content(content: &str) -> String {
    let stripped: String = content.chars().filter(|c| !c.is_control() || *c == '\n' || *c == '\t').collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase and deduplicate tags (spec §4.3 step 3). Keyword-derived tag
/// enrichment is a separate step ([`enrich_tags`]) since it needs the content.
pub fn normalize_tags(tags: impl IntoIterator<Item = String>) -> HashSet<String> {
    tags.into_iter().map(|t| t.trim().to_lowercase()).filter(|t| !t.is_empty()).collect()
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "have", "when", "then", "than", "into",
    "over", "under", "about", "after", "before", "while", "which", "where", "there", "their",
];

/// Infer up to 3 extra tags from content keywords: words longer than 4
/// characters, not stopwords, most frequent first (spec §4.3 step 3).
fn infer_tags_from_content(content: &str) -> Vec<String> {
    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for word in content.split_whitespace() {
        let cleaned: String = word.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase();
        if cleaned.len() > 4 && !STOPWORDS.contains(&cleaned.as_str()) {
            *counts.entry(cleaned).or_default() += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(3).map(|(w, _)| w).collect()
}

/// Normalise tags and, if below the minimum, enrich with content keywords
/// (spec §4.3 step 3).
pub fn enrich_tags(tags: impl IntoIterator<Item = String>, content: &str) -> HashSet<String> {
    let mut normalized = normalize_tags(tags);
    if normalized.len() < crate::model::validation::MIN_TAGS {
        normalized.extend(infer_tags_from_content(content));
    }
    normalized
}

fn first_sentence_matching<'a>(content: &'a str, markers: &[&str]) -> Option<&'a str> {
    content.split(['.', ';', '\n']).map(str::trim).find(|s| {
        let lower = s.to_lowercase();
        markers.iter().any(|m| lower.contains(m))
    })
}

/// Auto-enrich type-specific fields from content when missing (spec §4.3
/// step 2): best-effort sentence extraction, not a claim of full NLP.
pub struct Enrichment {
    pub prevention: Option<String>,
    pub rationale: Option<String>,
    pub alternatives: Option<String>,
    pub context: Option<String>,
}

pub fn derive_enrichment(
    memory_type: MemoryType,
    content: &str,
    project: Option<&str>,
    prevention: &Option<String>,
    rationale: &Option<String>,
    alternatives: &Option<String>,
    context: &Option<String>,
) -> Enrichment {
    let prevention = prevention.clone().or_else(|| {
        first_sentence_matching(content, &["prevent", "avoid", "to avoid"]).map(str::to_string)
    });
    let rationale = rationale.clone().or_else(|| {
        if memory_type == MemoryType::Decision {
            first_sentence_matching(content, &["because", "since", "in order to"]).map(str::to_string)
        } else {
            None
        }
    });
    let alternatives = alternatives.clone().or_else(|| {
        first_sentence_matching(content, &["instead of", "alternative", "rather than"]).map(str::to_string)
    });
    let context = context.clone().or_else(|| {
        let project_part = project.map(|p| format!("project {p}, ")).unwrap_or_default();
        let preview: String = content.chars().take(120).collect();
        Some(format!("{project_part}{} memory: {preview}", memory_type.as_str()))
    });

    Enrichment { prevention, rationale, alternatives, context }
}

/// Draft input to the write pipeline (spec §4.3 "Input").
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub memory_type: Option<MemoryType>,
    pub content: String,
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub source: Option<String>,
    pub context: Option<String>,

    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub solution: Option<String>,
    pub prevention: Option<String>,

    pub decision: Option<String>,
    pub rationale: Option<String>,
    pub alternatives: Option<String>,
    pub reversible: Option<bool>,
    pub impact: Option<String>,

    pub pinned: bool,
    pub importance_score: Option<f64>,

    pub session_id: Option<String>,
    pub session_sequence: Option<u32>,
    pub conversation_context: Option<String>,
}

impl Draft {
    pub fn new(memory_type: MemoryType, content: impl Into<String>) -> Self {
        Self { memory_type: Some(memory_type), content: content.into(), ..Default::default() }
    }
}

/// Whether `store_memory` created a new memory or merged into an existing
/// duplicate (spec §4.3 step 4, §8 property 5).
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    Created(Memory),
    Merged(Memory),
}

impl WriteOutcome {
    pub fn into_memory(self) -> Memory {
        match self {
            WriteOutcome::Created(m) | WriteOutcome::Merged(m) => m,
        }
    }
}

/// 0..100 validation quality score used only for enforcement gating (spec
/// §4.3 step 5) — distinct from the 0..1 quality engine score (§4.7), which
/// is computed once the memory is constructed.
fn validation_score(warnings_count: usize) -> f64 {
    (100.0 - 25.0 * warnings_count as f64).max(0.0)
}

fn example_for_type(memory_type: MemoryType) -> String {
    match memory_type {
        MemoryType::Error => {
            "{type: error, content: \"Docker build fails with ENOSPC on CI\", error_message: \"ENOSPC\", \
             solution: \"mount a larger volume for /var/lib/docker\", tags: [\"docker\", \"ci\"]}"
        }
        MemoryType::Decision => {
            "{type: decision, content: \"Use PostgreSQL for primary store\", rationale: \"strong JSON + ACID support\", \
             tags: [\"database\", \"architecture\"]}"
        }
        _ => "{type: learning, content: \"a concrete, specific lesson with enough detail to act on later\", tags: [\"topic\", \"project\"]}",
    }
    .to_string()
}

/// Run the write pipeline end to end (spec §4.3). `deduplicate=false` skips
/// step 4 and always creates a new memory.
#[allow(clippy::too_many_arguments)]
pub fn store_memory(
    vector_store: &dyn VectorStore,
    graph_store: &dyn GraphStore,
    embeddings: &dyn EmbeddingService,
    audit: &SqliteAuditTrail,
    settings: &Settings,
    draft: Draft,
    deduplicate: bool,
    now: DateTime<Utc>,
) -> Result<WriteOutcome> {
    let memory_type = draft.memory_type.ok_or_else(|| EngramError::Validation(QualityReport {
        score: 0.0,
        warnings: vec![],
        example: example_for_type(MemoryType::Learning),
        duplicate_hint: None,
    }))?;

    // Step 1: clean content.
    let content = clean_content(&draft.content);

    // Step 2: auto-enrich type-specific fields.
    let enrichment = derive_enrichment(
        memory_type,
        &content,
        draft.project.as_deref(),
        &draft.prevention,
        &draft.rationale,
        &draft.alternatives,
        &draft.context,
    );

    // Step 3: normalise + enrich tags.
    let tags = enrich_tags(draft.tags.clone(), &content);

    // Step 7 (embed, pulled forward since dedup needs it): dense always,
    // sparse when the embedding service provides one.
    let embed_text = format!(
        "{content} {} {}",
        enrichment.context.as_deref().unwrap_or_default(),
        draft.error_message.as_deref().unwrap_or_default()
    );
    let dense = embeddings
        .dense(embed_text.trim(), crate::embeddings::EmbedSide::Document)
        .map_err(|e| EngramError::External(e.to_string()))?;
    let sparse = embeddings.sparse(embed_text.trim()).ok().flatten();

    // Step 4: semantic duplicate check.
    if deduplicate {
        let mut filter = Filter { memory_type: Some(memory_type), ..Default::default() };
        filter.project = draft.project.clone();
        let hits = vector_store.search_dense(&dense, &filter, 1, settings.dedup_threshold)?;
        if let Some(top) = hits.into_iter().next() {
            let mut existing = top.memory;
            existing.tags.extend(tags.iter().cloned());
            existing.access_count += 1;
            existing.updated_at = now;
            let (score, components) = quality::score(&existing, now);
            existing.quality_score = score;
            existing.quality_components = components;
            vector_store.set_payload(&existing.id, &existing)?;

            audit.append(
                &AuditEntry::new(&existing.id, AuditAction::Update, "write_pipeline")
                    .with_reason("merged duplicate on write (dedup_threshold)"),
            )?;
            return Ok(WriteOutcome::Merged(existing));
        }
    }

    // Step 5: validate quality, enforce per settings.
    let mut warnings = validate_common(&content, &tags);
    warnings.extend(validate_type_specific(memory_type, &draft.solution, &enrichment.prevention, &enrichment.rationale));
    let score0_100 = validation_score(warnings.len());
    if settings.memory_quality_enforcement == QualityEnforcement::Strict
        && score0_100 / 100.0 < settings.memory_min_quality_score
    {
        return Err(EngramError::Validation(QualityReport {
            score: score0_100,
            warnings,
            example: example_for_type(memory_type),
            duplicate_hint: None,
        }));
    }
    if settings.memory_quality_enforcement == QualityEnforcement::Warn && !warnings.is_empty() {
        tracing::warn!(rule_count = warnings.len(), "memory accepted below quality bar (enforcement=warn)");
    }

    // Step 6: construct the memory.
    let mut memory = Memory::new(memory_type, content.clone());
    memory.tags = tags;
    memory.project = draft.project;
    memory.source = draft.source;
    memory.context = enrichment.context;
    memory.error_message = draft.error_message.clone();
    memory.stack_trace = draft.stack_trace;
    memory.solution = draft.solution.clone();
    memory.prevention = enrichment.prevention;
    memory.resolved = draft.solution.as_ref().is_some_and(|s| !s.trim().is_empty());
    memory.decision = draft.decision;
    memory.rationale = enrichment.rationale;
    memory.alternatives = enrichment.alternatives;
    memory.reversible = draft.reversible;
    memory.impact = draft.impact;
    memory.pinned = draft.pinned;
    if let Some(importance) = draft.importance_score {
        memory.importance_score = importance;
    }
    memory.session_id = draft.session_id.clone();
    memory.session_sequence = draft.session_sequence;
    memory.conversation_context = match draft.conversation_context {
        Some(ctx) => Some(ctx),
        None => match &draft.session_id {
            Some(session_id) => crate::session::build_conversation_context(vector_store, session_id)?,
            None => None,
        },
    };
    memory.created_at = now;
    memory.updated_at = now;
    memory.last_accessed = now;
    memory.event_time = now;
    memory.validity_start = now;
    memory.version_history.clear();
    memory.current_version = 1;

    memory.version_history.push(VersionSnapshot {
        version: 1,
        change_type: ChangeType::Created,
        created_at: now,
        content: memory.content.clone(),
        importance_score: memory.importance_score,
        tags: memory.tags.iter().cloned().collect(),
        error_message: memory.error_message.clone(),
        solution: memory.solution.clone(),
        decision: memory.decision.clone(),
        rationale: memory.rationale.clone(),
    });

    // Step 9: compute initial quality score (never left at the 0.0 default).
    let (score, components) = quality::score(&memory, now);
    memory.quality_score = score;
    memory.quality_components = components;
    memory.quality_history.push(crate::model::QualitySnapshot { score, at: now });

    // Step 8: persist.
    vector_store.upsert(&memory, &Vectors { dense: dense.clone(), sparse })?;

    // Step 10: graph node.
    graph_store.create_node(&memory)?;

    // Step 11: on-write relationship inference.
    if let Some(project) = memory.project.clone() {
        let neighbor_filter = Filter { project: Some(project), ..Default::default() };
        let candidates = vector_store.search_dense(&dense, &neighbor_filter, settings.on_write_max_relationships * 2, 0.5)?;
        let neighbors: Vec<(Memory, f32)> =
            candidates.into_iter().filter(|c| c.memory.id != memory.id).map(|c| (c.memory, c.score)).collect();
        let inferred = relations::infer_on_write(&memory, &neighbors, settings.on_write_max_relationships);
        for relation in inferred {
            graph_store.upsert_edge(&relation)?;
            let other_id = if relation.source_id == memory.id { relation.target_id.clone() } else { relation.source_id.clone() };
            memory.relations.push(EmbeddedRelation { target_id: other_id.clone(), relation_type: relation.relation_type, created_at: now });
            relations::reciprocate(vector_store, &other_id, &memory.id, relation.relation_type, now)?;
        }
    }

    // Step 12: auto-supersede band.
    if settings.auto_supersede_enabled && !memory.pinned && !memory.tags.contains("auto-captured") {
        if let Some(project) = memory.project.clone() {
            let filter = Filter { memory_type: Some(memory_type), project: Some(project), ..Default::default() };
            let band_hits = vector_store.search_dense(&dense, &filter, 10, settings.auto_supersede_threshold)?;
            for hit in band_hits {
                if hit.memory.id == memory.id || hit.memory.pinned || hit.memory.tags.contains("auto-captured") {
                    continue;
                }
                if hit.score >= settings.auto_supersede_upper {
                    continue; // at/above this, step 4 dedup already owns it
                }
                let mut old = hit.memory;
                if lifecycle::apply_transition(&mut old, crate::model::MemoryState::Archived, "superseded by newer memory", now).is_ok() {
                    let edge = Relation::new(memory.id.clone(), old.id.clone(), RelationType::Supersedes);
                    graph_store.upsert_edge(&edge)?;
                    memory.relations.push(EmbeddedRelation { target_id: old.id.clone(), relation_type: RelationType::Supersedes, created_at: now });
                    old.relations.push(EmbeddedRelation { target_id: memory.id.clone(), relation_type: RelationType::Supersedes, created_at: now });
                    let (score, components) = quality::score(&old, now);
                    old.quality_score = score;
                    old.quality_components = components;
                    vector_store.set_payload(&old.id, &old)?;
                }
            }
        }
    }

    // Persist the relations accumulated in steps 11-12.
    vector_store.set_payload(&memory.id, &memory)?;

    // Step 13: audit CREATE.
    audit.append(
        &AuditEntry::new(&memory.id, AuditAction::Create, "write_pipeline")
            .with_values(None, Some(serde_json::to_value(&memory)?)),
    )?;

    // Step 14: return the freshly persisted memory.
    let final_memory = vector_store.get(&memory.id)?.unwrap_or(memory);
    Ok(WriteOutcome::Created(final_memory))
}
