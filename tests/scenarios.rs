//! End-to-end scenarios exercised through `ServiceContext`, the surface a
//! transport layer actually drives.

use std::sync::Arc;

use chrono::Utc;

use engram_core::audit::SqliteAuditTrail;
use engram_core::cache::SqliteQueryCache;
use engram_core::context::{RerankerHandle, ServiceContext};
use engram_core::embeddings::{cosine_similarity, EmbedSide, EmbeddingError, EmbeddingService, DENSE_DIMENSIONS};
use engram_core::model::{MemoryState, MemoryType, RelationType};
use engram_core::pipeline::write::Draft;
use engram_core::scheduler::JobId;
use engram_core::settings::Settings;
use engram_core::store::{GraphStore, SqliteGraphStore, SqliteVectorStore, VectorStore};

/// A deterministic embedder: same direction for every document, except a
/// marker phrase tilts it by a fixed amount — lets tests pin down an exact
/// cosine similarity instead of depending on fastembed at test time.
struct TiltEmbeddings;

impl EmbeddingService for TiltEmbeddings {
    fn dense(&self, text: &str, _side: EmbedSide) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = vec![0.0_f32; DENSE_DIMENSIONS];
        v[0] = 1.0;
        if text.contains("read replicas") {
            v[1] = 0.5;
        }
        Ok(v)
    }
}

fn context() -> ServiceContext {
    ServiceContext::new(
        Arc::new(SqliteVectorStore::open_in_memory().unwrap()),
        Arc::new(SqliteGraphStore::open_in_memory().unwrap()),
        Arc::new(TiltEmbeddings),
        Arc::new(SqliteAuditTrail::open_in_memory().unwrap()),
        Arc::new(SqliteQueryCache::open_in_memory().unwrap()),
        Arc::new(RerankerHandle::default()),
        Settings::default(),
        None,
    )
}

/// Confirms the stub actually lands the supersede band before trusting the
/// scenario on it.
#[test]
fn tilt_embeddings_land_in_the_supersede_band() {
    let x = TiltEmbeddings.dense("Use PostgreSQL for primary store; strong JSON support and ACID", EmbedSide::Document).unwrap();
    let y = TiltEmbeddings
        .dense("Keep PostgreSQL as primary store; add read replicas for analytics traffic", EmbedSide::Document)
        .unwrap();
    let cosine = cosine_similarity(&x, &y);
    assert!((0.85..0.91).contains(&cosine), "cosine {cosine} outside the supersede band");
}

/// Scenario B — supersede band: a closely related new DECISION archives the
/// older one and links a SUPERSEDES edge, without touching the older
/// memory's quality score.
#[test]
fn scenario_b_supersede_band_archives_older_decision() {
    let ctx = context();

    let x = ctx
        .store_memory(
            Draft {
                memory_type: Some(MemoryType::Decision),
                content: "Use PostgreSQL for primary store; strong JSON support and ACID".into(),
                tags: vec!["decision".into(), "database".into(), "postgres".into()],
                project: Some("foo".into()),
                ..Default::default()
            },
            true,
        )
        .unwrap();
    let x_quality_before = x.quality_score;

    let y = ctx
        .store_memory(
            Draft {
                memory_type: Some(MemoryType::Decision),
                content: "Keep PostgreSQL as primary store; add read replicas for analytics traffic".into(),
                tags: vec!["decision".into(), "database".into(), "postgres".into()],
                project: Some("foo".into()),
                ..Default::default()
            },
            true,
        )
        .unwrap();

    let x_after = ctx.get_memory(&x.id).unwrap().unwrap();
    assert!(x_after.archived, "older decision should be archived once superseded");
    assert_eq!(x_after.quality_score, x_quality_before, "superseded memory's quality is left stale");

    let neighbors = ctx.graph_store.neighbors(&y.id, 1).unwrap();
    assert!(neighbors.iter().any(|(id, rel, _)| *id == x_after.id && *rel == RelationType::Supersedes));
}

/// Scenario F — restore + quality: restoring to an earlier, thinner version
/// knocks quality down and leaves exactly one RESTORE audit entry plus a
/// fresh version snapshot.
#[test]
fn scenario_f_restore_recomputes_quality_and_bumps_version() {
    let ctx = context();

    let created = ctx
        .store_memory(
            Draft {
                memory_type: Some(MemoryType::Learning),
                content: "short".into(),
                tags: vec![],
                ..Default::default()
            },
            false,
        )
        .unwrap();
    assert_eq!(created.current_version, 1);

    let patch = serde_json::json!({
        "content": "a much richer and more detailed account of the same lesson, with concrete context and a clear takeaway for next time",
        "tags": ["lesson", "context", "detail"],
    });
    let edited = ctx.update_memory(&created.id, &patch).unwrap();
    assert_eq!(edited.current_version, 2);
    assert_eq!(edited.version_history.len(), 1);

    let target = edited.version_history[0].clone();
    let restored = ctx.restore_to_version(&created.id, target.created_at).unwrap();

    assert_eq!(restored.content, "short");
    assert_eq!(restored.current_version, 3);
    assert_eq!(restored.version_history.len(), 2);
    assert!(restored.quality_score <= edited.quality_score);

    let trail = ctx.audit.for_memory(&created.id).unwrap();
    assert_eq!(trail.iter().filter(|e| e.action == engram_core::model::AuditAction::Restore).count(), 1);
}

/// Invariant 5 — dedup idempotence: storing the same draft twice returns
/// the same id, merges tags, and leaves `created_at` untouched.
#[test]
fn dedup_merge_is_idempotent_on_identical_tags() {
    let ctx = context();
    let draft = || Draft {
        memory_type: Some(MemoryType::Error),
        content: "connection pool exhausted under burst traffic, requests start timing out".into(),
        tags: vec!["pool".into(), "timeout".into()],
        error_message: Some("pool exhausted".into()),
        ..Default::default()
    };

    let first = ctx.store_memory(draft(), true).unwrap();
    let second = ctx.store_memory(draft(), true).unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.access_count, 1);
    assert_eq!(first.created_at, second.created_at);
    assert_eq!(second.tags, first.tags);
}

/// Invariant 2 — lifecycle legality: triggering the state-transitions job
/// only ever records transitions that the state machine's own table allows.
#[tokio::test]
async fn scheduler_state_transitions_only_apply_legal_moves() {
    let ctx = context();
    let fresh = ctx
        .store_memory(
            Draft {
                memory_type: Some(MemoryType::Pattern),
                content: "a pattern worth promoting once it has aged and proven itself reliable".into(),
                tags: vec!["pattern".into(), "reliability".into()],
                ..Default::default()
            },
            false,
        )
        .unwrap();

    // Backdate it past the EPISODIC -> SEMANTIC threshold directly in the store.
    let mut aged = ctx.get_memory(&fresh.id).unwrap().unwrap();
    aged.created_at = Utc::now() - chrono::Duration::days(8);
    aged.quality_score = 0.8;
    ctx.vector_store.set_payload(&fresh.id, &aged).unwrap();

    let outcome = ctx.trigger_job(JobId::StateTransitions).await.unwrap();
    assert_eq!(outcome.job, JobId::StateTransitions);

    let after = ctx.get_memory(&fresh.id).unwrap().unwrap();
    assert_eq!(after.state, MemoryState::Semantic);
    for record in &after.state_history {
        assert_ne!(record.from, MemoryState::Purged);
    }
}

/// `get_context` honors the document cap and the lookback window.
#[test]
fn get_context_caps_documents_and_respects_window() {
    let ctx = context();
    ctx.store_memory(
        Draft { memory_type: Some(MemoryType::Docs), content: "first onboarding document for new engineers".into(), ..Default::default() },
        false,
    )
    .unwrap();
    ctx.store_memory(
        Draft { memory_type: Some(MemoryType::Docs), content: "second onboarding document for new engineers".into(), ..Default::default() },
        false,
    )
    .unwrap();
    ctx.store_memory(
        Draft { memory_type: Some(MemoryType::Learning), content: "a learning entry that should still show up in context".into(), ..Default::default() },
        false,
    )
    .unwrap();

    let context_memories = ctx.get_context(None, 24, None, true, Some(1)).unwrap();
    let doc_count = context_memories.iter().filter(|m| m.memory_type == MemoryType::Docs).count();
    assert_eq!(doc_count, 1, "document_limit should cap DOCS entries");
    assert!(context_memories.iter().any(|m| m.memory_type == MemoryType::Learning));

    let no_docs = ctx.get_context(None, 24, None, false, None).unwrap();
    assert!(no_docs.iter().all(|m| m.memory_type != MemoryType::Docs));
}

/// `mark_resolved` refuses to resolve an already-resolved error without
/// going through the generic patch path.
#[test]
fn mark_resolved_twice_is_a_conflict() {
    let ctx = context();
    let memory = ctx
        .store_memory(
            Draft {
                memory_type: Some(MemoryType::Error),
                content: "redis connection pool exhausted under burst traffic".into(),
                tags: vec!["redis".into()],
                error_message: Some("pool exhausted".into()),
                ..Default::default()
            },
            false,
        )
        .unwrap();
    assert!(!memory.resolved);

    ctx.mark_resolved(&memory.id, "raise the pool size and add backpressure").unwrap();
    assert!(ctx.mark_resolved(&memory.id, "again").is_err());
}
