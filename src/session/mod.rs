//! Session engine: conversational-context construction on write, and
//! session consolidation into a summary memory (spec §4.14).

use chrono::{DateTime, Utc};

use crate::audit::SqliteAuditTrail;
use crate::error::Result;
use crate::model::{AuditAction, AuditEntry, Memory, MemoryType, Relation, RelationType};
use crate::store::{Filter, GraphStore, VectorStore};

/// Max length of the auto-built conversation-context summary (spec §4.14).
const CONTEXT_SUMMARY_MAX_LEN: usize = 500;

/// Minimum member count before a session is eligible for consolidation
/// (spec §4.14 "requires ≥2 memories").
const MIN_SESSION_SIZE: usize = 2;

const SESSION_SUMMARY_TAG: &str = "session-summary";

fn scroll_session(vector_store: &dyn VectorStore, session_id: &str) -> Result<Vec<Memory>> {
    let filter = Filter { include_archived: true, ..Default::default() };
    let mut members = Vec::new();
    let mut offset = 0;
    loop {
        let page = vector_store.scroll(&filter, 200, offset)?;
        let got = page.memories.len();
        members.extend(page.memories.into_iter().filter(|m| m.session_id.as_deref() == Some(session_id)));
        match page.next_offset {
            Some(next) => offset = next,
            None => break,
        }
        if got == 0 {
            break;
        }
    }
    members.sort_by_key(|m| m.session_sequence.unwrap_or(0));
    Ok(members)
}

/// Build a ≤500-char conversation-context summary from a session's prior
/// memories, ordered by `session_sequence` (spec §4.14). Used on write when
/// a `session_id` is supplied and no `conversation_context` is given.
pub fn build_conversation_context(vector_store: &dyn VectorStore, session_id: &str) -> Result<Option<String>> {
    let members = scroll_session(vector_store, session_id)?;
    if members.is_empty() {
        return Ok(None);
    }

    let mut summary = String::new();
    for member in &members {
        let line = format!("[{}] {}", member.memory_type.as_str(), member.content_preview(80));
        if summary.chars().count() + line.chars().count() + 1 > CONTEXT_SUMMARY_MAX_LEN {
            break;
        }
        if !summary.is_empty() {
            summary.push('\n');
        }
        summary.push_str(&line);
    }
    Ok(Some(summary))
}

/// Intra-session relationship inference: consecutive memories get FOLLOWS;
/// an ERROR followed by a LEARNING/DECISION gets a reverse FIXES; a PATTERN
/// followed by a LEARNING/DECISION gets SUPPORTS (spec §4.14).
fn infer_intra_session_edges(members: &[Memory], max_gap_minutes: i64) -> Vec<Relation> {
    let mut edges = Vec::new();
    for pair in members.windows(2) {
        let (earlier, later) = (&pair[0], &pair[1]);
        let gap_minutes = (later.created_at - earlier.created_at).num_minutes();
        if gap_minutes <= max_gap_minutes {
            edges.push(Relation::new(later.id.clone(), earlier.id.clone(), RelationType::Follows));
        }

        let later_is_resolution = matches!(later.memory_type, MemoryType::Learning | MemoryType::Decision);
        if earlier.memory_type == MemoryType::Error && later_is_resolution {
            edges.push(Relation::new(later.id.clone(), earlier.id.clone(), RelationType::Fixes));
        }
        if earlier.memory_type == MemoryType::Pattern && later_is_resolution {
            edges.push(Relation::new(earlier.id.clone(), later.id.clone(), RelationType::Supports));
        }
    }
    edges
}

/// A session is eligible for consolidation once it has at least
/// [`MIN_SESSION_SIZE`] members, none of which is already a summary, and
/// enough time has passed since the last member arrived (spec §4.14).
pub fn is_due_for_consolidation(members: &[Memory], now: DateTime<Utc>, delay_hours: i64) -> bool {
    if members.len() < MIN_SESSION_SIZE {
        return false;
    }
    if members.iter().any(|m| m.tags.contains(SESSION_SUMMARY_TAG)) {
        return false;
    }
    let last_arrival = members.iter().map(|m| m.created_at).max().unwrap_or(now);
    now - last_arrival >= chrono::Duration::hours(delay_hours)
}

fn build_summary_content(session_id: &str, members: &[Memory]) -> String {
    let mut counts: std::collections::BTreeMap<&'static str, usize> = std::collections::BTreeMap::new();
    for m in members {
        *counts.entry(m.memory_type.as_str()).or_insert(0) += 1;
    }
    let counts_line = counts.iter().map(|(ty, n)| format!("{n} {ty}")).collect::<Vec<_>>().join(", ");

    let mut content = format!("Session {session_id} ({} memories: {counts_line}).\n", members.len());
    for member in members {
        content.push_str(&format!("- [{}] {}\n", member.memory_type.as_str(), member.content_preview(100)));
    }
    content
}

/// Consolidate a session: create a CONTEXT-type summary memory, link every
/// member to it via PART_OF, and infer the intra-session edges described in
/// spec §4.14. Requires at least two members and no existing summary.
pub fn consolidate_session(
    vector_store: &dyn VectorStore,
    graph_store: &dyn GraphStore,
    audit: &SqliteAuditTrail,
    session_id: &str,
    follows_max_gap_minutes: i64,
    now: DateTime<Utc>,
) -> Result<Option<Memory>> {
    let members = scroll_session(vector_store, session_id)?;
    if members.len() < MIN_SESSION_SIZE || members.iter().any(|m| m.tags.contains(SESSION_SUMMARY_TAG)) {
        return Ok(None);
    }

    let mut summary = Memory::new(MemoryType::Context, build_summary_content(session_id, &members));
    summary.session_id = Some(session_id.to_string());
    summary.tags = std::collections::HashSet::from([SESSION_SUMMARY_TAG.to_string(), "consolidated".to_string()]);
    summary.consolidated_from = members.iter().map(|m| m.id.clone()).collect();
    summary.project = members.first().and_then(|m| m.project.clone());

    let dense_placeholder = vec![0.0_f32; crate::embeddings::DENSE_DIMENSIONS];
    vector_store.upsert(&summary, &crate::store::Vectors { dense: dense_placeholder, sparse: None })?;
    graph_store.create_node(&summary)?;

    for member in &members {
        let edge = Relation::new(member.id.clone(), summary.id.clone(), RelationType::PartOf);
        graph_store.upsert_edge(&edge)?;
    }

    for edge in infer_intra_session_edges(&members, follows_max_gap_minutes) {
        graph_store.upsert_edge(&edge)?;
    }

    audit.append(
        &AuditEntry::new(&summary.id, AuditAction::Create, "session_consolidation")
            .with_reason(format!("consolidated session {session_id} ({} members)", members.len())),
    )?;

    Ok(Some(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::SqliteAuditTrail;
    use crate::store::{SqliteGraphStore, SqliteVectorStore, Vectors};

    fn dense() -> Vec<f32> {
        vec![0.1; crate::embeddings::DENSE_DIMENSIONS]
    }

    fn seeded_session(vs: &SqliteVectorStore, session_id: &str) -> Vec<Memory> {
        let mut members = Vec::new();
        let mut m1 = Memory::new(MemoryType::Error, "the build fails with ENOSPC while writing docker layers");
        m1.session_id = Some(session_id.to_string());
        m1.session_sequence = Some(1);
        m1.tags = std::collections::HashSet::from(["docker".into(), "ci".into()]);
        vs.upsert(&m1, &Vectors { dense: dense(), sparse: None }).unwrap();
        members.push(m1);

        let mut m2 = Memory::new(MemoryType::Learning, "pruning the docker build cache before each run fixes ENOSPC");
        m2.session_id = Some(session_id.to_string());
        m2.session_sequence = Some(2);
        m2.tags = std::collections::HashSet::from(["docker".into(), "ci".into()]);
        vs.upsert(&m2, &Vectors { dense: dense(), sparse: None }).unwrap();
        members.push(m2);
        members
    }

    #[test]
    fn conversation_context_summarises_prior_members_within_length_cap() {
        let vs = SqliteVectorStore::open_in_memory().unwrap();
        let session_id = "sess-1";
        seeded_session(&vs, session_id);

        let summary = build_conversation_context(&vs, session_id).unwrap().unwrap();
        assert!(summary.chars().count() <= CONTEXT_SUMMARY_MAX_LEN);
        assert!(summary.contains("[error]"));
        assert!(summary.contains("[learning]"));
    }

    #[test]
    fn consolidation_requires_at_least_two_members() {
        let members = vec![Memory::new(MemoryType::Learning, "only one memory in this entire session so far")];
        assert!(!is_due_for_consolidation(&members, Utc::now(), 24));
    }

    #[test]
    fn consolidation_creates_summary_and_links_members() {
        let vs = SqliteVectorStore::open_in_memory().unwrap();
        let gs = SqliteGraphStore::open_in_memory().unwrap();
        let audit = SqliteAuditTrail::open_in_memory().unwrap();
        let session_id = "sess-2";
        let members = seeded_session(&vs, session_id);

        let summary = consolidate_session(&vs, &gs, &audit, session_id, 30, Utc::now()).unwrap().unwrap();
        assert_eq!(summary.memory_type, MemoryType::Context);
        assert_eq!(summary.consolidated_from.len(), members.len());

        let neighbors = gs.neighbors(&members[0].id, 1).unwrap();
        assert!(neighbors.iter().any(|(_, rel, _)| *rel == RelationType::PartOf));
    }

    #[test]
    fn second_consolidation_attempt_is_a_no_op() {
        let vs = SqliteVectorStore::open_in_memory().unwrap();
        let gs = SqliteGraphStore::open_in_memory().unwrap();
        let audit = SqliteAuditTrail::open_in_memory().unwrap();
        let session_id = "sess-3";
        seeded_session(&vs, session_id);

        consolidate_session(&vs, &gs, &audit, session_id, 30, Utc::now()).unwrap();
        let second = consolidate_session(&vs, &gs, &audit, session_id, 30, Utc::now()).unwrap();
        assert!(second.is_none());
    }
}
