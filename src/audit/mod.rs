//! Audit trail storage and the restore paths built on it (spec §4.12).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{EngramError, Result};
use crate::model::{AuditAction, AuditEntry, ChangeType, Memory, VersionSnapshot};

pub struct SqliteAuditTrail {
    conn: Mutex<Connection>,
}

impl SqliteAuditTrail {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        crate::store::migrations::apply(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        crate::store::migrations::apply(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Append one entry. Never mutated after write (spec §3, §4.12).
    pub fn append(&self, entry: &AuditEntry) -> Result<()> {
        let conn = self.conn.lock().expect("audit lock poisoned");
        conn.execute(
            "INSERT INTO audit_trail (id, memory_id, action, actor, timestamp, old_values, new_values, reason, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.id,
                entry.memory_id,
                serde_json::to_string(&entry.action)?,
                entry.actor,
                entry.timestamp.to_rfc3339(),
                entry.old_values.as_ref().map(serde_json::to_string).transpose()?,
                entry.new_values.as_ref().map(serde_json::to_string).transpose()?,
                entry.reason,
                entry.metadata.as_ref().map(serde_json::to_string).transpose()?,
            ],
        )?;
        Ok(())
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<AuditEntry> {
        let action_json: String = row.get(2)?;
        let old_json: Option<String> = row.get(5)?;
        let new_json: Option<String> = row.get(6)?;
        let metadata_json: Option<String> = row.get(8)?;
        Ok(AuditEntry {
            id: row.get(0)?,
            memory_id: row.get(1)?,
            action: serde_json::from_str(&action_json).unwrap_or(AuditAction::Update),
            actor: row.get(3)?,
            timestamp: row.get::<_, String>(4)?.parse().unwrap_or_else(|_| Utc::now()),
            old_values: old_json.and_then(|s| serde_json::from_str(&s).ok()),
            new_values: new_json.and_then(|s| serde_json::from_str(&s).ok()),
            reason: row.get(7)?,
            metadata: metadata_json.and_then(|s| serde_json::from_str(&s).ok()),
        })
    }

    /// The full trail for one memory, newest first (spec §4.12).
    pub fn for_memory(&self, memory_id: &str) -> Result<Vec<AuditEntry>> {
        let conn = self.conn.lock().expect("audit lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, memory_id, action, actor, timestamp, old_values, new_values, reason, metadata
             FROM audit_trail WHERE memory_id = ?1 ORDER BY timestamp DESC",
        )?;
        let rows = stmt.query_map(params![memory_id], Self::row_to_entry)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(EngramError::from)
    }

    /// The most recent undoable entry for a memory (spec §4.12 "undo last
    /// change"): the newest entry with `old_values != ∅` whose action is not
    /// CREATE or RESTORE.
    pub fn find_undoable(&self, memory_id: &str) -> Result<Option<AuditEntry>> {
        Ok(self.for_memory(memory_id)?.into_iter().find(|e| e.is_undoable()))
    }
}

/// Apply a sparse JSON patch onto a memory's full field set and re-parse —
/// the same atomic-patch contract the payload-update wrapper uses (spec
/// §4.2 step 1), reused here so restore paths share one application method.
/// Merge a JSON patch onto a memory's serialised form (spec §4.2 step 1,
/// "apply `patch` to the stored payload atomically"). Shared by `undo` and
/// the payload-update wrapper.
pub(crate) fn apply_patch(memory: &Memory, patch: &serde_json::Value) -> Result<Memory> {
    let mut value = serde_json::to_value(memory)?;
    if let (Some(obj), Some(patch_obj)) = (value.as_object_mut(), patch.as_object()) {
        for (k, v) in patch_obj {
            obj.insert(k.clone(), v.clone());
        }
    }
    Ok(serde_json::from_value(value)?)
}

/// Undo the most recent undoable change: apply its `old_values` back onto
/// the memory (spec §4.12).
pub fn undo(memory: &Memory, entry: &AuditEntry) -> Result<Memory> {
    let old_values = entry
        .old_values
        .as_ref()
        .ok_or_else(|| EngramError::Conflict("audit entry has no old_values to undo to".into()))?;
    apply_patch(memory, old_values)
}

/// Restore a memory to an earlier version snapshot (spec §4.12 "version
/// restore", the richer path): the current state is captured as a new
/// RESTORED version, then content/importance/tags/type-specific fields are
/// replaced by the target snapshot, content is cleaned and tags normalised
/// (spec §4.12 "enrichment sanitisation"). Quality recomputation is the
/// caller's responsibility via the payload-update wrapper.
pub fn restore_to_version(memory: &Memory, target: &VersionSnapshot, now: DateTime<Utc>) -> Memory {
    let mut restored = memory.clone();

    restored.version_history.push(VersionSnapshot {
        version: memory.current_version,
        change_type: ChangeType::Restored,
        created_at: now,
        content: memory.content.clone(),
        importance_score: memory.importance_score,
        tags: memory.tags.iter().cloned().collect(),
        error_message: memory.error_message.clone(),
        solution: memory.solution.clone(),
        decision: memory.decision.clone(),
        rationale: memory.rationale.clone(),
    });
    restored.current_version = memory.current_version + 1;

    restored.content = crate::pipeline::clean_content(&target.content);
    restored.importance_score = target.importance_score;
    restored.tags = crate::pipeline::normalize_tags(target.tags.iter().cloned());
    restored.error_message = target.error_message.clone();
    restored.solution = target.solution.clone();
    restored.decision = target.decision.clone();
    restored.rationale = target.rationale.clone();
    restored.updated_at = now;

    restored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryType;
    use std::collections::HashSet;

    fn memory() -> Memory {
        let mut m = Memory::new(MemoryType::Learning, "some content that is long enough to pass all rules");
        m.tags = HashSet::from(["a".into(), "b".into()]);
        m
    }

    #[test]
    fn append_and_fetch_roundtrips() {
        let trail = SqliteAuditTrail::open_in_memory().unwrap();
        let entry = AuditEntry::new("m1", AuditAction::Create, "system")
            .with_values(None, Some(serde_json::json!({"content": "x"})));
        trail.append(&entry).unwrap();

        let fetched = trail.for_memory("m1").unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].action, AuditAction::Create);
    }

    #[test]
    fn find_undoable_skips_create_and_restore() {
        let trail = SqliteAuditTrail::open_in_memory().unwrap();
        trail
            .append(&AuditEntry::new("m1", AuditAction::Create, "system").with_values(None, Some(serde_json::json!({}))))
            .unwrap();
        trail
            .append(
                &AuditEntry::new("m1", AuditAction::Update, "system")
                    .with_values(Some(serde_json::json!({"content": "old"})), Some(serde_json::json!({"content": "new"}))),
            )
            .unwrap();

        let undoable = trail.find_undoable("m1").unwrap().expect("should find the update entry");
        assert_eq!(undoable.action, AuditAction::Update);
    }

    #[test]
    fn undo_applies_old_values_patch() {
        let memory = memory();
        let entry = AuditEntry::new(&memory.id, AuditAction::Update, "system")
            .with_values(Some(serde_json::json!({"content": "a previous version of the content that was long enough"})), None);
        let restored = undo(&memory, &entry).unwrap();
        assert_eq!(restored.content, "a previous version of the content that was long enough");
    }

    #[test]
    fn restore_to_version_records_restored_snapshot() {
        let memory = memory();
        let target = VersionSnapshot {
            version: 1,
            change_type: ChangeType::Created,
            created_at: Utc::now(),
            content: "shorter original content that still passes the length rule".into(),
            importance_score: 0.3,
            tags: vec!["x".into(), "y".into()],
            error_message: None,
            solution: None,
            decision: None,
            rationale: None,
        };
        let restored = restore_to_version(&memory, &target, Utc::now());
        assert_eq!(restored.content, "shorter original content that still passes the length rule");
        assert_eq!(restored.current_version, memory.current_version + 1);
        assert!(restored.version_history.iter().any(|v| v.change_type == ChangeType::Restored));
    }
}
