//! Audit entry — an append-only record of every mutation (spec §3, §4.12).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of change an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Archive,
    Restore,
    StateTransition,
    TierPromotion,
    QualityUpdate,
}

/// One append-only audit record. Never mutated after write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub memory_id: String,
    pub action: AuditAction,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub reason: Option<String>,
    pub metadata: Option<Value>,
}

impl AuditEntry {
    pub fn new(memory_id: impl Into<String>, action: AuditAction, actor: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            memory_id: memory_id.into(),
            action,
            actor: actor.into(),
            timestamp: Utc::now(),
            old_values: None,
            new_values: None,
            reason: None,
            metadata: None,
        }
    }

    pub fn with_values(mut self, old: Option<Value>, new: Option<Value>) -> Self {
        self.old_values = old;
        self.new_values = new;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// "Undoable" per spec §4.12: has a prior-state snapshot and is not
    /// itself a CREATE or a RESTORE.
    pub fn is_undoable(&self) -> bool {
        self.old_values.is_some()
            && !matches!(self.action, AuditAction::Create | AuditAction::Restore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_entry_not_undoable() {
        let entry = AuditEntry::new("m1", AuditAction::Create, "system")
            .with_values(None, Some(serde_json::json!({"content": "x"})));
        assert!(!entry.is_undoable());
    }

    #[test]
    fn update_entry_with_old_values_is_undoable() {
        let entry = AuditEntry::new("m1", AuditAction::Update, "system").with_values(
            Some(serde_json::json!({"content": "old"})),
            Some(serde_json::json!({"content": "new"})),
        );
        assert!(entry.is_undoable());
    }
}
