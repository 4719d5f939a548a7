//! Version snapshots — the rollback-able subset of a memory, captured on every change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a version snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Edited,
    Consolidated,
    Reconsolidated,
    Restored,
}

/// An immutable snapshot of the rollback-able subset of a memory: content,
/// importance, tags, and the type-specific fields (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSnapshot {
    pub version: u32,
    pub change_type: ChangeType,
    pub created_at: DateTime<Utc>,
    pub content: String,
    pub importance_score: f64,
    pub tags: Vec<String>,

    pub error_message: Option<String>,
    pub solution: Option<String>,
    pub decision: Option<String>,
    pub rationale: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_camel_case() {
        let snap = VersionSnapshot {
            version: 1,
            change_type: ChangeType::Created,
            created_at: Utc::now(),
            content: "x".into(),
            importance_score: 0.5,
            tags: vec!["a".into()],
            error_message: None,
            solution: None,
            decision: None,
            rationale: None,
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"importanceScore\""));
    }
}
