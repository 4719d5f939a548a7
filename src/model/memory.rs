//! Memory — the primary entity (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::relation::EmbeddedRelation;
use super::state::{MemoryState, MemoryTier, StateTransitionRecord};
use super::version::VersionSnapshot;

/// The six memory types (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Error,
    Decision,
    Pattern,
    Learning,
    Docs,
    Context,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Error => "error",
            MemoryType::Decision => "decision",
            MemoryType::Pattern => "pattern",
            MemoryType::Learning => "learning",
            MemoryType::Docs => "docs",
            MemoryType::Context => "context",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(MemoryType::Error),
            "decision" => Ok(MemoryType::Decision),
            "pattern" => Ok(MemoryType::Pattern),
            "learning" => Ok(MemoryType::Learning),
            "docs" => Ok(MemoryType::Docs),
            "context" => Ok(MemoryType::Context),
            other => Err(format!("unknown memory type: {other}")),
        }
    }
}

/// The seven quality-score components (spec §4.7), kept alongside the
/// combined score so a trend can be reconstructed without recomputation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityComponents {
    pub content_richness: f64,
    pub access_frequency: f64,
    pub maturity: f64,
    pub stability: f64,
    pub relationship_density: f64,
    pub user_rating_normalized: f64,
    pub tier_bonus: f64,
}

/// One timestamped quality snapshot, used to compute trend (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualitySnapshot {
    pub score: f64,
    pub at: DateTime<Utc>,
}

/// User-submitted feedback on a memory (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFeedback {
    pub rating: u8,
    pub comment: Option<String>,
    pub at: DateTime<Utc>,
}

/// A single unit of stored knowledge, and its full lifecycle state.
///
/// `#[non_exhaustive]` because new scoring/provenance fields are expected to
/// grow without breaking callers that construct via [`Memory::new`].
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    // Identity
    pub id: String,

    // Semantic content
    pub memory_type: MemoryType,
    pub content: String,
    pub tags: HashSet<String>,
    pub project: Option<String>,
    pub source: Option<String>,
    pub context: Option<String>,

    // Type-specific fields
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub solution: Option<String>,
    pub prevention: Option<String>,
    pub resolved: bool,

    pub decision: Option<String>,
    pub rationale: Option<String>,
    pub alternatives: Option<String>,
    pub reversible: Option<bool>,
    pub impact: Option<String>,

    // Time
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub event_time: DateTime<Utc>,
    pub validity_start: DateTime<Utc>,
    pub validity_end: Option<DateTime<Utc>>,

    // Lifecycle
    pub state: MemoryState,
    pub state_changed_at: DateTime<Utc>,
    pub state_history: Vec<StateTransitionRecord>,
    pub memory_tier: MemoryTier,
    pub archived: bool,
    pub archived_at: Option<DateTime<Utc>>,

    // Scoring
    pub access_count: u64,
    pub importance_score: f64,
    pub recency_score: f64,
    pub pinned: bool,
    pub memory_strength: f64,
    pub decay_rate: f64,
    pub last_decay_update: DateTime<Utc>,
    pub quality_score: f64,
    pub quality_components: QualityComponents,
    pub quality_history: Vec<QualitySnapshot>,
    pub user_rating: f64,
    pub user_rating_count: u32,
    pub user_feedback: Vec<UserFeedback>,

    // Relations (denormalised view; graph store mirrors these as edges)
    pub relations: Vec<EmbeddedRelation>,

    // Versioning
    pub current_version: u32,
    pub version_history: Vec<VersionSnapshot>,

    // Session
    pub session_id: Option<String>,
    pub conversation_context: Option<String>,
    pub session_sequence: Option<u32>,

    // Consolidation provenance
    pub consolidated_from: Vec<String>,
    pub consolidation_summary: Option<String>,
}

impl Memory {
    /// Construct a bare memory with sane defaults. Callers still need to run
    /// it through the write pipeline (§4.3) before it is persisted — this
    /// constructor does not validate, enrich, or embed.
    pub fn new(memory_type: MemoryType, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            memory_type,
            content: content.into(),
            tags: HashSet::new(),
            project: None,
            source: None,
            context: None,

            error_message: None,
            stack_trace: None,
            solution: None,
            prevention: None,
            resolved: false,

            decision: None,
            rationale: None,
            alternatives: None,
            reversible: None,
            impact: None,

            created_at: now,
            updated_at: now,
            last_accessed: now,
            event_time: now,
            validity_start: now,
            validity_end: None,

            state: MemoryState::Episodic,
            state_changed_at: now,
            state_history: Vec::new(),
            memory_tier: MemoryTier::Episodic,
            archived: false,
            archived_at: None,

            access_count: 0,
            importance_score: 0.5,
            recency_score: 1.0,
            pinned: false,
            memory_strength: 1.0,
            decay_rate: 0.005,
            last_decay_update: now,
            quality_score: 0.0,
            quality_components: QualityComponents::default(),
            quality_history: Vec::new(),
            user_rating: 0.0,
            user_rating_count: 0,
            user_feedback: Vec::new(),

            relations: Vec::new(),

            current_version: 1,
            version_history: Vec::new(),

            session_id: None,
            conversation_context: None,
            session_sequence: None,

            consolidated_from: Vec::new(),
            consolidation_summary: None,
        }
    }

    /// Bi-temporal validity check (spec §3, §8 property 7):
    /// `validity_start <= t AND (validity_end is null OR validity_end > t)`.
    pub fn is_valid_at(&self, t: DateTime<Utc>) -> bool {
        self.validity_start <= t && self.validity_end.is_none_or(|end| end > t)
    }

    /// Age in whole days since creation.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }

    /// Time spent in the current lifecycle state, in whole hours.
    pub fn time_in_state_hours(&self, now: DateTime<Utc>) -> i64 {
        (now - self.state_changed_at).num_hours()
    }

    /// Number of edits after creation (version_history excludes the implicit
    /// current version, so edits = current_version - 1 - creations(=1)).
    pub fn edit_count(&self) -> u32 {
        self.current_version.saturating_sub(1)
    }

    pub fn content_preview(&self, max_len: usize) -> String {
        if self.content.chars().count() <= max_len {
            self.content.clone()
        } else {
            self.content.chars().take(max_len).collect::<String>() + "…"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_memory_defaults_to_episodic_unarchived() {
        let m = Memory::new(MemoryType::Learning, "some content here that is long enough");
        assert_eq!(m.state, MemoryState::Episodic);
        assert!(!m.archived);
        assert_eq!(m.current_version, 1);
        assert!(m.version_history.is_empty());
    }

    #[test]
    fn validity_window_scenario_e() {
        let mut m = Memory::new(MemoryType::Docs, "content that satisfies length rules ok");
        m.validity_start = "2024-03-01T00:00:00Z".parse().unwrap();
        m.validity_end = Some("2024-08-15T00:00:00Z".parse().unwrap());

        assert!(m.is_valid_at("2024-05-01T00:00:00Z".parse().unwrap()));
        assert!(!m.is_valid_at("2024-09-01T00:00:00Z".parse().unwrap()));
        assert!(m.is_valid_at("2024-03-01T00:00:00Z".parse().unwrap()));
        assert!(!m.is_valid_at("2024-08-15T00:00:00Z".parse().unwrap()));
    }

    #[test]
    fn edit_count_tracks_version_minus_one() {
        let mut m = Memory::new(MemoryType::Pattern, "content long enough to pass validation rules");
        assert_eq!(m.edit_count(), 0);
        m.current_version = 4;
        assert_eq!(m.edit_count(), 3);
    }
}
