//! Lifecycle state machine: EPISODIC → STAGING → SEMANTIC → PROCEDURAL → ARCHIVED → PURGED.

use serde::{Deserialize, Serialize};

/// A memory's maturity state. Richer than [`crate::model::MemoryTier`]: it also
/// covers the transient staging and terminal archived/purged states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryState {
    #[default]
    Episodic,
    Staging,
    Semantic,
    Procedural,
    Archived,
    Purged,
}

impl MemoryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryState::Episodic => "episodic",
            MemoryState::Staging => "staging",
            MemoryState::Semantic => "semantic",
            MemoryState::Procedural => "procedural",
            MemoryState::Archived => "archived",
            MemoryState::Purged => "purged",
        }
    }

    /// Legal destinations from this state (spec §4.6).
    pub fn legal_transitions(&self) -> &'static [MemoryState] {
        use MemoryState::*;
        match self {
            Episodic => &[Staging, Semantic, Archived],
            Staging => &[Semantic, Episodic, Archived],
            Semantic => &[Procedural, Archived],
            Procedural => &[Archived],
            Archived => &[Purged, Episodic],
            Purged => &[],
        }
    }

    pub fn can_transition_to(&self, target: MemoryState) -> bool {
        self.legal_transitions().contains(&target)
    }

    /// Whether this state is terminal (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, MemoryState::Purged)
    }
}

impl std::fmt::Display for MemoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MemoryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "episodic" => Ok(MemoryState::Episodic),
            "staging" => Ok(MemoryState::Staging),
            "semantic" => Ok(MemoryState::Semantic),
            "procedural" => Ok(MemoryState::Procedural),
            "archived" => Ok(MemoryState::Archived),
            "purged" => Ok(MemoryState::Purged),
            _ => Err(format!("unknown memory state: {s}")),
        }
    }
}

/// Legacy coarse tier, mirrored alongside `state` for scoring purposes (spec §3).
/// Only the three non-archived maturity levels exist here; archived/purged
/// memories keep their last tier for historical scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTier {
    #[default]
    Episodic,
    Semantic,
    Procedural,
}

impl MemoryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::Episodic => "episodic",
            MemoryTier::Semantic => "semantic",
            MemoryTier::Procedural => "procedural",
        }
    }

    /// Map a lifecycle state to the tier it corresponds to, where applicable.
    pub fn from_state(state: MemoryState) -> Option<MemoryTier> {
        match state {
            MemoryState::Episodic | MemoryState::Staging => Some(MemoryTier::Episodic),
            MemoryState::Semantic => Some(MemoryTier::Semantic),
            MemoryState::Procedural => Some(MemoryTier::Procedural),
            MemoryState::Archived | MemoryState::Purged => None,
        }
    }
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in a memory's append-only state history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransitionRecord {
    pub from: MemoryState,
    pub to: MemoryState,
    pub at: chrono::DateTime<chrono::Utc>,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purged_is_terminal() {
        assert!(MemoryState::Purged.is_terminal());
        assert!(MemoryState::Purged.legal_transitions().is_empty());
    }

    #[test]
    fn legal_transition_table_matches_spec() {
        assert!(MemoryState::Episodic.can_transition_to(MemoryState::Staging));
        assert!(MemoryState::Episodic.can_transition_to(MemoryState::Semantic));
        assert!(MemoryState::Episodic.can_transition_to(MemoryState::Archived));
        assert!(!MemoryState::Episodic.can_transition_to(MemoryState::Procedural));

        assert!(MemoryState::Staging.can_transition_to(MemoryState::Episodic));
        assert!(!MemoryState::Staging.can_transition_to(MemoryState::Procedural));

        assert!(MemoryState::Semantic.can_transition_to(MemoryState::Procedural));
        assert!(!MemoryState::Semantic.can_transition_to(MemoryState::Episodic));

        assert!(MemoryState::Procedural.can_transition_to(MemoryState::Archived));
        assert!(!MemoryState::Procedural.can_transition_to(MemoryState::Semantic));

        assert!(MemoryState::Archived.can_transition_to(MemoryState::Purged));
        assert!(MemoryState::Archived.can_transition_to(MemoryState::Episodic));
    }

    #[test]
    fn tier_from_state() {
        assert_eq!(MemoryTier::from_state(MemoryState::Staging), Some(MemoryTier::Episodic));
        assert_eq!(MemoryTier::from_state(MemoryState::Archived), None);
    }
}
