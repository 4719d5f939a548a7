//! Relation — a typed, optionally temporally-bounded edge between two memories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Relationship types between memories (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Causes,
    Fixes,
    Contradicts,
    Supports,
    Follows,
    Related,
    Supersedes,
    SimilarTo,
    PartOf,
    CoActivated,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Causes => "causes",
            RelationType::Fixes => "fixes",
            RelationType::Contradicts => "contradicts",
            RelationType::Supports => "supports",
            RelationType::Follows => "follows",
            RelationType::Related => "related",
            RelationType::Supersedes => "supersedes",
            RelationType::SimilarTo => "similar_to",
            RelationType::PartOf => "part_of",
            RelationType::CoActivated => "co_activated",
        }
    }

    /// Edge weight used by graph expansion (spec §4.4.5). CONTRADICTS is
    /// negative by design — it never survives the `< 0.1` discard filter.
    pub fn expansion_weight(&self) -> f32 {
        match self {
            RelationType::Fixes => 1.0,
            RelationType::Supports => 0.9,
            RelationType::Follows => 0.8,
            RelationType::Related => 0.7,
            RelationType::SimilarTo => 0.6,
            RelationType::PartOf => 0.5,
            RelationType::Causes => 0.4,
            RelationType::Contradicts => -0.5,
            RelationType::Supersedes | RelationType::CoActivated => 0.5,
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "causes" => Ok(RelationType::Causes),
            "fixes" => Ok(RelationType::Fixes),
            "contradicts" => Ok(RelationType::Contradicts),
            "supports" => Ok(RelationType::Supports),
            "follows" => Ok(RelationType::Follows),
            "related" => Ok(RelationType::Related),
            "supersedes" => Ok(RelationType::Supersedes),
            "similar_to" => Ok(RelationType::SimilarTo),
            "part_of" => Ok(RelationType::PartOf),
            "co_activated" => Ok(RelationType::CoActivated),
            other => Err(format!("unknown relation type: {other}")),
        }
    }
}

/// A denormalised relation as embedded on the source memory (spec §3).
/// The graph store mirrors the same information as a first-class edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedRelation {
    pub target_id: String,
    pub relation_type: RelationType,
    pub created_at: DateTime<Utc>,
}

/// A first-class, temporally-bounded relation edge (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl Relation {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>, relation_type: RelationType) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type,
            valid_from: Utc::now(),
            valid_to: None,
        }
    }

    /// "Related at T" (spec §4.4.7): edge must be valid at the given instant.
    pub fn valid_at(&self, t: DateTime<Utc>) -> bool {
        self.valid_from <= t && self.valid_to.is_none_or(|end| t < end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contradicts_is_negative_weight() {
        assert!(RelationType::Contradicts.expansion_weight() < 0.0);
    }

    #[test]
    fn relation_type_roundtrip() {
        for rt in [
            RelationType::Causes,
            RelationType::Fixes,
            RelationType::Contradicts,
            RelationType::Supports,
            RelationType::Follows,
            RelationType::Related,
            RelationType::Supersedes,
            RelationType::SimilarTo,
            RelationType::PartOf,
            RelationType::CoActivated,
        ] {
            assert_eq!(rt.as_str().parse::<RelationType>().unwrap(), rt);
        }
    }

    #[test]
    fn temporal_validity_window() {
        let mut rel = Relation::new("a", "b", RelationType::Related);
        let t0 = rel.valid_from;
        assert!(rel.valid_at(t0));
        rel.valid_to = Some(t0 + chrono::Duration::days(1));
        assert!(rel.valid_at(t0 + chrono::Duration::hours(12)));
        assert!(!rel.valid_at(t0 + chrono::Duration::days(2)));
    }
}
