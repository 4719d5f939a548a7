//! Quality engine: seven-component score, trend tracking, and promotion
//! candidate evaluation (spec §4.7).

use chrono::{DateTime, Utc};

use crate::model::{Memory, MemoryState, MemoryTier, MemoryType, QualityComponents};

/// Trend direction of a memory's recent quality history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

/// Trend plus a confidence derived from how much history backs it.
#[derive(Debug, Clone, Copy)]
pub struct TrendReport {
    pub trend: Trend,
    pub confidence: f64,
}

/// Epsilon band around zero treated as "no trend" (spec §4.7).
const TREND_EPSILON: f64 = 0.05;

fn content_richness(tags_count: usize, content_len: usize, memory_type: MemoryType, memory: &Memory) -> f64 {
    let tags = if tags_count >= 5 {
        1.0
    } else if tags_count >= 2 {
        0.2 + 0.16 * tags_count as f64
    } else {
        0.15 * tags_count as f64
    };

    let length = if content_len >= 500 {
        1.0
    } else if content_len >= 200 {
        0.8
    } else if content_len >= 100 {
        0.6
    } else if content_len >= 50 {
        0.4
    } else {
        (content_len as f64 / 125.0).max(0.1)
    };

    let has = |o: &Option<String>| o.as_ref().is_some_and(|s| !s.trim().is_empty());
    let type_bonus = match memory_type {
        MemoryType::Error => {
            (0.3 * has(&memory.error_message) as u8 as f64
                + 0.4 * has(&memory.solution) as u8 as f64
                + 0.2 * has(&memory.prevention) as u8 as f64
                + 0.1 * memory.resolved as u8 as f64)
                .min(1.0)
        }
        MemoryType::Decision => (0.3 + 0.5 * has(&memory.rationale) as u8 as f64).min(1.0),
        MemoryType::Pattern => (0.4 + 0.2 * (content_len >= 100) as u8 as f64).min(1.0),
        MemoryType::Learning => 0.3,
        MemoryType::Docs => 0.2,
        MemoryType::Context => 0.2,
    };

    0.25 * tags + 0.35 * length + 0.40 * type_bonus
}

fn access_frequency(access_count: u64) -> f64 {
    let n = access_count as f64;
    if access_count == 0 {
        0.1
    } else if access_count <= 3 {
        0.3 + 0.067 * n
    } else if access_count <= 10 {
        0.5 + (n - 3.0) / 28.0
    } else if access_count <= 30 {
        0.75 + (n - 10.0) / 133.0
    } else {
        (0.9 + (n - 30.0) / 200.0).min(1.0)
    }
}

fn maturity(age_days: i64) -> f64 {
    let age = age_days as f64;
    if age_days <= 1 {
        0.3
    } else if age_days <= 7 {
        0.3 + age / 14.0
    } else if age_days <= 30 {
        0.8 + (age - 7.0) / 115.0
    } else {
        1.0
    }
}

fn stability(edits: u32) -> f64 {
    if edits == 0 {
        1.0
    } else if edits <= 2 {
        0.85
    } else if edits <= 5 {
        0.7
    } else {
        (1.0 - 0.04 * edits as f64).max(0.4)
    }
}

fn relationship_density(relationship_count: usize) -> f64 {
    let n = relationship_count as f64;
    if relationship_count == 0 {
        0.3
    } else if relationship_count <= 3 {
        0.3 + 0.167 * n
    } else if relationship_count <= 10 {
        0.8 + (n - 3.0) / 35.0
    } else {
        1.0
    }
}

fn user_rating_normalized(rating: f64, count: u32) -> f64 {
    if count == 0 {
        0.5
    } else {
        (rating / 5.0) * (count as f64 / 3.0).min(1.0)
    }
}

fn tier_bonus(tier: MemoryTier) -> f64 {
    match tier {
        MemoryTier::Procedural => 0.05,
        MemoryTier::Semantic => 0.03,
        MemoryTier::Episodic => 0.0,
    }
}

/// Compute the seven-component breakdown for a memory at a given instant.
pub fn compute_components(memory: &Memory, now: DateTime<Utc>) -> QualityComponents {
    QualityComponents {
        content_richness: content_richness(
            memory.tags.len(),
            memory.content.chars().count(),
            memory.memory_type,
            memory,
        ),
        access_frequency: access_frequency(memory.access_count),
        maturity: maturity(memory.age_days(now)),
        stability: stability(memory.edit_count()),
        relationship_density: relationship_density(memory.relations.len()),
        user_rating_normalized: user_rating_normalized(memory.user_rating, memory.user_rating_count),
        tier_bonus: tier_bonus(memory.memory_tier),
    }
}

/// Combine the seven components into the single `quality_score` (spec §4.7).
pub fn combine(components: &QualityComponents) -> f64 {
    let score = 0.30 * components.content_richness
        + 0.25 * components.access_frequency
        + 0.15 * components.maturity
        + 0.10 * components.stability
        + 0.10 * components.relationship_density
        + 0.10 * components.user_rating_normalized
        + components.tier_bonus;
    score.clamp(0.0, 1.0)
}

/// Compute and return `(score, components)`; does not mutate `memory`.
pub fn score(memory: &Memory, now: DateTime<Utc>) -> (f64, QualityComponents) {
    let components = compute_components(memory, now);
    (combine(&components), components)
}

/// Trend of a memory's quality history: sign of `last - first` within an
/// epsilon band, confidence scaling with history length (spec §4.7).
pub fn trend(history: &[crate::model::QualitySnapshot]) -> TrendReport {
    if history.len() < 2 {
        return TrendReport { trend: Trend::Stable, confidence: history.len() as f64 / 10.0 };
    }
    let delta = history.last().unwrap().score - history.first().unwrap().score;
    let trend = if delta > TREND_EPSILON {
        Trend::Rising
    } else if delta < -TREND_EPSILON {
        Trend::Falling
    } else {
        Trend::Stable
    };
    TrendReport { trend, confidence: (history.len() as f64 / 10.0).min(1.0) }
}

/// A candidate lifecycle promotion surfaced by [`promotion_candidates`].
#[derive(Debug, Clone)]
pub struct PromotionCandidate {
    pub memory_id: String,
    pub from: MemoryState,
    pub to: MemoryState,
}

/// Default minimum age, in days, before a memory is even considered (spec §4.7).
pub const DEFAULT_MIN_AGE_DAYS: i64 = 0;
const DEFAULT_MIN_QUALITY: f64 = 0.75;

/// Walk non-archived memories old enough to be considered and emit
/// promotion candidates per the quality-driven rules (spec §4.7). This is
/// narrower than the full lifecycle evaluation (§4.6) — it only covers the
/// two quality-gated promotions; state-machine evaluation covers the rest.
pub fn promotion_candidates<'a>(
    memories: impl Iterator<Item = &'a Memory>,
    now: DateTime<Utc>,
    min_quality: Option<f64>,
) -> Vec<PromotionCandidate> {
    let min_quality = min_quality.unwrap_or(DEFAULT_MIN_QUALITY);
    memories
        .filter(|m| !m.archived)
        .filter_map(|m| {
            let age = m.age_days(now);
            match m.state {
                MemoryState::Episodic if m.quality_score >= min_quality && age >= 7 => Some(PromotionCandidate {
                    memory_id: m.id.clone(),
                    from: MemoryState::Episodic,
                    to: MemoryState::Semantic,
                }),
                MemoryState::Semantic if m.quality_score >= 0.9 && age >= 30 => Some(PromotionCandidate {
                    memory_id: m.id.clone(),
                    from: MemoryState::Semantic,
                    to: MemoryState::Procedural,
                }),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemoryTier, MemoryType, QualitySnapshot};
    use std::collections::HashSet;

    fn base_memory() -> Memory {
        let mut m = Memory::new(MemoryType::Error, "docker build fails with ENOSPC on CI when building images");
        m.tags = HashSet::from(["docker".into(), "ci".into()]);
        m.error_message = Some("ENOSPC".into());
        m.solution = Some("prune images before each build to free disk".into());
        m.resolved = true;
        m
    }

    #[test]
    fn new_memory_never_scores_default_half() {
        let m = base_memory();
        let (s, _) = score(&m, Utc::now());
        assert_ne!(s, 0.5);
    }

    #[test]
    fn tier_bonus_matches_spec_table() {
        assert_eq!(tier_bonus(MemoryTier::Procedural), 0.05);
        assert_eq!(tier_bonus(MemoryTier::Semantic), 0.03);
        assert_eq!(tier_bonus(MemoryTier::Episodic), 0.0);
    }

    #[test]
    fn scenario_c_promotion_raises_quality_by_tier_bonus() {
        let mut m = base_memory();
        m.quality_score = 0.8;
        m.created_at = Utc::now() - chrono::Duration::days(8);
        let candidates = promotion_candidates(std::iter::once(&m), Utc::now(), None);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].to, MemoryState::Semantic);

        let before = compute_components(&m, Utc::now()).tier_bonus;
        m.memory_tier = MemoryTier::Semantic;
        let after = compute_components(&m, Utc::now()).tier_bonus;
        assert!((after - before - 0.03).abs() < 1e-9);
    }

    #[test]
    fn trend_detects_rising_with_confidence() {
        let now = Utc::now();
        let history = vec![
            QualitySnapshot { score: 0.4, at: now - chrono::Duration::days(3) },
            QualitySnapshot { score: 0.5, at: now - chrono::Duration::days(2) },
            QualitySnapshot { score: 0.6, at: now },
        ];
        let report = trend(&history);
        assert_eq!(report.trend, Trend::Rising);
        assert!((report.confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn trend_within_epsilon_is_stable() {
        let now = Utc::now();
        let history = vec![
            QualitySnapshot { score: 0.50, at: now - chrono::Duration::days(1) },
            QualitySnapshot { score: 0.52, at: now },
        ];
        assert_eq!(trend(&history).trend, Trend::Stable);
    }

    #[test]
    fn archived_memories_are_not_promotion_candidates() {
        let mut m = base_memory();
        m.archived = true;
        m.quality_score = 0.95;
        m.created_at = Utc::now() - chrono::Duration::days(40);
        assert!(promotion_candidates(std::iter::once(&m), Utc::now(), None).is_empty());
    }
}
