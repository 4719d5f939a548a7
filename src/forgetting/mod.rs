//! Forgetting engine: differential exponential decay of memory strength,
//! with reinforcement on access (spec §4.8).

use chrono::{DateTime, Utc};

use crate::model::{Memory, MemoryTier};

const BASE_DECAY_RATE: f64 = 0.005;
const MIN_DECAY_RATE: f64 = 0.001;
const MAX_DECAY_RATE: f64 = 0.01;

/// Default boost applied on access-based reinforcement (spec §4.8).
pub const DEFAULT_REINFORCEMENT_BOOST: f64 = 0.2;

fn tier_factor(tier: MemoryTier) -> f64 {
    match tier {
        MemoryTier::Procedural => 0.3,
        MemoryTier::Semantic => 0.6,
        MemoryTier::Episodic => 1.0,
    }
}

/// Per-memory decay rate: `base × importance_factor × access_factor × tier_factor`,
/// clamped to `[0.001, 0.01]` (spec §4.8).
pub fn decay_rate(importance_score: f64, access_count: u64, tier: MemoryTier) -> f64 {
    let importance_factor = 1.0 - 0.7 * importance_score;
    let access_factor = 1.0 - 0.5 * (access_count as f64 / 50.0).min(1.0);
    let rate = BASE_DECAY_RATE * importance_factor * access_factor * tier_factor(tier);
    rate.clamp(MIN_DECAY_RATE, MAX_DECAY_RATE)
}

/// What a strength update decided for a memory, so the caller can drive the
/// state/archive transitions without re-deriving thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecayOutcome {
    Keep,
    Archive,
    Purge,
}

/// Apply one strength-decay tick (spec §4.8 "strength update"). Pinned
/// memories are left untouched at strength 1.0.
///
/// Returns the new strength and the post-update disposition.
pub fn apply_decay(
    memory: &Memory,
    now: DateTime<Utc>,
    archive_threshold: f64,
    purge_threshold: f64,
    purge_enabled: bool,
) -> (f64, DecayOutcome) {
    if memory.pinned {
        return (1.0, DecayOutcome::Keep);
    }

    let elapsed_hours = (now - memory.last_decay_update).num_seconds() as f64 / 3600.0;
    let rate = decay_rate(memory.importance_score, memory.access_count, memory.memory_tier);
    let strength = (memory.memory_strength * (-rate * elapsed_hours.max(0.0)).exp()).clamp(0.0, 1.0);

    let outcome = if purge_enabled && strength < purge_threshold {
        DecayOutcome::Purge
    } else if strength < archive_threshold {
        DecayOutcome::Archive
    } else {
        DecayOutcome::Keep
    };

    (strength, outcome)
}

/// Reinforce on access: `strength' = min(1, strength + boost)`. Pinned
/// memories are already at 1.0 and are skipped (spec §4.8).
pub fn reinforce(memory: &Memory, boost: f64) -> f64 {
    if memory.pinned {
        return 1.0;
    }
    (memory.memory_strength + boost).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryType;

    fn memory_with_strength(strength: f64) -> Memory {
        let mut m = Memory::new(MemoryType::Learning, "content long enough to pass the validation rules easily");
        m.memory_strength = strength;
        m.last_decay_update = Utc::now() - chrono::Duration::hours(100);
        m
    }

    #[test]
    fn decay_rate_is_clamped_to_spec_bounds() {
        let low = decay_rate(1.0, 1000, MemoryTier::Procedural);
        assert!(low >= MIN_DECAY_RATE);
        let high = decay_rate(0.0, 0, MemoryTier::Episodic);
        assert!(high <= MAX_DECAY_RATE);
    }

    #[test]
    fn pinned_memories_never_decay() {
        let mut m = memory_with_strength(0.5);
        m.pinned = true;
        let (strength, outcome) = apply_decay(&m, Utc::now(), 0.15, 0.05, false);
        assert_eq!(strength, 1.0);
        assert_eq!(outcome, DecayOutcome::Keep);
    }

    #[test]
    fn weak_memory_without_purge_enabled_archives_not_purges() {
        let m = memory_with_strength(0.02);
        let (strength, outcome) = apply_decay(&m, Utc::now(), 0.15, 0.05, false);
        assert!(strength < 0.15);
        assert_eq!(outcome, DecayOutcome::Archive);
    }

    #[test]
    fn weak_memory_with_purge_enabled_purges() {
        let m = memory_with_strength(0.02);
        let (_, outcome) = apply_decay(&m, Utc::now(), 0.15, 0.05, true);
        assert_eq!(outcome, DecayOutcome::Purge);
    }

    #[test]
    fn strength_stays_in_unit_interval() {
        let m = memory_with_strength(1.0);
        let (strength, _) = apply_decay(&m, Utc::now() + chrono::Duration::days(3650), 0.15, 0.05, false);
        assert!((0.0..=1.0).contains(&strength));
    }

    #[test]
    fn reinforcement_boosts_but_caps_at_one() {
        let m = memory_with_strength(0.9);
        assert!((reinforce(&m, DEFAULT_REINFORCEMENT_BOOST) - 1.0).abs() < 1e-9);

        let m2 = memory_with_strength(0.5);
        assert!((reinforce(&m2, DEFAULT_REINFORCEMENT_BOOST) - 0.7).abs() < 1e-9);
    }
}
