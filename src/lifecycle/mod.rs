//! Lifecycle state machine: per-state evaluation rules and transition
//! application (spec §4.6).

use chrono::{DateTime, Utc};

use crate::model::state::StateTransitionRecord;
use crate::model::{Memory, MemoryState, MemoryTier};

/// A state transition this memory is due for, with the reason that triggered it.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub to: MemoryState,
    pub reason: &'static str,
}

/// Evaluate a single memory against the per-state rules (spec §4.6). Returns
/// `None` if no transition is due. Rules within a state are checked in
/// listed order; the first match wins.
pub fn evaluate(memory: &Memory, now: DateTime<Utc>) -> Option<Evaluation> {
    let age = memory.age_days(now);
    let time_in_state = memory.time_in_state_hours(now) / 24;
    let quality = memory.quality_score;

    match memory.state {
        MemoryState::Episodic => {
            if age >= 7 && quality >= 0.75 {
                Some(Evaluation { to: MemoryState::Semantic, reason: "age >= 7d and quality >= 0.75" })
            } else if age >= 30 && quality < 0.2 {
                Some(Evaluation { to: MemoryState::Archived, reason: "age >= 30d and quality < 0.2" })
            } else if memory.time_in_state_hours(now) >= 48 && memory.access_count < 3 {
                Some(Evaluation { to: MemoryState::Staging, reason: "age >= 48h and access_count < 3" })
            } else {
                None
            }
        }
        MemoryState::Staging => {
            if memory.last_accessed > memory.state_changed_at {
                Some(Evaluation { to: MemoryState::Episodic, reason: "rekindled: accessed since entering staging" })
            } else if time_in_state >= 7 && quality >= 0.5 {
                Some(Evaluation { to: MemoryState::Semantic, reason: "time_in_state >= 7d and quality >= 0.5" })
            } else if time_in_state >= 30 && quality < 0.3 {
                Some(Evaluation { to: MemoryState::Archived, reason: "time_in_state >= 30d and quality < 0.3" })
            } else {
                None
            }
        }
        MemoryState::Semantic => {
            if time_in_state >= 30 && quality >= 0.9 && memory.edit_count() <= 2 {
                Some(Evaluation { to: MemoryState::Procedural, reason: "time_in_state >= 30d, quality >= 0.9, edits <= 2" })
            } else if time_in_state >= 60 && quality < 0.2 {
                Some(Evaluation { to: MemoryState::Archived, reason: "time_in_state >= 60d and quality < 0.2" })
            } else {
                None
            }
        }
        MemoryState::Procedural => {
            if time_in_state >= 180 && quality < 0.1 {
                Some(Evaluation { to: MemoryState::Archived, reason: "time_in_state >= 180d and quality < 0.1" })
            } else {
                None
            }
        }
        // Archived needs the configured retention window; see `evaluate_archived`.
        MemoryState::Archived => None,
        MemoryState::Purged => None,
    }
}

/// Archived-state evaluation needs the configured retention window, unlike
/// the other states (spec §4.6), so it is a separate entry point.
pub fn evaluate_archived(memory: &Memory, now: DateTime<Utc>, purge_retention_days: i64) -> Option<Evaluation> {
    if memory.state != MemoryState::Archived {
        return None;
    }
    let time_in_state_days = memory.time_in_state_hours(now) / 24;
    if time_in_state_days >= purge_retention_days {
        Some(Evaluation { to: MemoryState::Purged, reason: "time_in_state >= purge_retention_days" })
    } else {
        None
    }
}

/// Error applying an illegal transition (spec §3 invariant: only legal
/// transitions may be applied).
#[derive(Debug, Clone, thiserror::Error)]
#[error("illegal lifecycle transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: MemoryState,
    pub to: MemoryState,
}

/// Apply a validated transition in place: append to `state_history`, bump
/// `state_changed_at`, mirror the tier, and (for ARCHIVED) set `archived`
/// and `archived_at` (spec §4.6). Quality recomputation is the caller's
/// responsibility, run through the payload-update wrapper so the tier bonus
/// lands in the same recompute (spec §4.6 "goes through the payload-update
/// wrapper").
pub fn apply_transition(
    memory: &mut Memory,
    to: MemoryState,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(), IllegalTransition> {
    if !memory.state.can_transition_to(to) {
        return Err(IllegalTransition { from: memory.state, to });
    }

    memory.state_history.push(StateTransitionRecord { from: memory.state, to, at: now, reason: reason.to_string() });
    memory.state = to;
    memory.state_changed_at = now;

    if let Some(tier) = MemoryTier::from_state(to) {
        memory.memory_tier = tier;
    }

    match to {
        MemoryState::Archived => {
            memory.archived = true;
            memory.archived_at = Some(now);
        }
        MemoryState::Episodic if memory.archived => {
            memory.archived = false;
            memory.archived_at = None;
        }
        _ => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryType;

    fn fresh() -> Memory {
        Memory::new(MemoryType::Pattern, "content long enough to pass all the validation rules cleanly")
    }

    #[test]
    fn scenario_c_episodic_to_semantic_promotion() {
        let mut m = fresh();
        m.created_at = Utc::now() - chrono::Duration::days(8);
        m.quality_score = 0.8;
        let eval = evaluate(&m, Utc::now()).expect("should be due for promotion");
        assert_eq!(eval.to, MemoryState::Semantic);
        apply_transition(&mut m, eval.to, eval.reason, Utc::now()).unwrap();
        assert_eq!(m.state, MemoryState::Semantic);
        assert_eq!(m.memory_tier, MemoryTier::Semantic);
        assert_eq!(m.state_history.len(), 1);
    }

    #[test]
    fn stale_low_quality_episodic_archives() {
        let mut m = fresh();
        m.created_at = Utc::now() - chrono::Duration::days(31);
        m.quality_score = 0.1;
        let eval = evaluate(&m, Utc::now()).unwrap();
        assert_eq!(eval.to, MemoryState::Archived);
        apply_transition(&mut m, eval.to, eval.reason, Utc::now()).unwrap();
        assert!(m.archived);
        assert!(m.archived_at.is_some());
    }

    #[test]
    fn rekindled_staging_returns_to_episodic() {
        let mut m = fresh();
        m.state = MemoryState::Staging;
        m.state_changed_at = Utc::now() - chrono::Duration::days(1);
        m.last_accessed = Utc::now();
        let eval = evaluate(&m, Utc::now()).unwrap();
        assert_eq!(eval.to, MemoryState::Episodic);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut m = fresh();
        let err = apply_transition(&mut m, MemoryState::Procedural, "skip ahead", Utc::now());
        assert!(err.is_err());
        assert_eq!(m.state, MemoryState::Episodic);
    }

    #[test]
    fn archived_past_retention_purges() {
        let mut m = fresh();
        m.state = MemoryState::Archived;
        m.state_changed_at = Utc::now() - chrono::Duration::days(91);
        let eval = evaluate_archived(&m, Utc::now(), 90).unwrap();
        assert_eq!(eval.to, MemoryState::Purged);
    }

    #[test]
    fn archived_within_retention_stays() {
        let mut m = fresh();
        m.state = MemoryState::Archived;
        m.state_changed_at = Utc::now() - chrono::Duration::days(10);
        assert!(evaluate_archived(&m, Utc::now(), 90).is_none());
    }
}
