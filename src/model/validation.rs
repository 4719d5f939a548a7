//! Content/tag invariants and the quality-affecting field set (spec §3).

use super::memory::{Memory, MemoryType};

/// Minimum content length, in chars (spec §3).
pub const MIN_CONTENT_LEN: usize = 30;
/// Minimum word count (spec §3).
pub const MIN_WORD_COUNT: usize = 5;
/// Minimum number of non-generic tags (spec §3).
pub const MIN_TAGS: usize = 2;

/// Tags too generic to count toward the minimum-tag invariant.
const GENERIC_TAGS: &[&str] = &["misc", "other", "general", "todo", "note", "tag", "stuff"];

/// Literal placeholder content rejected outright.
const PLACEHOLDER_CONTENTS: &[&str] = &[
    "todo",
    "tbd",
    "placeholder",
    "fixme",
    "lorem ipsum",
    "test test test",
    "...",
    "n/a",
];

/// One violated validation rule, surfaced as a structured rejection (spec §7).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub rule: &'static str,
    pub message: String,
    pub suggestion: String,
}

fn is_placeholder(content: &str) -> bool {
    let normalized = content.trim().to_lowercase();
    PLACEHOLDER_CONTENTS.iter().any(|p| normalized == *p)
}

fn word_count(content: &str) -> usize {
    content.split_whitespace().count()
}

fn non_generic_tag_count(tags: &std::collections::HashSet<String>) -> usize {
    tags.iter()
        .filter(|t| !GENERIC_TAGS.contains(&t.to_lowercase().as_str()))
        .count()
}

/// Validate the structural invariants of a memory, independent of type.
/// Returns every violated rule (not just the first) so the caller can build
/// the full structured rejection report.
pub fn validate_common(content: &str, tags: &std::collections::HashSet<String>) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    if content.chars().count() < MIN_CONTENT_LEN {
        warnings.push(ValidationWarning {
            rule: "content_min_length",
            message: format!(
                "content is {} chars, below the minimum of {MIN_CONTENT_LEN}",
                content.chars().count()
            ),
            suggestion: "add more detail: what happened, why it matters, what to do about it".into(),
        });
    }

    if word_count(content) < MIN_WORD_COUNT {
        warnings.push(ValidationWarning {
            rule: "content_min_words",
            message: format!("content has {} words, below the minimum of {MIN_WORD_COUNT}", word_count(content)),
            suggestion: "write at least one complete sentence".into(),
        });
    }

    if is_placeholder(content) {
        warnings.push(ValidationWarning {
            rule: "content_not_placeholder",
            message: "content looks like a placeholder, not real knowledge".into(),
            suggestion: "replace with the actual content to remember".into(),
        });
    }

    if non_generic_tag_count(tags) < MIN_TAGS {
        warnings.push(ValidationWarning {
            rule: "tags_min_count",
            message: format!(
                "only {} non-generic tag(s); at least {MIN_TAGS} required",
                non_generic_tag_count(tags)
            ),
            suggestion: "add specific tags describing the technology, project, or topic".into(),
        });
    }

    warnings
}

/// Type-specific required-field invariants (spec §3).
pub fn validate_type_specific(
    memory_type: MemoryType,
    solution: &Option<String>,
    prevention: &Option<String>,
    rationale: &Option<String>,
) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    match memory_type {
        MemoryType::Error => {
            if solution.as_ref().is_none_or(|s| s.trim().is_empty())
                && prevention.as_ref().is_none_or(|p| p.trim().is_empty())
            {
                warnings.push(ValidationWarning {
                    rule: "error_requires_solution_or_prevention",
                    message: "an error memory needs at least a solution or a prevention note".into(),
                    suggestion: "describe how it was fixed, or how to avoid it next time".into(),
                });
            }
        }
        MemoryType::Decision => {
            if rationale.as_ref().is_none_or(|r| r.trim().is_empty()) {
                warnings.push(ValidationWarning {
                    rule: "decision_requires_rationale",
                    message: "a decision memory needs a rationale".into(),
                    suggestion: "explain why this decision was made".into(),
                });
            }
        }
        MemoryType::Pattern | MemoryType::Learning | MemoryType::Docs | MemoryType::Context => {}
    }
    warnings
}

/// `resolved ⇔ solution is set` (spec §3 ERROR invariant).
pub fn resolved_matches_solution(resolved: bool, solution: &Option<String>) -> bool {
    resolved == solution.as_ref().is_some_and(|s| !s.trim().is_empty())
}

/// `validity_start <= validity_end` when both set (spec §3).
pub fn validity_window_ok(start: chrono::DateTime<chrono::Utc>, end: Option<chrono::DateTime<chrono::Utc>>) -> bool {
    end.is_none_or(|e| start <= e)
}

/// The set of fields whose mutation must trigger a quality recomputation
/// (spec §3 invariants, §4.2). Modeled as flags on a patch description rather
/// than string-literal set intersection (Design Note §9).
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityAffectingFields {
    pub content: bool,
    pub tags: bool,
    pub importance: bool,
    pub pinned: bool,
    pub resolved: bool,
    pub solution: bool,
    pub prevention: bool,
    pub rationale: bool,
    pub alternatives: bool,
    pub decision: bool,
    pub error_message: bool,
    pub context: bool,
    pub state: bool,
    pub relations: bool,
    pub access_count: bool,
    pub memory_strength: bool,
    pub user_rating: bool,
    pub user_rating_count: bool,
    pub user_feedback: bool,
    pub archived: bool,
}

impl QualityAffectingFields {
    /// Derive from a JSON merge patch by key presence (camelCase wire names,
    /// matching `Memory`'s `#[serde(rename_all = "camelCase")]`).
    pub fn from_patch(patch: &serde_json::Value) -> Self {
        let has = |key: &str| patch.as_object().is_some_and(|obj| obj.contains_key(key));
        Self {
            content: has("content"),
            tags: has("tags"),
            importance: has("importanceScore"),
            pinned: has("pinned"),
            resolved: has("resolved"),
            solution: has("solution"),
            prevention: has("prevention"),
            rationale: has("rationale"),
            alternatives: has("alternatives"),
            decision: has("decision"),
            error_message: has("errorMessage"),
            context: has("context"),
            state: has("state"),
            relations: has("relations"),
            access_count: has("accessCount"),
            memory_strength: has("memoryStrength"),
            user_rating: has("userRating"),
            user_rating_count: has("userRatingCount"),
            user_feedback: has("userFeedback"),
            archived: has("archived"),
        }
    }

    /// True if any flag is set — the patch touches at least one
    /// quality-affecting field.
    pub fn any(&self) -> bool {
        self.content
            || self.tags
            || self.importance
            || self.pinned
            || self.resolved
            || self.solution
            || self.prevention
            || self.rationale
            || self.alternatives
            || self.decision
            || self.error_message
            || self.context
            || self.state
            || self.relations
            || self.access_count
            || self.memory_strength
            || self.user_rating
            || self.user_rating_count
            || self.user_feedback
            || self.archived
    }
}

/// Convenience: run every structural + type-specific check against a fully
/// constructed [`Memory`] (used by tests and by the restore path's
/// post-sanitisation verification — never required before storage, since the
/// write pipeline enforces these before a memory is ever built).
pub fn validate_memory(memory: &Memory) -> Vec<ValidationWarning> {
    let mut warnings = validate_common(&memory.content, &memory.tags);
    warnings.extend(validate_type_specific(
        memory.memory_type,
        &memory.solution,
        &memory.prevention,
        &memory.rationale,
    ));
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn short_content_is_rejected() {
        let tags: HashSet<String> = ["a".into(), "b".into()].into();
        let warnings = validate_common("too short", &tags);
        assert!(warnings.iter().any(|w| w.rule == "content_min_length"));
    }

    #[test]
    fn placeholder_content_is_rejected() {
        let tags: HashSet<String> = ["a".into(), "b".into()].into();
        let warnings = validate_common("TODO", &tags);
        assert!(warnings.iter().any(|w| w.rule == "content_not_placeholder"));
    }

    #[test]
    fn error_without_solution_or_prevention_is_rejected() {
        let warnings = validate_type_specific(MemoryType::Error, &None, &None, &None);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn error_with_prevention_only_is_accepted() {
        let warnings = validate_type_specific(
            MemoryType::Error,
            &None,
            &Some("avoid by validating input earlier".into()),
            &None,
        );
        assert!(warnings.is_empty());
    }

    #[test]
    fn decision_requires_rationale() {
        let warnings = validate_type_specific(MemoryType::Decision, &None, &None, &None);
        assert_eq!(warnings.len(), 1);
        let warnings_ok = validate_type_specific(MemoryType::Decision, &None, &None, &Some("because".into()));
        assert!(warnings_ok.is_empty());
    }

    #[test]
    fn resolved_must_match_solution_presence() {
        assert!(resolved_matches_solution(true, &Some("fix".into())));
        assert!(!resolved_matches_solution(true, &None));
        assert!(resolved_matches_solution(false, &None));
    }
}
