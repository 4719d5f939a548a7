//! Crate-wide error type (spec §7).

use crate::model::validation::ValidationWarning;

/// A structured validation/quality rejection (spec §7): the rule violated,
/// a suggestion, a worked example, and — for duplicates — the existing id
/// and similarity score.
#[derive(Debug, Clone)]
pub struct QualityReport {
    pub score: f64,
    pub warnings: Vec<ValidationWarning>,
    pub example: String,
    pub duplicate_hint: Option<DuplicateHint>,
}

#[derive(Debug, Clone)]
pub struct DuplicateHint {
    pub existing_id: String,
    pub similarity: f32,
}

/// Crate-wide error type. `#[non_exhaustive]` so new external-store failure
/// modes can be added without a semver break.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngramError {
    #[error("validation failed: {0:?}")]
    Validation(QualityReport),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("external store error: {0}")]
    External(String),

    #[error("job lock timeout: {0}")]
    LockTimeout(String),

    #[error("internal invariant violation: {0}")]
    Internal(String),

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngramError>;
