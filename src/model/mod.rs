//! Data model: Memory, Relation, Version snapshot, Audit entry, lifecycle state.

mod audit;
mod memory;
mod relation;
mod state;
mod version;
pub mod validation;

pub use audit::{AuditAction, AuditEntry};
pub use memory::{Memory, MemoryType, QualityComponents, QualitySnapshot, UserFeedback};
pub use relation::{EmbeddedRelation, Relation, RelationType};
pub use state::{MemoryState, MemoryTier, StateTransitionRecord};
pub use version::{ChangeType, VersionSnapshot};
