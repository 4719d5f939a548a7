//! Storage adapters: vector store (dense+sparse vectors, typed payload) and
//! graph store (nodes + typed, temporally-bounded edges) — spec §4.1, §6.

pub(crate) mod migrations;
mod sqlite_graph;
mod sqlite_vector;

pub use sqlite_graph::SqliteGraphStore;
pub use sqlite_vector::SqliteVectorStore;

use crate::embeddings::SparseVector;
use crate::error::Result;
use crate::model::{Memory, MemoryState, MemoryTier, MemoryType, Relation, RelationType};
use chrono::{DateTime, Utc};

/// Filter applied to scroll/search operations (spec §4.1). `archived=true`
/// is excluded unless `include_archived` is explicitly set (spec §4.1, §6).
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub memory_type: Option<MemoryType>,
    pub project: Option<String>,
    pub tags: Vec<String>,
    pub resolved: Option<bool>,
    pub memory_tier: Option<MemoryTier>,
    pub state: Option<MemoryState>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub include_archived: bool,
}

impl Filter {
    pub fn matches(&self, memory: &Memory) -> bool {
        if !self.include_archived && memory.archived {
            return false;
        }
        if let Some(t) = self.memory_type {
            if memory.memory_type != t {
                return false;
            }
        }
        if let Some(project) = &self.project {
            if memory.project.as_deref() != Some(project.as_str()) {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| memory.tags.contains(t)) {
            return false;
        }
        if let Some(resolved) = self.resolved {
            if memory.resolved != resolved {
                return false;
            }
        }
        if let Some(tier) = self.memory_tier {
            if memory.memory_tier != tier {
                return false;
            }
        }
        if let Some(state) = self.state {
            if memory.state != state {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if memory.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if memory.created_at > before {
                return false;
            }
        }
        true
    }
}

/// A scored search hit.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: f32,
}

/// Cursor page returned by [`VectorStore::scroll`].
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub memories: Vec<Memory>,
    pub next_offset: Option<usize>,
}

/// Vectors attached to a memory at upsert time (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct Vectors {
    pub dense: Vec<f32>,
    pub sparse: Option<SparseVector>,
}

/// Persists memories with named vectors and a typed payload; provides
/// filtered retrieval (spec §4.1).
pub trait VectorStore: Send + Sync {
    /// Idempotent collection/schema creation.
    fn create_collection(&self) -> Result<()>;

    fn upsert(&self, memory: &Memory, vectors: &Vectors) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<Memory>>;

    fn scroll(&self, filter: &Filter, limit: usize, offset: usize) -> Result<Page>;

    fn search_dense(&self, query: &[f32], filter: &Filter, limit: usize, min_score: f32) -> Result<Vec<ScoredMemory>>;

    fn search_sparse(
        &self,
        query: &SparseVector,
        filter: &Filter,
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredMemory>>;

    /// Partial payload mutation — the storage-layer primitive the
    /// payload-update wrapper (§4.2) builds on.
    fn set_payload(&self, id: &str, memory: &Memory) -> Result<()>;

    fn delete(&self, ids: &[String]) -> Result<()>;

    fn count(&self, filter: &Filter) -> Result<usize>;
}

/// Stores memory nodes and typed, temporally-bounded relationships;
/// traverses up to N hops (spec §4.1, §6).
pub trait GraphStore: Send + Sync {
    fn create_node(&self, memory: &Memory) -> Result<()>;

    fn upsert_edge(&self, relation: &Relation) -> Result<()>;

    /// Neighbours up to `max_hops` away, each paired with the edge type and
    /// hop depth at which they were reached (spec §4.4.5).
    fn neighbors(&self, id: &str, max_hops: u32) -> Result<Vec<(String, RelationType, u32)>>;

    /// Edges valid at a specific instant (spec §4.4.7 "related at T").
    fn neighbors_at(&self, id: &str, at: DateTime<Utc>, max_hops: u32) -> Result<Vec<(String, RelationType, u32)>>;

    fn delete_node(&self, id: &str) -> Result<()>;
}
