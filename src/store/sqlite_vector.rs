//! SQLite-backed [`VectorStore`]. Dense similarity search uses USearch's
//! HNSW index when the `vector-search` feature is enabled, falling back to
//! a brute-force scan otherwise — both produce the same ranking semantics,
//! the index only changes the search's asymptotic cost (spec §4.1, §6).

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::embeddings::{cosine_similarity, SparseVector};
use crate::error::{EngramError, Result};
use crate::model::Memory;

use super::{Filter, Page, ScoredMemory, VectorStore, Vectors};

#[cfg(feature = "vector-search")]
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )
}

fn encode_f32_vec(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

fn encode_u32_vec(v: &[u32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_u32_vec(bytes: &[u8]) -> Vec<u32> {
    bytes.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

#[cfg(feature = "vector-search")]
struct AnnIndex {
    index: Index,
    key_to_id: std::collections::HashMap<String, u64>,
    next_id: u64,
}

#[cfg(feature = "vector-search")]
impl AnnIndex {
    fn new(dimensions: usize) -> Result<Self> {
        // INT8 scalar quantization (spec §6); the index already lives fully
        // in RAM by construction, matching the quantized/always-resident
        // collection config described for the Qdrant-compatible store.
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::I8,
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
            multi: false,
        };
        let index = Index::new(&options).map_err(|e| EngramError::External(e.to_string()))?;
        index.reserve(16).map_err(|e| EngramError::External(e.to_string()))?;
        Ok(Self { index, key_to_id: std::collections::HashMap::new(), next_id: 0 })
    }

    fn upsert(&mut self, key: &str, vector: &[f32]) -> Result<()> {
        if let Some(&id) = self.key_to_id.get(key) {
            let _ = self.index.remove(id);
        }
        if self.index.size() >= self.index.capacity() {
            let new_capacity = std::cmp::max(self.index.capacity() * 2, 16);
            self.index.reserve(new_capacity).map_err(|e| EngramError::External(e.to_string()))?;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.index.add(id, vector).map_err(|e| EngramError::External(e.to_string()))?;
        self.key_to_id.insert(key.to_string(), id);
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        if let Some(id) = self.key_to_id.remove(key) {
            let _ = self.index.remove(id);
        }
    }

    fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        if self.index.size() == 0 {
            return Ok(Vec::new());
        }
        let results = self.index.search(query, limit).map_err(|e| EngramError::External(e.to_string()))?;
        let id_to_key: std::collections::HashMap<u64, &String> =
            self.key_to_id.iter().map(|(k, v)| (*v, k)).collect();
        Ok(results
            .keys
            .iter()
            .zip(results.distances.iter())
            .filter_map(|(id, dist)| id_to_key.get(id).map(|k| ((*k).clone(), 1.0 - dist)))
            .collect())
    }
}

pub struct SqliteVectorStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    #[cfg(feature = "vector-search")]
    ann: Mutex<AnnIndex>,
}

impl SqliteVectorStore {
    pub fn open(path: &Path) -> Result<Self> {
        let writer = Connection::open(path)?;
        configure_connection(&writer)?;
        super::migrations::apply(&writer)?;
        let reader = Connection::open(path)?;
        configure_connection(&reader)?;

        #[cfg(feature = "vector-search")]
        let ann = Mutex::new(AnnIndex::new(crate::embeddings::DENSE_DIMENSIONS)?);

        let store = Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            #[cfg(feature = "vector-search")]
            ann,
        };

        #[cfg(feature = "vector-search")]
        store.rebuild_ann_index()?;

        Ok(store)
    }

    /// An in-memory database for tests. Both connections share the same
    /// named in-memory database via SQLite's shared-cache mode — a plain
    /// `:memory:` URI would give the writer and reader distinct, isolated
    /// databases.
    pub fn open_in_memory() -> Result<Self> {
        let uri = format!("file:engram-{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let flags = rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
            | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
            | rusqlite::OpenFlags::SQLITE_OPEN_URI;

        let writer = Connection::open_with_flags(&uri, flags)?;
        configure_connection(&writer)?;
        super::migrations::apply(&writer)?;
        let reader = Connection::open_with_flags(&uri, flags)?;
        configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            #[cfg(feature = "vector-search")]
            ann: Mutex::new(AnnIndex::new(crate::embeddings::DENSE_DIMENSIONS)?),
        })
    }

    #[cfg(feature = "vector-search")]
    fn rebuild_ann_index(&self) -> Result<()> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        let mut stmt = conn.prepare("SELECT memory_id, dense FROM memory_vectors")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((id, blob))
        })?;
        let mut ann = self.ann.lock().expect("ann lock poisoned");
        for row in rows {
            let (id, blob) = row?;
            ann.upsert(&id, &decode_f32_vec(&blob))?;
        }
        Ok(())
    }

    fn load_memory(conn: &Connection, id: &str) -> Result<Option<Memory>> {
        let payload: Option<String> = conn
            .query_row("SELECT payload FROM memories WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn scan_all(conn: &Connection) -> Result<Vec<Memory>> {
        let mut stmt = conn.prepare("SELECT payload FROM memories")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut memories = Vec::new();
        for row in rows {
            memories.push(serde_json::from_str(&row?)?);
        }
        Ok(memories)
    }

    fn load_vector(conn: &Connection, id: &str) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = conn
            .query_row("SELECT dense FROM memory_vectors WHERE memory_id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(blob.map(|b| decode_f32_vec(&b)))
    }

    fn load_sparse(conn: &Connection, id: &str) -> Result<Option<SparseVector>> {
        let row: Option<(Option<Vec<u8>>, Option<Vec<u8>>)> = conn
            .query_row(
                "SELECT sparse_indices, sparse_values FROM memory_vectors WHERE memory_id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.and_then(|(idx, val)| match (idx, val) {
            (Some(idx), Some(val)) => Some(SparseVector { indices: decode_u32_vec(&idx), values: decode_f32_vec(&val) }),
            _ => None,
        }))
    }
}

impl VectorStore for SqliteVectorStore {
    fn create_collection(&self) -> Result<()> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        super::migrations::apply(&conn)
    }

    fn upsert(&self, memory: &Memory, vectors: &Vectors) -> Result<()> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        let payload = serde_json::to_string(memory)?;

        conn.execute(
            "INSERT INTO memories (id, payload, memory_type, project, resolved, memory_tier, state, archived, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                payload=excluded.payload, memory_type=excluded.memory_type, project=excluded.project,
                resolved=excluded.resolved, memory_tier=excluded.memory_tier, state=excluded.state,
                archived=excluded.archived, updated_at=excluded.updated_at",
            params![
                memory.id,
                payload,
                memory.memory_type.as_str(),
                memory.project,
                memory.resolved,
                memory.memory_tier.as_str(),
                memory.state.as_str(),
                memory.archived,
                memory.created_at.to_rfc3339(),
                memory.updated_at.to_rfc3339(),
            ],
        )?;

        conn.execute("DELETE FROM memory_tags WHERE memory_id = ?1", params![memory.id])?;
        for tag in &memory.tags {
            conn.execute(
                "INSERT OR IGNORE INTO memory_tags (memory_id, tag) VALUES (?1, ?2)",
                params![memory.id, tag],
            )?;
        }

        let sparse_indices = vectors.sparse.as_ref().map(|s| encode_u32_vec(&s.indices));
        let sparse_values = vectors.sparse.as_ref().map(|s| encode_f32_vec(&s.values));
        conn.execute(
            "INSERT INTO memory_vectors (memory_id, dense, sparse_indices, sparse_values)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(memory_id) DO UPDATE SET dense=excluded.dense, sparse_indices=excluded.sparse_indices, sparse_values=excluded.sparse_values",
            params![memory.id, encode_f32_vec(&vectors.dense), sparse_indices, sparse_values],
        )?;

        #[cfg(feature = "vector-search")]
        {
            let mut ann = self.ann.lock().expect("ann lock poisoned");
            ann.upsert(&memory.id, &vectors.dense)?;
        }
        #[cfg(not(feature = "vector-search"))]
        let _ = &vectors.dense;

        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Memory>> {
        let conn = self.reader.lock().expect("reader lock poisoned");
        Self::load_memory(&conn, id)
    }

    fn scroll(&self, filter: &Filter, limit: usize, offset: usize) -> Result<Page> {
        let conn = self.reader.lock().expect("reader lock poisoned");
        let all = Self::scan_all(&conn)?;
        let mut matched: Vec<Memory> = all.into_iter().filter(|m| filter.matches(m)).collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matched.len();
        let page: Vec<Memory> = matched.drain(..).skip(offset).take(limit).collect();
        let next_offset = if offset + page.len() < total { Some(offset + page.len()) } else { None };
        Ok(Page { memories: page, next_offset })
    }

    fn search_dense(&self, query: &[f32], filter: &Filter, limit: usize, min_score: f32) -> Result<Vec<ScoredMemory>> {
        let conn = self.reader.lock().expect("reader lock poisoned");

        #[cfg(feature = "vector-search")]
        {
            let ann = self.ann.lock().expect("ann lock poisoned");
            // Oversample since the ANN index has no notion of the payload filter.
            let raw = ann.search(query, (limit * 4).max(limit))?;
            let mut results = Vec::new();
            for (id, score) in raw {
                if score < min_score {
                    continue;
                }
                if let Some(memory) = Self::load_memory(&conn, &id)? {
                    if filter.matches(&memory) {
                        results.push(ScoredMemory { memory, score });
                    }
                }
                if results.len() >= limit {
                    break;
                }
            }
            return Ok(results);
        }

        #[cfg(not(feature = "vector-search"))]
        {
            let all = Self::scan_all(&conn)?;
            let mut scored: Vec<ScoredMemory> = Vec::new();
            for memory in all.into_iter().filter(|m| filter.matches(m)) {
                if let Some(vec) = Self::load_vector(&conn, &memory.id)? {
                    let score = cosine_similarity(query, &vec);
                    if score >= min_score {
                        scored.push(ScoredMemory { memory, score });
                    }
                }
            }
            scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(limit);
            Ok(scored)
        }
    }

    fn search_sparse(
        &self,
        query: &SparseVector,
        filter: &Filter,
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredMemory>> {
        let conn = self.reader.lock().expect("reader lock poisoned");
        let all = Self::scan_all(&conn)?;
        let mut scored: Vec<ScoredMemory> = Vec::new();
        for memory in all.into_iter().filter(|m| filter.matches(m)) {
            if let Some(sparse) = Self::load_sparse(&conn, &memory.id)? {
                let score = query.dot(&sparse);
                if score >= min_score {
                    scored.push(ScoredMemory { memory, score });
                }
            }
        }
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    fn set_payload(&self, id: &str, memory: &Memory) -> Result<()> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        let payload = serde_json::to_string(memory)?;
        let changed = conn.execute(
            "UPDATE memories SET payload=?2, memory_type=?3, project=?4, resolved=?5, memory_tier=?6,
                state=?7, archived=?8, updated_at=?9 WHERE id=?1",
            params![
                id,
                payload,
                memory.memory_type.as_str(),
                memory.project,
                memory.resolved,
                memory.memory_tier.as_str(),
                memory.state.as_str(),
                memory.archived,
                memory.updated_at.to_rfc3339(),
            ],
        )?;
        if changed == 0 {
            return Err(EngramError::NotFound(id.to_string()));
        }
        conn.execute("DELETE FROM memory_tags WHERE memory_id = ?1", params![id])?;
        for tag in &memory.tags {
            conn.execute("INSERT OR IGNORE INTO memory_tags (memory_id, tag) VALUES (?1, ?2)", params![id, tag])?;
        }
        Ok(())
    }

    fn delete(&self, ids: &[String]) -> Result<()> {
        let conn = self.writer.lock().expect("writer lock poisoned");
        for id in ids {
            conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        }
        #[cfg(feature = "vector-search")]
        {
            let mut ann = self.ann.lock().expect("ann lock poisoned");
            for id in ids {
                ann.remove(id);
            }
        }
        Ok(())
    }

    fn count(&self, filter: &Filter) -> Result<usize> {
        let conn = self.reader.lock().expect("reader lock poisoned");
        Ok(Self::scan_all(&conn)?.into_iter().filter(|m| filter.matches(m)).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryType;

    fn sample(id_tag: &str) -> (Memory, Vectors) {
        let mut m = Memory::new(MemoryType::Learning, format!("content about {id_tag} that is long enough to pass validation"));
        m.tags.insert("rust".into());
        m.tags.insert("testing".into());
        let vectors = Vectors { dense: vec![0.1, 0.2, 0.3], sparse: None };
        (m, vectors)
    }

    #[test]
    fn upsert_then_get_roundtrips() {
        let store = SqliteVectorStore::open_in_memory().unwrap();
        let (m, v) = sample("alpha");
        store.upsert(&m, &v).unwrap();
        let fetched = store.get(&m.id).unwrap().unwrap();
        assert_eq!(fetched.id, m.id);
        assert_eq!(fetched.content, m.content);
    }

    #[test]
    fn scroll_excludes_archived_by_default() {
        let store = SqliteVectorStore::open_in_memory().unwrap();
        let (mut m, v) = sample("beta");
        m.archived = true;
        store.upsert(&m, &v).unwrap();
        let page = store.scroll(&Filter::default(), 10, 0).unwrap();
        assert!(page.memories.is_empty());
    }

    #[test]
    fn set_payload_on_missing_id_errors() {
        let store = SqliteVectorStore::open_in_memory().unwrap();
        let (m, _) = sample("gamma");
        let err = store.set_payload(&m.id, &m);
        assert!(err.is_err());
    }

    #[test]
    fn delete_removes_memory() {
        let store = SqliteVectorStore::open_in_memory().unwrap();
        let (m, v) = sample("delta");
        store.upsert(&m, &v).unwrap();
        store.delete(&[m.id.clone()]).unwrap();
        assert!(store.get(&m.id).unwrap().is_none());
    }
}
