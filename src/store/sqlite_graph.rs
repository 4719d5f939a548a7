//! SQLite-backed [`GraphStore`]: memory nodes and typed, temporally-bounded
//! edges, with bounded-depth breadth-first traversal (spec §4.1, §6).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;
use crate::model::{Memory, Relation, RelationType};

use super::GraphStore;

pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        super::migrations::apply(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::migrations::apply(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Breadth-first expansion, optionally bounded to edges valid at `at`.
    fn traverse(&self, id: &str, max_hops: u32, at: Option<DateTime<Utc>>) -> Result<Vec<(String, RelationType, u32)>> {
        let conn = self.conn.lock().expect("graph lock poisoned");
        let mut visited: HashSet<String> = HashSet::from([id.to_string()]);
        let mut frontier: VecDeque<(String, u32)> = VecDeque::from([(id.to_string(), 0)]);
        let mut results = Vec::new();

        while let Some((current, depth)) = frontier.pop_front() {
            if depth >= max_hops {
                continue;
            }
            let mut stmt = conn.prepare(
                "SELECT target_id, relation_type, valid_from, valid_to FROM graph_edges WHERE source_id = ?1",
            )?;
            let rows = stmt.query_map(params![current], |row| {
                let target: String = row.get(0)?;
                let rel_type: String = row.get(1)?;
                let valid_from: String = row.get(2)?;
                let valid_to: Option<String> = row.get(3)?;
                Ok((target, rel_type, valid_from, valid_to))
            })?;

            for row in rows {
                let (target, rel_type, valid_from, valid_to) = row?;
                if let Some(at) = at {
                    let from: DateTime<Utc> = valid_from.parse().unwrap_or(at);
                    let to: Option<DateTime<Utc>> = valid_to.and_then(|s| s.parse().ok());
                    if !(from <= at && to.is_none_or(|t| at < t)) {
                        continue;
                    }
                }
                let Ok(relation_type) = rel_type.parse::<RelationType>() else { continue };
                if visited.insert(target.clone()) {
                    results.push((target.clone(), relation_type, depth + 1));
                    frontier.push_back((target, depth + 1));
                }
            }
        }

        Ok(results)
    }
}

impl GraphStore for SqliteGraphStore {
    fn create_node(&self, memory: &Memory) -> Result<()> {
        let conn = self.conn.lock().expect("graph lock poisoned");
        let tags: Vec<&String> = memory.tags.iter().collect();
        conn.execute(
            "INSERT INTO graph_nodes (id, memory_type, content_preview, project, tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET content_preview=excluded.content_preview, tags=excluded.tags",
            params![
                memory.id,
                memory.memory_type.as_str(),
                memory.content_preview(200),
                memory.project,
                serde_json::to_string(&tags)?,
                memory.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn upsert_edge(&self, relation: &Relation) -> Result<()> {
        let conn = self.conn.lock().expect("graph lock poisoned");
        conn.execute(
            "INSERT INTO graph_edges (source_id, target_id, relation_type, valid_from, valid_to, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(source_id, target_id, relation_type) DO UPDATE SET
                valid_from=excluded.valid_from, valid_to=excluded.valid_to",
            params![
                relation.source_id,
                relation.target_id,
                relation.relation_type.as_str(),
                relation.valid_from.to_rfc3339(),
                relation.valid_to.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn neighbors(&self, id: &str, max_hops: u32) -> Result<Vec<(String, RelationType, u32)>> {
        self.traverse(id, max_hops, None)
    }

    fn neighbors_at(&self, id: &str, at: DateTime<Utc>, max_hops: u32) -> Result<Vec<(String, RelationType, u32)>> {
        self.traverse(id, max_hops, Some(at))
    }

    fn delete_node(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("graph lock poisoned");
        conn.execute("DELETE FROM graph_nodes WHERE id = ?1", params![id])?;
        conn.execute("DELETE FROM graph_edges WHERE source_id = ?1 OR target_id = ?1", params![id])?;
        Ok(())
    }
}
