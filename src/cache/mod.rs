//! Semantic query-result cache: keyed by query embedding similarity, with
//! TTL and size-based eviction (spec §4.9, §4.4.2).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use crate::embeddings::cosine_similarity;
use crate::error::Result;

/// Default cache-hit TTL (spec §4.4.2).
pub const DEFAULT_TTL_HOURS: i64 = 24;
/// Default collection size before oldest-10% eviction kicks in (spec §4.9).
pub const DEFAULT_MAX_SIZE: usize = 10_000;

/// A minimal cached hit: enough to reconstruct a [`crate::store::ScoredMemory`]
/// list without re-serialising the full memory payload (spec §4.9 "serialised
/// minimal result list").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CachedResult {
    pub memory_id: String,
    pub score: f32,
}

/// A cache lookup hit.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub results: Vec<CachedResult>,
    pub cached_at: DateTime<Utc>,
}

/// Hit/miss/store/eviction counters (spec §4.9).
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
}

fn encode_f32_vec(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

/// Deterministic 64-bit FNV-1a hash over the first 10 dense components, in a
/// fixed little-endian byte order (Design Note §9: replaces the source's
/// non-portable `hash(tuple(vec[:10]))`).
pub fn cache_key(dense: &[f32]) -> String {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    for component in dense.iter().take(10) {
        for byte in component.to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    format!("{hash:016x}")
}

/// Semantic query-result cache backed by SQLite (spec §4.9). Lookup is a
/// brute-force cosine scan against stored query embeddings — the cache
/// collection is expected to stay small relative to the memory store.
pub struct SqliteQueryCache {
    conn: Mutex<Connection>,
    stats: Mutex<CacheStats>,
}

impl SqliteQueryCache {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        crate::store::migrations::apply(&conn)?;
        Ok(Self { conn: Mutex::new(conn), stats: Mutex::new(CacheStats::default()) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        crate::store::migrations::apply(&conn)?;
        Ok(Self { conn: Mutex::new(conn), stats: Mutex::new(CacheStats::default()) })
    }

    /// Lookup by embedding similarity (spec §4.4.2, §8 property 9): a hit
    /// requires cosine similarity to the stored key ≥ `threshold` and a
    /// `cached_at` within `ttl_hours`. Expired entries are deleted on
    /// encounter, never returned.
    pub fn get(&self, dense: &[f32], threshold: f32, ttl_hours: i64, now: DateTime<Utc>) -> Result<Option<CacheHit>> {
        let conn = self.conn.lock().expect("cache lock poisoned");
        let mut stmt = conn.prepare("SELECT id, dense, result_json, cached_at FROM query_cache")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let result_json: String = row.get(2)?;
            let cached_at: String = row.get(3)?;
            Ok((id, blob, result_json, cached_at))
        })?;

        let mut best: Option<(String, f32, Vec<CachedResult>, DateTime<Utc>)> = None;
        let mut expired: Vec<String> = Vec::new();

        for row in rows {
            let (id, blob, result_json, cached_at) = row?;
            let cached_at: DateTime<Utc> = cached_at.parse().unwrap_or(now);
            if (now - cached_at).num_hours() >= ttl_hours {
                expired.push(id);
                continue;
            }
            let stored = decode_f32_vec(&blob);
            let similarity = cosine_similarity(dense, &stored);
            if similarity >= threshold && best.as_ref().is_none_or(|(_, s, _, _)| similarity > *s) {
                let results: Vec<CachedResult> = serde_json::from_str(&result_json)?;
                best = Some((id, similarity, results, cached_at));
            }
        }

        for id in expired {
            conn.execute("DELETE FROM query_cache WHERE id = ?1", params![id])?;
        }

        let mut stats = self.stats.lock().expect("stats lock poisoned");
        match best {
            Some((_, _, results, cached_at)) => {
                stats.hits += 1;
                Ok(Some(CacheHit { results, cached_at }))
            }
            None => {
                stats.misses += 1;
                Ok(None)
            }
        }
    }

    /// Store a result list, evicting the oldest 10% first if at capacity
    /// (spec §4.9).
    pub fn put(&self, query_text: &str, dense: &[f32], results: &[CachedResult], max_size: usize, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().expect("cache lock poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM query_cache", [], |row| row.get(0))?;

        let mut evicted = 0u64;
        if count as usize >= max_size {
            let to_evict = ((count as usize) / 10).max(1);
            let mut stmt = conn.prepare("SELECT id FROM query_cache ORDER BY cached_at ASC LIMIT ?1")?;
            let ids: Vec<String> = stmt.query_map(params![to_evict as i64], |row| row.get(0))?.collect::<rusqlite::Result<_>>()?;
            for id in &ids {
                conn.execute("DELETE FROM query_cache WHERE id = ?1", params![id])?;
            }
            evicted = ids.len() as u64;
        }

        let key = cache_key(dense);
        let result_json = serde_json::to_string(results)?;
        conn.execute(
            "INSERT INTO query_cache (id, query_text, dense, result_json, result_count, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET query_text=excluded.query_text, dense=excluded.dense,
                result_json=excluded.result_json, result_count=excluded.result_count, cached_at=excluded.cached_at",
            params![key, query_text, encode_f32_vec(dense), result_json, results.len() as i64, now.to_rfc3339()],
        )?;

        let mut stats = self.stats.lock().expect("stats lock poisoned");
        stats.stores += 1;
        stats.evictions += evicted;
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock().expect("stats lock poisoned")
    }

    /// Drop and recreate the cache collection (spec §4.9 "clear").
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().expect("cache lock poisoned");
        conn.execute("DELETE FROM query_cache", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(seed: f32) -> Vec<f32> {
        (0..crate::embeddings::DENSE_DIMENSIONS).map(|i| seed + i as f32 * 0.001).collect()
    }

    #[test]
    fn miss_on_empty_cache() {
        let cache = SqliteQueryCache::open_in_memory().unwrap();
        let hit = cache.get(&dense(1.0), 0.85, 24, Utc::now()).unwrap();
        assert!(hit.is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn store_then_similar_query_hits() {
        let cache = SqliteQueryCache::open_in_memory().unwrap();
        let key_vec = dense(1.0);
        let results = vec![CachedResult { memory_id: "m1".into(), score: 0.9 }];
        cache.put("postgres disk full ci", &key_vec, &results, DEFAULT_MAX_SIZE, Utc::now()).unwrap();

        let hit = cache.get(&key_vec, 0.85, 24, Utc::now()).unwrap().expect("should hit on identical vector");
        assert_eq!(hit.results[0].memory_id, "m1");
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn dissimilar_query_misses() {
        let cache = SqliteQueryCache::open_in_memory().unwrap();
        let results = vec![CachedResult { memory_id: "m1".into(), score: 0.9 }];
        cache.put("q", &dense(1.0), &results, DEFAULT_MAX_SIZE, Utc::now()).unwrap();

        let mut far = vec![0.0; crate::embeddings::DENSE_DIMENSIONS];
        far[0] = 1.0;
        assert!(cache.get(&far, 0.85, 24, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn expired_entry_is_never_returned() {
        let cache = SqliteQueryCache::open_in_memory().unwrap();
        let key_vec = dense(1.0);
        let results = vec![CachedResult { memory_id: "m1".into(), score: 0.9 }];
        let old_time = Utc::now() - chrono::Duration::hours(25);
        cache.put("q", &key_vec, &results, DEFAULT_MAX_SIZE, old_time).unwrap();

        let hit = cache.get(&key_vec, 0.85, 24, Utc::now()).unwrap();
        assert!(hit.is_none());
    }

    #[test]
    fn cache_key_is_deterministic() {
        let v = dense(2.0);
        assert_eq!(cache_key(&v), cache_key(&v));
    }
}
