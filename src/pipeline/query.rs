//! The query pipeline: intelligence → cache → retrieval → rerank → graph
//! expansion → cache store + access bookkeeping (spec §4.4).

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::cache::{CachedResult, SqliteQueryCache, DEFAULT_MAX_SIZE, DEFAULT_TTL_HOURS};
use crate::embeddings::{EmbedSide, EmbeddingService};
use crate::error::Result;
use crate::forgetting;
use crate::fusion;
use crate::model::{Memory, RelationType};
use crate::pipeline::understanding::{self, RetrievalPlan};
use crate::quality;
use crate::rerank::Reranker;
use crate::settings::Settings;
use crate::store::{Filter, GraphStore, ScoredMemory, VectorStore};

/// Number of candidates to fetch per list when reranking is enabled (spec
/// §4.4.3).
const RERANK_OVERSAMPLE: usize = 50;
/// Top-dense-score confidence shortcut that skips rerank (spec §4.4.3).
const RERANK_SKIP_SCORE: f32 = 0.95;
/// Graph-expansion tuning (spec §4.4.5).
const EXPANSION_FACTOR: f32 = 0.6;
const EXPANSION_DEPTH_DECAY: f32 = 0.8;
const EXPANSION_MIN_SCORE: f32 = 0.1;
/// Results whose access is reinforced and bookkept after a query (spec
/// §4.4.6).
const ACCESS_BOOKKEEPING_TOP_N: usize = 5;

/// Fusion/retrieval mode requested by the caller (spec §4.4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    HybridRrf,
    HybridLearned,
    Semantic,
    Keyword,
}

/// Query pipeline input (spec §4.4 "Input").
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub filter: Filter,
    pub limit: usize,
    pub min_score: f32,
    pub search_mode: SearchMode,
    pub use_query_understanding: bool,
    pub expand_graph: bool,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filter: Filter::default(),
            limit: 10,
            min_score: 0.0,
            search_mode: SearchMode::HybridRrf,
            use_query_understanding: true,
            expand_graph: false,
        }
    }

    fn has_filters(&self) -> bool {
        self.filter.memory_type.is_some() || !self.filter.tags.is_empty() || self.filter.project.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub memory: Memory,
    pub score: f32,
    pub from_cache: bool,
}

fn rrf_k() -> f32 {
    60.0
}

fn dense_prefetch(vector_store: &dyn VectorStore, dense: &[f32], filter: &Filter, n: usize) -> Result<Vec<ScoredMemory>> {
    vector_store.search_dense(dense, filter, n, 0.0)
}

fn sparse_prefetch(
    vector_store: &dyn VectorStore,
    sparse: Option<&crate::embeddings::SparseVector>,
    filter: &Filter,
    n: usize,
) -> Result<Vec<ScoredMemory>> {
    match sparse {
        Some(s) if !s.is_empty() => vector_store.search_sparse(s, filter, n, 0.0),
        _ => Ok(Vec::new()),
    }
}

/// Run the retrieval stage for the given mode (spec §4.4.3), returning a
/// score-ordered, deduplicated list of scored memories.
fn retrieve(
    vector_store: &dyn VectorStore,
    mode: SearchMode,
    query_text: &str,
    dense: &[f32],
    sparse: Option<&crate::embeddings::SparseVector>,
    filter: &Filter,
    fetch_count: usize,
) -> Result<Vec<ScoredMemory>> {
    let by_id = |hits: &[ScoredMemory]| -> HashMap<String, ScoredMemory> {
        hits.iter().map(|h| (h.memory.id.clone(), h.clone())).collect()
    };

    match mode {
        SearchMode::Semantic => dense_prefetch(vector_store, dense, filter, fetch_count),
        SearchMode::Keyword => sparse_prefetch(vector_store, sparse, filter, fetch_count),
        SearchMode::HybridRrf => {
            let dense_hits = dense_prefetch(vector_store, dense, filter, fetch_count * 2)?;
            let sparse_hits = sparse_prefetch(vector_store, sparse, filter, fetch_count * 2)?;
            let dense_ranked: Vec<(String, f32)> = dense_hits.iter().map(|h| (h.memory.id.clone(), h.score)).collect();
            let sparse_ranked: Vec<(String, f32)> = sparse_hits.iter().map(|h| (h.memory.id.clone(), h.score)).collect();
            let fused = fusion::reciprocal_rank_fusion(&dense_ranked, &sparse_ranked, rrf_k());
            let pool = by_id(&[dense_hits, sparse_hits].concat());
            Ok(fused.into_iter().filter_map(|(id, score)| pool.get(&id).map(|h| ScoredMemory { memory: h.memory.clone(), score })).collect())
        }
        SearchMode::HybridLearned => {
            let dense_hits = dense_prefetch(vector_store, dense, filter, fetch_count * 2)?;
            let sparse_hits = sparse_prefetch(vector_store, sparse, filter, fetch_count * 2)?;
            let class = fusion::classify_query(query_text);
            let dense_ranked: Vec<(String, f32)> = dense_hits.iter().map(|h| (h.memory.id.clone(), h.score)).collect();
            let sparse_ranked: Vec<(String, f32)> = sparse_hits.iter().map(|h| (h.memory.id.clone(), h.score)).collect();
            let fused = fusion::learned_fusion(&dense_ranked, &sparse_ranked, class);
            let pool = by_id(&[dense_hits, sparse_hits].concat());
            Ok(fused.into_iter().filter_map(|(id, score)| pool.get(&id).map(|h| ScoredMemory { memory: h.memory.clone(), score })).collect())
        }
    }
}

/// Graph-expand the top results with 1-3 hop neighbours, weighted by edge
/// type and hop depth, merged in (initial results win on id collisions)
/// (spec §4.4.5).
fn expand_with_graph(graph_store: &dyn GraphStore, results: Vec<ScoredMemory>, vector_store: &dyn VectorStore, limit: usize) -> Result<Vec<ScoredMemory>> {
    let mut merged: HashMap<String, ScoredMemory> = results.iter().map(|r| (r.memory.id.clone(), r.clone())).collect();

    for seed in &results {
        let neighbors = graph_store.neighbors(&seed.memory.id, 3)?;
        for (neighbor_id, relation_type, depth) in neighbors {
            if merged.contains_key(&neighbor_id) {
                continue;
            }
            let weight = relation_type_weight(relation_type);
            let score = seed.score * weight * EXPANSION_FACTOR * EXPANSION_DEPTH_DECAY.powi(depth as i32);
            if score < EXPANSION_MIN_SCORE {
                continue;
            }
            if let Some(memory) = vector_store.get(&neighbor_id)? {
                merged.insert(neighbor_id, ScoredMemory { memory, score });
            }
        }
    }

    let mut all: Vec<ScoredMemory> = merged.into_values().collect();
    all.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    all.truncate(limit);
    Ok(all)
}

fn relation_type_weight(relation_type: RelationType) -> f32 {
    relation_type.expansion_weight()
}

/// End-to-end query execution (spec §4.4). `now` drives cache TTL and
/// access bookkeeping timestamps.
#[allow(clippy::too_many_arguments)]
pub fn search<R: Reranker>(
    vector_store: &dyn VectorStore,
    graph_store: &dyn GraphStore,
    embeddings: &dyn EmbeddingService,
    cache: &SqliteQueryCache,
    reranker: &R,
    settings: &Settings,
    mut request: QueryRequest,
    now: DateTime<Utc>,
) -> Result<Vec<QueryResult>> {
    // Stage 1: query intelligence.
    let effective_query = if request.use_query_understanding && settings.use_query_understanding {
        let enhanced = understanding::enhance_query(&request.query);
        let scores = understanding::classify_intent(&request.query);
        match understanding::route(scores) {
            RetrievalPlan::SparseOnlyNoRerank => request.search_mode = SearchMode::Keyword,
            RetrievalPlan::HybridWithGraphExpansion => {
                request.search_mode = SearchMode::HybridRrf;
                request.expand_graph = true;
            }
            RetrievalPlan::HybridWithRecency | RetrievalPlan::CompositeHybridRerank { .. } => {
                request.search_mode = SearchMode::HybridRrf;
            }
            RetrievalPlan::SemanticRerank => request.search_mode = SearchMode::Semantic,
        }
        enhanced.enhanced
    } else {
        request.query.clone()
    };

    let dense = embeddings
        .dense(&effective_query, EmbedSide::Query)
        .map_err(|e| crate::error::EngramError::External(e.to_string()))?;
    let sparse = embeddings.sparse(&effective_query).ok().flatten();

    let use_cache = !request.has_filters();
    let rerank_enabled = !matches!(request.search_mode, SearchMode::Keyword);

    // Stage 2: cache check.
    if use_cache {
        if let Some(hit) = cache.get(&dense, settings.cache_threshold, DEFAULT_TTL_HOURS, now)? {
            let mut results = Vec::with_capacity(hit.results.len());
            for cached in &hit.results {
                if let Some(memory) = vector_store.get(&cached.memory_id)? {
                    results.push(QueryResult { memory, score: cached.score, from_cache: true });
                }
            }
            bookkeep_access(vector_store, &results, now)?;
            return Ok(results);
        }
    }

    // Stage 3: retrieval.
    let fetch_count = if rerank_enabled { RERANK_OVERSAMPLE } else { request.limit };
    let mut scored = retrieve(vector_store, request.search_mode, &effective_query, &dense, sparse.as_ref(), &request.filter, fetch_count)?;
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let top_dense_confident = scored.first().is_some_and(|s| s.score >= RERANK_SKIP_SCORE);

    // Stage 4: rerank.
    if rerank_enabled && !top_dense_confident && !scored.is_empty() {
        let candidates: Vec<(Memory, String)> = scored
            .into_iter()
            .map(|s| {
                let text = format!(
                    "{} {} {}",
                    s.memory.content,
                    s.memory.context.as_deref().unwrap_or_default(),
                    s.memory.error_message.as_deref().unwrap_or_default()
                );
                (s.memory, text)
            })
            .collect();
        let reranked = reranker
            .rerank(&effective_query, candidates, Some(request.limit))
            .map_err(|e| crate::error::EngramError::External(e.to_string()))?;
        scored = reranked.into_iter().map(|r| ScoredMemory { memory: r.item, score: r.score }).collect();
    } else {
        scored.truncate(request.limit);
    }

    // Stage 5: graph expansion.
    if request.expand_graph {
        scored = expand_with_graph(graph_store, scored, vector_store, request.limit)?;
    }
    scored.retain(|s| s.score >= request.min_score);
    scored.truncate(request.limit);

    let results: Vec<QueryResult> = scored.into_iter().map(|s| QueryResult { memory: s.memory, score: s.score, from_cache: false }).collect();

    // Stage 6: cache store and access bookkeeping.
    if use_cache {
        let cached_results: Vec<CachedResult> =
            results.iter().map(|r| CachedResult { memory_id: r.memory.id.clone(), score: r.score }).collect();
        cache.put(&request.query, &dense, &cached_results, DEFAULT_MAX_SIZE, now)?;
    }
    bookkeep_access(vector_store, &results, now)?;

    Ok(results)
}

/// Top-N access bookkeeping (spec §4.4.6): increment access_count without a
/// quality recalculation, and reinforce strength (§4.8).
fn bookkeep_access(vector_store: &dyn VectorStore, results: &[QueryResult], now: DateTime<Utc>) -> Result<()> {
    for result in results.iter().take(ACCESS_BOOKKEEPING_TOP_N) {
        if let Some(mut memory) = vector_store.get(&result.memory.id)? {
            memory.access_count += 1;
            memory.last_accessed = now;
            memory.memory_strength = forgetting::reinforce(&memory, forgetting::DEFAULT_REINFORCEMENT_BOOST);
            vector_store.set_payload(&memory.id, &memory)?;
        }
    }
    Ok(())
}

/// "Valid at T" (spec §4.4.7): scroll under the filter, then keep only
/// memories valid at `at`.
pub fn valid_at(vector_store: &dyn VectorStore, filter: &Filter, at: DateTime<Utc>, limit: usize) -> Result<Vec<Memory>> {
    let page = vector_store.scroll(filter, limit.max(200), 0)?;
    Ok(page.memories.into_iter().filter(|m| m.is_valid_at(at)).take(limit).collect())
}

/// "Obsolete" (spec §4.4.7): memories whose `validity_end` has already
/// passed.
pub fn obsolete(vector_store: &dyn VectorStore, filter: &Filter, now: DateTime<Utc>, limit: usize) -> Result<Vec<Memory>> {
    let page = vector_store.scroll(filter, limit.max(200), 0)?;
    Ok(page.memories.into_iter().filter(|m| m.validity_end.is_some_and(|end| end <= now)).take(limit).collect())
}

/// "Related at T" (spec §4.4.7): like graph expansion, but each edge must
/// satisfy `valid_from <= T < valid_to?`.
pub fn related_at(graph_store: &dyn GraphStore, id: &str, at: DateTime<Utc>, max_hops: u32) -> Result<Vec<(String, RelationType, u32)>> {
    graph_store.neighbors_at(id, at, max_hops)
}

/// Recompute quality for the seven-component score (used by access-heavy
/// paths that want an up-to-date figure without the write pipeline).
pub fn recompute_quality(memory: &mut Memory, now: DateTime<Utc>) {
    let (score, components) = quality::score(memory, now);
    memory.quality_score = score;
    memory.quality_components = components;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::SqliteAuditTrail;
    use crate::embeddings::EmbeddingError;
    use crate::model::MemoryType;
    use crate::pipeline::write::{store_memory, Draft};
    use crate::rerank::FallbackReranker;
    use crate::store::{SqliteGraphStore, SqliteVectorStore};

    struct StubEmbeddings;
    impl EmbeddingService for StubEmbeddings {
        fn dense(&self, text: &str, _side: EmbedSide) -> std::result::Result<Vec<f32>, EmbeddingError> {
            let mut v = vec![0.0; crate::embeddings::DENSE_DIMENSIONS];
            for (i, b) in text.bytes().enumerate() {
                v[i % v.len()] += b as f32 / 255.0;
            }
            Ok(v)
        }
    }

    fn harness() -> (SqliteVectorStore, SqliteGraphStore, SqliteQueryCache, SqliteAuditTrail, Settings) {
        (
            SqliteVectorStore::open_in_memory().unwrap(),
            SqliteGraphStore::open_in_memory().unwrap(),
            SqliteQueryCache::open_in_memory().unwrap(),
            SqliteAuditTrail::open_in_memory().unwrap(),
            Settings::default(),
        )
    }

    #[test]
    fn semantic_search_finds_stored_memory() {
        let (vs, gs, cache, audit, settings) = harness();
        let embeddings = StubEmbeddings;
        let draft = Draft {
            memory_type: Some(MemoryType::Learning),
            content: "kubernetes rollouts should use readiness probes before routing traffic".into(),
            tags: vec!["kubernetes".into(), "deploy".into()],
            ..Default::default()
        };
        store_memory(&vs, &gs, &embeddings, &audit, &settings, draft, true, Utc::now()).unwrap();

        let mut request = QueryRequest::new("kubernetes rollouts readiness probes");
        request.search_mode = SearchMode::Semantic;
        request.use_query_understanding = false;
        let reranker = FallbackReranker;
        let results = search(&vs, &gs, &embeddings, &cache, &reranker, &settings, request, Utc::now()).unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn access_bookkeeping_increments_count() {
        let (vs, gs, cache, audit, settings) = harness();
        let embeddings = StubEmbeddings;
        let draft = Draft {
            memory_type: Some(MemoryType::Learning),
            content: "terraform state locking prevents concurrent apply corruption issues".into(),
            tags: vec!["terraform".into(), "infra".into()],
            ..Default::default()
        };
        let outcome = store_memory(&vs, &gs, &embeddings, &audit, &settings, draft, true, Utc::now()).unwrap();
        let id = outcome.into_memory().id;

        let mut request = QueryRequest::new("terraform state locking");
        request.search_mode = SearchMode::Semantic;
        request.use_query_understanding = false;
        let reranker = FallbackReranker;
        search(&vs, &gs, &embeddings, &cache, &reranker, &settings, request, Utc::now()).unwrap();

        let after = vs.get(&id).unwrap().unwrap();
        assert_eq!(after.access_count, 1);
    }

    #[test]
    fn valid_at_excludes_expired_memories() {
        let (vs, _gs, _cache, _audit, _settings) = harness();
        let mut m = Memory::new(MemoryType::Docs, "an old policy that has since been superseded by a new one");
        m.validity_end = Some(Utc::now() - chrono::Duration::days(1));
        vs.create_collection().unwrap();
        vs.upsert(&m, &crate::store::Vectors { dense: vec![0.0; crate::embeddings::DENSE_DIMENSIONS], sparse: None }).unwrap();

        let results = valid_at(&vs, &Filter::default(), Utc::now(), 10).unwrap();
        assert!(results.iter().all(|r| r.id != m.id));
    }
}
