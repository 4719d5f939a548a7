//! Consolidation engine: cluster similar old memories and merge each
//! cluster into one summary memory, archiving the sources (spec §4.11).

use std::collections::{HashMap, HashSet};

use crate::embeddings::cosine_similarity;
use crate::model::{Memory, MemoryTier, MemoryType};

/// Minimum age, in days, before a memory is eligible for consolidation
/// (spec §4.11 default).
pub const DEFAULT_CONSOLIDATION_THRESHOLD_DAYS: i64 = 7;
/// Minimum cluster size to be worth merging (spec §4.11).
pub const MIN_CLUSTER_SIZE: usize = 3;
/// Tag union cap on the consolidated memory (spec §4.11).
pub const MAX_TAGS: usize = 15;

/// Hierarchical agglomerative clustering with average linkage on
/// `1 - cosine` distance (spec §4.11, preferred method). Merges the closest
/// pair of clusters repeatedly while their average distance stays within
/// `1 - similarity_threshold`; singleton/undersized clusters are dropped.
///
/// Quadratic-ish in the number of items; batch jobs page through the corpus
/// in bounded windows (spec §5 `batch_size` default 100), so this is never
/// asked to cluster the whole store at once.
pub fn hierarchical_cluster(items: &[(String, Vec<f32>)], similarity_threshold: f32, min_cluster_size: usize) -> Vec<Vec<String>> {
    let distance_threshold = 1.0 - similarity_threshold;
    let mut clusters: Vec<Vec<usize>> = (0..items.len()).map(|i| vec![i]).collect();

    let avg_distance = |a: &[usize], b: &[usize]| -> f32 {
        let mut total = 0.0;
        let mut count = 0;
        for &i in a {
            for &j in b {
                total += 1.0 - cosine_similarity(&items[i].1, &items[j].1);
                count += 1;
            }
        }
        if count == 0 { f32::INFINITY } else { total / count as f32 }
    };

    loop {
        if clusters.len() < 2 {
            break;
        }
        let mut best: Option<(usize, usize, f32)> = None;
        for a in 0..clusters.len() {
            for b in (a + 1)..clusters.len() {
                let d = avg_distance(&clusters[a], &clusters[b]);
                if best.is_none_or(|(_, _, best_d)| d < best_d) {
                    best = Some((a, b, d));
                }
            }
        }
        match best {
            Some((a, b, d)) if d <= distance_threshold => {
                let merged = [clusters[a].clone(), clusters[b].clone()].concat();
                let (hi, lo) = (a.max(b), a.min(b));
                clusters.remove(hi);
                clusters.remove(lo);
                clusters.push(merged);
            }
            _ => break,
        }
    }

    clusters
        .into_iter()
        .filter(|c| c.len() >= min_cluster_size)
        .map(|c| c.into_iter().map(|i| items[i].0.clone()).collect())
        .collect()
}

/// Greedy clustering fallback (spec §4.11): sweep items in order; for each
/// unclustered seed, absorb every other unclustered item above the
/// similarity threshold.
pub fn greedy_cluster(items: &[(String, Vec<f32>)], similarity_threshold: f32, min_cluster_size: usize) -> Vec<Vec<String>> {
    let mut unclustered: HashSet<usize> = (0..items.len()).collect();
    let mut clusters = Vec::new();

    let order: Vec<usize> = (0..items.len()).collect();
    for &seed in &order {
        if !unclustered.contains(&seed) {
            continue;
        }
        let mut cluster = vec![seed];
        unclustered.remove(&seed);

        let absorbed: Vec<usize> = unclustered
            .iter()
            .copied()
            .filter(|&j| cosine_similarity(&items[seed].1, &items[j].1) >= similarity_threshold)
            .collect();
        for j in absorbed {
            unclustered.remove(&j);
            cluster.push(j);
        }
        clusters.push(cluster);
    }

    clusters
        .into_iter()
        .filter(|c| c.len() >= min_cluster_size)
        .map(|c| c.into_iter().map(|i| items[i].0.clone()).collect())
        .collect()
}

/// The result of merging one cluster: the new consolidated memory and the
/// ids of the sources that should be archived (spec §4.11).
pub struct ConsolidationResult {
    pub consolidated: Memory,
    pub source_ids: Vec<String>,
}

/// Merge a cluster of memories into one consolidated memory (spec §4.11):
/// primary = argmax(importance · (access+1)); type = most common in the
/// cluster; tags = union capped at [`MAX_TAGS`]; content = primary's content
/// (or `summary` if the caller supplies a generated one — Design Note §9
/// leaves synthesis as an open product decision, resolved here as
/// opt-in via `summary`); `consolidated_from` = source ids; `access_count` =
/// sum.
pub fn merge_cluster(cluster: &[Memory], summary: Option<String>) -> ConsolidationResult {
    let primary = cluster
        .iter()
        .max_by(|a, b| {
            let score_a = a.importance_score * (a.access_count as f64 + 1.0);
            let score_b = b.importance_score * (b.access_count as f64 + 1.0);
            score_a.partial_cmp(&score_b).unwrap_or(std::cmp::Ordering::Equal)
        })
        .expect("cluster is non-empty");

    let mut type_counts: HashMap<MemoryType, usize> = HashMap::new();
    for m in cluster {
        *type_counts.entry(m.memory_type).or_default() += 1;
    }
    let most_common_type = *type_counts.iter().max_by_key(|(_, count)| **count).map(|(t, _)| t).unwrap();

    let mut tags: Vec<String> = cluster.iter().flat_map(|m| m.tags.iter().cloned()).collect::<HashSet<_>>().into_iter().collect();
    tags.sort();
    tags.truncate(MAX_TAGS);

    let mut consolidated = Memory::new(most_common_type, summary.unwrap_or_else(|| primary.content.clone()));
    consolidated.tags = tags.into_iter().collect();
    consolidated.memory_tier = MemoryTier::Semantic;
    consolidated.project = primary.project.clone();
    consolidated.consolidated_from = cluster.iter().map(|m| m.id.clone()).collect();
    consolidated.access_count = cluster.iter().map(|m| m.access_count).sum();
    consolidated.importance_score = primary.importance_score;

    ConsolidationResult { consolidated, source_ids: cluster.iter().map(|m| m.id.clone()).collect() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryType;

    fn memory(id: &str, content: &str, importance: f64, access: u64) -> Memory {
        let mut m = Memory::new(MemoryType::Learning, content);
        m.id = id.to_string();
        m.importance_score = importance;
        m.access_count = access;
        m.tags = std::collections::HashSet::from(["rust".into()]);
        m
    }

    #[test]
    fn hierarchical_cluster_merges_close_vectors() {
        let items = vec![
            ("a".to_string(), vec![1.0, 0.0, 0.0]),
            ("b".to_string(), vec![0.99, 0.01, 0.0]),
            ("c".to_string(), vec![0.98, 0.02, 0.0]),
            ("d".to_string(), vec![0.0, 1.0, 0.0]),
        ];
        let clusters = hierarchical_cluster(&items, 0.9, 3);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 3);
        assert!(clusters[0].contains(&"a".to_string()));
        assert!(!clusters[0].contains(&"d".to_string()));
    }

    #[test]
    fn undersized_clusters_are_dropped() {
        let items = vec![("a".to_string(), vec![1.0, 0.0]), ("b".to_string(), vec![0.99, 0.01])];
        let clusters = hierarchical_cluster(&items, 0.9, 3);
        assert!(clusters.is_empty());
    }

    #[test]
    fn greedy_cluster_absorbs_similar_items() {
        let items = vec![
            ("a".to_string(), vec![1.0, 0.0]),
            ("b".to_string(), vec![0.99, 0.01]),
            ("c".to_string(), vec![0.98, 0.02]),
            ("d".to_string(), vec![0.0, 1.0]),
        ];
        let clusters = greedy_cluster(&items, 0.9, 3);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 3);
    }

    #[test]
    fn merge_picks_primary_by_importance_times_access() {
        let weak = memory("weak", "a short learning about something minor today", 0.2, 1);
        let strong = memory("strong", "a much more important learning that gets accessed a lot", 0.9, 20);
        let result = merge_cluster(&[weak, strong], None);
        assert_eq!(result.consolidated.content, "a much more important learning that gets accessed a lot");
        assert_eq!(result.consolidated.memory_tier, MemoryTier::Semantic);
        assert_eq!(result.source_ids.len(), 2);
    }

    #[test]
    fn merge_sums_access_counts_and_caps_tags() {
        let mut cluster = Vec::new();
        for i in 0..4 {
            let mut m = memory(&format!("m{i}"), "learning entry content long enough to pass rules", 0.5, 5);
            m.tags = (0..20).map(|t| format!("tag{t}")).collect();
            cluster.push(m);
        }
        let result = merge_cluster(&cluster, None);
        assert_eq!(result.consolidated.access_count, 20);
        assert!(result.consolidated.tags.len() <= MAX_TAGS);
    }
}
