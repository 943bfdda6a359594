//! Semantic clustering
//!
//! Groups embedded memories into coherent themed clusters. The strategy is
//! a closed set selected at configuration time - a greedy centroid pass
//! that is always a safe default, a density-based pass that chains through
//! tight neighborhoods and leaves sparse noise unclustered, and an
//! agglomerative pass that merges bottom-up until cluster centroids drift
//! apart. Every strategy enforces the minimum cluster size and reports the
//! same per-cluster statistics, so downstream stages never care which one
//! ran; the effective algorithm is recorded on each cluster.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use tracing::debug;
use uuid::Uuid;

use crate::config::ConsolidationConfig;
use crate::constants::{
    CLUSTER_THEME_KEYWORDS, DENSITY_NEIGHBOR_SIMILARITY, HIERARCHICAL_MERGE_SIMILARITY,
    SIMPLE_CLUSTER_SIMILARITY,
};
use crate::errors::ConsolidationError;
use crate::similarity::cosine_similarity;
use crate::types::{Memory, MemoryCluster};

use super::compression::KeywordExtractor;

/// Interchangeable clustering strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringAlgorithm {
    /// Greedy centroid-threshold grouping; dependency-free default
    Simple,
    /// Neighborhood-chaining pass in the DBSCAN family; sparse memories
    /// stay unclustered as noise
    DensityBased,
    /// Bottom-up agglomerative merging on centroid similarity
    Hierarchical,
}

impl ClusteringAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusteringAlgorithm::Simple => "simple",
            ClusteringAlgorithm::DensityBased => "density_based",
            ClusteringAlgorithm::Hierarchical => "hierarchical",
        }
    }
}

impl fmt::Display for ClusteringAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusteringAlgorithm {
    type Err = ConsolidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(ClusteringAlgorithm::Simple),
            "density_based" | "dbscan" => Ok(ClusteringAlgorithm::DensityBased),
            "hierarchical" | "agglomerative" => Ok(ClusteringAlgorithm::Hierarchical),
            other => Err(ConsolidationError::config(
                "algorithm",
                format!(
                    "unknown clustering algorithm '{other}' \
                     (expected simple, density_based, or hierarchical)"
                ),
            )),
        }
    }
}

/// Groups memories into coherent themed clusters
#[derive(Debug)]
pub struct ClusteringEngine {
    algorithm: ClusteringAlgorithm,
    min_cluster_size: usize,
    keyword_extractor: KeywordExtractor,
}

impl ClusteringEngine {
    pub fn new(config: &ConsolidationConfig) -> Self {
        Self {
            algorithm: config.algorithm,
            min_cluster_size: config.min_cluster_size,
            keyword_extractor: KeywordExtractor::new(),
        }
    }

    /// Cluster the snapshot's embedded memories
    ///
    /// Memories without embeddings are ignored; fewer than
    /// `min_cluster_size` embedded memories yields empty output.
    pub fn process(&self, memories: &[Memory]) -> Vec<MemoryCluster> {
        let embedded: Vec<&Memory> = memories.iter().filter(|m| m.embedding.is_some()).collect();

        if embedded.len() < self.min_cluster_size {
            debug!(
                embedded = embedded.len(),
                min_cluster_size = self.min_cluster_size,
                "Not enough embedded memories to cluster"
            );
            return Vec::new();
        }

        let groups = match self.algorithm {
            ClusteringAlgorithm::Simple => self.cluster_simple(&embedded),
            ClusteringAlgorithm::DensityBased => self.cluster_density(&embedded),
            ClusteringAlgorithm::Hierarchical => self.cluster_hierarchical(&embedded),
        };

        let clusters: Vec<MemoryCluster> = groups
            .par_iter()
            .filter(|g| g.len() >= self.min_cluster_size)
            .map(|group| {
                let members: Vec<&Memory> = group.iter().map(|&i| embedded[i]).collect();
                self.build_cluster(&members, self.algorithm.as_str())
            })
            .collect();

        debug!(
            algorithm = %self.algorithm,
            embedded = embedded.len(),
            clusters = clusters.len(),
            "Clustering complete"
        );
        clusters
    }

    /// Greedy centroid-threshold grouping
    ///
    /// Each unassigned memory seeds a cluster; every remaining unassigned
    /// memory close enough to the running centroid joins it.
    fn cluster_simple(&self, memories: &[&Memory]) -> Vec<Vec<usize>> {
        let n = memories.len();
        let mut assigned = vec![false; n];
        let mut groups = Vec::new();

        for seed in 0..n {
            if assigned[seed] {
                continue;
            }
            assigned[seed] = true;
            let mut group = vec![seed];
            let mut centroid = embedding_of(memories[seed]).to_vec();

            for other in (seed + 1)..n {
                if assigned[other] {
                    continue;
                }
                let sim = f64::from(cosine_similarity(&centroid, embedding_of(memories[other])));
                if sim >= SIMPLE_CLUSTER_SIMILARITY {
                    assigned[other] = true;
                    group.push(other);
                    centroid = mean_embedding(group.iter().map(|&i| embedding_of(memories[i])));
                }
            }
            groups.push(group);
        }
        groups
    }

    /// Density pass: grow clusters from core points through their
    /// neighborhoods; points without a dense neighborhood stay noise
    fn cluster_density(&self, memories: &[&Memory]) -> Vec<Vec<usize>> {
        let n = memories.len();
        let neighbors: Vec<Vec<usize>> = (0..n)
            .into_par_iter()
            .map(|i| {
                (0..n)
                    .filter(|&j| {
                        j != i
                            && f64::from(cosine_similarity(
                                embedding_of(memories[i]),
                                embedding_of(memories[j]),
                            )) >= DENSITY_NEIGHBOR_SIMILARITY
                    })
                    .collect()
            })
            .collect();

        let mut labels: Vec<Option<usize>> = vec![None; n];
        let mut groups: Vec<Vec<usize>> = Vec::new();

        for i in 0..n {
            if labels[i].is_some() || neighbors[i].len() + 1 < self.min_cluster_size {
                continue;
            }
            let id = groups.len();
            labels[i] = Some(id);
            let mut members = vec![i];
            let mut queue: VecDeque<usize> = neighbors[i].iter().copied().collect();

            while let Some(j) = queue.pop_front() {
                if labels[j].is_some() {
                    continue;
                }
                labels[j] = Some(id);
                members.push(j);
                // Only core points propagate the cluster further
                if neighbors[j].len() + 1 >= self.min_cluster_size {
                    queue.extend(neighbors[j].iter().copied());
                }
            }
            groups.push(members);
        }
        groups
    }

    /// Agglomerative pass: merge the closest pair of groups until their
    /// centroids are no longer similar enough
    fn cluster_hierarchical(&self, memories: &[&Memory]) -> Vec<Vec<usize>> {
        let mut groups: Vec<Vec<usize>> = (0..memories.len()).map(|i| vec![i]).collect();
        let mut centroids: Vec<Vec<f32>> = memories
            .iter()
            .map(|m| embedding_of(m).to_vec())
            .collect();

        while groups.len() > 1 {
            let best = (0..groups.len())
                .flat_map(|p| ((p + 1)..groups.len()).map(move |q| (p, q)))
                .max_by_key(|&(p, q)| OrderedFloat(cosine_similarity(&centroids[p], &centroids[q])));

            let Some((p, q)) = best else { break };
            let best_sim = f64::from(cosine_similarity(&centroids[p], &centroids[q]));
            if best_sim < HIERARCHICAL_MERGE_SIMILARITY {
                break;
            }

            // p < q, so swap_remove(q) never disturbs index p
            let absorbed = groups.swap_remove(q);
            centroids.swap_remove(q);
            groups[p].extend(absorbed);
            centroids[p] = mean_embedding(groups[p].iter().map(|&i| embedding_of(memories[i])));
        }
        groups
    }

    fn build_cluster(&self, members: &[&Memory], algorithm: &str) -> MemoryCluster {
        let now = Utc::now();
        let centroid = mean_embedding(members.iter().map(|m| embedding_of(m)));

        let coherence: f64 = members
            .iter()
            .map(|m| f64::from(cosine_similarity(embedding_of(m), &centroid)).max(0.0))
            .sum::<f64>()
            / members.len() as f64;

        let mut tag_distribution: HashMap<String, usize> = HashMap::new();
        for member in members {
            for tag in &member.tags {
                *tag_distribution.entry(tag.clone()).or_insert(0) += 1;
            }
        }

        let theme_keywords = self.theme_keywords(members, &tag_distribution);

        let average_memory_age_days = members
            .iter()
            .map(|m| m.age_days(now).max(0.0))
            .sum::<f64>()
            / members.len() as f64;

        MemoryCluster {
            cluster_id: Uuid::new_v4().to_string(),
            memory_hashes: members.iter().map(|m| m.content_hash.clone()).collect(),
            centroid_embedding: centroid,
            coherence_score: coherence.clamp(0.0, 1.0),
            created_at: now,
            theme_keywords,
            algorithm: algorithm.to_string(),
            average_memory_age_days,
            tag_distribution,
        }
    }

    /// Most frequent tags first, then salient content tokens
    fn theme_keywords(
        &self,
        members: &[&Memory],
        tag_distribution: &HashMap<String, usize>,
    ) -> Vec<String> {
        let mut ranked_tags: Vec<(&String, &usize)> = tag_distribution.iter().collect();
        ranked_tags.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        let mut keywords: Vec<String> = ranked_tags
            .into_iter()
            .take(CLUSTER_THEME_KEYWORDS / 2)
            .map(|(tag, _)| tag.clone())
            .collect();

        let combined: String = members
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        for token in self
            .keyword_extractor
            .extract(&combined, CLUSTER_THEME_KEYWORDS)
        {
            if keywords.len() >= CLUSTER_THEME_KEYWORDS {
                break;
            }
            if !keywords.contains(&token) {
                keywords.push(token);
            }
        }
        keywords
    }

    /// Merge clusters whose centroids agree beyond `threshold`
    ///
    /// Member sets are unioned, never duplicated, so the total memory count
    /// across clusters can only stay equal or shrink. Merged clusters carry
    /// the `"<algorithm>_merged"` label.
    pub fn merge_similar_clusters(
        &self,
        mut clusters: Vec<MemoryCluster>,
        threshold: f64,
    ) -> Vec<MemoryCluster> {
        loop {
            let best = (0..clusters.len())
                .flat_map(|p| ((p + 1)..clusters.len()).map(move |q| (p, q)))
                .map(|(p, q)| {
                    let sim = f64::from(cosine_similarity(
                        &clusters[p].centroid_embedding,
                        &clusters[q].centroid_embedding,
                    ));
                    (p, q, sim)
                })
                .max_by_key(|&(_, _, sim)| OrderedFloat(sim));

            let Some((p, q, sim)) = best else { break };
            if sim <= threshold {
                break;
            }

            // p < q, so swap_remove(q) never disturbs index p
            let absorbed = clusters.swap_remove(q);
            clusters[p] = merge_pair(&clusters[p], &absorbed);
        }
        clusters
    }
}

fn merge_pair(a: &MemoryCluster, b: &MemoryCluster) -> MemoryCluster {
    let size_a = a.size() as f64;
    let size_b = b.size() as f64;
    let total = size_a + size_b;

    let centroid: Vec<f32> = a
        .centroid_embedding
        .iter()
        .zip(b.centroid_embedding.iter())
        .map(|(x, y)| ((f64::from(*x) * size_a + f64::from(*y) * size_b) / total) as f32)
        .collect();

    let mut memory_hashes = a.memory_hashes.clone();
    memory_hashes.extend(b.memory_hashes.iter().cloned());

    let mut theme_keywords = a.theme_keywords.clone();
    for keyword in &b.theme_keywords {
        if !theme_keywords.contains(keyword) {
            theme_keywords.push(keyword.clone());
        }
    }
    theme_keywords.truncate(CLUSTER_THEME_KEYWORDS);

    let mut tag_distribution = a.tag_distribution.clone();
    for (tag, count) in &b.tag_distribution {
        *tag_distribution.entry(tag.clone()).or_insert(0) += count;
    }

    let base = a.algorithm.trim_end_matches("_merged");

    MemoryCluster {
        cluster_id: Uuid::new_v4().to_string(),
        memory_hashes,
        centroid_embedding: centroid,
        coherence_score: ((a.coherence_score * size_a + b.coherence_score * size_b) / total)
            .clamp(0.0, 1.0),
        created_at: Utc::now(),
        theme_keywords,
        algorithm: format!("{base}_merged"),
        average_memory_age_days: (a.average_memory_age_days * size_a
            + b.average_memory_age_days * size_b)
            / total,
        tag_distribution,
    }
}

fn embedding_of<'a>(memory: &'a Memory) -> &'a [f32] {
    // Callers filter on embedding presence before reaching here
    memory.embedding.as_deref().unwrap_or(&[])
}

fn mean_embedding<'a>(embeddings: impl Iterator<Item = &'a [f32]>) -> Vec<f32> {
    let mut sum: Vec<f64> = Vec::new();
    let mut count = 0usize;
    for embedding in embeddings {
        if sum.is_empty() {
            sum = vec![0.0; embedding.len()];
        }
        for (acc, value) in sum.iter_mut().zip(embedding.iter()) {
            *acc += f64::from(*value);
        }
        count += 1;
    }
    if count == 0 {
        return Vec::new();
    }
    sum.into_iter().map(|v| (v / count as f64) as f32).collect()
}
