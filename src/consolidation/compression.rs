//! Cluster compression
//!
//! Condenses each coherent cluster into a single synthetic summary memory:
//! an extractive digest of the members, tagged with the cluster's themes and
//! a consolidation marker, carrying the member hashes in metadata so the
//! originals stay reachable from the summary. When `preserve_originals` is
//! off, the member hashes are surfaced to the forgetting stage as candidates
//! in the same run - compression alone never deletes anything.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::ConsolidationConfig;
use crate::constants::CONSOLIDATION_MARKER_TAG;
use crate::types::{meta_keys, Memory, MemoryCluster, MemoryType};

/// Produces cluster summaries
#[derive(Debug)]
pub struct ClusterCompressor {
    max_summary_length: usize,
    preserve_originals: bool,
    keyword_extractor: KeywordExtractor,
}

impl ClusterCompressor {
    pub fn new(config: &ConsolidationConfig) -> Self {
        Self {
            max_summary_length: config.max_summary_length,
            preserve_originals: config.preserve_originals,
            keyword_extractor: KeywordExtractor::new(),
        }
    }

    /// Synthesize one summary memory per cluster
    ///
    /// Clusters whose members cannot be resolved against the snapshot are
    /// skipped with a warning; one stale cluster never aborts the batch.
    pub fn process(&self, clusters: &[MemoryCluster], memories: &[Memory]) -> Vec<Memory> {
        let by_hash: HashMap<&str, &Memory> = memories
            .iter()
            .map(|m| (m.content_hash.as_str(), m))
            .collect();

        let mut summaries = Vec::with_capacity(clusters.len());
        for cluster in clusters {
            let members: Vec<&Memory> = cluster
                .memory_hashes
                .iter()
                .filter_map(|h| by_hash.get(h.as_str()).copied())
                .collect();

            if members.len() < 2 {
                warn!(
                    cluster_id = %cluster.cluster_id,
                    resolved = members.len(),
                    expected = cluster.size(),
                    "Cluster members missing from snapshot, skipping summary"
                );
                continue;
            }

            summaries.push(self.summarize_cluster(cluster, &members));
        }

        debug!(
            clusters = clusters.len(),
            summaries = summaries.len(),
            "Cluster compression complete"
        );
        summaries
    }

    /// Member hashes freed for forgetting once their summary exists
    ///
    /// Empty when originals are preserved.
    pub fn released_originals(&self, clusters: &[MemoryCluster]) -> BTreeSet<String> {
        if self.preserve_originals {
            return BTreeSet::new();
        }
        clusters
            .iter()
            .flat_map(|c| c.memory_hashes.iter().cloned())
            .collect()
    }

    fn summarize_cluster(&self, cluster: &MemoryCluster, members: &[&Memory]) -> Memory {
        let now = Utc::now();
        let themes = cluster.theme_keywords.join(", ");

        let mut content = format!(
            "Consolidated summary of {} related memories. Themes: {}. ",
            members.len(),
            themes
        );
        for member in members {
            content.push_str(lead_fragment(&member.content));
            content.push_str("; ");
        }
        content.push_str("Sources: ");
        let source_refs: Vec<&str> = members
            .iter()
            .map(|m| &m.content_hash[..12.min(m.content_hash.len())])
            .collect();
        content.push_str(&source_refs.join(", "));

        let content = truncate_at_char_boundary(&content, self.max_summary_length);

        let mut tags: Vec<String> = cluster.theme_keywords.clone();
        tags.push(CONSOLIDATION_MARKER_TAG.to_string());

        let mut summary = Memory::new(
            content,
            MemoryType::Learned,
            tags,
            now.timestamp_millis() as f64 / 1000.0,
        )
        .with_embedding(cluster.centroid_embedding.clone());

        summary.set_meta(meta_keys::CLUSTER_ID, json!(cluster.cluster_id), now);
        summary.set_meta(
            meta_keys::SOURCE_MEMORY_HASHES,
            json!(cluster.memory_hashes.iter().collect::<Vec<_>>()),
            now,
        );
        summary.set_meta(meta_keys::COMPRESSED_AT, json!(now.to_rfc3339()), now);
        summary
    }
}

/// First line of content, clipped to a short fragment
fn lead_fragment(content: &str) -> &str {
    let first_line = content.lines().next().unwrap_or("");
    truncate_at_char_boundary(first_line, 60)
}

fn truncate_at_char_boundary(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Keyword extraction shared by compression and cluster theming
#[derive(Debug)]
pub(crate) struct KeywordExtractor {
    stop_words: HashSet<&'static str>,
}

impl KeywordExtractor {
    pub(crate) fn new() -> Self {
        Self {
            stop_words: STOP_WORDS.iter().copied().collect(),
        }
    }

    /// Frequency-ranked keywords, stop words removed
    pub(crate) fn extract(&self, text: &str, limit: usize) -> Vec<String> {
        let mut word_freq: HashMap<String, usize> = HashMap::new();

        for word in text.split_whitespace() {
            let clean: String = word
                .to_lowercase()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect();

            if clean.len() > 2 && !self.stop_words.contains(clean.as_str()) {
                *word_freq.entry(clean).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = word_freq.into_iter().collect();
        // Alphabetical tiebreak keeps extraction deterministic
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        ranked.into_iter().take(limit).map(|(w, _)| w).collect()
    }
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "was", "were", "are", "have", "has", "had",
    "been", "will", "would", "could", "should", "can", "may", "might", "must", "from", "about",
    "into", "through", "during", "before", "after", "above", "below", "over", "under", "again",
    "then", "once", "there", "these", "those", "its", "what", "which", "who", "whom", "whose",
    "where", "when", "why", "how", "all", "both", "each", "few", "more", "most", "other", "some",
    "such", "nor", "not", "only", "own", "same", "than", "too", "very", "just", "but",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hash_content;
    use uuid::Uuid;

    fn member(content: &str) -> Memory {
        Memory::new(
            content,
            MemoryType::Standard,
            vec!["infra".to_string()],
            Utc::now().timestamp() as f64,
        )
    }

    fn cluster_of(members: &[Memory]) -> MemoryCluster {
        MemoryCluster {
            cluster_id: Uuid::new_v4().to_string(),
            memory_hashes: members.iter().map(|m| m.content_hash.clone()).collect(),
            centroid_embedding: vec![0.1, 0.2, 0.3],
            coherence_score: 0.8,
            created_at: Utc::now(),
            theme_keywords: vec!["deploy".to_string(), "rollback".to_string()],
            algorithm: "simple".to_string(),
            average_memory_age_days: 12.0,
            tag_distribution: HashMap::new(),
        }
    }

    #[test]
    fn test_summary_per_cluster() {
        let members = vec![
            member("deploy to staging went fine"),
            member("rollback plan for the deploy"),
            member("deploy window moved to friday"),
        ];
        let cluster = cluster_of(&members);
        let compressor = ClusterCompressor::new(&ConsolidationConfig::default());

        let summaries = compressor.process(std::slice::from_ref(&cluster), &members);
        assert_eq!(summaries.len(), 1);

        let summary = &summaries[0];
        assert_eq!(summary.memory_type, MemoryType::Learned);
        assert!(summary.tags.contains(CONSOLIDATION_MARKER_TAG));
        assert!(summary.tags.contains("deploy"));
        assert!(summary.embedding.is_some());

        let sources = summary
            .metadata
            .get(meta_keys::SOURCE_MEMORY_HASHES)
            .and_then(|v| v.as_array())
            .expect("source hashes recorded");
        assert_eq!(sources.len(), 3);
    }

    #[test]
    fn test_summary_respects_length_cap() {
        let long_members: Vec<Memory> = (0..10)
            .map(|i| member(&format!("memory number {i} {}", "padding ".repeat(50))))
            .collect();
        let cluster = cluster_of(&long_members);
        let config = ConsolidationConfig {
            max_summary_length: 200,
            ..Default::default()
        };
        let compressor = ClusterCompressor::new(&config);

        let summaries = compressor.process(std::slice::from_ref(&cluster), &long_members);
        assert!(summaries[0].content.len() <= 200);
    }

    #[test]
    fn test_unresolvable_cluster_skipped() {
        let members = vec![member("present")];
        let mut cluster = cluster_of(&members);
        cluster
            .memory_hashes
            .insert(hash_content("never stored anywhere"));

        let compressor = ClusterCompressor::new(&ConsolidationConfig::default());
        // Only one member resolves; too thin to summarize
        let summaries = compressor.process(std::slice::from_ref(&cluster), &members);
        assert!(summaries.is_empty());
    }

    #[test]
    fn test_released_originals_follows_preserve_flag() {
        let members = vec![member("one"), member("two"), member("three")];
        let cluster = cluster_of(&members);

        let preserving = ClusterCompressor::new(&ConsolidationConfig::default());
        assert!(preserving
            .released_originals(std::slice::from_ref(&cluster))
            .is_empty());

        let releasing = ClusterCompressor::new(&ConsolidationConfig {
            preserve_originals: false,
            ..Default::default()
        });
        assert_eq!(
            releasing
                .released_originals(std::slice::from_ref(&cluster))
                .len(),
            3
        );
    }

    #[test]
    fn test_keyword_extractor_drops_stop_words() {
        let extractor = KeywordExtractor::new();
        let keywords = extractor.extract(
            "the deploy failed and the deploy was retried after the deploy window",
            5,
        );
        assert_eq!(keywords[0], "deploy");
        assert!(!keywords.iter().any(|k| k == "the" || k == "and"));
    }
}
