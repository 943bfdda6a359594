//! Creative association discovery
//!
//! Finds non-obvious connections between memory pairs. The core idea is the
//! sweet-spot similarity window: pairs below it are unrelated noise, pairs
//! above it are near-duplicates, and only the middle band is worth analyzing
//! - that is where the interesting, non-obvious connections live.
//!
//! Candidate pairs are sampled deterministically down to a per-run cap, so
//! a large store never triggers a full O(n^2) sweep; repeated runs with
//! fresh seeds gradually cover the pair space. Surviving pairs go through a
//! battery of cheap heuristics (shared concepts, tag overlap, temporal
//! proximity, structural echo, complementary content) whose agreement feeds
//! a monotone confidence score.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::Utc;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::ConsolidationConfig;
use crate::constants::{
    ASSOCIATION_ANALYSIS_VERSION, CONFIDENCE_CONCEPT_SATURATION, CONFIDENCE_CONCEPT_WEIGHT,
    CONFIDENCE_REASON_SATURATION, CONFIDENCE_REASON_WEIGHT, CONFIDENCE_SIMILARITY_WEIGHT,
    CONFIDENCE_TAG_SATURATION, CONFIDENCE_TAG_WEIGHT, CONTENT_ANALYSIS_MAX_BYTES,
    MIN_ASSOCIATION_CONFIDENCE,
};
use crate::similarity::memory_similarity;
use crate::types::{
    AssociationAnalysis, ConnectionReason, Memory, MemoryAssociation, TemporalRelation,
};

/// Discovery method label on every association from this engine
pub const DISCOVERY_METHOD: &str = "creative_association";

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s)>\]]+").expect("hardcoded regex"));
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("hardcoded regex")
});
static CAMEL_CASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-z]+(?:[A-Z][a-z0-9]+)+\b").expect("hardcoded regex"));
static SNAKE_CASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[a-z][a-z0-9]*(?:_[a-z0-9]+)+\b").expect("hardcoded regex"));

/// Pairwise sweet-spot similarity discovery with heuristic analysis
#[derive(Debug)]
pub struct AssociationEngine {
    min_similarity: f64,
    max_similarity: f64,
    max_pairs_per_run: usize,
    sampling_seed: u64,
}

impl AssociationEngine {
    pub fn new(config: &ConsolidationConfig) -> Self {
        Self {
            min_similarity: config.min_similarity,
            max_similarity: config.max_similarity,
            max_pairs_per_run: config.max_pairs_per_run,
            sampling_seed: config.sampling_seed,
        }
    }

    /// Discover associations among the snapshot's memories
    ///
    /// Pairs already present in `existing_associations` (either ordering)
    /// are skipped. Fewer than two memories yields empty output.
    pub fn process(
        &self,
        memories: &[Memory],
        existing_associations: &HashSet<(String, String)>,
    ) -> Vec<MemoryAssociation> {
        if memories.len() < 2 {
            return Vec::new();
        }

        let candidates = self.candidate_pairs(memories.len());
        let evaluated = candidates.len();

        let associations: Vec<MemoryAssociation> = candidates
            .par_iter()
            .map(|&(i, j)| {
                let (a, b) = (&memories[i], &memories[j]);
                if known_pair(existing_associations, &a.content_hash, &b.content_hash) {
                    return None;
                }
                self.analyze_pair(a, b)
            })
            .collect::<Vec<Option<MemoryAssociation>>>()
            .into_iter()
            .flatten()
            .collect();

        debug!(
            pairs_evaluated = evaluated,
            associations_found = associations.len(),
            "Association discovery complete"
        );

        associations
    }

    /// Candidate (i, j) index pairs, sampled down to the cap when the full
    /// pair space is too large
    fn candidate_pairs(&self, n: usize) -> Vec<(usize, usize)> {
        let total = n * (n - 1) / 2;
        if total <= self.max_pairs_per_run {
            let mut pairs = Vec::with_capacity(total);
            for i in 0..n {
                for j in (i + 1)..n {
                    pairs.push((i, j));
                }
            }
            return pairs;
        }

        // Uniform sample over the flattened pair-index space, seeded so
        // runs are reproducible
        let mut rng = StdRng::seed_from_u64(self.sampling_seed);
        let picks = rand::seq::index::sample(&mut rng, total, self.max_pairs_per_run);
        let mut pairs: Vec<(usize, usize)> =
            picks.iter().map(|k| pair_from_index(k, n)).collect();
        pairs.sort_unstable();
        pairs
    }

    /// Analyze one candidate pair, returning an association if it lands in
    /// the sweet spot and clears the confidence gate
    fn analyze_pair(&self, a: &Memory, b: &Memory) -> Option<MemoryAssociation> {
        let similarity = memory_similarity(a, b);

        // Below the window: unrelated. Above it: near-duplicate, nothing
        // creative to surface.
        if similarity < self.min_similarity || similarity > self.max_similarity {
            return None;
        }

        let analysis = analyze_contents(a, b, similarity);
        if analysis.confidence_score < MIN_ASSOCIATION_CONFIDENCE {
            return None;
        }

        let connection_type = analysis
            .dominant_reason()
            .map(|r| r.as_str().to_string())
            .unwrap_or_else(|| ConnectionReason::SemanticSimilarity.as_str().to_string());

        Some(MemoryAssociation {
            source_memory_hashes: MemoryAssociation::canonical_pair(
                &a.content_hash,
                &b.content_hash,
            ),
            similarity_score: similarity,
            connection_type,
            discovery_method: DISCOVERY_METHOD.to_string(),
            discovery_date: Utc::now(),
            connection_reasons: analysis
                .connection_reasons
                .iter()
                .map(|r| r.as_str().to_string())
                .collect(),
            shared_concepts: analysis.shared_concepts.clone(),
            confidence_score: analysis.confidence_score,
            analysis_version: ASSOCIATION_ANALYSIS_VERSION,
        })
    }
}

/// Keep only associations at or above `min_confidence`
pub fn filter_high_confidence_associations(
    associations: &[MemoryAssociation],
    min_confidence: f64,
) -> Vec<MemoryAssociation> {
    associations
        .iter()
        .filter(|a| a.confidence_score >= min_confidence)
        .cloned()
        .collect()
}

/// Group associations by their dominant connection type
pub fn group_associations_by_type(
    associations: &[MemoryAssociation],
) -> HashMap<String, Vec<MemoryAssociation>> {
    let mut groups: HashMap<String, Vec<MemoryAssociation>> = HashMap::new();
    for association in associations {
        groups
            .entry(association.connection_type.clone())
            .or_default()
            .push(association.clone());
    }
    groups
}

/// Whether a pair is already known, in either ordering
fn known_pair(existing: &HashSet<(String, String)>, a: &str, b: &str) -> bool {
    existing.contains(&(a.to_string(), b.to_string()))
        || existing.contains(&(b.to_string(), a.to_string()))
}

/// Map a flat index into the upper-triangular pair space to (i, j), i < j
fn pair_from_index(mut k: usize, n: usize) -> (usize, usize) {
    let mut i = 0;
    let mut row = n - 1;
    while k >= row {
        k -= row;
        i += 1;
        row -= 1;
    }
    (i, i + 1 + k)
}

/// Run the heuristic battery over a pair that passed the window filter
fn analyze_contents(a: &Memory, b: &Memory, similarity: f64) -> AssociationAnalysis {
    let mut analysis = AssociationAnalysis {
        confidence_score: 0.0,
        ..Default::default()
    };

    // Being inside the window is itself a (weak) reason
    analysis
        .connection_reasons
        .insert(ConnectionReason::SemanticSimilarity);

    let content_a = analysis_slice(&a.content, &a.content_hash);
    let content_b = analysis_slice(&b.content, &b.content_hash);

    let concepts_a = extract_concepts(content_a);
    let concepts_b = extract_concepts(content_b);
    analysis.shared_concepts = concepts_a.intersection(&concepts_b).cloned().collect();
    if !analysis.shared_concepts.is_empty() {
        analysis
            .connection_reasons
            .insert(ConnectionReason::SharedConcepts);
    }

    analysis.tag_overlap = a.tags.intersection(&b.tags).cloned().collect();
    if !analysis.tag_overlap.is_empty() {
        analysis
            .connection_reasons
            .insert(ConnectionReason::SharedTags);
    }

    let temporal = TemporalRelation::classify(a.created_at, b.created_at);
    analysis.temporal_relationship = Some(temporal);
    if temporal == TemporalRelation::SameDay {
        analysis
            .connection_reasons
            .insert(ConnectionReason::TemporalProximity);
    }

    let markers_a = structural_markers(content_a);
    let markers_b = structural_markers(content_b);
    if markers_a.intersection(&markers_b).next().is_some() {
        analysis
            .connection_reasons
            .insert(ConnectionReason::StructuralEcho);
    }

    if is_complementary(content_a, content_b) {
        analysis
            .connection_reasons
            .insert(ConnectionReason::Complementary);
    }

    analysis.confidence_score = confidence(
        similarity,
        analysis.connection_reasons.len(),
        analysis.shared_concepts.len(),
        analysis.tag_overlap.len(),
    );

    analysis
}

/// Clamp pathological content to an analyzable prefix
///
/// Minified blobs or binary dumps would otherwise dominate the regex pass;
/// one bad item must never stall the batch.
fn analysis_slice<'a>(content: &'a str, content_hash: &str) -> &'a str {
    if content.len() <= CONTENT_ANALYSIS_MAX_BYTES {
        return content;
    }
    warn!(
        memory = %&content_hash[..12.min(content_hash.len())],
        bytes = content.len(),
        "Content exceeds analysis limit, truncating for concept extraction"
    );
    let mut end = CONTENT_ANALYSIS_MAX_BYTES;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

/// Extract concept-like tokens: URLs, email addresses, camelCase and
/// snake_case identifiers
fn extract_concepts(content: &str) -> BTreeSet<String> {
    let mut concepts = BTreeSet::new();
    for re in [&*URL_RE, &*EMAIL_RE, &*CAMEL_CASE_RE, &*SNAKE_CASE_RE] {
        for m in re.find_iter(content) {
            concepts.insert(m.as_str().to_string());
        }
    }
    concepts
}

/// Structural markers detected independently of content similarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum StructuralMarker {
    Heading,
    BulletList,
    NumberedList,
    CodeFence,
}

fn structural_markers(content: &str) -> BTreeSet<StructuralMarker> {
    let mut markers = BTreeSet::new();
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            markers.insert(StructuralMarker::Heading);
        } else if trimmed.starts_with("- ") || trimmed.starts_with("* ") {
            markers.insert(StructuralMarker::BulletList);
        } else if trimmed
            .split_once('.')
            .is_some_and(|(head, rest)| head.chars().all(|c| c.is_ascii_digit()) && !head.is_empty() && rest.starts_with(' '))
        {
            markers.insert(StructuralMarker::NumberedList);
        } else if trimmed.starts_with("```") {
            markers.insert(StructuralMarker::CodeFence);
        }
    }
    markers
}

const QUESTION_HINTS: &[&str] = &["how do", "how to", "what is", "why does", "where is"];
const PROBLEM_HINTS: &[&str] = &["error", "bug", "problem", "failed", "broken", "crash"];
const RESOLUTION_HINTS: &[&str] = &[
    "because", "answer", "solution", "solved", "fixed", "resolved", "workaround",
];

/// Question <-> answer or problem <-> solution pairing
fn is_complementary(content_a: &str, content_b: &str) -> bool {
    let lower_a = content_a.to_lowercase();
    let lower_b = content_b.to_lowercase();

    let asks = |s: &str| s.contains('?') || QUESTION_HINTS.iter().any(|h| s.contains(h));
    let complains = |s: &str| PROBLEM_HINTS.iter().any(|h| s.contains(h));
    let resolves = |s: &str| RESOLUTION_HINTS.iter().any(|h| s.contains(h));

    (asks(&lower_a) && resolves(&lower_b))
        || (asks(&lower_b) && resolves(&lower_a))
        || (complains(&lower_a) && resolves(&lower_b))
        || (complains(&lower_b) && resolves(&lower_a))
}

/// Saturating weighted confidence blend
///
/// Monotone in every input: more similarity, more agreeing reasons, more
/// shared concepts, and more shared tags can only raise confidence.
fn confidence(similarity: f64, reason_count: usize, concept_count: usize, tag_count: usize) -> f64 {
    let reason_term =
        (reason_count as f64 / CONFIDENCE_REASON_SATURATION as f64).min(1.0);
    let concept_term =
        (concept_count as f64 / CONFIDENCE_CONCEPT_SATURATION as f64).min(1.0);
    let tag_term = (tag_count as f64 / CONFIDENCE_TAG_SATURATION as f64).min(1.0);

    (CONFIDENCE_SIMILARITY_WEIGHT * similarity
        + CONFIDENCE_REASON_WEIGHT * reason_term
        + CONFIDENCE_CONCEPT_WEIGHT * concept_term
        + CONFIDENCE_TAG_WEIGHT * tag_term)
        .min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryType;

    fn engine() -> AssociationEngine {
        AssociationEngine::new(&ConsolidationConfig::default())
    }

    fn embedded(content: &str, tags: &[&str], embedding: Vec<f32>) -> Memory {
        let now = Utc::now().timestamp() as f64;
        Memory::new(
            content,
            MemoryType::Standard,
            tags.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
            now,
        )
        .with_embedding(embedding)
    }

    /// Embeddings engineered so cosine(a, b) = 0.5
    fn half_similar_pair() -> (Memory, Memory) {
        let a = embedded(
            "deployment checklist for the ingestion service",
            &["deploy", "runbook"],
            vec![1.0, 0.0],
        );
        let b = embedded(
            "postmortem notes from the ingestion incident",
            &["runbook", "incident"],
            vec![0.5, 0.866_025_4],
        );
        (a, b)
    }

    #[test]
    fn test_fewer_than_two_memories_is_empty() {
        let (a, _) = half_similar_pair();
        assert!(engine().process(&[], &HashSet::new()).is_empty());
        assert!(engine().process(&[a], &HashSet::new()).is_empty());
    }

    #[test]
    fn test_sweet_spot_pair_with_shared_tags() {
        let (a, b) = half_similar_pair();
        let associations = engine().process(&[a, b], &HashSet::new());

        assert_eq!(associations.len(), 1);
        let assoc = &associations[0];
        assert!((assoc.similarity_score - 0.5).abs() < 0.01);
        assert!(assoc
            .connection_reasons
            .iter()
            .any(|r| r == "shared_tags"));
        assert_eq!(assoc.discovery_method, DISCOVERY_METHOD);
        assert_eq!(assoc.analysis_version, ASSOCIATION_ANALYSIS_VERSION);
    }

    #[test]
    fn test_similarity_window_is_enforced() {
        let unrelated = embedded("alpha", &[], vec![1.0, 0.0]);
        let orthogonal = embedded("beta", &[], vec![0.0, 1.0]);
        let near_duplicate_a = embedded("gamma one", &[], vec![1.0, 0.01]);
        let near_duplicate_b = embedded("gamma two", &[], vec![1.0, 0.02]);

        let associations = engine().process(
            &[unrelated, orthogonal, near_duplicate_a, near_duplicate_b],
            &HashSet::new(),
        );

        for assoc in &associations {
            assert!(assoc.similarity_score >= 0.3);
            assert!(assoc.similarity_score <= 0.7);
        }
    }

    #[test]
    fn test_existing_pairs_skipped_in_both_orderings() {
        let (a, b) = half_similar_pair();

        let mut forward = HashSet::new();
        forward.insert((a.content_hash.clone(), b.content_hash.clone()));
        assert!(engine()
            .process(&[a.clone(), b.clone()], &forward)
            .is_empty());

        let mut reverse = HashSet::new();
        reverse.insert((b.content_hash.clone(), a.content_hash.clone()));
        assert!(engine().process(&[a, b], &reverse).is_empty());
    }

    #[test]
    fn test_pair_sampling_is_deterministic_and_capped() {
        let config = ConsolidationConfig {
            max_pairs_per_run: 10,
            sampling_seed: 7,
            ..Default::default()
        };
        let engine = AssociationEngine::new(&config);

        let first = engine.candidate_pairs(30);
        let second = engine.candidate_pairs(30);
        assert_eq!(first, second, "same seed, same sample");
        assert_eq!(first.len(), 10);
        for &(i, j) in &first {
            assert!(i < j && j < 30);
        }

        let other_seed = AssociationEngine::new(&ConsolidationConfig {
            max_pairs_per_run: 10,
            sampling_seed: 8,
            ..Default::default()
        });
        assert_ne!(other_seed.candidate_pairs(30), first);
    }

    #[test]
    fn test_pair_from_index_covers_triangle() {
        let n = 6;
        let total = n * (n - 1) / 2;
        let mut seen = HashSet::new();
        for k in 0..total {
            let (i, j) = pair_from_index(k, n);
            assert!(i < j && j < n);
            assert!(seen.insert((i, j)), "duplicate pair for index {k}");
        }
        assert_eq!(seen.len(), total);
    }

    #[test]
    fn test_concept_extraction_token_classes() {
        let concepts = extract_concepts(
            "See https://docs.internal/runbook and ping ops@example.com; \
             the retryBudget and max_backoff_secs fields control it",
        );
        assert!(concepts.contains("https://docs.internal/runbook"));
        assert!(concepts.contains("ops@example.com"));
        assert!(concepts.contains("retryBudget"));
        assert!(concepts.contains("max_backoff_secs"));
    }

    #[test]
    fn test_structural_echo_detection() {
        let a = "# Plan\n- step one\n- step two";
        let b = "# Retro\n- what went well";
        let shared: Vec<_> = structural_markers(a)
            .intersection(&structural_markers(b))
            .cloned()
            .collect();
        assert!(shared.contains(&StructuralMarker::Heading));
        assert!(shared.contains(&StructuralMarker::BulletList));

        assert!(structural_markers("```rust\nfn main() {}\n```")
            .contains(&StructuralMarker::CodeFence));
        assert!(structural_markers("1. first\n2. second")
            .contains(&StructuralMarker::NumberedList));
    }

    #[test]
    fn test_complementary_detection() {
        assert!(is_complementary(
            "How do we rotate the signing keys?",
            "Rotation is solved by the weekly cron that re-issues certs",
        ));
        assert!(is_complementary(
            "The exporter crashed with an assertion error",
            "Fixed by pinning the protobuf version",
        ));
        assert!(!is_complementary("grocery list", "weather was nice"));
    }

    #[test]
    fn test_confidence_is_monotone() {
        let base = confidence(0.5, 1, 0, 0);
        assert!(confidence(0.6, 1, 0, 0) > base);
        assert!(confidence(0.5, 2, 0, 0) > base);
        assert!(confidence(0.5, 1, 1, 0) > base);
        assert!(confidence(0.5, 1, 0, 1) > base);
        assert!(confidence(1.0, 10, 10, 10) <= 1.0);
    }

    #[test]
    fn test_grouping_by_type() {
        let (a, b) = half_similar_pair();
        let associations = engine().process(&[a, b], &HashSet::new());
        let groups = group_associations_by_type(&associations);
        assert_eq!(groups.values().map(Vec::len).sum::<usize>(), associations.len());
        for (connection_type, members) in &groups {
            assert!(members.iter().all(|m| &m.connection_type == connection_type));
        }
    }

    #[test]
    fn test_high_confidence_filter() {
        let (a, b) = half_similar_pair();
        let associations = engine().process(&[a, b], &HashSet::new());
        let strict = filter_high_confidence_associations(&associations, 0.99);
        assert!(strict.len() <= associations.len());
        let lax = filter_high_confidence_associations(&associations, 0.0);
        assert_eq!(lax.len(), associations.len());
    }
}
