//! Type definitions for the consolidation engine
//!
//! These records are the contract between pipeline stages: the decay stage
//! produces [`RelevanceScore`]s, association produces [`MemoryAssociation`]s,
//! clustering produces [`MemoryCluster`]s, and every stage reads [`Memory`].
//! Metadata is a typed map with a small set of well-known keys accessed only
//! through the explicit getters/setters below - never raw key plumbing at
//! call sites.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

use crate::constants::{IMPORTANT_TAG_CLASSES, PROTECTED_TAG_CLASSES, TRANSIENT_TAG_CLASSES};

/// Well-known metadata keys
///
/// The only keys the engine itself reads or writes. Hosts may store
/// anything else; the engine carries it through untouched.
pub mod meta_keys {
    pub const IMPORTANCE_SCORE: &str = "importance_score";
    pub const RELEVANCE_SCORE: &str = "relevance_score";
    pub const RELEVANCE_CALCULATED_AT: &str = "relevance_calculated_at";
    pub const DECAY_FACTOR: &str = "decay_factor";
    pub const CONNECTION_BOOST: &str = "connection_boost";
    pub const ACCESS_BOOST: &str = "access_boost";
    pub const CLUSTER_ID: &str = "cluster_id";
    pub const SOURCE_MEMORY_HASHES: &str = "source_memory_hashes";
    pub const COMPRESSED_AT: &str = "compressed_at";
    pub const ASSOCIATION_PAIR: &str = "association_pair";
}

/// Type of a stored memory, ordered by how aggressively it may be forgotten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Never decays below the protected floor, never archived
    Critical,
    /// Long-lived lookup material
    Reference,
    /// Engine-synthesized knowledge (summaries, association records)
    Learned,
    /// Default for ordinary conversational memories
    Standard,
    /// Short-lived working notes
    Temporary,
}

impl Default for MemoryType {
    fn default() -> Self {
        MemoryType::Standard
    }
}

impl MemoryType {
    /// Stable label used in serialized records and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Critical => "critical",
            MemoryType::Reference => "reference",
            MemoryType::Learned => "learned",
            MemoryType::Standard => "standard",
            MemoryType::Temporary => "temporary",
        }
    }
}

/// Stored memory with metadata
///
/// Identity is `content_hash`. Everything except `metadata` and
/// `updated_at` is immutable; metadata is mutated only by the decay stage
/// (score provenance write-back) and the compressor (summary markers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Raw memory content
    pub content: String,

    /// SHA-256 of the content, hex-encoded - the stable identity
    pub content_hash: String,

    /// User and engine tags; sorted for stable serialization
    pub tags: BTreeSet<String>,

    /// Retention class of this memory
    pub memory_type: MemoryType,

    /// Embedding vector, when the host has computed one.
    /// The engine never computes embeddings itself; absence routes a memory
    /// onto the embedding-free code paths.
    pub embedding: Option<Vec<f32>>,

    /// Typed metadata map - access through the getters below
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Creation time, unix seconds
    pub created_at: f64,

    /// Last mutation time, unix seconds
    pub updated_at: f64,
}

impl Memory {
    /// Create a new memory, hashing the content for identity
    pub fn new(
        content: impl Into<String>,
        memory_type: MemoryType,
        tags: impl IntoIterator<Item = String>,
        created_at: f64,
    ) -> Self {
        let content = content.into();
        let content_hash = hash_content(&content);
        Self {
            content,
            content_hash,
            tags: tags.into_iter().collect(),
            memory_type,
            embedding: None,
            metadata: HashMap::new(),
            created_at,
            updated_at: created_at,
        }
    }

    /// Attach an embedding (builder style)
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Age in days relative to `now`
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        ((now.timestamp_millis() as f64 / 1000.0) - self.created_at) / 86_400.0
    }

    /// Creation time as a `DateTime`
    pub fn created_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt((self.created_at * 1000.0) as i64)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Explicit importance score from metadata, if the host set one
    pub fn importance_score(&self) -> Option<f64> {
        self.metadata
            .get(meta_keys::IMPORTANCE_SCORE)
            .and_then(|v| v.as_f64())
    }

    /// Relevance score written back by the last decay run, if any
    pub fn relevance_score(&self) -> Option<f64> {
        self.metadata
            .get(meta_keys::RELEVANCE_SCORE)
            .and_then(|v| v.as_f64())
    }

    /// Whether this memory is exempt from the relevance floor and from
    /// archival: critical type, or any protect-class tag
    pub fn is_protected(&self) -> bool {
        self.memory_type == MemoryType::Critical || self.has_tag_in(PROTECTED_TAG_CLASSES)
    }

    /// Whether any tag falls in an important class
    pub fn has_important_tag(&self) -> bool {
        self.has_tag_in(IMPORTANT_TAG_CLASSES)
    }

    /// Whether any tag falls in a transient class
    pub fn has_transient_tag(&self) -> bool {
        self.has_tag_in(TRANSIENT_TAG_CLASSES)
    }

    fn has_tag_in(&self, classes: &[&str]) -> bool {
        self.tags
            .iter()
            .any(|t| classes.iter().any(|c| t.eq_ignore_ascii_case(c)))
    }

    /// Set a metadata value and bump `updated_at`
    pub fn set_meta(&mut self, key: &str, value: serde_json::Value, now: DateTime<Utc>) {
        self.metadata.insert(key.to_string(), value);
        self.updated_at = now.timestamp_millis() as f64 / 1000.0;
    }
}

/// Hash content for stable memory identity
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Relevance score for one memory in one consolidation run
///
/// Transient: never persisted as its own entity, only summarized back into
/// the memory's metadata by the decay stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceScore {
    pub memory_hash: String,

    /// Final score: `base_importance * decay_factor + boosts`, clamped to
    /// the protected floor when applicable. Always >= 0.
    pub total_score: f64,

    /// Age/type-dependent multiplier in [0, 1]
    pub decay_factor: f64,

    /// Importance before decay, from explicit metadata or tag classes
    pub base_importance: f64,

    /// Bounded monotone boost from the memory's connection count
    pub connection_boost: f64,

    /// Bounded boost from access recency
    pub access_boost: f64,

    /// Whether the protected floor applied to this memory
    pub is_protected: bool,

    /// Connection count used for the boost
    pub connection_count: usize,

    /// Retention period that parameterized the decay curve
    pub retention_period_days: f64,

    /// Days since last recorded access, when the host tracks access
    pub days_since_access: Option<f64>,
}

/// Why two memories were judged to be connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionReason {
    /// Concepts (identifiers, URLs, addresses) extracted from both contents
    SharedConcepts,
    /// Tag sets intersect
    SharedTags,
    /// Question/answer or problem/solution pairing
    Complementary,
    /// Both contents share structural markers (headers, lists, code fences)
    StructuralEcho,
    /// Created within the same day
    TemporalProximity,
    /// Embedding similarity inside the sweet-spot window
    SemanticSimilarity,
}

impl ConnectionReason {
    /// Stable label used as `connection_type` on persisted associations.
    /// Variants are declared in salience order; the dominant reason is the
    /// smallest one present in an analysis.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionReason::SharedConcepts => "shared_concepts",
            ConnectionReason::SharedTags => "shared_tags",
            ConnectionReason::Complementary => "complementary_content",
            ConnectionReason::StructuralEcho => "structural_echo",
            ConnectionReason::TemporalProximity => "temporal_proximity",
            ConnectionReason::SemanticSimilarity => "semantic_similarity",
        }
    }
}

/// Temporal relationship between a pair of memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalRelation {
    SameDay,
    SameWeek,
    SameMonth,
    Distant,
}

impl TemporalRelation {
    /// Classify from the absolute gap between creation times (unix seconds)
    pub fn classify(created_a: f64, created_b: f64) -> Self {
        let gap_days = (created_a - created_b).abs() / 86_400.0;
        if gap_days < 1.0 {
            TemporalRelation::SameDay
        } else if gap_days < 7.0 {
            TemporalRelation::SameWeek
        } else if gap_days < 30.0 {
            TemporalRelation::SameMonth
        } else {
            TemporalRelation::Distant
        }
    }
}

/// Intermediate analysis of one candidate pair - never persisted
#[derive(Debug, Clone, Default)]
pub struct AssociationAnalysis {
    pub connection_reasons: BTreeSet<ConnectionReason>,
    pub shared_concepts: Vec<String>,
    pub tag_overlap: BTreeSet<String>,
    pub temporal_relationship: Option<TemporalRelation>,
    pub confidence_score: f64,
}

impl AssociationAnalysis {
    /// The most salient reason, by the declared salience order
    pub fn dominant_reason(&self) -> Option<ConnectionReason> {
        self.connection_reasons.iter().next().copied()
    }
}

/// A discovered connection between two memories
///
/// Immutable after creation; a superseding discovery is a new record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryAssociation {
    /// The connected pair, stored in sorted order
    pub source_memory_hashes: (String, String),

    /// Similarity that placed the pair inside the sweet-spot window
    pub similarity_score: f64,

    /// Dominant reason label, e.g. "shared_tags"
    pub connection_type: String,

    /// Always "creative_association" for records from this engine
    pub discovery_method: String,

    pub discovery_date: DateTime<Utc>,

    /// Every reason the analysis detected, dominant first is not implied;
    /// `connection_type` carries the dominant one
    pub connection_reasons: Vec<String>,

    /// Concepts found in both contents
    pub shared_concepts: Vec<String>,

    /// Blended confidence in [0, 1]
    pub confidence_score: f64,

    /// Heuristic generation that produced this record
    pub analysis_version: u32,
}

impl MemoryAssociation {
    /// Canonical (sorted) form of a pair, independent of ordering
    pub fn canonical_pair(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    /// Whether this association involves the given memory
    pub fn involves(&self, content_hash: &str) -> bool {
        self.source_memory_hashes.0 == content_hash || self.source_memory_hashes.1 == content_hash
    }
}

/// A themed group of related memories produced by one clustering run
///
/// Clusters are superseded, not updated: the next run recomputes from
/// scratch and the previous generation is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCluster {
    pub cluster_id: String,

    /// Member identities; always >= the configured minimum cluster size
    pub memory_hashes: BTreeSet<String>,

    /// Mean embedding of the members
    pub centroid_embedding: Vec<f32>,

    /// Mean member-to-centroid similarity, in [0, 1]
    pub coherence_score: f64,

    pub created_at: DateTime<Utc>,

    /// Most frequent tags and salient content tokens across members
    pub theme_keywords: Vec<String>,

    /// Effective algorithm that produced this cluster; merged clusters are
    /// tagged "<algorithm>_merged"
    pub algorithm: String,

    /// Mean member age in days at clustering time
    pub average_memory_age_days: f64,

    /// Per-tag frequency across members
    pub tag_distribution: HashMap<String, usize>,
}

impl MemoryCluster {
    pub fn size(&self) -> usize {
        self.memory_hashes.len()
    }
}
