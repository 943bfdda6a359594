//! Documented constants for the consolidation engine
//!
//! This module contains all tunable parameters with justification for their
//! values. Centralizing constants prevents magic numbers and makes tuning
//! easier.

// =============================================================================
// RELEVANCE DECAY CONSTANTS
// Decay models forgetting over time; the curve is exponential in memory age
// scaled by the type's retention period, so longer-retention types forget
// slower at equal age.
// =============================================================================

/// Relevance floor for protected memories
///
/// Memories of critical type (or carrying a protect-class tag) never score
/// below this value, no matter how old they are.
///
/// Justification:
/// - 0.5 sits above every sane forgetting threshold, so protected memories
///   can never become archival candidates through decay alone
/// - Boosts still apply above the floor, so protected memories keep ranking
///   against each other by connections and access
pub const PROTECTED_RELEVANCE_FLOOR: f64 = 0.5;

/// Neutral base importance when a memory carries no importance signal
///
/// Justification:
/// - 0.5 is the midpoint of the importance scale - no prior either way
/// - Matches the neutral initial strength used for new associations
pub const NEUTRAL_BASE_IMPORTANCE: f64 = 0.5;

/// Base importance for memories tagged with an important-class tag
pub const TAGGED_IMPORTANT_BASE: f64 = 0.8;

/// Base importance for memories tagged with a transient-class tag
pub const TAGGED_TRANSIENT_BASE: f64 = 0.3;

/// Tags that mark a memory as important when no explicit score is present
pub const IMPORTANT_TAG_CLASSES: &[&str] = &["critical", "important", "essential", "key"];

/// Tags that mark a memory as transient when no explicit score is present
pub const TRANSIENT_TAG_CLASSES: &[&str] = &["temporary", "draft", "scratch", "ephemeral"];

/// Tags that protect a memory from dropping below the relevance floor
/// and from ever being archived
pub const PROTECTED_TAG_CLASSES: &[&str] = &["critical", "important", "protected", "permanent"];

/// Ceiling for the connection boost
///
/// The boost follows `ceiling * c / (c + 3)`: monotone in the connection
/// count, saturating toward the ceiling.
///
/// Justification:
/// - 0.5 keeps a hyper-connected memory from outscoring a genuinely
///   important one on connectivity alone
/// - The half-saturation point of 3 connections means the first few
///   connections matter most, matching diminishing returns in associative
///   strength
pub const CONNECTION_BOOST_CEILING: f64 = 0.5;

/// Half-saturation connection count for the connection boost
pub const CONNECTION_BOOST_HALF_SATURATION: f64 = 3.0;

/// Ceiling for the access-recency boost
///
/// Justification:
/// - 0.3 is deliberately smaller than the connection ceiling: being read
///   recently is weaker evidence of value than being connected
pub const ACCESS_BOOST_CEILING: f64 = 0.3;

/// Recency half-life in days for the access boost
///
/// An access `h` days ago contributes `ceiling * 0.5^(h / half_life)`:
/// strictly larger for more recent access.
///
/// Justification:
/// - 7 days matches the weekly work cycle; something touched within the
///   week still carries most of its boost
pub const ACCESS_BOOST_HALF_LIFE_DAYS: f64 = 7.0;

// =============================================================================
// ASSOCIATION DISCOVERY CONSTANTS
// The sweet-spot window rejects both noise (unrelated pairs) and redundancy
// (near-duplicates); what survives is the interesting middle ground.
// =============================================================================

/// Default lower edge of the sweet-spot similarity window
///
/// Justification:
/// - Below 0.3 cosine, pairs are essentially unrelated in every embedding
///   space we have run against; analyzing them produces noise connections
pub const DEFAULT_MIN_ASSOCIATION_SIMILARITY: f64 = 0.3;

/// Default upper edge of the sweet-spot similarity window
///
/// Justification:
/// - Above 0.7 cosine the pair is a paraphrase or duplicate; a connection
///   between near-duplicates is obvious, not creative
pub const DEFAULT_MAX_ASSOCIATION_SIMILARITY: f64 = 0.7;

/// Default cap on candidate pairs evaluated per run
///
/// Hard guard against combinatorial explosion: 1,000 memories produce
/// ~500k possible pairs. Sampling keeps run time bounded; repeated runs
/// with fresh seeds eventually cover the space.
pub const DEFAULT_MAX_PAIRS_PER_RUN: usize = 100;

/// Minimum confidence for an association to be retained at all
///
/// Justification:
/// - 0.3 drops pairs whose only evidence is sitting inside the similarity
///   window; at least one corroborating signal (tags, concepts, structure)
///   is needed to clear it
pub const MIN_ASSOCIATION_CONFIDENCE: f64 = 0.3;

/// Confidence blend weights
///
/// Confidence is a saturating weighted sum; every term is monotone in its
/// input so adding evidence never lowers confidence.
/// - similarity carries the most weight: it is the only continuous signal
/// - reason count next: independent heuristics agreeing is strong evidence
/// - concepts over tags: shared extracted concepts are rarer than shared
///   tags and therefore more informative
pub const CONFIDENCE_SIMILARITY_WEIGHT: f64 = 0.4;
pub const CONFIDENCE_REASON_WEIGHT: f64 = 0.3;
pub const CONFIDENCE_CONCEPT_WEIGHT: f64 = 0.2;
pub const CONFIDENCE_TAG_WEIGHT: f64 = 0.1;

/// Saturation counts for the discrete confidence terms
///
/// Four agreeing reasons, three shared concepts, or two shared tags each
/// max out their term; more adds nothing.
pub const CONFIDENCE_REASON_SATURATION: usize = 4;
pub const CONFIDENCE_CONCEPT_SATURATION: usize = 3;
pub const CONFIDENCE_TAG_SATURATION: usize = 2;

/// Version tag written into association metadata
///
/// Bump when the analysis heuristics change so downstream consumers can
/// tell which generation produced a record.
pub const ASSOCIATION_ANALYSIS_VERSION: u32 = 2;

/// Content larger than this is analyzed on a truncated prefix
///
/// Concept extraction is regex-based; pathological inputs (minified blobs,
/// base64 dumps) would otherwise dominate the run.
pub const CONTENT_ANALYSIS_MAX_BYTES: usize = 64 * 1024;

// =============================================================================
// CLUSTERING CONSTANTS
// =============================================================================

/// Default minimum cluster size
///
/// Justification:
/// - 5 members is the smallest group that reads as a "theme" rather than
///   a coincidence; it also keeps summary memories from multiplying
pub const DEFAULT_MIN_CLUSTER_SIZE: usize = 5;

/// Seed-to-member similarity threshold for the simple greedy strategy
pub const SIMPLE_CLUSTER_SIMILARITY: f64 = 0.60;

/// Neighborhood similarity threshold for the density-based strategy
///
/// Slightly above the simple threshold: density clustering chains through
/// neighborhoods, so a looser value would bleed clusters together.
pub const DENSITY_NEIGHBOR_SIMILARITY: f64 = 0.65;

/// Stop-merging threshold for the hierarchical strategy
///
/// Agglomeration halts once the closest pair of clusters falls below this
/// centroid similarity.
pub const HIERARCHICAL_MERGE_SIMILARITY: f64 = 0.55;

/// Default centroid similarity above which sibling clusters are merged
pub const DEFAULT_CLUSTER_MERGE_THRESHOLD: f64 = 0.8;

/// Number of theme keywords reported per cluster
pub const CLUSTER_THEME_KEYWORDS: usize = 8;

// =============================================================================
// COMPRESSION CONSTANTS
// =============================================================================

/// Default maximum length of a cluster summary, in characters
pub const DEFAULT_MAX_SUMMARY_LENGTH: usize = 500;

/// Marker tag applied to every engine-synthesized summary memory
pub const CONSOLIDATION_MARKER_TAG: &str = "consolidated-summary";

/// Marker tag applied to persisted association records
pub const ASSOCIATION_MARKER_TAG: &str = "memory-association";

// =============================================================================
// FORGETTING CONSTANTS
// =============================================================================

/// Default relevance threshold below which a memory becomes an archival
/// candidate
///
/// Justification:
/// - 0.1 is conservative: a memory has to have decayed to near-nothing,
///   with no connections and no recent access, before forgetting considers
///   it. Forgetting is irreversible; the threshold errs toward keeping.
pub const DEFAULT_RELEVANCE_THRESHOLD: f64 = 0.1;

/// Default minimum days since last access before archival is allowed
pub const DEFAULT_ACCESS_THRESHOLD_DAYS: f64 = 90.0;

// =============================================================================
// DEFAULT RETENTION PERIODS (DAYS)
// Longer retention means slower decay at equal age, so types rank
// critical > reference > standard > temporary at any fixed age.
// =============================================================================

pub const RETENTION_CRITICAL_DAYS: f64 = 365.0;
pub const RETENTION_REFERENCE_DAYS: f64 = 180.0;
pub const RETENTION_LEARNED_DAYS: f64 = 90.0;
pub const RETENTION_STANDARD_DAYS: f64 = 30.0;
pub const RETENTION_TEMPORARY_DAYS: f64 = 7.0;

// =============================================================================
// SCHEDULER CONSTANTS
// =============================================================================

/// Bounded run-history length kept by the scheduler
pub const SCHEDULER_HISTORY_LIMIT: usize = 100;
