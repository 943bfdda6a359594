//! Configuration management for consolidation runs
//!
//! All configurable parameters in one place with environment variable
//! overrides. Follows the principle: sensible defaults, configurable in
//! production. A config is built once per consolidation run, validated at
//! construction, and never mutated - invalid numeric ranges fail fast here,
//! never at stage runtime.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::consolidation::clustering::ClusteringAlgorithm;
use crate::constants::{
    DEFAULT_ACCESS_THRESHOLD_DAYS, DEFAULT_CLUSTER_MERGE_THRESHOLD, DEFAULT_MAX_PAIRS_PER_RUN,
    DEFAULT_MAX_SUMMARY_LENGTH, DEFAULT_MIN_ASSOCIATION_SIMILARITY, DEFAULT_MIN_CLUSTER_SIZE,
    DEFAULT_MAX_ASSOCIATION_SIMILARITY, DEFAULT_RELEVANCE_THRESHOLD, RETENTION_CRITICAL_DAYS,
    RETENTION_LEARNED_DAYS, RETENTION_REFERENCE_DAYS, RETENTION_STANDARD_DAYS,
    RETENTION_TEMPORARY_DAYS,
};
use crate::errors::{ConsolidationError, Result};
use crate::types::MemoryType;

/// Per-type retention periods, in days
///
/// The retention period parameterizes the decay curve: longer retention
/// means a higher decay factor at equal age, i.e. slower forgetting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPeriods {
    pub critical_days: f64,
    pub reference_days: f64,
    pub learned_days: f64,
    pub standard_days: f64,
    pub temporary_days: f64,
}

impl Default for RetentionPeriods {
    fn default() -> Self {
        Self {
            critical_days: RETENTION_CRITICAL_DAYS,
            reference_days: RETENTION_REFERENCE_DAYS,
            learned_days: RETENTION_LEARNED_DAYS,
            standard_days: RETENTION_STANDARD_DAYS,
            temporary_days: RETENTION_TEMPORARY_DAYS,
        }
    }
}

impl RetentionPeriods {
    /// Retention period for a memory type
    pub fn for_type(&self, memory_type: MemoryType) -> f64 {
        match memory_type {
            MemoryType::Critical => self.critical_days,
            MemoryType::Reference => self.reference_days,
            MemoryType::Learned => self.learned_days,
            MemoryType::Standard => self.standard_days,
            MemoryType::Temporary => self.temporary_days,
        }
    }

    fn validate(&self) -> Result<()> {
        let periods = [
            ("retention.critical_days", self.critical_days),
            ("retention.reference_days", self.reference_days),
            ("retention.learned_days", self.learned_days),
            ("retention.standard_days", self.standard_days),
            ("retention.temporary_days", self.temporary_days),
        ];
        for (field, days) in periods {
            if !days.is_finite() || days <= 0.0 {
                return Err(ConsolidationError::config(
                    field,
                    format!("retention period must be positive, got {days}"),
                ));
            }
        }
        Ok(())
    }
}

/// Immutable configuration for one consolidation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Per-type retention periods driving the decay curves
    pub retention: RetentionPeriods,

    /// Lower edge of the association sweet-spot similarity window
    pub min_similarity: f64,

    /// Upper edge of the association sweet-spot similarity window
    pub max_similarity: f64,

    /// Cap on candidate pairs evaluated per run (combinatorial guard)
    pub max_pairs_per_run: usize,

    /// Seed for deterministic pair sampling
    pub sampling_seed: u64,

    /// Smallest group the clustering stage will report
    pub min_cluster_size: usize,

    /// Clustering strategy; unknown names fail at construction
    pub algorithm: ClusteringAlgorithm,

    /// Centroid similarity above which sibling clusters merge
    pub cluster_merge_threshold: f64,

    /// Maximum characters per cluster summary
    pub max_summary_length: usize,

    /// Keep originals alive alongside their summary; when false, compressed
    /// originals become forgetting candidates in the same run
    pub preserve_originals: bool,

    /// Relevance score below which a memory may be archived
    pub relevance_threshold: f64,

    /// Minimum days since last access before archival is allowed
    pub access_threshold_days: f64,

    /// Directory receiving archive files (one JSONL file per run)
    pub archive_location: PathBuf,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            retention: RetentionPeriods::default(),
            min_similarity: DEFAULT_MIN_ASSOCIATION_SIMILARITY,
            max_similarity: DEFAULT_MAX_ASSOCIATION_SIMILARITY,
            max_pairs_per_run: DEFAULT_MAX_PAIRS_PER_RUN,
            sampling_seed: 0,
            min_cluster_size: DEFAULT_MIN_CLUSTER_SIZE,
            algorithm: ClusteringAlgorithm::Simple,
            cluster_merge_threshold: DEFAULT_CLUSTER_MERGE_THRESHOLD,
            max_summary_length: DEFAULT_MAX_SUMMARY_LENGTH,
            preserve_originals: true,
            relevance_threshold: DEFAULT_RELEVANCE_THRESHOLD,
            access_threshold_days: DEFAULT_ACCESS_THRESHOLD_DAYS,
            archive_location: PathBuf::from("./oneiric_archive"),
        }
    }
}

impl ConsolidationConfig {
    /// Load configuration from environment variables with defaults,
    /// validating before returning
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(val) = env::var("ONEIRIC_MIN_SIMILARITY") {
            if let Ok(n) = val.parse() {
                config.min_similarity = n;
            }
        }

        if let Ok(val) = env::var("ONEIRIC_MAX_SIMILARITY") {
            if let Ok(n) = val.parse() {
                config.max_similarity = n;
            }
        }

        if let Ok(val) = env::var("ONEIRIC_MAX_PAIRS") {
            if let Ok(n) = val.parse() {
                config.max_pairs_per_run = n;
            }
        }

        if let Ok(val) = env::var("ONEIRIC_SAMPLING_SEED") {
            if let Ok(n) = val.parse() {
                config.sampling_seed = n;
            }
        }

        if let Ok(val) = env::var("ONEIRIC_MIN_CLUSTER_SIZE") {
            if let Ok(n) = val.parse() {
                config.min_cluster_size = n;
            }
        }

        // Unknown algorithm names are a hard error, not a silent fallback
        if let Ok(val) = env::var("ONEIRIC_CLUSTERING_ALGORITHM") {
            config.algorithm = val.parse()?;
        }

        if let Ok(val) = env::var("ONEIRIC_CLUSTER_MERGE_THRESHOLD") {
            if let Ok(n) = val.parse() {
                config.cluster_merge_threshold = n;
            }
        }

        if let Ok(val) = env::var("ONEIRIC_MAX_SUMMARY_LENGTH") {
            if let Ok(n) = val.parse() {
                config.max_summary_length = n;
            }
        }

        if let Ok(val) = env::var("ONEIRIC_PRESERVE_ORIGINALS") {
            config.preserve_originals = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = env::var("ONEIRIC_RELEVANCE_THRESHOLD") {
            if let Ok(n) = val.parse() {
                config.relevance_threshold = n;
            }
        }

        if let Ok(val) = env::var("ONEIRIC_ACCESS_THRESHOLD_DAYS") {
            if let Ok(n) = val.parse() {
                config.access_threshold_days = n;
            }
        }

        if let Ok(val) = env::var("ONEIRIC_ARCHIVE_PATH") {
            config.archive_location = PathBuf::from(val);
        }

        config.validate()?;
        Ok(config)
    }

    /// Fail fast on invalid numeric ranges
    pub fn validate(&self) -> Result<()> {
        self.retention.validate()?;

        for (field, value) in [
            ("min_similarity", self.min_similarity),
            ("max_similarity", self.max_similarity),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConsolidationError::config(
                    field,
                    format!("similarity must be in [0, 1], got {value}"),
                ));
            }
        }

        if self.min_similarity > self.max_similarity {
            return Err(ConsolidationError::config(
                "min_similarity",
                format!(
                    "sweet-spot window is inverted: min {} > max {}",
                    self.min_similarity, self.max_similarity
                ),
            ));
        }

        if self.max_pairs_per_run == 0 {
            return Err(ConsolidationError::config(
                "max_pairs_per_run",
                "pair cap must be at least 1",
            ));
        }

        if self.min_cluster_size < 2 {
            return Err(ConsolidationError::config(
                "min_cluster_size",
                format!(
                    "a cluster needs at least 2 members, got {}",
                    self.min_cluster_size
                ),
            ));
        }

        if !self.cluster_merge_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.cluster_merge_threshold)
        {
            return Err(ConsolidationError::config(
                "cluster_merge_threshold",
                format!(
                    "merge threshold must be in [0, 1], got {}",
                    self.cluster_merge_threshold
                ),
            ));
        }

        if self.max_summary_length == 0 {
            return Err(ConsolidationError::config(
                "max_summary_length",
                "summary length must be at least 1",
            ));
        }

        if !self.relevance_threshold.is_finite() || self.relevance_threshold < 0.0 {
            return Err(ConsolidationError::config(
                "relevance_threshold",
                format!(
                    "relevance threshold must be >= 0, got {}",
                    self.relevance_threshold
                ),
            ));
        }

        if !self.access_threshold_days.is_finite() || self.access_threshold_days < 0.0 {
            return Err(ConsolidationError::config(
                "access_threshold_days",
                format!(
                    "access threshold must be >= 0 days, got {}",
                    self.access_threshold_days
                ),
            ));
        }

        Ok(())
    }

    /// Log the current configuration
    pub fn log(&self) {
        info!("Consolidation configuration:");
        info!(
            "   Sweet-spot window: [{:.2}, {:.2}]",
            self.min_similarity, self.max_similarity
        );
        info!(
            "   Pair cap: {} (seed {})",
            self.max_pairs_per_run, self.sampling_seed
        );
        info!(
            "   Clustering: {} (min size {}, merge above {:.2})",
            self.algorithm, self.min_cluster_size, self.cluster_merge_threshold
        );
        info!(
            "   Compression: max {} chars, preserve originals: {}",
            self.max_summary_length, self.preserve_originals
        );
        info!(
            "   Forgetting: score < {:.2}, idle > {} days, archive at {:?}",
            self.relevance_threshold, self.access_threshold_days, self.archive_location
        );
    }
}
