//! The consolidation pipeline
//!
//! The orchestrator is the only component aware of stage ordering and
//! persistence. Stages never call each other: each one reads a fresh
//! snapshot from the storage collaborator, computes pure results, and the
//! orchestrator writes those results back before the next stage begins. A
//! failure inside one stage aborts only that stage's writeback - prior
//! stages' writes stand, and the next run re-derives everything from live
//! state, so the pipeline self-heals across runs.
//!
//! Forgetting is the single irreversible stage; a coarse cancellation
//! checkpoint sits immediately before it.

pub mod association;
pub mod clustering;
pub mod compression;
pub mod decay;
pub mod forgetting;
pub mod scheduler;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::ConsolidationConfig;
use crate::constants::{ASSOCIATION_MARKER_TAG, CONSOLIDATION_MARKER_TAG};
use crate::errors::Result;
use crate::storage::MemoryStore;
use crate::types::{
    meta_keys, Memory, MemoryAssociation, MemoryCluster, MemoryType, RelevanceScore,
};

pub use association::{
    filter_high_confidence_associations, group_associations_by_type, AssociationEngine,
};
pub use clustering::{ClusteringAlgorithm, ClusteringEngine};
pub use compression::ClusterCompressor;
pub use decay::DecayCalculator;
pub use forgetting::{
    ArchiveContext, ArchiveFailure, ArchiveRecord, ForgettingEngine, ForgettingOutcome,
};
pub use scheduler::{ConsolidationHorizon, ConsolidationScheduler, RunSummary};

/// A failure captured from one stage; the run continues past it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageError {
    pub stage: String,
    pub message: String,
}

/// Per-stage counts and outcomes for one consolidation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub horizon: ConsolidationHorizon,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,

    pub memories_scored: usize,
    pub associations_discovered: usize,
    pub clusters_formed: usize,
    pub summaries_created: usize,
    pub memories_archived: usize,
    pub memories_retained: usize,
    pub archive_failures: usize,

    /// True when the run was cancelled at the checkpoint before forgetting
    pub cancelled_before_forgetting: bool,

    pub stage_errors: Vec<StageError>,
}

impl ConsolidationReport {
    pub fn new(horizon: ConsolidationHorizon, started_at: DateTime<Utc>) -> Self {
        Self {
            horizon,
            started_at,
            completed_at: started_at,
            duration_ms: 0,
            memories_scored: 0,
            associations_discovered: 0,
            clusters_formed: 0,
            summaries_created: 0,
            memories_archived: 0,
            memories_retained: 0,
            archive_failures: 0,
            cancelled_before_forgetting: false,
            stage_errors: Vec::new(),
        }
    }

    fn record_stage_error(&mut self, stage: &str, message: impl Into<String>) {
        let message = message.into();
        error!(stage, %message, "Consolidation stage failure");
        self.stage_errors.push(StageError {
            stage: stage.to_string(),
            message,
        });
    }
}

/// Runs the five-stage pipeline against a storage collaborator
///
/// Holds no process-wide state: config and collaborator are injected, and
/// everything else lives for one run.
#[derive(Debug)]
pub struct Consolidator {
    config: ConsolidationConfig,
    decay: DecayCalculator,
    association: AssociationEngine,
    clustering: ClusteringEngine,
    compressor: ClusterCompressor,
    forgetting: ForgettingEngine,
    cancel: Arc<AtomicBool>,
}

impl Consolidator {
    /// Build a consolidator, validating the configuration up front
    pub fn new(config: ConsolidationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            decay: DecayCalculator::new(&config),
            association: AssociationEngine::new(&config),
            clustering: ClusteringEngine::new(&config),
            compressor: ClusterCompressor::new(&config),
            forgetting: ForgettingEngine::new(&config),
            cancel: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Token a host can flip to stop the run before the forgetting stage.
    /// Earlier stages have no destructive side effects and run to
    /// completion.
    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Execute one full consolidation run
    pub fn run_consolidation(
        &self,
        horizon: ConsolidationHorizon,
        store: &dyn MemoryStore,
    ) -> Result<ConsolidationReport> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut report = ConsolidationReport::new(horizon, started_at);

        info!(horizon = %horizon, "Starting consolidation run");
        self.config.log();

        let scores = self.stage_decay(store, &mut report);
        let associations = self.stage_association(store, &mut report);
        let clusters = self.stage_clustering(store, &mut report);
        let released = self.stage_compression(store, &clusters, &mut report);

        // The only cancellation checkpoint: everything above is
        // non-destructive, everything below is not
        if self.cancel.load(Ordering::SeqCst) {
            info!(horizon = %horizon, "Run cancelled before forgetting stage");
            report.cancelled_before_forgetting = true;
        } else {
            self.stage_forgetting(store, &scores, &associations, &clusters, &released, &mut report);
        }

        report.completed_at = Utc::now();
        report.duration_ms = timer.elapsed().as_millis() as u64;

        info!(
            horizon = %horizon,
            scored = report.memories_scored,
            associated = report.associations_discovered,
            clustered = report.clusters_formed,
            compressed = report.summaries_created,
            archived = report.memories_archived,
            errors = report.stage_errors.len(),
            duration_ms = report.duration_ms,
            "Consolidation run complete"
        );

        Ok(report)
    }

    // =========================================================================
    // STAGES
    // =========================================================================

    fn stage_decay(
        &self,
        store: &dyn MemoryStore,
        report: &mut ConsolidationReport,
    ) -> Vec<RelevanceScore> {
        let snapshot = match store.get_all_memories() {
            Ok(memories) => memories,
            Err(e) => {
                report.record_stage_error("decay", format!("snapshot fetch failed: {e}"));
                return Vec::new();
            }
        };

        // Connection counts and access patterns are optional inputs; a host
        // that tracks neither still gets decay-only scoring
        let connections = store.get_memory_connections().unwrap_or_else(|e| {
            warn!(error = %e, "Connection counts unavailable, boosts default to zero");
            HashMap::new()
        });
        let access_patterns = store.get_access_patterns().unwrap_or_else(|e| {
            warn!(error = %e, "Access patterns unavailable, boosts default to zero");
            HashMap::new()
        });

        let scores = self.decay.process(&snapshot, &connections, &access_patterns);
        report.memories_scored = scores.len();

        for (memory, score) in snapshot.iter().zip(scores.iter()) {
            let updated = DecayCalculator::apply_score_metadata(memory, score);
            if let Err(e) = store.update_memory(&updated) {
                report.record_stage_error("decay", format!("score writeback failed: {e}"));
                break;
            }
        }

        info!(scored = scores.len(), "Decay stage complete");
        scores
    }

    fn stage_association(
        &self,
        store: &dyn MemoryStore,
        report: &mut ConsolidationReport,
    ) -> Vec<MemoryAssociation> {
        let snapshot = match store.get_all_memories() {
            Ok(memories) => memories,
            Err(e) => {
                report.record_stage_error("association", format!("snapshot fetch failed: {e}"));
                return Vec::new();
            }
        };

        let existing = existing_association_pairs(&snapshot);
        let subjects: Vec<Memory> = snapshot
            .into_iter()
            .filter(|m| !m.tags.contains(ASSOCIATION_MARKER_TAG))
            .collect();

        let associations = self.association.process(&subjects, &existing);
        report.associations_discovered = associations.len();

        for association in &associations {
            let record = association_record(association);
            if let Err(e) = store.store_memory(&record) {
                report.record_stage_error("association", format!("record writeback failed: {e}"));
                break;
            }
        }

        info!(
            discovered = associations.len(),
            known = existing.len(),
            "Association stage complete"
        );
        associations
    }

    fn stage_clustering(
        &self,
        store: &dyn MemoryStore,
        report: &mut ConsolidationReport,
    ) -> Vec<MemoryCluster> {
        let snapshot = match store.get_all_memories() {
            Ok(memories) => memories,
            Err(e) => {
                report.record_stage_error("clustering", format!("snapshot fetch failed: {e}"));
                return Vec::new();
            }
        };

        // Engine-synthesized records never feed clustering; summaries of
        // summaries would compound forever
        let subjects: Vec<Memory> = snapshot
            .into_iter()
            .filter(|m| {
                !m.tags.contains(ASSOCIATION_MARKER_TAG) && !m.tags.contains(CONSOLIDATION_MARKER_TAG)
            })
            .collect();

        let clusters = self.clustering.process(&subjects);
        let clusters = self
            .clustering
            .merge_similar_clusters(clusters, self.config.cluster_merge_threshold);
        report.clusters_formed = clusters.len();

        info!(clusters = clusters.len(), "Clustering stage complete");
        clusters
    }

    /// Returns the member hashes released for forgetting when originals are
    /// not preserved
    fn stage_compression(
        &self,
        store: &dyn MemoryStore,
        clusters: &[MemoryCluster],
        report: &mut ConsolidationReport,
    ) -> BTreeSet<String> {
        if clusters.is_empty() {
            return BTreeSet::new();
        }

        let snapshot = match store.get_all_memories() {
            Ok(memories) => memories,
            Err(e) => {
                report.record_stage_error("compression", format!("snapshot fetch failed: {e}"));
                return BTreeSet::new();
            }
        };

        let summaries = self.compressor.process(clusters, &snapshot);
        report.summaries_created = summaries.len();

        let mut persisted_all = true;
        for summary in &summaries {
            match store.store_memory(summary) {
                Ok(_) => {}
                Err(e) => {
                    report.record_stage_error("compression", format!("summary writeback failed: {e}"));
                    persisted_all = false;
                    break;
                }
            }
        }

        info!(summaries = summaries.len(), "Compression stage complete");

        // Originals are only released once their summaries are safely stored
        if persisted_all {
            self.compressor.released_originals(clusters)
        } else {
            BTreeSet::new()
        }
    }

    fn stage_forgetting(
        &self,
        store: &dyn MemoryStore,
        scores: &[RelevanceScore],
        associations: &[MemoryAssociation],
        clusters: &[MemoryCluster],
        released: &BTreeSet<String>,
        report: &mut ConsolidationReport,
    ) {
        // Re-fetch immediately before the destructive stage so memories
        // stored mid-run are seen (and, lacking scores, retained)
        let snapshot = match store.get_all_memories() {
            Ok(memories) => memories,
            Err(e) => {
                report.record_stage_error("forgetting", format!("snapshot fetch failed: {e}"));
                return;
            }
        };

        let context = discovery_context(associations, clusters);
        let outcome = self.forgetting.process(scores, &snapshot, &context, released);

        report.memories_archived = outcome.archived.len();
        report.memories_retained = outcome.retained.len();
        report.archive_failures = outcome.failed.len();
        for failure in &outcome.failed {
            report.record_stage_error(
                "forgetting",
                format!("archive failed for {}: {}", failure.memory_hash, failure.reason),
            );
        }

        // Phase two: only confirmed-archived memories leave the live store
        for memory in &outcome.archived {
            if let Err(e) = store.delete_memory(&memory.content_hash) {
                // The archive record exists, the memory stays live, and the
                // next run will retry; this is safe, just noisy
                report.record_stage_error(
                    "forgetting",
                    format!("delete failed for {}: {e}", memory.content_hash),
                );
                break;
            }
        }

        info!(
            archived = outcome.archived.len(),
            retained = outcome.retained.len(),
            failed = outcome.failed.len(),
            "Forgetting stage complete"
        );
    }
}

/// Collect already-known association pairs from persisted records
fn existing_association_pairs(snapshot: &[Memory]) -> HashSet<(String, String)> {
    let mut pairs = HashSet::new();
    for memory in snapshot {
        if !memory.tags.contains(ASSOCIATION_MARKER_TAG) {
            continue;
        }
        let Some(pair) = memory
            .metadata
            .get(meta_keys::ASSOCIATION_PAIR)
            .and_then(|v| v.as_array())
        else {
            continue;
        };
        if let (Some(a), Some(b)) = (
            pair.first().and_then(|v| v.as_str()),
            pair.get(1).and_then(|v| v.as_str()),
        ) {
            pairs.insert(MemoryAssociation::canonical_pair(a, b));
        }
    }
    pairs
}

/// Render an association as a persistable memory record
fn association_record(association: &MemoryAssociation) -> Memory {
    let (a, b) = &association.source_memory_hashes;
    let content = format!(
        "Discovered association between {} and {}: {} (similarity {:.3}, confidence {:.3})",
        &a[..12.min(a.len())],
        &b[..12.min(b.len())],
        association.connection_type,
        association.similarity_score,
        association.confidence_score,
    );

    let now = Utc::now();
    let mut record = Memory::new(
        content,
        MemoryType::Learned,
        vec![
            ASSOCIATION_MARKER_TAG.to_string(),
            association.connection_type.clone(),
        ],
        now.timestamp_millis() as f64 / 1000.0,
    );
    record.set_meta(meta_keys::ASSOCIATION_PAIR, json!([a, b]), now);
    record
}

/// Per-memory discovery context justifying archival decisions
fn discovery_context(
    associations: &[MemoryAssociation],
    clusters: &[MemoryCluster],
) -> HashMap<String, ArchiveContext> {
    let mut context: HashMap<String, ArchiveContext> = HashMap::new();

    for cluster in clusters {
        for hash in &cluster.memory_hashes {
            context
                .entry(hash.clone())
                .or_default()
                .cluster_ids
                .push(cluster.cluster_id.clone());
        }
    }

    for association in associations {
        let (a, b) = &association.source_memory_hashes;
        let label = format!("{a}::{b}");
        for hash in [a, b] {
            context
                .entry(hash.clone())
                .or_default()
                .association_pairs
                .push(label.clone());
        }
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use chrono::Duration;

    fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        let now = Utc::now();
        for (content, age_days, memory_type) in [
            ("standup notes from the platform team", 3.0, MemoryType::Standard),
            ("incident review for the outage", 10.0, MemoryType::Reference),
            ("scratch ideas, probably disposable", 400.0, MemoryType::Temporary),
        ] {
            let created = now - Duration::seconds((age_days * 86_400.0) as i64);
            let memory = Memory::new(
                content,
                memory_type,
                vec![],
                created.timestamp_millis() as f64 / 1000.0,
            );
            store.store_memory(&memory).unwrap();
        }
        store
    }

    #[test]
    fn test_full_run_produces_report_and_provenance() {
        let dir = tempfile::TempDir::new().unwrap();
        let consolidator = Consolidator::new(ConsolidationConfig {
            archive_location: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        let store = seeded_store();

        let report = consolidator
            .run_consolidation(ConsolidationHorizon::Daily, &store)
            .unwrap();

        assert_eq!(report.memories_scored, 3);
        assert!(report.stage_errors.is_empty());
        assert!(!report.cancelled_before_forgetting);
        assert!(report.duration_ms < 60_000);

        // Decay provenance was written back through the store
        for memory in store.get_all_memories().unwrap() {
            assert!(
                memory.relevance_score().is_some(),
                "memory '{}' missing score provenance",
                memory.content
            );
        }
    }

    #[test]
    fn test_cancellation_skips_forgetting() {
        let dir = tempfile::TempDir::new().unwrap();
        let consolidator = Consolidator::new(ConsolidationConfig {
            // Aggressive thresholds that would otherwise archive the old
            // temporary memory
            relevance_threshold: 0.5,
            access_threshold_days: 30.0,
            archive_location: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        let store = seeded_store();
        let live_before = store.len();

        consolidator
            .cancellation_token()
            .store(true, Ordering::SeqCst);
        let report = consolidator
            .run_consolidation(ConsolidationHorizon::Daily, &store)
            .unwrap();

        assert!(report.cancelled_before_forgetting);
        assert_eq!(report.memories_archived, 0);
        // Association/summary records may have been added; nothing removed
        assert!(store.len() >= live_before);
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let err = Consolidator::new(ConsolidationConfig {
            min_similarity: 0.9,
            max_similarity: 0.2,
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_association_records_round_trip() {
        let association = MemoryAssociation {
            source_memory_hashes: MemoryAssociation::canonical_pair("hash-aaaaaaaaaa", "hash-bbbbbbbbbb"),
            similarity_score: 0.5,
            connection_type: "shared_tags".to_string(),
            discovery_method: "creative_association".to_string(),
            discovery_date: Utc::now(),
            connection_reasons: vec!["shared_tags".to_string()],
            shared_concepts: vec![],
            confidence_score: 0.6,
            analysis_version: 2,
        };

        let record = association_record(&association);
        assert!(record.tags.contains(ASSOCIATION_MARKER_TAG));

        let pairs = existing_association_pairs(std::slice::from_ref(&record));
        assert!(pairs.contains(&association.source_memory_hashes));
    }

    #[test]
    fn test_discovery_context_indexes_both_sources() {
        let association = MemoryAssociation {
            source_memory_hashes: ("a".to_string(), "b".to_string()),
            similarity_score: 0.5,
            connection_type: "shared_tags".to_string(),
            discovery_method: "creative_association".to_string(),
            discovery_date: Utc::now(),
            connection_reasons: vec![],
            shared_concepts: vec![],
            confidence_score: 0.6,
            analysis_version: 2,
        };

        let context = discovery_context(std::slice::from_ref(&association), &[]);
        assert!(context["a"].association_pairs.contains(&"a::b".to_string()));
        assert!(context["b"].association_pairs.contains(&"a::b".to_string()));
    }
}
