//! Controlled forgetting
//!
//! Archives low-relevance memories out of the live store. Forgetting is the
//! only irreversible stage, so it is deliberately paranoid: a memory is
//! archived only when its score is below the threshold AND it has been idle
//! past the access window AND it is not protected - and it only becomes
//! eligible for deletion after its archive record is confirmed on disk.
//! Archival is two-phase: serialize everything needed for manual
//! restoration (full memory, score provenance, discovery context) to a
//! JSONL file, sync it, and only then report the memory as archived. A
//! failed write retains the memory and surfaces the failure; nothing is
//! dropped silently.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ConsolidationConfig;
use crate::types::{Memory, RelevanceScore};

/// Discovery context justifying an archival decision
///
/// Recorded alongside the memory so a human can see which clusters and
/// associations the memory belonged to when it was retired.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveContext {
    /// Cluster ids that contained this memory in the current run
    pub cluster_ids: Vec<String>,
    /// Canonical "hash::hash" labels of associations involving this memory
    pub association_pairs: Vec<String>,
}

/// One logical archive record, serialized as a JSON line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub archived_at: DateTime<Utc>,
    pub memory: Memory,
    pub relevance: RelevanceScore,
    #[serde(default)]
    pub context: ArchiveContext,
}

/// A memory that could not be archived and was therefore retained
#[derive(Debug, Clone)]
pub struct ArchiveFailure {
    pub memory_hash: String,
    pub reason: String,
}

/// Result of a forgetting pass
#[derive(Debug, Default)]
pub struct ForgettingOutcome {
    /// Memories staying live
    pub retained: Vec<Memory>,
    /// Memories with confirmed archive records, eligible for deletion
    pub archived: Vec<Memory>,
    /// Archive failures; these memories are counted in `retained` too
    pub failed: Vec<ArchiveFailure>,
    /// Archive file written this pass, if any candidate existed
    pub archive_file: Option<PathBuf>,
}

/// Archives low-relevance, unprotected memories
#[derive(Debug)]
pub struct ForgettingEngine {
    relevance_threshold: f64,
    access_threshold_days: f64,
    archive_location: PathBuf,
}

impl ForgettingEngine {
    pub fn new(config: &ConsolidationConfig) -> Self {
        Self {
            relevance_threshold: config.relevance_threshold,
            access_threshold_days: config.access_threshold_days,
            archive_location: config.archive_location.clone(),
        }
    }

    /// Partition the snapshot into retained and archived memories
    ///
    /// `released_originals` are members of compressed clusters running with
    /// `preserve_originals` off: their content lives on in a summary, so
    /// they skip the relevance test but still never bypass protection.
    pub fn process(
        &self,
        scores: &[RelevanceScore],
        memories: &[Memory],
        discovery_context: &HashMap<String, ArchiveContext>,
        released_originals: &BTreeSet<String>,
    ) -> ForgettingOutcome {
        let now = Utc::now();
        let score_by_hash: HashMap<&str, &RelevanceScore> =
            scores.iter().map(|s| (s.memory_hash.as_str(), s)).collect();

        let mut outcome = ForgettingOutcome::default();
        let mut candidates: Vec<(&Memory, RelevanceScore)> = Vec::new();

        for memory in memories {
            if memory.is_protected() {
                outcome.retained.push(memory.clone());
                continue;
            }

            let Some(score) = score_by_hash.get(memory.content_hash.as_str()) else {
                // No score this run (stored mid-run); never forget blind
                outcome.retained.push(memory.clone());
                continue;
            };

            let superseded = released_originals.contains(&memory.content_hash);
            let idle_days = score
                .days_since_access
                .unwrap_or_else(|| memory.age_days(now).max(0.0));
            let expired = score.total_score < self.relevance_threshold
                && idle_days > self.access_threshold_days;

            if superseded || expired {
                candidates.push((memory, (*score).clone()));
            } else {
                outcome.retained.push(memory.clone());
            }
        }

        if candidates.is_empty() {
            return outcome;
        }

        self.archive_candidates(candidates, discovery_context, &mut outcome, now);
        outcome
    }

    /// Phase one: write archive records; only confirmed writes make a
    /// memory eligible for deletion
    fn archive_candidates(
        &self,
        candidates: Vec<(&Memory, RelevanceScore)>,
        discovery_context: &HashMap<String, ArchiveContext>,
        outcome: &mut ForgettingOutcome,
        now: DateTime<Utc>,
    ) {
        let retain_all = |candidates: Vec<(&Memory, RelevanceScore)>,
                          reason: &str,
                          outcome: &mut ForgettingOutcome| {
            for (memory, _) in candidates {
                outcome.failed.push(ArchiveFailure {
                    memory_hash: memory.content_hash.clone(),
                    reason: reason.to_string(),
                });
                outcome.retained.push(memory.clone());
            }
        };

        if let Err(e) = fs::create_dir_all(&self.archive_location) {
            warn!(path = ?self.archive_location, error = %e, "Cannot create archive directory");
            retain_all(candidates, &format!("archive directory unavailable: {e}"), outcome);
            return;
        }

        let file_name = format!(
            "archive-{}-{}.jsonl",
            now.format("%Y%m%d-%H%M%S"),
            &Uuid::new_v4().to_string()[..8]
        );
        let path = self.archive_location.join(file_name);
        let mut file = match fs::File::create(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = ?path, error = %e, "Cannot create archive file");
                retain_all(candidates, &format!("archive file unavailable: {e}"), outcome);
                return;
            }
        };

        let mut written: Vec<Memory> = Vec::new();
        let mut write_failures: Vec<ArchiveFailure> = Vec::new();

        for (memory, relevance) in candidates {
            let record = ArchiveRecord {
                archived_at: now,
                memory: memory.clone(),
                relevance,
                context: discovery_context
                    .get(&memory.content_hash)
                    .cloned()
                    .unwrap_or_default(),
            };

            let result = serde_json::to_string(&record)
                .map_err(|e| e.to_string())
                .and_then(|line| {
                    file.write_all(line.as_bytes())
                        .and_then(|_| file.write_all(b"\n"))
                        .map_err(|e| e.to_string())
                });

            match result {
                Ok(()) => written.push(memory.clone()),
                Err(reason) => {
                    warn!(
                        memory = %&memory.content_hash[..12.min(memory.content_hash.len())],
                        error = %reason,
                        "Archive write failed, retaining memory"
                    );
                    write_failures.push(ArchiveFailure {
                        memory_hash: memory.content_hash.clone(),
                        reason,
                    });
                    outcome.retained.push(memory.clone());
                }
            }
        }

        // Confirmation point: without a durable sync nothing written above
        // counts, and every candidate stays live
        if let Err(e) = file.flush().and_then(|_| file.sync_all()) {
            warn!(path = ?path, error = %e, "Archive sync failed, retaining all candidates");
            for memory in written {
                outcome.failed.push(ArchiveFailure {
                    memory_hash: memory.content_hash.clone(),
                    reason: format!("archive sync failed: {e}"),
                });
                outcome.retained.push(memory);
            }
            outcome.failed.extend(write_failures);
            return;
        }

        if let Err(e) = write_checksum_sidecar(&path) {
            // Integrity aid only; the synced JSONL is the confirmation
            warn!(path = ?path, error = %e, "Checksum sidecar write failed");
        }

        info!(
            archived = written.len(),
            failed = write_failures.len(),
            path = ?path,
            "Archive pass complete"
        );

        outcome.archived = written;
        outcome.failed.extend(write_failures);
        outcome.archive_file = Some(path);
    }
}

/// SHA-256 of the archive file, written alongside it for verification
fn write_checksum_sidecar(path: &Path) -> std::io::Result<()> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = format!("{:x}\n", hasher.finalize());
    fs::write(path.with_extension("jsonl.sha256"), digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryType;
    use chrono::Duration;
    use tempfile::TempDir;

    fn engine_at(archive: &Path) -> ForgettingEngine {
        ForgettingEngine::new(&ConsolidationConfig {
            relevance_threshold: 0.5,
            access_threshold_days: 30.0,
            archive_location: archive.to_path_buf(),
            ..Default::default()
        })
    }

    fn aged(content: &str, memory_type: MemoryType, age_days: f64) -> Memory {
        let created = Utc::now() - Duration::seconds((age_days * 86_400.0) as i64);
        Memory::new(
            content,
            memory_type,
            vec![],
            created.timestamp_millis() as f64 / 1000.0,
        )
    }

    fn score_for(memory: &Memory, total: f64, days_since_access: Option<f64>) -> RelevanceScore {
        RelevanceScore {
            memory_hash: memory.content_hash.clone(),
            total_score: total,
            decay_factor: 0.5,
            base_importance: 0.5,
            connection_boost: 0.0,
            access_boost: 0.0,
            is_protected: memory.is_protected(),
            connection_count: 0,
            retention_period_days: 30.0,
            days_since_access,
        }
    }

    #[test]
    fn test_low_idle_memory_is_archived() {
        let dir = TempDir::new().unwrap();
        let engine = engine_at(dir.path());

        let stale = aged("old meeting note", MemoryType::Temporary, 120.0);
        let scores = vec![score_for(&stale, 0.05, Some(100.0))];

        let outcome = engine.process(
            &scores,
            std::slice::from_ref(&stale),
            &HashMap::new(),
            &BTreeSet::new(),
        );

        assert_eq!(outcome.archived.len(), 1);
        assert!(outcome.retained.is_empty());
        assert!(outcome.failed.is_empty());

        let file = outcome.archive_file.expect("archive written");
        let contents = fs::read_to_string(&file).unwrap();
        let record: ArchiveRecord = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(record.memory.content_hash, stale.content_hash);
        assert!((record.relevance.total_score - 0.05).abs() < 1e-9);
        assert!(file.with_extension("jsonl.sha256").exists());
    }

    #[test]
    fn test_protected_memory_never_archived() {
        let dir = TempDir::new().unwrap();
        let engine = engine_at(dir.path());

        let critical = aged("root credentials rotation", MemoryType::Critical, 1_000.0);
        // Even with a pathological below-threshold score
        let scores = vec![score_for(&critical, 0.0, Some(500.0))];

        let outcome = engine.process(
            &scores,
            std::slice::from_ref(&critical),
            &HashMap::new(),
            &BTreeSet::new(),
        );

        assert!(outcome.archived.is_empty());
        assert_eq!(outcome.retained.len(), 1);
    }

    #[test]
    fn test_recent_access_blocks_archival() {
        let dir = TempDir::new().unwrap();
        let engine = engine_at(dir.path());

        let touched = aged("recently used scratchpad", MemoryType::Temporary, 200.0);
        let scores = vec![score_for(&touched, 0.05, Some(3.0))];

        let outcome = engine.process(
            &scores,
            std::slice::from_ref(&touched),
            &HashMap::new(),
            &BTreeSet::new(),
        );

        assert!(outcome.archived.is_empty());
        assert_eq!(outcome.retained.len(), 1);
    }

    #[test]
    fn test_unscored_memory_is_retained() {
        let dir = TempDir::new().unwrap();
        let engine = engine_at(dir.path());

        let unscored = aged("stored mid-run", MemoryType::Standard, 400.0);
        let outcome = engine.process(
            &[],
            std::slice::from_ref(&unscored),
            &HashMap::new(),
            &BTreeSet::new(),
        );

        assert!(outcome.archived.is_empty());
        assert_eq!(outcome.retained.len(), 1);
        assert!(outcome.archive_file.is_none());
    }

    #[test]
    fn test_failed_archive_write_retains_memory() {
        let dir = TempDir::new().unwrap();
        // Point the archive at a path that cannot be a directory
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();
        let engine = engine_at(&blocker.join("archive"));

        let stale = aged("doomed but safe", MemoryType::Temporary, 120.0);
        let scores = vec![score_for(&stale, 0.05, Some(100.0))];

        let outcome = engine.process(
            &scores,
            std::slice::from_ref(&stale),
            &HashMap::new(),
            &BTreeSet::new(),
        );

        assert!(outcome.archived.is_empty(), "no delete without archive");
        assert_eq!(outcome.retained.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].memory_hash, stale.content_hash);
    }

    #[test]
    fn test_released_originals_skip_relevance_but_not_protection() {
        let dir = TempDir::new().unwrap();
        let engine = engine_at(dir.path());

        let compressed = aged("summarized elsewhere", MemoryType::Standard, 10.0);
        let protected = aged("summarized but protected", MemoryType::Critical, 10.0);
        let scores = vec![
            score_for(&compressed, 0.9, Some(1.0)),
            score_for(&protected, 0.9, Some(1.0)),
        ];

        let mut released = BTreeSet::new();
        released.insert(compressed.content_hash.clone());
        released.insert(protected.content_hash.clone());

        let outcome = engine.process(
            &scores,
            &[compressed.clone(), protected.clone()],
            &HashMap::new(),
            &released,
        );

        assert_eq!(outcome.archived.len(), 1);
        assert_eq!(outcome.archived[0].content_hash, compressed.content_hash);
        assert_eq!(outcome.retained.len(), 1);
        assert_eq!(outcome.retained[0].content_hash, protected.content_hash);
    }

    #[test]
    fn test_discovery_context_recorded_in_archive() {
        let dir = TempDir::new().unwrap();
        let engine = engine_at(dir.path());

        let stale = aged("clustered once", MemoryType::Temporary, 120.0);
        let scores = vec![score_for(&stale, 0.05, Some(100.0))];

        let mut context = HashMap::new();
        context.insert(
            stale.content_hash.clone(),
            ArchiveContext {
                cluster_ids: vec!["cluster-7".to_string()],
                association_pairs: vec!["aaa::bbb".to_string()],
            },
        );

        let outcome = engine.process(
            &scores,
            std::slice::from_ref(&stale),
            &context,
            &BTreeSet::new(),
        );

        let file = outcome.archive_file.expect("archive written");
        let contents = fs::read_to_string(file).unwrap();
        let record: ArchiveRecord = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(record.context.cluster_ids, vec!["cluster-7"]);
        assert_eq!(record.context.association_pairs, vec!["aaa::bbb"]);
    }
}
