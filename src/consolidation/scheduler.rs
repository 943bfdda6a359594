//! Consolidation horizon scheduling
//!
//! Cadence bookkeeping for the host's scheduler: which horizons are due,
//! when they last ran, and a bounded history of run summaries. The engine
//! owns no timer - hosts poll [`ConsolidationScheduler::should_run`] from
//! whatever clock they already have (cron, tokio interval, systemd timer)
//! and call [`ConsolidationScheduler::record_run`] with each report.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::SCHEDULER_HISTORY_LIMIT;

use super::ConsolidationReport;

/// A scheduled cadence for full pipeline runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationHorizon {
    Daily,
    Weekly,
    Monthly,
}

impl ConsolidationHorizon {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidationHorizon::Daily => "daily",
            ConsolidationHorizon::Weekly => "weekly",
            ConsolidationHorizon::Monthly => "monthly",
        }
    }

    /// Minimum interval between runs at this horizon
    pub fn interval(&self) -> Duration {
        match self {
            ConsolidationHorizon::Daily => Duration::hours(24),
            ConsolidationHorizon::Weekly => Duration::days(7),
            ConsolidationHorizon::Monthly => Duration::days(30),
        }
    }
}

impl fmt::Display for ConsolidationHorizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compact record of one completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub horizon: ConsolidationHorizon,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub memories_scored: usize,
    pub associations_discovered: usize,
    pub clusters_formed: usize,
    pub summaries_created: usize,
    pub memories_archived: usize,
    pub stage_errors: usize,
    pub cancelled: bool,
}

impl RunSummary {
    fn from_report(report: &ConsolidationReport) -> Self {
        Self {
            horizon: report.horizon,
            completed_at: report.completed_at,
            duration_ms: report.duration_ms,
            memories_scored: report.memories_scored,
            associations_discovered: report.associations_discovered,
            clusters_formed: report.clusters_formed,
            summaries_created: report.summaries_created,
            memories_archived: report.memories_archived,
            stage_errors: report.stage_errors.len(),
            cancelled: report.cancelled_before_forgetting,
        }
    }
}

/// Tracks when each horizon last ran and keeps a bounded run history
#[derive(Debug, Default)]
pub struct ConsolidationScheduler {
    last_run: HashMap<ConsolidationHorizon, DateTime<Utc>>,
    history: VecDeque<RunSummary>,
}

impl ConsolidationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a horizon is due (never ran, or its interval has elapsed)
    pub fn should_run(&self, horizon: ConsolidationHorizon) -> bool {
        match self.last_run.get(&horizon) {
            None => true,
            Some(last) => Utc::now() - *last >= horizon.interval(),
        }
    }

    /// Time remaining until a horizon is due; zero when overdue
    pub fn time_until_next(&self, horizon: ConsolidationHorizon) -> Duration {
        match self.last_run.get(&horizon) {
            None => Duration::zero(),
            Some(last) => {
                let elapsed = Utc::now() - *last;
                if elapsed >= horizon.interval() {
                    Duration::zero()
                } else {
                    horizon.interval() - elapsed
                }
            }
        }
    }

    /// Record a completed run for its horizon
    pub fn record_run(&mut self, report: &ConsolidationReport) {
        self.last_run.insert(report.horizon, report.completed_at);
        self.history.push_back(RunSummary::from_report(report));
        while self.history.len() > SCHEDULER_HISTORY_LIMIT {
            self.history.pop_front();
        }
    }

    /// Completed runs, oldest first
    pub fn history(&self) -> impl Iterator<Item = &RunSummary> {
        self.history.iter()
    }

    /// Last completion time for a horizon, if it ever ran
    pub fn last_run(&self, horizon: ConsolidationHorizon) -> Option<DateTime<Utc>> {
        self.last_run.get(&horizon).copied()
    }
}
