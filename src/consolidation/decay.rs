//! Relevance decay scoring
//!
//! Models forgetting over time with a type-aware exponential curve:
//! `decay = exp(-age_days / retention_days)`. The retention period scales
//! the curve, so at equal age a critical memory always outranks a temporary
//! one. Connections and recent access add bounded boosts on top, and
//! protected memories are clamped to a relevance floor they can never decay
//! below.
//!
//! Scoring is pure: the only write-back contract exposed to the orchestrator
//! is [`DecayCalculator::apply_score_metadata`], which returns an updated
//! copy of the memory carrying score provenance.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::config::{ConsolidationConfig, RetentionPeriods};
use crate::constants::{
    ACCESS_BOOST_CEILING, ACCESS_BOOST_HALF_LIFE_DAYS, CONNECTION_BOOST_CEILING,
    CONNECTION_BOOST_HALF_SATURATION, NEUTRAL_BASE_IMPORTANCE, PROTECTED_RELEVANCE_FLOOR,
    TAGGED_IMPORTANT_BASE, TAGGED_TRANSIENT_BASE,
};
use crate::types::{meta_keys, Memory, RelevanceScore};

/// Per-memory relevance scoring with type-aware, protected-floor decay
#[derive(Debug)]
pub struct DecayCalculator {
    retention: RetentionPeriods,
}

impl DecayCalculator {
    pub fn new(config: &ConsolidationConfig) -> Self {
        Self {
            retention: config.retention.clone(),
        }
    }

    /// Score every memory in the snapshot
    ///
    /// Memories absent from `connections` or `access_patterns` simply get a
    /// zero boost; a missing embedding never matters here. Empty input
    /// yields empty output.
    pub fn process(
        &self,
        memories: &[Memory],
        connections: &HashMap<String, usize>,
        access_patterns: &HashMap<String, DateTime<Utc>>,
    ) -> Vec<RelevanceScore> {
        let now = Utc::now();
        memories
            .iter()
            .map(|memory| self.score_memory(memory, connections, access_patterns, now))
            .collect()
    }

    fn score_memory(
        &self,
        memory: &Memory,
        connections: &HashMap<String, usize>,
        access_patterns: &HashMap<String, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> RelevanceScore {
        let base_importance = Self::base_importance(memory);

        let age_days = memory.age_days(now).max(0.0);
        let retention_period_days = self.retention.for_type(memory.memory_type);
        let decay_factor = decay_factor(age_days, retention_period_days);

        let connection_count = connections.get(&memory.content_hash).copied().unwrap_or(0);
        let connection_boost = connection_boost(connection_count);

        let days_since_access = access_patterns
            .get(&memory.content_hash)
            .map(|at| ((now - *at).num_seconds() as f64 / 86_400.0).max(0.0));
        let access_boost = days_since_access.map_or(0.0, access_boost);

        let raw_total = base_importance * decay_factor + connection_boost + access_boost;

        let is_protected = memory.is_protected();
        let total_score = if is_protected {
            raw_total.max(PROTECTED_RELEVANCE_FLOOR)
        } else {
            raw_total
        };

        RelevanceScore {
            memory_hash: memory.content_hash.clone(),
            total_score,
            decay_factor,
            base_importance,
            connection_boost,
            access_boost,
            is_protected,
            connection_count,
            retention_period_days,
            days_since_access,
        }
    }

    /// Importance before decay: explicit metadata score wins, then tag
    /// classes, then the neutral baseline
    fn base_importance(memory: &Memory) -> f64 {
        if let Some(score) = memory.importance_score() {
            return score.clamp(0.0, 1.0);
        }
        if memory.has_important_tag() {
            TAGGED_IMPORTANT_BASE
        } else if memory.has_transient_tag() {
            TAGGED_TRANSIENT_BASE
        } else {
            NEUTRAL_BASE_IMPORTANCE
        }
    }

    /// Memories scoring below `threshold`
    pub fn low_relevance<'a>(
        scores: &'a [RelevanceScore],
        threshold: f64,
    ) -> Vec<&'a RelevanceScore> {
        scores.iter().filter(|s| s.total_score < threshold).collect()
    }

    /// Memories scoring at or above `threshold`
    pub fn high_relevance<'a>(
        scores: &'a [RelevanceScore],
        threshold: f64,
    ) -> Vec<&'a RelevanceScore> {
        scores
            .iter()
            .filter(|s| s.total_score >= threshold)
            .collect()
    }

    /// Return a copy of the memory with score provenance written into its
    /// metadata - the only mutation this stage performs
    pub fn apply_score_metadata(memory: &Memory, score: &RelevanceScore) -> Memory {
        let now = Utc::now();
        let mut updated = memory.clone();
        updated.set_meta(meta_keys::RELEVANCE_SCORE, json!(score.total_score), now);
        updated.set_meta(
            meta_keys::RELEVANCE_CALCULATED_AT,
            json!(now.to_rfc3339()),
            now,
        );
        updated.set_meta(meta_keys::DECAY_FACTOR, json!(score.decay_factor), now);
        updated.set_meta(
            meta_keys::CONNECTION_BOOST,
            json!(score.connection_boost),
            now,
        );
        updated.set_meta(meta_keys::ACCESS_BOOST, json!(score.access_boost), now);
        updated
    }
}

/// Exponential decay in age, scaled by the retention period
///
/// Strictly decreasing in age, strictly increasing in retention at fixed
/// age, and bounded in [0, 1].
#[inline]
pub fn decay_factor(age_days: f64, retention_days: f64) -> f64 {
    if age_days <= 0.0 {
        return 1.0;
    }
    (-age_days / retention_days).exp()
}

/// Bounded monotone boost from connectivity: `ceiling * c / (c + k)`
#[inline]
fn connection_boost(count: usize) -> f64 {
    let c = count as f64;
    CONNECTION_BOOST_CEILING * c / (c + CONNECTION_BOOST_HALF_SATURATION)
}

/// Recency boost: half of the remaining boost gone per half-life
#[inline]
fn access_boost(days_since_access: f64) -> f64 {
    ACCESS_BOOST_CEILING * 0.5_f64.powf(days_since_access / ACCESS_BOOST_HALF_LIFE_DAYS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryType;
    use chrono::Duration;

    fn calculator() -> DecayCalculator {
        DecayCalculator::new(&ConsolidationConfig::default())
    }

    fn aged_memory(content: &str, memory_type: MemoryType, age_days: f64) -> Memory {
        let created = Utc::now() - Duration::seconds((age_days * 86_400.0) as i64);
        Memory::new(
            content,
            memory_type,
            vec![],
            created.timestamp_millis() as f64 / 1000.0,
        )
    }

    #[test]
    fn test_empty_input_empty_output() {
        let scores = calculator().process(&[], &HashMap::new(), &HashMap::new());
        assert!(scores.is_empty());
    }

    #[test]
    fn test_decay_factor_bounds() {
        for age in [0.0, 0.5, 10.0, 500.0, 10_000.0] {
            let d = decay_factor(age, 30.0);
            assert!((0.0..=1.0).contains(&d), "decay {d} out of bounds at age {age}");
        }
    }

    #[test]
    fn test_recent_memory_decays_less() {
        let recent = decay_factor(5.0, 30.0);
        let older = decay_factor(20.0, 30.0);
        assert!(recent > older);
    }

    #[test]
    fn test_types_rank_by_retention_at_equal_age() {
        let retention = RetentionPeriods::default();
        let age = 60.0;
        let critical = decay_factor(age, retention.for_type(MemoryType::Critical));
        let reference = decay_factor(age, retention.for_type(MemoryType::Reference));
        let standard = decay_factor(age, retention.for_type(MemoryType::Standard));
        let temporary = decay_factor(age, retention.for_type(MemoryType::Temporary));
        assert!(critical > reference);
        assert!(reference > standard);
        assert!(standard > temporary);
    }

    #[test]
    fn test_connection_boost_strictly_increases_score() {
        let calc = calculator();
        let memory = aged_memory("well connected", MemoryType::Standard, 10.0);

        let bare = calc.process(
            std::slice::from_ref(&memory),
            &HashMap::new(),
            &HashMap::new(),
        );
        let mut connections = HashMap::new();
        connections.insert(memory.content_hash.clone(), 4);
        let boosted = calc.process(std::slice::from_ref(&memory), &connections, &HashMap::new());

        assert!(boosted[0].total_score > bare[0].total_score);
        assert!(boosted[0].connection_boost > 0.0);
        assert_eq!(bare[0].connection_boost, 0.0);
    }

    #[test]
    fn test_recent_access_beats_old_access() {
        let calc = calculator();
        let memory = aged_memory("frequently read", MemoryType::Standard, 10.0);

        let mut recent_access = HashMap::new();
        recent_access.insert(memory.content_hash.clone(), Utc::now() - Duration::hours(2));
        let mut stale_access = HashMap::new();
        stale_access.insert(memory.content_hash.clone(), Utc::now() - Duration::days(60));

        let recent = calc.process(std::slice::from_ref(&memory), &HashMap::new(), &recent_access);
        let stale = calc.process(std::slice::from_ref(&memory), &HashMap::new(), &stale_access);

        assert!(recent[0].access_boost > stale[0].access_boost);
        assert!(stale[0].access_boost > 0.0);
    }

    #[test]
    fn test_protected_floor_holds_at_extreme_age() {
        let calc = calculator();
        let ancient = aged_memory("constitution", MemoryType::Critical, 5_000.0);
        let scores = calc.process(
            std::slice::from_ref(&ancient),
            &HashMap::new(),
            &HashMap::new(),
        );
        assert!(scores[0].is_protected);
        assert!(scores[0].total_score >= PROTECTED_RELEVANCE_FLOOR);
    }

    #[test]
    fn test_protected_memory_still_accrues_boosts_above_floor() {
        let calc = calculator();
        let memory = aged_memory("pinned note", MemoryType::Critical, 1.0);
        let mut connections = HashMap::new();
        connections.insert(memory.content_hash.clone(), 10);

        let scores = calc.process(std::slice::from_ref(&memory), &connections, &HashMap::new());
        assert!(scores[0].total_score > PROTECTED_RELEVANCE_FLOOR);
    }

    #[test]
    fn test_explicit_importance_overrides_tags() {
        let calc = calculator();
        let mut memory = aged_memory("tagged draft", MemoryType::Standard, 0.0);
        memory.tags.insert("draft".to_string());
        memory.set_meta(meta_keys::IMPORTANCE_SCORE, json!(0.95), Utc::now());

        let scores = calc.process(
            std::slice::from_ref(&memory),
            &HashMap::new(),
            &HashMap::new(),
        );
        assert!((scores[0].base_importance - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_relevance_filters() {
        let calc = calculator();
        let fresh = aged_memory("fresh", MemoryType::Standard, 1.0);
        let ancient = aged_memory("ancient", MemoryType::Temporary, 400.0);
        let scores = calc.process(
            &[fresh, ancient],
            &HashMap::new(),
            &HashMap::new(),
        );

        let low = DecayCalculator::low_relevance(&scores, 0.3);
        let high = DecayCalculator::high_relevance(&scores, 0.3);
        assert_eq!(low.len() + high.len(), scores.len());
        assert!(low.iter().all(|s| s.total_score < 0.3));
        assert!(high.iter().all(|s| s.total_score >= 0.3));
    }

    #[test]
    fn test_score_metadata_writeback_is_a_copy() {
        let calc = calculator();
        let memory = aged_memory("provenance", MemoryType::Standard, 5.0);
        let scores = calc.process(
            std::slice::from_ref(&memory),
            &HashMap::new(),
            &HashMap::new(),
        );

        let updated = DecayCalculator::apply_score_metadata(&memory, &scores[0]);
        assert!(memory.relevance_score().is_none(), "original untouched");
        assert!(updated.relevance_score().is_some());
        assert!(updated
            .metadata
            .contains_key(meta_keys::RELEVANCE_CALCULATED_AT));
        assert_eq!(updated.content_hash, memory.content_hash);
    }
}
