//! Oneiric
//!
//! Dream-inspired memory consolidation engine for AI agent memory stores.
//! Periodically re-evaluates every stored memory the way biological memory
//! consolidation does during sleep: scoring relevance decay, discovering
//! non-obvious associations, clustering related memories into themes,
//! compressing those themes into summaries, and archiving what is no longer
//! worth keeping live.
//!
//! # Pipeline
//! A consolidation run executes five stages in fixed order:
//! 1. Decay - type-aware relevance scoring with a protected floor
//! 2. Association - "sweet-spot" similarity discovery between memory pairs
//! 3. Clustering - semantic grouping via interchangeable strategies
//! 4. Compression - one summary memory per coherent cluster
//! 5. Forgetting - two-phase archival of low-relevance memories
//!
//! The engine owns no storage and no clock beyond the run itself: memories
//! arrive through the [`storage::MemoryStore`] trait and results flow back
//! through it. Hosts schedule runs per consolidation horizon (daily, weekly,
//! monthly) using [`consolidation::ConsolidationScheduler`].

pub mod config;
pub mod consolidation;
pub mod constants;
pub mod errors;
pub mod similarity;
pub mod storage;
pub mod types;

// Re-export dependencies to ensure tests/benchmarks use the same version
pub use chrono;
pub use uuid;
