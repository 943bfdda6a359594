//! Storage collaborator interface
//!
//! The engine treats storage as its sole mutation boundary: every snapshot
//! comes from a [`MemoryStore`] and every result flows back through one.
//! Backends own their locking and retries; the engine operates on
//! point-in-time snapshots and re-fetches before destructive stages.
//!
//! [`InMemoryStore`] is the reference implementation used by the test suite
//! and by hosts that embed the engine without a persistent backend.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::types::Memory;

/// Storage operations the consolidation engine consumes
///
/// Synchronous by design: consolidation is a scheduled batch job, and hosts
/// with async backends wrap calls in their own blocking executor.
pub trait MemoryStore: Send + Sync {
    /// Fetch a snapshot of every live memory
    fn get_all_memories(&self) -> Result<Vec<Memory>>;

    /// Fetch memories created within `[start, end]` (unix seconds)
    fn get_memories_by_time_range(&self, start: f64, end: f64) -> Result<Vec<Memory>>;

    /// Persist a new memory; returns false if the hash already exists
    fn store_memory(&self, memory: &Memory) -> Result<bool>;

    /// Replace an existing memory; returns false if the hash is unknown
    fn update_memory(&self, memory: &Memory) -> Result<bool>;

    /// Remove a memory from the live store; returns false if unknown
    fn delete_memory(&self, content_hash: &str) -> Result<bool>;

    /// Per-memory connection counts, when the host tracks a memory graph
    fn get_memory_connections(&self) -> Result<HashMap<String, usize>>;

    /// Per-memory last-access times, when the host tracks access
    fn get_access_patterns(&self) -> Result<HashMap<String, DateTime<Utc>>>;
}

/// In-memory store backed by locked maps
///
/// Connection counts and access patterns are seeded explicitly; a real
/// backend would derive them from its graph and access logs.
#[derive(Default)]
pub struct InMemoryStore {
    memories: RwLock<HashMap<String, Memory>>,
    connections: RwLock<HashMap<String, usize>>,
    access_patterns: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a connection count for a memory
    pub fn set_connections(&self, content_hash: &str, count: usize) {
        self.connections
            .write()
            .insert(content_hash.to_string(), count);
    }

    /// Seed a last-access time for a memory
    pub fn set_last_access(&self, content_hash: &str, at: DateTime<Utc>) {
        self.access_patterns
            .write()
            .insert(content_hash.to_string(), at);
    }

    /// Number of live memories
    pub fn len(&self) -> usize {
        self.memories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.read().is_empty()
    }

    /// Fetch one memory by hash
    pub fn get(&self, content_hash: &str) -> Option<Memory> {
        self.memories.read().get(content_hash).cloned()
    }
}

impl MemoryStore for InMemoryStore {
    fn get_all_memories(&self) -> Result<Vec<Memory>> {
        Ok(self.memories.read().values().cloned().collect())
    }

    fn get_memories_by_time_range(&self, start: f64, end: f64) -> Result<Vec<Memory>> {
        Ok(self
            .memories
            .read()
            .values()
            .filter(|m| m.created_at >= start && m.created_at <= end)
            .cloned()
            .collect())
    }

    fn store_memory(&self, memory: &Memory) -> Result<bool> {
        let mut memories = self.memories.write();
        if memories.contains_key(&memory.content_hash) {
            return Ok(false);
        }
        memories.insert(memory.content_hash.clone(), memory.clone());
        Ok(true)
    }

    fn update_memory(&self, memory: &Memory) -> Result<bool> {
        let mut memories = self.memories.write();
        if !memories.contains_key(&memory.content_hash) {
            return Ok(false);
        }
        memories.insert(memory.content_hash.clone(), memory.clone());
        Ok(true)
    }

    fn delete_memory(&self, content_hash: &str) -> Result<bool> {
        let removed = self.memories.write().remove(content_hash).is_some();
        if removed {
            self.connections.write().remove(content_hash);
            self.access_patterns.write().remove(content_hash);
        }
        Ok(removed)
    }

    fn get_memory_connections(&self) -> Result<HashMap<String, usize>> {
        Ok(self.connections.read().clone())
    }

    fn get_access_patterns(&self) -> Result<HashMap<String, DateTime<Utc>>> {
        Ok(self.access_patterns.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryType;

    fn memory(content: &str, created_at: f64) -> Memory {
        Memory::new(content, MemoryType::Standard, vec![], created_at)
    }

    #[test]
    fn test_store_and_fetch_roundtrip() {
        let store = InMemoryStore::new();
        let m = memory("remember this", 1_000.0);
        assert!(store.store_memory(&m).unwrap());
        assert!(!store.store_memory(&m).unwrap(), "duplicate hash rejected");

        let all = store.get_all_memories().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "remember this");
    }

    #[test]
    fn test_update_requires_existing() {
        let store = InMemoryStore::new();
        let m = memory("not stored yet", 1_000.0);
        assert!(!store.update_memory(&m).unwrap());

        store.store_memory(&m).unwrap();
        let mut updated = m.clone();
        updated.set_meta("importance_score", serde_json::json!(0.9), Utc::now());
        assert!(store.update_memory(&updated).unwrap());
        assert!(store
            .get(&m.content_hash)
            .unwrap()
            .importance_score()
            .is_some());
    }

    #[test]
    fn test_time_range_filter() {
        let store = InMemoryStore::new();
        store.store_memory(&memory("early", 100.0)).unwrap();
        store.store_memory(&memory("late", 5_000.0)).unwrap();

        let hits = store.get_memories_by_time_range(0.0, 1_000.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "early");
    }

    #[test]
    fn test_delete_clears_side_tables() {
        let store = InMemoryStore::new();
        let m = memory("deletable", 100.0);
        store.store_memory(&m).unwrap();
        store.set_connections(&m.content_hash, 3);
        store.set_last_access(&m.content_hash, Utc::now());

        assert!(store.delete_memory(&m.content_hash).unwrap());
        assert!(store.get_memory_connections().unwrap().is_empty());
        assert!(store.get_access_patterns().unwrap().is_empty());
        assert!(!store.delete_memory(&m.content_hash).unwrap());
    }
}
