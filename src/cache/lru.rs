//! LRU Tracker Module
//!
//! Tracks key recency for capacity eviction in the in-process backend.

use std::collections::{BTreeMap, HashMap};

// == LRU Tracker ==
/// Orders keys by a monotonically increasing access tick.
///
/// The smallest tick is the least recently used key.
#[derive(Debug, Default)]
pub struct LruTracker {
    by_tick: BTreeMap<u64, String>,
    ticks: HashMap<String, u64>,
    clock: u64,
}

impl LruTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a key as most recently used.
    pub fn touch(&mut self, key: &str) {
        self.clock += 1;
        if let Some(old) = self.ticks.insert(key.to_string(), self.clock) {
            self.by_tick.remove(&old);
        }
        self.by_tick.insert(self.clock, key.to_string());
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(tick) = self.ticks.remove(key) {
            self.by_tick.remove(&tick);
        }
    }

    /// Returns and forgets the least recently used key.
    pub fn evict_oldest(&mut self) -> Option<String> {
        let (_, key) = self.by_tick.pop_first()?;
        self.ticks.remove(&key);
        Some(key)
    }

    pub fn peek_oldest(&self) -> Option<&String> {
        self.by_tick.values().next()
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.ticks.contains_key(key)
    }
}
