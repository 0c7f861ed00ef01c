//! Cache Entry Module
//!
//! Defines the typed values held by the in-process backend and their TTL metadata.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

// == Cache Value ==
/// The data structures a key can hold, mirroring a Redis-style server.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// Plain string (JSON documents are stored here)
    Text(String),
    /// List with index 0 at the head
    List(VecDeque<String>),
    /// Field/value hash
    Hash(HashMap<String, String>),
    /// Unordered set of members
    Set(HashSet<String>),
}

impl CacheValue {
    /// Name used in type-mismatch errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            CacheValue::Text(_) => "string",
            CacheValue::List(_) => "list",
            CacheValue::Hash(_) => "hash",
            CacheValue::Set(_) => "set",
        }
    }

    /// Collections that become empty are removed, like Redis does.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            CacheValue::Text(_) => false,
            CacheValue::List(list) => list.is_empty(),
            CacheValue::Hash(hash) => hash.is_empty(),
            CacheValue::Set(set) => set.is_empty(),
        }
    }
}

// == Cache Entry ==
/// A single key's value with expiry metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CacheValue,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry with optional TTL in seconds.
    pub fn new(value: CacheValue, ttl_seconds: Option<u64>) -> Self {
        let now = current_timestamp_ms();
        Self {
            value,
            created_at: now,
            expires_at: ttl_seconds.map(|ttl| now + ttl * 1000),
        }
    }

    // == Is Expired ==
    /// An entry is expired once the current time reaches its expiration time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        match self.expires_at {
            Some(expires) => now_ms >= expires,
            None => false,
        }
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
