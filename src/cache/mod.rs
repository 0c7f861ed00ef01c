//! Cache Module
//!
//! The fail-open cache layer: a backend abstraction with an in-process
//! implementation, the [`CacheGateway`] every other component talks to, and
//! shard-keyed read-through caches.

mod backend;
mod entry;
mod gateway;
mod lru;
mod pattern;
mod shard;
mod sharded;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use backend::{CacheBackend, MemoryBackend};
pub use entry::{CacheEntry, CacheValue};
pub use gateway::{CacheGateway, GatewayStats};
pub use lru::LruTracker;
pub use pattern::glob_match;
pub use shard::{fnv1a, shard_for, ShardedKeyspace};
pub use sharded::{CacheCategory, ShardedCache};
pub use stats::CacheStats;
pub use store::CacheStore;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;
