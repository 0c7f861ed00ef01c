//! Cache Backend Module
//!
//! The primitive operations the engine needs from a shared Redis-style cache,
//! and the in-process implementation used by the worker and the tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cache::{CacheStats, CacheStore};
use crate::error::Result;

// == Backend Trait ==
/// Raw cache commands. Implementations report transport faults as
/// [`SyncError::CacheUnavailable`](crate::error::SyncError::CacheUnavailable);
/// callers above the gateway never see them.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    /// Returns the number of keys that existed.
    async fn del(&self, keys: &[String]) -> Result<usize>;
    /// One incremental SCAN step; a returned cursor of 0 ends the iteration.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;

    async fn lpush(&self, key: &str, values: &[String]) -> Result<usize>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()>;
    async fn llen(&self, key: &str) -> Result<usize>;

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64>;
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<()>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;
    async fn srem(&self, key: &str, member: &str) -> Result<bool>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
}

// == Memory Backend ==
/// Backend over a shared [`CacheStore`].
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    store: Arc<RwLock<CacheStore>>,
}

impl MemoryBackend {
    pub fn new(max_entries: usize) -> Self {
        Self::from_store(CacheStore::new(max_entries))
    }

    pub fn from_store(store: CacheStore) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
        }
    }

    /// Shared handle for the TTL cleanup task.
    pub fn store(&self) -> Arc<RwLock<CacheStore>> {
        self.store.clone()
    }

    pub async fn stats(&self) -> CacheStats {
        self.store.read().await.stats()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.store.write().await.get(key)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.store
            .write()
            .await
            .set(key, value.to_string(), Some(ttl_secs))
    }

    async fn del(&self, keys: &[String]) -> Result<usize> {
        let mut store = self.store.write().await;
        Ok(keys.iter().filter(|key| store.delete(key)).count())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        Ok(self.store.write().await.scan(cursor, pattern, count))
    }

    async fn lpush(&self, key: &str, values: &[String]) -> Result<usize> {
        self.store.write().await.lpush(key, values)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.store.write().await.lrange(key, start, stop)
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.store.write().await.ltrim(key, start, stop)
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        self.store.write().await.llen(key)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.store.write().await.hincrby(key, field, delta)
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        self.store.write().await.hset(key, fields)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.store.write().await.hgetall(key)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        self.store.write().await.sadd(key, member)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        self.store.write().await.srem(key, member)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.store.write().await.smembers(key)
    }
}
