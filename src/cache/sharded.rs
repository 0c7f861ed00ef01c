//! Sharded read-through caches for per-user and per-bundle data.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::cache::{CacheGateway, ShardedKeyspace};
use crate::config::Config;
use crate::error::Result;

// == Cache Category ==
/// Cached feature areas, each with its own namespace, shard count and TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCategory {
    /// Per-user map of purchased exams and bundles
    UserAccess,
    /// Bundle detail documents
    BundleDetails,
    /// Per-user attempt history lists
    UserAttempts,
    /// Question lists grouped by category
    Categorized,
    /// Admin dashboard aggregates
    Dashboard,
    /// Individual question documents
    Questions,
    /// Exam rules
    Rules,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 7] = [
        CacheCategory::UserAccess,
        CacheCategory::BundleDetails,
        CacheCategory::UserAttempts,
        CacheCategory::Categorized,
        CacheCategory::Dashboard,
        CacheCategory::Questions,
        CacheCategory::Rules,
    ];

    pub fn namespace(&self) -> &'static str {
        match self {
            CacheCategory::UserAccess => "access",
            CacheCategory::BundleDetails => "bundle",
            CacheCategory::UserAttempts => "attempts",
            CacheCategory::Categorized => "categorized",
            CacheCategory::Dashboard => "dashboard",
            CacheCategory::Questions => "question",
            CacheCategory::Rules => "rules",
        }
    }

    pub fn shard_count(&self, config: &Config) -> u32 {
        match self {
            CacheCategory::UserAccess => config.access_shards,
            CacheCategory::BundleDetails => config.bundle_shards,
            CacheCategory::UserAttempts => config.attempt_shards,
            CacheCategory::Categorized => config.question_shards,
            CacheCategory::Dashboard | CacheCategory::Questions | CacheCategory::Rules => 1,
        }
    }

    pub fn ttl_secs(&self, config: &Config) -> u64 {
        match self {
            CacheCategory::UserAccess | CacheCategory::UserAttempts => config.access_ttl,
            CacheCategory::BundleDetails => config.bundle_ttl,
            CacheCategory::Dashboard => config.dashboard_ttl,
            CacheCategory::Categorized | CacheCategory::Questions => config.question_ttl,
            CacheCategory::Rules => config.rules_ttl,
        }
    }

    pub fn keyspace(&self, config: &Config) -> ShardedKeyspace {
        ShardedKeyspace::new(self.namespace(), self.shard_count(config))
    }
}

// == Sharded Cache ==
/// Typed cache over one [`ShardedKeyspace`]. Every operation fails open.
pub struct ShardedCache<T> {
    gateway: Arc<CacheGateway>,
    keyspace: ShardedKeyspace,
    ttl_secs: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ShardedCache<T> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            keyspace: self.keyspace.clone(),
            ttl_secs: self.ttl_secs,
            _marker: PhantomData,
        }
    }
}

impl<T> ShardedCache<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(gateway: Arc<CacheGateway>, keyspace: ShardedKeyspace, ttl_secs: u64) -> Self {
        Self {
            gateway,
            keyspace,
            ttl_secs,
            _marker: PhantomData,
        }
    }

    pub fn for_category(gateway: Arc<CacheGateway>, category: CacheCategory, config: &Config) -> Self {
        Self::new(gateway, category.keyspace(config), category.ttl_secs(config))
    }

    pub fn keyspace(&self) -> &ShardedKeyspace {
        &self.keyspace
    }

    pub async fn get(&self, entity_id: &str) -> Option<T> {
        self.gateway.get_json(&self.keyspace.key(entity_id)).await
    }

    pub async fn put(&self, entity_id: &str, value: &T) -> bool {
        self.gateway
            .set_json(&self.keyspace.key(entity_id), value, self.ttl_secs)
            .await
    }

    /// Drops the entity's entry and any sub-resource keys under it.
    pub async fn invalidate(&self, entity_id: &str) -> bool {
        let deleted = self.gateway.delete(&self.keyspace.key(entity_id)).await;
        self.gateway
            .clear_by_pattern(&self.keyspace.entity_pattern(entity_id))
            .await;
        deleted
    }

    /// Clears every shard concurrently. Returns the number of keys removed.
    pub async fn invalidate_all(&self) -> usize {
        let patterns: Vec<String> = (0..self.keyspace.shard_count())
            .map(|shard| self.keyspace.shard_pattern(shard))
            .collect();
        let cleared: usize = join_all(
            patterns
                .iter()
                .map(|pattern| self.gateway.clear_by_pattern(pattern)),
        )
        .await
        .into_iter()
        .sum();
        debug!(
            namespace = self.keyspace.namespace(),
            cleared, "invalidated all shards"
        );
        cleared
    }

    /// Read-through: on miss, loads from the durable source and caches the result.
    pub async fn get_or_load<F, Fut>(&self, entity_id: &str, loader: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        if let Some(cached) = self.get(entity_id).await {
            return Ok(Some(cached));
        }
        let loaded = loader().await?;
        if let Some(value) = &loaded {
            self.put(entity_id, value).await;
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::cache::{CacheBackend, MemoryBackend};

    type AccessMap = HashMap<String, bool>;

    fn access_cache(backend: &MemoryBackend) -> ShardedCache<AccessMap> {
        let gateway = Arc::new(
            CacheGateway::new(Arc::new(backend.clone())).with_retry(0, Duration::from_millis(1)),
        );
        ShardedCache::for_category(gateway, CacheCategory::UserAccess, &Config::default())
    }

    #[tokio::test]
    async fn test_put_uses_sharded_key() {
        let backend = MemoryBackend::new(100);
        let cache = access_cache(&backend);
        let access = AccessMap::from([("exam-1".to_string(), true)]);

        assert!(cache.put("user-1", &access).await);

        let key = cache.keyspace().key("user-1");
        assert!(key.starts_with("access:"));
        assert!(backend.get(&key).await.unwrap().is_some());
        assert_eq!(cache.get("user-1").await, Some(access));
    }

    #[tokio::test]
    async fn test_get_or_load_only_loads_on_miss() {
        let backend = MemoryBackend::new(100);
        let cache = access_cache(&backend);
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_load("user-2", || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(AccessMap::from([("bundle-9".to_string(), true)])))
                })
                .await
                .unwrap();
            assert!(value.is_some());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_load_does_not_cache_absent_entities() {
        let backend = MemoryBackend::new(100);
        let cache = access_cache(&backend);

        let value = cache.get_or_load("ghost", || async { Ok(None) }).await.unwrap();
        assert!(value.is_none());
        assert_eq!(backend.stats().await.total_entries, 0);
    }

    #[tokio::test]
    async fn test_invalidate_all_clears_every_shard() {
        let backend = MemoryBackend::new(1000);
        let cache = access_cache(&backend);
        for i in 0..50 {
            cache.put(&format!("user-{i}"), &AccessMap::new()).await;
        }
        backend.set_ex("rules:0:global", "{}", 60).await.unwrap();

        assert_eq!(cache.invalidate_all().await, 50);
        assert_eq!(backend.stats().await.total_entries, 1);
    }

    #[tokio::test]
    async fn test_invalidate_single_entity() {
        let backend = MemoryBackend::new(100);
        let cache = access_cache(&backend);
        cache.put("user-1", &AccessMap::new()).await;
        cache.put("user-2", &AccessMap::new()).await;

        assert!(cache.invalidate("user-1").await);
        assert!(cache.get("user-1").await.is_none());
        assert!(cache.get("user-2").await.is_some());
    }

    #[test]
    fn test_category_defaults() {
        let config = Config::default();
        let namespaces: std::collections::HashSet<_> =
            CacheCategory::ALL.iter().map(|c| c.namespace()).collect();
        assert_eq!(namespaces.len(), CacheCategory::ALL.len());

        assert_eq!(CacheCategory::UserAccess.shard_count(&config), 16);
        assert_eq!(CacheCategory::BundleDetails.shard_count(&config), 8);
        assert_eq!(CacheCategory::UserAccess.ttl_secs(&config), 300);
        assert_eq!(CacheCategory::BundleDetails.ttl_secs(&config), 900);
        assert_eq!(CacheCategory::Dashboard.ttl_secs(&config), 900);
        assert_eq!(CacheCategory::Questions.ttl_secs(&config), 3600);
        assert_eq!(CacheCategory::Rules.ttl_secs(&config), 86400);
        assert_eq!(
            CacheCategory::Categorized.keyspace(&config).all_pattern(),
            "categorized:*:*"
        );
    }
}
