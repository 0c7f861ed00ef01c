//! Engine wiring: builds every component over one cache backend and one durable store.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::analytics::AnalyticsAggregator;
use crate::cache::{CacheBackend, CacheCategory, CacheGateway, ShardedCache};
use crate::config::Config;
use crate::queue::BatchQueue;
use crate::session::{AttemptCache, ExamSession};
use crate::store::DurableStore;
use crate::tasks::Reconciler;

/// Shared handles to every component. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    pub config: Arc<Config>,
    pub gateway: Arc<CacheGateway>,
    pub queue: BatchQueue,
    pub store: Arc<dyn DurableStore>,
    pub analytics: Arc<AnalyticsAggregator>,
    pub session: ExamSession,
    pub reconciler: Reconciler,
}

impl Engine {
    pub fn new(config: Config, backend: Arc<dyn CacheBackend>, store: Arc<dyn DurableStore>) -> Self {
        let gateway = Arc::new(CacheGateway::from_config(backend, &config));
        let queue = BatchQueue::new(gateway.clone(), config.queue_capacity);
        let attempts = AttemptCache::new(gateway.clone(), config.answer_ttl, config.timer_ttl);
        let analytics = Arc::new(AnalyticsAggregator::new(
            gateway.clone(),
            queue.clone(),
            store.clone(),
        ));
        let session = ExamSession::new(
            attempts.clone(),
            queue.clone(),
            store.clone(),
            analytics.clone(),
        );
        let reconciler = Reconciler::new(queue.clone(), store.clone(), attempts, &config);

        Self {
            config: Arc::new(config),
            gateway,
            queue,
            store,
            analytics,
            session,
            reconciler,
        }
    }

    /// Typed read-through cache for one feature area.
    pub fn sharded_cache<T>(&self, category: CacheCategory) -> ShardedCache<T>
    where
        T: Serialize + DeserializeOwned,
    {
        ShardedCache::for_category(self.gateway.clone(), category, &self.config)
    }
}
