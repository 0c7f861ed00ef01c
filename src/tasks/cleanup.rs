//! TTL Cleanup Task
//!
//! Periodically purges expired keys from the in-process cache backend so
//! entries nobody reads again do not hold memory until evicted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheStore;
use crate::tasks::spawn_periodic;

/// Spawns the cleanup loop. It stops when `shutdown` fires.
pub fn spawn_cleanup_task(
    cache: Arc<RwLock<CacheStore>>,
    cleanup_interval_secs: u64,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    spawn_periodic("ttl-cleanup", interval, shutdown, move || {
        let cache = cache.clone();
        async move {
            let removed = cache.write().await.cleanup_expired();
            if removed > 0 {
                info!("TTL cleanup: removed {} expired entries", removed);
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
        }
    })
}
