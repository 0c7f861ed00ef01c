//! Cache Gateway Module
//!
//! Uniform fail-open access to the shared cache. Reads degrade to a miss and
//! writes degrade to `false`; no backend fault ever reaches the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::CacheBackend;
use crate::config::Config;

const DEFAULT_SET_RETRIES: u32 = 2;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_SCAN_PAGE: usize = 100;

// == Gateway Stats ==
/// Snapshot of gateway counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub hits: u64,
    pub misses: u64,
    /// Backend faults absorbed by the fail-open policy
    pub failures: u64,
    /// Extra write attempts made after a failure
    pub retries: u64,
    /// Cached values that could not be decoded
    pub decode_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    decode_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// == Cache Gateway ==
pub struct CacheGateway {
    backend: Arc<dyn CacheBackend>,
    set_retries: u32,
    retry_delay: Duration,
    scan_page_size: usize,
    counters: Counters,
}

impl CacheGateway {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            set_retries: DEFAULT_SET_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            scan_page_size: DEFAULT_SCAN_PAGE,
            counters: Counters::default(),
        }
    }

    pub fn from_config(backend: Arc<dyn CacheBackend>, config: &Config) -> Self {
        Self::new(backend)
            .with_retry(config.set_retries, config.retry_base_delay())
            .with_scan_page_size(config.scan_page_size)
    }

    /// Sets how many times a failed `set` is retried and the linear backoff unit.
    pub fn with_retry(mut self, retries: u32, base_delay: Duration) -> Self {
        self.set_retries = retries;
        self.retry_delay = base_delay;
        self
    }

    pub fn with_scan_page_size(mut self, page_size: usize) -> Self {
        self.scan_page_size = page_size.max(1);
        self
    }

    /// Raw backend for list/hash/set commands used by queues and counters.
    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Records a backend fault absorbed by a caller that used [`Self::backend`].
    pub fn note_failure(&self, operation: &str, key: &str, err: &dyn std::fmt::Display) {
        Counters::bump(&self.counters.failures);
        warn!(operation, key, error = %err, "cache operation failed, continuing without cache");
    }

    // == Get ==
    /// Returns the cached string, or None on miss or backend failure.
    pub async fn get(&self, key: &str) -> Option<String> {
        match self.backend.get(key).await {
            Ok(Some(value)) => {
                Counters::bump(&self.counters.hits);
                Some(value)
            }
            Ok(None) => {
                Counters::bump(&self.counters.misses);
                None
            }
            Err(err) => {
                Counters::bump(&self.counters.misses);
                self.note_failure("get", key, &err);
                None
            }
        }
    }

    /// Typed read. A value that fails to decode is treated as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                Counters::bump(&self.counters.decode_errors);
                debug!(key, error = %err, "discarding undecodable cache value");
                None
            }
        }
    }

    // == Set ==
    /// Writes with TTL, retrying with linear backoff. Returns false once retries are exhausted.
    pub async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        let attempts = self.set_retries + 1;
        for attempt in 1..=attempts {
            match self.backend.set_ex(key, value, ttl_secs).await {
                Ok(()) => return true,
                Err(err) if attempt < attempts => {
                    Counters::bump(&self.counters.retries);
                    debug!(key, attempt, error = %err, "cache set failed, retrying");
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
                Err(err) => {
                    self.note_failure("set", key, &err);
                }
            }
        }
        false
    }

    /// Typed write. A value that fails to encode is reported as a failed write.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: u64) -> bool {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw, ttl_secs).await,
            Err(err) => {
                warn!(key, error = %err, "could not encode cache value");
                false
            }
        }
    }

    // == Delete ==
    /// Removes a key. Returns false only on backend failure.
    pub async fn delete(&self, key: &str) -> bool {
        match self.backend.del(&[key.to_string()]).await {
            Ok(_) => true,
            Err(err) => {
                self.note_failure("delete", key, &err);
                false
            }
        }
    }

    // == Clear By Pattern ==
    /// Deletes every key matching `pattern`, one SCAN page at a time.
    ///
    /// Returns the number of keys deleted before completion or the first failure.
    pub async fn clear_by_pattern(&self, pattern: &str) -> usize {
        let mut cursor = 0;
        let mut deleted = 0;
        loop {
            let (next, keys) = match self
                .backend
                .scan(cursor, pattern, self.scan_page_size)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    self.note_failure("scan", pattern, &err);
                    return deleted;
                }
            };

            if !keys.is_empty() {
                match self.backend.del(&keys).await {
                    Ok(count) => deleted += count,
                    Err(err) => {
                        self.note_failure("del", pattern, &err);
                        return deleted;
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }
        debug!(pattern, deleted, "cleared cache keys by pattern");
        deleted
    }

    // == Stats ==
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            decode_errors: self.counters.decode_errors.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for CacheGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheGateway")
            .field("set_retries", &self.set_retries)
            .field("retry_delay", &self.retry_delay)
            .field("scan_page_size", &self.scan_page_size)
            .finish_non_exhaustive()
    }
}
