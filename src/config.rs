//! Configuration Module
//!
//! Handles loading worker and cache configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Engine configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of keys the in-process cache backend can hold
    pub max_entries: usize,
    /// Background TTL cleanup interval in seconds
    pub cleanup_interval: u64,
    /// Admin inspection API port
    pub admin_port: u16,

    /// Maximum length of each batch queue before the oldest items are shed
    pub queue_capacity: usize,
    pub answer_batch_size: usize,
    pub timer_batch_size: usize,
    pub timeout_batch_size: usize,
    pub analytics_batch_size: usize,

    /// Loop intervals in seconds
    pub answer_flush_interval: u64,
    pub timeout_interval: u64,
    pub timer_sync_interval: u64,
    pub stale_scan_interval: u64,
    pub analytics_consume_interval: u64,
    pub analytics_sync_interval: u64,
    /// Attempts not updated for this many seconds are considered stale
    pub stale_after: u64,

    /// Shard counts per feature
    pub access_shards: u32,
    pub bundle_shards: u32,
    pub attempt_shards: u32,
    pub question_shards: u32,

    /// TTLs in seconds per cache category
    pub access_ttl: u64,
    pub bundle_ttl: u64,
    pub dashboard_ttl: u64,
    pub question_ttl: u64,
    pub rules_ttl: u64,
    pub answer_ttl: u64,
    pub timer_ttl: u64,

    /// Gateway write retries after the first attempt
    pub set_retries: u32,
    /// Linear backoff unit in milliseconds
    pub retry_base_delay_ms: u64,
    /// Keys requested per SCAN page
    pub scan_page_size: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_ENTRIES` (default: 100000), `CLEANUP_INTERVAL` (default: 1)
    /// - `ADMIN_PORT` (default: 3100)
    /// - `QUEUE_CAPACITY` (default: 10000)
    /// - `ANSWER_BATCH_SIZE`, `TIMER_BATCH_SIZE`, `ANALYTICS_BATCH_SIZE` (default: 100),
    ///   `TIMEOUT_BATCH_SIZE` (default: 50)
    /// - `ANSWER_FLUSH_INTERVAL_SECS` (2), `TIMEOUT_INTERVAL_SECS` (5),
    ///   `TIMER_SYNC_INTERVAL_SECS` (10), `STALE_SCAN_INTERVAL_SECS` (30),
    ///   `ANALYTICS_CONSUME_INTERVAL_SECS` (2), `ANALYTICS_SYNC_INTERVAL_SECS` (60),
    ///   `STALE_AFTER_SECS` (60)
    /// - `ACCESS_SHARDS` (16), `BUNDLE_SHARDS` (8), `ATTEMPT_SHARDS` (8),
    ///   `QUESTION_SHARDS` (8)
    /// - `ACCESS_TTL` (300), `BUNDLE_TTL` (900), `DASHBOARD_TTL` (900),
    ///   `QUESTION_TTL` (3600), `RULES_TTL` (86400), `ANSWER_TTL` (300), `TIMER_TTL` (3600)
    /// - `SET_RETRIES` (2), `RETRY_BASE_DELAY_MS` (200), `SCAN_PAGE_SIZE` (100)
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_entries: env_or("MAX_ENTRIES", d.max_entries),
            cleanup_interval: interval_or("CLEANUP_INTERVAL", d.cleanup_interval),
            admin_port: env_or("ADMIN_PORT", d.admin_port),
            queue_capacity: env_or("QUEUE_CAPACITY", d.queue_capacity),
            answer_batch_size: env_or("ANSWER_BATCH_SIZE", d.answer_batch_size),
            timer_batch_size: env_or("TIMER_BATCH_SIZE", d.timer_batch_size),
            timeout_batch_size: env_or("TIMEOUT_BATCH_SIZE", d.timeout_batch_size),
            analytics_batch_size: env_or("ANALYTICS_BATCH_SIZE", d.analytics_batch_size),
            answer_flush_interval: interval_or(
                "ANSWER_FLUSH_INTERVAL_SECS",
                d.answer_flush_interval,
            ),
            timeout_interval: interval_or("TIMEOUT_INTERVAL_SECS", d.timeout_interval),
            timer_sync_interval: interval_or("TIMER_SYNC_INTERVAL_SECS", d.timer_sync_interval),
            stale_scan_interval: interval_or("STALE_SCAN_INTERVAL_SECS", d.stale_scan_interval),
            analytics_consume_interval: interval_or(
                "ANALYTICS_CONSUME_INTERVAL_SECS",
                d.analytics_consume_interval,
            ),
            analytics_sync_interval: interval_or(
                "ANALYTICS_SYNC_INTERVAL_SECS",
                d.analytics_sync_interval,
            ),
            stale_after: env_or("STALE_AFTER_SECS", d.stale_after),
            access_shards: env_or("ACCESS_SHARDS", d.access_shards),
            bundle_shards: env_or("BUNDLE_SHARDS", d.bundle_shards),
            attempt_shards: env_or("ATTEMPT_SHARDS", d.attempt_shards),
            question_shards: env_or("QUESTION_SHARDS", d.question_shards),
            access_ttl: env_or("ACCESS_TTL", d.access_ttl),
            bundle_ttl: env_or("BUNDLE_TTL", d.bundle_ttl),
            dashboard_ttl: env_or("DASHBOARD_TTL", d.dashboard_ttl),
            question_ttl: env_or("QUESTION_TTL", d.question_ttl),
            rules_ttl: env_or("RULES_TTL", d.rules_ttl),
            answer_ttl: env_or("ANSWER_TTL", d.answer_ttl),
            timer_ttl: env_or("TIMER_TTL", d.timer_ttl),
            set_retries: env_or("SET_RETRIES", d.set_retries),
            retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", d.retry_base_delay_ms),
            scan_page_size: env_or("SCAN_PAGE_SIZE", d.scan_page_size),
        }
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn stale_after_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after as i64)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            cleanup_interval: 1,
            admin_port: 3100,
            queue_capacity: 10_000,
            answer_batch_size: 100,
            timer_batch_size: 100,
            timeout_batch_size: 50,
            analytics_batch_size: 100,
            answer_flush_interval: 2,
            timeout_interval: 5,
            timer_sync_interval: 10,
            stale_scan_interval: 30,
            analytics_consume_interval: 2,
            analytics_sync_interval: 60,
            stale_after: 60,
            access_shards: 16,
            bundle_shards: 8,
            attempt_shards: 8,
            question_shards: 8,
            access_ttl: 300,
            bundle_ttl: 900,
            dashboard_ttl: 900,
            question_ttl: 3600,
            rules_ttl: 86_400,
            answer_ttl: 300,
            timer_ttl: 3600,
            set_retries: 2,
            retry_base_delay_ms: 200,
            scan_page_size: 100,
        }
    }
}

/// Parses an environment variable, falling back to `default` when unset or malformed.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Like [`env_or`], for loop intervals in seconds; never below one second.
fn interval_or(name: &str, default: u64) -> u64 {
    env_or(name, default).max(1)
}
