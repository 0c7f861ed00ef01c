//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::analytics::AnalyticsCounter;
use crate::cache::{CacheStats, GatewayStats};
use crate::queue::QueueKind;

/// Response body for `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Crate version
    pub version: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Response body for `GET /stats`
///
/// `store` is absent when the worker runs against an external cache.
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub gateway: GatewayStats,
    /// hits / (hits + misses) as seen by the gateway
    pub hit_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<CacheStats>,
}

impl StatsResponse {
    pub fn new(gateway: GatewayStats, store: Option<CacheStats>) -> Self {
        let total_reads = gateway.hits + gateway.misses;
        let hit_rate = if total_reads > 0 {
            gateway.hits as f64 / total_reads as f64
        } else {
            0.0
        };
        Self {
            gateway,
            hit_rate,
            store,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueDepth {
    pub name: &'static str,
    pub key: String,
    pub depth: usize,
}

/// Response body for `GET /queues`
#[derive(Debug, Clone, Serialize)]
pub struct QueuesResponse {
    pub capacity: usize,
    pub queues: Vec<QueueDepth>,
}

impl QueuesResponse {
    pub fn new(capacity: usize, depths: Vec<(QueueKind, usize)>) -> Self {
        let queues = depths
            .into_iter()
            .map(|(kind, depth)| QueueDepth {
                name: kind.queue_name(),
                key: kind.key(),
                depth,
            })
            .collect();
        Self { capacity, queues }
    }
}

/// Response body for `GET /analytics/:exam_id`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse {
    #[serde(flatten)]
    pub counter: AnalyticsCounter,
    pub pass_percentage: f64,
    pub average_score: f64,
}

impl From<AnalyticsCounter> for AnalyticsResponse {
    fn from(counter: AnalyticsCounter) -> Self {
        Self {
            pass_percentage: counter.pass_percentage(),
            average_score: counter.average_score(),
            counter,
        }
    }
}

/// Response body for `DELETE /cache/:pattern`
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub pattern: String,
    pub deleted: usize,
}
