//! Short-TTL cache projections of an attempt's answers and timer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheGateway;
use crate::store::Answer;

fn answers_key(attempt_id: &str) -> String {
    format!("attempt:answers:{attempt_id}")
}

fn timer_key(attempt_id: &str) -> String {
    format!("attempt:timer:{attempt_id}")
}

/// Last remaining-time observation pushed by the exam client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub user_id: String,
    pub time_remaining_secs: u64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AttemptCache {
    gateway: Arc<CacheGateway>,
    answer_ttl: u64,
    timer_ttl: u64,
}

impl AttemptCache {
    pub fn new(gateway: Arc<CacheGateway>, answer_ttl: u64, timer_ttl: u64) -> Self {
        Self {
            gateway,
            answer_ttl,
            timer_ttl,
        }
    }

    pub async fn answers(&self, attempt_id: &str) -> Option<Vec<Answer>> {
        self.gateway.get_json(&answers_key(attempt_id)).await
    }

    pub async fn put_answers(&self, attempt_id: &str, answers: &[Answer]) -> bool {
        self.gateway
            .set_json(&answers_key(attempt_id), answers, self.answer_ttl)
            .await
    }

    pub async fn timer(&self, attempt_id: &str) -> Option<TimerSnapshot> {
        self.gateway.get_json(&timer_key(attempt_id)).await
    }

    pub async fn put_timer(&self, attempt_id: &str, snapshot: &TimerSnapshot) -> bool {
        self.gateway
            .set_json(&timer_key(attempt_id), snapshot, self.timer_ttl)
            .await
    }

    pub async fn forget_timer(&self, attempt_id: &str) -> bool {
        self.gateway.delete(&timer_key(attempt_id)).await
    }
}
