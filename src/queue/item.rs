//! Queue item and payload types.
//!
//! Every queue carries exactly one payload variant; a consumer matches on
//! [`QueuePayload`] instead of probing untyped fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// == Queue Kind ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueKind {
    AnswerUpdate,
    TimerSync,
    TimedOut,
    AnalyticsDelta,
}

impl QueueKind {
    pub const ALL: [QueueKind; 4] = [
        QueueKind::AnswerUpdate,
        QueueKind::TimerSync,
        QueueKind::TimedOut,
        QueueKind::AnalyticsDelta,
    ];

    /// Item type tag, used as the id prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::AnswerUpdate => "answer-update",
            QueueKind::TimerSync => "timer-sync",
            QueueKind::TimedOut => "timed-out",
            QueueKind::AnalyticsDelta => "analytics-delta",
        }
    }

    /// Name of the queue holding items of this kind.
    pub fn queue_name(&self) -> &'static str {
        match self {
            QueueKind::AnswerUpdate => "answer-updates",
            other => other.as_str(),
        }
    }

    /// Cache key of the backing list: `queue:<name>`.
    pub fn key(&self) -> String {
        format!("queue:{}", self.queue_name())
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.queue_name())
    }
}

// == Payloads ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerUpdate {
    pub attempt_id: String,
    pub question_id: String,
    pub selected_option: String,
    pub response_time_ms: u64,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSync {
    pub attempt_id: String,
    pub user_id: String,
    pub time_remaining_secs: u64,
    /// Client-side observation time; the latest one wins within a batch
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedOut {
    pub attempt_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsDelta {
    pub exam_id: String,
    pub attempted: u64,
    pub completed: u64,
    pub passed: u64,
    pub failed: u64,
    /// Sum of scores in hundredths of a point
    pub score_centi: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum QueuePayload {
    AnswerUpdate(AnswerUpdate),
    TimerSync(TimerSync),
    TimedOut(TimedOut),
    AnalyticsDelta(AnalyticsDelta),
}

impl QueuePayload {
    pub fn kind(&self) -> QueueKind {
        match self {
            QueuePayload::AnswerUpdate(_) => QueueKind::AnswerUpdate,
            QueuePayload::TimerSync(_) => QueueKind::TimerSync,
            QueuePayload::TimedOut(_) => QueueKind::TimedOut,
            QueuePayload::AnalyticsDelta(_) => QueueKind::AnalyticsDelta,
        }
    }
}

// == Queue Item ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// `<type>:<unix millis>:<random>`
    pub id: String,
    pub payload: QueuePayload,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(payload: QueuePayload) -> Self {
        let now = Utc::now();
        let random = Uuid::new_v4().simple().to_string();
        Self {
            id: format!(
                "{}:{}:{}",
                payload.kind().as_str(),
                now.timestamp_millis(),
                &random[..8]
            ),
            payload,
            enqueued_at: now,
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.payload.kind()
    }
}
