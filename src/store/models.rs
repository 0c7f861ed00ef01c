//! Durable record shapes the engine reads and writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// == Attempt Status ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptStatus {
    InProgress,
    Paused,
    Completed,
    TimedOut,
}

impl AttemptStatus {
    /// Completed and timed-out attempts accept no further mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptStatus::Completed | AttemptStatus::TimedOut)
    }
}

// == Answer ==
/// One recorded answer; an attempt holds at most one per question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub question_id: String,
    pub selected_option: String,
    pub response_time_ms: u64,
    /// When the user submitted it, not when it was persisted
    pub answered_at: DateTime<Utc>,
}

/// Inserts `answer` or replaces the existing answer for the same question.
pub fn upsert_answer(answers: &mut Vec<Answer>, answer: Answer) {
    match answers
        .iter_mut()
        .find(|existing| existing.question_id == answer.question_id)
    {
        Some(existing) => *existing = answer,
        None => answers.push(answer),
    }
}

/// Like [`upsert_answer`], but an answer older than the one already held for
/// its question is ignored. Redelivered queue items rely on this.
pub fn merge_answer(answers: &mut Vec<Answer>, answer: Answer) {
    match answers
        .iter_mut()
        .find(|existing| existing.question_id == answer.question_id)
    {
        Some(existing) if answer.answered_at >= existing.answered_at => *existing = answer,
        Some(_) => {}
        None => answers.push(answer),
    }
}

// == Exam Attempt ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamAttempt {
    pub id: String,
    pub user_id: String,
    pub exam_id: String,
    pub status: AttemptStatus,
    pub time_remaining_secs: u64,
    pub answers: Vec<Answer>,
    pub started_at: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub score: Option<f64>,
    pub passed: Option<bool>,
}

impl ExamAttempt {
    /// A fresh in-progress attempt with the full time allowance.
    pub fn start(
        id: impl Into<String>,
        user_id: impl Into<String>,
        exam_id: impl Into<String>,
        time_limit_secs: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            exam_id: exam_id.into(),
            status: AttemptStatus::InProgress,
            time_remaining_secs: time_limit_secs,
            answers: Vec::new(),
            started_at: now,
            end_time: None,
            last_synced_at: None,
            updated_at: now,
            score: None,
            passed: None,
        }
    }

    pub fn answer_for(&self, question_id: &str) -> Option<&Answer> {
        self.answers.iter().find(|a| a.question_id == question_id)
    }
}

// == Filters and Updates ==
/// Precondition for a conditional attempt update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptFilter {
    pub status: Option<AttemptStatus>,
    /// Matches only if the attempt has not been synced after this instant
    pub synced_at_or_before: Option<DateTime<Utc>>,
}

impl AttemptFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn status(status: AttemptStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Rejects the update if a newer timer reading was already persisted.
    pub fn synced_at_or_before(mut self, timestamp: DateTime<Utc>) -> Self {
        self.synced_at_or_before = Some(timestamp);
        self
    }

    pub fn matches(&self, attempt: &ExamAttempt) -> bool {
        let status_ok = self.status.map_or(true, |s| attempt.status == s);
        let sync_ok = match (self.synced_at_or_before, attempt.last_synced_at) {
            (Some(limit), Some(synced)) => synced <= limit,
            _ => true,
        };
        status_ok && sync_ok
    }
}

/// Fields to set on an attempt. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptUpdate {
    pub status: Option<AttemptStatus>,
    pub time_remaining_secs: Option<u64>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Merged by question id, in order; an older answer never replaces a newer one
    pub answers: Vec<Answer>,
}

impl AttemptUpdate {
    pub fn apply_to(&self, attempt: &mut ExamAttempt) {
        if let Some(status) = self.status {
            attempt.status = status;
        }
        if let Some(remaining) = self.time_remaining_secs {
            attempt.time_remaining_secs = remaining;
        }
        if let Some(end) = self.end_time {
            attempt.end_time = Some(end);
        }
        if let Some(synced) = self.last_synced_at {
            attempt.last_synced_at = Some(synced);
        }
        for answer in &self.answers {
            merge_answer(&mut attempt.answers, answer.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The record exists but did not satisfy the filter
    PreconditionFailed,
    NotFound,
}

/// Selection for counting attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptQuery {
    pub exam_id: Option<String>,
    pub status: Option<AttemptStatus>,
}

// == Analytics ==
/// Aggregated outcome totals for one exam.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExamTotals {
    pub total_attempted: u64,
    pub total_completed: u64,
    pub pass_count: u64,
    pub fail_count: u64,
    pub total_score: f64,
}

/// Durable per-exam analytics row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamAnalytics {
    pub exam_id: String,
    pub total_attempted: u64,
    pub total_completed: u64,
    pub pass_count: u64,
    pub fail_count: u64,
    pub pass_percentage: f64,
    pub average_score: f64,
    pub last_updated: DateTime<Utc>,
}
