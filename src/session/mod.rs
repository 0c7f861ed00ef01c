//! Exam Session Module
//!
//! The producer side used by API workers: answers and timer updates land in
//! the cache for immediate reads and on a queue for deferred persistence.

mod attempt_cache;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::analytics::{AnalyticsAggregator, ExamEvent};
use crate::error::{Result, SyncError};
use crate::queue::{AnswerUpdate, BatchQueue, QueuePayload, TimedOut, TimerSync};
use crate::store::{
    upsert_answer, Answer, AttemptFilter, AttemptStatus, AttemptUpdate, DurableStore,
    UpdateOutcome,
};

pub use attempt_cache::{AttemptCache, TimerSnapshot};

/// How a submitted answer was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// On the answer queue; the worker will apply it
    Queued,
    /// Queue unavailable, written straight to the durable store
    WrittenThrough,
    /// Queue unavailable and the attempt no longer accepts answers
    Rejected,
}

#[derive(Clone)]
pub struct ExamSession {
    attempts: AttemptCache,
    queue: BatchQueue,
    store: Arc<dyn DurableStore>,
    analytics: Arc<AnalyticsAggregator>,
}

impl ExamSession {
    pub fn new(
        attempts: AttemptCache,
        queue: BatchQueue,
        store: Arc<dyn DurableStore>,
        analytics: Arc<AnalyticsAggregator>,
    ) -> Self {
        Self {
            attempts,
            queue,
            store,
            analytics,
        }
    }

    // == Submit Answer ==
    /// Records an answer for read-your-write and queues it for persistence.
    ///
    /// If the queue cannot take it the answer is written through to the
    /// durable store under the in-progress precondition.
    pub async fn submit_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
        selected_option: &str,
        response_time_ms: u64,
    ) -> Result<Persistence> {
        if attempt_id.is_empty() || question_id.is_empty() {
            return Err(SyncError::InvalidRequest(
                "attempt id and question id are required".to_string(),
            ));
        }
        let answer = Answer {
            question_id: question_id.to_string(),
            selected_option: selected_option.to_string(),
            response_time_ms,
            answered_at: Utc::now(),
        };

        let mut answers = match self.attempts.answers(attempt_id).await {
            Some(cached) => cached,
            None => match self.store.find_attempt(attempt_id).await {
                Ok(attempt) => attempt.map(|a| a.answers).unwrap_or_default(),
                Err(err) => {
                    warn!(attempt_id, error = %err, "could not seed answer cache");
                    Vec::new()
                }
            },
        };
        upsert_answer(&mut answers, answer.clone());
        self.attempts.put_answers(attempt_id, &answers).await;

        let queued = self
            .queue
            .enqueue(QueuePayload::AnswerUpdate(AnswerUpdate {
                attempt_id: attempt_id.to_string(),
                question_id: answer.question_id.clone(),
                selected_option: answer.selected_option.clone(),
                response_time_ms,
                answered_at: answer.answered_at,
            }))
            .await;
        if queued {
            return Ok(Persistence::Queued);
        }

        warn!(attempt_id, question_id, "answer queue unavailable, writing through");
        let outcome = self
            .store
            .update_attempt(
                attempt_id,
                AttemptFilter::status(AttemptStatus::InProgress),
                AttemptUpdate {
                    answers: vec![answer],
                    ..Default::default()
                },
            )
            .await?;
        match outcome {
            UpdateOutcome::Applied => Ok(Persistence::WrittenThrough),
            UpdateOutcome::PreconditionFailed => Ok(Persistence::Rejected),
            UpdateOutcome::NotFound => Err(SyncError::NotFound(format!("attempt {attempt_id}"))),
        }
    }

    // == Timer ==
    /// Publishes the client's remaining time. A zero reading also reports a timeout.
    pub async fn sync_timer(&self, attempt_id: &str, user_id: &str, time_remaining_secs: u64) -> bool {
        let now = Utc::now();
        self.attempts
            .put_timer(
                attempt_id,
                &TimerSnapshot {
                    user_id: user_id.to_string(),
                    time_remaining_secs,
                    observed_at: now,
                },
            )
            .await;

        let queued = self
            .queue
            .enqueue(QueuePayload::TimerSync(TimerSync {
                attempt_id: attempt_id.to_string(),
                user_id: user_id.to_string(),
                time_remaining_secs,
                timestamp: now,
            }))
            .await;

        if time_remaining_secs == 0 {
            return self.report_timeout(attempt_id).await && queued;
        }
        queued
    }

    pub async fn report_timeout(&self, attempt_id: &str) -> bool {
        debug!(attempt_id, "timeout reported");
        self.queue
            .enqueue(QueuePayload::TimedOut(TimedOut {
                attempt_id: attempt_id.to_string(),
            }))
            .await
    }

    // == Reads ==
    /// Answers as the user last submitted them, falling back to the durable record.
    pub async fn answers(&self, attempt_id: &str) -> Result<Vec<Answer>> {
        if let Some(cached) = self.attempts.answers(attempt_id).await {
            return Ok(cached);
        }
        let attempt = self
            .store
            .find_attempt(attempt_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("attempt {attempt_id}")))?;
        self.attempts.put_answers(attempt_id, &attempt.answers).await;
        Ok(attempt.answers)
    }

    /// Remaining time from the cached timer, falling back to the durable record.
    pub async fn time_remaining(&self, attempt_id: &str) -> Result<u64> {
        if let Some(snapshot) = self.attempts.timer(attempt_id).await {
            return Ok(snapshot.time_remaining_secs);
        }
        self.store
            .find_attempt(attempt_id)
            .await?
            .map(|attempt| attempt.time_remaining_secs)
            .ok_or_else(|| SyncError::NotFound(format!("attempt {attempt_id}")))
    }

    // == Analytics ==
    pub async fn record_result(&self, exam_id: &str, event: ExamEvent) -> bool {
        self.analytics.record_event(exam_id, event).await
    }
}
