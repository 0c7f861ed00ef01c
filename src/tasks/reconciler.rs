//! Reconciler
//!
//! One method per reconciliation loop. Each call drains (or scans) one batch,
//! applies it to the durable store and returns a [`TickReport`]. A failure on
//! one item is logged and counted; the rest of the batch still applies. Items
//! whose durable write errored go back on their queue for the next tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::queue::{AnswerUpdate, BatchQueue, QueueKind, QueuePayload, TimedOut, TimerSync};
use crate::session::AttemptCache;
use crate::store::{
    upsert_answer, Answer, AttemptFilter, AttemptStatus, AttemptUpdate, DurableStore,
    ExamAttempt, UpdateOutcome,
};

// == Tick Report ==
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Queue entries read or records scanned
    pub read: usize,
    pub applied: usize,
    /// Malformed entries, duplicates and failed preconditions
    pub skipped: usize,
    pub failed: usize,
    /// Failed entries pushed back for a later tick
    pub requeued: usize,
}

impl TickReport {
    fn log(&self, task: &'static str) {
        if self.applied > 0 || self.failed > 0 {
            info!(
                task,
                read = self.read,
                applied = self.applied,
                skipped = self.skipped,
                failed = self.failed,
                requeued = self.requeued,
                "reconciliation tick"
            );
        } else if self.read > 0 {
            debug!(task, read = self.read, skipped = self.skipped, "reconciliation tick");
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BatchLimits {
    answers: usize,
    timers: usize,
    timeouts: usize,
}

// == Reconciler ==
#[derive(Clone)]
pub struct Reconciler {
    queue: BatchQueue,
    store: Arc<dyn DurableStore>,
    attempts: AttemptCache,
    limits: BatchLimits,
    stale_after: chrono::Duration,
}

impl Reconciler {
    pub fn new(
        queue: BatchQueue,
        store: Arc<dyn DurableStore>,
        attempts: AttemptCache,
        config: &Config,
    ) -> Self {
        Self {
            queue,
            store,
            attempts,
            limits: BatchLimits {
                answers: config.answer_batch_size,
                timers: config.timer_batch_size,
                timeouts: config.timeout_batch_size,
            },
            stale_after: config.stale_after_duration(),
        }
    }

    // == Answer Flush ==
    /// Applies queued answers, grouped per attempt, to in-progress attempts only.
    pub async fn flush_answers(&self) -> TickReport {
        let batch = self
            .queue
            .drain(QueueKind::AnswerUpdate, self.limits.answers)
            .await;
        let mut report = TickReport {
            read: batch.read,
            skipped: batch.malformed,
            ..Default::default()
        };

        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<AnswerUpdate>> = HashMap::new();
        for item in batch.items {
            let QueuePayload::AnswerUpdate(update) = item.payload else {
                continue;
            };
            if update.attempt_id.is_empty() || update.question_id.is_empty() {
                report.skipped += 1;
                warn!(id = %item.id, "answer update without attempt or question id");
                continue;
            }
            groups
                .entry(update.attempt_id.clone())
                .or_insert_with(|| {
                    order.push(update.attempt_id.clone());
                    Vec::new()
                })
                .push(update);
        }

        for attempt_id in order {
            let updates = groups.remove(&attempt_id).unwrap_or_default();
            let count = updates.len();
            let update = AttemptUpdate {
                answers: updates.iter().map(to_answer).collect(),
                ..Default::default()
            };
            match self
                .store
                .update_attempt(&attempt_id, in_progress(), update)
                .await
            {
                Ok(UpdateOutcome::Applied) => {
                    report.applied += count;
                    self.refresh_answer_cache(&attempt_id).await;
                }
                Ok(UpdateOutcome::PreconditionFailed) => {
                    report.skipped += count;
                    debug!(attempt_id = %attempt_id, count, "attempt no longer in progress, dropping answers");
                }
                Ok(UpdateOutcome::NotFound) => {
                    report.skipped += count;
                    warn!(attempt_id = %attempt_id, count, "answers for unknown attempt");
                }
                Err(err) => {
                    report.failed += count;
                    error!(attempt_id = %attempt_id, count, error = %err, "failed to persist answers");
                    self.requeue(updates.into_iter().map(QueuePayload::AnswerUpdate), &mut report)
                        .await;
                }
            }
        }

        report.log("answer-flush");
        report
    }

    /// Rebuilds the answer cache from the durable record, keeping any cached
    /// answer newer than its persisted counterpart.
    async fn refresh_answer_cache(&self, attempt_id: &str) {
        let attempt = match self.store.find_attempt(attempt_id).await {
            Ok(Some(attempt)) => attempt,
            Ok(None) => return,
            Err(err) => {
                warn!(attempt_id = %attempt_id, error = %err, "could not reload attempt for cache refresh");
                return;
            }
        };
        let mut merged = attempt.answers.clone();
        if let Some(cached) = self.attempts.answers(attempt_id).await {
            for answer in cached {
                let newer = attempt
                    .answer_for(&answer.question_id)
                    .map_or(true, |persisted| answer.answered_at > persisted.answered_at);
                if newer {
                    upsert_answer(&mut merged, answer);
                }
            }
        }
        self.attempts.put_answers(attempt_id, &merged).await;
    }

    async fn requeue(
        &self,
        payloads: impl IntoIterator<Item = QueuePayload>,
        report: &mut TickReport,
    ) {
        for payload in payloads {
            let kind = payload.kind();
            if self.queue.enqueue(payload).await {
                report.requeued += 1;
            } else {
                error!(queue = %kind, "could not requeue failed item, it is lost");
            }
        }
    }

    // == Timer Sync ==
    /// Applies the latest remaining-time reading per attempt in the batch.
    pub async fn sync_timers(&self) -> TickReport {
        let batch = self
            .queue
            .drain(QueueKind::TimerSync, self.limits.timers)
            .await;
        let mut report = TickReport {
            read: batch.read,
            skipped: batch.malformed,
            ..Default::default()
        };

        let mut latest: HashMap<String, TimerSync> = HashMap::new();
        for item in batch.items {
            let QueuePayload::TimerSync(sync) = item.payload else {
                continue;
            };
            match latest.get(&sync.attempt_id).map(|current| current.timestamp) {
                Some(seen) => {
                    report.skipped += 1;
                    if sync.timestamp >= seen {
                        latest.insert(sync.attempt_id.clone(), sync);
                    }
                }
                None => {
                    latest.insert(sync.attempt_id.clone(), sync);
                }
            }
        }

        for (attempt_id, sync) in latest {
            let update = AttemptUpdate {
                time_remaining_secs: Some(sync.time_remaining_secs),
                last_synced_at: Some(sync.timestamp),
                ..Default::default()
            };
            let filter = in_progress().synced_at_or_before(sync.timestamp);
            match self.store.update_attempt(&attempt_id, filter, update).await
            {
                Ok(UpdateOutcome::Applied) => report.applied += 1,
                Ok(outcome) => {
                    report.skipped += 1;
                    debug!(attempt_id = %attempt_id, ?outcome, "timer sync not applied");
                }
                Err(err) => {
                    report.failed += 1;
                    error!(attempt_id = %attempt_id, error = %err, "failed to sync timer");
                    self.requeue([QueuePayload::TimerSync(sync)], &mut report).await;
                }
            }
        }

        report.log("timer-sync");
        report
    }

    // == Timed Out ==
    /// Moves in-progress attempts to `timed-out`. Completed attempts are left alone.
    pub async fn finalize_timeouts(&self) -> TickReport {
        let batch = self
            .queue
            .drain(QueueKind::TimedOut, self.limits.timeouts)
            .await;
        let mut report = TickReport {
            read: batch.read,
            skipped: batch.malformed,
            ..Default::default()
        };

        let mut seen = HashSet::new();
        for item in batch.items {
            let QueuePayload::TimedOut(TimedOut { attempt_id }) = item.payload else {
                continue;
            };
            if !seen.insert(attempt_id.clone()) {
                report.skipped += 1;
                continue;
            }
            match self.time_out(&attempt_id, Utc::now()).await {
                Ok(UpdateOutcome::Applied) => {
                    report.applied += 1;
                    info!(attempt_id = %attempt_id, "attempt timed out");
                }
                Ok(outcome) => {
                    report.skipped += 1;
                    debug!(attempt_id = %attempt_id, ?outcome, "timeout not applied");
                }
                Err(err) => {
                    report.failed += 1;
                    error!(attempt_id = %attempt_id, error = %err, "failed to time out attempt");
                    self.requeue([QueuePayload::TimedOut(TimedOut { attempt_id })], &mut report)
                        .await;
                }
            }
        }

        report.log("timed-out");
        report
    }

    async fn time_out(&self, attempt_id: &str, now: DateTime<Utc>) -> Result<UpdateOutcome> {
        let update = AttemptUpdate {
            status: Some(AttemptStatus::TimedOut),
            time_remaining_secs: Some(0),
            end_time: Some(now),
            ..Default::default()
        };
        let outcome = self
            .store
            .update_attempt(attempt_id, in_progress(), update)
            .await?;
        if outcome == UpdateOutcome::Applied {
            self.attempts.forget_timer(attempt_id).await;
        }
        Ok(outcome)
    }

    // == Stale Scan ==
    /// Finds in-progress attempts nobody has touched recently and queues
    /// corrections: a timeout when their time has run out, otherwise a timer
    /// sync when the cached timer disagrees with the durable one.
    pub async fn scan_stale_attempts(&self) -> TickReport {
        let now = Utc::now();
        let mut report = TickReport::default();
        let stale = match self
            .store
            .find_stale_attempts(AttemptStatus::InProgress, now - self.stale_after)
            .await
        {
            Ok(stale) => stale,
            Err(err) => {
                report.failed += 1;
                error!(error = %err, "stale attempt scan failed");
                return report;
            }
        };
        report.read = stale.len();

        for attempt in stale {
            let queued = match self.correction_for(&attempt, now).await {
                Some(payload) => self.queue.enqueue(payload).await,
                None => {
                    report.skipped += 1;
                    continue;
                }
            };
            if queued {
                report.applied += 1;
            } else {
                report.failed += 1;
            }
        }

        report.log("stale-scan");
        report
    }

    async fn correction_for(&self, attempt: &ExamAttempt, now: DateTime<Utc>) -> Option<QueuePayload> {
        let cached = self.attempts.timer(&attempt.id).await;
        let (remaining, observed_at) = match &cached {
            Some(snapshot) => (snapshot.time_remaining_secs, snapshot.observed_at),
            None => (
                attempt.time_remaining_secs,
                attempt.last_synced_at.unwrap_or(attempt.started_at),
            ),
        };
        let elapsed = (now - observed_at).num_seconds().max(0) as u64;

        if elapsed >= remaining {
            return Some(QueuePayload::TimedOut(TimedOut {
                attempt_id: attempt.id.clone(),
            }));
        }
        match cached {
            Some(snapshot) if snapshot.time_remaining_secs != attempt.time_remaining_secs => {
                Some(QueuePayload::TimerSync(TimerSync {
                    attempt_id: attempt.id.clone(),
                    user_id: snapshot.user_id,
                    time_remaining_secs: snapshot.time_remaining_secs,
                    timestamp: snapshot.observed_at,
                }))
            }
            _ => None,
        }
    }
}

fn to_answer(update: &AnswerUpdate) -> Answer {
    Answer {
        question_id: update.question_id.clone(),
        selected_option: update.selected_option.clone(),
        response_time_ms: update.response_time_ms,
        answered_at: update.answered_at,
    }
}

fn in_progress() -> AttemptFilter {
    AttemptFilter::status(AttemptStatus::InProgress)
}
