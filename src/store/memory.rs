//! In-process durable store used by the worker binary and the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{Result, SyncError};
use crate::store::{
    AttemptFilter, AttemptQuery, AttemptStatus, AttemptUpdate, DurableStore, ExamAnalytics,
    ExamAttempt, ExamTotals, UpdateOutcome,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    attempts: RwLock<HashMap<String, ExamAttempt>>,
    analytics: RwLock<HashMap<String, ExamAnalytics>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces an attempt, as the exam-taking flow would.
    pub async fn insert_attempt(&self, attempt: ExamAttempt) -> Result<()> {
        if attempt.id.is_empty() {
            return Err(SyncError::InvalidRequest("attempt id cannot be empty".to_string()));
        }
        self.attempts
            .write()
            .await
            .insert(attempt.id.clone(), attempt);
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<ExamAttempt>> {
        Ok(self.attempts.read().await.get(attempt_id).cloned())
    }

    async fn update_attempt(
        &self,
        attempt_id: &str,
        filter: AttemptFilter,
        update: AttemptUpdate,
    ) -> Result<UpdateOutcome> {
        let mut attempts = self.attempts.write().await;
        let Some(attempt) = attempts.get_mut(attempt_id) else {
            return Ok(UpdateOutcome::NotFound);
        };
        if !filter.matches(attempt) {
            return Ok(UpdateOutcome::PreconditionFailed);
        }
        update.apply_to(attempt);
        attempt.updated_at = Utc::now();
        Ok(UpdateOutcome::Applied)
    }

    async fn count_attempts(&self, query: AttemptQuery) -> Result<u64> {
        let attempts = self.attempts.read().await;
        let count = attempts
            .values()
            .filter(|a| query.exam_id.as_deref().map_or(true, |id| a.exam_id == id))
            .filter(|a| query.status.map_or(true, |s| a.status == s))
            .count();
        Ok(count as u64)
    }

    async fn find_stale_attempts(
        &self,
        status: AttemptStatus,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<ExamAttempt>> {
        let attempts = self.attempts.read().await;
        Ok(attempts
            .values()
            .filter(|a| a.status == status && a.updated_at < updated_before)
            .cloned()
            .collect())
    }

    async fn aggregate_exam(&self, exam_id: &str) -> Result<ExamTotals> {
        let attempts = self.attempts.read().await;
        let mut totals = ExamTotals::default();
        for attempt in attempts.values().filter(|a| a.exam_id == exam_id) {
            totals.total_attempted += 1;
            if !attempt.status.is_terminal() {
                continue;
            }
            totals.total_completed += 1;
            totals.total_score += attempt.score.unwrap_or(0.0);
            match attempt.passed {
                Some(true) => totals.pass_count += 1,
                Some(false) => totals.fail_count += 1,
                None => {}
            }
        }
        Ok(totals)
    }

    async fn upsert_analytics(&self, record: ExamAnalytics) -> Result<()> {
        self.analytics
            .write()
            .await
            .insert(record.exam_id.clone(), record);
        Ok(())
    }

    async fn find_analytics(&self, exam_id: &str) -> Result<Option<ExamAnalytics>> {
        Ok(self.analytics.read().await.get(exam_id).cloned())
    }

    async fn close(&self) {
        info!("in-memory durable store closed");
    }
}
