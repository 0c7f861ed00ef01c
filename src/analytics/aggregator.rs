//! Analytics Aggregator
//!
//! Outcome events are queued instead of incrementing hot counters inline.
//! A consumer folds queued deltas into per-exam cache counters and marks them
//! dirty; a slower sync pass writes dirty counters to the durable store.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::analytics::counter::{
    counter_key, AnalyticsCounter, DIRTY_SET_KEY, FIELD_ATTEMPTED, FIELD_COMPLETED,
    FIELD_FAILED, FIELD_NEEDS_SYNC, FIELD_PASSED, FIELD_SCORE, FIELD_VERSION,
};
use crate::cache::CacheGateway;
use crate::error::{Result, SyncError};
use crate::queue::{AnalyticsDelta, BatchQueue, QueueKind, QueuePayload};
use crate::store::{DurableStore, ExamAnalytics};

// == Exam Event ==
/// One outcome observation for an exam.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExamEvent {
    pub attempted: bool,
    pub completed: bool,
    pub passed: bool,
    pub failed: bool,
    pub score: Option<f64>,
}

impl ExamEvent {
    pub fn started() -> Self {
        Self {
            attempted: true,
            ..Default::default()
        }
    }

    pub fn finished(score: f64, passed: bool) -> Self {
        Self {
            completed: true,
            passed,
            failed: !passed,
            score: Some(score),
            ..Default::default()
        }
    }

    fn to_delta(self, exam_id: &str) -> AnalyticsDelta {
        AnalyticsDelta {
            exam_id: exam_id.to_string(),
            attempted: u64::from(self.attempted),
            completed: u64::from(self.completed),
            passed: u64::from(self.passed),
            failed: u64::from(self.failed),
            score_centi: self.score.map_or(0, |s| (s * 100.0).round() as i64),
        }
    }
}

// == Reports ==
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumeReport {
    pub items: usize,
    pub exams: usize,
    pub failed_exams: usize,
    pub malformed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced: usize,
    /// Written, but incremented again during the write; stays dirty
    pub still_dirty: usize,
    pub failed: usize,
}

// == Aggregator ==
pub struct AnalyticsAggregator {
    gateway: Arc<CacheGateway>,
    queue: BatchQueue,
    store: Arc<dyn DurableStore>,
}

impl AnalyticsAggregator {
    pub fn new(gateway: Arc<CacheGateway>, queue: BatchQueue, store: Arc<dyn DurableStore>) -> Self {
        Self {
            gateway,
            queue,
            store,
        }
    }

    // == Record Event ==
    /// Queues an outcome event. Returns false if it could not be queued.
    pub async fn record_event(&self, exam_id: &str, event: ExamEvent) -> bool {
        if exam_id.is_empty() {
            warn!("dropping analytics event without exam id");
            return false;
        }
        self.queue
            .enqueue(QueuePayload::AnalyticsDelta(event.to_delta(exam_id)))
            .await
    }

    // == Consume Deltas ==
    /// Drains queued deltas, sums them per exam and applies them to the counters.
    pub async fn consume(&self, max_items: usize) -> ConsumeReport {
        let batch = self.queue.drain(QueueKind::AnalyticsDelta, max_items).await;
        let mut report = ConsumeReport {
            items: batch.items.len(),
            malformed: batch.malformed,
            ..Default::default()
        };

        let mut sums: HashMap<String, AnalyticsDelta> = HashMap::new();
        for item in batch.items {
            let QueuePayload::AnalyticsDelta(delta) = item.payload else {
                continue;
            };
            let sum = sums.entry(delta.exam_id.clone()).or_insert_with(|| AnalyticsDelta {
                exam_id: delta.exam_id.clone(),
                ..Default::default()
            });
            sum.attempted += delta.attempted;
            sum.completed += delta.completed;
            sum.passed += delta.passed;
            sum.failed += delta.failed;
            sum.score_centi += delta.score_centi;
        }

        report.exams = sums.len();
        for sum in sums.values() {
            if let Err(err) = self.apply_delta(sum).await {
                report.failed_exams += 1;
                error!(exam_id = %sum.exam_id, delta = ?sum, error = %err, "failed to apply analytics delta");
            }
        }
        if report.items > 0 {
            debug!(?report, "analytics deltas consumed");
        }
        report
    }

    async fn apply_delta(&self, delta: &AnalyticsDelta) -> Result<()> {
        let backend = self.gateway.backend();
        let key = counter_key(&delta.exam_id);
        let increments = [
            (FIELD_ATTEMPTED, delta.attempted as i64),
            (FIELD_COMPLETED, delta.completed as i64),
            (FIELD_PASSED, delta.passed as i64),
            (FIELD_FAILED, delta.failed as i64),
            (FIELD_SCORE, delta.score_centi),
        ];
        for (field, amount) in increments {
            if amount != 0 {
                backend.hincrby(&key, field, amount).await?;
            }
        }
        backend.hincrby(&key, FIELD_VERSION, 1).await?;
        backend
            .hset(&key, &[(FIELD_NEEDS_SYNC.to_string(), "1".to_string())])
            .await?;
        backend.sadd(DIRTY_SET_KEY, &delta.exam_id).await?;
        Ok(())
    }

    // == Flush ==
    /// Writes every dirty counter to the durable store.
    ///
    /// A counter whose write fails stays dirty and is retried next cycle.
    pub async fn flush(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let dirty = match self.gateway.backend().smembers(DIRTY_SET_KEY).await {
            Ok(dirty) => dirty,
            Err(err) => {
                self.gateway.note_failure("smembers", DIRTY_SET_KEY, &err);
                return report;
            }
        };

        for exam_id in dirty {
            match self.sync_one(&exam_id).await {
                Ok(true) => report.synced += 1,
                Ok(false) => {
                    report.synced += 1;
                    report.still_dirty += 1;
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(exam_id = %exam_id, error = %err, "analytics sync failed, will retry");
                }
            }
        }
        if report.synced > 0 || report.failed > 0 {
            info!(
                synced = report.synced,
                still_dirty = report.still_dirty,
                failed = report.failed,
                "analytics synced to durable store"
            );
        }
        report
    }

    /// Returns Ok(true) if the counter was written and marked clean.
    async fn sync_one(&self, exam_id: &str) -> Result<bool> {
        let backend = self.gateway.backend();
        let key = counter_key(exam_id);

        let Some(counter) = AnalyticsCounter::from_fields(exam_id, &backend.hgetall(&key).await?)
        else {
            // Counter expired or was evicted; nothing left to sync
            backend.srem(DIRTY_SET_KEY, exam_id).await?;
            return Ok(true);
        };

        self.store
            .upsert_analytics(counter.to_record())
            .await
            .map_err(|err| SyncError::DurableWrite(err.to_string()))?;

        let current = AnalyticsCounter::from_fields(exam_id, &backend.hgetall(&key).await?);
        if current.map_or(false, |c| c.version != counter.version) {
            return Ok(false);
        }
        backend
            .hset(&key, &[(FIELD_NEEDS_SYNC.to_string(), "0".to_string())])
            .await?;
        backend.srem(DIRTY_SET_KEY, exam_id).await?;

        // A delta applied between the version check and the clear must stay dirty
        let after = AnalyticsCounter::from_fields(exam_id, &backend.hgetall(&key).await?);
        if after.map_or(false, |c| c.version != counter.version) {
            backend
                .hset(&key, &[(FIELD_NEEDS_SYNC.to_string(), "1".to_string())])
                .await?;
            backend.sadd(DIRTY_SET_KEY, exam_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    // == Read ==
    /// Current cached counter, or None on miss or backend failure.
    pub async fn counter(&self, exam_id: &str) -> Option<AnalyticsCounter> {
        let key = counter_key(exam_id);
        match self.gateway.backend().hgetall(&key).await {
            Ok(fields) => AnalyticsCounter::from_fields(exam_id, &fields),
            Err(err) => {
                self.gateway.note_failure("hgetall", &key, &err);
                None
            }
        }
    }

    // == Recalculate ==
    /// Rebuilds an exam's counter from durable attempts and writes both copies.
    pub async fn recalculate(&self, exam_id: &str) -> Result<ExamAnalytics> {
        let totals = self.store.aggregate_exam(exam_id).await?;
        let counter = AnalyticsCounter::from_totals(exam_id, &totals);
        let record = counter.to_record();
        self.store.upsert_analytics(record.clone()).await?;

        let backend = self.gateway.backend();
        let key = counter_key(exam_id);
        let refreshed = async {
            backend.hset(&key, &counter.to_fields()).await?;
            backend.srem(DIRTY_SET_KEY, exam_id).await?;
            Ok::<(), SyncError>(())
        }
        .await;
        if let Err(err) = refreshed {
            self.gateway.note_failure("hset", &key, &err);
        }

        info!(exam_id, completed = record.total_completed, "analytics recalculated");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::cache::{CacheBackend, MemoryBackend};
    use crate::store::{
        AttemptFilter, AttemptQuery, AttemptStatus, AttemptUpdate, ExamAttempt, ExamTotals,
        MemoryStore, UpdateOutcome,
    };

    /// Durable store whose analytics writes can be switched off.
    #[derive(Default)]
    struct SwitchableStore {
        inner: MemoryStore,
        reject_writes: AtomicBool,
    }

    #[async_trait]
    impl DurableStore for SwitchableStore {
        async fn find_attempt(&self, id: &str) -> Result<Option<ExamAttempt>> {
            self.inner.find_attempt(id).await
        }
        async fn update_attempt(
            &self,
            id: &str,
            filter: AttemptFilter,
            update: AttemptUpdate,
        ) -> Result<UpdateOutcome> {
            self.inner.update_attempt(id, filter, update).await
        }
        async fn count_attempts(&self, query: AttemptQuery) -> Result<u64> {
            self.inner.count_attempts(query).await
        }
        async fn find_stale_attempts(
            &self,
            status: AttemptStatus,
            before: DateTime<Utc>,
        ) -> Result<Vec<ExamAttempt>> {
            self.inner.find_stale_attempts(status, before).await
        }
        async fn aggregate_exam(&self, exam_id: &str) -> Result<ExamTotals> {
            self.inner.aggregate_exam(exam_id).await
        }
        async fn upsert_analytics(&self, record: ExamAnalytics) -> Result<()> {
            if self.reject_writes.load(Ordering::SeqCst) {
                return Err(SyncError::DurableWrite("primary unavailable".to_string()));
            }
            self.inner.upsert_analytics(record).await
        }
        async fn find_analytics(&self, exam_id: &str) -> Result<Option<ExamAnalytics>> {
            self.inner.find_analytics(exam_id).await
        }
    }

    /// Backend that lands one extra completion on a counter right as the
    /// flush marks it clean.
    struct InterleavingBackend {
        inner: MemoryBackend,
        fired: AtomicBool,
    }

    impl InterleavingBackend {
        async fn land_completion(&self, key: &str) -> Result<()> {
            let exam_id = key.rsplit(':').next().unwrap_or_default();
            self.inner.hincrby(key, FIELD_COMPLETED, 1).await?;
            self.inner.hincrby(key, FIELD_VERSION, 1).await?;
            self.inner
                .hset(key, &[(FIELD_NEEDS_SYNC.to_string(), "1".to_string())])
                .await?;
            self.inner.sadd(DIRTY_SET_KEY, exam_id).await?;
            Ok(())
        }
    }

    #[async_trait]
    impl CacheBackend for InterleavingBackend {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }
        async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
            self.inner.set_ex(key, value, ttl_secs).await
        }
        async fn del(&self, keys: &[String]) -> Result<usize> {
            self.inner.del(keys).await
        }
        async fn scan(
            &self,
            cursor: u64,
            pattern: &str,
            count: usize,
        ) -> Result<(u64, Vec<String>)> {
            self.inner.scan(cursor, pattern, count).await
        }
        async fn lpush(&self, key: &str, values: &[String]) -> Result<usize> {
            self.inner.lpush(key, values).await
        }
        async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
            self.inner.lrange(key, start, stop).await
        }
        async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
            self.inner.ltrim(key, start, stop).await
        }
        async fn llen(&self, key: &str) -> Result<usize> {
            self.inner.llen(key).await
        }
        async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
            self.inner.hincrby(key, field, delta).await
        }
        async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
            let clearing = fields
                .iter()
                .any(|(field, value)| field == FIELD_NEEDS_SYNC && value == "0");
            if clearing && !self.fired.swap(true, Ordering::SeqCst) {
                self.land_completion(key).await?;
            }
            self.inner.hset(key, fields).await
        }
        async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
            self.inner.hgetall(key).await
        }
        async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
            self.inner.sadd(key, member).await
        }
        async fn srem(&self, key: &str, member: &str) -> Result<bool> {
            self.inner.srem(key, member).await
        }
        async fn smembers(&self, key: &str) -> Result<Vec<String>> {
            self.inner.smembers(key).await
        }
    }

    fn aggregator(store: Arc<dyn DurableStore>) -> AnalyticsAggregator {
        aggregator_over(Arc::new(MemoryBackend::new(1000)), store)
    }

    fn aggregator_over(
        backend: Arc<dyn CacheBackend>,
        store: Arc<dyn DurableStore>,
    ) -> AnalyticsAggregator {
        let gateway = Arc::new(CacheGateway::new(backend));
        let queue = BatchQueue::new(gateway.clone(), 1000);
        AnalyticsAggregator::new(gateway, queue, store)
    }

    #[tokio::test]
    async fn test_events_converge_to_pass_percentage() {
        let store = Arc::new(MemoryStore::new());
        let agg = aggregator(store.clone());

        for i in 0..10 {
            assert!(agg.record_event("e1", ExamEvent::started()).await);
            assert!(agg.record_event("e1", ExamEvent::finished(50.0 + i as f64, i < 7)).await);
        }

        let consumed = agg.consume(100).await;
        assert_eq!(consumed.items, 20);
        assert_eq!(consumed.exams, 1);

        let counter = agg.counter("e1").await.unwrap();
        assert_eq!(counter.total_attempted, 10);
        assert!(counter.needs_sync);

        let report = agg.flush().await;
        assert_eq!(report.synced, 1);

        let record = store.find_analytics("e1").await.unwrap().unwrap();
        assert_eq!(record.total_completed, 10);
        assert_eq!(record.pass_count, 7);
        assert_eq!(record.fail_count, 3);
        assert_eq!(record.pass_percentage, 70.0);
        assert_eq!(record.average_score, 54.5);
        assert!(!agg.counter("e1").await.unwrap().needs_sync);
    }

    #[tokio::test]
    async fn test_failed_sync_leaves_counter_dirty() {
        let store = Arc::new(SwitchableStore::default());
        store.reject_writes.store(true, Ordering::SeqCst);
        let agg = aggregator(store.clone());

        agg.record_event("e2", ExamEvent::finished(90.0, true)).await;
        agg.consume(10).await;

        let report = agg.flush().await;
        assert_eq!(report.failed, 1);
        assert!(agg.counter("e2").await.unwrap().needs_sync);
        assert!(store.find_analytics("e2").await.unwrap().is_none());

        store.reject_writes.store(false, Ordering::SeqCst);
        let report = agg.flush().await;
        assert_eq!(report.synced, 1);
        assert_eq!(
            store.find_analytics("e2").await.unwrap().unwrap().pass_percentage,
            100.0
        );
    }

    #[tokio::test]
    async fn test_delta_landing_during_clear_stays_dirty() {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(InterleavingBackend {
            inner: MemoryBackend::new(1000),
            fired: AtomicBool::new(false),
        });
        let agg = aggregator_over(backend, store.clone());

        agg.record_event("e4", ExamEvent::finished(60.0, true)).await;
        agg.consume(10).await;

        let first = agg.flush().await;
        assert_eq!(first.still_dirty, 1);
        assert!(agg.counter("e4").await.unwrap().needs_sync);
        assert_eq!(store.find_analytics("e4").await.unwrap().unwrap().total_completed, 1);

        let second = agg.flush().await;
        assert_eq!(second.synced, 1);
        assert_eq!(second.still_dirty, 0);
        assert_eq!(store.find_analytics("e4").await.unwrap().unwrap().total_completed, 2);
        assert!(!agg.counter("e4").await.unwrap().needs_sync);
    }

    #[tokio::test]
    async fn test_flush_without_dirty_counters_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let agg = aggregator(store);
        assert_eq!(agg.flush().await, SyncReport::default());
    }

    #[tokio::test]
    async fn test_recalculate_from_durable_attempts() {
        let store = Arc::new(MemoryStore::new());
        for (id, passed) in [("a1", true), ("a2", false), ("a3", true), ("a4", true)] {
            let mut attempt = ExamAttempt::start(id, "u", "e3", 600);
            attempt.status = AttemptStatus::Completed;
            attempt.passed = Some(passed);
            attempt.score = Some(if passed { 80.0 } else { 40.0 });
            store.insert_attempt(attempt).await.unwrap();
        }
        let agg = aggregator(store.clone());

        let record = agg.recalculate("e3").await.unwrap();
        assert_eq!(record.pass_percentage, 75.0);
        assert_eq!(record.average_score, 70.0);

        let counter = agg.counter("e3").await.unwrap();
        assert_eq!(counter.pass_count, 3);
        assert!(!counter.needs_sync);
    }

    #[tokio::test]
    async fn test_event_without_exam_is_rejected() {
        let agg = aggregator(Arc::new(MemoryStore::new()));
        assert!(!agg.record_event("", ExamEvent::started()).await);
    }
}
