//! Durable Store Module
//!
//! The engine's view of the durable document store: point reads, conditional
//! updates, counts, aggregation and analytics upserts. The store is the single
//! source of truth; everything in the cache is a projection of it.

mod memory;
mod models;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

pub use memory::MemoryStore;
pub use models::{
    merge_answer, upsert_answer, Answer, AttemptFilter, AttemptQuery, AttemptStatus, AttemptUpdate,
    ExamAnalytics, ExamAttempt, ExamTotals, UpdateOutcome,
};

// == Durable Store Trait ==
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn find_attempt(&self, attempt_id: &str) -> Result<Option<ExamAttempt>>;

    /// Applies `update` only if the attempt exists and matches `filter`.
    async fn update_attempt(
        &self,
        attempt_id: &str,
        filter: AttemptFilter,
        update: AttemptUpdate,
    ) -> Result<UpdateOutcome>;

    async fn count_attempts(&self, query: AttemptQuery) -> Result<u64>;

    /// Attempts in `status` whose last update is older than `updated_before`.
    async fn find_stale_attempts(
        &self,
        status: AttemptStatus,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<ExamAttempt>>;

    /// Groups an exam's attempts into outcome totals.
    async fn aggregate_exam(&self, exam_id: &str) -> Result<ExamTotals>;

    async fn upsert_analytics(&self, record: ExamAnalytics) -> Result<()>;

    async fn find_analytics(&self, exam_id: &str) -> Result<Option<ExamAnalytics>>;

    /// Releases connections. Called once, after every loop has stopped.
    async fn close(&self) {}
}
