//! Analytics Module
//!
//! Near-real-time per-exam outcome counters with periodic durable sync.

mod aggregator;
mod counter;

pub use aggregator::{AnalyticsAggregator, ConsumeReport, ExamEvent, SyncReport};
pub use counter::AnalyticsCounter;
