//! Queue Module
//!
//! Named write-behind queues, one per kind of deferred work.

mod batch;
mod item;


pub use batch::{BatchQueue, DrainedBatch, DEFAULT_QUEUE_CAPACITY};
pub use item::{
    AnalyticsDelta, AnswerUpdate, QueueItem, QueueKind, QueuePayload, TimedOut, TimerSync,
};
