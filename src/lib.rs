//! Exam Sync - write-behind cache and reconciliation for timed exams
//!
//! Answers, timers and outcome events land in a shared cache and on bounded
//! queues; a background worker drains the queues and applies them to the
//! durable store under conditional updates.

pub mod analytics;
pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod queue;
pub mod session;
pub mod store;
pub mod tasks;

pub use api::{create_router, AppState};
pub use config::Config;
pub use engine::Engine;
pub use error::{Result, SyncError};
pub use tasks::Worker;
