//! Response models for the admin inspection API
//!
//! The DTOs serialized by the handlers in [`crate::api`].

pub mod responses;

pub use responses::{
    AnalyticsResponse, ClearResponse, HealthResponse, QueueDepth, QueuesResponse, StatsResponse,
};
