//! Error types for the synchronization engine
//!
//! Provides unified error handling using thiserror. Most variants never reach
//! a user-facing caller: the gateway and queue fail open and only log them.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Sync Error Enum ==
/// Unified error type for the cache, queue and reconciliation layers.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Cache backend unreachable or timed out
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Cached value or queue payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Bounded queue dropped its oldest items
    #[error("Queue overflow on {queue}: dropped {dropped} items")]
    QueueOverflow { queue: String, dropped: usize },

    /// Durable update precondition did not hold
    #[error("Conditional update skipped: {0}")]
    ConditionalUpdateSkipped(String),

    /// Durable store rejected a write
    #[error("Durable write failed: {0}")]
    DurableWrite(String),

    /// Referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = match &self {
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::InvalidRequest(_) | SyncError::Serialization(_) => StatusCode::BAD_REQUEST,
            SyncError::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::ConditionalUpdateSkipped(_) => StatusCode::CONFLICT,
            SyncError::QueueOverflow { .. }
            | SyncError::DurableWrite(_)
            | SyncError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the synchronization engine.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let response = SyncError::NotFound("exam-1".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_cache_unavailable_maps_to_503() {
        let response = SyncError::CacheUnavailable("down".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_serde_error_converts() {
        let err: SyncError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, SyncError::Serialization(_)));
    }

    #[test]
    fn test_overflow_message() {
        let err = SyncError::QueueOverflow {
            queue: "queue:timer-sync".to_string(),
            dropped: 3,
        };
        assert_eq!(
            err.to_string(),
            "Queue overflow on queue:timer-sync: dropped 3 items"
        );
    }
}
