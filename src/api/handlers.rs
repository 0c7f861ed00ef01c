//! API Handlers
//!
//! HTTP request handlers for the admin inspection endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::cache::MemoryBackend;
use crate::config::Config;
use crate::engine::Engine;
use crate::error::{Result, SyncError};
use crate::models::{AnalyticsResponse, ClearResponse, HealthResponse, QueuesResponse, StatsResponse};
use crate::store::{ExamAnalytics, MemoryStore};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    /// Set when the engine runs over the in-process backend
    pub memory: Option<MemoryBackend>,
}

impl AppState {
    pub fn new(engine: Engine, memory: Option<MemoryBackend>) -> Self {
        Self { engine, memory }
    }

    /// Builds an engine over the in-process cache and durable store.
    pub fn in_memory(config: Config) -> Self {
        let memory = MemoryBackend::new(config.max_entries);
        let engine = Engine::new(
            config,
            Arc::new(memory.clone()),
            Arc::new(MemoryStore::new()),
        );
        Self::new(engine, Some(memory))
    }
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Handler for GET /stats
///
/// Gateway counters, plus store counters when the backend is in-process.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let store = match &state.memory {
        Some(memory) => Some(memory.stats().await),
        None => None,
    };
    Json(StatsResponse::new(state.engine.gateway.stats(), store))
}

/// Handler for GET /queues
pub async fn queues_handler(State(state): State<AppState>) -> Json<QueuesResponse> {
    let queue = &state.engine.queue;
    Json(QueuesResponse::new(queue.capacity(), queue.depths().await))
}

/// Handler for GET /analytics/:exam_id
///
/// Returns the cached counter; 404 when the exam has none.
pub async fn analytics_handler(
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
) -> Result<Json<AnalyticsResponse>> {
    let counter = state
        .engine
        .analytics
        .counter(&exam_id)
        .await
        .ok_or_else(|| SyncError::NotFound(format!("analytics for exam {exam_id}")))?;
    Ok(Json(counter.into()))
}

/// Handler for POST /analytics/:exam_id/recalculate
pub async fn recalculate_handler(
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
) -> Result<Json<ExamAnalytics>> {
    let record = state.engine.analytics.recalculate(&exam_id).await?;
    Ok(Json(record))
}

/// Handler for DELETE /cache/:pattern
pub async fn clear_cache_handler(
    State(state): State<AppState>,
    Path(pattern): Path<String>,
) -> Result<Json<ClearResponse>> {
    if pattern.trim().is_empty() {
        return Err(SyncError::InvalidRequest("pattern cannot be empty".to_string()));
    }
    let deleted = state.engine.gateway.clear_by_pattern(&pattern).await;
    Ok(Json(ClearResponse { pattern, deleted }))
}
