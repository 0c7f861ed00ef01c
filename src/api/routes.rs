//! API Routes
//!
//! Configures the Axum router for the admin endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    analytics_handler, clear_cache_handler, health_handler, queues_handler, recalculate_handler,
    stats_handler, AppState,
};

/// Creates the admin router.
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/queues", get(queues_handler))
        .route("/analytics/:exam_id", get(analytics_handler))
        .route("/analytics/:exam_id/recalculate", post(recalculate_handler))
        .route("/cache/:pattern", delete(clear_cache_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
