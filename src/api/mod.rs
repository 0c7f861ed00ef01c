//! API Module
//!
//! Admin inspection endpoints served by the worker.
//!
//! # Endpoints
//! - `GET /health` - Health check
//! - `GET /stats` - Gateway and store counters
//! - `GET /queues` - Depth of each named queue
//! - `GET /analytics/:exam_id` - Cached analytics counter
//! - `POST /analytics/:exam_id/recalculate` - Rebuild analytics from attempts
//! - `DELETE /cache/:pattern` - Delete keys matching a glob pattern

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
