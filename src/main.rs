//! Exam Sync worker
//!
//! Runs the reconciliation loops and serves the admin inspection API.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exam_sync::{create_router, AppState, Config, Worker};

/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the engine over the in-process cache and store
/// 4. Start the reconciliation loops
/// 5. Serve the admin API until SIGINT/SIGTERM
/// 6. Stop the loops, letting in-flight ticks finish
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "exam_sync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting exam sync worker");

    let config = Config::from_env();
    info!(
        max_entries = config.max_entries,
        queue_capacity = config.queue_capacity,
        admin_port = config.admin_port,
        "Configuration loaded"
    );
    let admin_port = config.admin_port;

    let state = AppState::in_memory(config);
    let worker = Worker::start(&state.engine, state.memory.as_ref());
    info!(loops = ?worker.loop_names(), "Worker loops started");

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], admin_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind admin API on {addr}"))?;
    info!("Admin API listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Drain the loops even if the server failed
    worker.shutdown().await;
    served.context("admin API server failed")?;

    info!("Shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
