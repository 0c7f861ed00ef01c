//! Background Tasks Module
//!
//! The reconciliation worker: one supervised periodic task per loop, all
//! sharing a shutdown signal.
//!
//! # Loops
//! - answer-flush (2s): persist queued answers
//! - timed-out (5s): finalize expired attempts
//! - timer-sync (10s): persist remaining time
//! - stale-scan (30s): queue corrections for attempts nobody synced
//! - analytics-consume (2s): fold queued deltas into counters
//! - analytics-sync (60s): write dirty counters to the durable store
//! - ttl-cleanup (1s): purge expired keys, in-process backend only

mod cleanup;
mod reconciler;
mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cache::MemoryBackend;
use crate::engine::Engine;
use crate::store::DurableStore;

pub use cleanup::spawn_cleanup_task;
pub use reconciler::{Reconciler, TickReport};
pub use scheduler::spawn_periodic;

// == Worker ==
/// Handles to the running loops.
pub struct Worker {
    shutdown: broadcast::Sender<()>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
    store: Arc<dyn DurableStore>,
}

impl Worker {
    /// Starts every loop. Pass the in-process backend to also run TTL cleanup.
    pub fn start(engine: &Engine, memory: Option<&MemoryBackend>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        let config = engine.config.clone();
        let secs = Duration::from_secs;
        let mut handles = Vec::new();

        macro_rules! reconcile_loop {
            ($name:literal, $interval:expr, $method:ident) => {{
                let reconciler = engine.reconciler.clone();
                let handle = spawn_periodic($name, secs($interval), shutdown.subscribe(), move || {
                    let reconciler = reconciler.clone();
                    async move {
                        reconciler.$method().await;
                    }
                });
                handles.push(($name, handle));
            }};
        }

        reconcile_loop!("answer-flush", config.answer_flush_interval, flush_answers);
        reconcile_loop!("timed-out", config.timeout_interval, finalize_timeouts);
        reconcile_loop!("timer-sync", config.timer_sync_interval, sync_timers);
        reconcile_loop!("stale-scan", config.stale_scan_interval, scan_stale_attempts);

        let analytics = engine.analytics.clone();
        let batch_size = config.analytics_batch_size;
        handles.push((
            "analytics-consume",
            spawn_periodic(
                "analytics-consume",
                secs(config.analytics_consume_interval),
                shutdown.subscribe(),
                move || {
                    let analytics = analytics.clone();
                    async move {
                        analytics.consume(batch_size).await;
                    }
                },
            ),
        ));

        let analytics = engine.analytics.clone();
        handles.push((
            "analytics-sync",
            spawn_periodic(
                "analytics-sync",
                secs(config.analytics_sync_interval),
                shutdown.subscribe(),
                move || {
                    let analytics = analytics.clone();
                    async move {
                        analytics.flush().await;
                    }
                },
            ),
        ));

        if let Some(memory) = memory {
            handles.push((
                "ttl-cleanup",
                spawn_cleanup_task(memory.store(), config.cleanup_interval, shutdown.subscribe()),
            ));
        }

        info!(loops = handles.len(), "reconciliation worker started");
        Self {
            shutdown,
            handles,
            store: engine.store.clone(),
        }
    }

    pub fn loop_names(&self) -> Vec<&'static str> {
        self.handles.iter().map(|(name, _)| *name).collect()
    }

    /// Stops accepting new ticks, waits for in-flight ones, then closes the store.
    pub async fn shutdown(self) {
        // No receivers left means every loop already exited
        let _ = self.shutdown.send(());
        for (name, handle) in self.handles {
            if let Err(err) = handle.await {
                error!(task = name, error = %err, "loop ended abnormally");
            }
        }
        self.store.close().await;
        info!("reconciliation worker stopped");
    }
}
