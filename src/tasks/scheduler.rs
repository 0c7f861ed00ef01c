//! Fixed-interval task runner with cooperative shutdown.

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Spawns a task that runs `tick` every `period` until `shutdown` fires.
///
/// A tick that is already running completes before shutdown is observed, so
/// an in-flight batch is never abandoned halfway. Ticks that overrun the
/// period delay the next one rather than bunching up. A zero period runs
/// once a second.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    mut period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if period.is_zero() {
        warn!(task = name, "zero period, falling back to 1s");
        period = Duration::from_secs(1);
    }
    tokio::spawn(async move {
        info!(task = name, period_ms = period.as_millis() as u64, "starting periodic task");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = interval.tick() => tick().await,
            }
        }
        info!(task = name, "periodic task stopped");
    })
}
