//! Owned background loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

/// A spawned loop with an explicit stop.
///
/// The loop body checks the shutdown flag on every tick; `stop` also aborts
/// the task so a loop parked in a long sleep ends immediately.
pub struct LoopHandle {
    name: &'static str,
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl LoopHandle {
    /// Spawn `body` with a fresh shutdown flag.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(body(Arc::clone(&shutdown)));
        Self {
            name,
            handle,
            shutdown,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn stop(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.handle.abort();
        tracing::debug!(task = self.name, "Background loop stopped");
    }
}

/// Shortest period a ticker will run at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Interval ticker that skips missed ticks instead of bursting. Periods
/// below [`MIN_PERIOD`] are raised to it.
pub fn ticker(period: Duration) -> tokio::time::Interval {
    let mut tick = tokio::time::interval(period.max(MIN_PERIOD));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tick
}
