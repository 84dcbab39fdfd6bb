//! Ownership of background work and graceful shutdown.
//!
//! Every task the engine spawns goes through [`ShutdownCoordinator::spawn`],
//! so shutdown can cancel it and wait for it to finish.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Tracks spawned work and the shared cancellation signal.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of tracked tasks still running.
    pub fn task_count(&self) -> usize {
        self.tracker.len()
    }

    /// Spawn tracked work that is dropped at its next suspension point once
    /// shutdown begins.
    pub fn spawn<F>(&self, name: &'static str, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutting_down() {
            debug!(task = name, "shutting down, not spawning");
            return;
        }
        let token = self.token.clone();
        let _ = self.tracker.spawn(async move {
            tokio::select! {
                () = token.cancelled() => debug!(task = name, "background task cancelled"),
                () = work => {}
            }
        });
    }

    /// Cancel all tracked work and wait up to `timeout` for it to finish.
    pub async fn graceful_shutdown(&self, timeout: Duration) {
        self.token.cancel();
        let _ = self.tracker.close();
        info!(
            task_count = self.tracker.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for background tasks to complete"
        );
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
