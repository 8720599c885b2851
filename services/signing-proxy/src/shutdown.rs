//! Graceful Shutdown Module
//!
//! Signal handling plus a tracked set of best-effort background tasks
//! (audit writes) that are drained before the process exits.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Tracks fire-and-forget tasks spawned while serving requests.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    /// Creates an empty task set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a tracked task. Finished tasks are reaped on each call.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "Background task failed");
            }
        }
        tasks.spawn(async move {
            future.await;
            tracing::trace!(task = name, "Background task completed");
        });
    }

    /// Number of tasks not yet reaped.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether no tasks are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for outstanding tasks, aborting whatever is left after `timeout`.
    pub async fn drain(&self, timeout: Duration) {
        let mut pending = std::mem::take(&mut *self.tasks.lock());
        if pending.is_empty() {
            return;
        }
        info!(tasks = pending.len(), "Draining background tasks");

        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = pending.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Task failed during shutdown");
                }
            }
        })
        .await;

        match drained {
            Ok(()) => info!("All background tasks completed"),
            Err(_) => {
                warn!("Shutdown timeout reached, aborting remaining tasks");
                pending.abort_all();
            }
        }
    }
}

/// Waits for SIGTERM or SIGINT.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_drain_waits_for_tasks() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = Arc::clone(&done);
            tasks.spawn("test", async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        tasks.drain(Duration::from_secs(5)).await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_aborts_after_timeout() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&done);
        tasks.spawn("slow", async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            flag.fetch_add(1, Ordering::SeqCst);
        });
        tasks.drain(Duration::from_secs(1)).await;
        assert_eq!(done.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_finished_tasks_are_reaped() {
        let tasks = BackgroundTasks::new();
        tasks.spawn("quick", async {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        tasks.spawn("quick", async {});
        assert!(tasks.len() <= 1);
        tasks.drain(Duration::from_secs(1)).await;
    }
}
