//! Owned background tasks and timers

use std::future::Future;
use tokio::task::JoinHandle;

/// Owns one spawned task and aborts it when dropped.
///
/// Debounce waits, progress tickers, settle delays and poll loops are all
/// held through a `TaskGuard`, so dropping the owning operation stops them.
#[derive(Debug)]
pub struct TaskGuard {
    handle: JoinHandle<()>,
}

impl TaskGuard {
    /// Spawn `future` on the current tokio runtime.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }

    /// Spawn a task that runs `action` once `delay` has elapsed.
    pub fn after<F>(delay: std::time::Duration, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
