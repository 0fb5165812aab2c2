//! Timer seam. Debounces and delayed callbacks go through [`Scheduler`] so
//! tests can drive them with tokio's paused clock or a fake.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::AbortHandle;

/// Cancels a scheduled callback. Dropping the token does not cancel.
#[derive(Debug, Default)]
pub struct CancelToken(Option<AbortHandle>);

impl CancelToken {
    #[must_use]
    pub fn new(handle: AbortHandle) -> Self {
        Self(Some(handle))
    }

    /// Token that cancels nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self(None)
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.0.as_ref().is_some_and(|h| !h.is_finished())
    }
}

pub trait Scheduler: Send + Sync {
    /// Run `task` after `delay` unless the returned token is cancelled first.
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> CancelToken;
}

/// Scheduler backed by `tokio::time::sleep` on the current runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> CancelToken {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        CancelToken::new(handle.abort_handle())
    }
}

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod tests;
