use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use anyhow::Result;
use tokio::task::JoinHandle;

use crate::error::LimiterError;

/// Handle to a submitted operation's eventual outcome.
///
/// Awaiting the handle yields exactly what the operation produced: the
/// limiter observes outcomes for its feedback loop but never substitutes,
/// wraps, or swallows them. A task that was [`abort`](Self::abort)ed before
/// settling resolves to [`LimiterError::Cancelled`]; one that panicked
/// resolves to the join error.
///
/// Dropping the handle detaches it: the managed task keeps running and is
/// still drained by [`shutdown`](super::AdaptiveLimiter::shutdown).
#[derive(Debug)]
pub struct TaskHandle<T> {
    /// the managed task driving the operation
    inner: JoinHandle<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// wrap a managed task's join handle
    pub(super) fn new(inner: JoinHandle<Result<T>>) -> Self {
        Self { inner }
    }

    /// Cancels the managed task.
    ///
    /// While still queued for a permit, cancellation consumes nothing; while
    /// inside the user operation, the permit is returned as the task
    /// unwinds. Either way the outcome counters stay untouched; a
    /// cancelled task is neither a success nor an overload.
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// Returns whether the managed task has settled.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(join_err)) => {
                if join_err.is_cancelled() {
                    Poll::Ready(Err(anyhow::Error::new(LimiterError::Cancelled)))
                } else {
                    Poll::Ready(Err(anyhow::Error::new(join_err)))
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
