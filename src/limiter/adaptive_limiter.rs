use std::{
    cmp,
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::Result;
use tokio_util::task::TaskTracker;

use crate::{
    atomic_increment, atomic_load, error::LimiterError, sync::AdjustableSemaphore,
    MAX_INCREASE_STEP,
};

use super::{builder::LimiterBuilder, handle::TaskHandle};

/// discriminator over operation errors; true means "backend overloaded"
pub(super) type OverloadMatcher = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Rolling window of completions observed since the last capacity adjustment
///
/// Guarded by a single mutex together with the adjustment decision itself, so
/// two completions racing the window trigger cannot double-count a window or
/// adjust capacity twice against the same counters.
#[derive(Debug)]
pub(super) struct Window {
    /// completions whose error matched the overload discriminator
    pub(super) overload_count: usize,

    /// completions that entered the feedback loop (successes + overloads)
    pub(super) finished_count: usize,

    /// current additive-increase step; doubles each calm window up to
    /// [`MAX_INCREASE_STEP`], resets to 1 at every cut
    pub(super) increase_step: usize,
}

impl Default for Window {
    fn default() -> Self {
        Self {
            overload_count: 0,
            finished_count: 0,
            increase_step: 1,
        }
    }
}

/// shared internals; owned by the limiter and every managed task
pub(super) struct LimiterState {
    /// the adjustable semaphore gating task execution; its capacity is the
    /// reference value the feedback loop adjusts
    pub(super) semaphore: AdjustableSemaphore,

    /// hard upper bound on capacity
    pub(super) max_concurrency: usize,

    /// hard lower bound on capacity
    pub(super) min_concurrency: usize,

    /// observed overload fraction above which capacity is cut
    pub(super) overload_threshold: f64,

    /// multiplicative factor applied on a cut
    pub(super) decrease_factor: f64,

    /// prefix woven into diagnostic messages
    pub(super) log_prefix: String,

    /// how operation errors are classified as overload
    pub(super) matcher: OverloadMatcher,

    /// outcome window plus the serialized adjustment decision
    pub(super) window: Mutex<Window>,

    /// tasks currently past permit acquisition and inside the user operation
    pub(super) running_count: AtomicUsize,
}

impl LimiterState {
    /// count one completed operation into the window; closes the window and
    /// adjusts capacity once enough completions have been observed
    pub(super) fn record_outcome(&self, overloaded: bool) {
        let mut window = match self.window.lock() {
            Ok(guard) => guard,
            Err(err) => {
                log::error!("[{}] window lock poisoned: {}", self.log_prefix, err);
                return;
            }
        };

        window.finished_count += 1;
        if overloaded {
            window.overload_count += 1;
        }

        log::debug!(
            "[{}] outcome recorded: finished={} overloads={} running={} capacity={}",
            self.log_prefix,
            window.finished_count,
            window.overload_count,
            atomic_load!(self.running_count),
            self.semaphore.capacity()
        );

        // one-RTT analogue: at least as many completions observed as the
        // current reference capacity
        if window.finished_count > self.semaphore.capacity() {
            self.adjust_capacity(&mut window);
        }
    }

    /// close the current window and recompute capacity with the
    /// additive-increase / multiplicative-decrease rule
    ///
    /// callers hold the window lock, which serializes adjustments
    pub(super) fn adjust_capacity(&self, window: &mut Window) {
        if window.finished_count == 0 {
            log::debug!("[{}] empty window; skipping adjustment", self.log_prefix);
            return;
        }

        let capacity = self.semaphore.capacity();
        let overload_rate = window.overload_count as f64 / window.finished_count as f64;

        let new_capacity = if overload_rate > self.overload_threshold {
            window.increase_step = 1;

            let cut = (capacity as f64 * self.decrease_factor) as usize;
            let cut = cmp::max(self.min_concurrency, cut);

            log::info!(
                "[{}] overload rate {:.2}% above threshold; capacity {} -> {}",
                self.log_prefix,
                overload_rate * 100.0,
                capacity,
                cut
            );

            cut
        } else {
            let raised = cmp::min(self.max_concurrency, capacity + window.increase_step);
            window.increase_step = cmp::min(window.increase_step * 2, MAX_INCREASE_STEP);

            log::info!(
                "[{}] calm window; capacity {} -> {} (next step {})",
                self.log_prefix,
                capacity,
                raised,
                window.increase_step
            );

            raised
        };

        window.overload_count = 0;
        window.finished_count = 0;

        self.semaphore.set_capacity(new_capacity);
    }
}

/// decrements the running-task counter on drop, so the count stays accurate
/// when a managed task is aborted mid-operation
struct RunningGuard<'a>(&'a AtomicUsize);

impl<'a> RunningGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        atomic_increment!(counter);
        Self(counter)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Adaptive concurrency governor for async operations against an
/// overload-prone backend.
///
/// Operations go in through [`submit`](Self::submit); each one runs under a
/// permit from an [`AdjustableSemaphore`](crate::sync::AdjustableSemaphore)
/// whose capacity follows a TCP-style feedback loop:
///
/// - a completion whose error matches the configured overload discriminator
///   counts as an overload observation
/// - a success counts as a calm observation
/// - any other failure is neutral and leaves the feedback loop untouched
///
/// Once a window has accumulated more completions than the current capacity,
/// the overload fraction decides the move: above the threshold the capacity
/// is cut multiplicatively (and the growth step resets), otherwise it grows
/// by the current step, which doubles each calm window up to a ceiling.
///
/// The limiter is an instance; independent limiters, each with their own
/// capacity and counters, can coexist in one process.
///
/// # Example
///
/// ```rust,no_run
/// use surgeguard::AdaptiveLimiter;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let limiter = AdaptiveLimiter::builder()
///         .max_concurrency(64)
///         .initial_concurrency(4)
///         .build()?;
///
///     let handle = limiter.submit(async { Ok(2 + 2) })?;
///     assert_eq!(handle.await?, 4);
///
///     limiter.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct AdaptiveLimiter {
    /// state shared with managed tasks
    pub(super) state: Arc<LimiterState>,

    /// every submitted-but-unsettled task; drained by shutdown
    pub(super) tracker: TaskTracker,
}

/// AdaptiveLimiter implementation
impl AdaptiveLimiter {
    /// Returns a [`LimiterBuilder`] preloaded with the crate defaults.
    pub fn builder() -> LimiterBuilder {
        LimiterBuilder::default()
    }

    /// Submits an asynchronous operation, returning a handle to its eventual
    /// outcome.
    ///
    /// The operation is wrapped in a managed task that waits for a permit,
    /// runs the operation, feeds the outcome into the capacity feedback loop,
    /// and releases the permit. The handle resolves with the operation's own
    /// result; errors pass through unchanged, including overload errors
    /// (which are counted first, never swallowed).
    ///
    /// Tasks may acquire permits in any order relative to submission order.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::ShutDown`] once [`shutdown`](Self::shutdown)
    /// has been called.
    pub fn submit<F, T>(&self, operation: F) -> Result<TaskHandle<T>, LimiterError>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        log::trace!("enter: submit");

        if self.state.semaphore.is_closed() || self.state.semaphore.capacity() == 0 {
            return Err(LimiterError::ShutDown);
        }

        let state = self.state.clone();

        let task = self.tracker.spawn(async move {
            let permit = state.semaphore.acquire().await?;
            let _running = RunningGuard::new(&state.running_count);

            let outcome = operation.await;

            match &outcome {
                Ok(_) => state.record_outcome(false),
                Err(err) if (state.matcher)(err) => state.record_outcome(true),
                // neutral: neither praised as success nor blamed as overload
                Err(_) => {}
            }

            drop(permit);
            outcome
        });

        log::trace!("exit: submit");
        Ok(TaskHandle::new(task))
    }

    /// Shuts the limiter down and drains it.
    ///
    /// Capacity drops to zero and the semaphore closes, so tasks still
    /// queued for a permit settle with [`LimiterError::Closed`]; tasks
    /// already running their operation are waited out, never cancelled.
    /// Individual task failures are not re-raised here; they stay
    /// observable through each task's handle.
    ///
    /// Subsequent calls to [`submit`](Self::submit) fail with
    /// [`LimiterError::ShutDown`]. Calling shutdown more than once is
    /// harmless.
    pub async fn shutdown(&self) {
        log::trace!("enter: shutdown");

        self.state.semaphore.set_capacity(0);
        self.state.semaphore.close();

        self.tracker.close();
        self.tracker.wait().await;

        log::trace!("exit: shutdown");
    }

    /// Returns the current reference capacity.
    pub fn capacity(&self) -> usize {
        self.state.semaphore.capacity()
    }

    /// Returns the signed available permit count (see
    /// [`AdjustableSemaphore::available`](crate::sync::AdjustableSemaphore::available)).
    pub fn available(&self) -> i64 {
        self.state.semaphore.available()
    }

    /// Returns the number of tasks currently inside their user operation.
    pub fn running_count(&self) -> usize {
        atomic_load!(self.state.running_count)
    }

    /// Returns the number of submitted tasks that have not yet settled.
    pub fn live_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Returns the current additive-increase step (diagnostic).
    pub fn increase_step(&self) -> usize {
        self.state
            .window
            .lock()
            .map(|window| window.increase_step)
            .unwrap_or(1)
    }

    /// Returns whether the limiter has been shut down.
    pub fn is_shut(&self) -> bool {
        self.state.semaphore.is_closed()
    }
}
