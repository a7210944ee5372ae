//! Call-control collaborators: retry, pacing, and a combined decorator
//!
//! These layer *outside* task submission. A submitted operation may retry
//! internally; the limiter only ever sees the final outcome, so an operation
//! that exhausts its retries on overload counts exactly once against the
//! feedback window.

use std::{cmp::max, future::Future, time::Duration};

use anyhow::Result;
use leaky_bucket::RateLimiter;
use tokio::{sync::Semaphore, time::sleep};

use crate::error::ServiceOverload;

/// How often and how patiently an operation is re-invoked
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// retries after the initial attempt (total attempts = 1 + max_retries)
    pub max_retries: usize,

    /// pause between attempts
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Re-invokes `operation` while its error satisfies `matches`, up to the
/// policy's retry budget.
///
/// Non-matching errors propagate immediately; a matching error on the final
/// attempt propagates as-is. The operation is a factory so each attempt gets
/// a fresh future (submitted operations are single-shot).
pub async fn with_retry<T, F, Fut, M>(
    policy: RetryPolicy,
    matches: M,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    M: Fn(&anyhow::Error) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if matches(&err) && attempt < policy.max_retries => {
                attempt += 1;
                log::warn!(
                    "attempt {}/{} failed ({:#}); retrying in {:?}",
                    attempt,
                    policy.max_retries,
                    err,
                    policy.retry_delay
                );
                sleep(policy.retry_delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// [`with_retry`] specialized to the [`ServiceOverload`] sentinel; the
/// retry shape meant to sit inside a submitted operation.
pub async fn retry_on_overload<T, F, Fut>(policy: RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry(policy, |err| err.is::<ServiceOverload>(), operation).await
}

/// Paces calls to a fixed request rate with a leaky bucket.
#[derive(Debug)]
pub struct Pacer {
    /// token bucket; one token buys one call
    bucket: RateLimiter,
}

/// Pacer implementation
impl Pacer {
    /// build a pacer allowing `max_qps` calls per second
    ///
    /// The whole point of pacing here is to keep a recovering backend from
    /// being re-flooded the moment capacity opens up, so the bucket is
    /// seeded at half depth: a freshly built pacer can burst at most half a
    /// second's worth of calls before it settles onto the steady rate.
    pub fn new(max_qps: usize) -> Self {
        // the bucket builder rejects a seed larger than its depth, and a
        // depth of zero would never grant; clamp both to at least one
        let per_second = max(max_qps, 1);
        let seed = max(per_second / 2, 1);

        // refilling per_second tokens once per whole second keeps low rates
        // exact instead of rounding a per-token interval
        Self {
            bucket: RateLimiter::builder()
                .max(per_second)
                .initial(seed)
                .refill(per_second)
                .interval(Duration::from_secs(1))
                .build(),
        }
    }

    /// waits until the next call is allowed
    pub async fn throttle(&self) {
        self.bucket.acquire_one().await;
    }
}

/// Combined call decorator: a fixed concurrency cap, optional pacing, and
/// retry on a configurable error kind.
///
/// This is the standalone cousin of the adaptive limiter for callers that
/// want static control without the feedback loop. The cap is a plain
/// semaphore (it never adapts), the pacer throttles each attempt, and the
/// retry loop runs inside the held permit.
///
/// # Example
///
/// ```rust,no_run
/// use surgeguard::control::CallControl;
/// use anyhow::Result;
///
/// # async fn example() -> Result<()> {
/// let control = CallControl::new()
///     .max_concurrency(5)
///     .max_qps(10)
///     .retries(3);
///
/// let value = control.call(|| async { Ok::<_, anyhow::Error>(42) }).await?;
/// # let _ = value;
/// # Ok(())
/// # }
/// ```
pub struct CallControl {
    /// fixed concurrency cap; None means uncapped
    semaphore: Option<Semaphore>,

    /// request-rate pacing; None means unpaced
    pacer: Option<Pacer>,

    /// retry budget and delay
    policy: RetryPolicy,

    /// which errors are worth retrying; defaults to all of them
    matcher: Box<dyn Fn(&anyhow::Error) -> bool + Send + Sync>,
}

impl Default for CallControl {
    fn default() -> Self {
        Self {
            semaphore: None,
            pacer: None,
            policy: RetryPolicy::default(),
            matcher: Box::new(|_| true),
        }
    }
}

/// CallControl implementation
impl CallControl {
    /// decorator with no cap, no pacing, and the default retry policy
    pub fn new() -> Self {
        Self::default()
    }

    /// caps concurrent calls at `permits`
    pub fn max_concurrency(mut self, permits: usize) -> Self {
        self.semaphore = (permits > 0).then(|| Semaphore::new(permits));
        self
    }

    /// paces calls to at most `max_qps` per second; 0 disables pacing
    pub fn max_qps(mut self, max_qps: usize) -> Self {
        self.pacer = (max_qps > 0).then(|| Pacer::new(max_qps));
        self
    }

    /// sets the retry budget (retries after the initial attempt)
    pub fn retries(mut self, max_retries: usize) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// sets the pause between attempts
    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.policy.retry_delay = retry_delay;
        self
    }

    /// retries only errors whose chain contains the given kind
    pub fn retry_kind<E>(mut self) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.matcher = Box::new(|err| err.is::<E>());
        self
    }

    /// retries only errors satisfying the predicate
    pub fn retry_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.matcher = Box::new(matcher);
        self
    }

    /// Runs the operation under the configured cap, pacing, and retry loop.
    ///
    /// The permit is held across all attempts; pacing applies to each
    /// attempt individually.
    pub async fn call<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _permit = match &self.semaphore {
            Some(semaphore) => Some(semaphore.acquire().await?),
            None => None,
        };

        let mut attempt = 0;

        loop {
            if let Some(pacer) = &self.pacer {
                pacer.throttle().await;
            }

            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if (self.matcher)(&err) && attempt < self.policy.max_retries => {
                    attempt += 1;
                    log::warn!(
                        "attempt {}/{} failed ({:#}); retrying in {:?}",
                        attempt,
                        self.policy.max_retries,
                        err,
                        self.policy.retry_delay
                    );
                    sleep(self.policy.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
