use std::sync::{atomic::AtomicUsize, Arc, Mutex};

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use crate::{
    error::{LimiterError, ServiceOverload},
    sync::AdjustableSemaphore,
    DEFAULT_DECREASE_FACTOR, DEFAULT_INITIAL_CONCURRENCY, DEFAULT_MAX_CONCURRENCY,
    DEFAULT_MIN_CONCURRENCY, DEFAULT_OVERLOAD_THRESHOLD,
};

use super::adaptive_limiter::{AdaptiveLimiter, LimiterState, OverloadMatcher, Window};

/// responsible for building an [`AdaptiveLimiter`]
///
/// All options have defaults; [`build`](Self::build) validates the ordering
/// constraint `1 <= min <= initial <= max` and the open ranges on the
/// threshold and decrease factor.
///
/// # Example
///
/// ```rust
/// use surgeguard::AdaptiveLimiter;
///
/// let limiter = AdaptiveLimiter::builder()
///     .max_concurrency(128)
///     .min_concurrency(2)
///     .initial_concurrency(8)
///     .overload_threshold(0.05)
///     .build()
///     .unwrap();
///
/// assert_eq!(limiter.capacity(), 8);
/// ```
pub struct LimiterBuilder {
    /// hard upper bound on capacity
    max_concurrency: usize,

    /// hard lower bound on capacity
    min_concurrency: usize,

    /// starting capacity; must lie within `[min, max]`
    initial_concurrency: usize,

    /// overload fraction above which capacity contracts
    overload_threshold: f64,

    /// multiplicative cut applied on overload
    decrease_factor: f64,

    /// prefix for diagnostic log messages
    log_prefix: String,

    /// error discriminator; defaults to matching [`ServiceOverload`]
    matcher: OverloadMatcher,
}

impl Default for LimiterBuilder {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            min_concurrency: DEFAULT_MIN_CONCURRENCY,
            initial_concurrency: DEFAULT_INITIAL_CONCURRENCY,
            overload_threshold: DEFAULT_OVERLOAD_THRESHOLD,
            decrease_factor: DEFAULT_DECREASE_FACTOR,
            log_prefix: String::from("limiter"),
            matcher: Arc::new(|err| err.is::<ServiceOverload>()),
        }
    }
}

/// LimiterBuilder implementation
impl LimiterBuilder {
    /// sets the hard upper bound on capacity (default 256)
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// sets the hard lower bound on capacity (default 1)
    pub fn min_concurrency(mut self, min_concurrency: usize) -> Self {
        self.min_concurrency = min_concurrency;
        self
    }

    /// sets the starting capacity (default 1)
    pub fn initial_concurrency(mut self, initial_concurrency: usize) -> Self {
        self.initial_concurrency = initial_concurrency;
        self
    }

    /// sets the overload fraction above which capacity is cut (default 0.1)
    pub fn overload_threshold(mut self, overload_threshold: f64) -> Self {
        self.overload_threshold = overload_threshold;
        self
    }

    /// sets the multiplicative factor applied on a cut (default 0.75)
    pub fn decrease_factor(mut self, decrease_factor: f64) -> Self {
        self.decrease_factor = decrease_factor;
        self
    }

    /// sets the prefix used in diagnostic log messages
    pub fn log_prefix(mut self, log_prefix: &str) -> Self {
        self.log_prefix = log_prefix.to_string();
        self
    }

    /// substitutes a different sentinel error type for overload detection
    ///
    /// the discriminator stays a single downcast over the error chain, just
    /// against the given type instead of
    /// [`ServiceOverload`](crate::ServiceOverload)
    pub fn overload_kind<E>(mut self) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.matcher = Arc::new(|err| err.is::<E>());
        self
    }

    /// installs an arbitrary overload discriminator
    ///
    /// useful when the overload signal cannot be expressed as a single error
    /// type; classifier collaborators that translate domain errors into the
    /// sentinel are usually the better layering
    pub fn overload_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.matcher = Arc::new(matcher);
        self
    }

    /// Validates the configuration and builds the [`AdaptiveLimiter`].
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::InvalidConfig`] when the ordering constraint
    /// `1 <= min <= initial <= max` is violated, when the threshold or
    /// decrease factor fall outside `(0, 1)`, or when the maximum exceeds
    /// the underlying semaphore's permit ceiling.
    pub fn build(self) -> Result<AdaptiveLimiter, LimiterError> {
        if self.min_concurrency < 1 {
            return Err(LimiterError::InvalidConfig(format!(
                "{} -- min_concurrency ({}) must be at least 1",
                self.log_prefix, self.min_concurrency
            )));
        }

        if self.min_concurrency > self.max_concurrency {
            return Err(LimiterError::InvalidConfig(format!(
                "{} -- min_concurrency ({}) cannot exceed max_concurrency ({})",
                self.log_prefix, self.min_concurrency, self.max_concurrency
            )));
        }

        if self.initial_concurrency < self.min_concurrency {
            return Err(LimiterError::InvalidConfig(format!(
                "{} -- initial_concurrency ({}) cannot be less than min_concurrency ({})",
                self.log_prefix, self.initial_concurrency, self.min_concurrency
            )));
        }

        if self.initial_concurrency > self.max_concurrency {
            return Err(LimiterError::InvalidConfig(format!(
                "{} -- initial_concurrency ({}) cannot exceed max_concurrency ({})",
                self.log_prefix, self.initial_concurrency, self.max_concurrency
            )));
        }

        if !self.overload_threshold.is_finite()
            || self.overload_threshold <= 0.0
            || self.overload_threshold >= 1.0
        {
            return Err(LimiterError::InvalidConfig(format!(
                "{} -- overload_threshold ({}) must lie in (0, 1)",
                self.log_prefix, self.overload_threshold
            )));
        }

        if !self.decrease_factor.is_finite()
            || self.decrease_factor <= 0.0
            || self.decrease_factor >= 1.0
        {
            return Err(LimiterError::InvalidConfig(format!(
                "{} -- decrease_factor ({}) must lie in (0, 1)",
                self.log_prefix, self.decrease_factor
            )));
        }

        if self.max_concurrency > Semaphore::MAX_PERMITS {
            return Err(LimiterError::InvalidConfig(format!(
                "{} -- max_concurrency ({}) exceeds the semaphore permit ceiling",
                self.log_prefix, self.max_concurrency
            )));
        }

        Ok(AdaptiveLimiter {
            state: Arc::new(LimiterState {
                semaphore: AdjustableSemaphore::new(self.initial_concurrency),
                max_concurrency: self.max_concurrency,
                min_concurrency: self.min_concurrency,
                overload_threshold: self.overload_threshold,
                decrease_factor: self.decrease_factor,
                log_prefix: self.log_prefix,
                matcher: self.matcher,
                window: Mutex::new(Window::default()),
                running_count: AtomicUsize::new(0),
            }),
            tracker: TaskTracker::new(),
        })
    }
}
