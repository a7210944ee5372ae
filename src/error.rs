//! error surface shared by the semaphore, the limiter, and the classifier
//! collaborators
use thiserror::Error;

/// Sentinel error signaling that the called service rejected or throttled a
/// request because it is overloaded.
///
/// Operations submitted to an [`AdaptiveLimiter`](crate::AdaptiveLimiter)
/// surface this through their `anyhow::Error`; the limiter detects it with a
/// single downcast over the error chain, so both of these count as overload:
///
/// ```rust
/// use surgeguard::ServiceOverload;
/// use anyhow::anyhow;
///
/// // raised directly
/// let direct = anyhow::Error::new(ServiceOverload);
/// assert!(direct.is::<ServiceOverload>());
///
/// // attached to a domain error by a classifier; the original error is
/// // preserved underneath
/// let attached = anyhow!("connection reset by peer").context(ServiceOverload);
/// assert!(attached.is::<ServiceOverload>());
/// ```
#[derive(Error, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[error("service signaled overload")]
pub struct ServiceOverload;

/// Errors produced by the limiter and semaphore themselves, as opposed to
/// errors produced by submitted operations (which pass through untouched)
#[derive(Error, Debug)]
pub enum LimiterError {
    /// constructor arguments violated an ordering or range constraint
    #[error("invalid limiter configuration: {0}")]
    InvalidConfig(String),

    /// submit was called after shutdown
    #[error("limiter has been shut down; no further submissions are accepted")]
    ShutDown,

    /// the semaphore was closed while the caller was waiting for (or asking
    /// for) a permit; queued tasks settle with this during shutdown
    #[error("semaphore closed while waiting for a permit")]
    Closed,

    /// try_acquire found nothing grantable
    #[error("no permits available")]
    NoPermits,

    /// release was called without a matching forgotten acquisition
    #[error("release called without a matching acquire")]
    UnbalancedRelease,

    /// the managed task behind a handle was aborted before it settled
    #[error("task was cancelled before completing")]
    Cancelled,
}
