//! # surgeguard
//!
//! Client-side adaptive concurrency limiting for asynchronous operations that
//! call overload-prone remote services.
//!
//! The crate decides, moment by moment, how many outstanding operations to
//! permit, using a feedback loop analogous to TCP congestion control: when
//! callees signal overload, the permitted concurrency contracts
//! multiplicatively; during calm periods it expands additively with a bounded
//! exponential step. No coordination with the backend is required; the only
//! contract is that operations surface a distinguished overload error.
//!
//! Two layered pieces make up the core:
//! - [`sync::AdjustableSemaphore`]: a counting semaphore whose capacity can be
//!   changed at runtime without revoking permits already held
//! - [`limiter::AdaptiveLimiter`]: submits user operations through the
//!   semaphore, classifies their outcomes, and recomputes capacity from a
//!   rolling outcome window
//!
//! Collaborators in [`classify`] translate domain errors (HTTP status codes,
//! error message phrasing) into the overload signal, and [`control`] offers
//! retry/pacing decorators that layer outside of task submission.
//!
//! # Example
//!
//! ```rust,no_run
//! use surgeguard::{AdaptiveLimiter, ServiceOverload};
//! use anyhow::Result;
//!
//! # async fn example() -> Result<()> {
//! let limiter = AdaptiveLimiter::builder().max_concurrency(64).build()?;
//!
//! let handle = limiter.submit(async {
//!     // call the backend; raise ServiceOverload when it sheds load
//!     Err::<(), _>(anyhow::Error::new(ServiceOverload))
//! })?;
//!
//! let _outcome = handle.await;
//! limiter.shutdown().await;
//! # Ok(())
//! # }
//! ```
#![deny(clippy::all)]
use reqwest::StatusCode;

pub mod classify;
pub mod control;
mod error;
pub mod limiter;
mod macros;
pub mod sync;

pub use self::error::{LimiterError, ServiceOverload};
pub use self::limiter::{AdaptiveLimiter, LimiterBuilder, TaskHandle};
pub use self::sync::{AdjustableSemaphore, Permit};

/// Default hard upper bound on capacity
pub const DEFAULT_MAX_CONCURRENCY: usize = 256;

/// Default hard lower bound on capacity
pub const DEFAULT_MIN_CONCURRENCY: usize = 1;

/// Default starting capacity
pub const DEFAULT_INITIAL_CONCURRENCY: usize = 1;

/// Default overload fraction at which a window triggers a multiplicative cut
pub const DEFAULT_OVERLOAD_THRESHOLD: f64 = 0.1;

/// Default multiplicative factor applied to capacity when a window is deemed
/// overloaded
pub const DEFAULT_DECREASE_FACTOR: f64 = 0.75;

/// Ceiling for the additive-increase step; the step doubles after each calm
/// window and resets to 1 after a cut, so expansion is bounded-accelerating
/// instead of runaway
pub const MAX_INCREASE_STEP: usize = 16;

/// Default status codes treated as an overload signal by
/// [`classify::StatusClassifier`]
pub const DEFAULT_OVERLOAD_STATUS_CODES: [StatusCode; 2] =
    [StatusCode::SERVICE_UNAVAILABLE, StatusCode::TOO_MANY_REQUESTS];

/// Default phrases treated as an overload signal by
/// [`classify::KeywordClassifier`]; matched case-insensitively against the
/// rendered error chain
pub const DEFAULT_OVERLOAD_KEYWORDS: [&str; 8] = [
    "rate limit",
    "rate-limit",
    "too many requests",
    "overload",
    "retry later",
    "try again later",
    "server busy",
    "quota exceeded",
];
