//! Adaptive concurrency governor
//!
//! [`AdaptiveLimiter`] submits user operations through an
//! [`AdjustableSemaphore`](crate::sync::AdjustableSemaphore), classifies each
//! completion as success, overload, or neutral, and recomputes the
//! semaphore's capacity from a rolling outcome window using an
//! additive-increase / multiplicative-decrease rule.

mod adaptive_limiter;
mod builder;
mod handle;

pub use self::adaptive_limiter::AdaptiveLimiter;
pub use self::builder::LimiterBuilder;
pub use self::handle::TaskHandle;
