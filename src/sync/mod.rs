//! Synchronization primitives for surgeguard
//!
//! This module provides enhanced synchronization primitives that extend
//! the functionality of standard async synchronization tools to meet
//! the adaptive limiter's specific needs.

mod adjustable_semaphore;

pub use adjustable_semaphore::{AdjustableSemaphore, Permit};
