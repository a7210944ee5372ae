use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;

use crate::error::LimiterError;

/// A counting semaphore, built on Tokio's [`Semaphore`], whose capacity can be
/// raised or lowered while permits are held and waiters are queued.
///
/// The capacity is the reference value an
/// [`AdaptiveLimiter`](crate::AdaptiveLimiter) adjusts at runtime. Lowering it
/// never revokes permits that are already held; instead the semaphore runs a
/// deficit that holders pay down as they release. The signed [`available`]
/// count makes that deficit observable: it is `capacity - held`, and goes
/// negative while more permits are held than the current capacity allows. No
/// new acquirer succeeds until enough releases bring it back above zero.
///
/// Waiters queue on the inner Tokio semaphore and are woken in FIFO order.
/// The type is a plain future-based primitive with no affinity to a
/// particular runtime instance, so it can be shared freely between tasks on
/// any Tokio runtime flavor.
///
/// [`available`]: Self::available
///
/// # Example
///
/// ```rust,no_run
/// use surgeguard::sync::AdjustableSemaphore;
///
/// #[tokio::main]
/// async fn main() {
///     let semaphore = AdjustableSemaphore::new(5);
///
///     let _permit = semaphore.acquire().await.unwrap();
///
///     // contract below the held count; the permit stays valid
///     semaphore.set_capacity(0);
///     assert_eq!(semaphore.available(), -1);
/// }
/// ```
#[derive(Debug)]
pub struct AdjustableSemaphore {
    /// The underlying Tokio semaphore; its pool holds exactly the permits
    /// that are grantable without waiting, so it never exceeds
    /// `capacity - held`
    inner: Semaphore,

    /// The current reference capacity; acquirers beyond this number wait
    capacity: AtomicUsize,

    /// Counter for permits currently held (acquired and not yet released)
    permits_in_use: AtomicUsize,
}

/// RAII guard for a permit acquired from an [`AdjustableSemaphore`].
///
/// Dropping the guard returns the permit on every exit path, including task
/// cancellation and unwinding. When the semaphore's capacity has been lowered
/// below the held count, the returned permit pays down the deficit instead of
/// becoming grantable.
///
/// [`Permit::forget`] converts the scoped acquisition into a bare one for
/// callers composing their own acquire/release pairing; each forgotten permit
/// must be balanced by exactly one later
/// [`release`](AdjustableSemaphore::release).
#[derive(Debug)]
pub struct Permit<'a> {
    /// owning semaphore; receives the release when the guard drops
    semaphore: &'a AdjustableSemaphore,

    /// set by `forget`; suppresses the release-on-drop
    forgotten: bool,
}

impl AdjustableSemaphore {
    /// Creates a new semaphore with the given starting capacity.
    ///
    /// A capacity of zero is allowed: every acquirer waits until the capacity
    /// is raised or the semaphore is closed.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds the maximum permit count supported by the
    /// underlying Tokio semaphore.
    ///
    /// # Example
    ///
    /// ```rust
    /// use surgeguard::sync::AdjustableSemaphore;
    ///
    /// let semaphore = AdjustableSemaphore::new(10);
    /// assert_eq!(semaphore.capacity(), 10);
    /// assert_eq!(semaphore.available(), 10);
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Semaphore::new(capacity),
            capacity: AtomicUsize::new(capacity),
            permits_in_use: AtomicUsize::new(0),
        }
    }

    /// Acquires a permit, waiting until one is grantable.
    ///
    /// This is the scoped acquisition primitive: the returned [`Permit`]
    /// releases on drop, so the pairing holds on success, error, and
    /// cancellation alike. Dropping the future while still waiting consumes
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::Closed`] once [`close`](Self::close) has been
    /// called; waiters already queued are woken with the same error.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use surgeguard::sync::AdjustableSemaphore;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let semaphore = AdjustableSemaphore::new(1);
    ///     let permit = semaphore.acquire().await.unwrap();
    ///     drop(permit); // returned to the pool
    /// }
    /// ```
    pub async fn acquire(&self) -> Result<Permit<'_>, LimiterError> {
        loop {
            let held = self.permits_in_use.load(Ordering::Acquire);
            let capacity = self.capacity();

            if held >= capacity {
                // more permits held than the capacity allows; park on the
                // inner queue until a release frees something up, then give
                // the permit straight back and re-evaluate
                let parked = self
                    .inner
                    .acquire()
                    .await
                    .map_err(|_| LimiterError::Closed)?;
                drop(parked);
                continue;
            }

            let permit = self
                .inner
                .acquire()
                .await
                .map_err(|_| LimiterError::Closed)?;

            let held_now = self.permits_in_use.fetch_add(1, Ordering::AcqRel) + 1;

            if held_now <= self.capacity() {
                // the pool only ever carries grantable permits, so the one we
                // took stops circulating and the release side decides whether
                // to mint a replacement
                permit.forget();
                return Ok(Permit {
                    semaphore: self,
                    forgotten: false,
                });
            }

            // capacity shrank between the check and the increment; back out
            self.permits_in_use.fetch_sub(1, Ordering::AcqRel);
            drop(permit);
        }
    }

    /// Attempts to acquire a permit without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::NoPermits`] when nothing is grantable and
    /// [`LimiterError::Closed`] after [`close`](Self::close).
    ///
    /// # Example
    ///
    /// ```rust
    /// use surgeguard::sync::AdjustableSemaphore;
    ///
    /// let semaphore = AdjustableSemaphore::new(1);
    ///
    /// let permit = semaphore.try_acquire().unwrap();
    /// assert!(semaphore.try_acquire().is_err());
    /// drop(permit);
    /// ```
    pub fn try_acquire(&self) -> Result<Permit<'_>, LimiterError> {
        let held = self.permits_in_use.load(Ordering::Acquire);
        let capacity = self.capacity();

        if held >= capacity {
            return if self.inner.is_closed() {
                Err(LimiterError::Closed)
            } else {
                Err(LimiterError::NoPermits)
            };
        }

        let permit = self.inner.try_acquire().map_err(|err| match err {
            tokio::sync::TryAcquireError::Closed => LimiterError::Closed,
            tokio::sync::TryAcquireError::NoPermits => LimiterError::NoPermits,
        })?;

        let held_now = self.permits_in_use.fetch_add(1, Ordering::AcqRel) + 1;

        if held_now <= self.capacity() {
            permit.forget();
            return Ok(Permit {
                semaphore: self,
                forgotten: false,
            });
        }

        self.permits_in_use.fetch_sub(1, Ordering::AcqRel);
        drop(permit);
        Err(LimiterError::NoPermits)
    }

    /// Returns a bare-held permit to the semaphore.
    ///
    /// Pairs with [`Permit::forget`]; each forgotten permit must be released
    /// exactly once. Scoped holders never call this; their guard's drop
    /// does the equivalent work.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::UnbalancedRelease`] when no permit is held.
    pub fn release(&self) -> Result<(), LimiterError> {
        if self.release_one() {
            Ok(())
        } else {
            Err(LimiterError::UnbalancedRelease)
        }
    }

    /// Sets a new reference capacity, returning the previous one.
    ///
    /// Raising the capacity makes the difference grantable immediately,
    /// waking that many queued waiters (or all of them, if fewer). Lowering
    /// it never revokes held permits: the semaphore instead runs a deficit,
    /// visible as a negative [`available`](Self::available), that releases
    /// pay down before any new acquirer succeeds.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use surgeguard::sync::AdjustableSemaphore;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let semaphore = AdjustableSemaphore::new(5);
    ///
    ///     let permit = semaphore.acquire().await.unwrap();
    ///     let old = semaphore.set_capacity(2);
    ///
    ///     assert_eq!(old, 5);
    ///     assert_eq!(semaphore.capacity(), 2);
    ///     assert_eq!(semaphore.available(), 1); // 2 - 1 held
    ///     drop(permit);
    /// }
    /// ```
    pub fn set_capacity(&self, new_capacity: usize) -> usize {
        let old_capacity = self.capacity.swap(new_capacity, Ordering::AcqRel);

        // reconcile the pool with what is now grantable; permits held beyond
        // the new capacity are paid down on release instead
        let held = self.permits_in_use.load(Ordering::Acquire);
        let grantable = new_capacity.saturating_sub(held);
        let pooled = self.inner.available_permits();

        if pooled < grantable {
            self.inner.add_permits(grantable - pooled);
        } else if pooled > grantable {
            self.inner.forget_permits(pooled - grantable);
        }

        old_capacity
    }

    /// Returns the current reference capacity.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Returns the instantaneous signed available count: `capacity - held`.
    ///
    /// Negative values mean the capacity was lowered below the number of
    /// permits still held; no acquirer succeeds until releases bring the
    /// value back above zero. Diagnostic only: the value can change the
    /// moment it is read.
    pub fn available(&self) -> i64 {
        self.capacity() as i64 - self.permits_in_use.load(Ordering::Acquire) as i64
    }

    /// Returns the number of permits currently held.
    pub fn held_permits(&self) -> usize {
        self.permits_in_use.load(Ordering::Acquire)
    }

    /// Returns the number of permits grantable without waiting (never
    /// negative; see [`available`](Self::available) for the signed view).
    pub fn grantable_permits(&self) -> usize {
        self.inner.available_permits()
    }

    /// Closes the semaphore.
    ///
    /// All queued waiters wake with [`LimiterError::Closed`], and every later
    /// acquisition fails the same way. Held permits stay valid until
    /// released. Used by the limiter's shutdown so queued tasks settle
    /// instead of waiting on a capacity that will never return.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Returns whether the semaphore has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// release path shared by `Permit::drop` and the bare `release`; returns
    /// false when nothing was held
    fn release_one(&self) -> bool {
        let mut held = self.permits_in_use.load(Ordering::Acquire);

        loop {
            if held == 0 {
                return false;
            }

            match self.permits_in_use.compare_exchange_weak(
                held,
                held - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => held = actual,
            }
        }

        // mint a replacement into the pool only while the post-release hold
        // count sits under capacity; otherwise this release pays down the
        // deficit left by a contraction
        let grantable = self.capacity().saturating_sub(held - 1);

        if self.inner.available_permits() < grantable {
            self.inner.add_permits(1);
        }

        true
    }
}

impl Permit<'_> {
    /// Dissociates the permit from its RAII release.
    ///
    /// The hold stays registered with the semaphore; the caller takes over
    /// the obligation to call [`AdjustableSemaphore::release`] exactly once.
    pub fn forget(mut self) {
        self.forgotten = true;
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.forgotten {
            return;
        }

        if !self.semaphore.release_one() {
            // a guard can only exist for a registered hold; getting here
            // means release was called against this guard's hold
            log::warn!("permit dropped but no hold was registered; release/forget imbalance");
        }
    }
}
