//! Synchronization Primitives
//!
//! A shareable exclusive lock and a condition variable that waits on it.
//! Several [`Condition`]s may serialize on one [`Lock`]: cloning a lock
//! shares the underlying mutex, which lives as long as its last holder.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Guard proving the calling thread holds a [`Lock`]
pub type LockGuard<'a, T> = MutexGuard<'a, T>;

/// Exclusive lock over `T` with shared ownership
pub struct Lock<T> {
    mutex: Arc<Mutex<T>>,
}

impl<T> Lock<T> {
    /// Create a new lock owning `value`
    pub fn new(value: T) -> Self {
        Self {
            mutex: Arc::new(Mutex::new(value)),
        }
    }

    /// Block until the lock is acquired
    pub fn lock(&self) -> LockGuard<'_, T> {
        self.mutex.lock()
    }

    /// Acquire without blocking
    pub fn try_lock(&self) -> Option<LockGuard<'_, T>> {
        self.mutex.try_lock()
    }

    /// Share the same underlying mutex
    pub fn share(&self) -> Self {
        Self {
            mutex: Arc::clone(&self.mutex),
        }
    }

    /// Number of holders of the underlying mutex
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.mutex)
    }

    /// Check whether two handles refer to the same mutex
    pub fn same_lock(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.mutex, &other.mutex)
    }
}

impl<T> Clone for Lock<T> {
    fn clone(&self) -> Self {
        self.share()
    }
}

impl<T: Default> Default for Lock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for Lock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("holders", &self.holders())
            .field("locked", &self.mutex.is_locked())
            .finish()
    }
}

/// Condition variable bound to a held [`Lock`]
///
/// `wait` takes the guard, so it can only be called while the lock is
/// held. Every wait on one condition must use the same lock.
#[derive(Default)]
pub struct Condition {
    condvar: Condvar,
}

impl Condition {
    /// Create a new condition
    pub fn new() -> Self {
        Self {
            condvar: Condvar::new(),
        }
    }

    /// Release the lock, block until signalled, then re-acquire
    ///
    /// Wakeups may be spurious; callers re-check their predicate.
    pub fn wait<T>(&self, guard: &mut LockGuard<'_, T>) {
        self.condvar.wait(guard);
    }

    /// Like [`wait`](Self::wait) with an upper bound; returns `false` on timeout
    pub fn wait_timeout<T>(&self, guard: &mut LockGuard<'_, T>, timeout: Duration) -> bool {
        !self.condvar.wait_for(guard, timeout).timed_out()
    }

    /// Wake one waiter; returns whether one was waiting
    pub fn signal(&self) -> bool {
        self.condvar.notify_one()
    }

    /// Wake every waiter; returns how many were woken
    pub fn broadcast(&self) -> usize {
        self.condvar.notify_all()
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condition").finish_non_exhaustive()
    }
}
