//! Run Loop
//!
//! The blocking-wait-then-execute cycle every worker thread runs. A run
//! loop holds the shared lock while asking its source for the next unit
//! of work, releases it to execute the unit, and parks on the shared
//! condition when there is nothing to do.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::panic_message;
use crate::sync::{Condition, Lock, LockGuard};

/// Unit of work
pub type Block = Box<dyn FnOnce() + Send + 'static>;

/// Run a block, containing any panic to the block itself
///
/// Returns `false` if the block panicked.
pub fn run_block(block: Block) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(block)) {
        Ok(()) => true,
        Err(payload) => {
            tracing::error!("Dispatched block panicked: {}", panic_message(payload.as_ref()));
            false
        }
    }
}

/// Generic worker loop
#[derive(Debug, Default)]
pub struct RunLoop {
    cancelled: AtomicBool,
}

impl RunLoop {
    /// Create a new run loop
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether the loop was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Mark the loop cancelled
    ///
    /// The owner must then broadcast the shared condition while holding
    /// the lock so a parked loop observes the flag.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Drive the loop until cancelled
    ///
    /// `next` runs with the lock held and returns the next unit of work.
    /// Units run with the lock released; panics are contained.
    pub fn run<S, F>(&self, lock: &Lock<S>, condition: &Condition, mut next: F)
    where
        F: FnMut(&mut S) -> Option<Block>,
    {
        let mut guard = lock.lock();
        loop {
            if self.is_cancelled() {
                break;
            }
            match next(&mut *guard) {
                Some(block) => {
                    LockGuard::unlocked(&mut guard, || {
                        run_block(block);
                    });
                }
                None => {
                    if self.is_cancelled() {
                        break;
                    }
                    condition.wait(&mut guard);
                }
            }
        }
    }
}
