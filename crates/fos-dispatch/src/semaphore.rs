//! Counting Semaphore
//!
//! A negative value counts the threads blocked in [`Semaphore::wait`].
//! Each `signal` that finds a blocked waiter hands out exactly one wakeup.

use std::time::{Duration, Instant};

use crate::sync::{Condition, Lock};

struct State {
    value: isize,
    /// Wakeups handed out by `signal` and not yet claimed
    wakeups: usize,
}

/// Classic counting semaphore
pub struct Semaphore {
    state: Lock<State>,
    condition: Condition,
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("value", &self.value())
            .finish()
    }
}

impl Semaphore {
    /// Create with `initial` permits
    ///
    /// # Panics
    /// If `initial` exceeds `isize::MAX`.
    pub fn new(initial: usize) -> Self {
        let value = match isize::try_from(initial) {
            Ok(value) => value,
            Err(_) => panic!("Semaphore initial value {initial} exceeds isize::MAX"),
        };
        Self {
            state: Lock::new(State {
                value,
                wakeups: 0,
            }),
            condition: Condition::new(),
        }
    }

    /// Take a permit, blocking while none are available
    pub fn wait(&self) {
        let mut state = self.state.lock();
        state.value -= 1;
        if state.value >= 0 {
            return;
        }
        while state.wakeups == 0 {
            self.condition.wait(&mut state);
        }
        state.wakeups -= 1;
    }

    /// Like [`wait`](Self::wait) with an upper bound; returns `false` on timeout
    ///
    /// A timed-out waiter returns its decrement, so a later `signal`
    /// never targets it.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        state.value -= 1;
        if state.value >= 0 {
            return true;
        }
        while state.wakeups == 0 {
            let now = Instant::now();
            if now >= deadline {
                state.value += 1;
                return false;
            }
            self.condition.wait_timeout(&mut state, deadline - now);
        }
        state.wakeups -= 1;
        true
    }

    /// Return a permit; returns whether a blocked waiter was woken
    pub fn signal(&self) -> bool {
        let mut state = self.state.lock();
        let had_waiter = state.value < 0;
        state.value += 1;
        if had_waiter {
            state.wakeups += 1;
            self.condition.signal();
        }
        had_waiter
    }

    /// Current value (negative: number of blocked waiters)
    pub fn value(&self) -> isize {
        self.state.lock().value
    }
}
