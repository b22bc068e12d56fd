//! Dispatch Group
//!
//! Join counter for N independently submitted tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::queue::DispatchQueue;
use crate::run_loop::Block;
use crate::sync::{Condition, Lock};

struct GroupState {
    outstanding: usize,
    notifications: Vec<(DispatchQueue, Block)>,
}

struct GroupInner {
    state: Lock<GroupState>,
    condition: Condition,
}

/// Completion counter (cheap to clone; clones share the count)
#[derive(Clone)]
pub struct DispatchGroup {
    inner: Arc<GroupInner>,
}

impl std::fmt::Debug for DispatchGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchGroup")
            .field("outstanding", &self.count())
            .finish()
    }
}

impl Default for DispatchGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchGroup {
    /// Create an empty group
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GroupInner {
                state: Lock::new(GroupState {
                    outstanding: 0,
                    notifications: Vec::new(),
                }),
                condition: Condition::new(),
            }),
        }
    }

    /// Record one more outstanding task
    pub fn enter(&self) {
        self.enter_many(1);
    }

    pub(crate) fn enter_many(&self, count: usize) {
        self.inner.state.lock().outstanding += count;
    }

    /// Record one finished task
    ///
    /// # Panics
    /// If called more times than [`enter`](Self::enter).
    pub fn leave(&self) {
        let notifications = {
            let mut state = self.inner.state.lock();
            assert!(
                state.outstanding > 0,
                "DispatchGroup::leave called more times than enter"
            );
            state.outstanding -= 1;
            if state.outstanding > 0 {
                return;
            }
            self.inner.condition.broadcast();
            std::mem::take(&mut state.notifications)
        };
        for (queue, block) in notifications {
            queue.exec_async(block);
        }
    }

    /// Block until every entered task has left
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        while state.outstanding != 0 {
            self.inner.condition.wait(&mut state);
        }
    }

    /// Like [`wait`](Self::wait) with an upper bound; returns `false` on timeout
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.outstanding != 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.inner.condition.wait_timeout(&mut state, deadline - now);
        }
        true
    }

    /// Run `f` on `queue` once the group is empty (right away if it already is)
    pub fn notify<F>(&self, queue: &DispatchQueue, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.outstanding == 0 {
            drop(state);
            queue.exec_async(f);
        } else {
            state.notifications.push((queue.clone(), Box::new(f)));
        }
    }

    /// Outstanding task count
    pub fn count(&self) -> usize {
        self.inner.state.lock().outstanding
    }
}
