//! Work Items
//!
//! A cancellable, awaitable handle to the result of one unit of work.
//!
//! State only moves forward: `Ready -> Performing -> Completed`, or to
//! `Cancelled` from any non-terminal state. Cancellation is cooperative:
//! a block that is already running finishes, but its result is dropped.

use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{DispatchError, Result};
use crate::queue::DispatchQueue;
use crate::sync::{Condition, Lock};

/// Work item lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkItemState {
    /// Created, not yet performed
    Ready,
    /// Block is running
    Performing,
    /// Result delivered
    Completed,
    /// Cancelled before delivering a result
    Cancelled,
}

impl WorkItemState {
    /// Check for `Completed` or `Cancelled`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

type Work<T> = Box<dyn FnOnce() -> Result<T> + Send>;
type Observer<T> = Box<dyn FnOnce(Result<T>) + Send>;

struct State<T> {
    phase: WorkItemState,
    work: Option<Work<T>>,
    result: Option<Result<T>>,
    observers: Vec<Observer<T>>,
}

struct Inner<T> {
    state: Lock<State<T>>,
    condition: Condition,
}

/// Cancellable future-like unit of work (cheap to clone; clones share state)
pub struct WorkItem<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkItem<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for WorkItem<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("WorkItem")
            .field("state", &state.phase)
            .field("observers", &state.observers.len())
            .finish()
    }
}

impl<T: Clone + Send + 'static> WorkItem<T> {
    /// Wrap an infallible block
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::from_work(Box::new(move || Ok(f())))
    }

    /// Wrap a fallible block; its error is delivered to waiters and observers
    pub fn try_new<F, E>(f: F) -> Self
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::from_work(Box::new(move || f().map_err(DispatchError::failed)))
    }

    fn from_work(work: Work<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Lock::new(State {
                    phase: WorkItemState::Ready,
                    work: Some(work),
                    result: None,
                    observers: Vec::new(),
                }),
                condition: Condition::new(),
            }),
        }
    }

    /// Run the block on the calling thread
    ///
    /// Does nothing unless the item is `Ready`. A panic in the block is
    /// captured as [`DispatchError::Panicked`].
    pub fn perform(&self) {
        let work = {
            let mut state = self.inner.state.lock();
            if state.phase != WorkItemState::Ready {
                return;
            }
            state.phase = WorkItemState::Performing;
            state.work.take()
        };
        let Some(work) = work else {
            return;
        };

        let result = match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(result) => result,
            Err(payload) => Err(DispatchError::from_panic(payload)),
        };

        let mut state = self.inner.state.lock();
        if state.phase == WorkItemState::Cancelled {
            tracing::trace!("Discarding result of cancelled work item");
            return;
        }
        state.phase = WorkItemState::Completed;
        for observer in state.observers.drain(..) {
            observer(result.clone());
        }
        state.result = Some(result);
        self.inner.condition.broadcast();
    }

    /// Block until the item completes or is cancelled
    pub fn wait(&self) -> Result<T> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(result) = Self::outcome(&state) {
                return result;
            }
            self.inner.condition.wait(&mut state);
        }
    }

    /// Like [`wait`](Self::wait) with an upper bound
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        loop {
            if let Some(result) = Self::outcome(&state) {
                return result;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DispatchError::TimedOut);
            }
            self.inner.condition.wait_timeout(&mut state, deadline - now);
        }
    }

    fn outcome(state: &State<T>) -> Option<Result<T>> {
        match state.phase {
            WorkItemState::Cancelled => Some(Err(DispatchError::Cancelled)),
            _ => state.result.clone(),
        }
    }

    /// Cancel the item; returns `false` if it already reached a terminal state
    ///
    /// Pending observers are dropped without firing.
    pub fn cancel(&self) -> bool {
        let (work, observers) = {
            let mut state = self.inner.state.lock();
            if state.phase.is_terminal() {
                return false;
            }
            state.phase = WorkItemState::Cancelled;
            self.inner.condition.broadcast();
            (state.work.take(), std::mem::take(&mut state.observers))
        };
        // Captured values drop outside the lock
        drop(work);
        drop(observers);
        true
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkItemState {
        self.inner.state.lock().phase
    }

    /// Check for cancellation
    pub fn is_cancelled(&self) -> bool {
        self.state() == WorkItemState::Cancelled
    }

    /// Run `f` with the result on `queue` once the item completes
    ///
    /// Fires immediately if the item already completed; never fires if it
    /// is cancelled.
    pub fn notify<F>(&self, queue: &DispatchQueue, f: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let queue = queue.clone();
        self.observe(Box::new(move |result| queue.exec_async(move || f(result))));
    }

    /// Perform `next` on `queue` once this item completes
    pub fn notify_item<U>(&self, queue: &DispatchQueue, next: &WorkItem<U>)
    where
        U: Clone + Send + 'static,
    {
        let queue = queue.clone();
        let next = next.clone();
        self.observe(Box::new(move |_| queue.exec_item(&next)));
    }

    fn observe(&self, observer: Observer<T>) {
        let mut state = self.inner.state.lock();
        match state.phase {
            WorkItemState::Completed => {
                if let Some(result) = state.result.clone() {
                    observer(result);
                }
            }
            WorkItemState::Cancelled => {}
            WorkItemState::Ready | WorkItemState::Performing => state.observers.push(observer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_perform_and_wait() {
        let item = WorkItem::new(|| 21 * 2);
        assert_eq!(item.state(), WorkItemState::Ready);
        item.perform();
        assert_eq!(item.state(), WorkItemState::Completed);
        assert_eq!(item.wait().unwrap(), 42);
        // Results stay available to later waiters
        assert_eq!(item.wait().unwrap(), 42);
    }

    #[test]
    fn test_perform_twice_runs_once() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let item = {
            let count = Arc::clone(&count);
            WorkItem::new(move || count.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
        };
        item.perform();
        item.perform();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_captured() {
        let item: WorkItem<u32> = WorkItem::try_new(|| Err("frame decode failed"));
        item.perform();
        let err = item.wait().unwrap_err();
        assert!(matches!(err, DispatchError::Failed(_)));
        assert_eq!(err.to_string(), "Block failed: frame decode failed");
    }

    #[test]
    fn test_panic_captured() {
        let item: WorkItem<u32> = WorkItem::new(|| panic!("glyph transform"));
        item.perform();
        match item.wait() {
            Err(DispatchError::Panicked(msg)) => assert_eq!(msg, "glyph transform"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cancel_before_perform() {
        let item = WorkItem::new(|| 1);
        assert!(item.cancel());
        item.perform();
        assert!(item.is_cancelled());
        assert!(item.wait().unwrap_err().is_cancelled());
        assert!(!item.cancel());
    }

    #[test]
    fn test_cancel_during_perform_discards_result() {
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let item = WorkItem::new(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            7
        });

        let performer = {
            let item = item.clone();
            thread::spawn(move || item.perform())
        };
        started_rx.recv().unwrap();
        assert_eq!(item.state(), WorkItemState::Performing);
        assert!(item.cancel());
        release_tx.send(()).unwrap();
        performer.join().unwrap();

        assert_eq!(item.state(), WorkItemState::Cancelled);
        assert!(item.wait().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_wait_blocks_until_performed() {
        let item = WorkItem::new(|| "done".to_string());
        let waiter = {
            let item = item.clone();
            thread::spawn(move || item.wait())
        };
        thread::sleep(Duration::from_millis(10));
        item.perform();
        assert_eq!(waiter.join().unwrap().unwrap(), "done");
    }

    #[test]
    fn test_wait_timeout() {
        let item = WorkItem::new(|| 0u8);
        assert!(matches!(
            item.wait_timeout(Duration::from_millis(10)),
            Err(DispatchError::TimedOut)
        ));
    }

    #[test]
    fn test_observers_fire_in_order() {
        let item = WorkItem::new(|| 5);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for tag in 0..3 {
            let seen = Arc::clone(&seen);
            item.observe(Box::new(move |result| {
                seen.lock().push((tag, result.unwrap()));
            }));
        }
        item.perform();
        assert_eq!(*seen.lock(), vec![(0, 5), (1, 5), (2, 5)]);

        // Late observers fire immediately
        let seen_late = Arc::clone(&seen);
        item.observe(Box::new(move |result| {
            seen_late.lock().push((3, result.unwrap()));
        }));
        assert_eq!(seen.lock().len(), 4);
    }

    #[test]
    fn test_cancel_drops_observers() {
        let item = WorkItem::new(|| 5);
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        {
            let fired = Arc::clone(&fired);
            item.observe(Box::new(move |_| fired.store(true, std::sync::atomic::Ordering::SeqCst)));
        }
        item.cancel();
        item.perform();
        assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));
    }
}
