//! Dispatch Queues
//!
//! [`DispatchQueue`] is the submission surface used by layout, decode and
//! UI code. It fronts one of two backends:
//!
//! - [`SerialQueue`]: one dedicated thread, strict submission order.
//! - [`ConcurrentQueue`]: tasks run on the QoS pool, grouped into
//!   generations separated by barriers.
//!
//! # Example
//! ```rust
//! use fos_dispatch::{DispatchQueue, Qos};
//!
//! let queue = DispatchQueue::serial("layout", Qos::UserInitiated);
//! queue.exec_async(|| println!("layout pass"));
//! let boxes = queue.exec_sync(|| 42);
//! assert_eq!(boxes, 42);
//! ```

mod concurrent;
mod serial;

pub use concurrent::ConcurrentQueue;
pub use serial::SerialQueue;

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;
use crate::group::DispatchGroup;
use crate::qos::Qos;
use crate::run_loop::Block;
use crate::runtime::Runtime;
use crate::work_item::WorkItem;

/// Queue ID counter
static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique queue identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(u64);

impl QueueId {
    /// Allocate a new id
    pub fn next() -> Self {
        Self(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

thread_local! {
    /// Queues whose blocks are executing on this thread, innermost last,
    /// with whether that block holds its queue exclusively
    static CURRENT_QUEUES: RefCell<Vec<(QueueId, bool)>> = const { RefCell::new(Vec::new()) };
}

/// Marks a queue as executing on this thread until dropped
pub(crate) struct CurrentQueue(QueueId);

impl CurrentQueue {
    /// `exclusive` is true when nothing else of the queue runs alongside
    /// the block (serial queues, barriers)
    pub(crate) fn enter(id: QueueId, exclusive: bool) -> Self {
        CURRENT_QUEUES.with(|queues| queues.borrow_mut().push((id, exclusive)));
        Self(id)
    }

    pub(crate) fn contains(id: QueueId) -> bool {
        Self::exclusive(id).is_some()
    }

    /// Exclusivity of the innermost block of `id` running on this thread
    pub(crate) fn exclusive(id: QueueId) -> Option<bool> {
        CURRENT_QUEUES.with(|queues| {
            queues
                .borrow()
                .iter()
                .rev()
                .find(|(queue, _)| *queue == id)
                .map(|(_, exclusive)| *exclusive)
        })
    }
}

impl Drop for CurrentQueue {
    fn drop(&mut self) {
        CURRENT_QUEUES.with(|queues| {
            let mut queues = queues.borrow_mut();
            if let Some(pos) = queues.iter().rposition(|(id, _)| *id == self.0) {
                queues.remove(pos);
            }
        });
    }
}

/// Flags passed to a backend with each asynchronous block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitFlags {
    /// Run exclusively relative to everything before and after
    pub barrier: bool,
    /// Jump ahead of normally queued blocks
    pub enforce_priority: bool,
}

/// Execution contract shared by serial and concurrent queues
///
/// Implementations never run an asynchronous block on the submitting
/// thread, and always release their internal lock before running user
/// code.
pub trait DispatchQueueBackend: Send + Sync {
    /// Queue `block` for asynchronous execution
    fn exec_async(&self, block: Block, flags: SubmitFlags);

    /// Run `block` on the calling thread once the queue permits it
    fn exec_sync(&self, block: &mut dyn FnMut(), barrier: bool);

    /// Whether tasks may overlap
    fn is_concurrent(&self) -> bool;

    /// Identity used for re-entrancy detection
    fn id(&self) -> QueueId;
}

/// Options for [`DispatchQueue::exec_async_with`]
#[derive(Debug, Clone, Default)]
pub struct AsyncOptions {
    barrier: bool,
    enforce_priority: bool,
    group: Option<DispatchGroup>,
}

impl AsyncOptions {
    /// Plain asynchronous submission
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit as a barrier
    pub fn barrier(mut self) -> Self {
        self.barrier = true;
        self
    }

    /// Jump ahead of normally queued blocks (serial queues)
    pub fn enforce_priority(mut self) -> Self {
        self.enforce_priority = true;
        self
    }

    /// Track completion in `group`
    pub fn group(mut self, group: &DispatchGroup) -> Self {
        self.group = Some(group.clone());
        self
    }

    fn flags(&self) -> SubmitFlags {
        SubmitFlags {
            barrier: self.barrier,
            enforce_priority: self.enforce_priority,
        }
    }
}

/// Leaves a group when dropped, even if the block panicked
struct GroupLeave(DispatchGroup);

impl Drop for GroupLeave {
    fn drop(&mut self) {
        self.0.leave();
    }
}

struct QueueInner {
    label: String,
    qos: Qos,
    backend: Box<dyn DispatchQueueBackend>,
}

/// Task queue handle (cheap to clone)
#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("label", &self.inner.label)
            .field("qos", &self.inner.qos)
            .field("concurrent", &self.is_concurrent())
            .finish()
    }
}

impl DispatchQueue {
    /// Global concurrent queue for `qos` on the shared runtime
    pub fn global(qos: Qos) -> Self {
        Runtime::shared().global_queue(qos)
    }

    /// Create a queue on the shared runtime
    ///
    /// # Panics
    /// If the OS refuses to create the serial queue's thread.
    pub fn new(label: &str, qos: Qos, concurrent: bool) -> Self {
        match Self::try_new(label, qos, concurrent) {
            Ok(queue) => queue,
            Err(err) => panic!("failed to create dispatch queue {label}: {err}"),
        }
    }

    /// Create a queue on the shared runtime, reporting thread failures
    pub fn try_new(label: &str, qos: Qos, concurrent: bool) -> Result<Self> {
        let runtime = Runtime::shared();
        if concurrent {
            Ok(runtime.concurrent_queue(label, qos))
        } else {
            runtime.serial_queue(label, qos)
        }
    }

    /// Create a serial queue on the shared runtime
    pub fn serial(label: &str, qos: Qos) -> Self {
        Self::new(label, qos, false)
    }

    /// Create a concurrent queue on the shared runtime
    pub fn concurrent(label: &str, qos: Qos) -> Self {
        Self::new(label, qos, true)
    }

    pub(crate) fn from_backend(
        label: &str,
        qos: Qos,
        backend: Box<dyn DispatchQueueBackend>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                label: label.to_string(),
                qos,
                backend,
            }),
        }
    }

    /// Queue label
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Queue QoS class
    pub fn qos(&self) -> Qos {
        self.inner.qos
    }

    /// Whether tasks may overlap
    pub fn is_concurrent(&self) -> bool {
        self.inner.backend.is_concurrent()
    }

    /// Check whether the calling code is running a block of this queue
    pub fn is_current(&self) -> bool {
        CurrentQueue::contains(self.inner.backend.id())
    }

    /// Submit `f` for asynchronous execution
    pub fn exec_async<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.backend.exec_async(Box::new(f), SubmitFlags::default());
    }

    /// Submit `f` as an asynchronous barrier
    pub fn barrier_async<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.exec_async_with(AsyncOptions::new().barrier(), f);
    }

    /// Submit `f` with explicit options
    ///
    /// With a group, the group is entered before submission and left
    /// once `f` returns or panics.
    pub fn exec_async_with<F>(&self, options: AsyncOptions, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let flags = options.flags();
        let block: Block = match options.group {
            Some(group) => {
                group.enter();
                let leave = GroupLeave(group);
                Box::new(move || {
                    let _leave = leave;
                    f();
                })
            }
            None => Box::new(f),
        };
        tracing::trace!("{}: async submit {:?}", self.inner.label, flags);
        self.inner.backend.exec_async(block, flags);
    }

    /// Perform `item` asynchronously on this queue
    pub fn exec_item<T>(&self, item: &WorkItem<T>)
    where
        T: Clone + Send + 'static,
    {
        let item = item.clone();
        self.exec_async(move || item.perform());
    }

    /// Run `f` on the calling thread once the queue permits, returning its value
    ///
    /// Calling this from a block already running on the same queue runs
    /// `f` inline.
    pub fn exec_sync<T, F>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.sync_inner(f, false)
    }

    /// Like [`exec_sync`](Self::exec_sync), but exclusive on concurrent queues
    ///
    /// # Panics
    /// If called from a non-barrier block of the same concurrent queue.
    pub fn barrier_sync<T, F>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.sync_inner(f, true)
    }

    fn sync_inner<T, F>(&self, f: F, barrier: bool) -> T
    where
        F: FnOnce() -> T,
    {
        if let Some(exclusive) = CurrentQueue::exclusive(self.inner.backend.id()) {
            // A barrier requested by a task that shares its generation would
            // wait for that very task to finish
            assert!(
                exclusive || !barrier,
                "{}: barrier_sync from a non-barrier task of the same queue would deadlock",
                self.inner.label
            );
            tracing::warn!("{}: re-entrant sync runs inline", self.inner.label);
            return f();
        }

        let mut f = Some(f);
        let mut output = None;
        let mut block = || {
            if let Some(f) = f.take() {
                output = Some(f());
            }
        };
        self.inner.backend.exec_sync(&mut block, barrier);
        match output {
            Some(output) => output,
            None => unreachable!("sync block was not executed"),
        }
    }

    /// Run `f(0..iterations)` in parallel on the shared runtime and wait
    pub fn concurrent_perform<F>(iterations: usize, f: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        Runtime::shared().concurrent_perform(iterations, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_ids_unique() {
        let a = QueueId::next();
        let b = QueueId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_current_queue_nesting() {
        let outer = QueueId::next();
        let inner = QueueId::next();
        assert!(!CurrentQueue::contains(outer));
        {
            let _outer = CurrentQueue::enter(outer, true);
            {
                let _inner = CurrentQueue::enter(inner, false);
                assert!(CurrentQueue::contains(outer));
                assert_eq!(CurrentQueue::exclusive(outer), Some(true));
                assert_eq!(CurrentQueue::exclusive(inner), Some(false));
            }
            assert!(!CurrentQueue::contains(inner));
        }
        assert!(!CurrentQueue::contains(outer));
    }

    #[test]
    fn test_async_options() {
        let group = DispatchGroup::new();
        let options = AsyncOptions::new().barrier().enforce_priority().group(&group);
        assert_eq!(
            options.flags(),
            SubmitFlags {
                barrier: true,
                enforce_priority: true
            }
        );
        assert!(options.group.is_some());
    }

    #[test]
    fn test_group_leave_on_panic() {
        let group = DispatchGroup::new();
        group.enter();
        let leave = GroupLeave(group.clone());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _leave = leave;
            panic!("block failed");
        }));
        assert!(result.is_err());
        assert_eq!(group.count(), 0);
    }
}
