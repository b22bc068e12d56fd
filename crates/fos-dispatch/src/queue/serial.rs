//! Serial Queue
//!
//! One dedicated thread drains a FIFO of items in submission order. An
//! item is either a batch of adjacent async blocks or a ticket for a
//! blocked `sync` caller; when the loop reaches a ticket it hands the
//! queue over to that caller and parks until the caller is done.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::{CurrentQueue, DispatchQueueBackend, QueueId, SubmitFlags};
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::fifo::FifoQueue;
use crate::qos::Qos;
use crate::run_loop::{Block, RunLoop, run_block};
use crate::sync::{Condition, Lock};
use crate::thread::Thread;
use crate::waiter::{Ticket, WaiterRegistry};

/// Largest number of async blocks merged into one batch
const MAX_BATCH: usize = 32;

enum Item {
    Blocks(Vec<Block>),
    Waiter(Ticket),
}

/// Who currently owns the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Executor {
    Idle,
    Loop,
    Sync,
}

struct State {
    items: FifoQueue<Item>,
    /// Enforced-priority items at the front of `items`
    enforced: usize,
    executor: Executor,
    waiters: WaiterRegistry,
    closing: bool,
}

impl State {
    /// Next unit for the queue thread
    fn next(&mut self, id: QueueId, run_loop: &RunLoop) -> Option<Block> {
        if self.executor == Executor::Loop {
            self.executor = Executor::Idle;
        }
        if self.executor == Executor::Sync {
            return None;
        }

        let Some(item) = self.items.pop_front() else {
            if self.closing {
                run_loop.cancel();
            }
            return None;
        };
        self.enforced = self.enforced.saturating_sub(1);

        match item {
            Item::Blocks(blocks) => {
                self.executor = Executor::Loop;
                Some(Box::new(move || {
                    let _current = CurrentQueue::enter(id, true);
                    for block in blocks {
                        run_block(block);
                    }
                }))
            }
            Item::Waiter(ticket) => {
                self.executor = Executor::Sync;
                self.waiters.signal(ticket);
                None
            }
        }
    }

    fn push(&mut self, block: Block, enforce_priority: bool) {
        if enforce_priority {
            // Behind earlier enforced blocks, ahead of everything else
            let at = self.enforced;
            self.items.insert(at, Item::Blocks(vec![block]));
            self.enforced += 1;
            return;
        }

        let can_merge = self.items.len() > self.enforced;
        match self.items.back_mut() {
            Some(Item::Blocks(blocks)) if can_merge && blocks.len() < MAX_BATCH => {
                blocks.push(block)
            }
            _ => self.items.push_back(Item::Blocks(vec![block])),
        }
    }
}

struct Shared {
    id: QueueId,
    label: String,
    state: Lock<State>,
    condition: Condition,
}

/// Strict FIFO queue backed by one dedicated thread
pub struct SerialQueue {
    shared: Arc<Shared>,
    thread: Thread,
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("label", &self.shared.label)
            .field("thread", &self.thread)
            .finish()
    }
}

impl SerialQueue {
    /// Create the queue and start its thread
    pub fn new(label: &str, qos: Qos, config: &RuntimeConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            id: QueueId::next(),
            label: label.to_string(),
            state: Lock::new(State {
                items: FifoQueue::new(),
                enforced: 0,
                executor: Executor::Idle,
                waiters: WaiterRegistry::new(),
                closing: false,
            }),
            condition: Condition::new(),
        });

        let name = format!("{}-{}", config.thread_name_prefix, label);
        let body = {
            let shared = Arc::clone(&shared);
            move || {
                let run_loop = RunLoop::new();
                run_loop.run(&shared.state, &shared.condition, |state| {
                    state.next(shared.id, &run_loop)
                });
                tracing::debug!("Serial queue {} stopped", shared.label);
            }
        };
        let thread = if config.apply_thread_priority {
            Thread::spawn_with_qos(&name, qos, body)?
        } else {
            Thread::spawn(&name, body)?
        };

        tracing::debug!("Serial queue {} started ({})", label, qos);
        Ok(Self { shared, thread })
    }

    /// Blocks and sync tickets waiting to run
    pub fn pending(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    fn finish_sync(&self) {
        let mut state = self.shared.state.lock();
        state.executor = Executor::Idle;
        self.shared.condition.signal();
    }
}

impl DispatchQueueBackend for SerialQueue {
    fn exec_async(&self, block: Block, flags: SubmitFlags) {
        let mut state = self.shared.state.lock();
        state.push(block, flags.enforce_priority);
        self.shared.condition.signal();
    }

    fn exec_sync(&self, block: &mut dyn FnMut(), _barrier: bool) {
        {
            let mut state = self.shared.state.lock();
            if state.executor == Executor::Idle && state.items.is_empty() {
                state.executor = Executor::Sync;
            } else {
                let ticket = state.waiters.register();
                state.items.push_back(Item::Waiter(ticket));
                self.shared.condition.signal();
                WaiterRegistry::wait(&mut state, ticket, |state| &mut state.waiters);
                state.waiters.leave(ticket);
            }
        }

        let result = {
            let _current = CurrentQueue::enter(self.shared.id, true);
            panic::catch_unwind(AssertUnwindSafe(|| block()))
        };
        self.finish_sync();
        if let Err(payload) = result {
            panic::resume_unwind(payload);
        }
    }

    fn is_concurrent(&self) -> bool {
        false
    }

    fn id(&self) -> QueueId {
        self.shared.id
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        // The thread drains what is queued, then exits. It is not joined:
        // the last handle may be dropped from a block on this very queue.
        let mut state = self.shared.state.lock();
        state.closing = true;
        self.shared.condition.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn test_queue(label: &str) -> SerialQueue {
        let config = RuntimeConfig::default().with_thread_priority(false);
        SerialQueue::new(label, Qos::Utility, &config).unwrap()
    }

    #[test]
    fn test_async_order() {
        let queue = test_queue("test-serial-order");
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel();

        for i in 0..100 {
            let order = Arc::clone(&order);
            queue.exec_async(Box::new(move || order.lock().push(i)), SubmitFlags::default());
        }
        queue.exec_async(Box::new(move || tx.send(()).unwrap()), SubmitFlags::default());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(*order.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_sync_waits_for_async() {
        let queue = test_queue("test-serial-sync");
        let order = Arc::new(Mutex::new(Vec::new()));

        {
            let order = Arc::clone(&order);
            queue.exec_async(
                Box::new(move || {
                    thread::sleep(Duration::from_millis(20));
                    order.lock().push("async");
                }),
                SubmitFlags::default(),
            );
        }
        let mut ran = false;
        queue.exec_sync(
            &mut || {
                order.lock().push("sync");
                ran = true;
            },
            false,
        );

        assert!(ran);
        assert_eq!(*order.lock(), vec!["async", "sync"]);
    }

    #[test]
    fn test_sync_idle_runs_inline() {
        let queue = test_queue("test-serial-inline");
        let caller = thread::current().id();
        let mut ran_on = None;
        queue.exec_sync(&mut || ran_on = Some(thread::current().id()), false);
        assert_eq!(ran_on, Some(caller));
    }

    #[test]
    fn test_enforced_priority_jumps_queue() {
        let queue = test_queue("test-serial-enforced");
        let order = Arc::new(Mutex::new(Vec::new()));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();

        queue.exec_async(
            Box::new(move || {
                started_tx.send(()).unwrap();
                let _ = release_rx.recv();
            }),
            SubmitFlags::default(),
        );
        started_rx.recv().unwrap();

        let push = |name: &'static str, enforce: bool| {
            let order = Arc::clone(&order);
            queue.exec_async(
                Box::new(move || order.lock().push(name)),
                SubmitFlags {
                    barrier: false,
                    enforce_priority: enforce,
                },
            );
        };
        push("normal-1", false);
        push("normal-2", false);
        push("urgent-1", true);
        push("urgent-2", true);
        assert_eq!(queue.pending(), 3);

        release_tx.send(()).unwrap();
        let mut done = false;
        queue.exec_sync(&mut || done = true, false);
        assert!(done);

        assert_eq!(*order.lock(), vec!["urgent-1", "urgent-2", "normal-1", "normal-2"]);
    }

    #[test]
    fn test_sync_panic_releases_queue() {
        let queue = test_queue("test-serial-panic");
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            queue.exec_sync(&mut || panic!("sync failure"), false);
        }));
        assert!(result.is_err());

        let mut ran = false;
        queue.exec_sync(&mut || ran = true, false);
        assert!(ran);
    }

    #[test]
    fn test_drop_drains_queue() {
        let queue = test_queue("test-serial-drop");
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            queue.exec_async(
                Box::new(move || {
                    thread::sleep(Duration::from_millis(1));
                    tx.send(i).unwrap();
                }),
                SubmitFlags::default(),
            );
        }
        drop(queue);
        drop(tx);

        let received: Vec<_> = rx.iter().collect();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }
}
