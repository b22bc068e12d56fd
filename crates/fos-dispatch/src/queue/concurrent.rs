//! Concurrent Queue
//!
//! Tasks are grouped into generations ("items") separated by barriers.
//! Exactly one item is current at a time:
//!
//! - a non-barrier item lets all of its tasks overlap, bounded only by
//!   the pool's width;
//! - a barrier item holds a single task and becomes current only after
//!   every earlier task finished; nothing later starts until it is done.
//!
//! New non-barrier work joins the current item directly while nothing is
//! queued behind it, otherwise it accumulates in `last`, the open
//! generation at the tail. Blocked `sync` callers wait on their item's
//! ticket and are woken together when that item becomes current.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::{CurrentQueue, DispatchQueueBackend, QueueId, SubmitFlags};
use crate::fifo::FifoQueue;
use crate::qos::Qos;
use crate::qos_pool::QosThreadPool;
use crate::run_loop::{Block, run_block};
use crate::sync::{Lock, LockGuard};
use crate::waiter::{Ticket, WaiterRegistry};

/// One generation of tasks
struct Item {
    ticket: Ticket,
    barrier: bool,
    /// Async tasks not yet started
    blocks: FifoQueue<Block>,
    /// Sync callers parked until this item becomes current
    sync_waiters: usize,
    /// Tasks started and not yet finished (sync or async)
    active: usize,
}

impl Item {
    fn new(ticket: Ticket, barrier: bool) -> Self {
        Self {
            ticket,
            barrier,
            blocks: FifoQueue::new(),
            sync_waiters: 0,
            active: 0,
        }
    }

    fn is_finished(&self) -> bool {
        self.blocks.is_empty() && self.sync_waiters == 0 && self.active == 0
    }
}

struct State {
    current: Item,
    /// Open non-barrier generation behind `pending`
    last: Option<Item>,
    pending: FifoQueue<Item>,
    waiters: WaiterRegistry,
    /// Drain jobs submitted to the pool and not yet exited
    workers: usize,
    width: usize,
}

impl State {
    fn new(width: usize) -> Self {
        let mut waiters = WaiterRegistry::new();
        let current = Item::new(waiters.next_ticket(), false);
        Self {
            current,
            last: None,
            pending: FifoQueue::new(),
            waiters,
            workers: 0,
            width: width.max(1),
        }
    }

    /// New non-barrier work may join the current item
    fn accepts_direct(&self) -> bool {
        !self.current.barrier && self.pending.is_empty() && self.last.is_none()
    }

    /// Nothing running and nothing queued
    fn is_idle(&self) -> bool {
        self.current.is_finished() && self.pending.is_empty() && self.last.is_none()
    }

    fn new_item(&mut self, barrier: bool) -> Item {
        Item::new(self.waiters.next_ticket(), barrier)
    }

    /// The open tail generation, created on demand
    fn last_item(&mut self) -> &mut Item {
        let waiters = &mut self.waiters;
        self.last
            .get_or_insert_with(|| Item::new(waiters.next_ticket(), false))
    }

    /// Close the open tail generation so later work queues behind it
    fn flush_last(&mut self) {
        if let Some(item) = self.last.take() {
            self.pending.push_back(item);
        }
    }

    /// Reserve drain jobs for unstarted blocks of the current item
    fn reserve_workers(&mut self) -> usize {
        let wanted = self.current.blocks.len();
        let available = self.width.saturating_sub(self.workers);
        let count = wanted.min(available);
        self.workers += count;
        count
    }

    /// Move past finished items; returns drain jobs to start
    fn advance(&mut self) -> usize {
        while self.current.is_finished() {
            let next = match self.pending.pop_front() {
                Some(item) => item,
                None => match self.last.take() {
                    Some(item) => item,
                    None => break,
                },
            };
            self.current = next;
            if self.current.sync_waiters > 0 {
                self.waiters.broadcast(self.current.ticket);
            }
        }
        if self.current.barrier && self.is_idle() {
            self.current = self.new_item(false);
        }
        self.reserve_workers()
    }

    /// Park until the item holding `ticket` becomes current, then claim a slot
    fn wait_turn(guard: &mut LockGuard<'_, State>, ticket: Ticket) {
        guard.waiters.enter(ticket);
        WaiterRegistry::wait(guard, ticket, |state| &mut state.waiters);
        guard.waiters.leave(ticket);
        debug_assert_eq!(guard.current.ticket, ticket);
        guard.current.sync_waiters -= 1;
        guard.current.active += 1;
    }
}

struct Shared {
    id: QueueId,
    label: String,
    qos: Qos,
    state: Lock<State>,
    pool: Arc<QosThreadPool>,
}

impl Shared {
    fn start_workers(self: &Arc<Self>, count: usize) {
        for _ in 0..count {
            let shared = Arc::clone(self);
            self.pool.perform(self.qos, move || shared.drain());
        }
    }

    /// Run blocks of the current item until none are left to start
    fn drain(self: &Arc<Self>) {
        let mut state = self.state.lock();
        loop {
            let Some(block) = state.current.blocks.pop_front() else {
                state.workers -= 1;
                return;
            };
            state.current.active += 1;
            let exclusive = state.current.barrier;
            LockGuard::unlocked(&mut state, || {
                let _current = CurrentQueue::enter(self.id, exclusive);
                run_block(block);
            });
            state.current.active -= 1;
            let extra = state.advance();
            if extra > 0 {
                LockGuard::unlocked(&mut state, || self.start_workers(extra));
            }
        }
    }
}

/// Queue whose tasks overlap between barriers
pub struct ConcurrentQueue {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConcurrentQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentQueue")
            .field("label", &self.shared.label)
            .field("qos", &self.shared.qos)
            .finish()
    }
}

impl ConcurrentQueue {
    /// Create a queue running its tasks on `pool` at `qos`
    pub fn new(label: &str, qos: Qos, pool: Arc<QosThreadPool>) -> Self {
        let width = pool.thread_count();
        Self {
            shared: Arc::new(Shared {
                id: QueueId::next(),
                label: label.to_string(),
                qos,
                state: Lock::new(State::new(width)),
                pool,
            }),
        }
    }

    /// Generations queued behind the current one (including the open tail)
    pub fn pending_generations(&self) -> usize {
        let state = self.shared.state.lock();
        state.pending.len() + usize::from(state.last.is_some())
    }
}

impl DispatchQueueBackend for ConcurrentQueue {
    fn exec_async(&self, block: Block, flags: SubmitFlags) {
        let start = {
            let mut state = self.shared.state.lock();
            if flags.barrier {
                if state.is_idle() {
                    state.current = state.new_item(true);
                    state.current.blocks.push_back(block);
                } else {
                    state.flush_last();
                    let mut item = state.new_item(true);
                    item.blocks.push_back(block);
                    state.pending.push_back(item);
                }
            } else if state.accepts_direct() {
                state.current.blocks.push_back(block);
            } else {
                state.last_item().blocks.push_back(block);
            }
            state.reserve_workers()
        };
        self.shared.start_workers(start);
    }

    fn exec_sync(&self, block: &mut dyn FnMut(), barrier: bool) {
        {
            let mut state = self.shared.state.lock();
            if barrier {
                if state.is_idle() {
                    state.current = state.new_item(true);
                    state.current.active = 1;
                } else {
                    state.flush_last();
                    let mut item = state.new_item(true);
                    item.sync_waiters = 1;
                    let ticket = item.ticket;
                    state.pending.push_back(item);
                    State::wait_turn(&mut state, ticket);
                }
            } else if state.accepts_direct() {
                state.current.active += 1;
            } else {
                let item = state.last_item();
                item.sync_waiters += 1;
                let ticket = item.ticket;
                State::wait_turn(&mut state, ticket);
            }
        }

        let result = {
            let _current = CurrentQueue::enter(self.shared.id, barrier);
            panic::catch_unwind(AssertUnwindSafe(|| block()))
        };

        let start = {
            let mut state = self.shared.state.lock();
            state.current.active -= 1;
            state.advance()
        };
        self.shared.start_workers(start);

        if let Err(payload) = result {
            panic::resume_unwind(payload);
        }
    }

    fn is_concurrent(&self) -> bool {
        true
    }

    fn id(&self) -> QueueId {
        self.shared.id
    }
}
