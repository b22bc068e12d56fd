//! QoS Thread Pool
//!
//! A shared worker pool partitioned into four priority classes. Each
//! class `c` may only start work while the threads running classes at
//! least as urgent as `c` stay below `ceiling[c]`:
//!
//! ```text
//! running[0] + ... + running[c] < ceiling[c]
//! ceiling = total * {1.0, 0.75, 0.5, 0.25}
//! ```
//!
//! Lower classes therefore never occupy the capacity reserved for higher
//! ones, while idle capacity still flows down. Workers remember the class
//! they last served and keep serving it while it has work and still fits
//! under its ceiling.

use std::sync::Arc;

use crate::error::Result;
use crate::fifo::FifoQueue;
use crate::qos::{QOS_COUNT, Qos};
use crate::run_loop::{Block, RunLoop};
use crate::sync::{Condition, Lock};
use crate::thread::Thread;

/// Scheduling state shared by all workers
struct State {
    queues: [FifoQueue<Block>; QOS_COUNT],
    running: [usize; QOS_COUNT],
    ceiling: [usize; QOS_COUNT],
    free: usize,
    total: usize,
}

impl State {
    fn new(total: usize) -> Self {
        Self {
            queues: Default::default(),
            running: [0; QOS_COUNT],
            ceiling: Qos::ALL.map(|qos| qos.ceiling(total)),
            free: total,
            total,
        }
    }

    /// Threads running `qos` or anything more urgent
    fn running_at_least(&self, qos: Qos) -> usize {
        self.running[..=qos.index()].iter().sum()
    }

    /// Check whether one more thread may start serving `qos`
    fn can_start(&self, qos: Qos) -> bool {
        self.free > 0 && self.running_at_least(qos) < self.ceiling[qos.index()]
    }

    /// Check whether a thread already serving `qos` may keep going
    fn can_continue(&self, qos: Qos) -> bool {
        self.running_at_least(qos) <= self.ceiling[qos.index()]
    }

    fn begin_performing(&mut self, qos: Qos) {
        self.running[qos.index()] += 1;
        self.free -= 1;
    }

    fn end_performing(&mut self, qos: Qos) {
        self.running[qos.index()] -= 1;
        self.free += 1;
    }

    /// Check whether queued work exists that an idle worker could start
    fn has_startable(&self) -> bool {
        Qos::ALL
            .iter()
            .any(|&qos| !self.queues[qos.index()].is_empty() && self.can_start(qos))
    }

    /// Next unit for a worker that last served `last`
    fn next(&mut self, last: &mut Option<Qos>) -> Option<Block> {
        if let Some(qos) = *last {
            if !self.queues[qos.index()].is_empty() && self.can_continue(qos) {
                return self.queues[qos.index()].pop_front();
            }
            self.end_performing(qos);
            *last = None;
        }

        for qos in Qos::ALL {
            if !self.queues[qos.index()].is_empty() && self.can_start(qos) {
                self.begin_performing(qos);
                *last = Some(qos);
                return self.queues[qos.index()].pop_front();
            }
        }
        None
    }
}

/// Snapshot of the pool's scheduling counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosPoolStats {
    /// Threads serving each class
    pub running: [usize; QOS_COUNT],
    /// Threads not reserved by any class
    pub free: usize,
    /// Per-class ceilings
    pub ceiling: [usize; QOS_COUNT],
    /// Blocks waiting in each class
    pub pending: [usize; QOS_COUNT],
    /// Total worker count
    pub total: usize,
}

impl QosPoolStats {
    /// Threads currently reserved by any class
    pub fn busy(&self) -> usize {
        self.running.iter().sum()
    }

    /// Blocks waiting across all classes
    pub fn total_pending(&self) -> usize {
        self.pending.iter().sum()
    }
}

struct Shared {
    state: Lock<State>,
    condition: Condition,
}

struct Worker {
    run_loop: Arc<RunLoop>,
    thread: Thread,
}

/// Priority-class-aware worker pool
pub struct QosThreadPool {
    shared: Arc<Shared>,
    workers: Vec<Worker>,
    name: String,
}

impl std::fmt::Debug for QosThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QosThreadPool")
            .field("name", &self.name)
            .field("threads", &self.workers.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl QosThreadPool {
    /// Create a pool of `thread_count` workers named `<name>-N`
    pub fn new(name: &str, thread_count: usize) -> Result<Self> {
        let total = thread_count.max(1);
        let shared = Arc::new(Shared {
            state: Lock::new(State::new(total)),
            condition: Condition::new(),
        });
        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(total),
            name: name.to_string(),
        };

        for id in 0..total {
            let run_loop = Arc::new(RunLoop::new());
            let shared = Arc::clone(&pool.shared);
            let worker_loop = Arc::clone(&run_loop);
            let thread = Thread::spawn(&format!("{}-{}", name, id), move || {
                let mut last = None;
                worker_loop.run(&shared.state, &shared.condition, |state| {
                    let block = state.next(&mut last);
                    if block.is_some() && state.has_startable() {
                        shared.condition.signal();
                    }
                    block
                });
                let mut state = shared.state.lock();
                if let Some(qos) = last {
                    state.end_performing(qos);
                }
            })?;
            pool.workers.push(Worker { run_loop, thread });
        }

        tracing::debug!(
            "QoS pool {} started with {} workers, ceilings {:?}",
            name,
            total,
            pool.shared.state.lock().ceiling
        );
        Ok(pool)
    }

    /// Queue `block` in class `qos`
    ///
    /// A worker is woken only if the class may start work right now;
    /// otherwise the block waits for capacity to be released.
    pub fn perform<F>(&self, qos: Qos, block: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        state.queues[qos.index()].push_back(Box::new(block));
        if state.can_start(qos) {
            self.shared.condition.signal();
        }
    }

    /// Worker count
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Ceiling for `qos`
    pub fn ceiling(&self, qos: Qos) -> usize {
        self.shared.state.lock().ceiling[qos.index()]
    }

    /// Snapshot the scheduling counters
    pub fn stats(&self) -> QosPoolStats {
        let state = self.shared.state.lock();
        QosPoolStats {
            running: state.running,
            free: state.free,
            ceiling: state.ceiling,
            pending: std::array::from_fn(|i| state.queues[i].len()),
            total: state.total,
        }
    }

    /// Cancel every worker and wait for them to exit
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for worker in &self.workers {
            worker.run_loop.cancel();
        }
        let dropped = {
            let mut state = self.shared.state.lock();
            self.shared.condition.broadcast();
            let mut dropped = 0;
            for queue in &mut state.queues {
                dropped += queue.len();
                queue.clear();
            }
            dropped
        };
        for worker in &mut self.workers {
            worker.thread.join();
        }
        self.workers.clear();
        tracing::debug!("QoS pool {} shut down ({} blocks dropped)", self.name, dropped);
    }
}

impl Drop for QosThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
