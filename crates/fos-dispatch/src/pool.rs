//! Thread Pool
//!
//! Fixed-size worker pool: N run loops sharing one FIFO of blocks and
//! one condition.

use std::sync::Arc;

use crate::error::Result;
use crate::fifo::FifoQueue;
use crate::run_loop::{Block, RunLoop};
use crate::sync::{Condition, Lock};
use crate::thread::Thread;

struct PoolShared {
    queue: Lock<FifoQueue<Block>>,
    condition: Condition,
}

struct Worker {
    run_loop: Arc<RunLoop>,
    thread: Thread,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("thread", &self.thread.name())
            .field("cancelled", &self.run_loop.is_cancelled())
            .finish()
    }
}

/// Fixed-size thread pool
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<Worker>,
    name: String,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("pending", &self.pending())
            .finish()
    }
}

impl ThreadPool {
    /// Create a pool of `thread_count` workers named `<name>-N`
    pub fn new(name: &str, thread_count: usize) -> Result<Self> {
        let shared = Arc::new(PoolShared {
            queue: Lock::new(FifoQueue::new()),
            condition: Condition::new(),
        });
        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(thread_count.max(1)),
            name: name.to_string(),
        };

        for id in 0..thread_count.max(1) {
            let run_loop = Arc::new(RunLoop::new());
            let shared = Arc::clone(&pool.shared);
            let worker_loop = Arc::clone(&run_loop);
            // On failure `pool` drops here and stops the workers already started
            let thread = Thread::spawn(&format!("{}-{}", name, id), move || {
                worker_loop.run(&shared.queue, &shared.condition, |queue| queue.pop_front());
            })?;
            pool.workers.push(Worker { run_loop, thread });
        }

        tracing::debug!("Thread pool {} started with {} workers", name, pool.workers.len());
        Ok(pool)
    }

    /// Queue one block and wake one worker
    pub fn perform<F>(&self, block: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock();
        queue.push_back(Box::new(block));
        self.shared.condition.signal();
    }

    /// Queue several blocks and wake every worker
    pub fn perform_all<I>(&self, blocks: I)
    where
        I: IntoIterator<Item = Block>,
    {
        let mut queue = self.shared.queue.lock();
        let before = queue.len();
        queue.extend(blocks);
        match queue.len() - before {
            0 => {}
            1 => {
                self.shared.condition.signal();
            }
            _ => {
                self.shared.condition.broadcast();
            }
        }
    }

    /// Worker count
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Blocks queued but not yet started
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Cancel every worker and wait for them to exit
    ///
    /// Blocks still queued are dropped without running.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for worker in &self.workers {
            worker.run_loop.cancel();
        }
        let dropped = {
            let mut queue = self.shared.queue.lock();
            self.shared.condition.broadcast();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        for worker in &mut self.workers {
            worker.thread.join();
        }
        self.workers.clear();
        tracing::debug!("Thread pool {} shut down ({} blocks dropped)", self.name, dropped);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_thread_pool() {
        let pool = ThreadPool::new("test-pool", 2).unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let (tx, rx) = mpsc::channel();

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            let tx = tx.clone();
            pool.perform(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            });
        }

        for _ in 0..10 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.thread_count(), 2);
    }

    #[test]
    fn test_perform_all_runs_in_parallel() {
        let pool = ThreadPool::new("test-pool-all", 3).unwrap();
        let barrier = Arc::new(std::sync::Barrier::new(3));
        let (tx, rx) = mpsc::channel();

        let blocks: Vec<Block> = (0..3)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let tx = tx.clone();
                Box::new(move || {
                    // Only passes if all three run at once
                    barrier.wait();
                    let _ = tx.send(());
                }) as Block
            })
            .collect();
        pool.perform_all(blocks);

        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
    }

    #[test]
    fn test_zero_threads_clamped() {
        let pool = ThreadPool::new("test-pool-zero", 0).unwrap();
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn test_shutdown_drops_pending() {
        let mut pool = ThreadPool::new("test-pool-shutdown", 1).unwrap();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let ran_late = Arc::new(AtomicU32::new(0));

        pool.perform(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        });
        started_rx.recv().unwrap();
        {
            let ran_late = Arc::clone(&ran_late);
            pool.perform(move || {
                ran_late.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(pool.pending(), 1);

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let _ = release_tx.send(());
        });
        pool.shutdown();
        releaser.join().unwrap();

        assert_eq!(ran_late.load(Ordering::SeqCst), 0);
        assert_eq!(pool.thread_count(), 0);
    }
}
