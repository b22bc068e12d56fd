//! Dispatch Runtime
//!
//! Owns the worker pools and the global queues. Queues created from a
//! runtime keep its pools alive; once the runtime and every such queue are
//! gone, the pools cancel their run loops and join their threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::group::DispatchGroup;
use crate::pool::ThreadPool;
use crate::qos::{QOS_COUNT, Qos};
use crate::qos_pool::QosThreadPool;
use crate::queue::{ConcurrentQueue, DispatchQueue, SerialQueue};
use crate::run_loop::Block;

static SHARED: OnceLock<Runtime> = OnceLock::new();

/// Dispatch runtime context
pub struct Runtime {
    config: RuntimeConfig,
    pool: Arc<ThreadPool>,
    qos_pool: Arc<QosThreadPool>,
    globals: [DispatchQueue; QOS_COUNT],
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("qos_pool", &self.qos_pool)
            .finish()
    }
}

impl Runtime {
    /// Start the pools described by `config`
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let config = config.normalized();
        let prefix = &config.thread_name_prefix;
        let pool = Arc::new(ThreadPool::new(&format!("{}-pool", prefix), config.pool_threads)?);
        let qos_pool = Arc::new(QosThreadPool::new(
            &format!("{}-qos", prefix),
            config.qos_threads,
        )?);

        let globals = Qos::ALL.map(|qos| {
            let label = format!("{}.global.{}", prefix, qos.name());
            let backend = ConcurrentQueue::new(&label, qos, Arc::clone(&qos_pool));
            DispatchQueue::from_backend(&label, qos, Box::new(backend))
        });

        tracing::info!(
            "Dispatch runtime started: {} pool threads, {} QoS threads",
            pool.thread_count(),
            qos_pool.thread_count()
        );
        Ok(Self {
            config,
            pool,
            qos_pool,
            globals,
        })
    }

    /// Process-wide runtime, created from the environment on first use
    ///
    /// # Panics
    /// If the worker threads cannot be created.
    pub fn shared() -> &'static Runtime {
        SHARED.get_or_init(|| match Runtime::new(RuntimeConfig::from_env()) {
            Ok(runtime) => runtime,
            Err(err) => panic!("failed to start dispatch runtime: {err}"),
        })
    }

    /// Runtime configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Plain fixed-size pool
    pub fn thread_pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    /// QoS-partitioned pool
    pub fn qos_pool(&self) -> &Arc<QosThreadPool> {
        &self.qos_pool
    }

    /// Global concurrent queue for `qos`
    pub fn global_queue(&self, qos: Qos) -> DispatchQueue {
        self.globals[qos.index()].clone()
    }

    /// New serial queue with its own thread
    pub fn serial_queue(&self, label: &str, qos: Qos) -> Result<DispatchQueue> {
        let backend = SerialQueue::new(label, qos, &self.config)?;
        Ok(DispatchQueue::from_backend(label, qos, Box::new(backend)))
    }

    /// New concurrent queue on the QoS pool
    pub fn concurrent_queue(&self, label: &str, qos: Qos) -> DispatchQueue {
        let backend = ConcurrentQueue::new(label, qos, Arc::clone(&self.qos_pool));
        DispatchQueue::from_backend(label, qos, Box::new(backend))
    }

    /// Run `f(i)` for every `i` in `0..iterations` in parallel and wait
    ///
    /// Fans out to at most one helper per pool thread; the calling thread
    /// takes iterations too, so this makes progress even when every pool
    /// thread is busy.
    pub fn concurrent_perform<F>(&self, iterations: usize, f: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        if iterations == 0 {
            return;
        }

        let group = DispatchGroup::new();
        group.enter_many(iterations);
        let job = Arc::new(ParallelFor {
            next: AtomicUsize::new(0),
            iterations,
            f,
            group: group.clone(),
        });

        let helpers = self.pool.thread_count().min(iterations) - 1;
        let blocks = (0..helpers).map(|_| {
            let job = Arc::clone(&job);
            Box::new(move || job.run()) as Block
        });
        self.pool.perform_all(blocks);

        job.run();
        group.wait();
    }
}

struct ParallelFor<F> {
    next: AtomicUsize,
    iterations: usize,
    f: F,
    group: DispatchGroup,
}

impl<F: Fn(usize)> ParallelFor<F> {
    /// Claim and run iterations until none are left
    fn run(&self) {
        loop {
            let i = self.next.fetch_add(1, Ordering::Relaxed);
            if i >= self.iterations {
                return;
            }
            let _done = IterationDone(&self.group);
            (self.f)(i);
        }
    }
}

struct IterationDone<'a>(&'a DispatchGroup);

impl Drop for IterationDone<'_> {
    fn drop(&mut self) {
        self.0.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn test_runtime() -> Runtime {
        Runtime::new(
            RuntimeConfig::default()
                .with_pool_threads(3)
                .with_qos_threads(4)
                .with_thread_name_prefix("test-rt")
                .with_thread_priority(false),
        )
        .unwrap()
    }

    #[test]
    fn test_runtime_pools() {
        let runtime = test_runtime();
        assert_eq!(runtime.thread_pool().thread_count(), 3);
        assert_eq!(runtime.qos_pool().thread_count(), 4);
        assert_eq!(runtime.config().thread_name_prefix, "test-rt");
    }

    #[test]
    fn test_global_queues() {
        let runtime = test_runtime();
        for qos in Qos::ALL {
            let queue = runtime.global_queue(qos);
            assert!(queue.is_concurrent());
            assert_eq!(queue.qos(), qos);
            assert!(queue.label().ends_with(qos.name()));
        }
    }

    #[test]
    fn test_concurrent_perform_covers_all_iterations() {
        let runtime = test_runtime();
        let sum = Arc::new(AtomicU64::new(0));
        let hits = Arc::new((0..100).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());
        {
            let sum = Arc::clone(&sum);
            let hits = Arc::clone(&hits);
            runtime.concurrent_perform(100, move |i| {
                sum.fetch_add(i as u64, Ordering::SeqCst);
                hits[i].fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(sum.load(Ordering::SeqCst), (0..100).sum::<u64>());
        assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_concurrent_perform_zero_iterations() {
        let runtime = test_runtime();
        runtime.concurrent_perform(0, |_| panic!("must not run"));
    }

    #[test]
    fn test_shared_runtime_is_singleton() {
        let a = Runtime::shared() as *const Runtime;
        let b = Runtime::shared() as *const Runtime;
        assert_eq!(a, b);
    }
}
