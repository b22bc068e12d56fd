//! fOS Dispatch
//!
//! Task-dispatch runtime for the fOS engine.
//!
//! # Features
//! - Serial queues with a dedicated thread each
//! - Concurrent queues with barriers on a QoS-partitioned pool
//! - Cancellable, awaitable work items
//! - Dispatch groups and counting semaphores
//! - Parallel for (`concurrent_perform`)
//!
//! # Example
//! ```rust
//! use fos_dispatch::{DispatchGroup, DispatchQueue, Qos, WorkItem};
//!
//! let decode = DispatchQueue::concurrent("image-decode", Qos::Utility);
//! let group = DispatchGroup::new();
//! for _ in 0..4 {
//!     decode.exec_async_with(fos_dispatch::AsyncOptions::new().group(&group), || {
//!         // decode one tile
//!     });
//! }
//! group.wait();
//!
//! let item = WorkItem::new(|| 6 * 7);
//! decode.exec_item(&item);
//! assert_eq!(item.wait().unwrap(), 42);
//! ```

mod config;
mod error;
mod fifo;
mod group;
mod pool;
mod qos;
mod qos_pool;
mod queue;
mod run_loop;
mod runtime;
mod semaphore;
mod sync;
mod thread;
mod waiter;
mod work_item;

pub use config::{POOL_THREADS_ENV, QOS_THREADS_ENV, RuntimeConfig, num_cpus};
pub use error::{DispatchError, Result};
pub use fifo::FifoQueue;
pub use group::DispatchGroup;
pub use pool::ThreadPool;
pub use qos::{QOS_COUNT, Qos};
pub use qos_pool::{QosPoolStats, QosThreadPool};
pub use queue::{
    AsyncOptions, ConcurrentQueue, DispatchQueue, DispatchQueueBackend, QueueId, SerialQueue,
    SubmitFlags,
};
pub use run_loop::{Block, RunLoop, run_block};
pub use runtime::Runtime;
pub use semaphore::Semaphore;
pub use sync::{Condition, Lock, LockGuard};
pub use thread::{Thread, apply_priority};
pub use waiter::{Ticket, WaiterRegistry};
pub use work_item::{WorkItem, WorkItemState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
