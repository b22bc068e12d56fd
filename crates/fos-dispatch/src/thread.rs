//! Native Threads
//!
//! Thin wrapper over `std::thread` adding naming, QoS priority mapping
//! and a join that is safe to call from the thread itself.

use std::thread::{self, JoinHandle, ThreadId};

use crate::error::Result;
use crate::qos::Qos;

/// Owned native thread
pub struct Thread {
    name: String,
    qos: Option<Qos>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.name)
            .field("qos", &self.qos)
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl Thread {
    /// Spawn a named thread running `f`
    pub fn spawn<F>(name: &str, f: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn_inner(name, None, f)
    }

    /// Spawn a named thread whose OS priority follows `qos`
    pub fn spawn_with_qos<F>(name: &str, qos: Qos, f: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn_inner(name, Some(qos), f)
    }

    fn spawn_inner<F>(name: &str, qos: Option<Qos>, f: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if let Some(qos) = qos {
                    apply_priority(qos);
                }
                f();
            })?;
        tracing::trace!("Spawned thread {}", name);

        Ok(Self {
            name: name.to_string(),
            qos,
            handle: Some(handle),
        })
    }

    /// Thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// QoS the thread was spawned with
    pub fn qos(&self) -> Option<Qos> {
        self.qos
    }

    /// Native thread id, while the handle is held
    pub fn id(&self) -> Option<ThreadId> {
        self.handle.as_ref().map(|h| h.thread().id())
    }

    /// Check if the thread function has returned
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Wait for the thread to exit
    ///
    /// Joining the current thread would never return, so in that case
    /// the handle is detached instead.
    pub fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            tracing::debug!("Detaching {} instead of joining itself", self.name);
            return;
        }
        if handle.join().is_err() {
            tracing::error!("Thread {} exited with a panic", self.name);
        }
    }
}

/// Map `qos` onto the calling thread's OS priority
#[cfg(target_os = "linux")]
pub fn apply_priority(qos: Qos) {
    let nice = qos.nice_value();
    if nice == 0 {
        return;
    }
    // SAFETY: gettid has no preconditions; setpriority on a TID only
    // affects that thread on Linux.
    let result = unsafe {
        let tid = libc::gettid();
        libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, nice)
    };
    if result != 0 {
        tracing::debug!(
            "setpriority({}) for {} failed: {}",
            nice,
            qos,
            std::io::Error::last_os_error()
        );
    }
}

/// Map `qos` onto the calling thread's OS priority
#[cfg(not(target_os = "linux"))]
pub fn apply_priority(qos: Qos) {
    tracing::trace!("No OS priority mapping for {} on this platform", qos);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_spawn_and_join() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let mut thread = Thread::spawn("test-thread", move || {
            assert_eq!(thread::current().name(), Some("test-thread"));
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        assert_eq!(thread.name(), "test-thread");
        assert!(thread.id().is_some());
        thread.join();
        assert!(ran.load(Ordering::SeqCst));
        assert!(thread.is_finished());
        assert!(thread.id().is_none());
    }

    #[test]
    fn test_spawn_with_qos() {
        let mut thread = Thread::spawn_with_qos("test-bg", Qos::Background, || {}).unwrap();
        assert_eq!(thread.qos(), Some(Qos::Background));
        thread.join();
        // Second join is a no-op
        thread.join();
    }
}
