//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use fos_dispatch::{Runtime, RuntimeConfig};

static INIT_LOGGING: Once = Once::new();

/// Upper bound for any wait in these tests
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Install a `tracing` subscriber honouring `RUST_LOG`, once per binary
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Small private runtime so tests do not compete for the shared pools
pub fn test_runtime(prefix: &str) -> Runtime {
    init_test_logging();
    Runtime::new(
        RuntimeConfig::default()
            .with_pool_threads(4)
            .with_qos_threads(4)
            .with_thread_name_prefix(prefix)
            .with_thread_priority(false),
    )
    .expect("runtime should start")
}
