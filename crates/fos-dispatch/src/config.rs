//! Runtime Configuration

/// Environment override for the plain pool size
pub const POOL_THREADS_ENV: &str = "FOS_DISPATCH_POOL_THREADS";
/// Environment override for the QoS pool size
pub const QOS_THREADS_ENV: &str = "FOS_DISPATCH_QOS_THREADS";

/// Number of CPU cores, falling back to 4
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

/// Dispatch runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Worker count of the plain thread pool
    pub pool_threads: usize,

    /// Worker count of the QoS-partitioned pool
    pub qos_threads: usize,

    /// Prefix for every thread the runtime spawns
    pub thread_name_prefix: String,

    /// Map serial queue QoS onto OS thread priority
    pub apply_thread_priority: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cpus = num_cpus();
        Self {
            pool_threads: cpus,
            qos_threads: (cpus * 2).max(4),
            thread_name_prefix: "fos-dispatch".to_string(),
            apply_thread_priority: true,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `FOS_DISPATCH_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_count(POOL_THREADS_ENV) {
            config.pool_threads = n;
        }
        if let Some(n) = env_count(QOS_THREADS_ENV) {
            config.qos_threads = n;
        }
        config
    }

    /// Set the plain pool size (clamped to at least 1)
    pub fn with_pool_threads(mut self, n: usize) -> Self {
        self.pool_threads = n.max(1);
        self
    }

    /// Set the QoS pool size (clamped to at least 1)
    pub fn with_qos_threads(mut self, n: usize) -> Self {
        self.qos_threads = n.max(1);
        self
    }

    /// Set the thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: &str) -> Self {
        self.thread_name_prefix = prefix.to_string();
        self
    }

    /// Enable or disable OS priority mapping
    pub fn with_thread_priority(mut self, enabled: bool) -> Self {
        self.apply_thread_priority = enabled;
        self
    }

    pub(crate) fn normalized(mut self) -> Self {
        self.pool_threads = self.pool_threads.max(1);
        self.qos_threads = self.qos_threads.max(1);
        self
    }
}

fn env_count(key: &str) -> Option<usize> {
    parse_count(&std::env::var(key).ok()?)
}

fn parse_count(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert!(config.pool_threads >= 1);
        assert!(config.qos_threads >= 4);
        assert_eq!(config.thread_name_prefix, "fos-dispatch");
        assert!(config.apply_thread_priority);
    }

    #[test]
    fn test_builder_clamps_zero() {
        let config = RuntimeConfig::default()
            .with_pool_threads(0)
            .with_qos_threads(0)
            .with_thread_name_prefix("test")
            .with_thread_priority(false);
        assert_eq!(config.pool_threads, 1);
        assert_eq!(config.qos_threads, 1);
        assert_eq!(config.thread_name_prefix, "test");
        assert!(!config.apply_thread_priority);
    }

    #[test]
    fn test_normalized() {
        let config = RuntimeConfig {
            pool_threads: 0,
            qos_threads: 0,
            ..RuntimeConfig::default()
        }
        .normalized();
        assert_eq!(config.pool_threads, 1);
        assert_eq!(config.qos_threads, 1);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("8"), Some(8));
        assert_eq!(parse_count(" 3 "), Some(3));
        assert_eq!(parse_count("0"), None);
        assert_eq!(parse_count("-2"), None);
        assert_eq!(parse_count("many"), None);
    }
}
