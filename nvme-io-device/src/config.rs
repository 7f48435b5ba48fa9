//! Configuration for driver initialization, devices and pollers.
//!
//! All option structs come with defaults and builder-style setters:
//!
//! ```
//! use nvme_io_device::{DeviceOpts, EnvOpts, LogLevel, PollerConfig};
//!
//! let env = EnvOpts::new("hello_world").mem_size_mb(256).log_level(LogLevel::Debug);
//! let opts = DeviceOpts::default()
//!     .throttle_limit(128)
//!     .poller(PollerConfig::default().ring_capacity(4096));
//! ```

use crate::nvme::NvmeQpairOpts;

/// Driver log verbosity, forwarded at environment initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Notice,
    Info,
    Debug,
}

/// Driver environment options.
#[derive(Debug, Clone)]
pub struct EnvOpts {
    /// Application name
    pub name: String,
    /// Memory to reserve, in MB (`None` = driver default)
    pub mem_size_mb: Option<u32>,
    /// Use regular pages instead of hugepages
    pub no_huge: bool,
    /// Shared memory id (`None` = process-private)
    pub shm_id: Option<i32>,
    pub log_level: LogLevel,
}

impl Default for EnvOpts {
    fn default() -> Self {
        Self::new("nvme_io_device")
    }
}

impl EnvOpts {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mem_size_mb: None,
            no_huge: false,
            shm_id: None,
            log_level: LogLevel::default(),
        }
    }

    pub fn mem_size_mb(mut self, mb: u32) -> Self {
        self.mem_size_mb = Some(mb);
        self
    }

    pub fn no_huge(mut self, no_huge: bool) -> Self {
        self.no_huge = no_huge;
        self
    }

    pub fn shm_id(mut self, id: i32) -> Self {
        self.shm_id = Some(id);
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }
}

/// Background poller tuning.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Submission ring slots
    pub ring_capacity: usize,
    /// Max requests taken off the ring per iteration
    pub dequeue_burst: usize,
    /// Max completions reaped per iteration
    pub completion_batch: u32,
    /// Iterations between checks of the running flag
    pub flag_check_interval: u32,
    /// Poller thread name
    pub thread_name: String,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1024,
            dequeue_burst: 256,
            completion_batch: 8,
            flag_check_interval: 300,
            thread_name: "poller".to_string(),
        }
    }
}

impl PollerConfig {
    /// Set the ring size. Clamped to at least one slot.
    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity.max(1);
        self
    }

    pub fn dequeue_burst(mut self, burst: usize) -> Self {
        self.dequeue_burst = burst.max(1);
        self
    }

    pub fn completion_batch(mut self, batch: u32) -> Self {
        self.completion_batch = batch;
        self
    }

    /// Set how many iterations pass between checks of the running flag.
    /// Clamped to at least one.
    pub fn flag_check_interval(mut self, interval: u32) -> Self {
        self.flag_check_interval = interval.max(1);
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Per-device options.
#[derive(Debug, Clone)]
pub struct DeviceOpts {
    /// Queue pair options (`None` = driver defaults)
    pub qpair: Option<NvmeQpairOpts>,
    pub poller: PollerConfig,
    /// In-flight requests above which [`throttle`](crate::DeviceHandle::throttle) reports true
    pub throttle_limit: usize,
    /// Upper bound on live I/O contexts (`None` = unbounded)
    pub max_io_contexts: Option<usize>,
}

impl Default for DeviceOpts {
    fn default() -> Self {
        Self {
            qpair: None,
            poller: PollerConfig::default(),
            throttle_limit: 256,
            max_io_contexts: None,
        }
    }
}

impl DeviceOpts {
    pub fn qpair(mut self, opts: NvmeQpairOpts) -> Self {
        self.qpair = Some(opts);
        self
    }

    pub fn poller(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    pub fn throttle_limit(mut self, limit: usize) -> Self {
        self.throttle_limit = limit;
        self
    }

    pub fn max_io_contexts(mut self, max: usize) -> Self {
        self.max_io_contexts = Some(max);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poller_defaults() {
        let config = PollerConfig::default();
        assert_eq!(config.ring_capacity, 1024);
        assert_eq!(config.dequeue_burst, 256);
        assert_eq!(config.completion_batch, 8);
        assert_eq!(config.flag_check_interval, 300);
        assert_eq!(config.thread_name, "poller");
    }

    #[test]
    fn test_setters_clamp() {
        let config = PollerConfig::default().ring_capacity(0).flag_check_interval(0);
        assert_eq!(config.ring_capacity, 1);
        assert_eq!(config.flag_check_interval, 1);
    }
}
