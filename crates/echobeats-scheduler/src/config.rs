//! Scheduler configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Directory for job records.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Dispatch loop period in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Per-execution timeout in seconds.
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_secs: u64,

    /// Consecutive failures before a job is marked failed.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Retry delay unit in seconds, multiplied by the failure count.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,

    /// Maximum concurrent executions (0 = unlimited).
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Pending events buffered per listener before events are dropped.
    #[serde(default = "default_listener_queue_capacity")]
    pub listener_queue_capacity: usize,
}

fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".echobeats").join("jobs"))
        .unwrap_or_else(|| PathBuf::from("/tmp/echobeats/jobs"))
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_execution_timeout() -> u64 {
    300
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    60
}

fn default_max_concurrent_jobs() -> usize {
    16
}

fn default_listener_queue_capacity() -> usize {
    256
}

impl SchedulerConfig {
    /// Dispatch loop period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Per-execution timeout.
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    /// Retry delay unit.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            tick_interval_ms: default_tick_interval(),
            execution_timeout_secs: default_execution_timeout(),
            max_consecutive_failures: default_max_consecutive_failures(),
            retry_backoff_secs: default_retry_backoff(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            listener_queue_capacity: default_listener_queue_capacity(),
        }
    }
}
