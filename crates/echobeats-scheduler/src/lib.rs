//! # Echobeats Scheduler
//!
//! Persistent job scheduler for the echobeats cognitive loop.
//!
//! ## Features
//!
//! - One-off, interval and cron jobs with priorities
//! - File-backed job records that survive restarts
//! - Crash recovery of interrupted and overdue jobs
//! - Retry with linear backoff and a consecutive-failure limit
//! - Pause, resume and delete at any time, including mid-run
//! - Lifecycle events delivered to listeners without blocking dispatch

pub mod config;
pub mod error;
pub mod event;
pub mod executor;
pub mod job;
pub mod recovery;
pub mod scheduler;
pub mod store;

pub use config::SchedulerConfig;
pub use error::{ExecutionError, SchedulerError, StoreError};
pub use event::{FnListener, JobEvent, JobEventKind, JobEventListener};
pub use executor::{DefaultExecutor, ExecutionContext, ExecutorRegistry, FnExecutor, JobExecutor};
pub use job::{JobStatus, JobType, ScheduledJob};
pub use recovery::RecoveryReport;
pub use scheduler::Scheduler;
pub use store::{FileJobStore, JobStore, MemoryJobStore};
