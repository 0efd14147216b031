//! Scheduler errors.

use std::time::Duration;

use thiserror::Error;

use crate::job::JobStatus;

/// Job store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Id cannot be used as a record key.
    #[error("Invalid job id: {0:?}")]
    InvalidId(String),
}

/// Scheduler error types.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Scheduler is already running.
    #[error("Scheduler already running")]
    AlreadyRunning,

    /// Scheduler is not running.
    #[error("Scheduler not running")]
    NotRunning,

    /// Job not found.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// A job with this id is already scheduled.
    #[error("Job already exists: {0}")]
    JobExists(String),

    /// Job definition is not schedulable.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// Operation not allowed in the job's current status.
    #[error("Job {id} is {status}")]
    InvalidState { id: String, status: JobStatus },

    /// Persistence failure.
    #[error("Failed to persist job: {0}")]
    Store(#[from] StoreError),
}

/// Error returned by a job executor.
///
/// Never surfaces to API callers; it is recorded on the job and drives
/// the retry policy.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The executor reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The executor exceeded the execution timeout.
    #[error("Execution timed out after {0:?}")]
    TimedOut(Duration),

    /// The executor observed cancellation and gave up.
    #[error("Execution cancelled")]
    Cancelled,
}

impl ExecutionError {
    /// Create a failure from any displayable message.
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutionError::Failed(message.into())
    }
}

impl From<String> for ExecutionError {
    fn from(message: String) -> Self {
        ExecutionError::Failed(message)
    }
}

impl From<&str> for ExecutionError {
    fn from(message: &str) -> Self {
        ExecutionError::Failed(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message() {
        let err = SchedulerError::InvalidState {
            id: "job-1".to_string(),
            status: JobStatus::Failed,
        };
        assert_eq!(err.to_string(), "Job job-1 is failed");
    }

    #[test]
    fn test_store_error_converts() {
        let err: SchedulerError = StoreError::InvalidId("../x".to_string()).into();
        assert!(matches!(err, SchedulerError::Store(StoreError::InvalidId(_))));
        assert!(err.to_string().contains("../x"));
    }

    #[test]
    fn test_execution_error_from_str() {
        let err: ExecutionError = "boom".into();
        assert_eq!(err.to_string(), "boom");
        assert!(ExecutionError::TimedOut(Duration::from_secs(1))
            .to_string()
            .contains("timed out"));
    }
}
