//! Scheduled job definition and status.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Delay used when a cron expression cannot be evaluated.
pub const CRON_FALLBACK_DELAY: Duration = Duration::from_secs(3600);

/// `time + delay`, saturating at the maximum representable time.
pub fn shift(time: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| time.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// How `next_run_at` is recomputed after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Runs once.
    OneOff,
    /// Runs every `interval`.
    Interval,
    /// Runs on the occurrences of `cron_expr`.
    Cron,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobType::OneOff => "one_off",
            JobType::Interval => "interval",
            JobType::Cron => "cron",
        };
        f.write_str(name)
    }
}

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `next_run_at`.
    Pending,
    /// Currently executing.
    Running,
    /// Finished all of its runs.
    Completed,
    /// Exceeded the consecutive failure limit.
    Failed,
    /// Suspended by the user.
    Paused,
}

impl JobStatus {
    /// Completed and Failed jobs are never dispatched again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Pending
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// A persistent scheduled job.
///
/// Jobs are plain values: the scheduler hands clones to executors and
/// listeners and swaps updated copies back into its table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// Unique job ID. Assigned by the scheduler when empty.
    pub id: String,
    /// Display label.
    pub name: String,
    /// Job type.
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Current status.
    #[serde(default)]
    pub status: JobStatus,
    /// Advisory priority (higher runs first within a tick).
    #[serde(default)]
    pub priority: i32,
    /// Run interval, stored as milliseconds. Required for interval jobs.
    #[serde(default, with = "interval_ms")]
    pub interval: Option<Duration>,
    /// Cron expression. Required for cron jobs.
    #[serde(default)]
    pub cron_expr: Option<String>,
    /// Next time the job is due.
    pub next_run_at: DateTime<Utc>,
    /// Start time of the most recent run.
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    /// Opaque payload handed to the executor.
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Goal this job serves, if any.
    #[serde(default)]
    pub goal_id: Option<String>,
    /// Selects the registered executor.
    #[serde(default)]
    pub context: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Finished execution attempts, successful or not.
    #[serde(default)]
    pub run_count: u32,
    /// Maximum runs (0 = unlimited).
    #[serde(default)]
    pub max_runs: u32,
    /// Error from the most recent failed run.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Consecutive failures.
    #[serde(default)]
    pub error_count: u32,
}

impl ScheduledJob {
    /// Create a new job due immediately.
    pub fn new(name: impl Into<String>, job_type: JobType) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            job_type,
            status: JobStatus::Pending,
            priority: 0,
            interval: None,
            cron_expr: None,
            next_run_at: now,
            last_run_at: None,
            payload: Map::new(),
            goal_id: None,
            context: String::new(),
            created_at: now,
            updated_at: now,
            run_count: 0,
            max_runs: 0,
            last_error: None,
            error_count: 0,
        }
    }

    /// Create a one-off job.
    pub fn one_off(name: impl Into<String>) -> Self {
        Self::new(name, JobType::OneOff)
    }

    /// Create an interval job.
    pub fn interval(name: impl Into<String>, interval: Duration) -> Self {
        let mut job = Self::new(name, JobType::Interval);
        job.interval = Some(interval);
        job
    }

    /// Create a cron job.
    pub fn cron(name: impl Into<String>, cron_expr: impl Into<String>) -> Self {
        let mut job = Self::new(name, JobType::Cron);
        job.cron_expr = Some(cron_expr.into());
        job
    }

    /// Set the job ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the executor context.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Replace the payload.
    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Insert a single payload entry.
    pub fn with_payload_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Set the goal ID.
    pub fn with_goal_id(mut self, goal_id: impl Into<String>) -> Self {
        self.goal_id = Some(goal_id.into());
        self
    }

    /// Set maximum runs (0 = unlimited).
    pub fn with_max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = max_runs;
        self
    }

    /// Set the first due time.
    pub fn with_next_run_at(mut self, next_run_at: DateTime<Utc>) -> Self {
        self.next_run_at = next_run_at;
        self
    }

    /// Check if the job should be dispatched at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.next_run_at <= now
    }

    /// Check if the job reached `max_runs`.
    pub fn runs_exhausted(&self) -> bool {
        self.max_runs > 0 && self.run_count >= self.max_runs
    }

    /// Refresh `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Parse the cron expression, if any.
    pub fn cron_schedule(&self) -> Option<Result<Schedule, cron::error::Error>> {
        self.cron_expr.as_deref().map(Schedule::from_str)
    }

    /// Next cron occurrence strictly after `after`.
    ///
    /// `Ok(None)` means the expression has no future occurrence.
    pub fn next_cron_run(
        &self,
        after: DateTime<Utc>,
    ) -> Option<Result<Option<DateTime<Utc>>, cron::error::Error>> {
        self.cron_schedule()
            .map(|schedule| schedule.map(|s| s.after(&after).next()))
    }

    /// Due time after a successful run that finished at `now`.
    ///
    /// `None` means the job has no further runs.
    pub fn next_run_after_success(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.job_type {
            JobType::OneOff => None,
            JobType::Interval => match self.interval.filter(|interval| !interval.is_zero()) {
                Some(interval) => Some(shift(self.last_run_at.unwrap_or(now), interval)),
                None => {
                    warn!("Interval job {} has no interval, completing it", self.id);
                    None
                }
            },
            JobType::Cron => match self.next_cron_run(now) {
                Some(Ok(next)) => next,
                Some(Err(e)) => {
                    warn!("Cron job {} has invalid expression: {}", self.id, e);
                    Some(shift(now, CRON_FALLBACK_DELAY))
                }
                None => {
                    warn!("Cron job {} has no expression", self.id);
                    Some(shift(now, CRON_FALLBACK_DELAY))
                }
            },
        }
    }

    /// Check that the job can be scheduled.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("job name is empty".to_string());
        }

        match self.job_type {
            JobType::OneOff => Ok(()),
            JobType::Interval => match self.interval {
                Some(interval) if !interval.is_zero() => Ok(()),
                Some(_) => Err("interval must be greater than zero".to_string()),
                None => Err("interval job requires an interval".to_string()),
            },
            JobType::Cron => match self.cron_schedule() {
                Some(Ok(_)) => Ok(()),
                Some(Err(e)) => Err(format!("invalid cron expression: {}", e)),
                None => Err("cron job requires a cron expression".to_string()),
            },
        }
    }
}

/// Serializes `Option<Duration>` as whole milliseconds.
mod interval_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(interval) => serializer.serialize_some(&(interval.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
