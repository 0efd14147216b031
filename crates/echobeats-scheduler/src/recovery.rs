//! Reconciliation of persisted jobs at startup.

use chrono::{DateTime, Utc};

use crate::job::{CRON_FALLBACK_DELAY, JobStatus, JobType, ScheduledJob, shift};

/// Summary of one recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Readable records found in the store.
    pub loaded: usize,
    /// Jobs inserted into the scheduler.
    pub recovered: usize,
    /// Completed or failed jobs left on disk only.
    pub skipped_terminal: usize,
    /// Jobs interrupted mid-run and reset to pending.
    pub reset_running: usize,
    /// Overdue jobs given a new `next_run_at`.
    pub rescheduled: usize,
    /// Jobs already present in memory and left untouched.
    pub already_loaded: usize,
    /// Jobs left out because their reconciled state could not be written back.
    pub unpersisted: usize,
}

/// What reconciliation changed on a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Reconciliation {
    pub reset_running: bool,
    pub rescheduled: bool,
}

impl Reconciliation {
    pub fn changed(&self) -> bool {
        self.reset_running || self.rescheduled
    }
}

/// Bring a non-terminal persisted job back into a dispatchable state.
///
/// Running jobs were interrupted by the previous exit and go back to
/// pending. Overdue pending jobs get a fresh due time. Paused jobs keep
/// their `next_run_at` so resuming does not move it.
pub(crate) fn reconcile(job: &mut ScheduledJob, now: DateTime<Utc>) -> Reconciliation {
    let mut outcome = Reconciliation::default();

    if job.status == JobStatus::Running {
        job.status = JobStatus::Pending;
        outcome.reset_running = true;
    }

    if job.status == JobStatus::Pending && job.next_run_at < now {
        job.next_run_at = recovered_next_run(job, now);
        outcome.rescheduled = true;
    }

    if outcome.changed() {
        job.touch();
    }
    outcome
}

fn recovered_next_run(job: &ScheduledJob, now: DateTime<Utc>) -> DateTime<Utc> {
    match job.job_type {
        JobType::Interval => shift(now, job.interval.unwrap_or_default()),
        JobType::Cron => match job.next_cron_run(now) {
            Some(Ok(Some(next))) => next,
            _ => shift(now, CRON_FALLBACK_DELAY),
        },
        JobType::OneOff => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn overdue(job: ScheduledJob, now: DateTime<Utc>) -> ScheduledJob {
        job.with_next_run_at(now - chrono::Duration::minutes(10))
    }

    #[test]
    fn test_running_reset_to_pending() {
        let now = Utc::now();
        let mut job = ScheduledJob::one_off("interrupted")
            .with_next_run_at(now + chrono::Duration::hours(1));
        job.status = JobStatus::Running;

        let outcome = reconcile(&mut job, now);
        assert!(outcome.reset_running);
        assert!(!outcome.rescheduled);
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_overdue_interval_rescheduled() {
        let now = Utc::now();
        let mut job = overdue(ScheduledJob::interval("beat", Duration::from_secs(30)), now);

        let outcome = reconcile(&mut job, now);
        assert!(outcome.rescheduled);
        assert_eq!(job.next_run_at, now + chrono::Duration::seconds(30));
    }

    #[test]
    fn test_overdue_one_off_runs_now() {
        let now = Utc::now();
        let mut job = overdue(ScheduledJob::one_off("once"), now);

        reconcile(&mut job, now);
        assert_eq!(job.next_run_at, now);
    }

    #[test]
    fn test_overdue_cron_uses_next_occurrence() {
        let now = Utc::now();
        let mut job = overdue(ScheduledJob::cron("minutely", "0 * * * * *"), now);

        reconcile(&mut job, now);
        assert!(job.next_run_at > now);
        assert!(job.next_run_at <= now + chrono::Duration::seconds(60));
    }

    #[test]
    fn test_unparseable_cron_gets_placeholder() {
        let now = Utc::now();
        let mut job = overdue(ScheduledJob::cron("broken", "every tuesday"), now);

        reconcile(&mut job, now);
        assert_eq!(job.next_run_at, now + chrono::Duration::hours(1));
    }

    #[test]
    fn test_paused_keeps_next_run() {
        let now = Utc::now();
        let mut job = overdue(ScheduledJob::interval("paused", Duration::from_secs(5)), now);
        job.status = JobStatus::Paused;
        let before = job.next_run_at;

        let outcome = reconcile(&mut job, now);
        assert!(!outcome.changed());
        assert_eq!(job.status, JobStatus::Paused);
        assert_eq!(job.next_run_at, before);
    }

    #[test]
    fn test_future_pending_untouched() {
        let now = Utc::now();
        let next = now + chrono::Duration::minutes(5);
        let mut job = ScheduledJob::one_off("later").with_next_run_at(next);

        assert!(!reconcile(&mut job, now).changed());
        assert_eq!(job.next_run_at, next);
    }
}
