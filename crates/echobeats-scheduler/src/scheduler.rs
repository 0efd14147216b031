//! Persistent job scheduler.
//!
//! The scheduler keeps every non-terminal job in an in-memory table that
//! mirrors the [`JobStore`]. A dispatch loop wakes every tick and flips due
//! jobs to running. One dispatcher task per tick takes concurrency permits
//! in priority order and spawns an execution task for each job. Executions
//! work on a private copy of the job and swap the settled copy back into the
//! table, persisting it before the job can be dispatched again. A result is
//! only applied to the job it was started for: a job deleted and scheduled
//! again under the same id has a new `created_at` and keeps its own state.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{ExecutionError, SchedulerError};
use crate::event::{FnListener, JobEvent, JobEventKind, JobEventListener, ListenerRegistry};
use crate::executor::{ExecutionContext, ExecutorRegistry, FnExecutor, JobExecutor};
use crate::job::{JobStatus, JobType, ScheduledJob, shift};
use crate::recovery::{RecoveryReport, reconcile};
use crate::store::{FileJobStore, JobStore, validate_job_id};

/// A job picked by a tick, identified by id and creation time.
struct DueJob {
    id: String,
    priority: i32,
    context: String,
    generation: DateTime<Utc>,
}

/// Removes a job from the in-flight set when an execution ends.
struct InFlight<'a> {
    set: &'a DashSet<String>,
    id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

/// Persistent, recoverable, retrying job scheduler.
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn JobStore>,
    jobs: RwLock<HashMap<String, ScheduledJob>>,
    /// Jobs with an execution task alive.
    in_flight: DashSet<String>,
    executors: ExecutorRegistry,
    listeners: ListenerRegistry,
    /// Serializes table mutations that must reach the store in order.
    persist: tokio::sync::Mutex<()>,
    permits: Option<Arc<Semaphore>>,
    shutdown: Mutex<Option<CancellationToken>>,
}

impl Scheduler {
    /// Create a scheduler over an existing store.
    pub fn new(config: SchedulerConfig, store: Arc<dyn JobStore>) -> Self {
        let permits = match config.max_concurrent_jobs {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        let listeners = ListenerRegistry::new(config.listener_queue_capacity);

        Self {
            config,
            store,
            jobs: RwLock::new(HashMap::new()),
            in_flight: DashSet::new(),
            executors: ExecutorRegistry::new(),
            listeners,
            persist: tokio::sync::Mutex::new(()),
            permits,
            shutdown: Mutex::new(None),
        }
    }

    /// Create a scheduler backed by a [`FileJobStore`] at `config.store_path`.
    pub async fn open(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let store = FileJobStore::new(&config.store_path).await?;
        Ok(Self::new(config, Arc::new(store)))
    }

    /// Get the configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Get the executor registry.
    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    /// Register an executor for a job context.
    pub fn register_executor(&self, context: impl Into<String>, executor: Arc<dyn JobExecutor>) {
        let context = context.into();
        debug!("Registered executor for context '{}'", context);
        self.executors.register(context, executor);
    }

    /// Register an async closure as the executor for a job context.
    pub fn register_executor_fn<F, Fut>(&self, context: impl Into<String>, func: F)
    where
        F: Fn(ExecutionContext, ScheduledJob) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), ExecutionError>> + Send + 'static,
    {
        self.register_executor(context, Arc::new(FnExecutor::new(func)));
    }

    /// Add a lifecycle event listener.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn add_listener(&self, listener: Arc<dyn JobEventListener>) -> usize {
        self.listeners.add(listener)
    }

    /// Add a closure as a lifecycle event listener.
    pub fn add_listener_fn<F>(&self, func: F) -> usize
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.add_listener(Arc::new(FnListener::new(func)))
    }

    /// Get the listener registry.
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Recover persisted jobs and start the dispatch loop.
    pub async fn start(self: &Arc<Self>) -> Result<RecoveryReport, SchedulerError> {
        let token = {
            let mut shutdown = self.shutdown.lock();
            if shutdown.is_some() {
                return Err(SchedulerError::AlreadyRunning);
            }
            let token = CancellationToken::new();
            *shutdown = Some(token.clone());
            token
        };

        let report = match self.recover_jobs().await {
            Ok(report) => report,
            Err(e) => {
                self.shutdown.lock().take();
                return Err(e);
            }
        };

        let this = Arc::clone(self);
        tokio::spawn(this.run_loop(token));

        info!(
            "Scheduler started (tick={}ms, {} jobs recovered)",
            self.config.tick_interval().as_millis(),
            report.recovered
        );
        Ok(report)
    }

    /// Stop the dispatch loop. Running executions are left to finish.
    pub fn stop(&self) -> Result<(), SchedulerError> {
        let token = self.shutdown.lock().take().ok_or(SchedulerError::NotRunning)?;
        token.cancel();
        info!("Scheduler stopped");
        Ok(())
    }

    /// Check if the dispatch loop is running.
    pub fn is_running(&self) -> bool {
        self.shutdown.lock().is_some()
    }

    /// Load persisted jobs into memory.
    ///
    /// Terminal jobs stay on disk only. Jobs already in memory are left
    /// alone, so calling this repeatedly never duplicates or rewinds a job.
    pub async fn recover_jobs(&self) -> Result<RecoveryReport, SchedulerError> {
        let persisted = self.store.load_all().await?;
        let mut report = RecoveryReport {
            loaded: persisted.len(),
            ..Default::default()
        };
        let now = Utc::now();

        let _guard = self.persist.lock().await;
        for mut job in persisted {
            if job.status.is_terminal() {
                report.skipped_terminal += 1;
                continue;
            }
            if self.jobs.read().contains_key(&job.id) {
                report.already_loaded += 1;
                continue;
            }

            let outcome = reconcile(&mut job, now);
            if outcome.changed() {
                if let Err(e) = self.store.update(&job).await {
                    warn!("Skipping job {}, recovered state not persisted: {}", job.id, e);
                    report.unpersisted += 1;
                    continue;
                }
            }
            if outcome.reset_running {
                report.reset_running += 1;
                debug!("Job {} was interrupted, reset to pending", job.id);
            }
            if outcome.rescheduled {
                report.rescheduled += 1;
            }

            self.jobs.write().insert(job.id.clone(), job);
            report.recovered += 1;
        }

        info!(
            "Recovered {} jobs from persistent store \
             ({} reset, {} rescheduled, {} terminal skipped, {} unpersisted)",
            report.recovered,
            report.reset_running,
            report.rescheduled,
            report.skipped_terminal,
            report.unpersisted
        );
        Ok(report)
    }

    async fn run_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Dispatch loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let dispatched = self.tick();
                    if dispatched > 0 {
                        debug!("Scheduler tick: {} jobs due", dispatched);
                    }
                }
            }
        }
    }

    /// Dispatch every due job. Returns how many were dispatched.
    pub(crate) fn tick(self: &Arc<Self>) -> usize {
        let now = Utc::now();

        let mut due: Vec<DueJob> = {
            let mut jobs = self.jobs.write();
            jobs.values_mut()
                .filter(|job| job.is_due(now) && !self.in_flight.contains(&job.id))
                .map(|job| {
                    job.status = JobStatus::Running;
                    self.in_flight.insert(job.id.clone());
                    DueJob {
                        id: job.id.clone(),
                        priority: job.priority,
                        context: job.context.clone(),
                        generation: job.created_at,
                    }
                })
                .collect()
        };

        let count = due.len();
        if count > 0 {
            due.sort_by(|a, b| b.priority.cmp(&a.priority));
            tokio::spawn(Arc::clone(self).dispatch(due));
        }
        count
    }

    /// Hand out permits in priority order, then spawn each execution.
    async fn dispatch(self: Arc<Self>, due: Vec<DueJob>) {
        for job in due {
            let permit = match &self.permits {
                Some(permits) => match Arc::clone(permits).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        self.release_unstarted(&job.id);
                        continue;
                    }
                },
                None => None,
            };

            let span = info_span!("job", id = %job.id, context = %job.context);
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.execute_job(job, permit).await }.instrument(span));
        }
    }

    /// Put a job that was marked running but never started back to pending.
    fn release_unstarted(&self, id: &str) {
        if let Some(job) = self.jobs.write().get_mut(id) {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Pending;
            }
        }
        self.in_flight.remove(id);
    }

    // ========================================================================
    // Execution
    // ========================================================================

    async fn execute_job(self: Arc<Self>, due: DueJob, _permit: Option<OwnedSemaphorePermit>) {
        let _in_flight = InFlight {
            set: &self.in_flight,
            id: due.id.clone(),
        };

        let Some(job) = self.begin_run(&due).await else {
            return;
        };
        self.listeners.publish(JobEvent::new(JobEventKind::Started, job.clone()));

        let executor = self.executors.resolve(&job.context);
        let timeout = self.config.execution_timeout();
        let ctx = ExecutionContext::new(timeout, job.run_count + 1);

        let run = AssertUnwindSafe(executor.execute(&ctx, &job)).catch_unwind();
        let result = match tokio::time::timeout(timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ExecutionError::failed("executor panicked")),
            Err(_) => {
                ctx.cancel();
                Err(ExecutionError::TimedOut(timeout))
            }
        };

        let event = self.settle(job, result, Utc::now());
        self.commit_run(event).await;
    }

    /// Stamp the run start and persist the running snapshot.
    ///
    /// Returns `None` if the job was paused, deleted or replaced while
    /// queued, or if the snapshot could not be persisted. A persist failure
    /// counts as a failed attempt.
    async fn begin_run(&self, due: &DueJob) -> Option<ScheduledJob> {
        let _guard = self.persist.lock().await;

        let mut snapshot = {
            let jobs = self.jobs.read();
            let job = jobs.get(&due.id)?;
            if job.created_at != due.generation {
                debug!("Job {} was replaced before it started, skipping run", due.id);
                return None;
            }
            if job.status != JobStatus::Running {
                debug!("Job {} is {} before it started, skipping run", due.id, job.status);
                return None;
            }
            job.clone()
        };
        snapshot.last_run_at = Some(Utc::now());
        snapshot.touch();

        if let Err(e) = self.store.update(&snapshot).await {
            error!("Failed to persist job {} before running: {}", due.id, e);
            let message = format!("failed to persist run start: {}", e);

            let failed = self.jobs.write().get_mut(&due.id).map(|job| {
                self.record_failure(job, &message, Utc::now());
                job.clone()
            });
            if let Some(job) = failed {
                self.listeners
                    .publish(JobEvent::new(JobEventKind::Failed, job).with_error(message));
            }
            return None;
        }

        if let Some(job) = self.jobs.write().get_mut(&due.id) {
            *job = snapshot.clone();
        }
        Some(snapshot)
    }

    /// Apply an execution outcome to a job, producing the settled snapshot.
    fn settle(
        &self,
        mut job: ScheduledJob,
        result: Result<(), ExecutionError>,
        now: DateTime<Utc>,
    ) -> JobEvent {
        job.run_count += 1;
        job.touch();

        match result {
            Ok(()) => {
                job.last_error = None;
                job.error_count = 0;

                let next = if job.runs_exhausted() || job.job_type == JobType::OneOff {
                    None
                } else {
                    job.next_run_after_success(now)
                };
                match next {
                    Some(next_run_at) => {
                        job.status = JobStatus::Pending;
                        job.next_run_at = next_run_at;
                    }
                    None => {
                        job.status = JobStatus::Completed;
                        info!("Job {} completed after {} runs", job.id, job.run_count);
                    }
                }

                JobEvent::new(JobEventKind::Completed, job)
            }
            Err(e) => {
                let message = e.to_string();
                self.record_failure(&mut job, &message, now);
                JobEvent::new(JobEventKind::Failed, job).with_error(message)
            }
        }
    }

    /// Count a failed attempt: retry with backoff, or fail at the limit.
    fn record_failure(&self, job: &mut ScheduledJob, message: &str, now: DateTime<Utc>) {
        job.last_error = Some(message.to_string());
        job.error_count += 1;
        job.touch();

        if job.error_count >= self.config.max_consecutive_failures.max(1) {
            job.status = JobStatus::Failed;
            warn!(
                "Job {} failed permanently after {} errors: {}",
                job.id, job.error_count, message
            );
        } else {
            job.status = JobStatus::Pending;
            let backoff = self
                .config
                .retry_backoff()
                .checked_mul(job.error_count)
                .unwrap_or(Duration::MAX);
            job.next_run_at = shift(now, backoff);
            warn!(
                "Job {} failed (attempt {}), retrying at {}: {}",
                job.id,
                job.error_count,
                job.next_run_at.to_rfc3339(),
                message
            );
        }
    }

    /// Swap a settled snapshot into the table and persist it.
    async fn commit_run(&self, mut event: JobEvent) {
        let _guard = self.persist.lock().await;

        {
            let mut jobs = self.jobs.write();
            let current = match jobs.get_mut(&event.job.id) {
                Some(current) if current.created_at == event.job.created_at => current,
                _ => {
                    debug!(
                        "Job {} was deleted or replaced during execution, dropping result",
                        event.job.id
                    );
                    return;
                }
            };
            if current.status == JobStatus::Paused && !event.job.status.is_terminal() {
                event.job.status = JobStatus::Paused;
            }
            *current = event.job.clone();
        }

        if let Err(e) = self.store.update(&event.job).await {
            error!("Failed to persist job {}: {}", event.job.id, e);
        }
        drop(_guard);

        self.listeners.publish(event);
    }

    // ========================================================================
    // Job API
    // ========================================================================

    /// Persist and schedule a new job. Returns its ID.
    pub async fn schedule_job(&self, mut job: ScheduledJob) -> Result<String, SchedulerError> {
        job.validate().map_err(SchedulerError::InvalidJob)?;

        if job.id.is_empty() {
            job.id = format!("job-{}", Uuid::new_v4());
        }
        validate_job_id(&job.id).map_err(|e| SchedulerError::InvalidJob(e.to_string()))?;

        let now = Utc::now();
        job.created_at = now;
        job.updated_at = now;
        job.status = JobStatus::Pending;

        let _guard = self.persist.lock().await;
        if self.jobs.read().contains_key(&job.id) {
            return Err(SchedulerError::JobExists(job.id));
        }

        self.store.save(&job).await?;
        self.jobs.write().insert(job.id.clone(), job.clone());
        drop(_guard);

        info!("Scheduled job '{}' ({}, {})", job.name, job.id, job.job_type);
        let id = job.id.clone();
        self.listeners.publish(JobEvent::new(JobEventKind::Scheduled, job));
        Ok(id)
    }

    /// Pause a pending or running job.
    ///
    /// A running job finishes its current execution and then stays paused.
    pub async fn pause_job(&self, id: &str) -> Result<(), SchedulerError> {
        let snapshot = self
            .transition(id, |job| match job.status {
                JobStatus::Pending | JobStatus::Running => {
                    job.status = JobStatus::Paused;
                    Ok(true)
                }
                JobStatus::Paused => Ok(false),
                status => Err(status),
            })
            .await?;

        if let Some(job) = snapshot {
            info!("Paused job {}", id);
            self.listeners.publish(JobEvent::new(JobEventKind::Paused, job));
        }
        Ok(())
    }

    /// Resume a paused job without touching its `next_run_at`.
    pub async fn resume_job(&self, id: &str) -> Result<(), SchedulerError> {
        let snapshot = self
            .transition(id, |job| match job.status {
                JobStatus::Paused => {
                    job.status = JobStatus::Pending;
                    Ok(true)
                }
                status => Err(status),
            })
            .await?;

        if let Some(job) = snapshot {
            info!("Resumed job {}", id);
            self.listeners.publish(JobEvent::new(JobEventKind::Resumed, job));
        }
        Ok(())
    }

    /// Apply a status change in memory and persist it, rolling back on failure.
    ///
    /// `change` returns `Ok(false)` when there is nothing to do.
    async fn transition<F>(
        &self,
        id: &str,
        change: F,
    ) -> Result<Option<ScheduledJob>, SchedulerError>
    where
        F: FnOnce(&mut ScheduledJob) -> Result<bool, JobStatus>,
    {
        let _guard = self.persist.lock().await;

        let (previous, snapshot) = {
            let mut jobs = self.jobs.write();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?;
            let previous = job.clone();

            match change(job) {
                Ok(true) => {}
                Ok(false) => return Ok(None),
                Err(status) => {
                    return Err(SchedulerError::InvalidState {
                        id: id.to_string(),
                        status,
                    });
                }
            }
            job.touch();
            (previous, job.clone())
        };

        if let Err(e) = self.store.update(&snapshot).await {
            if let Some(job) = self.jobs.write().get_mut(id) {
                *job = previous;
            }
            return Err(e.into());
        }

        Ok(Some(snapshot))
    }

    /// Delete a job from the store and memory.
    ///
    /// Terminal jobs that only exist on disk can be deleted too.
    pub async fn delete_job(&self, id: &str) -> Result<(), SchedulerError> {
        if validate_job_id(id).is_err() {
            return Err(SchedulerError::JobNotFound(id.to_string()));
        }

        let _guard = self.persist.lock().await;

        let in_memory = self.jobs.read().get(id).cloned();
        let job = match in_memory {
            Some(job) => job,
            None => self
                .store
                .load(id)
                .await?
                .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))?,
        };

        self.store.delete(id).await?;
        self.jobs.write().remove(id);
        drop(_guard);

        info!("Deleted job {}", id);
        self.listeners.publish(JobEvent::new(JobEventKind::Deleted, job));
        Ok(())
    }

    /// Get a job snapshot, falling back to the store for jobs not in memory.
    pub async fn get_job(&self, id: &str) -> Result<ScheduledJob, SchedulerError> {
        let cached = self.jobs.read().get(id).cloned();
        if let Some(job) = cached {
            return Ok(job);
        }
        if validate_job_id(id).is_err() {
            return Err(SchedulerError::JobNotFound(id.to_string()));
        }

        self.store
            .load(id)
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))
    }

    /// Snapshots of every job in memory, highest priority first.
    pub fn get_all_jobs(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.next_run_at.cmp(&b.next_run_at))
        });
        jobs
    }

    /// Snapshots of every pending job, soonest first.
    pub fn get_pending_jobs(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = self
            .jobs
            .read()
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at));
        jobs
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
