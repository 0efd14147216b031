//! Echobeats scheduler: the persistent scheduler preloaded with beat executors.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use echobeats_scheduler::job::shift;
use echobeats_scheduler::{
    ExecutionContext, ExecutionError, JobExecutor, ScheduledJob, Scheduler, SchedulerConfig,
    SchedulerError,
};

use crate::beat::BeatKind;
use crate::config::BeatsConfig;

/// The cognitive loop that beats drive.
///
/// Beats run without one; they are logged and succeed.
#[async_trait]
pub trait CognitiveLoop: Send + Sync {
    /// Handle one beat. An error counts as a failed run of the beat's job.
    async fn on_beat(
        &self,
        kind: BeatKind,
        ctx: &ExecutionContext,
        job: &ScheduledJob,
    ) -> Result<(), ExecutionError>;
}

type SharedLoop = Arc<RwLock<Option<Arc<dyn CognitiveLoop>>>>;

struct BeatExecutor {
    kind: BeatKind,
    cognitive_loop: SharedLoop,
}

#[async_trait]
impl JobExecutor for BeatExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        job: &ScheduledJob,
    ) -> Result<(), ExecutionError> {
        info!("Executing {}: {}", self.kind.display_name().to_lowercase(), job.id);

        let cognitive_loop = self.cognitive_loop.read().clone();
        match cognitive_loop {
            Some(cognitive_loop) => cognitive_loop.on_beat(self.kind, ctx, job).await,
            None => Ok(()),
        }
    }
}

/// Persistent scheduler with the five echobeats executors registered.
///
/// Derefs to the shared [`Scheduler`], so `start`, `stop` and the job API
/// are called on it directly.
pub struct EchobeatsScheduler {
    scheduler: Arc<Scheduler>,
    cognitive_loop: SharedLoop,
}

impl EchobeatsScheduler {
    /// Wrap a scheduler and register one executor per beat kind.
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let cognitive_loop: SharedLoop = Arc::new(RwLock::new(None));

        for kind in BeatKind::ALL {
            scheduler.register_executor(
                kind.context(),
                Arc::new(BeatExecutor {
                    kind,
                    cognitive_loop: cognitive_loop.clone(),
                }),
            );
        }

        Self {
            scheduler,
            cognitive_loop,
        }
    }

    /// Build on a file store at `config.store_path`.
    pub async fn open(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let scheduler = Scheduler::open(config).await?;
        Ok(Self::new(Arc::new(scheduler)))
    }

    /// Attach the cognitive loop that beats are forwarded to.
    pub fn set_cognitive_loop(&self, cognitive_loop: Arc<dyn CognitiveLoop>) {
        *self.cognitive_loop.write() = Some(cognitive_loop);
        debug!("Cognitive loop attached");
    }

    /// Get the underlying scheduler.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Schedule a recurring beat, first due one interval from now.
    pub async fn schedule_beat(
        &self,
        kind: BeatKind,
        interval: Duration,
    ) -> Result<String, SchedulerError> {
        let job = ScheduledJob::interval(kind.display_name(), interval)
            .with_context(kind.context())
            .with_priority(kind.default_priority())
            .with_payload(kind.default_payload())
            .with_next_run_at(shift(Utc::now(), interval));

        self.scheduler.schedule_job(job).await
    }

    pub async fn schedule_cognitive_beat(
        &self,
        interval: Duration,
    ) -> Result<String, SchedulerError> {
        self.schedule_beat(BeatKind::CognitiveBeat, interval).await
    }

    pub async fn schedule_knowledge_integration(
        &self,
        interval: Duration,
    ) -> Result<String, SchedulerError> {
        self.schedule_beat(BeatKind::KnowledgeIntegration, interval).await
    }

    pub async fn schedule_wisdom_cultivation(
        &self,
        interval: Duration,
    ) -> Result<String, SchedulerError> {
        self.schedule_beat(BeatKind::WisdomCultivation, interval).await
    }

    pub async fn schedule_dream_processing(
        &self,
        interval: Duration,
    ) -> Result<String, SchedulerError> {
        self.schedule_beat(BeatKind::DreamProcessing, interval).await
    }

    pub async fn schedule_interest_update(
        &self,
        interval: Duration,
    ) -> Result<String, SchedulerError> {
        self.schedule_beat(BeatKind::InterestUpdate, interval).await
    }

    /// Schedule every enabled beat that has no job in the scheduler yet.
    ///
    /// Call after recovery so restarts reuse persisted beats. Returns the IDs
    /// of newly scheduled jobs.
    pub async fn schedule_configured_beats(
        &self,
        config: &BeatsConfig,
    ) -> Result<Vec<String>, SchedulerError> {
        let existing: Vec<String> = self
            .scheduler
            .get_all_jobs()
            .into_iter()
            .map(|job| job.context)
            .collect();

        let mut scheduled = Vec::new();
        for (kind, interval) in config.enabled_beats() {
            if existing.iter().any(|context| context == kind.context()) {
                debug!("{} already scheduled, skipping", kind);
                continue;
            }
            scheduled.push(self.schedule_beat(kind, interval).await?);
        }

        info!("Scheduled {} configured beats", scheduled.len());
        Ok(scheduled)
    }
}

impl Deref for EchobeatsScheduler {
    type Target = Arc<Scheduler>;

    fn deref(&self) -> &Self::Target {
        &self.scheduler
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
