//! Job executors and the context-name registry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ExecutionError;
use crate::job::ScheduledJob;

/// Per-execution context handed to executors.
///
/// The token is cancelled when the execution timeout elapses. Stopping the
/// scheduler does not cancel it.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    token: CancellationToken,
    deadline: Instant,
    attempt: u32,
}

impl ExecutionContext {
    /// Create a context that expires after `timeout`.
    ///
    /// A timeout past what `Instant` can represent is clamped to about
    /// thirty years.
    pub fn new(timeout: Duration, attempt: u32) -> Self {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30));
        Self {
            token: CancellationToken::new(),
            deadline,
            attempt,
        }
    }

    /// Cancellation token for cooperative shutdown.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Check if the execution was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the execution is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Point in time at which the execution times out.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// 1-based attempt number (the job's `run_count` after this run).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

/// Job executor trait.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Execute a job.
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        job: &ScheduledJob,
    ) -> Result<(), ExecutionError>;
}

/// Adapts an async closure into a [`JobExecutor`].
pub struct FnExecutor<F> {
    func: F,
}

impl<F, Fut> FnExecutor<F>
where
    F: Fn(ExecutionContext, ScheduledJob) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ExecutionError>> + Send,
{
    /// Wrap a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> JobExecutor for FnExecutor<F>
where
    F: Fn(ExecutionContext, ScheduledJob) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ExecutionError>> + Send,
{
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        job: &ScheduledJob,
    ) -> Result<(), ExecutionError> {
        (self.func)(ctx.clone(), job.clone()).await
    }
}

/// Fallback executor for jobs whose context has no registration.
pub struct DefaultExecutor;

#[async_trait]
impl JobExecutor for DefaultExecutor {
    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        job: &ScheduledJob,
    ) -> Result<(), ExecutionError> {
        info!("Executing job: {} ({})", job.name, job.id);
        Ok(())
    }
}

/// Maps job contexts to executors.
pub struct ExecutorRegistry {
    executors: DashMap<String, Arc<dyn JobExecutor>>,
    fallback: Arc<dyn JobExecutor>,
}

impl ExecutorRegistry {
    /// Create a registry using [`DefaultExecutor`] as fallback.
    pub fn new() -> Self {
        Self::with_fallback(Arc::new(DefaultExecutor))
    }

    /// Create a registry with a custom fallback.
    pub fn with_fallback(fallback: Arc<dyn JobExecutor>) -> Self {
        Self {
            executors: DashMap::new(),
            fallback,
        }
    }

    /// Register an executor, replacing any previous one for the context.
    pub fn register(&self, context: impl Into<String>, executor: Arc<dyn JobExecutor>) {
        self.executors.insert(context.into(), executor);
    }

    /// Check if a context has a registration.
    pub fn contains(&self, context: &str) -> bool {
        self.executors.contains_key(context)
    }

    /// Registered context names.
    pub fn contexts(&self) -> Vec<String> {
        let mut contexts: Vec<String> = self.executors.iter().map(|e| e.key().clone()).collect();
        contexts.sort();
        contexts
    }

    /// Executor for a context, or the fallback.
    pub fn resolve(&self, context: &str) -> Arc<dyn JobExecutor> {
        self.executors
            .get(context)
            .map(|e| Arc::clone(e.value()))
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
