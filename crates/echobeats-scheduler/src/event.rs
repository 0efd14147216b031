//! Job lifecycle events and listener fan-out.
//!
//! Every listener owns a bounded queue drained by its own task. Publishing
//! never waits: when a listener's queue is full the event is dropped for that
//! listener only. A panicking listener is logged and keeps receiving events.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, warn};

use crate::job::ScheduledJob;

/// Kind of lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobEventKind {
    Scheduled,
    Started,
    Completed,
    Failed,
    Paused,
    Resumed,
    Deleted,
}

impl fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobEventKind::Scheduled => "scheduled",
            JobEventKind::Started => "started",
            JobEventKind::Completed => "completed",
            JobEventKind::Failed => "failed",
            JobEventKind::Paused => "paused",
            JobEventKind::Resumed => "resumed",
            JobEventKind::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// A lifecycle event carrying a snapshot of the job.
///
/// For `Failed` events the snapshot status tells a retry (`Pending`) apart
/// from a terminal failure (`Failed`).
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job: ScheduledJob,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl JobEvent {
    /// Create an event stamped now.
    pub fn new(kind: JobEventKind, job: ScheduledJob) -> Self {
        Self {
            kind,
            job,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Attach an error message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Job event listener trait.
#[async_trait]
pub trait JobEventListener: Send + Sync {
    /// Called for every published event.
    async fn on_event(&self, event: &JobEvent);
}

/// Adapts a synchronous closure into a [`JobEventListener`].
pub struct FnListener<F> {
    func: F,
}

impl<F> FnListener<F>
where
    F: Fn(&JobEvent) + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> JobEventListener for FnListener<F>
where
    F: Fn(&JobEvent) + Send + Sync,
{
    async fn on_event(&self, event: &JobEvent) {
        (self.func)(event)
    }
}

struct Subscriber {
    id: usize,
    sender: mpsc::Sender<Arc<JobEvent>>,
    dropped: AtomicU64,
}

/// Fan-out of lifecycle events to listeners.
pub struct ListenerRegistry {
    capacity: usize,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl ListenerRegistry {
    /// Create a registry whose listeners buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Add a listener and spawn its delivery task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn add(&self, listener: Arc<dyn JobEventListener>) -> usize {
        let (sender, mut receiver) = mpsc::channel::<Arc<JobEvent>>(self.capacity);

        let mut subscribers = self.subscribers.write();
        let id = subscribers.len();
        subscribers.push(Subscriber {
            id,
            sender,
            dropped: AtomicU64::new(0),
        });
        drop(subscribers);

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let delivery = AssertUnwindSafe(listener.on_event(&event)).catch_unwind();
                if delivery.await.is_err() {
                    error!(
                        "Listener {} panicked handling {} event for job {}",
                        id, event.kind, event.job.id
                    );
                }
            }
            debug!("Listener {} delivery task finished", id);
        });

        debug!("Added job event listener {}", id);
        id
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Check if no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Events dropped so far for a listener because its queue was full.
    pub fn dropped(&self, id: usize) -> u64 {
        self.subscribers
            .read()
            .get(id)
            .map(|s| s.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Publish an event to every listener without waiting.
    pub fn publish(&self, event: JobEvent) {
        let subscribers = self.subscribers.read();
        if subscribers.is_empty() {
            return;
        }

        let event = Arc::new(event);
        for subscriber in subscribers.iter() {
            match subscriber.sender.try_send(Arc::clone(&event)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    subscriber.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Listener {} queue full, dropping {} event for job {}",
                        subscriber.id, event.kind, event.job.id
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("Listener {} is gone, dropping {} event", subscriber.id, event.kind);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::{Notify, mpsc as test_mpsc};

    fn event(kind: JobEventKind) -> JobEvent {
        JobEvent::new(kind, ScheduledJob::one_off("test").with_id("job-1"))
    }

    #[tokio::test]
    async fn test_every_listener_receives_event() {
        let registry = ListenerRegistry::new(16);
        let (tx, mut rx) = test_mpsc::unbounded_channel();

        for _ in 0..2 {
            let tx = tx.clone();
            registry.add(Arc::new(FnListener::new(move |event: &JobEvent| {
                tx.send(event.kind).unwrap();
            })));
        }
        assert_eq!(registry.len(), 2);

        registry.publish(event(JobEventKind::Scheduled));

        for _ in 0..2 {
            let kind = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
            assert_eq!(kind, Some(JobEventKind::Scheduled));
        }
    }

    struct BlockedListener {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl JobEventListener for BlockedListener {
        async fn on_event(&self, _event: &JobEvent) {
            self.release.notified().await;
        }
    }

    #[tokio::test]
    async fn test_slow_listener_does_not_block_others() {
        let registry = ListenerRegistry::new(1);
        let release = Arc::new(Notify::new());
        let slow = registry.add(Arc::new(BlockedListener { release: release.clone() }));

        let (tx, mut rx) = test_mpsc::unbounded_channel();
        registry.add(Arc::new(FnListener::new(move |event: &JobEvent| {
            tx.send(event.kind).unwrap();
        })));

        for _ in 0..5 {
            registry.publish(event(JobEventKind::Started));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for _ in 0..5 {
            let kind = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
            assert_eq!(kind, Some(JobEventKind::Started));
        }
        assert!(registry.dropped(slow) >= 1);
        release.notify_waiters();
    }

    #[tokio::test]
    async fn test_panicking_listener_keeps_receiving() {
        let registry = ListenerRegistry::new(8);
        let (tx, mut rx) = test_mpsc::unbounded_channel();

        registry.add(Arc::new(FnListener::new(move |event: &JobEvent| {
            if event.kind == JobEventKind::Failed {
                panic!("listener bug");
            }
            tx.send(event.kind).unwrap();
        })));

        registry.publish(event(JobEventKind::Failed));
        registry.publish(event(JobEventKind::Completed));

        let kind = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(kind, Some(JobEventKind::Completed));
    }

    #[test]
    fn test_publish_without_listeners() {
        let registry = ListenerRegistry::new(4);
        assert!(registry.is_empty());
        registry.publish(event(JobEventKind::Deleted));
    }

    #[test]
    fn test_event_with_error() {
        let event = event(JobEventKind::Failed).with_error("boom");
        assert_eq!(event.error.as_deref(), Some("boom"));
        assert_eq!(event.kind.to_string(), "failed");
    }
}
