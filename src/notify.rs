// ============================================================================
// NOTIFICATION & DISPATCH
// ============================================================================
// Alert events leave the engine through a bounded queue:
// - `AlertDispatcher::try_dispatch` never blocks; a full queue drops the job
// - `DispatchWorker` invokes notifiers one at a time under a timeout
// - Notifier failures are logged and counted, never propagated
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flume::{Receiver as FlumeReceiver, Sender as FlumeSender, TrySendError};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::NotifierError;
use crate::types::{Severity, Timestamp};

// ----------------------------------------------------------------------------
// Alert Events
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertEventKind {
    /// The rule's breach outlasted its minimum duration
    Triggered,
    /// A previously triggered breach ended
    Resolved,
}

impl AlertEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertEventKind::Triggered => "triggered",
            AlertEventKind::Resolved => "resolved",
        }
    }
}

/// One state transition worth telling someone about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub kind: AlertEventKind,
    pub rule: String,
    pub metric: String,
    pub severity: Severity,
    pub threshold: f64,
    /// Value of the sample that caused the transition
    pub value: f64,
    pub unit: String,
    /// Breach span at the time of the transition
    pub elapsed: Duration,
    pub timestamp: Timestamp,
}

impl Display for AlertEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.kind {
            AlertEventKind::Triggered => write!(
                f,
                "ALERT [{}] {}: {} is {:.2}{} (threshold: {}) for {}s",
                self.severity,
                self.rule,
                self.metric,
                self.value,
                self.unit,
                self.threshold,
                self.elapsed.as_secs()
            ),
            AlertEventKind::Resolved => write!(
                f,
                "RESOLVED [{}] {}: {} back to {:.2}{} after {}s",
                self.severity,
                self.rule,
                self.metric,
                self.value,
                self.unit,
                self.elapsed.as_secs()
            ),
        }
    }
}

// ----------------------------------------------------------------------------
// Notifier Capability
// ----------------------------------------------------------------------------

/// A destination for alert events, referenced from rules by name.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifierError>;
}

/// Writes each event as a structured `tracing` event.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub const NAME: &'static str = "log";
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifierError> {
        macro_rules! emit {
            ($level:ident) => {
                $level!(
                    target: "pulse::notify",
                    id = %event.id,
                    kind = event.kind.as_str(),
                    rule = %event.rule,
                    metric = %event.metric,
                    severity = %event.severity,
                    value = event.value,
                    threshold = event.threshold,
                    elapsed_secs = event.elapsed.as_secs(),
                    "{}", event
                )
            };
        }

        match (event.kind, event.severity) {
            (AlertEventKind::Resolved, _) => emit!(info),
            (_, Severity::Critical) | (_, Severity::High) => emit!(error),
            (_, Severity::Medium) => emit!(warn),
            _ => emit!(info),
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Dispatch Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct DispatchStatsTracker {
    queued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    dropped: AtomicU64,
}

/// Counters for the dispatch queue and worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub queued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub dropped: u64,
    pub pending: usize,
}

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

struct DispatchJob {
    notifier: Arc<dyn Notifier>,
    event: AlertEvent,
}

/// Producer side of the bounded notification queue.
pub struct AlertDispatcher {
    sender: FlumeSender<DispatchJob>,
    receiver: FlumeReceiver<DispatchJob>,
    capacity: usize,
    notifier_timeout: Duration,
    stats: Arc<DispatchStatsTracker>,
}

impl AlertDispatcher {
    pub fn new(capacity: usize, notifier_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = flume::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
            notifier_timeout,
            stats: Arc::new(DispatchStatsTracker::default()),
        }
    }

    /// Enqueue an event for `notifier` without waiting.
    pub fn try_dispatch(
        &self,
        notifier: Arc<dyn Notifier>,
        event: AlertEvent,
    ) -> Result<(), NotifierError> {
        match self.sender.try_send(DispatchJob { notifier, event }) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, AtomicOrdering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                self.stats.dropped.fetch_add(1, AtomicOrdering::Relaxed);
                warn!(
                    target: "pulse::notify",
                    rule = %job.event.rule,
                    notifier = job.notifier.name(),
                    capacity = self.capacity,
                    "Dispatch queue full, alert event dropped"
                );
                Err(NotifierError::QueueFull {
                    rule: job.event.rule,
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Disconnected(job)) => {
                self.stats.dropped.fetch_add(1, AtomicOrdering::Relaxed);
                Err(NotifierError::failed(
                    job.notifier.name(),
                    "dispatch queue disconnected",
                ))
            }
        }
    }

    /// A worker draining this dispatcher's queue. Several may run at once.
    pub fn worker(&self) -> DispatchWorker {
        DispatchWorker {
            receiver: self.receiver.clone(),
            notifier_timeout: self.notifier_timeout,
            stats: self.stats.clone(),
        }
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.sender.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            queued: self.stats.queued.load(AtomicOrdering::Relaxed),
            delivered: self.stats.delivered.load(AtomicOrdering::Relaxed),
            failed: self.stats.failed.load(AtomicOrdering::Relaxed),
            timed_out: self.stats.timed_out.load(AtomicOrdering::Relaxed),
            dropped: self.stats.dropped.load(AtomicOrdering::Relaxed),
            pending: self.pending(),
        }
    }
}

impl fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("capacity", &self.capacity)
            .field("pending", &self.pending())
            .field("notifier_timeout", &self.notifier_timeout)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Dispatch Worker
// ----------------------------------------------------------------------------

/// Consumer side of the queue.
pub struct DispatchWorker {
    receiver: FlumeReceiver<DispatchJob>,
    notifier_timeout: Duration,
    stats: Arc<DispatchStatsTracker>,
}

impl DispatchWorker {
    /// Deliver queued events until `cancel` fires, then flush whatever is
    /// still queued and return.
    pub async fn run(self, cancel: CancellationToken) {
        debug!(target: "pulse::notify", "Dispatch worker started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                job = self.receiver.recv_async() => match job {
                    Ok(job) => self.deliver(job).await,
                    Err(_) => break,
                },
            }
        }

        let flushed = self.drain_pending().await;
        debug!(target: "pulse::notify", flushed, "Dispatch worker stopped");
    }

    /// Deliver everything currently queued. Returns the number of jobs handled.
    pub async fn drain_pending(&self) -> usize {
        let mut handled = 0;
        while let Ok(job) = self.receiver.try_recv() {
            self.deliver(job).await;
            handled += 1;
        }
        handled
    }

    async fn deliver(&self, job: DispatchJob) {
        let DispatchJob { notifier, event } = job;

        match tokio::time::timeout(self.notifier_timeout, notifier.notify(&event)).await {
            Ok(Ok(())) => {
                self.stats.delivered.fetch_add(1, AtomicOrdering::Relaxed);
            }
            Ok(Err(e)) => {
                self.stats.failed.fetch_add(1, AtomicOrdering::Relaxed);
                warn!(
                    target: "pulse::notify",
                    notifier = notifier.name(),
                    rule = %event.rule,
                    error = %e,
                    "Notifier failed"
                );
            }
            Err(_) => {
                self.stats.timed_out.fetch_add(1, AtomicOrdering::Relaxed);
                let e = NotifierError::Timeout {
                    notifier: notifier.name().to_string(),
                    timeout: self.notifier_timeout,
                };
                warn!(
                    target: "pulse::notify",
                    notifier = notifier.name(),
                    rule = %event.rule,
                    error = %e,
                    "Notifier timed out"
                );
            }
        }
    }
}

impl fmt::Debug for DispatchWorker {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchWorker")
            .field("notifier_timeout", &self.notifier_timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TEST SUPPORT
// ============================================================================


// ============================================================================
// TESTS
// ============================================================================
