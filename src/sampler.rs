// ============================================================================
// SAMPLER
// ============================================================================
// Owns the single background sampling loop:
// - Reads every probe concurrently, each bounded by the sampling interval
// - Failed metrics are logged and skipped, the loop never exits on error
// - Cadence is kept with `MissedTickBehavior::Delay`
// - Cancellation is cooperative; `stop` waits for the loop to exit
// - A loop started while another is exiting waits for it before sampling
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::SampleBuffer;
use crate::error::{ProbeReadError, PulseError, PulseResult};
use crate::probe::Probe;
use crate::types::{AtomicTimestamp, MetricSample, Timestamp};

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Counters for the sampling loop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SamplerStats {
    /// Completed loop iterations
    pub cycles: u64,
    /// Samples pushed into the buffer by the loop
    pub samples_collected: u64,
    /// Metric reads that failed (including timeouts)
    pub probe_errors: u64,
    /// Completion time of the most recent cycle
    pub last_cycle: Option<Timestamp>,
    /// Duration of the most recent cycle in microseconds
    pub last_cycle_us: u64,
}

#[derive(Debug, Default)]
struct SamplerStatsTracker {
    cycles: AtomicU64,
    samples_collected: AtomicU64,
    probe_errors: AtomicU64,
    last_cycle: AtomicTimestamp,
    last_cycle_us: AtomicU64,
}

impl SamplerStatsTracker {
    fn record_cycle(&self, samples: usize, errors: usize, took: Duration) {
        self.cycles.fetch_add(1, AtomicOrdering::Relaxed);
        self.samples_collected
            .fetch_add(samples as u64, AtomicOrdering::Relaxed);
        self.probe_errors
            .fetch_add(errors as u64, AtomicOrdering::Relaxed);
        self.last_cycle_us
            .store(took.as_micros() as u64, AtomicOrdering::Relaxed);
        self.last_cycle.store(Timestamp::now(), AtomicOrdering::Release);
    }

    fn snapshot(&self) -> SamplerStats {
        let cycles = self.cycles.load(AtomicOrdering::Relaxed);
        SamplerStats {
            cycles,
            samples_collected: self.samples_collected.load(AtomicOrdering::Relaxed),
            probe_errors: self.probe_errors.load(AtomicOrdering::Relaxed),
            last_cycle: (cycles > 0).then(|| self.last_cycle.load(AtomicOrdering::Acquire)),
            last_cycle_us: self.last_cycle_us.load(AtomicOrdering::Relaxed),
        }
    }
}

// ----------------------------------------------------------------------------
// Sampler
// ----------------------------------------------------------------------------

/// Periodically reads a fixed set of probes into a shared buffer.
pub struct Sampler {
    shared: Arc<SamplerShared>,
    interval: Duration,
    task: Mutex<Option<SamplerTask>>,
}

struct SamplerShared {
    buffer: Arc<SampleBuffer>,
    probes: Vec<Arc<dyn Probe>>,
    probe_timeout: Duration,
    /// Held by whichever loop is currently sampling
    loop_slot: tokio::sync::Mutex<()>,
    stats: SamplerStatsTracker,
}

struct SamplerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SamplerTask {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

/// Result of reading every probe once.
struct Collection {
    samples: Vec<MetricSample>,
    errors: usize,
}

impl Sampler {
    /// Create a sampler. Each probe read is bounded by `interval`.
    pub fn new(buffer: Arc<SampleBuffer>, probes: Vec<Arc<dyn Probe>>, interval: Duration) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        Self {
            shared: Arc::new(SamplerShared {
                buffer,
                probes,
                probe_timeout: interval,
                loop_slot: tokio::sync::Mutex::new(()),
                stats: SamplerStatsTracker::default(),
            }),
            interval,
            task: Mutex::new(None),
        }
    }

    /// Read every probe once and return the successful samples.
    /// Does not touch the buffer or the loop statistics.
    pub async fn collect_once(&self) -> Vec<MetricSample> {
        self.shared.collect().await.samples
    }

    /// Spawn the background loop on the current tokio runtime.
    ///
    /// Returns `Ok(false)` without spawning if the loop is already running.
    pub fn start(&self) -> PulseResult<bool> {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(SamplerTask::is_live) {
            return Ok(false);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PulseError::Internal(format!("Sampler needs a tokio runtime: {}", e)))?;

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(run_loop(
            self.shared.clone(),
            self.interval,
            cancel.clone(),
        ));
        *task = Some(SamplerTask { cancel, handle });

        info!(
            target: "pulse::sampler",
            interval_ms = self.interval.as_millis() as u64,
            probes = self.shared.probes.len(),
            "Sampler started"
        );
        Ok(true)
    }

    /// Signal the loop to stop and wait until it has exited.
    /// Safe to call when not running.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        let Some(SamplerTask { cancel, handle }) = task else {
            return;
        };

        cancel.cancel();
        if let Err(e) = handle.await {
            warn!(target: "pulse::sampler", error = %e, "Sampler loop ended abnormally");
        }

        info!(target: "pulse::sampler", "Sampler stopped");
    }

    /// True while this sampler owns a loop that has not exited.
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(SamplerTask::is_live)
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.shared.buffer
    }

    pub fn stats(&self) -> SamplerStats {
        self.shared.stats.snapshot()
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let probes: Vec<&str> = self.shared.probes.iter().map(|p| p.name()).collect();
        f.debug_struct("Sampler")
            .field("interval", &self.interval)
            .field("probes", &probes)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

impl SamplerShared {
    async fn collect(&self) -> Collection {
        let timeout_ms = self.probe_timeout.as_millis() as u64;
        let reads = self.probes.iter().map(|probe| async move {
            match timeout(self.probe_timeout, probe.read()).await {
                Ok(readings) => readings,
                Err(_) => vec![Err(ProbeReadError::Timeout {
                    probe: probe.name().to_string(),
                    timeout_ms,
                })],
            }
        });

        let mut collection = Collection {
            samples: Vec::new(),
            errors: 0,
        };
        for readings in join_all(reads).await {
            for reading in readings {
                match reading {
                    Ok(sample) => collection.samples.push(sample),
                    Err(ProbeReadError::NoData { metric }) => {
                        debug!(target: "pulse::sampler", metric = %metric, "No data this cycle");
                    }
                    Err(e) => {
                        collection.errors += 1;
                        warn!(target: "pulse::sampler", error = %e, "Probe read failed, metric skipped");
                    }
                }
            }
        }
        collection
    }
}

async fn run_loop(shared: Arc<SamplerShared>, period: Duration, cancel: CancellationToken) {
    let _slot = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        slot = shared.loop_slot.lock() => slot,
    };

    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let started = Instant::now();
                let Collection { samples, errors } = shared.collect().await;
                let count = samples.len();
                let evicted = shared.buffer.push(samples);
                shared.stats.record_cycle(count, errors, started.elapsed());

                debug!(
                    target: "pulse::sampler",
                    samples = count,
                    errors,
                    evicted,
                    "Sampling cycle complete"
                );
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
