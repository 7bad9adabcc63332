// ============================================================================
// PROBES - THE INGESTION BOUNDARY
// ============================================================================
// A probe turns some external state (the host, the application's counters,
// a script) into samples. Each metric is reported independently so one
// failed read costs only that metric for the cycle.
// ============================================================================

use std::collections::VecDeque;
use std::fmt::{self, Debug, Formatter};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use compact_str::CompactString;
use parking_lot::Mutex;
use sysinfo::{Disks, Networks, System};

use crate::error::{ProbeReadError, ProbeResult};
use crate::types::{MetricSample, Timestamp};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

// ----------------------------------------------------------------------------
// Probe Trait
// ----------------------------------------------------------------------------

/// A source of metric readings.
///
/// `read` must only observe state; the sampler decides what to do with the
/// results. Every returned entry is one metric: `Ok` becomes a sample, `Err`
/// is logged and skipped.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Returns the unique name of this probe.
    fn name(&self) -> &str;

    /// Read every metric this probe knows about.
    async fn read(&self) -> Vec<ProbeResult<MetricSample>>;
}

// ----------------------------------------------------------------------------
// System Probe - Host Resources
// ----------------------------------------------------------------------------

/// Host resource probe backed by `sysinfo`.
///
/// Emits `cpu_usage`, `memory_usage`, `memory_available`, `disk_usage`,
/// `network_bytes_sent`, `network_bytes_recv` and `process_count`. The
/// refresh is blocking, so it runs on tokio's blocking pool.
pub struct SystemProbe {
    state: Arc<Mutex<SystemState>>,
    mount: Arc<str>,
}

struct SystemState {
    system: System,
    disks: Disks,
    networks: Networks,
}

impl SystemProbe {
    pub const NAME: &'static str = "system";

    /// Create a probe reporting disk usage for `mount`.
    pub fn new(mount: impl AsRef<str>) -> Self {
        let mut system = System::new();
        // CPU usage is a delta between refreshes; prime it so the first
        // real read has a baseline.
        system.refresh_cpu();

        Self {
            state: Arc::new(Mutex::new(SystemState {
                system,
                disks: Disks::new_with_refreshed_list(),
                networks: Networks::new_with_refreshed_list(),
            })),
            mount: Arc::from(mount.as_ref()),
        }
    }

    fn read_blocking(state: &Mutex<SystemState>, mount: &str) -> Vec<ProbeResult<MetricSample>> {
        let mut state = state.lock();
        let SystemState {
            system,
            disks,
            networks,
        } = &mut *state;

        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_processes();
        disks.refresh();
        networks.refresh();

        let ts = Timestamp::now();
        let system_sample = |name: &str, value: f64, unit: &str| {
            MetricSample::new(name, value, unit)
                .at(ts)
                .with_tag("type", "system")
        };

        let mut out = Vec::with_capacity(7);

        out.push(Ok(system_sample(
            "cpu_usage",
            f64::from(system.global_cpu_info().cpu_usage()),
            "percent",
        )));

        let total = system.total_memory();
        let available = system.available_memory();
        if total > 0 {
            let used_pct = total.saturating_sub(available) as f64 / total as f64 * 100.0;
            out.push(Ok(system_sample("memory_usage", used_pct, "percent")));
            out.push(Ok(system_sample(
                "memory_available",
                available as f64 / BYTES_PER_GB,
                "GB",
            )));
        } else {
            for metric in ["memory_usage", "memory_available"] {
                out.push(Err(ProbeReadError::unavailable(
                    Self::NAME,
                    metric,
                    "total memory reported as zero",
                )));
            }
        }

        let disk = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new(mount));
        out.push(match disk {
            Some(disk) if disk.total_space() > 0 => {
                let used = disk.total_space().saturating_sub(disk.available_space());
                Ok(system_sample(
                    "disk_usage",
                    used as f64 / disk.total_space() as f64 * 100.0,
                    "percent",
                )
                .with_tag("mount", mount))
            }
            Some(_) => Err(ProbeReadError::unavailable(
                Self::NAME,
                "disk_usage",
                format!("mount '{}' reports zero capacity", mount),
            )),
            None => Err(ProbeReadError::unavailable(
                Self::NAME,
                "disk_usage",
                format!("mount '{}' not found", mount),
            )),
        });

        let (mut sent, mut received) = (0u64, 0u64);
        for (_interface, data) in &*networks {
            sent = sent.saturating_add(data.total_transmitted());
            received = received.saturating_add(data.total_received());
        }
        out.push(Ok(MetricSample::new("network_bytes_sent", sent as f64 / BYTES_PER_MB, "MB")
            .at(ts)
            .with_tag("type", "network")
            .with_tag("direction", "sent")));
        out.push(Ok(MetricSample::new("network_bytes_recv", received as f64 / BYTES_PER_MB, "MB")
            .at(ts)
            .with_tag("type", "network")
            .with_tag("direction", "received")));

        out.push(Ok(system_sample(
            "process_count",
            system.processes().len() as f64,
            "count",
        )));

        out
    }
}

impl Debug for SystemProbe {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemProbe")
            .field("mount", &self.mount)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Probe for SystemProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn read(&self) -> Vec<ProbeResult<MetricSample>> {
        let state = self.state.clone();
        let mount = self.mount.clone();

        match tokio::task::spawn_blocking(move || Self::read_blocking(&state, &mount)).await {
            Ok(readings) => readings,
            Err(e) => vec![Err(ProbeReadError::unavailable(
                Self::NAME,
                "*",
                format!("refresh task failed: {}", e),
            ))],
        }
    }
}

// ----------------------------------------------------------------------------
// Application Probe - Counters Fed By The Host Application
// ----------------------------------------------------------------------------

/// Counters the host application updates on its hot path. Request, error,
/// latency and cache counts share one lock so a drain sees them together;
/// the connection gauge is a plain atomic.
#[derive(Debug, Default)]
pub struct ApplicationCounters {
    window: Mutex<CounterWindow>,
    db_connections: AtomicU64,
}

impl ApplicationCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one handled request.
    pub fn record_request(&self, latency: Duration, success: bool) {
        let mut window = self.window.lock();
        window.requests += 1;
        window.latency_micros = window
            .latency_micros
            .saturating_add(latency.as_micros() as u64);
        if !success {
            window.errors += 1;
        }
    }

    /// Record one cache lookup.
    pub fn record_cache_lookup(&self, hit: bool) {
        let mut window = self.window.lock();
        if hit {
            window.cache_hits += 1;
        } else {
            window.cache_misses += 1;
        }
    }

    /// Set the current number of open database connections (a gauge).
    pub fn set_db_connections(&self, connections: u64) {
        self.db_connections.store(connections, AtomicOrdering::Relaxed);
    }

    /// Take the window accumulated since the previous drain.
    fn drain(&self) -> (CounterWindow, u64) {
        let window = std::mem::take(&mut *self.window.lock());
        (window, self.db_connections.load(AtomicOrdering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CounterWindow {
    requests: u64,
    errors: u64,
    latency_micros: u64,
    cache_hits: u64,
    cache_misses: u64,
}

/// Application probe: `response_time`, `request_count`, `error_rate`,
/// `db_connections` and `cache_hit_rate`.
///
/// Rates over an empty window are reported as `NoData` rather than zero.
#[derive(Debug, Clone)]
pub struct ApplicationProbe {
    counters: Arc<ApplicationCounters>,
}

impl ApplicationProbe {
    pub const NAME: &'static str = "application";

    pub fn new(counters: Arc<ApplicationCounters>) -> Self {
        Self { counters }
    }
}

#[async_trait]
impl Probe for ApplicationProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn read(&self) -> Vec<ProbeResult<MetricSample>> {
        let (window, db_connections) = self.counters.drain();
        let ts = Timestamp::now();
        let app = |name: &str, value: f64, unit: &str, kind: &str| {
            MetricSample::new(name, value, unit)
                .at(ts)
                .with_tag("type", kind)
        };

        let lookups = window.cache_hits + window.cache_misses;

        vec![
            if window.requests > 0 {
                let avg_ms = window.latency_micros as f64 / window.requests as f64 / 1000.0;
                Ok(app("response_time", avg_ms, "ms", "application"))
            } else {
                Err(ProbeReadError::no_data("response_time"))
            },
            Ok(app("request_count", window.requests as f64, "count", "application")),
            if window.requests > 0 {
                let pct = window.errors as f64 / window.requests as f64 * 100.0;
                Ok(app("error_rate", pct, "percent", "application"))
            } else {
                Err(ProbeReadError::no_data("error_rate"))
            },
            Ok(app("db_connections", db_connections as f64, "count", "database")),
            if lookups > 0 {
                let pct = window.cache_hits as f64 / lookups as f64 * 100.0;
                Ok(app("cache_hit_rate", pct, "percent", "cache"))
            } else {
                Err(ProbeReadError::no_data("cache_hit_rate"))
            },
        ]
    }
}

// ----------------------------------------------------------------------------
// Fake Probe - Deterministic Scripted Readings
// ----------------------------------------------------------------------------

/// One scripted reading.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeReading {
    Value(f64),
    Fail(String),
}

impl From<f64> for FakeReading {
    fn from(value: f64) -> Self {
        FakeReading::Value(value)
    }
}

#[derive(Debug)]
struct FakeSeries {
    metric: CompactString,
    unit: CompactString,
    script: VecDeque<FakeReading>,
    last: Option<FakeReading>,
}

/// A probe that replays scripted readings, one per metric per `read`.
/// When a script runs out, its final reading repeats.
#[derive(Debug)]
pub struct FakeProbe {
    name: String,
    series: Mutex<Vec<FakeSeries>>,
    reads: AtomicUsize,
}

impl FakeProbe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            series: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
        }
    }

    /// Builder: script a metric's readings
    pub fn with_series<I, R>(self, metric: &str, unit: &str, readings: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<FakeReading>,
    {
        self.series.lock().push(FakeSeries {
            metric: metric.into(),
            unit: unit.into(),
            script: readings.into_iter().map(Into::into).collect(),
            last: None,
        });
        self
    }

    /// Number of completed `read` calls.
    pub fn reads(&self) -> usize {
        self.reads.load(AtomicOrdering::Acquire)
    }
}

#[async_trait]
impl Probe for FakeProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> Vec<ProbeResult<MetricSample>> {
        let ts = Timestamp::now();
        let mut series = self.series.lock();
        let out = series
            .iter_mut()
            .filter_map(|s| {
                if let Some(next) = s.script.pop_front() {
                    s.last = Some(next);
                }
                let reading = s.last.clone()?;
                Some(match reading {
                    FakeReading::Value(v) => Ok(MetricSample::new(s.metric.clone(), v, s.unit.clone())
                        .at(ts)
                        .with_tag("type", "fake")),
                    FakeReading::Fail(message) => Err(ProbeReadError::unavailable(
                        self.name.as_str(),
                        s.metric.as_str(),
                        message,
                    )),
                })
            })
            .collect();
        drop(series);

        self.reads.fetch_add(1, AtomicOrdering::Release);
        out
    }
}

// ============================================================================
// TESTS
// ============================================================================
