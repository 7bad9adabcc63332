// ============================================================================
// CORE TYPE SYSTEM
// ============================================================================
// The data types that flow between the probes, the buffer, the alert engine
// and the analyzer:
// - Nanosecond timestamps and an injectable clock
// - The immutable metric sample
// - Alert severity levels
// ============================================================================

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Timestamp Types
// ----------------------------------------------------------------------------

/// High-precision timestamp in nanoseconds since Unix epoch.
/// Using i64 allows representing times from ~1677 to ~2262.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Create a new timestamp from milliseconds since Unix epoch
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Create a new timestamp from seconds since Unix epoch
    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000_000)
    }

    /// Get the current wall-clock timestamp
    #[inline]
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    #[inline]
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0 / 1_000_000
    }

    #[inline]
    pub const fn as_secs(&self) -> i64 {
        self.0 / 1_000_000_000
    }

    /// Duration between two timestamps, saturating at zero when `earlier`
    /// is actually later.
    #[inline]
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        let nanos = self.0.saturating_sub(earlier.0);
        Duration::from_nanos(nanos.max(0) as u64)
    }

    #[inline]
    pub fn add_duration(&self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration.as_nanos() as i64))
    }

    #[inline]
    pub fn sub_duration(&self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.as_nanos() as i64))
    }

    /// Convert to chrono DateTime<Utc>
    #[inline]
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let secs = self.0.div_euclid(1_000_000_000);
        let nanos = self.0.rem_euclid(1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nanos).unwrap_or_default()
    }
}

impl Default for Timestamp {
    #[inline]
    fn default() -> Self {
        Self::now()
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(st: SystemTime) -> Self {
        let duration = st.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self(duration.as_nanos() as i64)
    }
}

/// Atomic timestamp for lock-free operations
#[derive(Debug)]
#[repr(transparent)]
pub struct AtomicTimestamp(AtomicI64);

impl AtomicTimestamp {
    #[inline]
    pub const fn new(ts: Timestamp) -> Self {
        Self(AtomicI64::new(ts.0))
    }

    #[inline]
    pub fn load(&self, ordering: AtomicOrdering) -> Timestamp {
        Timestamp(self.0.load(ordering))
    }

    #[inline]
    pub fn store(&self, ts: Timestamp, ordering: AtomicOrdering) {
        self.0.store(ts.0, ordering);
    }

    /// Advance by `duration`, returning the new value
    #[inline]
    pub fn advance(&self, duration: Duration) -> Timestamp {
        let delta = duration.as_nanos() as i64;
        Timestamp(self.0.fetch_add(delta, AtomicOrdering::AcqRel).saturating_add(delta))
    }
}

impl Default for AtomicTimestamp {
    fn default() -> Self {
        Self::new(Timestamp::now())
    }
}

// ----------------------------------------------------------------------------
// Clocks
// ----------------------------------------------------------------------------

/// Source of "now" for breach timing. The alert engine measures debounce
/// spans against this, never against sample timestamps.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Timestamp;
}

/// Wall clock backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to. Used by tests and replay tooling.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicTimestamp,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicTimestamp::new(start),
        }
    }

    pub fn advance(&self, duration: Duration) -> Timestamp {
        self.now.advance(duration)
    }

    pub fn set(&self, ts: Timestamp) {
        self.now.store(ts, AtomicOrdering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(AtomicOrdering::Acquire)
    }
}

// ----------------------------------------------------------------------------
// Metric Sample - The Unit Of Observation
// ----------------------------------------------------------------------------

/// Dimensional tags attached to a sample. Ordered so serialized output is
/// stable; insertion order carries no meaning.
pub type Tags = BTreeMap<CompactString, CompactString>;

/// One observed value of one metric.
///
/// Samples are immutable once built: the builder methods consume `self`, and
/// there are no setters. The buffer shares them behind `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    timestamp: Timestamp,
    name: CompactString,
    value: f64,
    unit: CompactString,
    #[serde(default)]
    tags: Tags,
}

impl MetricSample {
    /// Create a sample stamped with the current wall-clock time.
    pub fn new<N, U>(name: N, value: f64, unit: U) -> Self
    where
        N: Into<CompactString>,
        U: Into<CompactString>,
    {
        Self {
            timestamp: Timestamp::now(),
            name: name.into(),
            value,
            unit: unit.into(),
            tags: Tags::new(),
        }
    }

    /// Builder: set timestamp
    #[inline]
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Builder: add a single tag
    pub fn with_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<CompactString>,
        V: Into<CompactString>,
    {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    #[inline]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    #[inline]
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(|v| v.as_str())
    }
}

impl Display for MetricSample {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (i, (key, value)) in self.tags.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}=\"{}\"", key, value)?;
        }
        write!(f, "}} {:.2} {} @ {}", self.value, self.unit, self.timestamp)
    }
}

// ----------------------------------------------------------------------------
// Severity
// ----------------------------------------------------------------------------

/// Severity level for alert rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Severity {
    /// Informational - no action needed
    Info = 0,
    /// Low severity - can be addressed later
    Low = 1,
    /// Medium severity - should be addressed soon
    Medium = 2,
    /// High severity - needs attention
    High = 3,
    /// Critical severity - immediate action required
    Critical = 4,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
