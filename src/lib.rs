//! # Pulse Engine
//!
//! An in-process telemetry core: a background sampler feeding a bounded
//! sample buffer, a debounced threshold alert engine, and a stateless
//! performance analyzer with scoring and recommendations.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  PROBES → SAMPLER → SAMPLE BUFFER ─┬→ ALERT ENGINE → DISPATCH QUEUE  │
//! │                                    └→ ANALYZER → REPORT              │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything hangs off an explicitly constructed [`Monitor`]; nothing is
//! global. Library code only emits `tracing` events, installing a subscriber
//! is left to the caller (see [`logging::init_logging`]).

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod alert;
pub mod analysis;
pub mod buffer;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod sampler;
pub mod types;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ENGINE_NAME: &str = "pulse-engine";
pub const ENGINE_FULL_NAME: &str = "Pulse Telemetry Engine";

/// Default sampling cadence
pub const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 5000;

/// Default number of samples kept in memory
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// Default number of alert events kept in history
pub const DEFAULT_ALERT_HISTORY_CAPACITY: usize = 1000;

/// Default number of samples evaluated per alert cycle
pub const DEFAULT_EVALUATION_WINDOW: usize = 50;

/// Default dispatch queue depth
pub const DEFAULT_DISPATCH_QUEUE_CAPACITY: usize = 1024;

/// Default upper bound on a single notifier call
pub const DEFAULT_NOTIFIER_TIMEOUT_MS: u64 = 5000;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use alert::{ActiveAlert, AlertEngine, AlertRule, AlertState, Comparator};
pub use analysis::{AnalysisReport, Analyzer, MetricSummary, Recommendation, ReportStatus, Stability, Trend};
pub use buffer::{SampleBuffer, SampleBufferStats};
pub use config::{AlertRuleConfig, EngineConfig};
pub use error::{ConfigError, NotifierError, ProbeReadError, PulseError, PulseResult, RuleError};
pub use monitor::Monitor;
pub use notify::{AlertDispatcher, AlertEvent, AlertEventKind, DispatchStats, DispatchWorker, LogNotifier, Notifier};
pub use probe::{ApplicationCounters, ApplicationProbe, FakeProbe, FakeReading, Probe, SystemProbe};
pub use sampler::{Sampler, SamplerStats};
pub use types::{Clock, ManualClock, MetricSample, Severity, SystemClock, Timestamp};
