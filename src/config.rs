// ============================================================================
// CONFIGURATION SYSTEM
// ============================================================================
// Configuration management with:
// - TOML file parsing
// - Environment variable overrides (PULSE_ prefix, `__` as section separator)
// - Field validation
// - Sensible defaults for every field
// ============================================================================

use std::path::Path;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::alert::AlertRule;
use crate::error::ConfigError;
use crate::{
    DEFAULT_ALERT_HISTORY_CAPACITY, DEFAULT_BUFFER_CAPACITY, DEFAULT_DISPATCH_QUEUE_CAPACITY,
    DEFAULT_EVALUATION_WINDOW, DEFAULT_NOTIFIER_TIMEOUT_MS, DEFAULT_SAMPLING_INTERVAL_MS,
};

// ----------------------------------------------------------------------------
// Main Configuration Structure
// ----------------------------------------------------------------------------

/// Root configuration for the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Sampler and buffer settings
    #[serde(default)]
    pub sampler: SamplerConfig,

    /// Alert evaluation and notification settings
    #[serde(default)]
    pub alerting: AlertingConfig,

    /// Periodic analysis settings
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from file with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("PULSE_").split("__"));

        let config: Self = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML string, without environment overrides
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section, including that configured rules would be
    /// accepted at registration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sampler.validate()?;
        self.alerting.validate()?;
        self.analysis.validate()?;

        for (index, rule) in self.alerting.rules.iter().enumerate() {
            AlertRule::try_from(rule).map_err(|e| {
                ConfigError::invalid_value(format!("alerting.rules[{}]", index), e.to_string())
            })?;
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "compact" | "json") {
            return Err(ConfigError::invalid_value(
                "logging.format",
                format!("expected pretty, compact or json, got '{}'", self.logging.format),
            ));
        }

        Ok(())
    }

    /// Render the default configuration as TOML
    pub fn generate_default_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// Sampler Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct SamplerConfig {
    /// Sampling cadence in milliseconds
    #[serde(default = "default_sampling_interval")]
    #[validate(range(min = 100, max = 60000))]
    pub interval_ms: u64,

    /// Number of samples retained in memory
    #[serde(default = "default_buffer_capacity")]
    #[validate(range(min = 1))]
    pub buffer_capacity: usize,

    /// Read host resources (CPU, memory, disk, network, processes)
    #[serde(default = "default_true")]
    pub system_probe: bool,

    /// Read the application counters (latency, requests, errors, db, cache)
    #[serde(default = "default_true")]
    pub application_probe: bool,

    /// Mount point reported as `disk_usage`
    #[serde(default = "default_disk_mount")]
    #[validate(length(min = 1))]
    pub disk_mount: String,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sampling_interval(),
            buffer_capacity: default_buffer_capacity(),
            system_probe: true,
            application_probe: true,
            disk_mount: default_disk_mount(),
        }
    }
}

fn default_sampling_interval() -> u64 {
    DEFAULT_SAMPLING_INTERVAL_MS
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_disk_mount() -> String {
    "/".into()
}

fn default_true() -> bool {
    true
}

// ----------------------------------------------------------------------------
// Alerting Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct AlertingConfig {
    /// How often the monitor evaluates the buffered window
    #[serde(default = "default_sampling_interval")]
    #[validate(range(min = 100, max = 60000))]
    pub evaluation_interval_ms: u64,

    /// Samples fetched from the buffer for each evaluation
    #[serde(default = "default_evaluation_window")]
    #[validate(range(min = 1))]
    pub evaluation_window: usize,

    /// Alert events kept in history
    #[serde(default = "default_history_capacity")]
    #[validate(range(min = 1))]
    pub history_capacity: usize,

    /// Pending notifications before new ones are dropped
    #[serde(default = "default_dispatch_queue")]
    #[validate(range(min = 1))]
    pub dispatch_queue_capacity: usize,

    /// Upper bound on a single notifier call
    #[serde(default = "default_notifier_timeout")]
    #[validate(range(min = 1))]
    pub notifier_timeout_ms: u64,

    /// Install the built-in rule set
    #[serde(default = "default_true")]
    pub default_rules: bool,

    /// Additional rules
    #[serde(default)]
    pub rules: Vec<AlertRuleConfig>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_ms: default_sampling_interval(),
            evaluation_window: default_evaluation_window(),
            history_capacity: default_history_capacity(),
            dispatch_queue_capacity: default_dispatch_queue(),
            notifier_timeout_ms: default_notifier_timeout(),
            default_rules: true,
            rules: Vec::new(),
        }
    }
}

fn default_evaluation_window() -> usize {
    DEFAULT_EVALUATION_WINDOW
}

fn default_history_capacity() -> usize {
    DEFAULT_ALERT_HISTORY_CAPACITY
}

fn default_dispatch_queue() -> usize {
    DEFAULT_DISPATCH_QUEUE_CAPACITY
}

fn default_notifier_timeout() -> u64 {
    DEFAULT_NOTIFIER_TIMEOUT_MS
}

/// A rule as written in configuration. Converted into an `AlertRule` with
/// `AlertRule::try_from`, which is where the comparator string is checked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRuleConfig {
    pub name: String,
    pub metric: String,
    /// `gt`, `lt` or `eq` (also `>`, `<`, `==`)
    pub condition: String,
    pub threshold: f64,
    #[serde(default)]
    pub duration_secs: u64,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub notifier: Option<String>,
}

fn default_severity() -> String {
    "medium".into()
}

// ----------------------------------------------------------------------------
// Analysis Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct AnalysisConfig {
    /// Interval between logged reports (0 = disabled)
    #[serde(default = "default_report_interval")]
    pub report_interval_ms: u64,

    /// Samples included in each report
    #[serde(default = "default_analysis_window")]
    #[validate(range(min = 1))]
    pub window: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: default_report_interval(),
            window: default_analysis_window(),
        }
    }
}

fn default_report_interval() -> u64 {
    3 * DEFAULT_SAMPLING_INTERVAL_MS
}

fn default_analysis_window() -> usize {
    500
}

// ----------------------------------------------------------------------------
// Logging Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable ANSI colors
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include source location
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
            source_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// TESTS
// ============================================================================
