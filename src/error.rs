// ============================================================================
// ERROR HANDLING FRAMEWORK
// ============================================================================
// One error enum per subsystem, all convertible into `PulseError`:
// - Probe read failures are recoverable and never leave the sampling loop
// - Rule errors are returned synchronously at registration
// - Notifier errors are caught where the notifier is invoked
// - Configuration errors surface at load/validate time
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ----------------------------------------------------------------------------
// Core Errors
// ----------------------------------------------------------------------------

/// The main error type for the engine.
#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeReadError),

    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    #[error("Notifier error: {0}")]
    Notifier(#[from] NotifierError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PulseError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            PulseError::Config(_) => false,
            PulseError::Probe(_) => true,
            PulseError::Rule(_) => false,
            PulseError::Notifier(_) => true,
            PulseError::Io(_) => true,
            PulseError::Internal(_) => false,
        }
    }

    /// Error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            PulseError::Config(_) => "config",
            PulseError::Probe(_) => "probe",
            PulseError::Rule(_) => "rule",
            PulseError::Notifier(_) => "notifier",
            PulseError::Io(_) => "io",
            PulseError::Internal(_) => "internal",
        }
    }
}

pub type PulseResult<T> = Result<T, PulseError>;

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Errors related to configuration loading and validation
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {message}")]
    ParseError { message: String },

    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("Configuration validation failed: {message}")]
    ValidationFailed { message: String },
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ConfigError::ValidationFailed {
            message: errors.to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Probe Errors
// ----------------------------------------------------------------------------

/// A single metric could not be read this cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeReadError {
    #[error("Probe '{probe}' could not read '{metric}': {message}")]
    Unavailable {
        probe: String,
        metric: String,
        message: String,
    },

    #[error("No data for '{metric}' in this window")]
    NoData { metric: String },

    #[error("Probe '{probe}' timed out after {timeout_ms}ms")]
    Timeout { probe: String, timeout_ms: u64 },
}

impl ProbeReadError {
    pub fn unavailable(
        probe: impl Into<String>,
        metric: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ProbeReadError::Unavailable {
            probe: probe.into(),
            metric: metric.into(),
            message: message.into(),
        }
    }

    pub fn no_data(metric: impl Into<String>) -> Self {
        ProbeReadError::NoData {
            metric: metric.into(),
        }
    }
}

pub type ProbeResult<T> = Result<T, ProbeReadError>;

// ----------------------------------------------------------------------------
// Rule Errors
// ----------------------------------------------------------------------------

/// Rejections raised when registering or editing alert rules.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("Invalid rule '{rule}': {message}")]
    InvalidRule { rule: String, message: String },

    #[error("Unknown comparator '{comparator}' (expected gt, lt or eq)")]
    UnknownComparator { comparator: String },

    #[error("A rule named '{rule}' is already registered")]
    DuplicateRule { rule: String },

    #[error("Rule '{rule}' references unknown notifier '{notifier}'")]
    UnknownNotifier { rule: String, notifier: String },

    #[error("Rule '{rule}' not found")]
    NotFound { rule: String },
}

impl RuleError {
    pub fn invalid(rule: impl Into<String>, message: impl Into<String>) -> Self {
        RuleError::InvalidRule {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

pub type RuleResult<T> = Result<T, RuleError>;

// ----------------------------------------------------------------------------
// Notifier Errors
// ----------------------------------------------------------------------------

/// Failures while delivering an alert event. Never propagated past the
/// dispatcher.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifierError {
    #[error("Notifier '{notifier}' failed: {message}")]
    Failed { notifier: String, message: String },

    #[error("Notifier '{notifier}' timed out after {timeout:?}")]
    Timeout { notifier: String, timeout: Duration },

    #[error("Dispatch queue full ({capacity} pending), event for '{rule}' dropped")]
    QueueFull { rule: String, capacity: usize },
}

impl NotifierError {
    pub fn failed(notifier: impl Into<String>, message: impl Into<String>) -> Self {
        NotifierError::Failed {
            notifier: notifier.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
