// ============================================================================
// LOGGING & TRACING INFRASTRUCTURE
// ============================================================================
// Structured logging for the binary and for embedding applications that do
// not bring their own subscriber. Library code only emits `tracing` events;
// installing a subscriber is always the caller's decision.
// ============================================================================

use tracing::level_filters::LevelFilter;
use tracing::{info, Subscriber};
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::error::{PulseError, PulseResult};

/// Map a configured level name to a filter. Unknown names fall back to info.
pub fn level_filter(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// The stderr formatting layer for `config.format`: `json`, `compact`, or
/// anything else for pretty output.
fn output_layer(config: &LoggingConfig) -> BoxedLayer {
    let base = tracing_fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    match config.format.as_str() {
        "json" => base
            .json()
            .with_file(config.source_location)
            .with_line_number(config.source_location)
            .with_thread_names(true)
            .boxed(),
        "compact" => base.compact().with_ansi(config.colors).boxed(),
        _ => base
            .pretty()
            .with_ansi(config.colors)
            .with_file(config.source_location)
            .with_line_number(config.source_location)
            .with_thread_names(true)
            .boxed(),
    }
}

fn subscriber(config: &LoggingConfig) -> impl Subscriber + Send + Sync + 'static {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter(&config.level).into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(output_layer(config))
        .with(env_filter)
}

/// Initialize the global subscriber based on configuration. Output goes to
/// stderr; `RUST_LOG` directives take precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> PulseResult<()> {
    tracing::subscriber::set_global_default(subscriber(config))
        .map_err(|e| PulseError::Internal(format!("Failed to set logger: {}", e)))?;

    info!(
        target: "pulse::init",
        level = %config.level,
        format = %config.format,
        "Logging initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter_parsing() {
        assert_eq!(level_filter("DEBUG"), LevelFilter::DEBUG);
        assert_eq!(level_filter("warning"), LevelFilter::WARN);
        assert_eq!(level_filter("nonsense"), LevelFilter::INFO);
    }

    #[test]
    fn test_every_format_builds_a_subscriber() {
        for format in ["json", "compact", "pretty"] {
            let config = LoggingConfig {
                format: format.into(),
                ..LoggingConfig::default()
            };
            tracing::subscriber::with_default(subscriber(&config), || {
                info!(target: "pulse::init", format, "subscriber smoke event");
            });
        }
    }
}
