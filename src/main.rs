// ============================================================================
// COMMAND LINE INTERFACE
// ============================================================================
// Operator shell around the library:
// - `run` drives the monitor until Ctrl-C or a fixed duration
// - `snapshot` samples once and prints the analysis report
// - `validate` / `generate-config` / `version` need no runtime state
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pulse_engine::logging::init_logging;
use pulse_engine::{EngineConfig, Monitor, ENGINE_FULL_NAME, ENGINE_NAME, ENGINE_VERSION};

// ----------------------------------------------------------------------------
// Argument Parser
// ----------------------------------------------------------------------------

/// Pulse telemetry engine
#[derive(Parser, Debug)]
#[command(
    name = "pulse",
    version,
    about = "Telemetry sampling, debounced alerting and performance scoring",
    long_about = "Samples host and application metrics into a bounded in-memory window, \
                  evaluates debounced threshold rules against it, and scores the window \
                  with trend and stability analysis."
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "pulse.toml", env = "PULSE_CONFIG")]
    config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "PULSE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the monitor loop
    Run {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration_secs: Option<u64>,
    },

    /// Collect samples and print an analysis report
    Snapshot {
        /// Number of collection rounds, one sampling interval apart
        #[arg(short, long, default_value_t = 2)]
        rounds: u32,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration file
    Validate {
        /// Print the parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print or write the default configuration
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

// ----------------------------------------------------------------------------
// Subcommand Handlers
// ----------------------------------------------------------------------------

fn handle_validate(config_path: &Path, verbose: bool) -> AnyhowResult<()> {
    println!("Validating configuration file: {}", config_path.display());

    let config = EngineConfig::load(config_path)
        .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;
    println!("Configuration is valid");

    if verbose {
        println!("{}", "=".repeat(60));
        println!(
            "{}",
            toml::to_string_pretty(&config).context("Failed to render configuration")?
        );
    }

    println!("  sampling interval: {}ms", config.sampler.interval_ms);
    println!("  buffer capacity:   {}", config.sampler.buffer_capacity);
    println!("  default rules:     {}", config.alerting.default_rules);
    println!("  configured rules:  {}", config.alerting.rules.len());
    Ok(())
}

fn handle_generate_config(output: Option<&Path>) -> AnyhowResult<()> {
    let rendered = EngineConfig::generate_default_config();
    match output {
        Some(path) => {
            fs::write(path, &rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Default configuration written to: {}", path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn handle_version() {
    println!("{} ({}) v{}", ENGINE_FULL_NAME, ENGINE_NAME, ENGINE_VERSION);
    println!("  target: {}-{}", std::env::consts::ARCH, std::env::consts::OS);
}

async fn handle_run(monitor: Monitor, duration: Option<Duration>) -> AnyhowResult<()> {
    let shutdown = CancellationToken::new();

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match duration {
                Some(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => info!("Run duration elapsed"),
                        _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C"),
                    }
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!(error = %e, "Failed to listen for Ctrl-C");
                    } else {
                        info!("Received Ctrl-C");
                    }
                }
            }
            shutdown.cancel();
        }
    });

    monitor.run(shutdown).await.context("Monitor failed")?;
    println!("{}", monitor.report());
    Ok(())
}

async fn handle_snapshot(monitor: Monitor, rounds: u32, json: bool) -> AnyhowResult<()> {
    let rounds = rounds.max(1);
    for round in 0..rounds {
        if round > 0 {
            tokio::time::sleep(monitor.sampler().interval()).await;
        }
        let samples = monitor.sampler().collect_once().await;
        monitor.buffer().push(samples);
    }

    let events = monitor.evaluate();
    let report = monitor.report();

    if json {
        let out = serde_json::json!({
            "report": report,
            "events": events,
            "active_alerts": monitor.active_alerts(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out).context("Failed to serialize report")?
        );
    } else {
        println!("{}", report);
        for event in &events {
            println!("{}", event);
        }
    }
    Ok(())
}

// ============================================================================
// MAIN ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Version) => {
            handle_version();
            return Ok(());
        }
        Some(Commands::GenerateConfig { output }) => return handle_generate_config(output.as_deref()),
        Some(Commands::Validate { verbose }) => return handle_validate(&cli.config, *verbose),
        _ => {}
    }

    let config_found = cli.config.exists();
    let config = if config_found {
        EngineConfig::load(&cli.config)
            .with_context(|| format!("Failed to load config from {}", cli.config.display()))?
    } else {
        EngineConfig::default()
    };

    let mut logging_config = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging_config.level = level.clone();
    }
    if cli.debug {
        logging_config.level = "debug".into();
    }
    init_logging(&logging_config).context("Failed to initialize logging")?;

    if !config_found {
        warn!("Config file not found at {}, using defaults", cli.config.display());
    }
    info!("{} v{}", ENGINE_FULL_NAME, ENGINE_VERSION);

    let monitor = Monitor::new(config).context("Failed to build monitor")?;

    match cli.command {
        Some(Commands::Snapshot { rounds, json }) => handle_snapshot(monitor, rounds, json).await,
        Some(Commands::Run { duration_secs }) => {
            handle_run(monitor, duration_secs.map(Duration::from_secs)).await
        }
        None => handle_run(monitor, None).await,
        Some(Commands::Version | Commands::GenerateConfig { .. } | Commands::Validate { .. }) => Ok(()),
    }
}
