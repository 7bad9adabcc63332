// ============================================================================
// MONITOR
// ============================================================================
// Owns one instance of every component and wires them together. There are
// no process-wide singletons: embedders construct a `Monitor`, keep the
// `ApplicationCounters` handle for their hot path, and drive `run`.
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alert::{ActiveAlert, AlertEngine, AlertRule};
use crate::analysis::{AnalysisReport, Analyzer};
use crate::buffer::SampleBuffer;
use crate::config::EngineConfig;
use crate::error::PulseResult;
use crate::notify::{AlertEvent, LogNotifier};
use crate::probe::{ApplicationCounters, ApplicationProbe, Probe, SystemProbe};
use crate::sampler::Sampler;
use crate::types::MetricSample;

pub struct Monitor {
    config: EngineConfig,
    buffer: Arc<SampleBuffer>,
    sampler: Sampler,
    engine: Arc<AlertEngine>,
    analyzer: Analyzer,
    counters: Arc<ApplicationCounters>,
}

impl Monitor {
    /// Build a monitor with the probes the configuration enables.
    pub fn new(config: EngineConfig) -> PulseResult<Self> {
        let counters = Arc::new(ApplicationCounters::new());
        let mut probes: Vec<Arc<dyn Probe>> = Vec::new();
        if config.sampler.system_probe {
            probes.push(Arc::new(SystemProbe::new(&config.sampler.disk_mount)));
        }
        if config.sampler.application_probe {
            probes.push(Arc::new(ApplicationProbe::new(counters.clone())));
        }
        Self::assemble(config, probes, counters)
    }

    /// Build a monitor sampling exactly `probes`.
    pub fn with_probes(config: EngineConfig, probes: Vec<Arc<dyn Probe>>) -> PulseResult<Self> {
        Self::assemble(config, probes, Arc::new(ApplicationCounters::new()))
    }

    fn assemble(
        config: EngineConfig,
        probes: Vec<Arc<dyn Probe>>,
        counters: Arc<ApplicationCounters>,
    ) -> PulseResult<Self> {
        config.validate()?;

        let buffer = Arc::new(SampleBuffer::new(config.sampler.buffer_capacity));
        let sampler = Sampler::new(
            buffer.clone(),
            probes,
            Duration::from_millis(config.sampler.interval_ms),
        );

        let engine = AlertEngine::from_config(&config.alerting);
        engine.register_notifier(Arc::new(LogNotifier));
        if config.alerting.default_rules {
            for rule in AlertRule::default_rules() {
                engine.add_rule(rule.with_notifier(LogNotifier::NAME))?;
            }
        }
        for rule in &config.alerting.rules {
            engine.add_rule(AlertRule::try_from(rule)?)?;
        }

        info!(
            target: "pulse::monitor",
            buffer_capacity = buffer.capacity(),
            sampling_interval_ms = config.sampler.interval_ms,
            rules = engine.rules().len(),
            "Monitor assembled"
        );

        Ok(Self {
            config,
            buffer,
            sampler,
            engine: Arc::new(engine),
            analyzer: Analyzer::new(),
            counters,
        })
    }

    /// Run sampling, evaluation and periodic reporting until `shutdown` is
    /// cancelled. The sampler and dispatcher are stopped before returning.
    pub async fn run(&self, shutdown: CancellationToken) -> PulseResult<()> {
        self.sampler.start()?;

        let worker_cancel = CancellationToken::new();
        let worker = tokio::spawn(self.engine.dispatch_worker().run(worker_cancel.clone()));

        let mut eval_tick = interval(Duration::from_millis(self.config.alerting.evaluation_interval_ms));
        eval_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut report_tick = match self.config.analysis.report_interval_ms {
            0 => None,
            ms => {
                let period = Duration::from_millis(ms);
                let mut tick = interval_at(Instant::now() + period, period);
                tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(tick)
            }
        };

        info!(target: "pulse::monitor", "Monitor running");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(target: "pulse::monitor", "Shutdown requested");
                    break;
                }
                _ = eval_tick.tick() => {
                    let events = self.evaluate();
                    if !events.is_empty() {
                        debug!(target: "pulse::monitor", events = events.len(), "Evaluation produced events");
                    }
                }
                _ = async {
                    match report_tick.as_mut() {
                        Some(tick) => { tick.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let report = self.report();
                    info!(
                        target: "pulse::monitor",
                        samples = report.samples_analyzed,
                        metrics = report.summaries.len(),
                        score = ?report.score,
                        recommendations = report.recommendations.len(),
                        "Analysis report"
                    );
                    debug!(target: "pulse::monitor", "\n{}", report);
                }
            }
        }

        self.sampler.stop().await;
        worker_cancel.cancel();
        if let Err(e) = worker.await {
            warn!(target: "pulse::monitor", error = %e, "Dispatch worker ended abnormally");
        }

        info!(target: "pulse::monitor", "Monitor stopped");
        Ok(())
    }

    /// Evaluate the configured window of the buffer once.
    pub fn evaluate(&self) -> Vec<AlertEvent> {
        let window = self.buffer.recent(None, self.config.alerting.evaluation_window);
        self.engine.check_alerts(&window)
    }

    /// Analyze the configured window of the buffer.
    pub fn report(&self) -> AnalysisReport {
        let window = self.buffer.recent(None, self.config.analysis.window);
        self.analyzer.analyze(&window)
    }

    // ---- Query boundary ----

    pub fn recent(&self, metric: Option<&str>, limit: usize) -> Vec<MetricSample> {
        self.buffer.recent(metric, limit)
    }

    pub fn check_alerts(&self, samples: &[MetricSample]) -> Vec<AlertEvent> {
        self.engine.check_alerts(samples)
    }

    pub fn analyze(&self, samples: &[MetricSample]) -> AnalysisReport {
        self.analyzer.analyze(samples)
    }

    pub fn active_alerts(&self) -> Vec<ActiveAlert> {
        self.engine.active_alerts()
    }

    pub fn alert_history(&self, limit: usize) -> Vec<AlertEvent> {
        self.engine.alert_history(limit)
    }

    // ---- Components ----

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn engine(&self) -> &Arc<AlertEngine> {
        &self.engine
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// Counters read by the application probe.
    pub fn counters(&self) -> &Arc<ApplicationCounters> {
        &self.counters
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("buffer", &self.buffer)
            .field("sampler", &self.sampler)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TESTS
// ============================================================================
