// ============================================================================
// ALERT ENGINE
// ============================================================================
// Debounced threshold alerting over buffered samples.
//
// Per (rule, metric) pair:
//
//   idle --breach--> pending --elapsed >= min_duration--> firing
//     ^                 |                                   |
//     +--- condition false (silent) ---+--- condition false (resolved event)
//
// - Only the newest sample per metric is evaluated, so overlapping windows
//   never inflate a breach
// - Elapsed time is measured against the engine clock
// - Rules are swapped atomically; breach state sits behind one mutex
// - Notifications go through the bounded dispatcher and never block
// ============================================================================

use std::collections::VecDeque;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use arc_swap::ArcSwap;
use compact_str::CompactString;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AlertRuleConfig, AlertingConfig};
use crate::error::{RuleError, RuleResult};
use crate::notify::{AlertDispatcher, AlertEvent, AlertEventKind, DispatchStats, DispatchWorker, Notifier};
use crate::types::{Clock, MetricSample, Severity, SystemClock, Timestamp};

// ----------------------------------------------------------------------------
// Comparator
// ----------------------------------------------------------------------------

/// How a sample value is compared against a rule threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    GreaterThan,
    LessThan,
    EqualWithin { epsilon: f64 },
}

impl Comparator {
    pub const DEFAULT_EPSILON: f64 = 0.001;

    /// Equality with the default epsilon.
    pub const fn equal() -> Self {
        Comparator::EqualWithin {
            epsilon: Self::DEFAULT_EPSILON,
        }
    }

    /// True when `value` breaches `threshold`.
    #[inline]
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match *self {
            Comparator::GreaterThan => value > threshold,
            Comparator::LessThan => value < threshold,
            Comparator::EqualWithin { epsilon } => (value - threshold).abs() < epsilon,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::GreaterThan => ">",
            Comparator::LessThan => "<",
            Comparator::EqualWithin { .. } => "==",
        }
    }
}

impl Display for Comparator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Comparator {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gt" | ">" => Ok(Comparator::GreaterThan),
            "lt" | "<" => Ok(Comparator::LessThan),
            "eq" | "==" => Ok(Comparator::equal()),
            _ => Err(RuleError::UnknownComparator {
                comparator: s.to_string(),
            }),
        }
    }
}

// ----------------------------------------------------------------------------
// Alert Rule
// ----------------------------------------------------------------------------

/// A threshold rule on one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub metric: String,
    pub comparator: Comparator,
    pub threshold: f64,
    /// Continuous breach span required before firing
    pub min_duration: Duration,
    pub severity: Severity,
    pub enabled: bool,
    /// Name of a registered notifier
    pub notifier: Option<String>,
}

impl AlertRule {
    /// An enabled rule that fires on the first breach.
    pub fn new(
        name: impl Into<String>,
        metric: impl Into<String>,
        comparator: Comparator,
        threshold: f64,
    ) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            comparator,
            threshold,
            min_duration: Duration::ZERO,
            severity: Severity::default(),
            enabled: true,
            notifier: None,
        }
    }

    pub fn with_duration(mut self, min_duration: Duration) -> Self {
        self.min_duration = min_duration;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_notifier(mut self, notifier: impl Into<String>) -> Self {
        self.notifier = Some(notifier.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Structural checks. Notifier references are checked by the engine.
    pub fn validate(&self) -> RuleResult<()> {
        if self.name.trim().is_empty() {
            return Err(RuleError::invalid(&self.name, "rule name must not be empty"));
        }
        if self.metric.trim().is_empty() {
            return Err(RuleError::invalid(&self.name, "metric name must not be empty"));
        }
        if !self.threshold.is_finite() {
            return Err(RuleError::invalid(
                &self.name,
                format!("threshold must be finite, got {}", self.threshold),
            ));
        }
        if let Comparator::EqualWithin { epsilon } = self.comparator {
            if !epsilon.is_finite() || epsilon < 0.0 {
                return Err(RuleError::invalid(
                    &self.name,
                    format!("epsilon must be a non-negative number, got {}", epsilon),
                ));
            }
        }
        Ok(())
    }

    /// The built-in rule set.
    pub fn default_rules() -> Vec<AlertRule> {
        vec![
            AlertRule::new("high_cpu_usage", "cpu_usage", Comparator::GreaterThan, 80.0)
                .with_duration(Duration::from_secs(60))
                .with_severity(Severity::High),
            AlertRule::new("high_memory_usage", "memory_usage", Comparator::GreaterThan, 85.0)
                .with_duration(Duration::from_secs(120))
                .with_severity(Severity::High),
            AlertRule::new("disk_space_low", "disk_usage", Comparator::GreaterThan, 90.0)
                .with_duration(Duration::from_secs(300))
                .with_severity(Severity::Critical),
            AlertRule::new("slow_response_time", "response_time", Comparator::GreaterThan, 1000.0)
                .with_duration(Duration::from_secs(30))
                .with_severity(Severity::Medium),
            AlertRule::new("high_error_rate", "error_rate", Comparator::GreaterThan, 5.0)
                .with_duration(Duration::from_secs(60))
                .with_severity(Severity::High),
        ]
    }
}

impl TryFrom<&AlertRuleConfig> for AlertRule {
    type Error = RuleError;

    fn try_from(config: &AlertRuleConfig) -> Result<Self, Self::Error> {
        let comparator = config.condition.parse::<Comparator>()?;
        let severity = config
            .severity
            .parse::<Severity>()
            .map_err(|e| RuleError::invalid(&config.name, e))?;

        let rule = AlertRule {
            name: config.name.clone(),
            metric: config.metric.clone(),
            comparator,
            threshold: config.threshold,
            min_duration: Duration::from_secs(config.duration_secs),
            severity,
            enabled: config.enabled,
            notifier: config.notifier.clone(),
        };
        rule.validate()?;
        Ok(rule)
    }
}

// ----------------------------------------------------------------------------
// Alert State
// ----------------------------------------------------------------------------

/// Breach bookkeeping for one (rule, metric) pair. Exists only while the
/// condition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlertState {
    pub first_breach: Timestamp,
    pub last_breach: Timestamp,
    pub breach_count: u64,
    pub notified: bool,
}

impl AlertState {
    fn new(now: Timestamp) -> Self {
        Self {
            first_breach: now,
            last_breach: now,
            breach_count: 1,
            notified: false,
        }
    }
}

type StateKey = (CompactString, CompactString);

/// Snapshot of a breach in progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveAlert {
    pub rule: String,
    pub metric: String,
    pub severity: Severity,
    pub first_breach: Timestamp,
    pub last_breach: Timestamp,
    pub breach_count: u64,
    /// False while still inside the debounce window
    pub firing: bool,
}

// ----------------------------------------------------------------------------
// Alert Engine
// ----------------------------------------------------------------------------

/// Evaluates rules against sample windows and emits alert events.
pub struct AlertEngine {
    rules: ArcSwap<Vec<Arc<AlertRule>>>,
    /// Serialises rule-set writers
    rules_write: Mutex<()>,
    states: Mutex<AHashMap<StateKey, AlertState>>,
    history: Mutex<VecDeque<AlertEvent>>,
    history_capacity: usize,
    notifiers: DashMap<String, Arc<dyn Notifier>>,
    dispatcher: AlertDispatcher,
    clock: Arc<dyn Clock>,
}

impl AlertEngine {
    pub fn new(history_capacity: usize, dispatcher: AlertDispatcher) -> Self {
        Self {
            rules: ArcSwap::from_pointee(Vec::new()),
            rules_write: Mutex::new(()),
            states: Mutex::new(AHashMap::new()),
            history: Mutex::new(VecDeque::new()),
            history_capacity: history_capacity.max(1),
            notifiers: DashMap::new(),
            dispatcher,
            clock: Arc::new(SystemClock),
        }
    }

    /// Engine with the configured history and dispatch sizing. Rules are not
    /// installed here.
    pub fn from_config(config: &AlertingConfig) -> Self {
        Self::new(
            config.history_capacity,
            AlertDispatcher::new(
                config.dispatch_queue_capacity,
                Duration::from_millis(config.notifier_timeout_ms),
            ),
        )
    }

    /// Builder: replace the clock breach spans are measured with
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ---- Notifiers ----

    /// Register (or replace) a notifier under its own name.
    pub fn register_notifier(&self, notifier: Arc<dyn Notifier>) {
        let name = notifier.name().to_string();
        debug!(target: "pulse::alert", notifier = %name, "Notifier registered");
        self.notifiers.insert(name, notifier);
    }

    pub fn has_notifier(&self, name: &str) -> bool {
        self.notifiers.contains_key(name)
    }

    // ---- Rules ----

    pub fn add_rule(&self, rule: AlertRule) -> RuleResult<()> {
        rule.validate()?;
        if let Some(notifier) = &rule.notifier {
            if !self.has_notifier(notifier) {
                return Err(RuleError::UnknownNotifier {
                    rule: rule.name.clone(),
                    notifier: notifier.clone(),
                });
            }
        }

        let _guard = self.rules_write.lock();
        let current = self.rules.load_full();
        if current.iter().any(|r| r.name == rule.name) {
            return Err(RuleError::DuplicateRule { rule: rule.name });
        }

        info!(
            target: "pulse::alert",
            rule = %rule.name,
            metric = %rule.metric,
            condition = %rule.comparator,
            threshold = rule.threshold,
            duration_secs = rule.min_duration.as_secs(),
            severity = %rule.severity,
            "Alert rule added"
        );

        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(Arc::new(rule));
        self.rules.store(Arc::new(next));
        Ok(())
    }

    /// Remove a rule and discard any breach state it had.
    pub fn remove_rule(&self, name: &str) -> RuleResult<AlertRule> {
        let _guard = self.rules_write.lock();
        let current = self.rules.load_full();
        let removed = current
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| RuleError::NotFound { rule: name.into() })?;

        let next: Vec<_> = current.iter().filter(|r| r.name != name).cloned().collect();
        self.rules.store(Arc::new(next));
        self.states.lock().retain(|(rule, _), _| rule.as_str() != name);

        info!(target: "pulse::alert", rule = %name, "Alert rule removed");
        Ok(AlertRule::clone(&removed))
    }

    /// Enable or disable a rule. Breach state is left as it is.
    pub fn set_rule_enabled(&self, name: &str, enabled: bool) -> RuleResult<()> {
        let _guard = self.rules_write.lock();
        let current = self.rules.load_full();
        if !current.iter().any(|r| r.name == name) {
            return Err(RuleError::NotFound { rule: name.into() });
        }

        let next: Vec<_> = current
            .iter()
            .map(|r| {
                if r.name == name {
                    Arc::new(AlertRule {
                        enabled,
                        ..AlertRule::clone(r)
                    })
                } else {
                    r.clone()
                }
            })
            .collect();
        self.rules.store(Arc::new(next));

        info!(target: "pulse::alert", rule = %name, enabled, "Alert rule toggled");
        Ok(())
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.load().iter().map(|r| AlertRule::clone(r)).collect()
    }

    // ---- Evaluation ----

    /// Evaluate every enabled rule against the newest sample of its metric
    /// in `samples`. Returns the transitions this call produced; they are
    /// also recorded in history and handed to the rule's notifier.
    pub fn check_alerts(&self, samples: &[MetricSample]) -> Vec<AlertEvent> {
        let latest = newest_per_metric(samples);
        if latest.is_empty() {
            return Vec::new();
        }

        // States before rules: a concurrent `remove_rule` either lands before
        // this snapshot or waits for the lock and clears what we write.
        let mut states = self.states.lock();
        let rules = self.rules.load();
        let mut events = Vec::new();
        let now = self.clock.now();

        for rule in rules.iter().filter(|r| r.enabled) {
            let Some(sample) = latest.get(rule.metric.as_str()) else {
                continue;
            };
            let key: StateKey = (rule.name.as_str().into(), rule.metric.as_str().into());

            if rule.comparator.evaluate(sample.value(), rule.threshold) {
                let state = states
                    .entry(key)
                    .and_modify(|s| {
                        s.last_breach = now;
                        s.breach_count += 1;
                    })
                    .or_insert_with(|| AlertState::new(now));

                let elapsed = now.duration_since(state.first_breach);
                if !state.notified && elapsed >= rule.min_duration {
                    state.notified = true;
                    let event = make_event(rule, sample, AlertEventKind::Triggered, elapsed, now);
                    warn!(
                        target: "pulse::alert",
                        rule = %rule.name,
                        metric = %rule.metric,
                        value = sample.value(),
                        threshold = rule.threshold,
                        elapsed_secs = elapsed.as_secs(),
                        severity = %rule.severity,
                        "Alert triggered"
                    );
                    self.emit(rule, event, &mut events);
                }
            } else if let Some(state) = states.remove(&key) {
                if state.notified {
                    let elapsed = now.duration_since(state.first_breach);
                    let event = make_event(rule, sample, AlertEventKind::Resolved, elapsed, now);
                    info!(
                        target: "pulse::alert",
                        rule = %rule.name,
                        metric = %rule.metric,
                        value = sample.value(),
                        elapsed_secs = elapsed.as_secs(),
                        "Alert resolved"
                    );
                    self.emit(rule, event, &mut events);
                } else {
                    debug!(target: "pulse::alert", rule = %rule.name, "Pending breach cleared");
                }
            }
        }

        events
    }

    fn emit(&self, rule: &AlertRule, event: AlertEvent, events: &mut Vec<AlertEvent>) {
        {
            let mut history = self.history.lock();
            if history.len() == self.history_capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        if let Some(name) = &rule.notifier {
            match self.notifiers.get(name).map(|n| n.value().clone()) {
                Some(notifier) => {
                    // Drops are logged and counted by the dispatcher.
                    let _ = self.dispatcher.try_dispatch(notifier, event.clone());
                }
                None => warn!(
                    target: "pulse::alert",
                    rule = %rule.name,
                    notifier = %name,
                    "Notifier no longer registered, event not dispatched"
                ),
            }
        }

        events.push(event);
    }

    // ---- Queries ----

    /// Breaches that reached firing, oldest first.
    pub fn active_alerts(&self) -> Vec<ActiveAlert> {
        self.snapshot(|s| s.notified)
    }

    /// Breaches still inside their debounce window, oldest first.
    pub fn pending_alerts(&self) -> Vec<ActiveAlert> {
        self.snapshot(|s| !s.notified)
    }

    fn snapshot(&self, filter: impl Fn(&AlertState) -> bool) -> Vec<ActiveAlert> {
        let states = self.states.lock();
        let rules = self.rules.load();
        let mut out: Vec<ActiveAlert> = states
            .iter()
            .filter(|(_, state)| filter(state))
            .map(|((rule, metric), state)| ActiveAlert {
                rule: rule.to_string(),
                metric: metric.to_string(),
                severity: rules
                    .iter()
                    .find(|r| r.name == rule.as_str())
                    .map(|r| r.severity)
                    .unwrap_or_default(),
                first_breach: state.first_breach,
                last_breach: state.last_breach,
                breach_count: state.breach_count,
                firing: state.notified,
            })
            .collect();
        drop(states);

        out.sort_by(|a, b| a.first_breach.cmp(&b.first_breach).then_with(|| a.rule.cmp(&b.rule)));
        out
    }

    /// Up to `limit` of the most recent events, oldest first.
    pub fn alert_history(&self, limit: usize) -> Vec<AlertEvent> {
        let history = self.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// A worker for this engine's notification queue.
    pub fn dispatch_worker(&self) -> DispatchWorker {
        self.dispatcher.worker()
    }
}

impl fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertEngine")
            .field("rules", &self.rules.load().len())
            .field("states", &self.states.lock().len())
            .field("notifiers", &self.notifiers.len())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// Newest sample per metric by timestamp. Ties go to the later slice entry.
fn newest_per_metric(samples: &[MetricSample]) -> AHashMap<&str, &MetricSample> {
    let mut latest: AHashMap<&str, &MetricSample> = AHashMap::new();
    for sample in samples {
        latest
            .entry(sample.name())
            .and_modify(|current| {
                if sample.timestamp() >= current.timestamp() {
                    *current = sample;
                }
            })
            .or_insert(sample);
    }
    latest
}

fn make_event(
    rule: &AlertRule,
    sample: &MetricSample,
    kind: AlertEventKind,
    elapsed: Duration,
    now: Timestamp,
) -> AlertEvent {
    AlertEvent {
        id: Uuid::new_v4(),
        kind,
        rule: rule.name.clone(),
        metric: rule.metric.clone(),
        severity: rule.severity,
        threshold: rule.threshold,
        value: sample.value(),
        unit: sample.unit().to_string(),
        elapsed,
        timestamp: now,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::test_support::{FailingNotifier, RecordingNotifier};
    use crate::types::ManualClock;
    use test_case::test_case;

    const T0: Timestamp = Timestamp::from_secs(1_700_000_000);

    fn engine(clock: &Arc<ManualClock>) -> AlertEngine {
        AlertEngine::new(100, AlertDispatcher::new(16, Duration::from_secs(1)))
            .with_clock(clock.clone())
    }

    fn cpu(value: f64, clock: &ManualClock) -> MetricSample {
        MetricSample::new("cpu_usage", value, "percent").at(clock.now())
    }

    fn kinds(events: &[AlertEvent]) -> Vec<(&str, AlertEventKind)> {
        events.iter().map(|e| (e.rule.as_str(), e.kind)).collect()
    }

    #[test_case(Comparator::GreaterThan, 80.1, 80.0 => true ; "gt above")]
    #[test_case(Comparator::GreaterThan, 80.0, 80.0 => false ; "gt equal")]
    #[test_case(Comparator::LessThan, 9.0, 10.0 => true ; "lt below")]
    #[test_case(Comparator::LessThan, 10.0, 10.0 => false ; "lt equal")]
    #[test_case(Comparator::equal(), 5.0005, 5.0 => true ; "eq within epsilon")]
    #[test_case(Comparator::equal(), 5.01, 5.0 => false ; "eq outside epsilon")]
    fn test_comparator_evaluate(comparator: Comparator, value: f64, threshold: f64) -> bool {
        comparator.evaluate(value, threshold)
    }

    #[test_case("gt" => Ok(Comparator::GreaterThan) ; "gt")]
    #[test_case(">" => Ok(Comparator::GreaterThan) ; "gt symbol")]
    #[test_case("LT" => Ok(Comparator::LessThan) ; "lt uppercase")]
    #[test_case("==" => Ok(Comparator::equal()) ; "eq symbol")]
    #[test_case("ge" => Err(RuleError::UnknownComparator { comparator: "ge".into() }) ; "unknown")]
    fn test_comparator_parse(input: &str) -> Result<Comparator, RuleError> {
        input.parse()
    }

    #[test]
    fn test_fires_on_second_sample_with_zero_duration() {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = engine(&clock);
        engine
            .add_rule(AlertRule::new("high_cpu", "cpu_usage", Comparator::GreaterThan, 80.0))
            .unwrap();

        assert!(engine.check_alerts(&[cpu(40.0, &clock)]).is_empty());
        assert!(engine.active_alerts().is_empty());

        clock.advance(Duration::from_secs(5));
        let events = engine.check_alerts(&[cpu(90.0, &clock)]);
        assert_eq!(kinds(&events), vec![("high_cpu", AlertEventKind::Triggered)]);
        assert_eq!(events[0].value, 90.0);

        clock.advance(Duration::from_secs(5));
        assert!(engine.check_alerts(&[cpu(95.0, &clock)]).is_empty());

        let active = engine.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].breach_count, 2);
        assert!(active[0].firing);
    }

    #[test]
    fn test_debounce_requires_continuous_span() {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = engine(&clock);
        engine
            .add_rule(
                AlertRule::new("high_cpu", "cpu_usage", Comparator::GreaterThan, 80.0)
                    .with_duration(Duration::from_secs(60)),
            )
            .unwrap();

        assert!(engine.check_alerts(&[cpu(90.0, &clock)]).is_empty());
        clock.advance(Duration::from_secs(30));
        assert!(engine.check_alerts(&[cpu(91.0, &clock)]).is_empty());
        assert_eq!(engine.pending_alerts().len(), 1);

        // A single sample at the threshold resets the span.
        clock.advance(Duration::from_secs(20));
        assert!(engine.check_alerts(&[cpu(80.0, &clock)]).is_empty());
        assert!(engine.pending_alerts().is_empty());

        clock.advance(Duration::from_secs(20));
        assert!(engine.check_alerts(&[cpu(92.0, &clock)]).is_empty());
        clock.advance(Duration::from_secs(59));
        assert!(engine.check_alerts(&[cpu(93.0, &clock)]).is_empty());
        clock.advance(Duration::from_secs(1));
        let events = engine.check_alerts(&[cpu(94.0, &clock)]);
        assert_eq!(kinds(&events), vec![("high_cpu", AlertEventKind::Triggered)]);
        assert_eq!(events[0].elapsed, Duration::from_secs(60));
    }

    #[test]
    fn test_repeated_window_does_not_extend_breach() {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = engine(&clock);
        engine
            .add_rule(
                AlertRule::new("high_cpu", "cpu_usage", Comparator::GreaterThan, 80.0)
                    .with_duration(Duration::from_secs(10)),
            )
            .unwrap();

        let window = vec![cpu(85.0, &clock), cpu(90.0, &clock), cpu(95.0, &clock)];
        for _ in 0..50 {
            assert!(engine.check_alerts(&window).is_empty());
        }

        let pending = engine.pending_alerts();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].first_breach, T0);
        assert_eq!(pending[0].last_breach, T0);
    }

    #[test]
    fn test_newest_sample_wins_by_timestamp() {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = engine(&clock);
        engine
            .add_rule(AlertRule::new("high_cpu", "cpu_usage", Comparator::GreaterThan, 80.0))
            .unwrap();

        let newer = MetricSample::new("cpu_usage", 95.0, "percent").at(T0.add_duration(Duration::from_secs(5)));
        let older = MetricSample::new("cpu_usage", 40.0, "percent").at(T0);
        let events = engine.check_alerts(&[newer, older]);
        assert_eq!(kinds(&events), vec![("high_cpu", AlertEventKind::Triggered)]);

        let same_a = MetricSample::new("cpu_usage", 95.0, "percent").at(T0);
        let same_b = MetricSample::new("cpu_usage", 10.0, "percent").at(T0);
        let events = engine.check_alerts(&[same_a, same_b]);
        assert_eq!(kinds(&events), vec![("high_cpu", AlertEventKind::Resolved)]);
    }

    #[test]
    fn test_resolved_only_after_firing() {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = engine(&clock);
        engine
            .add_rule(
                AlertRule::new("high_cpu", "cpu_usage", Comparator::GreaterThan, 80.0)
                    .with_duration(Duration::from_secs(30)),
            )
            .unwrap();

        // Pending breach clears silently.
        engine.check_alerts(&[cpu(90.0, &clock)]);
        clock.advance(Duration::from_secs(10));
        assert!(engine.check_alerts(&[cpu(20.0, &clock)]).is_empty());

        engine.check_alerts(&[cpu(90.0, &clock)]);
        clock.advance(Duration::from_secs(30));
        engine.check_alerts(&[cpu(90.0, &clock)]);
        clock.advance(Duration::from_secs(15));
        let events = engine.check_alerts(&[cpu(20.0, &clock)]);

        assert_eq!(kinds(&events), vec![("high_cpu", AlertEventKind::Resolved)]);
        assert_eq!(events[0].elapsed, Duration::from_secs(45));
        assert!(engine.active_alerts().is_empty());
        assert_eq!(
            kinds(&engine.alert_history(10)),
            vec![
                ("high_cpu", AlertEventKind::Triggered),
                ("high_cpu", AlertEventKind::Resolved),
            ]
        );
    }

    #[test]
    fn test_metric_absent_from_batch_leaves_state() {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = engine(&clock);
        engine
            .add_rule(AlertRule::new("high_cpu", "cpu_usage", Comparator::GreaterThan, 80.0))
            .unwrap();

        engine.check_alerts(&[cpu(90.0, &clock)]);
        let other = MetricSample::new("memory_usage", 10.0, "percent").at(clock.now());
        assert!(engine.check_alerts(&[other]).is_empty());
        assert!(engine.check_alerts(&[]).is_empty());
        assert_eq!(engine.active_alerts().len(), 1);
    }

    #[test]
    fn test_disabling_keeps_state_and_removal_clears_it() {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = engine(&clock);
        engine
            .add_rule(AlertRule::new("high_cpu", "cpu_usage", Comparator::GreaterThan, 80.0))
            .unwrap();
        engine.check_alerts(&[cpu(90.0, &clock)]);

        engine.set_rule_enabled("high_cpu", false).unwrap();
        clock.advance(Duration::from_secs(5));
        assert!(engine.check_alerts(&[cpu(10.0, &clock)]).is_empty());
        assert_eq!(engine.active_alerts().len(), 1, "disabled rule keeps its state");

        engine.set_rule_enabled("high_cpu", true).unwrap();
        assert_eq!(
            kinds(&engine.check_alerts(&[cpu(10.0, &clock)])),
            vec![("high_cpu", AlertEventKind::Resolved)]
        );

        engine.check_alerts(&[cpu(90.0, &clock)]);
        assert_eq!(engine.active_alerts().len(), 1);
        let removed = engine.remove_rule("high_cpu").unwrap();
        assert_eq!(removed.name, "high_cpu");
        assert!(engine.active_alerts().is_empty());
        assert!(engine.rules().is_empty());
        assert_eq!(
            engine.remove_rule("high_cpu"),
            Err(RuleError::NotFound { rule: "high_cpu".into() })
        );
    }

    #[test]
    fn test_rule_added_disabled_is_skipped_until_enabled() {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = engine(&clock);
        engine
            .add_rule(AlertRule::new("high_cpu", "cpu_usage", Comparator::GreaterThan, 80.0).disabled())
            .unwrap();

        assert!(engine.check_alerts(&[cpu(90.0, &clock)]).is_empty());
        assert!(engine.pending_alerts().is_empty());

        engine.set_rule_enabled("high_cpu", true).unwrap();
        assert_eq!(
            kinds(&engine.check_alerts(&[cpu(90.0, &clock)])),
            vec![("high_cpu", AlertEventKind::Triggered)]
        );
    }

    #[test]
    fn test_rule_churn_during_evaluation_leaves_no_orphan_state() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let clock = Arc::new(ManualClock::new(T0));
        let engine = engine(&clock);
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    while !done.load(Ordering::Relaxed) {
                        engine.check_alerts(&[cpu(90.0, &clock)]);
                        let _ = engine.active_alerts();
                    }
                });
            }

            for i in 0..500 {
                let name = format!("r{}", i);
                engine
                    .add_rule(AlertRule::new(name.as_str(), "cpu_usage", Comparator::GreaterThan, 80.0))
                    .unwrap();
                engine.set_rule_enabled(&name, i % 2 == 0).unwrap();
                engine.remove_rule(&name).unwrap();
            }
            done.store(true, Ordering::Relaxed);
        });

        assert!(engine.rules().is_empty());
        assert!(engine.active_alerts().is_empty());
        assert!(engine.pending_alerts().is_empty());
    }

    #[test]
    fn test_add_rule_validation() {
        let engine = AlertEngine::new(10, AlertDispatcher::new(4, Duration::from_secs(1)));
        let base = AlertRule::new("high_cpu", "cpu_usage", Comparator::GreaterThan, 80.0);

        engine.add_rule(base.clone()).unwrap();
        assert_eq!(
            engine.add_rule(base.clone()),
            Err(RuleError::DuplicateRule { rule: "high_cpu".into() })
        );
        assert!(matches!(
            engine.add_rule(AlertRule::new(" ", "cpu_usage", Comparator::GreaterThan, 1.0)),
            Err(RuleError::InvalidRule { .. })
        ));
        assert!(matches!(
            engine.add_rule(AlertRule::new("nan", "cpu_usage", Comparator::GreaterThan, f64::NAN)),
            Err(RuleError::InvalidRule { .. })
        ));
        assert!(matches!(
            engine.add_rule(AlertRule::new(
                "neg",
                "cpu_usage",
                Comparator::EqualWithin { epsilon: -1.0 },
                1.0
            )),
            Err(RuleError::InvalidRule { .. })
        ));
        assert_eq!(
            engine.add_rule(AlertRule::new("paged", "cpu_usage", Comparator::GreaterThan, 1.0).with_notifier("pager")),
            Err(RuleError::UnknownNotifier {
                rule: "paged".into(),
                notifier: "pager".into(),
            })
        );
        assert_eq!(engine.rules().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_notifier_does_not_block_other_rules() {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = engine(&clock);
        let recorder = Arc::new(RecordingNotifier::new("rec"));
        engine.register_notifier(Arc::new(FailingNotifier("broken")));
        engine.register_notifier(recorder.clone());

        engine
            .add_rule(AlertRule::new("a_broken", "cpu_usage", Comparator::GreaterThan, 50.0).with_notifier("broken"))
            .unwrap();
        engine
            .add_rule(AlertRule::new("b_recorded", "cpu_usage", Comparator::GreaterThan, 60.0).with_notifier("rec"))
            .unwrap();

        let events = engine.check_alerts(&[cpu(90.0, &clock)]);
        assert_eq!(
            kinds(&events),
            vec![
                ("a_broken", AlertEventKind::Triggered),
                ("b_recorded", AlertEventKind::Triggered),
            ]
        );

        engine.dispatch_worker().drain_pending().await;
        assert_eq!(recorder.kinds(), vec![("b_recorded".to_string(), AlertEventKind::Triggered)]);

        let stats = engine.dispatch_stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 1);
    }

    #[test]
    fn test_full_dispatch_queue_does_not_block_evaluation() {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = AlertEngine::new(100, AlertDispatcher::new(1, Duration::from_secs(1)))
            .with_clock(clock.clone());
        engine.register_notifier(Arc::new(RecordingNotifier::new("rec")));
        for name in ["one", "two", "three"] {
            engine
                .add_rule(AlertRule::new(name, "cpu_usage", Comparator::GreaterThan, 50.0).with_notifier("rec"))
                .unwrap();
        }

        let events = engine.check_alerts(&[cpu(90.0, &clock)]);
        assert_eq!(events.len(), 3);
        assert_eq!(engine.alert_history(10).len(), 3);

        let stats = engine.dispatch_stats();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.dropped, 2);
    }

    #[test]
    fn test_history_is_bounded_and_limited() {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = AlertEngine::new(3, AlertDispatcher::new(4, Duration::from_secs(1)))
            .with_clock(clock.clone());
        engine
            .add_rule(AlertRule::new("high_cpu", "cpu_usage", Comparator::GreaterThan, 80.0))
            .unwrap();

        for _ in 0..4 {
            engine.check_alerts(&[cpu(90.0, &clock)]);
            clock.advance(Duration::from_secs(1));
            engine.check_alerts(&[cpu(10.0, &clock)]);
            clock.advance(Duration::from_secs(1));
        }

        assert_eq!(engine.alert_history(100).len(), 3);
        let last = engine.alert_history(1);
        assert_eq!(kinds(&last), vec![("high_cpu", AlertEventKind::Resolved)]);
        assert!(engine.alert_history(0).is_empty());
    }

    #[test]
    fn test_rule_from_config() {
        let config = AlertRuleConfig {
            name: "slow_checkout".into(),
            metric: "response_time".into(),
            condition: ">".into(),
            threshold: 750.0,
            duration_secs: 10,
            severity: "critical".into(),
            enabled: true,
            notifier: Some("log".into()),
        };
        let rule = AlertRule::try_from(&config).unwrap();
        assert_eq!(rule.comparator, Comparator::GreaterThan);
        assert_eq!(rule.min_duration, Duration::from_secs(10));
        assert_eq!(rule.severity, Severity::Critical);

        let bad = AlertRuleConfig {
            severity: "urgent".into(),
            ..config
        };
        assert!(matches!(AlertRule::try_from(&bad), Err(RuleError::InvalidRule { .. })));
    }

    #[test]
    fn test_default_rules_are_valid_and_unique() {
        let engine = AlertEngine::new(10, AlertDispatcher::new(4, Duration::from_secs(1)));
        for rule in AlertRule::default_rules() {
            engine.add_rule(rule).unwrap();
        }
        let rules = engine.rules();
        assert_eq!(rules.len(), 5);
        let disk = rules.iter().find(|r| r.metric == "disk_usage").unwrap();
        assert_eq!(disk.severity, Severity::Critical);
        assert_eq!(disk.min_duration, Duration::from_secs(300));
    }
}
