// ============================================================================
// PERFORMANCE ANALYSIS
// ============================================================================
// Stateless batch statistics over a sample window:
// - Per-metric count / average / min / max
// - Least-squares trend over sample index
// - Coefficient of variation for stability
// - Fixed scoring table and recommendation lookup
//
// An empty window is a `NoData` report with an undefined score, never 0.
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::types::{MetricSample, Timestamp};

/// Slopes inside this band count as flat.
pub const TREND_EPSILON: f64 = 0.01;
/// CV below this is stable.
pub const STABLE_CV: f64 = 0.1;
/// CV below this (and at least `STABLE_CV`) is unstable.
pub const UNSTABLE_CV: f64 = 0.3;

// ----------------------------------------------------------------------------
// Classifications
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::Stable => "stable",
            Trend::InsufficientData => "insufficient_data",
        }
    }
}

impl Display for Trend {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    Stable,
    Unstable,
    HighlyUnstable,
}

impl Stability {
    pub fn from_cv(cv: f64) -> Self {
        if cv < STABLE_CV {
            Stability::Stable
        } else if cv < UNSTABLE_CV {
            Stability::Unstable
        } else {
            Stability::HighlyUnstable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stability::Stable => "stable",
            Stability::Unstable => "unstable",
            Stability::HighlyUnstable => "highly_unstable",
        }
    }
}

impl Display for Stability {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Ok,
    NoData,
}

// ----------------------------------------------------------------------------
// Report Types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
    pub duration: Duration,
}

/// Statistics for one metric in the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub name: String,
    pub count: usize,
    /// Rounded to 2 decimals, as are `minimum` and `maximum`
    pub average: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub trend: Trend,
    pub stability: Stability,
    /// Rounded to 3 decimals
    pub coefficient_of_variation: f64,
    /// `None` for metrics without a scoring entry
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub metric: String,
    pub message: String,
}

impl Recommendation {
    fn new(metric: &str, message: &str) -> Self {
        Self {
            metric: metric.into(),
            message: message.into(),
        }
    }
}

/// Output of one `Analyzer::analyze` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub status: ReportStatus,
    pub generated_at: Timestamp,
    pub samples_analyzed: usize,
    pub time_range: Option<TimeRange>,
    /// In order of first appearance in the window
    pub summaries: Vec<MetricSummary>,
    pub recommendations: Vec<Recommendation>,
    /// Mean of the defined per-metric scores; `None` when there are none
    pub score: Option<f64>,
}

impl AnalysisReport {
    fn no_data(generated_at: Timestamp) -> Self {
        Self {
            status: ReportStatus::NoData,
            generated_at,
            samples_analyzed: 0,
            time_range: None,
            summaries: Vec::new(),
            recommendations: Vec::new(),
            score: None,
        }
    }

    pub fn is_no_data(&self) -> bool {
        self.status == ReportStatus::NoData
    }

    pub fn summary(&self, metric: &str) -> Option<&MetricSummary> {
        self.summaries.iter().find(|s| s.name == metric)
    }
}

impl Display for AnalysisReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Performance Report")?;
        writeln!(f, "{}", "=".repeat(50))?;
        writeln!(f, "Generated: {}", self.generated_at)?;

        if self.is_no_data() {
            writeln!(f, "Status: no_data")?;
            return write!(f, "Performance score: n/a");
        }

        writeln!(f, "Samples analyzed: {}", self.samples_analyzed)?;
        match &self.time_range {
            Some(range) => writeln!(
                f,
                "Time range: {:.1} minutes",
                range.duration.as_secs_f64() / 60.0
            )?,
            None => writeln!(f, "Time range: n/a")?,
        }
        match self.score {
            Some(score) => writeln!(f, "Performance score: {:.1}/100", score)?,
            None => writeln!(f, "Performance score: n/a")?,
        }

        writeln!(f)?;
        writeln!(f, "Metric summary:")?;
        for summary in &self.summaries {
            write!(
                f,
                "  {}: avg {}, trend {}, {}",
                summary.name, summary.average, summary.trend, summary.stability
            )?;
            if let Some(score) = summary.score {
                write!(f, " (score: {:.1})", score)?;
            }
            writeln!(f)?;
        }

        writeln!(f)?;
        if self.recommendations.is_empty() {
            write!(f, "No recommendations, system looks healthy")
        } else {
            write!(f, "Recommendations:")?;
            for (i, rec) in self.recommendations.iter().enumerate() {
                write!(f, "\n  {}. {}", i + 1, rec.message)?;
            }
            Ok(())
        }
    }
}

// ----------------------------------------------------------------------------
// Analyzer
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct Analyzer;

impl Analyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, samples: &[MetricSample]) -> AnalysisReport {
        let generated_at = Timestamp::now();
        if samples.is_empty() {
            return AnalysisReport::no_data(generated_at);
        }

        // Group values by metric, remembering first-appearance order.
        let mut order: Vec<&str> = Vec::new();
        let mut groups: AHashMap<&str, Vec<f64>> = AHashMap::new();
        for sample in samples {
            groups
                .entry(sample.name())
                .or_insert_with(|| {
                    order.push(sample.name());
                    Vec::new()
                })
                .push(sample.value());
        }

        let summaries: Vec<MetricSummary> = order
            .iter()
            .filter_map(|name| groups.get(name).map(|values| summarize(name, values)))
            .collect();

        let recommendations = summaries.iter().flat_map(recommend).collect();

        let scores: Vec<f64> = summaries.iter().filter_map(|s| s.score).collect();
        let score = (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);

        AnalysisReport {
            status: ReportStatus::Ok,
            generated_at,
            samples_analyzed: samples.len(),
            time_range: time_range(samples),
            summaries,
            recommendations,
            score,
        }
    }
}

fn summarize(name: &str, values: &[f64]) -> MetricSummary {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let minimum = values.iter().copied().fold(f64::INFINITY, f64::min);
    let maximum = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let cv = coefficient_of_variation(values, mean);
    let average = round_to(mean, 2);

    MetricSummary {
        name: name.to_string(),
        count: values.len(),
        average,
        minimum: round_to(minimum, 2),
        maximum: round_to(maximum, 2),
        trend: trend(values),
        stability: Stability::from_cv(cv),
        coefficient_of_variation: round_to(cv, 3),
        score: metric_score(name, average),
    }
}

fn time_range(samples: &[MetricSample]) -> Option<TimeRange> {
    let start = samples.iter().map(|s| s.timestamp()).min()?;
    let end = samples.iter().map(|s| s.timestamp()).max()?;
    Some(TimeRange {
        start,
        end,
        duration: end.duration_since(start),
    })
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Least-squares trend of `values` against their index.
pub fn trend(values: &[f64]) -> Trend {
    if values.len() < 2 {
        return Trend::InsufficientData;
    }

    let n = values.len() as f64;
    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for (i, &y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let slope = (n * sum_xy - sum_x * sum_y) / (n * sum_xx - sum_x * sum_x);
    if slope.abs() < TREND_EPSILON {
        Trend::Stable
    } else if slope > 0.0 {
        Trend::Increasing
    } else {
        Trend::Decreasing
    }
}

/// Population std-dev over mean; 0 when the mean is not positive.
pub fn coefficient_of_variation(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() || mean <= 0.0 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt() / mean
}

/// Score for a metric's average, for metrics with a scoring entry.
pub fn metric_score(metric: &str, average: f64) -> Option<f64> {
    let brackets: &[(f64, f64)] = match metric {
        "cpu_usage" => &[(50.0, 100.0), (70.0, 80.0), (85.0, 60.0)],
        "memory_usage" => &[(60.0, 100.0), (75.0, 80.0), (90.0, 60.0)],
        "response_time" => &[(100.0, 100.0), (300.0, 80.0), (500.0, 60.0), (1000.0, 40.0)],
        "error_rate" => &[(0.1, 100.0), (1.0, 80.0), (3.0, 60.0), (5.0, 40.0)],
        _ => return None,
    };
    let floor = match metric {
        "cpu_usage" | "memory_usage" => 30.0,
        _ => 20.0,
    };

    Some(
        brackets
            .iter()
            .find(|(limit, _)| average < *limit)
            .map_or(floor, |(_, score)| *score),
    )
}

fn recommend(summary: &MetricSummary) -> Vec<Recommendation> {
    let name = summary.name.as_str();
    let avg = summary.average;
    let mut out = Vec::new();
    let mut add = |message: &str| out.push(Recommendation::new(name, message));

    match name {
        "cpu_usage" => {
            if avg > 80.0 {
                add("CPU usage is high: optimize hot code paths or add capacity");
            }
            if summary.trend == Trend::Increasing {
                add("CPU usage is trending up: watch for performance bottlenecks");
            }
            if summary.stability == Stability::HighlyUnstable {
                add("CPU usage fluctuates heavily: check for runaway processes");
            }
        }
        "memory_usage" => {
            if avg > 85.0 {
                add("Memory usage is high: add memory or reduce footprint");
            }
            if summary.trend == Trend::Increasing {
                add("Memory usage keeps rising: check for leaks");
            }
        }
        "response_time" => {
            if avg > 500.0 {
                add("Responses are slow: optimize database queries and request handling");
            }
            if avg > 200.0 {
                add("Consider adding a cache layer to cut response times");
            }
            if summary.stability == Stability::Unstable {
                add("Response times are erratic: check network and server load");
            }
        }
        "error_rate" => {
            if avg > 1.0 {
                add("Error rate is elevated: review application logs and error handling");
            }
            if summary.trend == Trend::Increasing {
                add("Error rate is rising: check system health now");
            }
        }
        "disk_usage" => {
            if avg > 90.0 {
                add("Disk almost full: clean up logs or expand storage");
            } else if avg > 80.0 {
                add("Disk usage is high: schedule regular cleanup");
            }
        }
        _ => {}
    }

    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn series(name: &str, values: &[f64]) -> Vec<MetricSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| MetricSample::new(name, v, "unit").at(Timestamp::from_secs(1_000 + i as i64 * 5)))
            .collect()
    }

    fn messages(report: &AnalysisReport) -> Vec<&str> {
        report.recommendations.iter().map(|r| r.message.as_str()).collect()
    }

    #[test_case("cpu_usage", 49.99 => Some(100.0) ; "cpu idle")]
    #[test_case("cpu_usage", 70.0 => Some(60.0) ; "cpu bracket edge")]
    #[test_case("cpu_usage", 85.0 => Some(30.0) ; "cpu saturated")]
    #[test_case("memory_usage", 74.0 => Some(80.0) ; "memory moderate")]
    #[test_case("memory_usage", 95.0 => Some(30.0) ; "memory exhausted")]
    #[test_case("response_time", 250.0 => Some(80.0) ; "latency ok")]
    #[test_case("response_time", 999.0 => Some(40.0) ; "latency slow")]
    #[test_case("response_time", 1500.0 => Some(20.0) ; "latency terrible")]
    #[test_case("error_rate", 0.05 => Some(100.0) ; "errors negligible")]
    #[test_case("error_rate", 0.5 => Some(80.0) ; "errors below one percent")]
    #[test_case("error_rate", 7.0 => Some(20.0) ; "errors severe")]
    #[test_case("disk_usage", 50.0 => None ; "unscored metric")]
    fn test_metric_score(metric: &str, average: f64) -> Option<f64> {
        metric_score(metric, average)
    }

    #[test_case(&[10.0, 20.0, 30.0, 40.0, 50.0] => Trend::Increasing ; "rising")]
    #[test_case(&[50.0, 40.0, 30.0, 20.0, 10.0] => Trend::Decreasing ; "falling")]
    #[test_case(&[5.0, 5.001, 5.0, 5.001] => Trend::Stable ; "flat within epsilon")]
    #[test_case(&[42.0] => Trend::InsufficientData ; "single value")]
    #[test_case(&[] => Trend::InsufficientData ; "empty")]
    fn test_trend(values: &[f64]) -> Trend {
        trend(values)
    }

    #[test]
    fn test_empty_input_is_no_data() {
        let report = Analyzer::new().analyze(&[]);

        assert!(report.is_no_data());
        assert!(report.summaries.is_empty());
        assert!(report.recommendations.is_empty());
        assert_eq!(report.score, None);
        assert!(report.to_string().contains("Performance score: n/a"));
    }

    #[test]
    fn test_increasing_series_summary() {
        let report = Analyzer::new().analyze(&series("cpu_usage", &[10.0, 20.0, 30.0, 40.0, 50.0]));
        let cpu = report.summary("cpu_usage").unwrap();

        assert_eq!(report.status, ReportStatus::Ok);
        assert_eq!(cpu.count, 5);
        assert_eq!(cpu.average, 30.0);
        assert_eq!(cpu.minimum, 10.0);
        assert_eq!(cpu.maximum, 50.0);
        assert_eq!(cpu.trend, Trend::Increasing);
        assert_eq!(cpu.coefficient_of_variation, 0.471);
        assert_eq!(cpu.stability, Stability::HighlyUnstable);
        assert_eq!(cpu.score, Some(100.0));
        assert_eq!(
            messages(&report),
            vec![
                "CPU usage is trending up: watch for performance bottlenecks",
                "CPU usage fluctuates heavily: check for runaway processes",
            ]
        );
    }

    #[test]
    fn test_error_rate_half_percent_scores_80() {
        let report = Analyzer::new().analyze(&series("error_rate", &[0.4, 0.5, 0.6, 0.5]));
        assert_eq!(report.summary("error_rate").unwrap().score, Some(80.0));
        assert_eq!(report.score, Some(80.0));
    }

    #[test]
    fn test_aggregate_ignores_unscored_metrics() {
        let mut samples = series("cpu_usage", &[40.0, 40.0]);
        samples.extend(series("disk_usage", &[50.0, 50.0]));
        samples.extend(series("error_rate", &[0.5, 0.5]));

        let report = Analyzer::new().analyze(&samples);
        assert_eq!(report.summary("disk_usage").unwrap().score, None);
        assert_eq!(report.score, Some(90.0));
    }

    #[test]
    fn test_only_unscored_metrics_yield_undefined_score() {
        let report = Analyzer::new().analyze(&series("process_count", &[120.0, 130.0]));
        assert_eq!(report.status, ReportStatus::Ok);
        assert_eq!(report.score, None);
        assert!(report.to_string().contains("Performance score: n/a"));
    }

    #[test]
    fn test_summaries_keep_first_appearance_order() {
        let samples = vec![
            MetricSample::new("memory_usage", 50.0, "percent"),
            MetricSample::new("cpu_usage", 10.0, "percent"),
            MetricSample::new("memory_usage", 52.0, "percent"),
            MetricSample::new("response_time", 80.0, "ms"),
        ];
        let report = Analyzer::new().analyze(&samples);
        let names: Vec<_> = report.summaries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["memory_usage", "cpu_usage", "response_time"]);
    }

    #[test]
    fn test_rounding_and_time_range() {
        let mut samples = series("memory_usage", &[1.0, 2.0, 2.0]);
        samples.reverse();

        let report = Analyzer::new().analyze(&samples);
        let summary = report.summary("memory_usage").unwrap();
        assert_eq!(summary.average, 1.67);

        let range = report.time_range.unwrap();
        assert_eq!(range.start, Timestamp::from_secs(1_000));
        assert_eq!(range.end, Timestamp::from_secs(1_010));
        assert_eq!(range.duration, Duration::from_secs(10));
    }

    #[test]
    fn test_flat_zero_series_has_zero_cv() {
        let report = Analyzer::new().analyze(&series("error_rate", &[0.0, 0.0, 0.0]));
        let summary = report.summary("error_rate").unwrap();
        assert_eq!(summary.coefficient_of_variation, 0.0);
        assert_eq!(summary.stability, Stability::Stable);
        assert_eq!(summary.trend, Trend::Stable);
    }

    #[test_case("disk_usage", &[95.0, 95.0] => vec!["Disk almost full: clean up logs or expand storage"] ; "disk critical")]
    #[test_case("disk_usage", &[85.0, 85.0] => vec!["Disk usage is high: schedule regular cleanup"] ; "disk high")]
    #[test_case("disk_usage", &[40.0, 40.0] => Vec::<&str>::new() ; "disk fine")]
    #[test_case("memory_usage", &[90.0, 90.0] => vec!["Memory usage is high: add memory or reduce footprint"] ; "memory high")]
    #[test_case("response_time", &[700.0, 500.0, 700.0, 500.0] => vec![
        "Responses are slow: optimize database queries and request handling",
        "Consider adding a cache layer to cut response times",
        "Response times are erratic: check network and server load",
    ] ; "slow and erratic responses")]
    #[test_case("error_rate", &[1.0, 2.0, 3.0] => vec![
        "Error rate is elevated: review application logs and error handling",
        "Error rate is rising: check system health now",
    ] ; "rising errors")]
    fn test_recommendations(metric: &str, values: &[f64]) -> Vec<String> {
        let report = Analyzer::new().analyze(&series(metric, values));
        messages(&report).into_iter().map(String::from).collect()
    }

    #[test]
    fn test_report_display() {
        let mut samples = series("cpu_usage", &[40.0, 40.0]);
        samples.extend(series("disk_usage", &[95.0, 95.0]));
        let text = Analyzer::new().analyze(&samples).to_string();

        assert!(text.starts_with("Performance Report\n"));
        assert!(text.contains("Samples analyzed: 4"));
        assert!(text.contains("Performance score: 100.0/100"));
        assert!(text.contains("  cpu_usage: avg 40, trend stable, stable (score: 100.0)"));
        assert!(text.contains("  disk_usage: avg 95, trend stable, stable\n"));
        assert!(text.contains("  1. Disk almost full"));
    }
}
