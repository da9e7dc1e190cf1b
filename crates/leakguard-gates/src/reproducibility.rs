//! # Reproducibility Tracker
//!
//! Compare-then-persist: each run is compared to the previous run of the same
//! (stage, item) and then appended to the history, whatever the outcome.
//!
//! A run is reproducible iff mean score, composite score and mean importance
//! each moved by strictly less than their tolerance. The std-dev diff is
//! reported but does not take part in the verdict.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::history::{Metrics, RunHistoryStore, RunRecord};

pub const MEAN_SCORE: &str = "mean_score";
pub const STD_SCORE: &str = "std_score";
pub const MEAN_IMPORTANCE: &str = "mean_importance";
pub const COMPOSITE_SCORE: &str = "composite_score";
pub const METRIC_NAME: &str = "metric_name";

const DEFAULT_METRIC_NAME: &str = "Score";

/// Comparison tolerances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReproducibilityConfig {
    /// Applies to mean and composite score
    #[serde(default = "default_score_tolerance")]
    pub score_tolerance: f64,

    #[serde(default = "default_importance_tolerance")]
    pub importance_tolerance: f64,
}

fn default_score_tolerance() -> f64 {
    0.001
}
fn default_importance_tolerance() -> f64 {
    0.01
}

impl Default for ReproducibilityConfig {
    fn default() -> Self {
        Self {
            score_tolerance: default_score_tolerance(),
            importance_tolerance: default_importance_tolerance(),
        }
    }
}

/// Verdict of one comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReproducibilityStatus {
    FirstRun,
    Reproducible,
    Divergent,
}

impl fmt::Display for ReproducibilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReproducibilityStatus::FirstRun => write!(f, "first_run"),
            ReproducibilityStatus::Reproducible => write!(f, "reproducible"),
            ReproducibilityStatus::Divergent => write!(f, "divergent"),
        }
    }
}

/// The four compared summary values of one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub mean_score: f64,
    pub std_score: f64,
    pub mean_importance: f64,
    pub composite_score: f64,
}

impl MetricSnapshot {
    /// Missing values read as 0.0; composite score falls back to mean score.
    pub fn from_metrics(metrics: &Metrics) -> Self {
        let get = |name: &str| metrics.get(name).and_then(|v| v.as_f64());
        let mean_score = get(MEAN_SCORE).unwrap_or(0.0);
        Self {
            mean_score,
            std_score: get(STD_SCORE).unwrap_or(0.0),
            mean_importance: get(MEAN_IMPORTANCE).unwrap_or(0.0),
            composite_score: get(COMPOSITE_SCORE).unwrap_or(mean_score),
        }
    }

    pub fn from_record(record: &RunRecord) -> Self {
        Self::from_metrics(&record.metrics)
    }
}

/// Differences, current vs previous. The diffs are absolute; the percent
/// changes keep their sign.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricDiffs {
    pub mean_score: f64,
    pub std_score: f64,
    pub mean_importance: f64,
    pub composite_score: f64,
    /// Signed relative mean-score change in percent, 0 when the previous value is 0
    pub mean_score_pct: f64,
    /// Signed relative composite-score change in percent, 0 when the previous value is 0
    pub composite_score_pct: f64,
}

impl MetricDiffs {
    pub fn between(previous: &MetricSnapshot, current: &MetricSnapshot) -> Self {
        Self {
            mean_score: (current.mean_score - previous.mean_score).abs(),
            std_score: (current.std_score - previous.std_score).abs(),
            mean_importance: (current.mean_importance - previous.mean_importance).abs(),
            composite_score: (current.composite_score - previous.composite_score).abs(),
            mean_score_pct: pct_change(previous.mean_score, current.mean_score),
            composite_score_pct: pct_change(previous.composite_score, current.composite_score),
        }
    }

    /// Strict `<` on every tolerance.
    pub fn within(&self, config: &ReproducibilityConfig) -> bool {
        self.mean_score < config.score_tolerance
            && self.composite_score < config.score_tolerance
            && self.mean_importance < config.importance_tolerance
    }
}

fn pct_change(previous: f64, current: f64) -> f64 {
    if previous != 0.0 {
        (current - previous) / previous.abs() * 100.0
    } else {
        0.0
    }
}

/// Outcome of comparing one run with its predecessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub stage: String,
    pub item_name: String,
    /// Display name of the score metric
    pub metric_name: String,
    pub status: ReproducibilityStatus,
    pub current: MetricSnapshot,
    pub previous: Option<MetricSnapshot>,
    pub diffs: Option<MetricDiffs>,
    /// Whether the current run made it into the history
    pub persisted: bool,
}

impl ComparisonReport {
    pub fn is_first_run(&self) -> bool {
        self.status == ReproducibilityStatus::FirstRun
    }

    pub fn is_reproducible(&self) -> bool {
        self.status == ReproducibilityStatus::Reproducible
    }

    pub fn is_divergent(&self) -> bool {
        self.status == ReproducibilityStatus::Divergent
    }
}

/// Classify `current` against an optional previous record. No I/O.
pub fn classify(
    stage: &str,
    item_name: &str,
    previous: Option<&RunRecord>,
    metrics: &Metrics,
    config: &ReproducibilityConfig,
) -> ComparisonReport {
    let current = MetricSnapshot::from_metrics(metrics);
    let metric_name = metrics
        .get(METRIC_NAME)
        .and_then(|v| match v {
            crate::MetricValue::Text(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_else(|| DEFAULT_METRIC_NAME.to_string());

    let (status, previous, diffs) = match previous {
        None => (ReproducibilityStatus::FirstRun, None, None),
        Some(record) => {
            let previous = MetricSnapshot::from_record(record);
            let diffs = MetricDiffs::between(&previous, &current);
            let status = if diffs.within(config) {
                ReproducibilityStatus::Reproducible
            } else {
                ReproducibilityStatus::Divergent
            };
            (status, Some(previous), Some(diffs))
        }
    };

    ComparisonReport {
        stage: stage.to_string(),
        item_name: item_name.to_string(),
        metric_name,
        status,
        current,
        previous,
        diffs,
        persisted: false,
    }
}

/// Reproducibility tracker bound to one history store.
#[derive(Debug, Clone)]
pub struct ReproducibilityTracker {
    store: RunHistoryStore,
    config: ReproducibilityConfig,
}

impl ReproducibilityTracker {
    pub fn new(store: RunHistoryStore, config: ReproducibilityConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &RunHistoryStore {
        &self.store
    }

    pub fn config(&self) -> &ReproducibilityConfig {
        &self.config
    }

    /// Compare with the previous run, then persist this one.
    pub fn compare(
        &self,
        stage: &str,
        item_name: &str,
        metrics: &Metrics,
        additional_data: Option<serde_json::Value>,
    ) -> ComparisonReport {
        let previous = self.store.load_previous(stage, item_name);
        let mut report = classify(stage, item_name, previous.as_ref(), metrics, &self.config);
        log_report(&report);
        report.persisted = self
            .store
            .save(stage, item_name, metrics, additional_data)
            .is_some();
        report
    }
}

fn log_report(report: &ComparisonReport) {
    let (previous, diffs) = match (&report.previous, &report.diffs) {
        (Some(p), Some(d)) => (p, d),
        _ => {
            info!(
                stage = %report.stage,
                item = %report.item_name,
                metric = %report.metric_name,
                mean_score = report.current.mean_score,
                composite_score = report.current.composite_score,
                "First run for this item, no previous run to compare"
            );
            return;
        }
    };

    if report.is_reproducible() {
        info!(
            stage = %report.stage,
            item = %report.item_name,
            metric = %report.metric_name,
            previous = previous.mean_score,
            current = report.current.mean_score,
            diff = diffs.mean_score,
            pct = diffs.mean_score_pct,
            "Reproducible: within tolerance"
        );
    } else {
        warn!(
            stage = %report.stage,
            item = %report.item_name,
            metric = %report.metric_name,
            previous_mean = previous.mean_score,
            current_mean = report.current.mean_score,
            mean_diff = diffs.mean_score,
            mean_pct = diffs.mean_score_pct,
            composite_diff = diffs.composite_score,
            composite_pct = diffs.composite_score_pct,
            importance_diff = diffs.mean_importance,
            std_diff = diffs.std_score,
            "Divergent: results differ from previous run"
        );
    }
}
