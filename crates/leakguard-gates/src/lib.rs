//! # Leakguard Gates
//!
//! Adaptive governance for a recurring training pipeline.
//!
//! ## Components
//! - **RunHistoryStore**: bounded per-cohort run history, one JSON document per output directory
//! - **ReproducibilityTracker**: compare-then-persist against the previous run
//! - **DecisionPolicy / DecisionEngine**: fixed policy catalog over cohort history
//! - **ConfigPatcher**: copy-on-write config patches from triggered actions
//! - **GovernanceCycle**: the per-run flow tying the above to leakage filtering
//!
//! ## Usage
//! ```ignore
//! use leakguard_gates::{GovernanceConfig, GovernanceCycle, RunInput};
//!
//! let cycle = GovernanceCycle::new(output_dir, exclusion, GovernanceConfig::default());
//! let features = cycle.prepare_features("fwd_ret_60m", &columns);
//! // ... train ...
//! let run = RunInput::new("target_ranking", "fwd_ret_60m", metrics);
//! let conclusion = cycle.conclude_run(run, &resolved)?;
//! let next_config = conclusion.patch.config;
//! ```

pub mod config;
pub mod cycle;
pub mod engine;
pub mod history;
pub mod patch;
pub mod policies;
pub mod reproducibility;

pub use config::GovernanceConfig;
pub use cycle::{GovernanceCycle, RunConclusion, RunInput};
pub use engine::{DECISION_RESULT_SCHEMA, DecisionEngine, DecisionResult};
pub use history::{
    CohortHistory, HistoryConfig, MetricValue, Metrics, RunHistoryStore, RunRecord, history_key,
};
pub use patch::{
    ConfigPatch, ConfigPatcher, FeatureCapConfig, PatchBuilder, PatchOutcome, RoutingTightening,
};
pub use policies::{
    DecisionAction, DecisionPolicy, PolicyError, PolicyEvaluation, evaluate_policies,
};
pub use reproducibility::{
    ComparisonReport, MetricDiffs, MetricSnapshot, ReproducibilityConfig, ReproducibilityStatus,
    ReproducibilityTracker,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Checks recorded while concluding one run, keyed
/// `governance:<stage>:<item>`. Fails as soon as any check fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub gate: String,
    pub passed: bool,
    pub timestamp: DateTime<Utc>,
    /// In recording order
    pub checks: Vec<CheckResult>,
    pub summary: String,
    /// Wall time spent concluding the run
    pub duration_ms: u64,
}

impl GateResult {
    pub fn new(gate: impl Into<String>) -> Self {
        Self {
            gate: gate.into(),
            passed: true,
            timestamp: Utc::now(),
            checks: Vec::new(),
            summary: String::new(),
            duration_ms: 0,
        }
    }

    pub fn add_check(&mut self, check: CheckResult) {
        self.passed &= check.passed;
        self.checks.push(check);
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    /// Names of the failed checks, in recording order.
    pub fn failed_checks(&self) -> impl Iterator<Item = &str> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// One named governance check. `metrics` carries the numbers behind the
/// verdict (diffs, decision fields, changed config paths).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, true, message)
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, false, message)
    }

    fn new(name: impl Into<String>, passed: bool, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            message: message.into(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: serde_json::Value) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Governance error.
#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Exclusion config error: {0}")]
    Guard(#[from] leakguard_core::GuardError),

    #[error("Timed out waiting for history lock: {0:?}")]
    LockTimeout(PathBuf),

    #[error("Config patch conflict at {path}: expected {expected}, found {found}")]
    PatchConflict {
        path: String,
        expected: &'static str,
        found: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_result_fails_on_any_failed_check() {
        let mut result = GateResult::new("governance:test");
        result.add_check(CheckResult::pass("a", "ok"));
        assert!(result.passed);
        result.add_check(CheckResult::fail("b", "bad"));
        assert!(!result.passed);
        result.add_check(CheckResult::pass("c", "ok"));
        assert!(!result.passed);
        assert_eq!(result.passed_count(), 2);
        assert_eq!(result.failed_checks().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(result.check("b").map(|c| c.passed), Some(false));
    }
}
