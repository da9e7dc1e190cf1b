//! # Governance Cycle
//!
//! One pipeline run, end to end:
//! 1. [`GovernanceCycle::prepare_features`] before the feature matrix is built
//! 2. [`GovernanceCycle::check_time_contract`] during label construction
//! 3. [`GovernanceCycle::conclude_run`] after the stage completes: compare and
//!    persist, evaluate the cohort, patch the config for the next run
//!
//! The conclusion is summarised as a [`GateResult`]. Nothing here aborts the
//! pipeline; a failed check is information for the caller.

use leakguard_core::{
    ExclusionConfig, FilterReport, LeakageFilter, TimeContract, validate_label_start,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::GovernanceConfig;
use crate::engine::{DecisionEngine, DecisionResult};
use crate::history::{CohortHistory, Metrics, RunHistoryStore, RunRecord};
use crate::patch::{ConfigPatcher, PatchOutcome};
use crate::reproducibility::{ComparisonReport, ReproducibilityTracker};
use crate::{CheckResult, GateResult, GovernanceError};

pub mod check_names {
    pub const LABEL_CONTRACT: &str = "label_contract";
    pub const REPRODUCIBILITY: &str = "reproducibility";
    pub const HISTORY_PERSISTED: &str = "history_persisted";
    pub const DECISION_POLICIES: &str = "decision_policies";
    pub const CONFIG_PATCH: &str = "config_patch";
}

/// Metrics of one completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInput {
    pub stage: String,
    pub item_name: String,
    pub metrics: Metrics,
    #[serde(default)]
    pub additional_data: Option<serde_json::Value>,
}

impl RunInput {
    pub fn new(stage: impl Into<String>, item_name: impl Into<String>, metrics: Metrics) -> Self {
        Self {
            stage: stage.into(),
            item_name: item_name.into(),
            metrics,
            additional_data: None,
        }
    }

    pub fn with_additional_data(mut self, data: serde_json::Value) -> Self {
        self.additional_data = Some(data);
        self
    }
}

/// Everything decided at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConclusion {
    pub comparison: ComparisonReport,
    pub decision: DecisionResult,
    /// Config for the next run
    pub patch: PatchOutcome,
    pub gate: GateResult,
}

/// Governance components bound to one output directory.
#[derive(Debug, Clone)]
pub struct GovernanceCycle {
    exclusion: ExclusionConfig,
    config: GovernanceConfig,
    tracker: ReproducibilityTracker,
    engine: DecisionEngine,
    patcher: ConfigPatcher,
}

impl GovernanceCycle {
    pub fn new(
        output_dir: impl AsRef<Path>,
        exclusion: ExclusionConfig,
        config: GovernanceConfig,
    ) -> Self {
        let store = RunHistoryStore::with_config(output_dir, &config.history);
        let tracker = ReproducibilityTracker::new(store, config.reproducibility);
        let patcher = ConfigPatcher::new(config.routing, config.features);
        Self {
            exclusion,
            config,
            tracker,
            engine: DecisionEngine::new(),
            patcher,
        }
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn exclusion(&self) -> &ExclusionConfig {
        &self.exclusion
    }

    pub fn store(&self) -> &RunHistoryStore {
        self.tracker.store()
    }

    /// Leakage filter using the configured overlap band.
    pub fn leakage_filter(&self) -> LeakageFilter<'_> {
        LeakageFilter::new(&self.exclusion).with_band(self.config.overlap)
    }

    /// Safe features for `target`.
    pub fn prepare_features<S: AsRef<str>>(&self, target: &str, columns: &[S]) -> FilterReport {
        self.leakage_filter().filter_with_report(columns, target)
    }

    /// Log the contract and check that the label window for `current_bar_idx`
    /// starts after it.
    pub fn check_time_contract(
        &self,
        target: &str,
        contract: &TimeContract,
        current_bar_idx: usize,
        horizon_bars: usize,
    ) -> CheckResult {
        contract.log_contract(target);
        let window = contract.label_window(current_bar_idx, horizon_bars);
        let metrics = json!({
            "current_bar": current_bar_idx,
            "label_start": window.start,
            "label_end": window.end,
        });
        let check = if validate_label_start(current_bar_idx, window.start) {
            CheckResult::pass(
                check_names::LABEL_CONTRACT,
                format!(
                    "Label window [{}, {}) starts after bar {}",
                    window.start, window.end, current_bar_idx
                ),
            )
        } else {
            CheckResult::fail(
                check_names::LABEL_CONTRACT,
                format!(
                    "Label starts at {} ({}), inside decision bar {}",
                    window.start, contract.label_starts_at, current_bar_idx
                ),
            )
        };
        check.with_metrics(metrics)
    }

    /// Compare and persist the run, evaluate its cohort, and patch `resolved`
    /// for the next run.
    ///
    /// The current run always takes part in the decision, even when it could
    /// not be written to history. A patch that does not fit `resolved` fails
    /// the `config_patch` check and leaves the config as it was.
    pub fn conclude_run(
        &self,
        run: RunInput,
        resolved: &serde_json::Value,
    ) -> Result<RunConclusion, GovernanceError> {
        let start = Instant::now();
        let mut gate = GateResult::new(format!("governance:{}:{}", run.stage, run.item_name));

        let comparison = self.tracker.compare(
            &run.stage,
            &run.item_name,
            &run.metrics,
            run.additional_data.clone(),
        );
        gate.add_check(reproducibility_check(&comparison));
        gate.add_check(if comparison.persisted {
            CheckResult::pass(check_names::HISTORY_PERSISTED, "Run appended to history")
        } else {
            CheckResult::fail(
                check_names::HISTORY_PERSISTED,
                format!("Run not persisted to {:?}", self.store().log_file()),
            )
        });

        let cohort = self.decision_cohort(&run, comparison.persisted);
        let decision = self.engine.evaluate(&cohort);
        gate.add_check(decision_check(&decision));

        let patch = match self.patcher.apply(resolved, &decision) {
            Ok(patch) => {
                let changed: Vec<&str> = patch.patch.paths().collect();
                let message = if changed.is_empty() {
                    "No config changes".to_string()
                } else {
                    format!("Changed: {}", changed.join(", "))
                };
                gate.add_check(
                    CheckResult::pass(check_names::CONFIG_PATCH, message)
                        .with_metrics(serde_json::to_value(&patch.patch)?),
                );
                patch
            }
            Err(e) => {
                warn!(cohort = %decision.cohort_key, error = %e, "Config patch not applied");
                let message = format!("Patch not applied: {}", e);
                gate.add_check(
                    CheckResult::fail(check_names::CONFIG_PATCH, message)
                        .with_metrics(json!({ "actions": decision.decision_action_mask })),
                );
                PatchOutcome::unchanged(resolved)
            }
        };

        gate.duration_ms = start.elapsed().as_millis() as u64;
        let failed: Vec<&str> = gate.failed_checks().collect();
        gate.summary = format!(
            "{}/{} checks passed, status {}, decision level {}{}",
            gate.passed_count(),
            gate.checks.len(),
            comparison.status,
            decision.decision_level,
            if failed.is_empty() {
                String::new()
            } else {
                format!(", failed: {}", failed.join(", "))
            }
        );
        info!(
            gate = %gate.gate,
            passed = gate.passed,
            summary = %gate.summary,
            "Governance cycle complete"
        );

        Ok(RunConclusion {
            comparison,
            decision,
            patch,
            gate,
        })
    }

    /// Stored cohort, plus the current run when it did not reach the store.
    fn decision_cohort(&self, run: &RunInput, persisted: bool) -> CohortHistory {
        let mut cohort = self.store().load_cohort(&run.stage, &run.item_name);
        if !persisted {
            cohort.records.push(
                RunRecord::new(&run.stage, &run.item_name, &run.metrics)
                    .with_additional_data(run.additional_data.clone()),
            );
            let max = self.store().max_runs_per_item();
            if cohort.records.len() > max {
                let excess = cohort.records.len() - max;
                cohort.records.drain(..excess);
            }
        }
        cohort
    }
}

fn reproducibility_check(comparison: &ComparisonReport) -> CheckResult {
    let name = check_names::REPRODUCIBILITY;
    let Some(diffs) = comparison.diffs else {
        return CheckResult::pass(name, "First run, nothing to compare");
    };
    let metrics = json!({
        "mean_score_diff": diffs.mean_score,
        "composite_score_diff": diffs.composite_score,
        "mean_importance_diff": diffs.mean_importance,
        "std_score_diff": diffs.std_score,
        "mean_score_pct": diffs.mean_score_pct,
        "composite_score_pct": diffs.composite_score_pct,
    });
    let message = format!(
        "{} {} (mean diff {:.6}, {:+.2}%)",
        comparison.metric_name, comparison.status, diffs.mean_score, diffs.mean_score_pct
    );
    if comparison.is_divergent() {
        CheckResult::fail(name, message).with_metrics(metrics)
    } else {
        CheckResult::pass(name, message).with_metrics(metrics)
    }
}

/// Level 2 decisions fail the check; advisory level 1 passes.
fn decision_check(decision: &DecisionResult) -> CheckResult {
    let name = check_names::DECISION_POLICIES;
    let metrics = json!({
        "decision_level": decision.decision_level,
        "decision_action_mask": decision.decision_action_mask,
        "decision_reason_codes": decision.decision_reason_codes,
        "decision_digest": decision.decision_digest,
    });
    let message = if decision.is_triggered() {
        format!(
            "Level {}: {}",
            decision.decision_level,
            decision.decision_reason_codes.join(", ")
        )
    } else {
        format!("No policy triggered over {} runs", decision.cohort_size)
    };
    if decision.decision_level >= 2 {
        CheckResult::fail(name, message).with_metrics(metrics)
    } else {
        CheckResult::pass(name, message).with_metrics(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MetricValue;
    use leakguard_core::{DecisionTime, LabelStart, PriceAdjustment};
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn exclusion() -> ExclusionConfig {
        ExclusionConfig {
            definite_leaks: BTreeSet::from(["future_close".to_string()]),
            temporal_overlap_30m_plus: BTreeSet::from([
                "vol_60m".to_string(),
                "vol_5m".to_string(),
            ]),
            metadata_columns: BTreeSet::from(["ts".to_string()]),
            target_patterns: vec!["fwd_ret_".to_string()],
            ..Default::default()
        }
    }

    fn plain_cycle(dir: &Path) -> GovernanceCycle {
        GovernanceCycle::new(dir, ExclusionConfig::default(), GovernanceConfig::default())
    }

    #[test]
    fn test_prepare_features() {
        let dir = tempdir().unwrap();
        let cycle = GovernanceCycle::new(dir.path(), exclusion(), GovernanceConfig::default());
        let columns = [
            "ts",
            "rsi_14",
            "vol_5m",
            "vol_60m",
            "future_close",
            "fwd_ret_60m",
            "fwd_ret_5m",
        ];
        let report = cycle.prepare_features("fwd_ret_60m", &columns);
        assert_eq!(report.safe_features, vec!["rsi_14", "vol_5m"]);
        assert!(report.target_column_present);
        assert_eq!(report.excluded_by_pattern, vec!["fwd_ret_5m"]);
    }

    #[test]
    fn test_time_contract_check() {
        let dir = tempdir().unwrap();
        let cycle = plain_cycle(dir.path());

        let ok = cycle.check_time_contract("fwd_ret_60m", &TimeContract::default(), 10, 12);
        assert!(ok.passed);

        let same_bar = TimeContract::new(
            DecisionTime::BarClose,
            LabelStart(0),
            Some(5.0),
            PriceAdjustment::Adjusted,
        );
        let bad = cycle.check_time_contract("fwd_ret_60m", &same_bar, 10, 12);
        assert!(!bad.passed);
        assert_eq!(bad.metrics.unwrap()["label_start"], 10);
    }

    #[test]
    fn test_conclude_first_run() {
        let dir = tempdir().unwrap();
        let cycle = plain_cycle(dir.path());
        let metrics = Metrics::from([("mean_score".to_string(), MetricValue::from(0.7))]);

        let conclusion = cycle
            .conclude_run(RunInput::new("ranking", "fwd_ret_60m", metrics), &json!({}))
            .unwrap();
        assert!(conclusion.comparison.is_first_run());
        assert!(conclusion.gate.passed);
        assert_eq!(conclusion.gate.checks.len(), 4);
        assert!(conclusion.patch.patch.is_empty());
        assert_eq!(conclusion.decision.cohort_size, 1);
    }

    fn pos_rate(rate: f64) -> Metrics {
        Metrics::from([("pos_rate".to_string(), MetricValue::from(rate))])
    }

    #[test]
    fn test_unpersisted_run_still_reaches_policies() {
        let dir = tempdir().unwrap();
        let mut config = GovernanceConfig::default();
        config.history.lock_timeout_ms = 50;
        let cycle = GovernanceCycle::new(dir.path(), ExclusionConfig::default(), config);
        for _ in 0..2 {
            cycle
                .conclude_run(RunInput::new("s", "i", pos_rate(0.1)), &json!({}))
                .unwrap();
        }

        let mut lock = cycle.store().log_file().as_os_str().to_owned();
        lock.push(".lock");
        std::fs::write(&lock, "pid=0 seq=0 at=elsewhere").unwrap();

        let conclusion = cycle
            .conclude_run(RunInput::new("s", "i", pos_rate(0.4)), &json!({}))
            .unwrap();
        assert!(!conclusion.comparison.persisted);
        let persisted = conclusion.gate.check(check_names::HISTORY_PERSISTED);
        assert_eq!(persisted.map(|c| c.passed), Some(false));
        assert_eq!(conclusion.decision.cohort_size, 3);
        assert!(conclusion.decision.has_action(crate::DecisionAction::RetuneClassWeights));
        assert_eq!(conclusion.patch.config["training"]["retune_class_weights"], true);
        assert_eq!(cycle.store().load_cohort("s", "i").len(), 2);
    }

    #[test]
    fn test_patch_conflict_keeps_conclusion() {
        let dir = tempdir().unwrap();
        let cycle = plain_cycle(dir.path());
        let resolved = json!({"training": "default"});
        let mut last = None;
        for rate in [0.1, 0.1, 0.4] {
            last = Some(
                cycle
                    .conclude_run(RunInput::new("s", "i", pos_rate(rate)), &resolved)
                    .unwrap(),
            );
        }
        let conclusion = last.unwrap();

        assert!(conclusion.comparison.persisted);
        assert!(conclusion.decision.is_triggered());
        assert_eq!(conclusion.patch.config, resolved);
        assert!(conclusion.patch.patch.is_empty());
        let check = conclusion.gate.check(check_names::CONFIG_PATCH).unwrap();
        assert!(!check.passed);
        assert!(check.message.contains("training"));
        assert!(!conclusion.gate.passed);
        assert!(conclusion.gate.summary.ends_with("failed: config_patch"));
    }
}
