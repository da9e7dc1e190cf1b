//! # Decision Policies
//!
//! Fixed catalog of cohort-trend predicates. Each policy maps to exactly one
//! action and level:
//!
//! | Policy                      | Action                 | Level |
//! |-----------------------------|------------------------|-------|
//! | `feature_instability`       | `freeze_features`      | 2     |
//! | `route_instability`         | `tighten_routing`      | 2     |
//! | `feature_explosion_decline` | `cap_features`         | 2     |
//! | `class_balance_drift`       | `retune_class_weights` | 1     |
//!
//! Level 2 actions change the next run's config; level 1 is advisory.
//! Every policy needs at least [`MIN_COHORT_RUNS`] records to fire.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::history::{CohortHistory, MetricValue};

/// Minimum cohort size before any policy can trigger.
pub const MIN_COHORT_RUNS: usize = 3;

/// Metric names read by the catalog.
pub mod metric_names {
    pub const JACCARD_TOP_K: &str = "jaccard_topK";
    pub const ROUTE_ENTROPY: &str = "route_entropy";
    pub const ROUTE_CHANGED: &str = "route_changed";
    pub const CS_AUC: &str = "cs_auc";
    pub const N_FEATURES_SELECTED: &str = "n_features_selected";
    pub const POS_RATE: &str = "pos_rate";
}

use metric_names::*;

const JACCARD_FLOOR: f64 = 0.5;
const JACCARD_DROP_RATIO: f64 = 0.8;
const ROUTE_ENTROPY_CEILING: f64 = 1.5;
const ROUTE_CHANGE_WINDOW: usize = 5;
const ROUTE_CHANGE_LIMIT: f64 = 3.0;
const AUC_DECLINE: f64 = -0.01;
const FEATURE_GROWTH: f64 = 10.0;
const POS_RATE_DRIFT: f64 = 0.1;

// =============================================================================
// Actions
// =============================================================================

/// Config action a policy can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    FreezeFeatures,
    TightenRouting,
    CapFeatures,
    RetuneClassWeights,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::FreezeFeatures => "freeze_features",
            DecisionAction::TightenRouting => "tighten_routing",
            DecisionAction::CapFeatures => "cap_features",
            DecisionAction::RetuneClassWeights => "retune_class_weights",
        }
    }
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Policies
// =============================================================================

/// Predicate failure. Recorded per policy, never fatal to the batch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("metric {metric} has non-numeric value {value}")]
    NonNumeric { metric: String, value: String },
}

/// The policy catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPolicy {
    FeatureInstability,
    RouteInstability,
    FeatureExplosionDecline,
    ClassBalanceDrift,
}

impl DecisionPolicy {
    /// Evaluation order.
    pub const CATALOG: [DecisionPolicy; 4] = [
        DecisionPolicy::FeatureInstability,
        DecisionPolicy::RouteInstability,
        DecisionPolicy::FeatureExplosionDecline,
        DecisionPolicy::ClassBalanceDrift,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DecisionPolicy::FeatureInstability => "feature_instability",
            DecisionPolicy::RouteInstability => "route_instability",
            DecisionPolicy::FeatureExplosionDecline => "feature_explosion_decline",
            DecisionPolicy::ClassBalanceDrift => "class_balance_drift",
        }
    }

    pub fn action(&self) -> DecisionAction {
        match self {
            DecisionPolicy::FeatureInstability => DecisionAction::FreezeFeatures,
            DecisionPolicy::RouteInstability => DecisionAction::TightenRouting,
            DecisionPolicy::FeatureExplosionDecline => DecisionAction::CapFeatures,
            DecisionPolicy::ClassBalanceDrift => DecisionAction::RetuneClassWeights,
        }
    }

    /// Reason code emitted when triggered.
    pub fn reason(&self) -> &'static str {
        match self {
            DecisionPolicy::FeatureInstability => "jaccard_collapse",
            DecisionPolicy::RouteInstability => "route_instability",
            DecisionPolicy::FeatureExplosionDecline => "feature_explosion_decline",
            DecisionPolicy::ClassBalanceDrift => "pos_rate_drift",
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            DecisionPolicy::ClassBalanceDrift => 1,
            _ => 2,
        }
    }

    /// Evaluate the predicate. Cohorts below [`MIN_COHORT_RUNS`] never trigger.
    pub fn evaluate(&self, cohort: &CohortHistory) -> Result<bool, PolicyError> {
        if cohort.len() < MIN_COHORT_RUNS {
            return Ok(false);
        }
        match self {
            DecisionPolicy::FeatureInstability => feature_instability(cohort),
            DecisionPolicy::RouteInstability => route_instability(cohort),
            DecisionPolicy::FeatureExplosionDecline => feature_explosion_decline(cohort),
            DecisionPolicy::ClassBalanceDrift => class_balance_drift(cohort),
        }
    }
}

impl fmt::Display for DecisionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Top-K overlap collapsed: last < 0.5 and last < 0.8 × previous.
fn feature_instability(cohort: &CohortHistory) -> Result<bool, PolicyError> {
    if !cohort.has_metric(JACCARD_TOP_K) {
        return Ok(false);
    }
    let recent = present(&tail_values(cohort, JACCARD_TOP_K, 3)?);
    let [.., prev, last] = recent.as_slice() else {
        return Ok(false);
    };
    Ok(*last < JACCARD_FLOOR && *last < prev * JACCARD_DROP_RATIO)
}

/// High routing entropy, or frequent route changes when no entropy is recorded.
fn route_instability(cohort: &CohortHistory) -> Result<bool, PolicyError> {
    if cohort.has_metric(ROUTE_ENTROPY) {
        let recent = present(&tail_values(cohort, ROUTE_ENTROPY, 3)?);
        if let Some(last) = recent.last() {
            return Ok(*last > ROUTE_ENTROPY_CEILING);
        }
    }
    if cohort.has_metric(ROUTE_CHANGED) {
        let changes: f64 = present(&tail_values(cohort, ROUTE_CHANGED, ROUTE_CHANGE_WINDOW)?)
            .iter()
            .sum();
        return Ok(changes >= ROUTE_CHANGE_LIMIT);
    }
    Ok(false)
}

/// AUC fell while the selected feature count jumped, over the last two runs.
fn feature_explosion_decline(cohort: &CohortHistory) -> Result<bool, PolicyError> {
    if !cohort.has_metric(CS_AUC) || !cohort.has_metric(N_FEATURES_SELECTED) {
        return Ok(false);
    }
    let auc_delta = last_delta(&tail_values(cohort, CS_AUC, 3)?);
    let feature_delta = last_delta(&tail_values(cohort, N_FEATURES_SELECTED, 3)?);
    match (auc_delta, feature_delta) {
        (Some(auc), Some(features)) => Ok(auc < AUC_DECLINE && features > FEATURE_GROWTH),
        _ => Ok(false),
    }
}

/// Positive rate moved more than 0.1 between the oldest and newest of the last 3 runs.
fn class_balance_drift(cohort: &CohortHistory) -> Result<bool, PolicyError> {
    if !cohort.has_metric(POS_RATE) {
        return Ok(false);
    }
    let recent = present(&tail_values(cohort, POS_RATE, 3)?);
    match (recent.first(), recent.last()) {
        (Some(first), Some(last)) if recent.len() >= 2 => Ok((last - first).abs() > POS_RATE_DRIFT),
        _ => Ok(false),
    }
}

/// Numeric values of `metric` over the last `n` records. Absent and null
/// values are `None`; text is an error.
fn tail_values(
    cohort: &CohortHistory,
    metric: &str,
    n: usize,
) -> Result<Vec<Option<f64>>, PolicyError> {
    cohort
        .tail(n)
        .iter()
        .map(|record| match record.metric(metric) {
            None | Some(MetricValue::Null) => Ok(None),
            Some(value) => value
                .as_f64()
                .filter(|v| !v.is_nan())
                .map(Some)
                .ok_or_else(|| PolicyError::NonNumeric {
                    metric: metric.to_string(),
                    value: value.to_string(),
                }),
        })
        .collect()
}

fn present(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().flatten().copied().collect()
}

/// Difference between the last two positions; `None` if either is missing.
fn last_delta(values: &[Option<f64>]) -> Option<f64> {
    match values {
        [.., Some(prev), Some(last)] => Some(last - prev),
        _ => None,
    }
}

// =============================================================================
// Batch evaluation
// =============================================================================

/// Outcome of one policy for one cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    pub policy: DecisionPolicy,
    pub triggered: bool,
    pub level: u8,
    /// Set only when triggered
    pub action: Option<DecisionAction>,
    /// Set only when triggered
    pub reason: Option<String>,
    /// Predicate failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PolicyEvaluation {
    fn not_triggered(policy: DecisionPolicy, error: Option<String>) -> Self {
        Self {
            policy,
            triggered: false,
            level: 0,
            action: None,
            reason: None,
            error,
        }
    }

    fn triggered(policy: DecisionPolicy) -> Self {
        Self {
            policy,
            triggered: true,
            level: policy.level(),
            action: Some(policy.action()),
            reason: Some(policy.reason().to_string()),
            error: None,
        }
    }
}

/// Evaluate each policy independently. A failing predicate is logged and
/// recorded as not triggered.
pub fn evaluate_policies(
    cohort: &CohortHistory,
    policies: &[DecisionPolicy],
) -> Vec<PolicyEvaluation> {
    policies
        .iter()
        .map(|policy| match policy.evaluate(cohort) {
            Ok(true) => {
                debug!(cohort = %cohort.key, policy = %policy, "Policy triggered");
                PolicyEvaluation::triggered(*policy)
            }
            Ok(false) => PolicyEvaluation::not_triggered(*policy, None),
            Err(e) => {
                warn!(
                    cohort = %cohort.key,
                    policy = %policy,
                    error = %e,
                    "Policy evaluation failed"
                );
                PolicyEvaluation::not_triggered(*policy, Some(e.to_string()))
            }
        })
        .collect()
}
