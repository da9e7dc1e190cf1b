//! # Decision Engine
//!
//! Runs the policy catalog over one cohort and aggregates the triggered
//! policies into a [`DecisionResult`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::info;

use crate::history::{CohortHistory, RunHistoryStore};
use crate::policies::{DecisionAction, DecisionPolicy, PolicyEvaluation, evaluate_policies};

/// Schema version for decision results.
pub const DECISION_RESULT_SCHEMA: &str = "decision_result_v1.0";

/// Aggregated policy outcome for one cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    /// Schema version
    pub schema_version: String,
    /// Cohort key (`stage:item`)
    pub cohort_key: String,
    /// Records the policies saw
    pub cohort_size: usize,
    /// Evaluation timestamp
    pub evaluated_at: DateTime<Utc>,
    /// Per-policy outcomes, catalog order
    pub policy_results: Vec<PolicyEvaluation>,
    /// Triggered actions, catalog order
    pub decision_action_mask: Vec<DecisionAction>,
    /// Highest triggered level, 0 if none
    pub decision_level: u8,
    /// Triggered reason codes, catalog order
    pub decision_reason_codes: Vec<String>,
    /// Decision digest (for audit trail)
    pub decision_digest: String,
}

impl DecisionResult {
    fn from_evaluations(cohort: &CohortHistory, policy_results: Vec<PolicyEvaluation>) -> Self {
        let triggered = || policy_results.iter().filter(|r| r.triggered);
        let decision_action_mask: Vec<DecisionAction> =
            triggered().filter_map(|r| r.action).collect();
        let decision_reason_codes: Vec<String> =
            triggered().filter_map(|r| r.reason.clone()).collect();
        let decision_level = triggered().map(|r| r.level).max().unwrap_or(0);
        let decision_digest = Self::compute_digest(
            &cohort.key,
            cohort.len(),
            &decision_action_mask,
            decision_level,
            &decision_reason_codes,
        );

        Self {
            schema_version: DECISION_RESULT_SCHEMA.to_string(),
            cohort_key: cohort.key.clone(),
            cohort_size: cohort.len(),
            evaluated_at: Utc::now(),
            policy_results,
            decision_action_mask,
            decision_level,
            decision_reason_codes,
            decision_digest,
        }
    }

    /// Compute decision digest. Excludes the timestamp so identical
    /// cohorts yield identical digests.
    pub fn compute_digest(
        cohort_key: &str,
        cohort_size: usize,
        actions: &[DecisionAction],
        level: u8,
        reason_codes: &[String],
    ) -> String {
        let actions_str = actions
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let input = format!(
            "decision_result_v1:{}:{}:{}:{}:{}",
            cohort_key,
            cohort_size,
            actions_str,
            level,
            reason_codes.join(";")
        );
        hex::encode(Sha256::digest(input.as_bytes()))
    }

    /// Recompute and compare the stored digest.
    pub fn verify_digest(&self) -> bool {
        Self::compute_digest(
            &self.cohort_key,
            self.cohort_size,
            &self.decision_action_mask,
            self.decision_level,
            &self.decision_reason_codes,
        ) == self.decision_digest
    }

    pub fn is_triggered(&self) -> bool {
        !self.decision_action_mask.is_empty()
    }

    pub fn has_action(&self, action: DecisionAction) -> bool {
        self.decision_action_mask.contains(&action)
    }

    pub fn policy(&self, policy: DecisionPolicy) -> Option<&PolicyEvaluation> {
        self.policy_results.iter().find(|r| r.policy == policy)
    }
}

/// Policy engine over a fixed, ordered policy list.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    policies: Vec<DecisionPolicy>,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self {
            policies: DecisionPolicy::CATALOG.to_vec(),
        }
    }
}

impl DecisionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine restricted to a subset of the catalog, in the given order.
    /// Repeated policies are kept once, at their first position.
    pub fn with_policies(policies: Vec<DecisionPolicy>) -> Self {
        let mut seen = HashSet::new();
        let policies = policies.into_iter().filter(|p| seen.insert(*p)).collect();
        Self { policies }
    }

    pub fn policies(&self) -> &[DecisionPolicy] {
        &self.policies
    }

    pub fn evaluate(&self, cohort: &CohortHistory) -> DecisionResult {
        let evaluations = evaluate_policies(cohort, &self.policies);
        let result = DecisionResult::from_evaluations(cohort, evaluations);
        if result.is_triggered() {
            info!(
                cohort = %result.cohort_key,
                level = result.decision_level,
                actions = ?result.decision_action_mask,
                reasons = ?result.decision_reason_codes,
                "Decision policies triggered"
            );
        } else {
            info!(
                cohort = %result.cohort_key,
                runs = result.cohort_size,
                "No decision policy triggered"
            );
        }
        result
    }

    /// Load the cohort for (stage, item) and evaluate it.
    pub fn evaluate_stored(
        &self,
        store: &RunHistoryStore,
        stage: &str,
        item_name: &str,
    ) -> DecisionResult {
        self.evaluate(&store.load_cohort(stage, item_name))
    }
}
