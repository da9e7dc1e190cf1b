//! # Config Patcher
//!
//! Turns a [`DecisionResult`] into the configuration for the next run.
//!
//! The resolved config is never mutated: [`PatchBuilder`] works on a clone and
//! records every field it changes under a dotted path, so the old config, the
//! new config and the diff between them can all be inspected independently.
//!
//! ## Actions
//! - `freeze_features`: `feature_selection.use_cached = true`
//! - `tighten_routing`: scale `target_routing.routing.cs_auc_threshold` and
//!   `target_routing.routing.frac_symbols_good_threshold` by `factor`,
//!   clamped to absolute ceilings
//! - `cap_features`: `feature_selection.max_features = cap`, only if unset
//! - `retune_class_weights`: `training.retune_class_weights = true`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::GovernanceError;
use crate::engine::DecisionResult;
use crate::policies::DecisionAction;

pub const USE_CACHED_PATH: &str = "feature_selection.use_cached";
pub const MAX_FEATURES_PATH: &str = "feature_selection.max_features";
pub const CS_AUC_THRESHOLD_PATH: &str = "target_routing.routing.cs_auc_threshold";
pub const FRAC_SYMBOLS_GOOD_PATH: &str = "target_routing.routing.frac_symbols_good_threshold";
pub const RETUNE_CLASS_WEIGHTS_PATH: &str = "training.retune_class_weights";

// =============================================================================
// Configuration
// =============================================================================

/// How `tighten_routing` scales the routing thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutingTightening {
    /// Multiplier per application
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Assumed when `cs_auc_threshold` is unset
    #[serde(default = "default_cs_auc_threshold")]
    pub default_cs_auc_threshold: f64,

    /// Assumed when `frac_symbols_good_threshold` is unset
    #[serde(default = "default_frac_symbols_good_threshold")]
    pub default_frac_symbols_good_threshold: f64,

    /// Tightening never pushes `cs_auc_threshold` above this
    #[serde(default = "default_ceiling")]
    pub cs_auc_ceiling: f64,

    /// Tightening never pushes `frac_symbols_good_threshold` above this
    #[serde(default = "default_ceiling")]
    pub frac_symbols_good_ceiling: f64,
}

fn default_factor() -> f64 {
    1.1
}
fn default_cs_auc_threshold() -> f64 {
    0.65
}
fn default_frac_symbols_good_threshold() -> f64 {
    0.5
}
fn default_ceiling() -> f64 {
    0.9
}

impl Default for RoutingTightening {
    fn default() -> Self {
        Self {
            factor: default_factor(),
            default_cs_auc_threshold: default_cs_auc_threshold(),
            default_frac_symbols_good_threshold: default_frac_symbols_good_threshold(),
            cs_auc_ceiling: default_ceiling(),
            frac_symbols_good_ceiling: default_ceiling(),
        }
    }
}

impl RoutingTightening {
    /// One tightening step. A value already at or above the ceiling is left alone.
    pub fn tighten(&self, current: f64, ceiling: f64) -> f64 {
        if current >= ceiling {
            current
        } else {
            (current * self.factor).min(ceiling)
        }
    }
}

/// `cap_features` settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureCapConfig {
    #[serde(default = "default_max_features")]
    pub max_features: u64,
}

fn default_max_features() -> u64 {
    100
}

impl Default for FeatureCapConfig {
    fn default() -> Self {
        Self {
            max_features: default_max_features(),
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Flat record of changed fields, keyed by dotted path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigPatch(pub BTreeMap<String, Value>);

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.0.get(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// New config plus the patch that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOutcome {
    pub config: Value,
    pub patch: ConfigPatch,
}

impl PatchOutcome {
    /// `config` as given, nothing changed.
    pub fn unchanged(config: &Value) -> Self {
        Self {
            config: config.clone(),
            patch: ConfigPatch::default(),
        }
    }
}

/// Copy-on-write editor over a JSON config tree.
#[derive(Debug, Clone)]
pub struct PatchBuilder {
    config: Value,
    patch: ConfigPatch,
}

impl PatchBuilder {
    /// Start from a copy of `base`. A null base is an empty object.
    pub fn new(base: &Value) -> Result<Self, GovernanceError> {
        let config = match base {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => base.clone(),
            other => return Err(conflict("", "object", other)),
        };
        Ok(Self {
            config,
            patch: ConfigPatch::default(),
        })
    }

    /// Value at a dotted path, if present.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.config, |node, key| node.as_object()?.get(key))
    }

    /// Set a dotted path, creating missing intermediate objects. Records the
    /// change only when the value actually differs.
    pub fn set(&mut self, path: &str, value: Value) -> Result<bool, GovernanceError> {
        let (parents, leaf) = match path.rsplit_once('.') {
            Some((parents, leaf)) => (Some(parents), leaf),
            None => (None, path),
        };

        let mut node = &mut self.config;
        let mut walked = String::new();
        for key in parents.into_iter().flat_map(|p| p.split('.')) {
            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(key);
            let map = match node {
                Value::Object(map) => map,
                other => return Err(conflict(&walked, "object", other)),
            };
            let child = map
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if child.is_null() {
                *child = Value::Object(Map::new());
            }
            node = child;
        }

        let map = match node {
            Value::Object(map) => map,
            other => return Err(conflict(&walked, "object", other)),
        };
        if map.get(leaf) == Some(&value) {
            return Ok(false);
        }
        map.insert(leaf.to_string(), value.clone());
        self.patch.0.insert(path.to_string(), value);
        Ok(true)
    }

    /// Set only when the path is absent or null.
    pub fn set_if_unset(&mut self, path: &str, value: Value) -> Result<bool, GovernanceError> {
        match self.get(path) {
            Some(existing) if !existing.is_null() => Ok(false),
            _ => self.set(path, value),
        }
    }

    /// Numeric value at `path`, `default` when absent or null.
    pub fn number_or(&self, path: &str, default: f64) -> Result<f64, GovernanceError> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => value.as_f64().ok_or_else(|| conflict(path, "number", value)),
        }
    }

    pub fn finish(self) -> PatchOutcome {
        PatchOutcome {
            config: self.config,
            patch: self.patch,
        }
    }
}

fn conflict(path: &str, expected: &'static str, found: &Value) -> GovernanceError {
    GovernanceError::PatchConflict {
        path: path.to_string(),
        expected,
        found: found.to_string(),
    }
}

fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

// =============================================================================
// Patcher
// =============================================================================

/// Applies decision actions to a resolved config.
#[derive(Debug, Clone, Default)]
pub struct ConfigPatcher {
    routing: RoutingTightening,
    feature_cap: FeatureCapConfig,
}

impl ConfigPatcher {
    pub fn new(routing: RoutingTightening, feature_cap: FeatureCapConfig) -> Self {
        Self { routing, feature_cap }
    }

    /// Apply every action in the decision's mask.
    pub fn apply(
        &self,
        resolved: &Value,
        decision: &DecisionResult,
    ) -> Result<PatchOutcome, GovernanceError> {
        let outcome = self.apply_actions(resolved, &decision.decision_action_mask)?;
        if !outcome.patch.is_empty() {
            info!(
                cohort = %decision.cohort_key,
                changed = ?outcome.patch.paths().collect::<Vec<_>>(),
                "Config patched for next run"
            );
        }
        Ok(outcome)
    }

    /// Apply an explicit action list, in order.
    pub fn apply_actions(
        &self,
        resolved: &Value,
        actions: &[DecisionAction],
    ) -> Result<PatchOutcome, GovernanceError> {
        let mut builder = PatchBuilder::new(resolved)?;
        for action in actions {
            self.apply_action(&mut builder, *action)?;
        }
        Ok(builder.finish())
    }

    fn apply_action(
        &self,
        builder: &mut PatchBuilder,
        action: DecisionAction,
    ) -> Result<(), GovernanceError> {
        match action {
            DecisionAction::FreezeFeatures => {
                builder.set(USE_CACHED_PATH, Value::Bool(true))?;
            }
            DecisionAction::TightenRouting => {
                let r = &self.routing;
                let cs_auc =
                    builder.number_or(CS_AUC_THRESHOLD_PATH, r.default_cs_auc_threshold)?;
                let frac = builder
                    .number_or(FRAC_SYMBOLS_GOOD_PATH, r.default_frac_symbols_good_threshold)?;
                let new_cs_auc = r.tighten(cs_auc, r.cs_auc_ceiling);
                let new_frac = r.tighten(frac, r.frac_symbols_good_ceiling);
                debug!(cs_auc, new_cs_auc, frac, new_frac, "Tightening routing thresholds");
                builder.set(CS_AUC_THRESHOLD_PATH, number(new_cs_auc))?;
                builder.set(FRAC_SYMBOLS_GOOD_PATH, number(new_frac))?;
            }
            DecisionAction::CapFeatures => {
                let cap = Value::from(self.feature_cap.max_features);
                builder.set_if_unset(MAX_FEATURES_PATH, cap)?;
            }
            DecisionAction::RetuneClassWeights => {
                builder.set(RETUNE_CLASS_WEIGHTS_PATH, Value::Bool(true))?;
            }
        }
        Ok(())
    }
}
