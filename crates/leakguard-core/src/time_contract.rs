//! # Time Contract
//!
//! The minimal contract every training sample must honour:
//! - features are computed from data available at bar `t`
//! - the prediction is made at `t`
//! - the label window starts at `t+1` or later, never inside bar `t`
//!
//! Validators here report violations as `false` plus a diagnostic. Deciding
//! whether a violation aborts training belongs to the caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

/// When the prediction is made relative to the bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionTime {
    #[default]
    BarClose,
    BarOpen,
}

impl fmt::Display for DecisionTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionTime::BarClose => write!(f, "bar_close"),
            DecisionTime::BarOpen => write!(f, "bar_open"),
        }
    }
}

/// Price adjustment state of the underlying series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceAdjustment {
    #[default]
    Unknown,
    Unadjusted,
    Adjusted,
}

impl fmt::Display for PriceAdjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceAdjustment::Unknown => write!(f, "unknown"),
            PriceAdjustment::Unadjusted => write!(f, "unadjusted"),
            PriceAdjustment::Adjusted => write!(f, "adjusted"),
        }
    }
}

/// Label start offset, written `t+N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LabelStart(pub usize);

impl LabelStart {
    pub fn offset(self) -> usize {
        self.0
    }
}

impl Default for LabelStart {
    fn default() -> Self {
        LabelStart(1)
    }
}

impl fmt::Display for LabelStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            write!(f, "t")
        } else {
            write!(f, "t+{}", self.0)
        }
    }
}

impl FromStr for LabelStart {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "t" {
            return Ok(LabelStart(0));
        }
        s.strip_prefix("t+")
            .and_then(|n| n.trim().parse().ok())
            .map(LabelStart)
            .ok_or_else(|| format!("invalid label start {:?}, expected \"t+N\"", s))
    }
}

impl TryFrom<String> for LabelStart {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LabelStart> for String {
    fn from(value: LabelStart) -> Self {
        value.to_string()
    }
}

/// Half-open label window `[start, end)` in bar indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelWindow {
    pub start: usize,
    pub end: usize,
}

/// Time contract for one target / feature set. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeContract {
    #[serde(default)]
    pub decision_time: DecisionTime,

    #[serde(default)]
    pub label_starts_at: LabelStart,

    /// Bar interval in minutes, if known.
    #[serde(default)]
    pub interval_minutes: Option<f64>,

    #[serde(default)]
    pub prices: PriceAdjustment,
}

impl TimeContract {
    pub fn new(
        decision_time: DecisionTime,
        label_starts_at: LabelStart,
        interval_minutes: Option<f64>,
        prices: PriceAdjustment,
    ) -> Self {
        Self {
            decision_time,
            label_starts_at,
            interval_minutes,
            prices,
        }
    }

    /// Check a label start index against the current bar.
    pub fn validate_label_computation(
        &self,
        current_bar_idx: usize,
        label_start_idx: usize,
    ) -> bool {
        validate_label_start(current_bar_idx, label_start_idx)
    }

    /// Label window for `horizon_bars` using this contract's start offset.
    pub fn label_window(&self, current_bar_idx: usize, horizon_bars: usize) -> LabelWindow {
        compute_label_window(current_bar_idx, horizon_bars, self.label_starts_at.offset())
    }

    /// Emit the contract for a target.
    pub fn log_contract(&self, target_name: &str) {
        info!(
            target = %target_name,
            decision_time = %self.decision_time,
            label_starts_at = %self.label_starts_at,
            interval_minutes = ?self.interval_minutes,
            prices = %self.prices,
            "Time contract"
        );
    }
}

/// `true` iff the label starts strictly after the current bar.
pub fn validate_label_start(current_bar_idx: usize, label_start_idx: usize) -> bool {
    if label_start_idx <= current_bar_idx {
        error!(
            current_bar = current_bar_idx,
            label_start = label_start_idx,
            "TIME CONTRACT VIOLATION: label must start at t+1 or later"
        );
        return false;
    }
    true
}

/// Label window `[current + offset, current + offset + horizon_bars)`.
///
/// An offset below 1 is computed as asked but logged, since it places the
/// label inside the decision bar.
pub fn compute_label_window(
    current_bar_idx: usize,
    horizon_bars: usize,
    label_start_offset: usize,
) -> LabelWindow {
    if label_start_offset < 1 {
        warn!(
            offset = label_start_offset,
            "Label start offset < 1: labels should start at t+1 or later"
        );
    }
    let start = current_bar_idx + label_start_offset;
    LabelWindow {
        start,
        end: start + horizon_bars,
    }
}

/// Heuristic as-of check on a feature's length.
///
/// Returns `false` iff `feature_length <= current_bar_idx + 1`. Passing is
/// necessary but not sufficient: leakage baked into the feature's own
/// computation is invisible here.
pub fn as_of_safety_check(feature_length: usize, current_bar_idx: usize) -> bool {
    if feature_length <= current_bar_idx + 1 {
        warn!(
            feature_length,
            current_bar = current_bar_idx,
            "Potential as-of safety issue: feature length <= current_bar + 1"
        );
        return false;
    }
    true
}

/// Named variant of [`as_of_safety_check`] over a materialized feature.
pub fn validate_feature_as_of_safety<T>(
    feature_name: &str,
    feature_data: &[T],
    current_bar_idx: usize,
) -> bool {
    let safe = as_of_safety_check(feature_data.len(), current_bar_idx);
    if !safe {
        warn!(feature = %feature_name, "Feature failed as-of safety heuristic");
    }
    safe
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_start_must_follow_current_bar() {
        assert!(validate_label_start(10, 11));
        assert!(validate_label_start(0, 5));
        assert!(!validate_label_start(10, 10));
        assert!(!validate_label_start(10, 3));
    }

    #[test]
    fn test_label_window() {
        assert_eq!(compute_label_window(100, 12, 1), LabelWindow { start: 101, end: 113 });
        assert_eq!(compute_label_window(100, 12, 2), LabelWindow { start: 102, end: 114 });
    }

    #[test]
    fn test_label_window_offset_zero_still_computes() {
        let window = compute_label_window(7, 3, 0);
        assert_eq!(window, LabelWindow { start: 7, end: 10 });
        assert!(!validate_label_start(7, window.start));
    }

    #[test]
    fn test_as_of_safety() {
        assert!(!as_of_safety_check(10, 9));
        assert!(!as_of_safety_check(5, 9));
        assert!(as_of_safety_check(11, 9));

        let data = vec![0.0f64; 20];
        assert!(validate_feature_as_of_safety("ret_5m", &data, 10));
        assert!(!validate_feature_as_of_safety("ret_5m", &data, 19));
    }

    #[test]
    fn test_contract_serialization() {
        let contract = TimeContract::new(
            DecisionTime::BarClose,
            LabelStart(2),
            Some(5.0),
            PriceAdjustment::Adjusted,
        );
        let json = serde_json::to_value(&contract).unwrap();
        assert_eq!(json["decision_time"], "bar_close");
        assert_eq!(json["label_starts_at"], "t+2");
        assert_eq!(json["interval_minutes"], 5.0);
        assert_eq!(json["prices"], "adjusted");

        let back: TimeContract = serde_json::from_value(json).unwrap();
        assert_eq!(back, contract);
    }

    #[test]
    fn test_contract_defaults() {
        let contract: TimeContract = serde_json::from_str("{}").unwrap();
        assert_eq!(contract.decision_time, DecisionTime::BarClose);
        assert_eq!(contract.label_starts_at, LabelStart(1));
        assert_eq!(contract.prices, PriceAdjustment::Unknown);
        assert_eq!(contract.label_window(50, 4), LabelWindow { start: 51, end: 55 });
    }

    #[test]
    fn test_label_start_parse() {
        assert_eq!("t+1".parse::<LabelStart>().unwrap(), LabelStart(1));
        assert_eq!("t+12".parse::<LabelStart>().unwrap(), LabelStart(12));
        assert_eq!("t".parse::<LabelStart>().unwrap(), LabelStart(0));
        assert!("t-1".parse::<LabelStart>().is_err());
        assert!("next".parse::<LabelStart>().is_err());
    }
}
