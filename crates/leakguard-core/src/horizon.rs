//! # Target Horizon Parsing
//!
//! Derives a target's prediction horizon from its column name.
//!
//! ## Resolution Order (first match wins)
//! 1. Literal alias `fwd_ret_oc_same_day` → 1 day
//! 2. Structural prefix `fwd_ret_<N><d|m>`
//! 3. First `<N>m` anywhere in the name → minutes
//! 4. First `<N>d` anywhere in the name → days
//!
//! A name carrying both an `m` token and a `d` token resolves through rule 3,
//! so `peak_60m_2d` is a 60-minute horizon.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minutes in one trading-calendar day as used for horizon conversion.
pub const MINUTES_PER_DAY: u64 = 1440;

/// Alias for the open-to-close same-day return target.
pub const SAME_DAY_ALIAS: &str = "fwd_ret_oc_same_day";

static FWD_RET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^fwd_ret_(\d+)([dm])").expect("static regex"));
static MINUTES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)m").expect("static regex"));
static DAYS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)d").expect("static regex"));

/// Unit a horizon was expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HorizonUnit {
    Minute,
    Day,
}

impl HorizonUnit {
    /// Minutes per one unit.
    pub fn minutes(self) -> u64 {
        match self {
            HorizonUnit::Minute => 1,
            HorizonUnit::Day => MINUTES_PER_DAY,
        }
    }

    /// Single-letter suffix used in column names.
    pub fn suffix(self) -> &'static str {
        match self {
            HorizonUnit::Minute => "m",
            HorizonUnit::Day => "d",
        }
    }
}

/// Canonical horizon of a target.
///
/// Invariant: `minutes == value * unit.minutes()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetHorizon {
    pub value: u64,
    pub unit: HorizonUnit,
    pub minutes: u64,
}

impl TargetHorizon {
    /// Build a horizon, returning `None` if the minute count overflows.
    pub fn new(value: u64, unit: HorizonUnit) -> Option<Self> {
        let minutes = value.checked_mul(unit.minutes())?;
        Some(Self {
            value,
            unit,
            minutes,
        })
    }

    pub fn minutes(value: u64) -> Self {
        Self {
            value,
            unit: HorizonUnit::Minute,
            minutes: value,
        }
    }

    pub fn days(value: u64) -> Option<Self> {
        Self::new(value, HorizonUnit::Day)
    }
}

impl fmt::Display for TargetHorizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

/// Parse a target name into its horizon.
///
/// Returns `None` when no rule matches. Callers must treat `None` as
/// "horizon unknown", never as a zero horizon.
pub fn parse_target_horizon(target_name: &str) -> Option<TargetHorizon> {
    if target_name == SAME_DAY_ALIAS {
        return TargetHorizon::days(1);
    }

    if let Some(caps) = FWD_RET_RE.captures(target_name) {
        let unit = if &caps[2] == "d" {
            HorizonUnit::Day
        } else {
            HorizonUnit::Minute
        };
        if let Some(horizon) = caps[1]
            .parse()
            .ok()
            .and_then(|value| TargetHorizon::new(value, unit))
        {
            return Some(horizon);
        }
    }

    if let Some(horizon) = first_number(&MINUTES_RE, target_name).map(TargetHorizon::minutes) {
        return Some(horizon);
    }

    first_number(&DAYS_RE, target_name).and_then(TargetHorizon::days)
}

/// First `<N><suffix>` occurrence in `text`, as an integer.
pub(crate) fn first_number(re: &Regex, text: &str) -> Option<u64> {
    re.captures(text).and_then(|caps| caps[1].parse().ok())
}

/// First `<N>m` token in `text`.
pub(crate) fn first_minutes_token(text: &str) -> Option<u64> {
    first_number(&MINUTES_RE, text)
}

/// First `<N>d` token in `text`.
pub(crate) fn first_days_token(text: &str) -> Option<u64> {
    first_number(&DAYS_RE, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fwd_ret_days() {
        for n in [1u64, 5, 20, 60, 252] {
            let h = parse_target_horizon(&format!("fwd_ret_{}d", n)).unwrap();
            assert_eq!(h.value, n);
            assert_eq!(h.unit, HorizonUnit::Day);
            assert_eq!(h.minutes, n * 1440);
        }
    }

    #[test]
    fn test_fwd_ret_minutes() {
        let h = parse_target_horizon("fwd_ret_60m").unwrap();
        assert_eq!(h, TargetHorizon::minutes(60));
    }

    #[test]
    fn test_same_day_alias() {
        let h = parse_target_horizon("fwd_ret_oc_same_day").unwrap();
        assert_eq!(h.value, 1);
        assert_eq!(h.unit, HorizonUnit::Day);
        assert_eq!(h.minutes, 1440);
    }

    #[test]
    fn test_embedded_minute_token() {
        assert_eq!(parse_target_horizon("peak_60m_0.8").unwrap().minutes, 60);
        assert_eq!(parse_target_horizon("y_will_peak_60m_0.8").unwrap().minutes, 60);
        assert_eq!(
            parse_target_horizon("y_will_peak_mfe_10m_0.001").unwrap().minutes,
            10
        );
    }

    #[test]
    fn test_minute_rule_wins_over_day_rule() {
        let h = parse_target_horizon("valley_2d_15m").unwrap();
        assert_eq!(h.unit, HorizonUnit::Minute);
        assert_eq!(h.value, 15);
    }

    #[test]
    fn test_day_token_fallback() {
        let h = parse_target_horizon("swing_high_3d").unwrap();
        assert_eq!(h.unit, HorizonUnit::Day);
        assert_eq!(h.minutes, 3 * 1440);
    }

    #[test]
    fn test_unparseable_is_none() {
        assert!(parse_target_horizon("y_will_swing").is_none());
        assert!(parse_target_horizon("").is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(TargetHorizon::minutes(30).to_string(), "30m");
        assert_eq!(TargetHorizon::days(5).unwrap().to_string(), "5d");
    }
}
