//! # Temporal Overlap Resolution
//!
//! Given a target horizon, selects the feature patterns whose own window sits
//! close enough to the horizon to carry label information through
//! autocorrelation.
//!
//! ## Guard Band
//! A feature window `w` overlaps a horizon `H` when `w ∈ [H·lower, H·upper]`.
//! The default band `[0.5, 1.5]` is a heuristic, not a statistical bound, and
//! is exposed as [`OverlapBand`] so deployments can tune it.
//!
//! - `H ≤ 1440m`: minute windows, `[max(1, ⌊H·lower⌋), ⌈H·upper⌉]`.
//! - `H > 1440m`: day windows, `[max(1, D·lower), D·upper]` with `D = H/1440`,
//!   checked against both `<N>d` patterns and `<N>m` patterns converted to days.

use crate::horizon::{MINUTES_PER_DAY, first_days_token, first_minutes_token};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default lower guard-band ratio.
pub const DEFAULT_LOWER_RATIO: f64 = 0.5;
/// Default upper guard-band ratio.
pub const DEFAULT_UPPER_RATIO: f64 = 1.5;

/// Tunable guard band around a horizon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlapBand {
    #[serde(default = "default_lower_ratio")]
    pub lower_ratio: f64,

    #[serde(default = "default_upper_ratio")]
    pub upper_ratio: f64,
}

fn default_lower_ratio() -> f64 {
    DEFAULT_LOWER_RATIO
}
fn default_upper_ratio() -> f64 {
    DEFAULT_UPPER_RATIO
}

impl Default for OverlapBand {
    fn default() -> Self {
        Self {
            lower_ratio: DEFAULT_LOWER_RATIO,
            upper_ratio: DEFAULT_UPPER_RATIO,
        }
    }
}

/// Inclusive minute window `[min, max]` for short horizons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinuteWindow {
    pub min: u64,
    pub max: u64,
}

impl MinuteWindow {
    pub fn contains(&self, minutes: u64) -> bool {
        self.min <= minutes && minutes <= self.max
    }
}

/// Inclusive day window `[min, max]` for long horizons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayWindow {
    pub min: f64,
    pub max: f64,
}

impl DayWindow {
    pub fn contains(&self, days: f64) -> bool {
        self.min <= days && days <= self.max
    }
}

impl OverlapBand {
    /// Minute window for a horizon of at most one day.
    pub fn minute_window(&self, horizon_minutes: u64) -> MinuteWindow {
        let h = horizon_minutes as f64;
        MinuteWindow {
            min: ((h * self.lower_ratio).floor() as u64).max(1),
            max: (h * self.upper_ratio).ceil() as u64,
        }
    }

    /// Day window for a horizon longer than one day.
    pub fn day_window(&self, horizon_minutes: u64) -> DayWindow {
        let days = horizon_minutes as f64 / MINUTES_PER_DAY as f64;
        DayWindow {
            min: (days * self.lower_ratio).max(1.0),
            max: days * self.upper_ratio,
        }
    }

    /// Patterns that temporally overlap a horizon of `horizon_minutes`.
    pub fn overlapping<I, S>(&self, horizon_minutes: u64, patterns: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut excluded = BTreeSet::new();

        if horizon_minutes <= MINUTES_PER_DAY {
            let window = self.minute_window(horizon_minutes);
            for pattern in patterns {
                let pattern = pattern.as_ref();
                if first_minutes_token(pattern).is_some_and(|w| window.contains(w)) {
                    excluded.insert(pattern.to_string());
                }
            }
        } else {
            let window = self.day_window(horizon_minutes);
            for pattern in patterns {
                let pattern = pattern.as_ref();
                let day_hit = first_days_token(pattern).is_some_and(|d| window.contains(d as f64));
                let minute_hit = first_minutes_token(pattern)
                    .is_some_and(|m| window.contains(m as f64 / MINUTES_PER_DAY as f64));
                if day_hit || minute_hit {
                    excluded.insert(pattern.to_string());
                }
            }
        }

        excluded
    }
}

/// Overlapping patterns under the default `[0.5, 1.5]` band.
pub fn temporal_overlap_features<I, S>(horizon_minutes: u64, patterns: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    OverlapBand::default().overlapping(horizon_minutes, patterns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minute_patterns() -> Vec<String> {
        [1u64, 5, 15, 29, 30, 45, 60, 89, 90, 91, 120, 240]
            .iter()
            .map(|m| format!("ret_{}m", m))
            .collect()
    }

    #[test]
    fn test_60m_horizon_band_is_30_to_90() {
        let excluded = temporal_overlap_features(60, minute_patterns());
        let expected: BTreeSet<String> = ["ret_30m", "ret_45m", "ret_60m", "ret_89m", "ret_90m"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(excluded, expected);
    }

    #[test]
    fn test_minute_window_bounds() {
        let band = OverlapBand::default();
        assert_eq!(band.minute_window(60), MinuteWindow { min: 30, max: 90 });
        // Floor on the lower edge, ceil on the upper edge.
        assert_eq!(band.minute_window(5), MinuteWindow { min: 2, max: 8 });
        // Lower edge never drops below one minute.
        assert_eq!(band.minute_window(1), MinuteWindow { min: 1, max: 2 });
    }

    #[test]
    fn test_one_day_horizon_uses_minute_branch() {
        let patterns = vec!["vol_720m", "vol_1440m", "vol_2160m", "vol_2161m", "vol_1d"];
        let excluded = temporal_overlap_features(1440, patterns);
        assert!(excluded.contains("vol_720m"));
        assert!(excluded.contains("vol_1440m"));
        assert!(excluded.contains("vol_2160m"));
        assert!(!excluded.contains("vol_2161m"));
        // Day-only tokens are not inspected below the day threshold.
        assert!(!excluded.contains("vol_1d"));
    }

    #[test]
    fn test_day_horizon_checks_days_and_minutes() {
        // 10d horizon → [5, 15] days.
        let patterns = vec![
            "ret_4d",
            "ret_5d",
            "ret_10d",
            "ret_15d",
            "ret_16d",
            "vol_7200m",  // 5 days
            "vol_1440m",  // 1 day
            "vol_21600m", // 15 days
        ];
        let excluded = temporal_overlap_features(10 * 1440, patterns);
        let expected: BTreeSet<String> =
            ["ret_5d", "ret_10d", "ret_15d", "vol_7200m", "vol_21600m"]
                .iter()
                .map(|s| s.to_string())
                .collect();
        assert_eq!(excluded, expected);
    }

    #[test]
    fn test_day_window_floor_is_one_day() {
        // 1.5d horizon → lower edge clamps to 1 day.
        let window = OverlapBand::default().day_window(2160);
        assert_eq!(window.min, 1.0);
        assert!((window.max - 2.25).abs() < 1e-12);
    }

    #[test]
    fn test_patterns_without_windows_are_kept() {
        let excluded = temporal_overlap_features(60, vec!["rsi_14", "macd_signal", "obv"]);
        assert!(excluded.is_empty());
    }

    #[test]
    fn test_custom_band() {
        let band = OverlapBand {
            lower_ratio: 1.0,
            upper_ratio: 1.0,
        };
        let excluded = band.overlapping(60, minute_patterns());
        assert_eq!(excluded.len(), 1);
        assert!(excluded.contains("ret_60m"));
    }
}
