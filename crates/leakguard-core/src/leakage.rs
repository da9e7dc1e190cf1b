//! # Target-Aware Leakage Filter
//!
//! Produces the safe feature subset for one target.
//!
//! ## Removal Rules
//! 1. The target column itself
//! 2. `definite_leaks` (when `exclude_definite_leaks`)
//! 3. Horizon overlap: patterns from [`OverlapBand`] for the parsed horizon, or
//!    the whole `temporal_overlap_30m_plus` list when the horizon is unknown
//!    (when `exclude_temporal_overlap`)
//! 4. `metadata_columns` (when `exclude_metadata`)
//! 5. Any column matching a `target_patterns` regex (when `exclude_targets`)
//!
//! Rules 2-4 are name lookups ("excluded by name"); rule 5 is a regex match
//! ("excluded by pattern"). The target column is dropped by identity before
//! either lookup, so a target that matches its own pattern is removed once and
//! counted in neither bucket.
//!
//! Output preserves input order. The exclusion set is recomputed per call
//! because it depends on the target's horizon.

use crate::exclusion::{ExclusionConfig, TargetPatterns};
use crate::horizon::{TargetHorizon, parse_target_horizon};
use crate::overlap::OverlapBand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Outcome of filtering one column list for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterReport {
    pub target: String,
    /// Parsed horizon, `None` when the target name carries no horizon.
    pub horizon: Option<TargetHorizon>,
    pub total_columns: usize,
    /// Safe features in input order.
    pub safe_features: Vec<String>,
    pub excluded_by_name: Vec<String>,
    pub excluded_by_pattern: Vec<String>,
    /// Whether the target column appeared in the input.
    pub target_column_present: bool,
}

impl FilterReport {
    pub fn safe_count(&self) -> usize {
        self.safe_features.len()
    }

    pub fn excluded_count(&self) -> usize {
        self.excluded_by_name.len() + self.excluded_by_pattern.len()
    }
}

/// Leakage filter bound to one exclusion configuration.
pub struct LeakageFilter<'a> {
    config: &'a ExclusionConfig,
    band: OverlapBand,
    target_patterns: TargetPatterns,
}

impl<'a> LeakageFilter<'a> {
    /// Create a filter with the default overlap band.
    ///
    /// Invalid target patterns are logged and skipped.
    pub fn new(config: &'a ExclusionConfig) -> Self {
        let target_patterns = if config.flags.exclude_targets {
            config.target_patterns_lossy()
        } else {
            TargetPatterns::default()
        };
        Self {
            config,
            band: OverlapBand::default(),
            target_patterns,
        }
    }

    /// Override the overlap guard band.
    pub fn with_band(mut self, band: OverlapBand) -> Self {
        self.band = band;
        self
    }

    pub fn band(&self) -> OverlapBand {
        self.band
    }

    /// Name-based exclusion set for `target_name`.
    pub fn excluded_features_for_target(&self, target_name: &str) -> BTreeSet<String> {
        let mut excluded = BTreeSet::new();
        let flags = &self.config.flags;

        if flags.exclude_definite_leaks {
            excluded.extend(self.config.definite_leaks.iter().cloned());
        }

        if flags.exclude_temporal_overlap {
            match parse_target_horizon(target_name) {
                Some(horizon) => {
                    let overlap = self
                        .band
                        .overlapping(horizon.minutes, &self.config.temporal_overlap_30m_plus);
                    debug!(
                        target = %target_name,
                        horizon = %horizon,
                        excluded = overlap.len(),
                        "Excluding temporal overlap features"
                    );
                    excluded.extend(overlap);
                }
                None => {
                    debug!(
                        target = %target_name,
                        "Horizon unknown, excluding default 30m+ overlap band"
                    );
                    excluded.extend(self.config.temporal_overlap_30m_plus.iter().cloned());
                }
            }
        }

        if flags.exclude_metadata {
            excluded.extend(self.config.metadata_columns.iter().cloned());
        }

        excluded
    }

    /// Filter `columns` for `target_name`, returning the full report.
    pub fn filter_with_report<S: AsRef<str>>(
        &self,
        columns: &[S],
        target_name: &str,
    ) -> FilterReport {
        let excluded = self.excluded_features_for_target(target_name);
        let horizon = parse_target_horizon(target_name);

        let mut safe_features = Vec::new();
        let mut excluded_by_name = Vec::new();
        let mut excluded_by_pattern = Vec::new();
        let mut target_column_present = false;

        for col in columns.iter().map(AsRef::as_ref) {
            if col == target_name {
                target_column_present = true;
                continue;
            }
            if excluded.contains(col) {
                excluded_by_name.push(col.to_string());
                continue;
            }
            if self.target_patterns.matches(col) {
                excluded_by_pattern.push(col.to_string());
                continue;
            }
            safe_features.push(col.to_string());
        }

        let report = FilterReport {
            target: target_name.to_string(),
            horizon,
            total_columns: columns.len(),
            safe_features,
            excluded_by_name,
            excluded_by_pattern,
            target_column_present,
        };

        info!(
            target = %target_name,
            horizon = %horizon.map(|h| h.to_string()).unwrap_or_else(|| "unknown".to_string()),
            total = report.total_columns,
            safe = report.safe_count(),
            excluded_by_name = report.excluded_by_name.len(),
            excluded_by_pattern = report.excluded_by_pattern.len(),
            "Feature filtering complete"
        );

        report
    }

    /// Safe features for `target_name`, in input order.
    pub fn filter<S: AsRef<str>>(&self, columns: &[S], target_name: &str) -> Vec<String> {
        self.filter_with_report(columns, target_name).safe_features
    }

    /// Target-agnostic filtering: leaks, metadata and target columns only.
    pub fn filter_agnostic<S: AsRef<str>>(&self, columns: &[S]) -> Vec<String> {
        let flags = &self.config.flags;
        let safe: Vec<String> = columns
            .iter()
            .map(AsRef::as_ref)
            .filter(|col| {
                !(flags.exclude_definite_leaks && self.config.definite_leaks.contains(*col))
            })
            .filter(|col| {
                !(flags.exclude_metadata && self.config.metadata_columns.contains(*col))
            })
            .filter(|col| !self.target_patterns.matches(col))
            .map(str::to_string)
            .collect();

        info!(
            total = columns.len(),
            safe = safe.len(),
            "Target-agnostic feature filtering complete"
        );
        safe
    }
}

/// Safe features for `target_name` under `config` with the default band.
pub fn filter_features_for_target<S: AsRef<str>>(
    columns: &[S],
    target_name: &str,
    config: &ExclusionConfig,
) -> Vec<String> {
    LeakageFilter::new(config).filter(columns, target_name)
}

/// Name-based exclusion set for `target_name` under `config`.
pub fn excluded_features_for_target(
    target_name: &str,
    config: &ExclusionConfig,
) -> BTreeSet<String> {
    LeakageFilter::new(config).excluded_features_for_target(target_name)
}

/// Target-agnostic safe features under `config`.
pub fn filter_features<S: AsRef<str>>(columns: &[S], config: &ExclusionConfig) -> Vec<String> {
    LeakageFilter::new(config).filter_agnostic(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusion::ExclusionFlags;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn config() -> ExclusionConfig {
        ExclusionConfig {
            definite_leaks: set(&["next_open", "fwd_high"]),
            temporal_overlap_30m_plus: set(&[
                "ret_15m", "ret_30m", "ret_60m", "vol_90m", "vol_120m", "ret_5d", "ret_20d",
            ]),
            metadata_columns: set(&["ts", "symbol"]),
            target_patterns: vec!["fwd_ret_".to_string(), "y_will_".to_string()],
            flags: ExclusionFlags::default(),
        }
    }

    fn columns() -> Vec<&'static str> {
        vec![
            "ts",
            "symbol",
            "rsi_14",
            "ret_15m",
            "ret_30m",
            "ret_60m",
            "vol_90m",
            "vol_120m",
            "ret_5d",
            "ret_20d",
            "next_open",
            "fwd_ret_60m",
            "fwd_ret_5d",
            "y_will_peak_60m_0.8",
            "obv",
        ]
    }

    #[test]
    fn test_minute_target_filtering() {
        let config = config();
        let report = LeakageFilter::new(&config).filter_with_report(&columns(), "fwd_ret_60m");

        assert_eq!(
            report.safe_features,
            vec!["rsi_14", "ret_15m", "vol_120m", "ret_5d", "ret_20d", "obv"]
        );
        assert_eq!(
            report.excluded_by_name,
            vec!["ts", "symbol", "ret_30m", "ret_60m", "vol_90m", "next_open"]
        );
        assert_eq!(
            report.excluded_by_pattern,
            vec!["fwd_ret_5d", "y_will_peak_60m_0.8"]
        );
        assert!(report.target_column_present);
        assert_eq!(report.total_columns, columns().len());
        assert_eq!(report.horizon, Some(TargetHorizon::minutes(60)));
    }

    #[test]
    fn test_target_never_in_output() {
        let config = config();
        let filter = LeakageFilter::new(&config);
        for target in ["fwd_ret_60m", "fwd_ret_5d", "rsi_14", "obv", "unknown_target"] {
            let mut cols = columns();
            cols.push(target);
            let safe = filter.filter(&cols, target);
            assert!(!safe.iter().any(|c| c == target), "{} leaked", target);
        }
    }

    #[test]
    fn test_target_matching_own_pattern_removed_once() {
        let config = config();
        let report = LeakageFilter::new(&config).filter_with_report(&columns(), "fwd_ret_5d");

        assert!(report.target_column_present);
        assert!(!report.excluded_by_pattern.contains(&"fwd_ret_5d".to_string()));
        assert!(!report.excluded_by_name.contains(&"fwd_ret_5d".to_string()));
        // Other targets still go through the pattern bucket.
        assert!(report.excluded_by_pattern.contains(&"fwd_ret_60m".to_string()));
        assert_eq!(
            report.total_columns,
            report.safe_count() + report.excluded_count() + 1
        );
    }

    #[test]
    fn test_day_target_excludes_day_windows() {
        let config = config();
        let safe = LeakageFilter::new(&config).filter(&columns(), "fwd_ret_5d");
        // 5d horizon → [2.5, 7.5] days.
        assert!(!safe.contains(&"ret_5d".to_string()));
        assert!(safe.contains(&"ret_20d".to_string()));
        assert!(safe.contains(&"ret_60m".to_string()));
    }

    #[test]
    fn test_unknown_horizon_falls_back_to_full_list() {
        let config = config();
        let excluded = excluded_features_for_target("y_will_swing", &config);
        for pattern in &config.temporal_overlap_30m_plus {
            assert!(excluded.contains(pattern));
        }
    }

    #[test]
    fn test_flags_disable_rules() {
        let mut config = config();
        config.flags = ExclusionFlags {
            exclude_definite_leaks: false,
            exclude_temporal_overlap: false,
            exclude_metadata: false,
            exclude_targets: false,
        };
        let safe = filter_features_for_target(&columns(), "fwd_ret_60m", &config);
        assert_eq!(safe.len(), columns().len() - 1);
    }

    #[test]
    fn test_agnostic_filter() {
        let config = config();
        let safe = filter_features(&columns(), &config);
        assert!(safe.contains(&"ret_30m".to_string()));
        assert!(!safe.contains(&"next_open".to_string()));
        assert!(!safe.contains(&"ts".to_string()));
        assert!(!safe.contains(&"fwd_ret_60m".to_string()));
    }

    #[test]
    fn test_output_preserves_input_order() {
        let config = ExclusionConfig::default();
        let cols = vec!["zeta", "alpha", "mid"];
        let safe = filter_features_for_target(&cols, "fwd_ret_1d", &config);
        assert_eq!(safe, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_custom_band() {
        let config = config();
        let filter = LeakageFilter::new(&config).with_band(OverlapBand {
            lower_ratio: 1.0,
            upper_ratio: 1.0,
        });
        let safe = filter.filter(&columns(), "fwd_ret_60m");
        assert!(safe.contains(&"ret_30m".to_string()));
        assert!(!safe.contains(&"ret_60m".to_string()));
    }
}
