//! Ghost-feature scanner.
//!
//! Flags features whose names imply a lookback of a day or more. These are the
//! usual suspects when a pipeline reports a 1440-minute lookback that no
//! feature visibly declares.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::horizon::MINUTES_PER_DAY;

/// A feature whose name implies a lookback of at least one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostFeature {
    pub name: String,
    pub lookback_minutes: f64,
    pub reason: String,
}

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("static regex")
}

/// Name tokens that each imply a 1440-minute lookback, checked in order.
static DAY_TOKENS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (ci(r"_1d$"), "Ends in _1d"),
        (ci(r"_24h$"), "Ends in _24h"),
        (ci(r"^daily_"), "Starts with daily_"),
        (ci(r"_daily$"), "Ends with _daily"),
        (ci(r"daily"), "Contains \"daily\""),
        (ci(r"day"), "Contains \"day\""),
        (ci(r"_1440m"), "Contains _1440m"),
        (ci(r"1440(?:\D|$)"), "Contains 1440 (not followed by digit)"),
    ]
});

static MINUTE_SUFFIX: Lazy<Regex> = Lazy::new(|| ci(r"_(\d+)m$"));
static DAY_SUFFIX: Lazy<Regex> = Lazy::new(|| ci(r"_(\d+)d"));

/// Scan a feature list for day-or-longer lookbacks. Order follows the input.
pub fn find_ghost_features<S: AsRef<str>>(features: &[S]) -> Vec<GhostFeature> {
    features
        .iter()
        .filter_map(|name| classify(name.as_ref()))
        .collect()
}

fn classify(name: &str) -> Option<GhostFeature> {
    let ghost = |lookback_minutes: f64, reason: String| GhostFeature {
        name: name.to_string(),
        lookback_minutes,
        reason,
    };

    if let Some((_, reason)) = DAY_TOKENS.iter().find(|(re, _)| re.is_match(name)) {
        return Some(ghost(
            MINUTES_PER_DAY as f64,
            format!("{} (assumed 1440m = 24h)", reason),
        ));
    }

    if let Some(minutes) = MINUTE_SUFFIX
        .captures(name)
        .and_then(|c| c[1].parse::<u64>().ok())
        .filter(|m| *m >= MINUTES_PER_DAY)
    {
        return Some(ghost(minutes as f64, format!("Explicit {}m pattern", minutes)));
    }

    let days = DAY_SUFFIX
        .captures(name)
        .and_then(|c| c[1].parse::<u64>().ok())?;
    if days >= 1 {
        let minutes = days * MINUTES_PER_DAY;
        return Some(ghost(
            minutes as f64,
            format!("{} day(s) = {}m", days, minutes),
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_tokens() {
        let ghosts = find_ghost_features(&[
            "ret_1d",
            "vol_24h",
            "daily_range",
            "range_daily",
            "DayOfWeek",
        ]);
        assert_eq!(ghosts.len(), 5);
        assert!(ghosts.iter().all(|g| g.lookback_minutes == 1440.0));
        assert!(ghosts[0].reason.starts_with("Ends in _1d"));
        assert!(ghosts[4].reason.contains("day"));
    }

    #[test]
    fn test_explicit_minutes() {
        let ghosts = find_ghost_features(&["vol_2880m", "vol_60m", "vol_1439m"]);
        assert_eq!(ghosts.len(), 1);
        assert_eq!(ghosts[0].name, "vol_2880m");
        assert_eq!(ghosts[0].lookback_minutes, 2880.0);
    }

    #[test]
    fn test_1440_tokens() {
        let ghosts = find_ghost_features(&["vol_1440m", "sma1440", "sma14400x"]);
        let names: Vec<_> = ghosts.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["vol_1440m", "sma1440"]);
    }

    #[test]
    fn test_multi_day_suffix() {
        let ghosts = find_ghost_features(&["ret_5d", "ret_0d"]);
        assert_eq!(ghosts.len(), 1);
        assert_eq!(ghosts[0].lookback_minutes, 5.0 * 1440.0);
        assert_eq!(ghosts[0].reason, "5 day(s) = 7200m");
    }

    #[test]
    fn test_short_features_not_flagged() {
        assert!(find_ghost_features(&["ret_5m", "rsi_14", "obv"]).is_empty());
    }
}
