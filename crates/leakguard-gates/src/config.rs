//! Governance configuration, loaded from TOML.
//!
//! ```toml
//! [history]
//! max_runs_per_item = 10
//!
//! [reproducibility]
//! score_tolerance = 0.001
//! importance_tolerance = 0.01
//!
//! [overlap]
//! lower_ratio = 0.5
//! upper_ratio = 1.5
//!
//! [routing]
//! factor = 1.1
//! cs_auc_ceiling = 0.9
//!
//! [features]
//! max_features = 100
//! ```
//!
//! Every section and field is optional.

use leakguard_core::OverlapBand;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::GovernanceError;
use crate::history::HistoryConfig;
use crate::patch::{FeatureCapConfig, RoutingTightening};
use crate::reproducibility::ReproducibilityConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernanceConfig {
    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub reproducibility: ReproducibilityConfig,

    #[serde(default)]
    pub overlap: OverlapBand,

    #[serde(default)]
    pub routing: RoutingTightening,

    #[serde(default)]
    pub features: FeatureCapConfig,
}

impl GovernanceConfig {
    pub fn load(path: &Path) -> Result<Self, GovernanceError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load, falling back to defaults when the file is missing or malformed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(GovernanceError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = ?path, "Governance config not found, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Governance config unreadable, using defaults");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("governance.toml");
        std::fs::write(
            &path,
            "[history]\nmax_runs_per_item = 25\n\n[routing]\ncs_auc_ceiling = 0.8\n",
        )
        .unwrap();

        let config = GovernanceConfig::load(&path).unwrap();
        assert_eq!(config.history.max_runs_per_item, 25);
        assert_eq!(config.history.file_name, "reproducibility_log.json");
        assert_eq!(config.routing.cs_auc_ceiling, 0.8);
        assert_eq!(config.routing.factor, 1.1);
        assert_eq!(config.reproducibility.score_tolerance, 0.001);
        assert_eq!(config.overlap.upper_ratio, 1.5);
        assert_eq!(config.features.max_features, 100);
    }

    #[test]
    fn test_missing_or_bad_file_defaults() {
        let dir = tempdir().unwrap();
        let missing = GovernanceConfig::load_or_default(&dir.path().join("none.toml"));
        assert_eq!(missing.history.max_runs_per_item, 10);

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[history\nmax_runs_per_item = ").unwrap();
        assert!(GovernanceConfig::load(&bad).is_err());
        assert_eq!(
            GovernanceConfig::load_or_default(&bad)
                .reproducibility
                .importance_tolerance,
            0.01
        );
    }
}
