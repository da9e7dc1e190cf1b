//! # Feature Exclusion Configuration
//!
//! The flat exclusion document consumed by the leakage filter.
//!
//! ## Document Shape
//! ```toml
//! definite_leaks = ["fwd_ret_1d_raw", "next_open"]
//! temporal_overlap_30m_plus = ["ret_30m", "vol_60m", "ret_5d"]
//! metadata_columns = ["ts", "symbol"]
//! target_patterns = ["^fwd_ret_", "^y_will_"]
//! exclude_definite_leaks = true
//! exclude_temporal_overlap = true
//! exclude_metadata = true
//! exclude_targets = true
//! ```
//! TOML, YAML and JSON are accepted, chosen by file extension. A missing file
//! is not an error for [`ExclusionConfig::load_or_default`]: it yields an
//! empty configuration and a warning.

use crate::error::GuardError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};

/// Boolean toggles of the exclusion document. All default to `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionFlags {
    #[serde(default = "default_true")]
    pub exclude_definite_leaks: bool,

    #[serde(default = "default_true")]
    pub exclude_temporal_overlap: bool,

    #[serde(default = "default_true")]
    pub exclude_metadata: bool,

    #[serde(default = "default_true")]
    pub exclude_targets: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ExclusionFlags {
    fn default() -> Self {
        Self {
            exclude_definite_leaks: true,
            exclude_temporal_overlap: true,
            exclude_metadata: true,
            exclude_targets: true,
        }
    }
}

/// Feature exclusion configuration.
///
/// Immutable once loaded; the filter only ever borrows it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExclusionConfig {
    /// Columns that leak unconditionally.
    #[serde(default)]
    pub definite_leaks: BTreeSet<String>,

    /// Windowed feature names checked against a target's horizon.
    #[serde(default, alias = "temporal_overlap_patterns")]
    pub temporal_overlap_30m_plus: BTreeSet<String>,

    /// Identifier and bookkeeping columns.
    #[serde(default)]
    pub metadata_columns: BTreeSet<String>,

    /// Regexes identifying target columns, matched from the start of the name.
    #[serde(default)]
    pub target_patterns: Vec<String>,

    #[serde(flatten)]
    pub flags: ExclusionFlags,
}

impl ExclusionConfig {
    /// Load from a `.toml`, `.yaml`/`.yml` or `.json` file.
    pub fn load(path: &Path) -> Result<Self, GuardError> {
        let content = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let config = match ext.as_deref() {
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => {
                // An empty YAML document is a valid, empty exclusion list.
                if content.trim().is_empty() {
                    Self::default()
                } else {
                    serde_yaml::from_str(&content)?
                }
            }
            Some("json") => serde_json::from_str(&content)?,
            _ => return Err(GuardError::UnsupportedFormat(path.to_path_buf())),
        };

        debug!(path = %path.display(), "Loaded exclusion config");
        Ok(config)
    }

    /// Load, degrading to an empty configuration on any failure.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            warn!(path = %path.display(), "Exclusion config not found, excluding nothing");
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Exclusion config unreadable, excluding nothing"
                );
                Self::default()
            }
        }
    }

    /// Compile `target_patterns`, failing on the first invalid regex.
    pub fn compile_target_patterns(&self) -> Result<TargetPatterns, GuardError> {
        let mut compiled = Vec::with_capacity(self.target_patterns.len());
        for pattern in &self.target_patterns {
            compiled.push(anchored(pattern).map_err(|source| GuardError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?);
        }
        Ok(TargetPatterns { compiled })
    }

    /// Compile `target_patterns`, skipping (and logging) invalid regexes.
    pub fn target_patterns_lossy(&self) -> TargetPatterns {
        let compiled = self
            .target_patterns
            .iter()
            .filter_map(|pattern| match anchored(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Skipping invalid target pattern");
                    None
                }
            })
            .collect();
        TargetPatterns { compiled }
    }
}

/// Anchor a pattern at the start of the column name.
fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})", pattern))
}

/// Compiled target-column patterns.
#[derive(Debug, Clone, Default)]
pub struct TargetPatterns {
    compiled: Vec<Regex>,
}

impl TargetPatterns {
    /// True if `column` matches any target pattern.
    pub fn matches(&self, column: &str) -> bool {
        self.compiled.iter().any(|re| re.is_match(column))
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}
