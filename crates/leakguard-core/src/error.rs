//! Error type for leakage-hygiene configuration loading.

use std::path::PathBuf;

/// Errors raised while loading or compiling exclusion configuration.
///
/// Filtering and parsing never fail; only reading the exclusion document
/// from disk and compiling its target patterns can.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported exclusion config format: {0:?} (expected .toml, .yaml, .yml or .json)")]
    UnsupportedFormat(PathBuf),

    #[error("Invalid target pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
