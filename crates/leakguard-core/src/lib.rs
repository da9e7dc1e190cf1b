//! # Leakguard Core
//!
//! Leakage hygiene for bar-indexed training pipelines.
//!
//! Pure computation over already-materialized inputs: the only I/O is
//! reading the exclusion document in [`exclusion`].
//!
//! ## Modules
//! - `horizon`: target name → [`TargetHorizon`]
//! - `overlap`: horizon → temporally overlapping feature patterns
//! - `exclusion`: the flat exclusion document
//! - `leakage`: target-aware safe-feature filtering
//! - `time_contract`: `t+1` label boundary and as-of checks
//! - `ghost`: day-or-longer lookback scanner
//!
//! ## Usage
//! ```ignore
//! use leakguard_core::{ExclusionConfig, LeakageFilter};
//!
//! let config = ExclusionConfig::load_or_default(Path::new("CONFIG/excluded_features.yaml"));
//! let safe = LeakageFilter::new(&config).filter(&columns, "fwd_ret_60m");
//! ```

pub mod error;
pub mod exclusion;
pub mod ghost;
pub mod horizon;
pub mod leakage;
pub mod overlap;
pub mod time_contract;

pub use error::GuardError;
pub use exclusion::{ExclusionConfig, ExclusionFlags, TargetPatterns};
pub use ghost::{GhostFeature, find_ghost_features};
pub use horizon::{HorizonUnit, MINUTES_PER_DAY, TargetHorizon, parse_target_horizon};
pub use leakage::{
    FilterReport, LeakageFilter, excluded_features_for_target, filter_features,
    filter_features_for_target,
};
pub use overlap::{OverlapBand, temporal_overlap_features};
pub use time_contract::{
    DecisionTime, LabelStart, LabelWindow, PriceAdjustment, TimeContract, as_of_safety_check,
    compute_label_window, validate_feature_as_of_safety, validate_label_start,
};
