//! Feature extraction
//!
//! Converts player statistics and match history into model-ready features.

pub mod engineering;
pub mod form;
pub mod player_stats;
pub mod scaling;

pub use engineering::{
    build_examples, live_features, ExampleSet, FeatureSchema, FeatureVector, TrainingExample,
    FEATURE_NAMES,
};
pub use form::{FormSummary, MatchHistoryIndex, RecentResult};
pub use player_stats::{compute_player_stats, PlayerStats, PlayerStatsMap, RecordSummary};
pub use scaling::Standardizer;
