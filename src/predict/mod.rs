//! Prediction serving
//!
//! Scores fixtures with the registries' best models, keeps those models
//! fresh in the background and stores the predictions made after each refresh.

pub mod history;
pub mod inference;
pub mod refresh;

pub use history::{HistoryEntry, HistoryFilter, PredictionRecord, PredictionStore};
pub use inference::PredictionService;
pub use refresh::{
    FamilyOutcome, PredictionBatch, RefreshHandle, RefreshReport, RefreshService,
};
