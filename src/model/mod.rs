//! Learners and trained-model artifacts

pub mod artifact;
pub mod boosting;
pub mod forest;
pub mod linalg;
pub mod linear;
pub mod stacking;
pub mod tree;

use std::collections::BTreeMap;

use crate::features::{ExampleSet, TrainingExample};
use crate::{ModelKind, Result};

pub use artifact::{FeatureImportance, ModelArtifact, Predictor, ScoreModel, WinnerModel};
pub use boosting::{BoostingParams, GradientBoostedRegressor};
pub use forest::{ForestParams, MaxFeatures, RandomForest};
pub use linear::LinearModel;
pub use stacking::{ScorePipeline, StackingParams, StackingRegressor};

/// A configured learner that cross-validation can fit and score
///
/// Implementations are cheap, immutable descriptions of one hyperparameter
/// setting; `fit` may be called from several threads at once.
pub trait ModelFamily: Send + Sync {
    type Model;

    fn kind(&self) -> ModelKind;

    /// Class used to stratify folds, or None when folds need no stratification
    fn stratum(&self, example: &TrainingExample) -> Option<bool>;

    fn fit(&self, train: &ExampleSet) -> Result<Self::Model>;

    /// Metrics of a fitted model on held-out examples, keyed by metric name
    fn score(&self, model: &Self::Model, held_out: &ExampleSet) -> Result<BTreeMap<String, f64>>;
}
