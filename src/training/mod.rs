//! Model training
//!
//! Cross-validation, the winner and score trainers, metrics and
//! hyperparameter search.

pub mod evaluation;
pub mod hyperparams;
pub mod metrics;
pub mod optimizer;
pub mod score;
pub mod winner;

pub use evaluation::{evaluate, EvaluationResult};
pub use hyperparams::{Dimension, Hyperparameters, ParamValue, SearchSpace};
pub use metrics::{ClassificationMetrics, RegressionMetrics};
pub use optimizer::{optimize, OptimizationOutcome, OptimizationTrial};
pub use score::{score_objective, train_score_model, ScoreFamily};
pub use winner::{train_winner_model, winner_objective, WinnerFamily};
