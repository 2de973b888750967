//! Winner classifier: random forest with importance-based feature selection

use std::collections::BTreeMap;

use crate::features::{ExampleSet, FeatureSchema, TrainingExample};
use crate::model::{
    FeatureImportance, ForestParams, MaxFeatures, ModelArtifact, ModelFamily, Predictor,
    RandomForest, WinnerModel,
};
use crate::training::evaluation::{evaluate, EvaluationResult};
use crate::training::hyperparams::Hyperparameters;
use crate::training::metrics::ClassificationMetrics;
use crate::{Config, FlashError, ModelKind, Result, WinnerConfig};

/// Folds used for the winner model never drop below this
pub const MIN_WINNER_FOLDS: usize = 5;

/// A winner model fit on a selected subset of columns
#[derive(Debug, Clone)]
pub struct FittedWinner {
    pub schema: FeatureSchema,
    columns: Vec<usize>,
    pub model: WinnerModel,
}

impl FittedWinner {
    fn select_row(&self, row: &[f64]) -> Vec<f64> {
        self.columns.iter().map(|&c| row[c]).collect()
    }
}

#[derive(Debug, Clone)]
pub struct WinnerFamily {
    pub forest: ForestParams,
    pub selection: WinnerConfig,
}

impl WinnerFamily {
    pub fn from_hyperparameters(params: &Hyperparameters, config: &Config) -> Result<Self> {
        Ok(WinnerFamily {
            forest: forest_params(params, config.evaluation.seed)?,
            selection: config.winner.clone(),
        })
    }
}

/// Translate named hyperparameters into forest settings
pub fn forest_params(params: &Hyperparameters, seed: u64) -> Result<ForestParams> {
    let defaults = ForestParams::default();
    let max_features_name = params.choice_or("max_features", "sqrt")?;
    let max_features =
        MaxFeatures::parse(max_features_name).ok_or_else(|| FlashError::InvalidHyperparameter {
            name: "max_features".to_string(),
            reason: format!("unknown choice {}", max_features_name),
        })?;
    let balanced = match params.choice_or("class_weight", "none")? {
        "balanced" => true,
        "none" => false,
        other => {
            return Err(FlashError::InvalidHyperparameter {
                name: "class_weight".to_string(),
                reason: format!("unknown choice {}", other),
            })
        }
    };

    Ok(ForestParams {
        n_estimators: params.usize_or("n_estimators", defaults.n_estimators)?,
        max_depth: params.usize_or("max_depth", defaults.max_depth)?,
        min_samples_split: params.usize_or("min_samples_split", defaults.min_samples_split)?,
        min_samples_leaf: params.usize_or("min_samples_leaf", defaults.min_samples_leaf)?,
        max_features,
        bootstrap: params.bool_or("bootstrap", defaults.bootstrap)?,
        balanced,
        seed,
    })
}

/// Indices of features to keep, in schema order.
///
/// Keeps every feature whose importance share reaches `threshold`, topping up
/// with the next most important until at least `min_features` remain.
pub fn select_features(importances: &[f64], threshold: f64, min_features: usize) -> Vec<usize> {
    let total: f64 = importances.iter().sum();
    if total <= 0.0 {
        return (0..importances.len()).collect();
    }

    let mut ranked: Vec<usize> = (0..importances.len()).collect();
    ranked.sort_by(|&a, &b| importances[b].total_cmp(&importances[a]).then(a.cmp(&b)));

    let floor = min_features.min(importances.len());
    let mut keep: Vec<usize> = ranked
        .iter()
        .enumerate()
        .filter(|(rank, &i)| *rank < floor || importances[i] / total >= threshold)
        .map(|(_, &i)| i)
        .collect();
    keep.sort_unstable();
    keep
}

fn ranked_importances(schema: &FeatureSchema, importances: &[f64]) -> Vec<FeatureImportance> {
    let mut ranked: Vec<FeatureImportance> = schema
        .names()
        .iter()
        .zip(importances.iter())
        .map(|(name, &importance)| FeatureImportance {
            name: name.clone(),
            importance,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked
}

impl ModelFamily for WinnerFamily {
    type Model = FittedWinner;

    fn kind(&self) -> ModelKind {
        ModelKind::Winner
    }

    fn stratum(&self, example: &TrainingExample) -> Option<bool> {
        Some(example.home_win())
    }

    fn fit(&self, train: &ExampleSet) -> Result<FittedWinner> {
        let rows = train.rows();
        let labels: Vec<bool> = train.examples.iter().map(|e| e.home_win()).collect();

        let full = RandomForest::fit(&rows, &labels, &self.forest)?;
        let columns = select_features(
            full.feature_importances(),
            self.selection.importance_threshold,
            self.selection.min_features,
        );
        let feature_importances = ranked_importances(&train.schema, full.feature_importances());

        let forest = if columns.len() == train.schema.len() {
            full
        } else {
            log::debug!(
                "Feature selection kept {}/{} features",
                columns.len(),
                train.schema.len()
            );
            let reduced: Vec<Vec<f64>> = rows
                .iter()
                .map(|r| columns.iter().map(|&c| r[c]).collect())
                .collect();
            RandomForest::fit(&reduced, &labels, &self.forest)?
        };

        Ok(FittedWinner {
            schema: train.schema.select(&columns),
            columns,
            model: WinnerModel {
                forest,
                feature_importances,
            },
        })
    }

    fn score(
        &self,
        fitted: &FittedWinner,
        held_out: &ExampleSet,
    ) -> Result<BTreeMap<String, f64>> {
        let mut metrics = ClassificationMetrics::new();
        for example in &held_out.examples {
            let row = fitted.select_row(&example.features.values);
            metrics.update(fitted.model.home_win_probability(&row), example.home_win());
        }
        Ok(metrics.to_map())
    }
}

/// Cross-validate, then fit the final winner model on every example
pub fn train_winner_model(
    examples: &ExampleSet,
    hyperparams: &Hyperparameters,
    config: &Config,
) -> Result<(ModelArtifact, EvaluationResult)> {
    let family = WinnerFamily::from_hyperparameters(hyperparams, config)?;
    let k = config.evaluation.k_folds.max(MIN_WINNER_FOLDS);

    log::info!(
        "Training winner model on {} examples ({})",
        examples.len(),
        hyperparams
    );
    let evaluation = evaluate(&family, examples, k, &config.evaluation)?;
    log::info!(
        "Winner model cross-validated accuracy: {:.2}% over {} folds (home win rate {:.1}%)",
        evaluation.metric("accuracy").unwrap_or(0.0) * 100.0,
        evaluation.folds,
        evaluation.class_balance.unwrap_or(0.0) * 100.0
    );

    let fitted = family.fit(examples)?;
    let artifact = ModelArtifact {
        schema: fitted.schema,
        hyperparameters: hyperparams.clone(),
        predictor: Predictor::Winner(fitted.model),
    };
    Ok((artifact, evaluation))
}

/// Objective for the optimizer: negative cross-validated accuracy
pub fn winner_objective<'a>(
    examples: &'a ExampleSet,
    config: &'a Config,
) -> impl Fn(&Hyperparameters) -> Result<f64> + Sync + 'a {
    move |params| {
        let family = WinnerFamily::from_hyperparameters(params, config)?;
        let k = config.evaluation.k_folds.max(MIN_WINNER_FOLDS);
        let result = evaluate(&family, examples, k, &config.evaluation)?;
        Ok(-result.metric("accuracy").unwrap_or(0.0))
    }
}
