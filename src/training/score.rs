//! Score regressor: one stacking pipeline per side

use std::collections::BTreeMap;

use crate::features::{ExampleSet, TrainingExample};
use crate::model::{
    BoostingParams, ModelArtifact, ModelFamily, Predictor, ScoreModel, ScorePipeline,
    StackingParams,
};
use crate::training::evaluation::{evaluate, EvaluationResult};
use crate::training::hyperparams::Hyperparameters;
use crate::training::metrics::RegressionMetrics;
use crate::{Config, ModelKind, Result};

#[derive(Debug, Clone)]
pub struct ScoreFamily {
    pub stacking: StackingParams,
}

impl ScoreFamily {
    pub fn from_hyperparameters(params: &Hyperparameters, config: &Config) -> Result<Self> {
        Ok(ScoreFamily {
            stacking: stacking_params(params, config)?,
        })
    }
}

/// Translate named hyperparameters into stacking settings
pub fn stacking_params(params: &Hyperparameters, config: &Config) -> Result<StackingParams> {
    let defaults = StackingParams::default();
    let boost_defaults = BoostingParams::default();
    Ok(StackingParams {
        boosting: BoostingParams {
            n_estimators: params.usize_or("boost_estimators", boost_defaults.n_estimators)?,
            learning_rate: params.f64_or("boost_learning_rate", boost_defaults.learning_rate)?,
            max_depth: params.usize_or("boost_max_depth", boost_defaults.max_depth)?,
            min_samples_leaf: boost_defaults.min_samples_leaf,
            subsample: params.f64_or("boost_subsample", boost_defaults.subsample)?,
            seed: config.evaluation.seed,
        },
        ridge_alpha: params.f64_or("ridge_alpha", defaults.ridge_alpha)?,
        lasso_alpha: params.f64_or("lasso_alpha", defaults.lasso_alpha)?,
        final_alpha: params.f64_or("final_alpha", defaults.final_alpha)?,
        folds: config.score.stacking_folds,
    })
}

impl ModelFamily for ScoreFamily {
    type Model = ScoreModel;

    fn kind(&self) -> ModelKind {
        ModelKind::Score
    }

    fn stratum(&self, _example: &TrainingExample) -> Option<bool> {
        None
    }

    fn fit(&self, train: &ExampleSet) -> Result<ScoreModel> {
        let rows = train.rows();
        let home: Vec<f64> = train.examples.iter().map(|e| e.home_score as f64).collect();
        let away: Vec<f64> = train.examples.iter().map(|e| e.away_score as f64).collect();

        Ok(ScoreModel {
            home: ScorePipeline::fit(&rows, &home, &self.stacking)?,
            away: ScorePipeline::fit(&rows, &away, &self.stacking)?,
        })
    }

    fn score(&self, model: &ScoreModel, held_out: &ExampleSet) -> Result<BTreeMap<String, f64>> {
        let mut metrics = RegressionMetrics::new();
        for example in &held_out.examples {
            metrics.update(
                model.predict_raw(&example.features.values),
                (example.home_score as f64, example.away_score as f64),
            );
        }
        Ok(metrics.to_map())
    }
}

/// Cross-validate, then fit the final score model on every example
pub fn train_score_model(
    examples: &ExampleSet,
    hyperparams: &Hyperparameters,
    config: &Config,
) -> Result<(ModelArtifact, EvaluationResult)> {
    let family = ScoreFamily::from_hyperparameters(hyperparams, config)?;

    log::info!(
        "Training score model on {} examples ({})",
        examples.len(),
        hyperparams
    );
    let evaluation = evaluate(&family, examples, config.evaluation.k_folds, &config.evaluation)?;
    log::info!(
        "Score model cross-validated MAE: {:.2} (home {:.2}, away {:.2})",
        evaluation.metric("mae").unwrap_or(f64::NAN),
        evaluation.metric("home_mae").unwrap_or(f64::NAN),
        evaluation.metric("away_mae").unwrap_or(f64::NAN)
    );

    let model = family.fit(examples)?;
    let artifact = ModelArtifact {
        schema: examples.schema.clone(),
        hyperparameters: hyperparams.clone(),
        predictor: Predictor::Score(model),
    };
    Ok((artifact, evaluation))
}

/// Objective for the optimizer: cross-validated combined MAE
pub fn score_objective<'a>(
    examples: &'a ExampleSet,
    config: &'a Config,
) -> impl Fn(&Hyperparameters) -> Result<f64> + Sync + 'a {
    move |params| {
        let family = ScoreFamily::from_hyperparameters(params, config)?;
        let result = evaluate(&family, examples, config.evaluation.k_folds, &config.evaluation)?;
        Ok(result.metric("mae").unwrap_or(f64::INFINITY))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::{FeatureSchema, FeatureVector};
    use crate::training::hyperparams::ParamValue;
    use crate::FlashError;

    /// Scores are exact linear functions of the two features
    pub(crate) fn linear_examples(n: usize) -> ExampleSet {
        let examples = (0..n)
            .map(|i| {
                let a = (i % 12) as f64;
                let b = ((i * 5) % 7) as f64;
                TrainingExample {
                    features: FeatureVector::new(vec![a, b]),
                    home_score: (20.0 + 2.0 * a + b) as u32,
                    away_score: (30.0 - a + 2.0 * b) as u32,
                }
            })
            .collect();
        ExampleSet::new(FeatureSchema::new(vec!["a".to_string(), "b".to_string()]), examples)
    }

    pub(crate) fn quick_config() -> Config {
        let mut config = Config::default();
        config.evaluation.min_samples = 20;
        config.evaluation.k_folds = 3;
        config.score.stacking_folds = 3;
        config
    }

    pub(crate) fn quick_params() -> Hyperparameters {
        Hyperparameters::new()
            .with("boost_estimators", ParamValue::Int(20))
            .with("boost_max_depth", ParamValue::Int(3))
            .with("ridge_alpha", ParamValue::Real(0.01))
    }

    #[test]
    fn test_score_model_converges_on_linear_data() {
        let examples = linear_examples(72);
        let (artifact, evaluation) =
            train_score_model(&examples, &quick_params(), &quick_config()).unwrap();

        assert_eq!(artifact.kind(), ModelKind::Score);
        assert_eq!(artifact.schema, examples.schema);
        let mae = evaluation.metric("mae").unwrap();
        assert!(mae < 1.0, "mae {}", mae);
        for name in ["home_mae", "away_mae", "total_score_mae", "rmse"] {
            assert!(evaluation.metric(name).is_some(), "missing {}", name);
        }
        assert_eq!(evaluation.class_balance, None);

        let prediction = artifact
            .predict_score(&examples.schema, &FeatureVector::new(vec![4.0, 2.0]))
            .unwrap();
        // Exact scores are 30 and 30
        assert!((prediction.home_score as i64 - 30).abs() <= 1);
        assert!((prediction.away_score as i64 - 30).abs() <= 1);
        assert_eq!(
            prediction.total_score,
            prediction.home_score + prediction.away_score
        );
        assert_eq!(
            prediction.score_diff,
            prediction.home_score as i64 - prediction.away_score as i64
        );
    }

    #[test]
    fn test_stacking_params_from_hyperparameters() {
        let params = quick_params().with("final_alpha", ParamValue::Real(2.0));
        let stacking = stacking_params(&params, &quick_config()).unwrap();
        assert_eq!(stacking.boosting.n_estimators, 20);
        assert_eq!(stacking.final_alpha, 2.0);
        assert_eq!(stacking.folds, 3);
    }

    #[test]
    fn test_wrong_kind_prediction_is_rejected() {
        let examples = linear_examples(30);
        let (artifact, _) = train_score_model(&examples, &quick_params(), &quick_config()).unwrap();
        let result = artifact.predict_winner(&examples.schema, &FeatureVector::new(vec![1.0, 1.0]));
        assert!(matches!(result, Err(FlashError::WrongModelKind { .. })));
    }
}
