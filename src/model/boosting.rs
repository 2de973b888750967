//! Gradient boosted regression trees (squared error)

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::model::tree::{Criterion, DecisionTree, TreeParams};
use crate::{FlashError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Fraction of rows drawn (without replacement) for each stage
    pub subsample: f64,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        BoostingParams {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 5,
            min_samples_leaf: 1,
            subsample: 1.0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedRegressor {
    init: f64,
    learning_rate: f64,
    trees: Vec<DecisionTree>,
}

impl GradientBoostedRegressor {
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], params: &BoostingParams) -> Result<Self> {
        let n = rows.len();
        if n == 0 || targets.len() != n {
            return Err(FlashError::InsufficientData {
                available: n,
                required: 1,
            });
        }
        if !(params.learning_rate > 0.0) {
            return Err(FlashError::InvalidHyperparameter {
                name: "learning_rate".to_string(),
                reason: format!("must be positive, got {}", params.learning_rate),
            });
        }

        let init = targets.iter().sum::<f64>() / n as f64;
        let mut predictions = vec![init; n];
        let weights = vec![1.0; n];
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: 2,
            min_samples_leaf: params.min_samples_leaf,
            max_features: None,
            criterion: Criterion::SquaredError,
        };
        let sample_size = ((n as f64 * params.subsample.clamp(0.0, 1.0)).round() as usize).clamp(1, n);
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let residuals: Vec<f64> = targets
                .iter()
                .zip(predictions.iter())
                .map(|(y, p)| y - p)
                .collect();

            let samples: Vec<usize> = if sample_size < n {
                rand::seq::index::sample(&mut rng, n, sample_size).into_vec()
            } else {
                (0..n).collect()
            };

            let (tree, _) =
                DecisionTree::fit(rows, &residuals, &weights, samples, &tree_params, &mut rng);
            for (p, row) in predictions.iter_mut().zip(rows.iter()) {
                *p += params.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        Ok(GradientBoostedRegressor {
            init,
            learning_rate: params.learning_rate,
            trees,
        })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.init
            + self.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boosting_reduces_training_error() {
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64]).collect();
        let targets: Vec<f64> = (0..40).map(|i| (i as f64) * 2.0 + 5.0).collect();

        let params = BoostingParams {
            n_estimators: 50,
            max_depth: 3,
            ..BoostingParams::default()
        };
        let model = GradientBoostedRegressor::fit(&rows, &targets, &params).unwrap();

        let mae: f64 = rows
            .iter()
            .zip(targets.iter())
            .map(|(r, y)| (model.predict(r) - y).abs())
            .sum::<f64>()
            / 40.0;
        assert!(mae < 3.0, "mae {}", mae);
    }

    #[test]
    fn test_zero_estimators_predicts_mean() {
        let rows = vec![vec![0.0], vec![1.0]];
        let params = BoostingParams {
            n_estimators: 0,
            ..BoostingParams::default()
        };
        let model = GradientBoostedRegressor::fit(&rows, &[10.0, 20.0], &params).unwrap();
        assert!((model.predict(&[7.0]) - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_non_positive_learning_rate() {
        let params = BoostingParams {
            learning_rate: 0.0,
            ..BoostingParams::default()
        };
        assert!(GradientBoostedRegressor::fit(&[vec![1.0]], &[1.0], &params).is_err());
    }
}
