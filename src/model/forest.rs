//! Bagged decision-tree classifier (random forest)

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::model::tree::{Criterion, DecisionTree, TreeParams};
use crate::{FlashError, Result};

/// Features considered at each split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    All,
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> Option<usize> {
        match self {
            MaxFeatures::Sqrt => Some(((n_features as f64).sqrt().floor() as usize).max(1)),
            MaxFeatures::Log2 => Some(((n_features as f64).log2().floor() as usize).max(1)),
            MaxFeatures::All => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sqrt" => Some(MaxFeatures::Sqrt),
            "log2" => Some(MaxFeatures::Log2),
            "all" | "none" => Some(MaxFeatures::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    /// Reweight classes inversely to their frequency
    pub balanced: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        ForestParams {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            balanced: false,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    /// Mean normalized impurity decrease per feature, sums to 1 unless no split was made
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn fit(rows: &[Vec<f64>], labels: &[bool], params: &ForestParams) -> Result<Self> {
        let n = rows.len();
        if n == 0 || labels.len() != n {
            return Err(FlashError::InsufficientData {
                available: n,
                required: 1,
            });
        }
        if params.n_estimators == 0 {
            return Err(FlashError::InvalidHyperparameter {
                name: "n_estimators".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let n_features = rows[0].len();
        let targets: Vec<f64> = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();
        let weights = class_weights(labels, params.balanced);
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
            max_features: params.max_features.resolve(n_features),
            criterion: Criterion::Gini,
        };

        // Every tree draws from its own seeded stream, so the result does not
        // depend on which thread fits which tree.
        let fitted: Vec<(DecisionTree, Vec<f64>)> = (0..params.n_estimators)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64 * 7919));
                let samples: Vec<usize> = if params.bootstrap {
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                DecisionTree::fit(rows, &targets, &weights, samples, &tree_params, &mut rng)
            })
            .collect();

        let mut importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(fitted.len());
        for (tree, tree_importances) in fitted {
            let total: f64 = tree_importances.iter().sum();
            if total > 0.0 {
                for (acc, v) in importances.iter_mut().zip(tree_importances.iter()) {
                    *acc += v / total;
                }
            }
            trees.push(tree);
        }
        let sum: f64 = importances.iter().sum();
        if sum > 0.0 {
            importances.iter_mut().for_each(|v| *v /= sum);
        }

        Ok(RandomForest { trees, importances })
    }

    /// Probability that the positive class (home win) occurs
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

fn class_weights(labels: &[bool], balanced: bool) -> Vec<f64> {
    if !balanced {
        return vec![1.0; labels.len()];
    }
    let n = labels.len() as f64;
    let positives = labels.iter().filter(|&&l| l).count() as f64;
    let negatives = n - positives;
    let weight_pos = if positives > 0.0 { n / (2.0 * positives) } else { 1.0 };
    let weight_neg = if negatives > 0.0 { n / (2.0 * negatives) } else { 1.0 };
    labels
        .iter()
        .map(|&l| if l { weight_pos } else { weight_neg })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable(n: usize) -> (Vec<Vec<f64>>, Vec<bool>) {
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![i as f64 / n as f64, ((i * 7) % 5) as f64])
            .collect();
        let labels = (0..n).map(|i| i >= n / 2).collect();
        (rows, labels)
    }

    #[test]
    fn test_forest_learns_informative_feature() {
        let (rows, labels) = separable(60);
        let params = ForestParams {
            n_estimators: 15,
            max_features: MaxFeatures::All,
            ..ForestParams::default()
        };
        let forest = RandomForest::fit(&rows, &labels, &params).unwrap();

        assert_eq!(forest.n_trees(), 15);
        assert!(forest.predict_proba(&[0.05, 1.0]) < 0.5);
        assert!(forest.predict_proba(&[0.95, 1.0]) > 0.5);

        let imp = forest.feature_importances();
        assert!(imp[0] > imp[1]);
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_forest_is_deterministic_for_seed() {
        let (rows, labels) = separable(40);
        let params = ForestParams {
            n_estimators: 8,
            ..ForestParams::default()
        };
        let a = RandomForest::fit(&rows, &labels, &params).unwrap();
        let b = RandomForest::fit(&rows, &labels, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_balanced_weights() {
        let w = class_weights(&[true, false, false, false], true);
        assert!((w[0] - 2.0).abs() < 1e-12);
        assert!((w[1] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(class_weights(&[true, false], false), vec![1.0, 1.0]);
    }

    #[test]
    fn test_empty_input_is_rejected() {
        assert!(RandomForest::fit(&[], &[], &ForestParams::default()).is_err());
    }

    #[test]
    fn test_max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(29), Some(5));
        assert_eq!(MaxFeatures::Log2.resolve(29), Some(4));
        assert_eq!(MaxFeatures::All.resolve(29), None);
    }
}
