//! CART decision trees
//!
//! One implementation serves both the classification forest (Gini impurity on
//! 0/1 targets, leaves hold the weighted positive fraction) and the boosted
//! regressor (squared error, leaves hold the weighted mean).

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criterion {
    Gini,
    SquaredError,
}

#[derive(Debug, Clone)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features considered per split (None = all)
    pub max_features: Option<usize>,
    pub criterion: Criterion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A fitted tree stored as a flat node arena (root at index 0)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    n_features: usize,
}

/// Weighted sums over a set of samples
#[derive(Debug, Clone, Copy, Default)]
struct NodeStats {
    w: f64,
    wy: f64,
    wy2: f64,
}

impl NodeStats {
    fn add(&mut self, y: f64, w: f64) {
        self.w += w;
        self.wy += w * y;
        self.wy2 += w * y * y;
    }

    fn sub(&self, other: &NodeStats) -> NodeStats {
        NodeStats {
            w: self.w - other.w,
            wy: self.wy - other.wy,
            wy2: self.wy2 - other.wy2,
        }
    }

    fn value(&self) -> f64 {
        if self.w <= 0.0 {
            0.0
        } else {
            self.wy / self.w
        }
    }

    /// Impurity scaled by total weight
    fn weighted_impurity(&self, criterion: Criterion) -> f64 {
        if self.w <= 0.0 {
            return 0.0;
        }
        match criterion {
            Criterion::Gini => {
                let p = self.wy / self.w;
                2.0 * p * (1.0 - p) * self.w
            }
            Criterion::SquaredError => (self.wy2 - self.wy * self.wy / self.w).max(0.0),
        }
    }
}

struct Builder<'a> {
    rows: &'a [Vec<f64>],
    targets: &'a [f64],
    weights: &'a [f64],
    params: &'a TreeParams,
    rng: &'a mut StdRng,
    nodes: Vec<Node>,
    importances: Vec<f64>,
    n_features: usize,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl Builder<'_> {
    fn stats(&self, samples: &[usize]) -> NodeStats {
        let mut stats = NodeStats::default();
        for &i in samples {
            stats.add(self.targets[i], self.weights[i]);
        }
        stats
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        match self.params.max_features {
            Some(m) if m < self.n_features => {
                let mut picked = rand::seq::index::sample(&mut *self.rng, self.n_features, m.max(1)).into_vec();
                picked.sort_unstable();
                picked
            }
            _ => (0..self.n_features).collect(),
        }
    }

    fn best_split(&mut self, samples: &[usize], parent: &NodeStats) -> Option<BestSplit> {
        let criterion = self.params.criterion;
        let min_leaf = self.params.min_samples_leaf.max(1);
        let parent_impurity = parent.weighted_impurity(criterion);
        let mut best: Option<BestSplit> = None;

        for feature in self.candidate_features() {
            let mut sorted: Vec<(f64, usize)> = samples
                .iter()
                .map(|&i| (self.rows[i][feature], i))
                .collect();
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left = NodeStats::default();
            for pos in 0..sorted.len() - 1 {
                let (value, idx) = sorted[pos];
                left.add(self.targets[idx], self.weights[idx]);

                let next = sorted[pos + 1].0;
                let left_count = pos + 1;
                let right_count = sorted.len() - left_count;
                if next <= value || left_count < min_leaf || right_count < min_leaf {
                    continue;
                }

                let right = parent.sub(&left);
                let gain = parent_impurity
                    - left.weighted_impurity(criterion)
                    - right.weighted_impurity(criterion);

                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit {
                        feature,
                        threshold: value + (next - value) / 2.0,
                        gain,
                    });
                }
            }
        }

        best
    }

    fn build(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let stats = self.stats(&samples);
        let index = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: stats.value(),
        });

        let params = self.params;
        if depth >= params.max_depth
            || samples.len() < params.min_samples_split.max(2)
            || samples.len() < 2 * params.min_samples_leaf.max(1)
            || stats.weighted_impurity(params.criterion) <= 1e-12
        {
            return index;
        }

        let Some(split) = self.best_split(&samples, &stats) else {
            return index;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .copied()
            .partition(|&i| self.rows[i][split.feature] <= split.threshold);
        if left.is_empty() || right.is_empty() {
            return index;
        }

        self.importances[split.feature] += split.gain;
        let left_index = self.build(left, depth + 1);
        let right_index = self.build(right, depth + 1);
        self.nodes[index] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: left_index,
            right: right_index,
        };
        index
    }
}

impl DecisionTree {
    /// Fit on the rows listed in `samples` (duplicates allowed for bootstrap draws).
    ///
    /// Returns the tree and the total weighted impurity decrease per feature.
    pub fn fit(
        rows: &[Vec<f64>],
        targets: &[f64],
        weights: &[f64],
        samples: Vec<usize>,
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> (Self, Vec<f64>) {
        let n_features = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut builder = Builder {
            rows,
            targets,
            weights,
            params,
            rng,
            nodes: Vec::new(),
            importances: vec![0.0; n_features],
            n_features,
        };

        builder.build(samples, 0);

        let tree = DecisionTree {
            nodes: builder.nodes,
            n_features,
        };
        (tree, builder.importances)
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    index = if value <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn params(criterion: Criterion) -> TreeParams {
        TreeParams {
            max_depth: 4,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            criterion,
        }
    }

    #[test]
    fn test_classification_tree_separates_threshold() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 1.0]).collect();
        let targets: Vec<f64> = (0..20).map(|i| if i >= 10 { 1.0 } else { 0.0 }).collect();
        let weights = vec![1.0; 20];
        let mut rng = StdRng::seed_from_u64(1);

        let (tree, importances) = DecisionTree::fit(
            &rows,
            &targets,
            &weights,
            (0..20).collect(),
            &params(Criterion::Gini),
            &mut rng,
        );

        assert_eq!(tree.predict(&[3.0, 1.0]), 0.0);
        assert_eq!(tree.predict(&[15.0, 1.0]), 1.0);
        assert!(importances[0] > 0.0);
        assert_eq!(importances[1], 0.0);
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn test_regression_tree_fits_step() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let targets: Vec<f64> = (0..10).map(|i| if i < 5 { 10.0 } else { 30.0 }).collect();
        let weights = vec![1.0; 10];
        let mut rng = StdRng::seed_from_u64(1);

        let (tree, _) = DecisionTree::fit(
            &rows,
            &targets,
            &weights,
            (0..10).collect(),
            &params(Criterion::SquaredError),
            &mut rng,
        );

        assert!((tree.predict(&[1.0]) - 10.0).abs() < 1e-12);
        assert!((tree.predict(&[8.0]) - 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_depth_zero_is_single_leaf_mean() {
        let rows = vec![vec![0.0], vec![1.0]];
        let targets = vec![2.0, 4.0];
        let mut p = params(Criterion::SquaredError);
        p.max_depth = 0;
        let mut rng = StdRng::seed_from_u64(1);

        let (tree, _) = DecisionTree::fit(&rows, &targets, &[1.0, 1.0], vec![0, 1], &p, &mut rng);
        assert_eq!(tree.node_count(), 1);
        assert!((tree.predict(&[0.0]) - 3.0).abs() < 1e-12);
    }
}
