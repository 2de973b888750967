//! K-fold cross-validation over any [`ModelFamily`]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::features::ExampleSet;
use crate::model::ModelFamily;
use crate::training::metrics::mean_and_variance;
use crate::{EvaluationConfig, FlashError, Result};

/// Held-out performance of one model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Mean over folds
    pub metrics: BTreeMap<String, f64>,
    /// Population variance over folds
    pub variances: BTreeMap<String, f64>,
    pub folds: usize,
    pub sample_count: usize,
    pub evaluated_at: DateTime<Utc>,
    /// Fraction of positive labels, for stratified families
    #[serde(default)]
    pub class_balance: Option<f64>,
}

impl EvaluationResult {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

/// Assign example indices to `k` folds.
///
/// Examples are shuffled with `seed`, grouped by stratum and dealt round-robin,
/// so every fold gets a near-equal share of each class.
pub fn assign_folds(strata: &[Option<bool>], k: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..strata.len()).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let mut groups: BTreeMap<Option<bool>, Vec<usize>> = BTreeMap::new();
    for i in order {
        groups.entry(strata[i]).or_default().push(i);
    }

    let mut folds = vec![Vec::new(); k];
    let mut next = 0;
    for (_, members) in groups {
        for i in members {
            folds[next % k].push(i);
            next += 1;
        }
    }
    folds
}

fn single_class(strata: &[Option<bool>], indices: &[usize]) -> bool {
    let mut seen_true = false;
    let mut seen_false = false;
    for &i in indices {
        match strata[i] {
            Some(true) => seen_true = true,
            Some(false) => seen_false = true,
            None => return false,
        }
    }
    !(seen_true && seen_false)
}

/// Train on k-1 folds and score the held-out fold, k times
pub fn evaluate<F: ModelFamily>(
    family: &F,
    examples: &ExampleSet,
    k_folds: usize,
    config: &EvaluationConfig,
) -> Result<EvaluationResult> {
    let n = examples.len();
    let required = config.min_samples.max(k_folds).max(2);
    if n < required {
        return Err(FlashError::InsufficientData {
            available: n,
            required,
        });
    }
    let k = k_folds.max(2);

    let strata: Vec<Option<bool>> = examples.examples.iter().map(|e| family.stratum(e)).collect();
    let stratified = strata.iter().any(|s| s.is_some());

    let attempts = config.max_fold_retries.max(1);
    let mut folds = None;
    for attempt in 0..attempts {
        let candidate = assign_folds(&strata, k, config.seed.wrapping_add(attempt as u64));
        let degenerate = stratified
            && candidate.iter().enumerate().any(|(f, held)| {
                let train: Vec<usize> = candidate
                    .iter()
                    .enumerate()
                    .filter(|(g, _)| *g != f)
                    .flat_map(|(_, idx)| idx.iter().copied())
                    .collect();
                single_class(&strata, held) || single_class(&strata, &train)
            });
        if !degenerate {
            folds = Some(candidate);
            break;
        }
        log::debug!("Fold assignment {} is degenerate, reshuffling", attempt + 1);
    }
    let Some(folds) = folds else {
        log::warn!("{}", FlashError::DegenerateFold { attempts });
        return Err(FlashError::InsufficientData {
            available: n,
            required,
        });
    };

    let mut per_metric: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (f, held) in folds.iter().enumerate() {
        let train_idx: Vec<usize> = folds
            .iter()
            .enumerate()
            .filter(|(g, _)| *g != f)
            .flat_map(|(_, idx)| idx.iter().copied())
            .collect();

        let train = examples.subset(&train_idx);
        let held_out = examples.subset(held);
        let model = family.fit(&train)?;
        let scores = family.score(&model, &held_out)?;
        log::debug!("{} fold {}/{}: {:?}", family.kind(), f + 1, k, scores);
        for (name, value) in scores {
            per_metric.entry(name).or_default().push(value);
        }
    }

    let mut metrics = BTreeMap::new();
    let mut variances = BTreeMap::new();
    for (name, values) in per_metric {
        let (mean, var) = mean_and_variance(&values);
        metrics.insert(name.clone(), mean);
        variances.insert(name, var);
    }

    let class_balance = if stratified {
        let positives = strata.iter().filter(|s| **s == Some(true)).count();
        Some(positives as f64 / n as f64)
    } else {
        None
    };

    Ok(EvaluationResult {
        metrics,
        variances,
        folds: k,
        sample_count: n,
        evaluated_at: Utc::now(),
        class_balance,
    })
}
