//! Bayesian hyperparameter search
//!
//! A Gaussian-process surrogate (RBF kernel) over the unit-cube encoding of a
//! [`SearchSpace`], with expected improvement picking the next batch from a
//! seeded random candidate pool. Trials in a batch run on a fixed-size rayon
//! pool and are collected in trial order, so a fixed seed gives the same search
//! regardless of thread timing.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;

use crate::model::linalg::{back_substitute, cholesky, forward_substitute};
use crate::training::hyperparams::{Hyperparameters, SearchSpace};
use crate::{FlashError, OptimizerConfig, Result};

/// Observation noise added to the kernel diagonal
const NOISE: f64 = 1e-6;

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationTrial {
    pub trial_index: usize,
    pub hyperparameters: Hyperparameters,
    /// Value being minimized; infinite when the trial failed
    pub objective: f64,
    pub error: Option<String>,
}

impl OptimizationTrial {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationOutcome {
    pub best: OptimizationTrial,
    pub trials: Vec<OptimizationTrial>,
    pub stopped_early: bool,
}

/// Minimize `train_fn` over `space` within `trial_budget` evaluations
pub fn optimize<F>(
    train_fn: F,
    space: &SearchSpace,
    trial_budget: usize,
    config: &OptimizerConfig,
) -> Result<OptimizationOutcome>
where
    F: Fn(&Hyperparameters) -> Result<f64> + Sync,
{
    if trial_budget == 0 {
        return Err(FlashError::Config("trial budget must be at least 1".to_string()));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .map_err(|e| FlashError::Config(format!("Failed to build worker pool: {}", e)))?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let batch_size = config.batch_size.max(1);
    let mut points: Vec<Vec<f64>> = Vec::new();
    let mut trials: Vec<OptimizationTrial> = Vec::new();
    let mut best_objective = f64::INFINITY;
    let mut since_improvement = 0;
    let mut stopped_early = false;

    while trials.len() < trial_budget {
        let count = batch_size.min(trial_budget - trials.len());
        let proposals = if trials.len() < config.initial_trials {
            (0..count).map(|_| space.sample(&mut rng)).collect()
        } else {
            propose(space, &points, &trials, count, config, &mut rng)
        };

        let offset = trials.len();
        let results: Vec<(Hyperparameters, Result<f64>)> = pool.install(|| {
            proposals
                .par_iter()
                .map(|point| {
                    let params = space.decode(point);
                    let objective = train_fn(&params);
                    (params, objective)
                })
                .collect()
        });

        for (i, (point, (params, result))) in proposals.into_iter().zip(results).enumerate() {
            let trial_index = offset + i;
            let trial = match result {
                Ok(value) if value.is_finite() => OptimizationTrial {
                    trial_index,
                    hyperparameters: params,
                    objective: value,
                    error: None,
                },
                Ok(value) => failed_trial(trial_index, params, format!("non-finite objective {}", value)),
                Err(e) => failed_trial(trial_index, params, e.to_string()),
            };

            if trial.objective < best_objective {
                best_objective = trial.objective;
                since_improvement = 0;
                log::info!(
                    "Trial {}: new best objective {:.4} ({})",
                    trial_index,
                    trial.objective,
                    trial.hyperparameters
                );
            } else {
                since_improvement += 1;
                log::debug!("Trial {}: objective {:.4}", trial_index, trial.objective);
            }
            points.push(point);
            trials.push(trial);
        }

        if config.patience > 0 && since_improvement >= config.patience && trials.len() < trial_budget {
            log::info!(
                "No improvement in {} trials, stopping after {} of {}",
                since_improvement,
                trials.len(),
                trial_budget
            );
            stopped_early = true;
            break;
        }
    }

    let best = trials
        .iter()
        .filter(|t| !t.failed())
        .min_by(|a, b| {
            a.objective
                .total_cmp(&b.objective)
                .then(a.trial_index.cmp(&b.trial_index))
        })
        .cloned()
        .ok_or(FlashError::AllTrialsFailed {
            trials: trials.len(),
        })?;

    Ok(OptimizationOutcome {
        best,
        trials,
        stopped_early,
    })
}

fn failed_trial(trial_index: usize, params: Hyperparameters, message: String) -> OptimizationTrial {
    log::warn!(
        "{}",
        FlashError::TrialFailure {
            trial_index,
            message: message.clone()
        }
    );
    OptimizationTrial {
        trial_index,
        hyperparameters: params,
        objective: f64::INFINITY,
        error: Some(message),
    }
}

/// Pick the `count` candidates with the highest expected improvement
fn propose(
    space: &SearchSpace,
    points: &[Vec<f64>],
    trials: &[OptimizationTrial],
    count: usize,
    config: &OptimizerConfig,
    rng: &mut StdRng,
) -> Vec<Vec<f64>> {
    let pool_size = config.candidate_pool.max(count);
    let candidates: Vec<Vec<f64>> = (0..pool_size).map(|_| space.sample(rng)).collect();

    let Some(surrogate) = Surrogate::fit(points, trials, config.length_scale) else {
        return candidates.into_iter().take(count).collect();
    };

    let mut scored: Vec<(f64, usize)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (surrogate.expected_improvement(c, config.xi), i))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    scored
        .into_iter()
        .take(count)
        .map(|(_, i)| candidates[i].clone())
        .collect()
}

struct Surrogate {
    points: Vec<Vec<f64>>,
    chol: Array2<f64>,
    alpha: Array1<f64>,
    length_scale: f64,
    /// Best observed value in normalized units
    best: f64,
}

impl Surrogate {
    /// None when no trial has succeeded yet
    fn fit(points: &[Vec<f64>], trials: &[OptimizationTrial], length_scale: f64) -> Option<Self> {
        let worst = trials
            .iter()
            .filter(|t| !t.failed())
            .map(|t| t.objective)
            .fold(f64::NEG_INFINITY, f64::max);
        if !worst.is_finite() {
            return None;
        }

        // Failed trials stand in as the worst observed value
        let y: Vec<f64> = trials
            .iter()
            .map(|t| if t.failed() { worst } else { t.objective })
            .collect();
        let n = y.len() as f64;
        let mean = y.iter().sum::<f64>() / n;
        let std = (y.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        let std = if std < 1e-12 { 1.0 } else { std };
        let y_norm: Array1<f64> = y.iter().map(|v| (v - mean) / std).collect();

        let length_scale = if length_scale > 0.0 { length_scale } else { 0.25 };
        let mut jitter = NOISE;
        let chol = loop {
            let kernel = Array2::from_shape_fn((points.len(), points.len()), |(i, j)| {
                rbf(&points[i], &points[j], length_scale) + if i == j { jitter } else { 0.0 }
            });
            if let Some(l) = cholesky(&kernel) {
                break l;
            }
            if jitter > 1.0 {
                return None;
            }
            jitter *= 10.0;
        };

        let alpha = back_substitute(&chol, forward_substitute(&chol, y_norm.view()).view());
        let best = y_norm.iter().copied().fold(f64::INFINITY, f64::min);
        Some(Surrogate {
            points: points.to_vec(),
            chol,
            alpha,
            length_scale,
            best,
        })
    }

    /// Posterior mean and standard deviation at `x`
    fn predict(&self, x: &[f64]) -> (f64, f64) {
        let k_star: Array1<f64> = self
            .points
            .iter()
            .map(|p| rbf(p, x, self.length_scale))
            .collect();
        let mean = k_star.dot(&self.alpha);
        let v = forward_substitute(&self.chol, k_star.view());
        let var = (1.0 - v.dot(&v)).max(1e-12);
        (mean, var.sqrt())
    }

    fn expected_improvement(&self, x: &[f64], xi: f64) -> f64 {
        let (mean, sigma) = self.predict(x);
        let improvement = self.best - mean - xi;
        let z = improvement / sigma;
        improvement * normal_cdf(z) + sigma * normal_pdf(z)
    }
}

fn rbf(a: &[f64], b: &[f64], length_scale: f64) -> f64 {
    let sq: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
    (-sq / (2.0 * length_scale * length_scale)).exp()
}

fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz and Stegun 7.1.26, absolute error below 1.5e-7
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::hyperparams::{Dimension, ParamValue};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn space() -> SearchSpace {
        SearchSpace::new()
            .add(
                "x",
                Dimension::Real {
                    low: -2.0,
                    high: 2.0,
                    log: false,
                },
            )
            .add("n", Dimension::Integer { low: 1, high: 10 })
    }

    fn quadratic(params: &Hyperparameters) -> Result<f64> {
        let x = params.f64_or("x", 0.0)?;
        let n = params.usize_or("n", 0)? as f64;
        Ok((x - 0.5).powi(2) + (n - 4.0).powi(2) * 0.1)
    }

    fn config(workers: usize) -> OptimizerConfig {
        OptimizerConfig {
            initial_trials: 5,
            patience: 0,
            workers,
            batch_size: 3,
            candidate_pool: 128,
            ..OptimizerConfig::default()
        }
    }

    #[test]
    fn test_fixed_seed_is_deterministic_across_worker_counts() {
        let a = optimize(quadratic, &space(), 15, &config(1)).unwrap();
        let b = optimize(quadratic, &space(), 15, &config(4)).unwrap();

        assert_eq!(a.trials.len(), 15);
        assert_eq!(a.best.trial_index, b.best.trial_index);
        assert_eq!(a.best.hyperparameters, b.best.hyperparameters);
        let a_obj: Vec<f64> = a.trials.iter().map(|t| t.objective).collect();
        let b_obj: Vec<f64> = b.trials.iter().map(|t| t.objective).collect();
        assert_eq!(a_obj, b_obj);
    }

    #[test]
    fn test_search_improves_on_initial_design() {
        let outcome = optimize(quadratic, &space(), 25, &config(2)).unwrap();
        let initial_best = outcome.trials[..5]
            .iter()
            .map(|t| t.objective)
            .fold(f64::INFINITY, f64::min);
        assert!(outcome.best.objective <= initial_best);
        assert!(outcome.best.objective < 0.5);
    }

    #[test]
    fn test_failed_trials_are_absorbed() {
        let calls = AtomicUsize::new(0);
        let flaky = |params: &Hyperparameters| {
            calls.fetch_add(1, Ordering::SeqCst);
            match params.get("n") {
                Some(ParamValue::Int(n)) if n % 2 == 0 => Err(FlashError::Numerical("boom".to_string())),
                _ => quadratic(params),
            }
        };
        let outcome = optimize(flaky, &space(), 12, &config(2)).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 12);
        assert_eq!(outcome.trials.len(), 12);
        assert!(!outcome.best.failed());
        for trial in outcome.trials.iter().filter(|t| t.failed()) {
            assert_eq!(trial.objective, f64::INFINITY);
        }
    }

    #[test]
    fn test_all_trials_failing_is_an_error() {
        let result = optimize(
            |_: &Hyperparameters| -> Result<f64> { Err(FlashError::Numerical("nope".to_string())) },
            &space(),
            4,
            &config(1),
        );
        assert!(matches!(result, Err(FlashError::AllTrialsFailed { trials: 4 })));
    }

    #[test]
    fn test_ties_go_to_earliest_trial_and_patience_stops() {
        let mut cfg = config(2);
        cfg.patience = 4;
        let outcome = optimize(|_: &Hyperparameters| Ok(1.0), &space(), 30, &cfg).unwrap();

        assert_eq!(outcome.best.trial_index, 0);
        assert!(outcome.stopped_early);
        assert!(outcome.trials.len() < 30);
    }

    #[test]
    fn test_erf_reference_values() {
        assert!(erf(0.0).abs() < 1e-7);
        assert!((erf(1.0) - 0.8427007929).abs() < 1e-6);
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
    }
}
