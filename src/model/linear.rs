//! Regularized linear regression: ridge (closed form) and lasso (coordinate descent)

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::model::linalg::{solve_spd, to_matrix};
use crate::{FlashError, Result};

const LASSO_MAX_ITER: usize = 1000;
const LASSO_TOL: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub coef: Vec<f64>,
}

impl LinearModel {
    pub fn predict(&self, row: &[f64]) -> f64 {
        self.intercept + self.coef.iter().zip(row).map(|(c, x)| c * x).sum::<f64>()
    }
}

fn check_alpha(name: &str, alpha: f64) -> Result<()> {
    if !(alpha >= 0.0) || !alpha.is_finite() {
        return Err(FlashError::InvalidHyperparameter {
            name: name.to_string(),
            reason: format!("must be a non-negative number, got {}", alpha),
        });
    }
    Ok(())
}

/// Mean-centred design matrix and targets
struct Centred {
    x: Array2<f64>,
    y: Array1<f64>,
    x_mean: Array1<f64>,
    y_mean: f64,
}

impl Centred {
    fn new(rows: &[Vec<f64>], targets: &[f64]) -> Result<Self> {
        let n = rows.len();
        if n == 0 || targets.len() != n {
            return Err(FlashError::InsufficientData {
                available: n,
                required: 1,
            });
        }
        let x = to_matrix(rows);
        let x_mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| FlashError::Numerical("empty design matrix".to_string()))?;
        let y_mean = targets.iter().sum::<f64>() / n as f64;
        Ok(Centred {
            x: &x - &x_mean,
            y: targets.iter().map(|y| y - y_mean).collect(),
            x_mean,
            y_mean,
        })
    }

    fn into_model(self, coef: Array1<f64>) -> LinearModel {
        LinearModel {
            intercept: self.y_mean - coef.dot(&self.x_mean),
            coef: coef.to_vec(),
        }
    }
}

/// Minimize ||y - Xw - b||² + alpha ||w||² with an unpenalized intercept
pub fn ridge(rows: &[Vec<f64>], targets: &[f64], alpha: f64) -> Result<LinearModel> {
    check_alpha("ridge_alpha", alpha)?;
    let data = Centred::new(rows, targets)?;

    let mut gram = data.x.t().dot(&data.x);
    gram.diag_mut().mapv_inplace(|v| v + alpha);
    let xty = data.x.t().dot(&data.y);

    let coef = solve_spd(&gram, xty.view())?;
    Ok(data.into_model(coef))
}

/// Minimize (1 / 2n) ||y - Xw - b||² + alpha ||w||₁ with an unpenalized intercept
pub fn lasso(rows: &[Vec<f64>], targets: &[f64], alpha: f64) -> Result<LinearModel> {
    check_alpha("lasso_alpha", alpha)?;
    let data = Centred::new(rows, targets)?;
    let n = rows.len() as f64;
    let dim = data.x.ncols();

    let col_sq = data.x.map_axis(Axis(0), |col| col.dot(&col));
    let mut coef = Array1::<f64>::zeros(dim);
    let mut residual = data.y.clone();

    for _ in 0..LASSO_MAX_ITER {
        let mut max_delta: f64 = 0.0;
        for j in 0..dim {
            if col_sq[j] == 0.0 {
                continue;
            }
            let old = coef[j];
            let column = data.x.column(j);
            let rho = column.dot(&residual) + col_sq[j] * old;
            let new = soft_threshold(rho, alpha * n) / col_sq[j];
            if new != old {
                let delta = new - old;
                residual.scaled_add(-delta, &column);
                coef[j] = new;
                max_delta = max_delta.max(delta.abs());
            }
        }
        if max_delta < LASSO_TOL {
            break;
        }
    }

    Ok(data.into_model(coef))
}

fn soft_threshold(value: f64, lambda: f64) -> f64 {
    if value > lambda {
        value - lambda
    } else if value < -lambda {
        value + lambda
    } else {
        0.0
    }
}
