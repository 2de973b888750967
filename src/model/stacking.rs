//! Stacked regression: boosted trees, ridge and lasso combined by a ridge meta-model

use serde::{Deserialize, Serialize};

use crate::features::Standardizer;
use crate::model::boosting::{BoostingParams, GradientBoostedRegressor};
use crate::model::linear::{lasso, ridge, LinearModel};
use crate::{FlashError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackingParams {
    pub boosting: BoostingParams,
    pub ridge_alpha: f64,
    pub lasso_alpha: f64,
    /// Penalty of the ridge combiner over base outputs
    pub final_alpha: f64,
    /// Folds used to build out-of-fold base predictions
    pub folds: usize,
}

impl Default for StackingParams {
    fn default() -> Self {
        StackingParams {
            boosting: BoostingParams::default(),
            ridge_alpha: 1.0,
            lasso_alpha: 0.1,
            final_alpha: 0.5,
            folds: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BaseRegressor {
    Boosted(GradientBoostedRegressor),
    Ridge(LinearModel),
    Lasso(LinearModel),
}

impl BaseRegressor {
    const COUNT: usize = 3;

    fn fit_all(rows: &[Vec<f64>], targets: &[f64], params: &StackingParams) -> Result<Vec<Self>> {
        Ok(vec![
            BaseRegressor::Boosted(GradientBoostedRegressor::fit(
                rows,
                targets,
                &params.boosting,
            )?),
            BaseRegressor::Ridge(ridge(rows, targets, params.ridge_alpha)?),
            BaseRegressor::Lasso(lasso(rows, targets, params.lasso_alpha)?),
        ])
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        match self {
            BaseRegressor::Boosted(m) => m.predict(row),
            BaseRegressor::Ridge(m) | BaseRegressor::Lasso(m) => m.predict(row),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BaseRegressor::Boosted(_) => "gradient_boosting",
            BaseRegressor::Ridge(_) => "ridge",
            BaseRegressor::Lasso(_) => "lasso",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackingRegressor {
    bases: Vec<BaseRegressor>,
    combiner: LinearModel,
}

impl StackingRegressor {
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], params: &StackingParams) -> Result<Self> {
        let n = rows.len();
        if n < 2 || targets.len() != n {
            return Err(FlashError::InsufficientData {
                available: n,
                required: 2,
            });
        }

        let k = params.folds.clamp(2, n);
        let mut meta = vec![vec![0.0; BaseRegressor::COUNT]; n];
        for fold in 0..k {
            let (train_idx, held_idx): (Vec<usize>, Vec<usize>) =
                (0..n).partition(|i| i % k != fold);
            let train_rows: Vec<Vec<f64>> = train_idx.iter().map(|&i| rows[i].clone()).collect();
            let train_targets: Vec<f64> = train_idx.iter().map(|&i| targets[i]).collect();

            let bases = BaseRegressor::fit_all(&train_rows, &train_targets, params)?;
            for &i in &held_idx {
                for (slot, base) in meta[i].iter_mut().zip(bases.iter()) {
                    *slot = base.predict(&rows[i]);
                }
            }
        }

        let combiner = ridge(&meta, targets, params.final_alpha)?;
        let bases = BaseRegressor::fit_all(rows, targets, params)?;
        log::debug!(
            "Stacking combiner weights: {}",
            bases
                .iter()
                .zip(combiner.coef.iter())
                .map(|(b, w)| format!("{}={:.3}", b.name(), w))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(StackingRegressor { bases, combiner })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let meta: Vec<f64> = self.bases.iter().map(|b| b.predict(row)).collect();
        self.combiner.predict(&meta)
    }
}

/// Standardization followed by a stacked regressor
///
/// The scaler only ever sees the rows passed to [`ScorePipeline::fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorePipeline {
    scaler: Standardizer,
    model: StackingRegressor,
}

impl ScorePipeline {
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], params: &StackingParams) -> Result<Self> {
        let scaler = Standardizer::fit(rows);
        let scaled = scaler.transform(rows);
        let model = StackingRegressor::fit(&scaled, targets, params)?;
        Ok(ScorePipeline { scaler, model })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.model.predict(&self.scaler.transform_row(row))
    }

    pub fn scaler(&self) -> &Standardizer {
        &self.scaler
    }
}
