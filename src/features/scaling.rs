//! Z-score standardization of feature columns

use serde::{Deserialize, Serialize};

/// Per-column mean and standard deviation, fit on training rows only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl Standardizer {
    /// Compute from training rows
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let dim = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut sum = vec![0.0f64; dim];
        let mut sum_sq = vec![0.0f64; dim];

        for row in rows {
            for (j, &v) in row.iter().enumerate().take(dim) {
                sum[j] += v;
                sum_sq[j] += v * v;
            }
        }

        let n = rows.len().max(1) as f64;
        let mean: Vec<f64> = sum.iter().map(|s| s / n).collect();
        let std: Vec<f64> = sum_sq
            .iter()
            .zip(mean.iter())
            .map(|(sq, m)| {
                let sd = (sq / n - m * m).max(0.0).sqrt();
                // Constant columns pass through centred
                if sd < 1e-9 {
                    1.0
                } else {
                    sd
                }
            })
            .collect();

        Standardizer { mean, std }
    }

    /// Normalize a row using z-score: (x - mean) / std
    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(self.std.iter()))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardize_columns() {
        let rows = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaler = Standardizer::fit(&rows);
        assert_eq!(scaler.mean, vec![2.0, 5.0]);
        assert_eq!(scaler.std, vec![1.0, 1.0]);

        let out = scaler.transform(&rows);
        assert_eq!(out[0], vec![-1.0, 0.0]);
        assert_eq!(out[1], vec![1.0, 0.0]);
    }

    #[test]
    fn test_parameters_come_from_fit_rows_only() {
        let train = vec![vec![0.0], vec![2.0]];
        let scaler = Standardizer::fit(&train);
        // A far-away test row does not move the fitted parameters
        let out = scaler.transform_row(&[100.0]);
        assert_eq!(out, vec![99.0]);
    }
}
