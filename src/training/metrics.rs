//! Held-out metrics for the winner and score models

use std::collections::BTreeMap;
use std::fmt;

/// Confusion counts and scored probabilities for the winner classifier
#[derive(Debug, Clone, Default)]
pub struct ClassificationMetrics {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
    /// (predicted home-win probability, actual home win)
    scored: Vec<(f64, bool)>,
}

impl ClassificationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one prediction; probabilities above 0.5 count as a home-win call
    pub fn update(&mut self, probability: f64, actual: bool) {
        let predicted = probability > 0.5;
        match (predicted, actual) {
            (true, true) => self.true_positives += 1,
            (true, false) => self.false_positives += 1,
            (false, false) => self.true_negatives += 1,
            (false, true) => self.false_negatives += 1,
        }
        self.scored.push((probability, actual));
    }

    pub fn total(&self) -> usize {
        self.scored.len()
    }

    pub fn accuracy(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            (self.true_positives + self.true_negatives) as f64 / self.total() as f64
        }
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    /// Area under the ROC curve (Mann-Whitney, ties count half).
    ///
    /// Undefined with a single class present; reported as 0.5.
    pub fn roc_auc(&self) -> f64 {
        let positives = self.scored.iter().filter(|(_, y)| *y).count();
        let negatives = self.scored.len() - positives;
        if positives == 0 || negatives == 0 {
            return 0.5;
        }

        let mut sorted = self.scored.clone();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        // Average ranks over tied probabilities
        let mut rank_sum_pos = 0.0;
        let mut i = 0;
        while i < sorted.len() {
            let mut j = i;
            while j + 1 < sorted.len() && sorted[j + 1].0 == sorted[i].0 {
                j += 1;
            }
            let avg_rank = (i + j) as f64 / 2.0 + 1.0;
            rank_sum_pos += avg_rank * sorted[i..=j].iter().filter(|(_, y)| *y).count() as f64;
            i = j + 1;
        }

        let p = positives as f64;
        (rank_sum_pos - p * (p + 1.0) / 2.0) / (p * negatives as f64)
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("accuracy".to_string(), self.accuracy()),
            ("precision".to_string(), self.precision()),
            ("recall".to_string(), self.recall()),
            ("f1".to_string(), self.f1()),
            ("roc_auc".to_string(), self.roc_auc()),
        ])
    }
}

impl fmt::Display for ClassificationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Acc: {:.2}% | Prec: {:.3} | Rec: {:.3} | F1: {:.3} | AUC: {:.3}",
            self.accuracy() * 100.0,
            self.precision(),
            self.recall(),
            self.f1(),
            self.roc_auc()
        )
    }
}

/// Absolute and squared errors for the score regressor
#[derive(Debug, Clone, Default)]
pub struct RegressionMetrics {
    pub home_abs_sum: f64,
    pub away_abs_sum: f64,
    pub total_abs_sum: f64,
    pub squared_sum: f64,
    pub count: usize,
}

impl RegressionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, predicted: (f64, f64), actual: (f64, f64)) {
        let home_err = predicted.0 - actual.0;
        let away_err = predicted.1 - actual.1;
        self.home_abs_sum += home_err.abs();
        self.away_abs_sum += away_err.abs();
        self.total_abs_sum += (predicted.0 + predicted.1 - actual.0 - actual.1).abs();
        self.squared_sum += home_err * home_err + away_err * away_err;
        self.count += 1;
    }

    pub fn home_mae(&self) -> f64 {
        self.mean(self.home_abs_sum)
    }

    pub fn away_mae(&self) -> f64 {
        self.mean(self.away_abs_sum)
    }

    /// Combined MAE: mean of the two sides
    pub fn mae(&self) -> f64 {
        (self.home_mae() + self.away_mae()) / 2.0
    }

    pub fn total_score_mae(&self) -> f64 {
        self.mean(self.total_abs_sum)
    }

    /// Root mean squared error over both sides
    pub fn rmse(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.squared_sum / (2 * self.count) as f64).sqrt()
        }
    }

    fn mean(&self, sum: f64) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            sum / self.count as f64
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("home_mae".to_string(), self.home_mae()),
            ("away_mae".to_string(), self.away_mae()),
            ("mae".to_string(), self.mae()),
            ("total_score_mae".to_string(), self.total_score_mae()),
            ("rmse".to_string(), self.rmse()),
        ])
    }
}

impl fmt::Display for RegressionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MAE: {:.2} (home: {:.2}, away: {:.2}) | Total MAE: {:.2} | RMSE: {:.2}",
            self.mae(),
            self.home_mae(),
            self.away_mae(),
            self.total_score_mae(),
            self.rmse()
        )
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Population mean and variance
pub fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_counts() {
        let mut m = ClassificationMetrics::new();
        m.update(0.9, true);
        m.update(0.8, false);
        m.update(0.2, false);
        m.update(0.3, true);

        assert_eq!(m.total(), 4);
        assert!((m.accuracy() - 0.5).abs() < 1e-12);
        assert!((m.precision() - 0.5).abs() < 1e-12);
        assert!((m.recall() - 0.5).abs() < 1e-12);
        assert!((m.f1() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_roc_auc_perfect_and_tied() {
        let mut perfect = ClassificationMetrics::new();
        perfect.update(0.1, false);
        perfect.update(0.4, false);
        perfect.update(0.6, true);
        perfect.update(0.9, true);
        assert!((perfect.roc_auc() - 1.0).abs() < 1e-12);

        let mut tied = ClassificationMetrics::new();
        tied.update(0.5, false);
        tied.update(0.5, true);
        assert!((tied.roc_auc() - 0.5).abs() < 1e-12);

        let mut single = ClassificationMetrics::new();
        single.update(0.7, true);
        assert_eq!(single.roc_auc(), 0.5);
    }

    #[test]
    fn test_regression_errors() {
        let mut m = RegressionMetrics::new();
        m.update((10.0, 5.0), (12.0, 5.0));
        m.update((8.0, 9.0), (8.0, 6.0));

        assert!((m.home_mae() - 1.0).abs() < 1e-12);
        assert!((m.away_mae() - 1.5).abs() < 1e-12);
        assert!((m.mae() - 1.25).abs() < 1e-12);
        // totals: |15-17| = 2, |17-14| = 3
        assert!((m.total_score_mae() - 2.5).abs() < 1e-12);
        assert!((m.rmse() - (13.0f64 / 4.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_empty_metrics_are_zero() {
        assert_eq!(ClassificationMetrics::new().accuracy(), 0.0);
        assert_eq!(RegressionMetrics::new().mae(), 0.0);
    }

    #[test]
    fn test_mean_and_variance() {
        let (m, v) = mean_and_variance(&[1.0, 3.0]);
        assert_eq!(m, 2.0);
        assert_eq!(v, 1.0);
    }
}
