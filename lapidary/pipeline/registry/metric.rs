use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metric evaluation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetricError {
    /// Truth and prediction vectors differ in length.
    #[error("metric inputs differ in length ({truth} vs {predicted})")]
    LengthMismatch {
        /// Length of the ground truth.
        truth: usize,
        /// Length of the predictions.
        predicted: usize,
    },
    /// No observations to score.
    #[error("metric inputs are empty")]
    Empty,
}

/// Regression metrics: `(y_true, y_pred) -> score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Coefficient of determination.
    R2Score,
    /// Mean of absolute residuals.
    MeanAbsoluteError,
    /// Mean of squared residuals.
    MeanSquaredError,
    /// Square root of the mean squared residual.
    RootMeanSquaredError,
    /// Mean of `|residual| / max(|truth|, eps)`.
    MeanAbsolutePercentageError,
}

impl MetricKind {
    /// Every registered metric.
    pub const ALL: [Self; 5] = [
        Self::R2Score,
        Self::MeanAbsoluteError,
        Self::MeanSquaredError,
        Self::RootMeanSquaredError,
        Self::MeanAbsolutePercentageError,
    ];

    /// Registry name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::R2Score => "r2_score",
            Self::MeanAbsoluteError => "mean_absolute_error",
            Self::MeanSquaredError => "mean_squared_error",
            Self::RootMeanSquaredError => "root_mean_squared_error",
            Self::MeanAbsolutePercentageError => "mean_absolute_percentage_error",
        }
    }

    /// Scores predictions against ground truth.
    pub fn compute(self, truth: &[f64], predicted: &[f64]) -> Result<f64, MetricError> {
        if truth.len() != predicted.len() {
            return Err(MetricError::LengthMismatch {
                truth: truth.len(),
                predicted: predicted.len(),
            });
        }
        if truth.is_empty() {
            return Err(MetricError::Empty);
        }
        let n = truth.len() as f64;
        let residuals = truth.iter().zip(predicted).map(|(t, p)| t - p);
        let score = match self {
            Self::MeanAbsoluteError => residuals.map(f64::abs).sum::<f64>() / n,
            Self::MeanSquaredError => residuals.map(|r| r * r).sum::<f64>() / n,
            Self::RootMeanSquaredError => (residuals.map(|r| r * r).sum::<f64>() / n).sqrt(),
            Self::MeanAbsolutePercentageError => {
                truth
                    .iter()
                    .zip(predicted)
                    .map(|(t, p)| (t - p).abs() / t.abs().max(f64::EPSILON))
                    .sum::<f64>()
                    / n
            }
            Self::R2Score => {
                let mean = truth.iter().sum::<f64>() / n;
                let ss_res = residuals.map(|r| r * r).sum::<f64>();
                let ss_tot = truth.iter().map(|t| (t - mean).powi(2)).sum::<f64>();
                if ss_tot == 0.0 {
                    if ss_res == 0.0 {
                        1.0
                    } else {
                        0.0
                    }
                } else {
                    1.0 - ss_res / ss_tot
                }
            }
        };
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_match_hand_computed_values() {
        let truth = [3.0, -0.5, 2.0, 7.0];
        let predicted = [2.5, 0.0, 2.0, 8.0];
        let mae = MetricKind::MeanAbsoluteError.compute(&truth, &predicted).unwrap();
        assert!((mae - 0.5).abs() < 1e-12);
        let mse = MetricKind::MeanSquaredError.compute(&truth, &predicted).unwrap();
        assert!((mse - 0.375).abs() < 1e-12);
        let rmse = MetricKind::RootMeanSquaredError
            .compute(&truth, &predicted)
            .unwrap();
        assert!((rmse - 0.375_f64.sqrt()).abs() < 1e-12);
        let r2 = MetricKind::R2Score.compute(&truth, &predicted).unwrap();
        assert!((r2 - 0.948_608_137_044_967_9).abs() < 1e-9);
    }

    #[test]
    fn r2_of_constant_truth_is_defined() {
        assert_eq!(
            MetricKind::R2Score.compute(&[1.0, 1.0], &[1.0, 1.0]).unwrap(),
            1.0
        );
        assert_eq!(
            MetricKind::R2Score.compute(&[1.0, 1.0], &[2.0, 1.0]).unwrap(),
            0.0
        );
    }

    #[test]
    fn rejects_mismatched_or_empty_inputs() {
        assert_eq!(
            MetricKind::MeanAbsoluteError.compute(&[1.0], &[1.0, 2.0]),
            Err(MetricError::LengthMismatch {
                truth: 1,
                predicted: 2
            })
        );
        assert_eq!(
            MetricKind::R2Score.compute(&[], &[]),
            Err(MetricError::Empty)
        );
    }
}
