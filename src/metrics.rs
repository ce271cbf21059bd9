use serde::Serialize;

use crate::error::{ImputeError, Result};

/// Standard regression-quality metrics over a held-out set.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegressionMetrics {
    pub r2: f64,
    pub mae: f64,
    pub mse: f64,
}

impl RegressionMetrics {
    /// No metric is well-defined on zero samples, so empty input is an error.
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Result<Self> {
        if actual.is_empty() {
            return Err(ImputeError::Evaluation(
                "no samples to score".to_string(),
            ));
        }
        if actual.len() != predicted.len() {
            return Err(ImputeError::Evaluation(format!(
                "{} actual values but {} predictions",
                actual.len(),
                predicted.len()
            )));
        }

        let n = actual.len() as f64;
        let mean = actual.iter().sum::<f64>() / n;

        let mut ss_res = 0.0;
        let mut ss_tot = 0.0;
        let mut abs_err = 0.0;
        for (&y, &y_hat) in actual.iter().zip(predicted.iter()) {
            let residual = y - y_hat;
            ss_res += residual * residual;
            ss_tot += (y - mean) * (y - mean);
            abs_err += residual.abs();
        }

        // A constant target carries no variance to explain.
        let r2 = if ss_tot == 0.0 { 0.0 } else { 1.0 - ss_res / ss_tot };

        Ok(Self {
            r2,
            mae: abs_err / n,
            mse: ss_res / n,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions_score_one() {
        let actual = [1.0, 2.0, 3.0, 4.0];
        let metrics = RegressionMetrics::compute(&actual, &actual).unwrap();
        assert_eq!(metrics.r2, 1.0);
        assert_eq!(metrics.mae, 0.0);
        assert_eq!(metrics.mse, 0.0);
    }

    #[test]
    fn known_errors_score_as_expected() {
        let actual = [2.0, 4.0, 6.0, 8.0];
        let predicted = [1.0, 5.0, 5.0, 9.0];
        let metrics = RegressionMetrics::compute(&actual, &predicted).unwrap();
        assert!((metrics.mae - 1.0).abs() < 1e-12);
        assert!((metrics.mse - 1.0).abs() < 1e-12);
        assert!((metrics.r2 - 0.8).abs() < 1e-12);
    }

    #[test]
    fn empty_input_is_an_evaluation_error() {
        let err = RegressionMetrics::compute(&[], &[]).unwrap_err();
        assert!(matches!(err, ImputeError::Evaluation(_)));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = RegressionMetrics::compute(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert!(matches!(err, ImputeError::Evaluation(_)));
    }
}
