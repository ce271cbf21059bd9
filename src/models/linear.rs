use linfa::prelude::*;
use linfa_linear::{FittedLinearRegression, LinearRegression};
use ndarray::{Array1, Array2};
use tracing::debug;

use super::LinearParams;
use crate::error::{ImputeError, Result};

/// Ordinary least-squares regression.
pub struct LinearModel {
    model: FittedLinearRegression<f64>,
}

impl LinearModel {
    pub(crate) fn fit(params: &LinearParams, rows: &[Vec<f64>], targets: &[f64]) -> Result<Self> {
        let x = to_matrix(rows);
        let y = Array1::from_vec(targets.to_vec());
        let dataset = Dataset::new(x, y);
        let model = LinearRegression::new()
            .with_intercept(params.fit_intercept)
            .fit(&dataset)
            .map_err(|e| ImputeError::Fit(e.to_string()))?;
        debug!(rows = rows.len(), "linear model trained");
        Ok(Self { model })
    }

    pub(crate) fn predict(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        let x = to_matrix(rows);
        self.model.predict(&x).to_vec()
    }
}

fn to_matrix(rows: &[Vec<f64>]) -> Array2<f64> {
    let width = rows.first().map_or(0, Vec::len);
    let mut x = Array2::<f64>::zeros((rows.len(), width));
    for (i, row) in rows.iter().enumerate() {
        for (j, &value) in row.iter().enumerate() {
            x[(i, j)] = value;
        }
    }
    x
}
