mod gbdt;
mod linear;

pub use gbdt::EnsembleTreeModel;
pub use linear::LinearModel;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ImputeError, Result};

/// The two regressor families the imputation pipeline supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    EnsembleTree,
    Linear,
}

impl FromStr for ModelKind {
    type Err = ImputeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "EnsembleTree" => Ok(Self::EnsembleTree),
            "Linear" => Ok(Self::Linear),
            other => Err(ImputeError::ModelInit(other.to_string())),
        }
    }
}

/// Construction parameters for the ensemble tree regressor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleTreeParams {
    pub iterations: usize,
    pub max_depth: u32,
    pub shrinkage: f32,
    pub min_leaf_size: usize,
    pub data_sample_ratio: f64,
    pub feature_sample_ratio: f64,
}

impl Default for EnsembleTreeParams {
    fn default() -> Self {
        Self {
            iterations: 100,
            max_depth: 6,
            shrinkage: 0.1,
            min_leaf_size: 1,
            data_sample_ratio: 1.0,
            feature_sample_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearParams {
    pub fit_intercept: bool,
}

impl Default for LinearParams {
    fn default() -> Self {
        Self { fit_intercept: true }
    }
}

/// A model kind with its structured construction parameters.
#[derive(Debug, Clone)]
pub enum ModelConfig {
    EnsembleTree(EnsembleTreeParams),
    Linear(LinearParams),
}

impl ModelConfig {
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::EnsembleTree(_) => ModelKind::EnsembleTree,
            Self::Linear(_) => ModelKind::Linear,
        }
    }
}

/// A fitted regressor, owned by one fit/predict cycle.
pub enum FittedModel {
    EnsembleTree(EnsembleTreeModel),
    Linear(LinearModel),
}

impl std::fmt::Debug for FittedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnsembleTree(_) => f.write_str("FittedModel::EnsembleTree"),
            Self::Linear(_) => f.write_str("FittedModel::Linear"),
        }
    }
}

impl FittedModel {
    pub fn fit(config: &ModelConfig, rows: &[Vec<f64>], targets: &[f64]) -> Result<Self> {
        if rows.is_empty() {
            return Err(ImputeError::Fit("training set is empty".to_string()));
        }
        if rows.len() != targets.len() {
            return Err(ImputeError::Fit(format!(
                "{} training rows but {} targets",
                rows.len(),
                targets.len()
            )));
        }
        let non_finite = rows
            .iter()
            .flatten()
            .chain(targets.iter())
            .any(|v| !v.is_finite());
        if non_finite {
            return Err(ImputeError::Fit(
                "training data contains non-finite values".to_string(),
            ));
        }

        match config {
            ModelConfig::EnsembleTree(params) => {
                Ok(Self::EnsembleTree(EnsembleTreeModel::fit(params, rows, targets)?))
            }
            ModelConfig::Linear(params) => {
                Ok(Self::Linear(LinearModel::fit(params, rows, targets)?))
            }
        }
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::EnsembleTree(model) => model.predict(rows),
            Self::Linear(model) => Ok(model.predict(rows)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_kind_parses_known_names_only() {
        assert_eq!(
            "EnsembleTree".parse::<ModelKind>().unwrap(),
            ModelKind::EnsembleTree
        );
        assert_eq!("Linear".parse::<ModelKind>().unwrap(), ModelKind::Linear);
        let err = "GradientDescent".parse::<ModelKind>().unwrap_err();
        assert!(matches!(err, ImputeError::ModelInit(_)));
    }

    #[test]
    fn empty_training_set_is_a_fit_error() {
        let config = ModelConfig::Linear(LinearParams::default());
        let err = FittedModel::fit(&config, &[], &[]).unwrap_err();
        assert!(matches!(err, ImputeError::Fit(_)));
    }

    #[test]
    fn non_finite_training_data_is_a_fit_error() {
        let config = ModelConfig::Linear(LinearParams::default());
        let rows = vec![vec![1.0, f64::NAN]];
        let err = FittedModel::fit(&config, &rows, &[1.0]).unwrap_err();
        assert!(matches!(err, ImputeError::Fit(_)));
    }

    #[test]
    fn ensemble_tree_fits_and_predicts_small_data() {
        let rows: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![i as f64, (i % 3) as f64])
            .collect();
        let targets: Vec<f64> = rows.iter().map(|r| 3.0 * r[0] + r[1]).collect();
        let config = ModelConfig::EnsembleTree(EnsembleTreeParams {
            iterations: 20,
            max_depth: 4,
            ..Default::default()
        });
        let model = FittedModel::fit(&config, &rows, &targets).unwrap();
        let predictions = model.predict(&rows).unwrap();
        assert_eq!(predictions.len(), rows.len());
        assert!(predictions.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn linear_recovers_a_linear_relation() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let targets: Vec<f64> = rows.iter().map(|r| 2.0 * r[0] + 5.0).collect();
        let config = ModelConfig::Linear(LinearParams::default());
        let model = FittedModel::fit(&config, &rows, &targets).unwrap();
        let predictions = model.predict(&[vec![20.0]]).unwrap();
        assert!((predictions[0] - 45.0).abs() < 1e-6);
    }

    #[test]
    fn predicting_nothing_returns_nothing() {
        let config = ModelConfig::Linear(LinearParams::default());
        let rows: Vec<Vec<f64>> = (0..4).map(|i| vec![i as f64]).collect();
        let targets = vec![0.0, 1.0, 2.0, 3.0];
        let model = FittedModel::fit(&config, &rows, &targets).unwrap();
        assert!(model.predict(&[]).unwrap().is_empty());
    }
}
