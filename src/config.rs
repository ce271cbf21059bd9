use serde::Deserialize;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::ImputeError;
use crate::impute::{EvalOptions, RunOptions};
use crate::models::{EnsembleTreeParams, LinearParams, ModelConfig, ModelKind};
use crate::tuning::EnsembleTreeGrid;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub data_path: String,
    pub output_path: String,
    pub response_vars: Vec<String>,
    pub predictor_vars: Vec<String>,
    #[serde(default = "default_random_state")]
    pub random_state: u64,
    #[serde(default)]
    pub per_state: bool,
    pub model: ModelSection,
    #[serde(default)]
    pub split: SplitSection,
    #[serde(default)]
    pub evaluation: EvaluationSection,
    pub tuning: Option<TuningSection>,
}

#[derive(Debug, Deserialize)]
pub struct ModelSection {
    pub kind: String,
    #[serde(flatten)]
    pub params: EnsembleTreeParams,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SplitSection {
    /// Kept near zero in production so the fit sees ~all labeled rows.
    pub test_fraction: f64,
    pub stratify_by_state: bool,
}

impl Default for SplitSection {
    fn default() -> Self {
        Self {
            test_fraction: 1e-10,
            stratify_by_state: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EvaluationSection {
    pub enabled: bool,
    pub cv_folds: usize,
}

impl Default for EvaluationSection {
    fn default() -> Self {
        Self {
            enabled: false,
            cv_folds: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TuningSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: String,
    #[serde(default)]
    pub grid: EnsembleTreeGrid,
}

fn default_random_state() -> u64 {
    42
}

fn default_cv_folds() -> usize {
    5
}

fn default_artifacts_dir() -> String {
    "artifacts".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read {}", path.as_ref().display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.as_ref().display()))?;
        Ok(config)
    }

    /// Resolve the configured model kind and assemble the batch options.
    pub fn run_options(&self) -> std::result::Result<RunOptions, ImputeError> {
        let kind: ModelKind = self.model.kind.parse()?;
        let model = match kind {
            ModelKind::EnsembleTree => ModelConfig::EnsembleTree(self.model.params.clone()),
            ModelKind::Linear => ModelConfig::Linear(LinearParams::default()),
        };
        Ok(RunOptions {
            response_vars: self.response_vars.clone(),
            predictor_vars: self.predictor_vars.clone(),
            model,
            test_fraction: self.split.test_fraction,
            stratify_by_state: self.split.stratify_by_state,
            per_state: self.per_state,
            seed: self.random_state,
            evaluation: self
                .evaluation
                .enabled
                .then(|| EvalOptions {
                    cv_folds: self.evaluation.cv_folds,
                }),
        })
    }
}
