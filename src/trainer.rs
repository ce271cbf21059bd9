use std::collections::BTreeMap;

use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, warn};

use crate::data_loader::{ROW_ID, STATEFP};
use crate::error::{ImputeError, Result};
use crate::metrics::RegressionMetrics;
use crate::models::{FittedModel, ModelConfig};

/// Labeled predictor rows extracted from a partition frame, keyed by row id.
#[derive(Debug)]
pub struct LabeledMatrix {
    pub ids: Vec<IdxSize>,
    pub rows: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    states: Vec<String>,
}

impl LabeledMatrix {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn take(&self, indices: &[usize]) -> Self {
        Self {
            ids: indices.iter().map(|&i| self.ids[i]).collect(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            targets: indices.iter().map(|&i| self.targets[i]).collect(),
            states: indices.iter().map(|&i| self.states[i].clone()).collect(),
        }
    }
}

/// Predictor rows for a prediction batch; rows whose predictors could not be
/// resolved to finite numbers are excluded and counted.
pub struct FeatureBatch {
    pub ids: Vec<IdxSize>,
    pub rows: Vec<Vec<f64>>,
    pub unresolved: usize,
}

#[derive(Debug)]
pub struct SplitSets {
    pub train: LabeledMatrix,
    pub test: LabeledMatrix,
}

/// Predictions keyed by row identity, so reordering the input frame cannot
/// change which record receives which value.
#[derive(Debug)]
pub struct Predictions {
    pub values: Vec<(IdxSize, f64)>,
    pub unresolved: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct CvScores {
    pub r2: Vec<f64>,
    pub mae: Vec<f64>,
    pub mse: Vec<f64>,
}

/// Extracts the labeled rows (non-null response, resolvable predictors) from a
/// partition frame.
pub fn labeled_matrix(
    frame: &DataFrame,
    predictors: &[String],
    response: &str,
) -> Result<LabeledMatrix> {
    let ids = id_column(frame)?;
    let states = state_column(frame)?;
    let response_col = frame.column(response)?.cast(&DataType::Float64)?;
    let response_values: Vec<Option<f64>> = response_col.f64()?.into_iter().collect();
    let predictor_cols: Vec<Vec<Option<f64>>> = predictors
        .iter()
        .map(|name| numeric_column(frame, name))
        .collect::<Result<_>>()?;

    let mut matrix = LabeledMatrix {
        ids: Vec::new(),
        rows: Vec::new(),
        targets: Vec::new(),
        states: Vec::new(),
    };
    let mut dropped = 0usize;
    for i in 0..frame.height() {
        let Some(target) = response_values[i] else {
            continue;
        };
        let row: Option<Vec<f64>> = predictor_cols.iter().map(|c| c[i]).collect();
        match row {
            Some(row) if target.is_finite() && row.iter().all(|v| v.is_finite()) => {
                matrix.ids.push(ids[i]);
                matrix.rows.push(row);
                matrix.targets.push(target);
                matrix.states.push(states[i].clone());
            }
            _ => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!(dropped, response, "labeled rows excluded: unresolved predictors");
    }
    Ok(matrix)
}

/// Extracts predictor rows for prediction, keeping track of rows that cannot
/// be resolved.
pub fn feature_batch(frame: &DataFrame, predictors: &[String]) -> Result<FeatureBatch> {
    let ids = id_column(frame)?;
    let predictor_cols: Vec<Vec<Option<f64>>> = predictors
        .iter()
        .map(|name| numeric_column(frame, name))
        .collect::<Result<_>>()?;

    let mut batch = FeatureBatch {
        ids: Vec::new(),
        rows: Vec::new(),
        unresolved: 0,
    };
    for i in 0..frame.height() {
        let row: Option<Vec<f64>> = predictor_cols.iter().map(|c| c[i]).collect();
        match row {
            Some(row) if row.iter().all(|v| v.is_finite()) => {
                batch.ids.push(ids[i]);
                batch.rows.push(row);
            }
            _ => batch.unresolved += 1,
        }
    }
    Ok(batch)
}

/// Randomized train/test split of the labeled rows with a fixed seed. A
/// near-zero test fraction is legal and yields an empty test set; the
/// training set is never empty unless the partition has no labeled rows at
/// all, which is a fit error.
pub fn split(
    frame: &DataFrame,
    predictors: &[String],
    response: &str,
    test_fraction: f64,
    stratify_by_state: bool,
    seed: u64,
) -> Result<SplitSets> {
    if !(0.0..1.0).contains(&test_fraction) {
        return Err(ImputeError::Fit(format!(
            "test fraction {test_fraction} outside [0, 1)"
        )));
    }
    let data = labeled_matrix(frame, predictors, response)?;
    if data.is_empty() {
        return Err(ImputeError::Fit(format!(
            "no labeled rows for {response} to split"
        )));
    }

    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for i in 0..data.len() {
        let key = if stratify_by_state {
            data.states[i].as_str()
        } else {
            ""
        };
        groups.entry(key).or_default().push(i);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train_idx = Vec::with_capacity(data.len());
    let mut test_idx = Vec::new();
    for indices in groups.values() {
        let mut indices = indices.clone();
        indices.shuffle(&mut rng);
        let n_test = ((indices.len() as f64) * test_fraction).floor() as usize;
        test_idx.extend(indices.drain(..n_test));
        train_idx.extend(indices);
    }
    debug!(
        train = train_idx.len(),
        test = test_idx.len(),
        stratified = stratify_by_state,
        "split labeled rows"
    );

    Ok(SplitSets {
        train: data.take(&train_idx),
        test: data.take(&test_idx),
    })
}

pub fn fit(config: &ModelConfig, train: &LabeledMatrix) -> Result<FittedModel> {
    debug!(kind = ?config.kind(), rows = train.len(), "fitting model");
    FittedModel::fit(config, &train.rows, &train.targets)
}

/// Applies a fitted model to the predictor columns of a frame. Returns one
/// prediction per resolvable row, keyed by row id; if every requested row is
/// unresolvable the whole batch is a prediction error.
pub fn predict(
    model: &FittedModel,
    frame: &DataFrame,
    predictors: &[String],
) -> Result<Predictions> {
    let requested = frame.height();
    if requested == 0 {
        return Ok(Predictions {
            values: Vec::new(),
            unresolved: 0,
        });
    }
    let batch = feature_batch(frame, predictors)?;
    if batch.rows.is_empty() {
        return Err(ImputeError::Prediction {
            requested,
            unresolved: batch.unresolved,
        });
    }
    let values = model.predict(&batch.rows)?;
    Ok(Predictions {
        values: batch.ids.into_iter().zip(values).collect(),
        unresolved: batch.unresolved,
    })
}

pub fn evaluate(model: &FittedModel, test: &LabeledMatrix) -> Result<RegressionMetrics> {
    if test.is_empty() {
        return Err(ImputeError::Evaluation(
            "held-out set is empty".to_string(),
        ));
    }
    let predicted = model.predict(&test.rows)?;
    RegressionMetrics::compute(&test.targets, &predicted)
}

/// K-fold cross-validation with the same fixed seed as `split`; returns
/// per-fold metric arrays.
pub fn cross_validate(
    config: &ModelConfig,
    data: &LabeledMatrix,
    k_folds: usize,
    seed: u64,
) -> Result<CvScores> {
    if k_folds < 2 {
        return Err(ImputeError::Evaluation(format!(
            "cross-validation needs at least 2 folds, got {k_folds}"
        )));
    }
    if data.len() < k_folds {
        return Err(ImputeError::Evaluation(format!(
            "{} samples cannot fill {k_folds} folds",
            data.len()
        )));
    }

    let mut indices: Vec<usize> = (0..data.len()).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));

    let base = data.len() / k_folds;
    let extra = data.len() % k_folds;
    let mut scores = CvScores::default();
    let mut start = 0usize;
    for fold in 0..k_folds {
        let len = base + usize::from(fold < extra);
        let holdout = &indices[start..start + len];
        start += len;

        let mut in_holdout = vec![false; data.len()];
        for &i in holdout {
            in_holdout[i] = true;
        }
        let train_indices: Vec<usize> = (0..data.len()).filter(|&i| !in_holdout[i]).collect();

        let train = data.take(&train_indices);
        let test = data.take(holdout);
        let model = FittedModel::fit(config, &train.rows, &train.targets)?;
        let metrics = evaluate(&model, &test)?;
        scores.r2.push(metrics.r2);
        scores.mae.push(metrics.mae);
        scores.mse.push(metrics.mse);
    }
    Ok(scores)
}

fn id_column(frame: &DataFrame) -> Result<Vec<IdxSize>> {
    let ids = frame.column(ROW_ID)?.u32()?;
    ids.into_iter()
        .map(|id| id.ok_or_else(|| ImputeError::DataLoad("null row id".to_string())))
        .collect()
}

fn state_column(frame: &DataFrame) -> Result<Vec<String>> {
    let states = frame.column(STATEFP)?.str()?;
    Ok(states
        .into_iter()
        .map(|s| s.unwrap_or_default().to_string())
        .collect())
}

/// Predictor columns may arrive as zero-padded numeric strings (county FIPS);
/// those parse to their numeric codes, everything else casts to float.
fn numeric_column(frame: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = frame.column(name)?;
    match column.dtype() {
        DataType::String => Ok(column
            .str()?
            .into_iter()
            .map(|v| v.and_then(|s| s.parse::<f64>().ok()))
            .collect()),
        _ => {
            let cast = column.cast(&DataType::Float64)?;
            Ok(cast.f64()?.into_iter().collect())
        }
    }
}
