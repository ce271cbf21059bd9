use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::data_loader::AadtTable;
use crate::error::{ImputeError, Result};
use crate::models::ModelConfig;
use crate::trainer;

/// Options for one imputation batch, usually assembled from `Config`.
#[derive(Debug)]
pub struct RunOptions {
    pub response_vars: Vec<String>,
    pub predictor_vars: Vec<String>,
    pub model: ModelConfig,
    pub test_fraction: f64,
    pub stratify_by_state: bool,
    pub per_state: bool,
    pub seed: u64,
    pub evaluation: Option<EvalOptions>,
}

#[derive(Debug)]
pub struct EvalOptions {
    pub cv_folds: usize,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub responses: Vec<ResponseSummary>,
}

#[derive(Debug, Default, Clone)]
pub struct ResponseSummary {
    pub response: String,
    pub imputed: usize,
    pub remaining_missing: usize,
    pub partitions_skipped: usize,
}

/// Runs the imputation batch: for each response variable and each partition,
/// fit a model on the labeled rows and commit predictions for the missing
/// ones. Failures local to one partition are logged and skipped so the batch
/// always visits every partition; only data loading and commit failures
/// abort.
pub fn run(table: &mut AadtTable, options: &RunOptions) -> Result<RunSummary> {
    let partitions: Vec<Option<String>> = if options.per_state {
        table.states()?.into_iter().map(Some).collect()
    } else {
        vec![None]
    };
    info!(
        responses = options.response_vars.len(),
        partitions = partitions.len(),
        "starting imputation batch"
    );

    let mut summary = RunSummary::default();
    for response in &options.response_vars {
        let mut response_summary = ResponseSummary {
            response: response.clone(),
            ..Default::default()
        };
        for state in &partitions {
            match impute_partition(table, options, response, state.as_deref()) {
                Ok(imputed) => response_summary.imputed += imputed,
                Err(
                    err @ (ImputeError::ModelInit(_)
                    | ImputeError::Fit(_)
                    | ImputeError::Prediction { .. }
                    | ImputeError::Evaluation(_)),
                ) => {
                    warn!(
                        response = response.as_str(),
                        state = state.as_deref().unwrap_or("all"),
                        %err,
                        "partition skipped"
                    );
                    response_summary.partitions_skipped += 1;
                }
                Err(fatal) => return Err(fatal),
            }
        }
        response_summary.remaining_missing = table.missing_count(response)?;
        info!(
            response = response.as_str(),
            imputed = response_summary.imputed,
            remaining_missing = response_summary.remaining_missing,
            partitions_skipped = response_summary.partitions_skipped,
            "response variable complete"
        );
        summary.responses.push(response_summary);
    }
    Ok(summary)
}

/// One fit/predict/commit cycle for a (state, response) partition. Returns
/// the number of rows committed.
fn impute_partition(
    table: &mut AadtTable,
    options: &RunOptions,
    response: &str,
    state: Option<&str>,
) -> Result<usize> {
    let label = state.unwrap_or("all");
    let partition = table.partition(state)?;
    if partition.height() == 0 {
        debug!(response, state = label, "empty partition, skipping");
        return Ok(0);
    }

    let missing = partition
        .clone()
        .lazy()
        .filter(col(response).is_null())
        .collect()?;
    if missing.height() == 0 {
        debug!(response, state = label, "nothing to impute");
        return Ok(0);
    }

    // Stratifying only makes sense when the partition spans states.
    let stratify = options.stratify_by_state && state.is_none();
    let sets = trainer::split(
        &partition,
        &options.predictor_vars,
        response,
        options.test_fraction,
        stratify,
        options.seed,
    )?;
    let model = trainer::fit(&options.model, &sets.train)?;

    if let Some(eval) = &options.evaluation {
        if sets.test.is_empty() {
            debug!(response, state = label, "no held-out rows, skipping evaluation");
        } else {
            match trainer::evaluate(&model, &sets.test) {
                Ok(metrics) => info!(
                    response,
                    state = label,
                    r2 = metrics.r2,
                    mae = metrics.mae,
                    mse = metrics.mse,
                    "held-out evaluation"
                ),
                Err(err) => warn!(response, state = label, %err, "held-out evaluation failed"),
            }
        }
        match trainer::cross_validate(&options.model, &sets.train, eval.cv_folds, options.seed) {
            Ok(scores) => info!(
                response,
                state = label,
                mean_r2 = mean(&scores.r2),
                mean_mae = mean(&scores.mae),
                mean_mse = mean(&scores.mse),
                folds = scores.r2.len(),
                "cross-validation"
            ),
            Err(err) => warn!(response, state = label, %err, "cross-validation failed"),
        }
    }

    let predictions = trainer::predict(&model, &missing, &options.predictor_vars)?;
    if predictions.unresolved > 0 {
        warn!(
            response,
            state = label,
            unresolved = predictions.unresolved,
            "rows left null: predictors could not be resolved"
        );
    }

    let (ids, values): (Vec<IdxSize>, Vec<f64>) = predictions.values.into_iter().unzip();
    let written = table.commit(&ids, response, &values)?;
    info!(response, state = label, imputed = written, "imputed missing values");
    Ok(written)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
