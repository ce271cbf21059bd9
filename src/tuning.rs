use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ImputeError, Result};
use crate::models::{EnsembleTreeParams, FittedModel, ModelConfig};
use crate::trainer::{self, LabeledMatrix};

/// Candidate values per ensemble-tree parameter. Empty axes fall back to the
/// base configuration's value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EnsembleTreeGrid {
    pub iterations: Vec<usize>,
    pub max_depth: Vec<u32>,
    pub shrinkage: Vec<f32>,
    pub min_leaf_size: Vec<usize>,
}

impl EnsembleTreeGrid {
    /// Cartesian product of the grid axes.
    pub fn candidates(&self, base: &EnsembleTreeParams) -> Vec<EnsembleTreeParams> {
        let iterations = axis(&self.iterations, base.iterations);
        let max_depth = axis(&self.max_depth, base.max_depth);
        let shrinkage = axis(&self.shrinkage, base.shrinkage);
        let min_leaf_size = axis(&self.min_leaf_size, base.min_leaf_size);

        let mut candidates = Vec::new();
        for &iterations in &iterations {
            for &max_depth in &max_depth {
                for &shrinkage in &shrinkage {
                    for &min_leaf_size in &min_leaf_size {
                        candidates.push(EnsembleTreeParams {
                            iterations,
                            max_depth,
                            shrinkage,
                            min_leaf_size,
                            ..base.clone()
                        });
                    }
                }
            }
        }
        candidates
    }
}

fn axis<T: Clone>(values: &[T], fallback: T) -> Vec<T> {
    if values.is_empty() {
        vec![fallback]
    } else {
        values.to_vec()
    }
}

/// One scored grid configuration, kept for offline inspection.
#[derive(Debug, Clone, Serialize)]
pub struct TuneRecord {
    pub params: EnsembleTreeParams,
    pub mean_neg_mse: f64,
    pub fold_mse: Vec<f64>,
}

pub struct TuneOutcome {
    pub best_params: EnsembleTreeParams,
    pub best_model: FittedModel,
    pub results: Vec<TuneRecord>,
}

/// Exhaustive search over the parameter grid, scored by negative mean squared
/// error under k-fold cross-validation. Every candidate is validated on the
/// same seeded folds, so the search is deterministic for a fixed seed; ties
/// keep the first candidate in grid order. The winning parameters are refit on
/// the full labeled set.
pub fn grid_search(
    grid: &EnsembleTreeGrid,
    base: &EnsembleTreeParams,
    data: &LabeledMatrix,
    k_folds: usize,
    seed: u64,
) -> Result<TuneOutcome> {
    let candidates = grid.candidates(base);
    info!(
        candidates = candidates.len(),
        k_folds,
        rows = data.len(),
        "starting hyperparameter grid search"
    );

    let mut results = Vec::with_capacity(candidates.len());
    let mut best: Option<(usize, f64)> = None;
    for (index, params) in candidates.iter().enumerate() {
        let config = ModelConfig::EnsembleTree(params.clone());
        let scores = trainer::cross_validate(&config, data, k_folds, seed)?;
        let mean_mse = scores.mse.iter().sum::<f64>() / scores.mse.len() as f64;
        let mean_neg_mse = -mean_mse;
        debug!(candidate = index, mean_neg_mse, "scored grid configuration");

        if best.map_or(true, |(_, score)| mean_neg_mse > score) {
            best = Some((index, mean_neg_mse));
        }
        results.push(TuneRecord {
            params: params.clone(),
            mean_neg_mse,
            fold_mse: scores.mse,
        });
    }

    let (best_index, best_score) = best
        .ok_or_else(|| ImputeError::Fit("hyperparameter grid is empty".to_string()))?;
    let best_params = candidates[best_index].clone();
    info!(score = best_score, "grid search complete");

    let config = ModelConfig::EnsembleTree(best_params.clone());
    let best_model = FittedModel::fit(&config, &data.rows, &data.targets)?;
    Ok(TuneOutcome {
        best_params,
        best_model,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_loader::{ROW_ID, STATEFP};
    use polars::prelude::*;

    fn labeled_data() -> LabeledMatrix {
        let aadt: Vec<f64> = (1..=16).map(|i| 500.0 * i as f64).collect();
        let hdv: Vec<f64> = aadt.iter().map(|&a| 0.08 * a + 11.0).collect();
        let frame = df!(
            ROW_ID => &(0u32..16).collect::<Vec<u32>>(),
            STATEFP => &vec!["50"; 16],
            "THROUGH_LANES" => &vec![2i64; 16],
            "AADT" => &aadt,
            "AADT_HDV" => &hdv,
        )
        .unwrap();
        trainer::labeled_matrix(
            &frame,
            &["AADT".to_string(), "THROUGH_LANES".to_string()],
            "AADT_HDV",
        )
        .unwrap()
    }

    fn small_grid() -> EnsembleTreeGrid {
        EnsembleTreeGrid {
            iterations: vec![10, 20],
            max_depth: vec![3],
            shrinkage: vec![0.1, 0.3],
            min_leaf_size: vec![],
        }
    }

    #[test]
    fn candidates_form_the_cartesian_product() {
        let grid = small_grid();
        let base = EnsembleTreeParams::default();
        let candidates = grid.candidates(&base);
        assert_eq!(candidates.len(), 4);
        // Empty axes inherit the base value.
        assert!(candidates.iter().all(|c| c.min_leaf_size == base.min_leaf_size));
    }

    #[test]
    fn grid_search_is_deterministic_for_a_fixed_seed() {
        let data = labeled_data();
        let grid = small_grid();
        let base = EnsembleTreeParams::default();
        let first = grid_search(&grid, &base, &data, 4, 42).unwrap();
        let second = grid_search(&grid, &base, &data, 4, 42).unwrap();
        assert_eq!(first.best_params, second.best_params);
        assert_eq!(first.results.len(), second.results.len());
        for (a, b) in first.results.iter().zip(second.results.iter()) {
            assert_eq!(a.mean_neg_mse, b.mean_neg_mse);
        }
    }

    #[test]
    fn best_candidate_has_the_highest_score() {
        let data = labeled_data();
        let grid = small_grid();
        let base = EnsembleTreeParams::default();
        let outcome = grid_search(&grid, &base, &data, 4, 42).unwrap();
        let best_score = outcome
            .results
            .iter()
            .find(|r| r.params == outcome.best_params)
            .map(|r| r.mean_neg_mse)
            .unwrap();
        assert!(outcome.results.iter().all(|r| r.mean_neg_mse <= best_score));
    }
}
