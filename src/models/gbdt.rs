use gbdt::config::Config as GbdtConfig;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use tracing::debug;

use super::EnsembleTreeParams;
use crate::error::{ImputeError, Result};

/// Gradient-boosted regression trees with squared-error loss.
pub struct EnsembleTreeModel {
    model: GBDT,
    feature_size: usize,
}

impl EnsembleTreeModel {
    pub(crate) fn fit(
        params: &EnsembleTreeParams,
        rows: &[Vec<f64>],
        targets: &[f64],
    ) -> Result<Self> {
        let feature_size = rows[0].len();
        if feature_size == 0 {
            return Err(ImputeError::Fit("no predictor columns".to_string()));
        }

        let mut config = GbdtConfig::new();
        config.set_feature_size(feature_size);
        config.set_max_depth(params.max_depth);
        config.set_iterations(params.iterations);
        config.set_shrinkage(params.shrinkage);
        config.set_min_leaf_size(params.min_leaf_size);
        config.set_loss("SquaredError");
        config.set_debug(false);
        config.set_data_sample_ratio(params.data_sample_ratio);
        config.set_feature_sample_ratio(params.feature_sample_ratio);
        config.set_training_optimization_level(2);

        let mut train_data = to_data_vec(rows, Some(targets));
        let mut model = GBDT::new(&config);
        model.fit(&mut train_data);
        debug!(rows = rows.len(), feature_size, "ensemble tree trained");

        Ok(Self {
            model,
            feature_size,
        })
    }

    pub(crate) fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        if rows.iter().any(|row| row.len() != self.feature_size) {
            return Err(ImputeError::Fit(format!(
                "prediction rows do not match the trained feature width {}",
                self.feature_size
            )));
        }
        let data = to_data_vec(rows, None);
        let predictions = self.model.predict(&data);
        Ok(predictions.into_iter().map(f64::from).collect())
    }
}

fn to_data_vec(rows: &[Vec<f64>], targets: Option<&[f64]>) -> DataVec {
    let mut data = DataVec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let target = targets.map_or(0.0, |t| t[i] as f32);
        data.push(Data {
            label: target,
            weight: 1.0,
            feature: row.iter().map(|&v| v as f32).collect(),
            target,
            residual: 0.0,
            initial_guess: 0.0,
        });
    }
    data
}
