use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::{debug, info};

use hpms_aadt_impute::config::Config;
use hpms_aadt_impute::data_loader::AadtTable;
use hpms_aadt_impute::models::ModelConfig;
use hpms_aadt_impute::tuning::{self, TuneOutcome};
use hpms_aadt_impute::{impute, trainer};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Starting HPMS truck-AADT imputation");

    let config_path = "config.toml";
    debug!("Loading config from path: {}", config_path);
    let config = Config::load(config_path)?;
    debug!(?config, "Config loaded successfully");

    let mut table = AadtTable::load(&config.data_path)?;
    info!(rows = table.height(), "road-link table loaded");

    let mut options = config.run_options()?;

    if let Some(tuning_config) = config.tuning.as_ref().filter(|t| t.enabled) {
        if let ModelConfig::EnsembleTree(base) = &options.model {
            let response = config
                .response_vars
                .first()
                .context("response_vars must not be empty")?;
            let labeled = table.rows_labeled(response)?;
            let data = trainer::labeled_matrix(&labeled, &config.predictor_vars, response)?;
            let outcome = tuning::grid_search(
                &tuning_config.grid,
                base,
                &data,
                tuning_config.cv_folds,
                config.random_state,
            )?;
            write_tuning_artifacts(Path::new(&tuning_config.artifacts_dir), &outcome)?;
            info!(?outcome.best_params, "using tuned ensemble tree parameters");
            options.model = ModelConfig::EnsembleTree(outcome.best_params);
        } else {
            info!("tuning requested but the configured model has no parameter grid, skipping");
        }
    }

    let summary = impute::run(&mut table, &options)?;
    for response in &summary.responses {
        info!(
            response = response.response.as_str(),
            imputed = response.imputed,
            remaining_missing = response.remaining_missing,
            partitions_skipped = response.partitions_skipped,
            "imputation summary"
        );
    }

    table.write_csv(&config.output_path)?;
    info!("Imputation complete");
    Ok(())
}

fn write_tuning_artifacts(dir: &Path, outcome: &TuneOutcome) -> anyhow::Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create artifacts dir {}", dir.display()))?;

    let best = serde_json::to_string_pretty(&outcome.best_params)?;
    fs::write(dir.join("best_params.json"), best)?;

    let results = serde_json::to_string_pretty(&outcome.results)?;
    fs::write(dir.join("cv_results.json"), results)?;

    debug!(dir = %dir.display(), "wrote tuning artifacts");
    Ok(())
}
