use crate::context::{AppContext, TrainingOverrides};
use crate::lightgbm_cli::LightgbmCli;
use crate::pipeline::run_training;
use anyhow::{Context, Result};
use log::info;

pub fn run(app: &AppContext, overrides: TrainingOverrides) -> Result<()> {
    let config = app.config_with_overrides(&overrides)?;
    info!(
        "Starting hierarchical LightGBM training: {} horizons, {} boosting rounds, {} history days",
        config.horizons(),
        config.model.training.num_boost_round,
        config.data.history_days
    );

    let trainer = LightgbmCli::resolve(
        config.paths.lightgbm.as_deref(),
        config.model.params.clone(),
        config.model.training.num_boost_round,
    )
    .context("LightGBM executable unavailable")?;

    let outcome = run_training(&config, Box::new(trainer), true).context("training run failed")?;
    info!(
        "WRMSSE {:.4}; {} models and forecasts for {} series written to {}",
        outcome.summary.wrmsse,
        outcome.model_paths.len(),
        outcome.forecast.len(),
        config.paths.output.display()
    );
    Ok(())
}
