use crate::artifacts::{save_forecast_snapshot, write_forecast_csv, write_models, write_summary};
use crate::config::Config;
use crate::error::Result;
use crate::evaluation::{default_levels, Evaluator, WrmsseScorer};
use crate::features::FeatureEngineer;
use crate::horizon_predictor::HorizonPredictor;
use crate::horizon_trainer::{HorizonModels, HorizonTrainer};
use crate::lightgbm_cli::BoostedTreeTrainer;
use crate::models::{EvaluationSummary, ForecastMatrix};
use crate::panel::PanelBuilder;
use crate::raw_data::RawData;
use chrono::Utc;
use log::info;
use std::path::PathBuf;
use std::time::Instant;

/// Everything a training run produced, after the artifacts were written.
pub struct TrainingOutcome {
    pub forecast: ForecastMatrix,
    pub summary: EvaluationSummary,
    pub models: HorizonModels,
    pub model_paths: Vec<PathBuf>,
}

/// Runs raw tables through features, per-horizon training, prediction and
/// WRMSSE scoring, then persists forecasts, summary and model files under
/// `config.paths.output`.
pub fn run_training(
    config: &Config,
    trainer: Box<dyn BoostedTreeTrainer>,
    show_progress: bool,
) -> Result<TrainingOutcome> {
    config.validate()?;
    let started = Instant::now();
    let horizons = config.horizons();

    info!("Loading raw tables from {}", config.paths.raw_data.display());
    let raw = RawData::load(&config.paths.raw_data)?;
    let canonical_ids = raw.sales.canonical_ids();

    let panel = PanelBuilder::new(config.data.history_days, config.data.test_horizon).build(&raw)?;
    info!(
        "Panel holds {} rows for {} series over {} dates",
        panel.len(),
        panel.series().len(),
        panel.dates().len()
    );

    let engineer = FeatureEngineer::new(
        config.features.lags.clone(),
        config.features.rolling_windows.clone(),
    );
    let frame = engineer.create_all_features(panel, &config.features.hierarchical_levels)?;
    let split = frame.panel().split(config.data.test_horizon)?;
    info!(
        "Split at {}: {} train rows, {} test rows",
        split.cutoff,
        split.train_rows.len(),
        split.test_rows.len()
    );

    let training_started = Instant::now();
    let models = HorizonTrainer::new(trainer, horizons)
        .with_parallel_horizons(config.model.training.parallel_horizons)
        .with_progress(show_progress)
        .train(&frame, &split)?;
    let training_time_seconds = training_started.elapsed().as_secs_f64();

    let forecast = HorizonPredictor::new(&models).predict(&frame, split.cutoff, &canonical_ids)?;

    let levels = config
        .evaluation
        .levels
        .clone()
        .unwrap_or_else(default_levels);
    let scorer = WrmsseScorer::from_raw_window(
        &raw,
        config.data.test_horizon as usize,
        horizons,
        &levels,
    )?;
    let wrmsse = Evaluator::new(canonical_ids, Box::new(scorer)).evaluate(&forecast)?;

    let summary = EvaluationSummary {
        wrmsse,
        history_days: config.data.history_days,
        test_horizon: config.data.test_horizon,
        lags: config.features.lags.clone(),
        rolling_windows: config.features.rolling_windows.clone(),
        num_boost_round: config.model.training.num_boost_round,
        num_models: horizons,
        training_time_seconds,
        num_features: frame.num_features(),
        created_at: Utc::now(),
    };

    save_forecast_snapshot(&config.forecast_path(), &forecast)?;
    write_forecast_csv(&config.forecast_csv_path(), &forecast)?;
    write_summary(&config.summary_path(), &summary)?;
    let model_paths = write_models(&config.models_dir(), &models)?;

    info!(
        "Training run finished in {:.1}s: WRMSSE {:.4} over {} series",
        started.elapsed().as_secs_f64(),
        wrmsse,
        forecast.len()
    );

    Ok(TrainingOutcome {
        forecast,
        summary,
        models,
        model_paths,
    })
}
