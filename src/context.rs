use crate::config::Config;
use crate::service::ForecastService;
use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};

/// Per-invocation state shared by every subcommand.
#[derive(Clone)]
pub struct AppContext {
    config_path: PathBuf,
    config: Config,
}

/// Command-line values that take precedence over the configuration file.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrainingOverrides {
    pub num_boost_round: Option<u32>,
    pub learning_rate: Option<f64>,
    pub num_leaves: Option<u32>,
    pub history_days: Option<u32>,
    pub parallel_horizons: Option<usize>,
}

impl TrainingOverrides {
    pub fn is_empty(&self) -> bool {
        self.num_boost_round.is_none()
            && self.learning_rate.is_none()
            && self.num_leaves.is_none()
            && self.history_days.is_none()
            && self.parallel_horizons.is_none()
    }

    pub fn apply(&self, config: &mut Config) {
        if let Some(value) = self.num_boost_round {
            config.model.training.num_boost_round = value;
        }
        if let Some(value) = self.learning_rate {
            config.model.params.learning_rate = value;
        }
        if let Some(value) = self.num_leaves {
            config.model.params.num_leaves = value;
        }
        if let Some(value) = self.history_days {
            config.data.history_days = value;
        }
        if let Some(value) = self.parallel_horizons {
            config.model.training.parallel_horizons = value;
        }
    }
}

impl AppContext {
    pub fn initialize<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let config = Config::load(&config_path)
            .with_context(|| format!("failed to load config {}", config_path.display()))?;
        info!("Loaded configuration from {}", config_path.display());
        Ok(Self {
            config_path,
            config,
        })
    }

    pub fn from_config(config_path: PathBuf, config: Config) -> Self {
        Self {
            config_path,
            config,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Copy of the configuration with `overrides` applied and re-validated.
    pub fn config_with_overrides(&self, overrides: &TrainingOverrides) -> Result<Config> {
        let mut config = self.config.clone();
        if overrides.is_empty() {
            return Ok(config);
        }
        overrides.apply(&mut config);
        config
            .validate()
            .context("configuration invalid after command-line overrides")?;
        Ok(config)
    }

    /// Serving lookup over the artifacts of the last training run.
    pub fn forecast_service(&self) -> Result<ForecastService> {
        let mut service =
            ForecastService::new(self.config.forecast_path(), self.config.summary_path());
        service.load().with_context(|| {
            format!(
                "failed to load forecast artifacts from {}; run `train` first",
                self.config.paths.output.display()
            )
        })?;
        Ok(service)
    }
}
