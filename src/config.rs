use crate::error::{ForecastError, Result};
use crate::models::{GroupKey, HierarchyLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/hierarchical_lgbm.toml";

/// Full pipeline configuration, loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub paths: PathsConfig,
    pub data: DataConfig,
    pub features: FeaturesConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    pub raw_data: PathBuf,
    pub output: PathBuf,
    /// Explicit LightGBM CLI binary; falls back to vendor/lightgbm and then PATH.
    #[serde(default)]
    pub lightgbm: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    pub history_days: u32,
    pub test_horizon: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeaturesConfig {
    pub lags: Vec<usize>,
    pub rolling_windows: Vec<usize>,
    pub hierarchical_levels: Vec<HierarchyLevel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    #[serde(default)]
    pub params: LightgbmParams,
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    Regression,
    Poisson,
    Tweedie,
    Gamma,
}

impl Objective {
    pub fn as_str(self) -> &'static str {
        match self {
            Objective::Regression => "regression",
            Objective::Poisson => "poisson",
            Objective::Tweedie => "tweedie",
            Objective::Gamma => "gamma",
        }
    }
}

/// Boosting hyperparameters handed to the LightGBM CLI verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LightgbmParams {
    pub objective: Objective,
    pub tweedie_variance_power: f64,
    pub learning_rate: f64,
    pub num_leaves: u32,
    pub max_depth: i32,
    pub min_data_in_leaf: u32,
    pub min_gain_to_split: f64,
    pub feature_fraction: f64,
    pub bagging_fraction: f64,
    pub bagging_freq: u32,
    pub lambda_l1: f64,
    pub lambda_l2: f64,
    pub seed: Option<u64>,
}

impl Default for LightgbmParams {
    fn default() -> Self {
        Self {
            objective: Objective::Tweedie,
            tweedie_variance_power: 1.1,
            learning_rate: 0.05,
            num_leaves: 63,
            max_depth: -1,
            min_data_in_leaf: 100,
            min_gain_to_split: 0.0,
            feature_fraction: 0.8,
            bagging_fraction: 0.8,
            bagging_freq: 1,
            lambda_l1: 0.0,
            lambda_l2: 0.1,
            seed: Some(42),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingConfig {
    pub num_boost_round: u32,
    pub num_models: usize,
    #[serde(default = "default_parallel_horizons")]
    pub parallel_horizons: usize,
}

fn default_parallel_horizons() -> usize {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OutputConfig {
    pub forecast_filename: String,
    pub forecast_csv_filename: String,
    pub summary_filename: String,
    pub models_dirname: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            forecast_filename: "forecasts.bin".to_string(),
            forecast_csv_filename: "forecasts.csv".to_string(),
            summary_filename: "summary.json".to_string(),
            models_dirname: "models".to_string(),
        }
    }
}

/// Aggregation levels scored by WRMSSE. `None` selects the standard twelve;
/// an empty `groupby` list means the grand total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluationConfig {
    #[serde(default)]
    pub levels: Option<Vec<Vec<GroupKey>>>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| {
            ForecastError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                err
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)
            .map_err(|err| ForecastError::Config(format!("Failed to parse config: {}", err)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.data.history_days == 0 {
            return Err(config_error("data.history_days must be > 0 (value: 0)"));
        }
        let horizons = self.model.training.num_models;
        if horizons == 0 {
            return Err(config_error(
                "model.training.num_models must be >= 1 (value: 0)",
            ));
        }
        if horizons > self.data.test_horizon as usize {
            return Err(config_error(format!(
                "model.training.num_models ({}) must be <= data.test_horizon ({})",
                horizons, self.data.test_horizon
            )));
        }
        if self.model.training.num_boost_round == 0 {
            return Err(config_error(
                "model.training.num_boost_round must be >= 1 (value: 0)",
            ));
        }
        if self.model.training.parallel_horizons == 0 {
            return Err(config_error(
                "model.training.parallel_horizons must be >= 1 (value: 0)",
            ));
        }
        require_positive_list("features.lags", &self.features.lags)?;
        require_positive_list("features.rolling_windows", &self.features.rolling_windows)?;
        validate_levels(&self.features.hierarchical_levels)?;
        self.model.params.validate()?;

        if let Some(levels) = &self.evaluation.levels {
            if levels.is_empty() {
                return Err(config_error(
                    "evaluation.levels must contain at least one level when set",
                ));
            }
        }
        Ok(())
    }

    /// Number of per-horizon models, which is also the forecast width.
    pub fn horizons(&self) -> usize {
        self.model.training.num_models
    }

    pub fn forecast_path(&self) -> PathBuf {
        self.paths.output.join(&self.output.forecast_filename)
    }

    pub fn forecast_csv_path(&self) -> PathBuf {
        self.paths.output.join(&self.output.forecast_csv_filename)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.paths.output.join(&self.output.summary_filename)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.paths.output.join(&self.output.models_dirname)
    }
}

impl LightgbmParams {
    fn validate(&self) -> Result<()> {
        require_positive_f64("model.params.learning_rate", self.learning_rate)?;
        if self.num_leaves < 2 {
            return Err(config_error(format!(
                "model.params.num_leaves must be >= 2 (value: {})",
                self.num_leaves
            )));
        }
        require_fraction("model.params.feature_fraction", self.feature_fraction)?;
        require_fraction("model.params.bagging_fraction", self.bagging_fraction)?;
        if matches!(self.objective, Objective::Tweedie)
            && !(1.0..2.0).contains(&self.tweedie_variance_power)
        {
            return Err(config_error(format!(
                "model.params.tweedie_variance_power must be in [1, 2) (value: {})",
                self.tweedie_variance_power
            )));
        }
        if self.lambda_l1 < 0.0 || self.lambda_l2 < 0.0 || self.min_gain_to_split < 0.0 {
            return Err(config_error(
                "model.params.lambda_l1, lambda_l2 and min_gain_to_split must be >= 0",
            ));
        }
        Ok(())
    }
}

/// Prefixes name feature columns, so they must stay distinguishable from
/// the `_lag_`/`_roll_` markers the horizon shift keys on.
pub fn validate_levels(levels: &[HierarchyLevel]) -> Result<()> {
    if levels.is_empty() {
        return Err(config_error(
            "features.hierarchical_levels must contain at least one level",
        ));
    }
    let mut seen = HashSet::new();
    for level in levels {
        let prefix = level.prefix.trim();
        if prefix.is_empty() {
            return Err(config_error("hierarchical level prefix must not be empty"));
        }
        if prefix != level.prefix {
            return Err(config_error(format!(
                "hierarchical level prefix must not carry surrounding whitespace (value: {:?})",
                level.prefix
            )));
        }
        if prefix.contains("_lag_") || prefix.contains("_roll_") {
            return Err(config_error(format!(
                "hierarchical level prefix must not contain _lag_ or _roll_ (value: {})",
                prefix
            )));
        }
        if level.groupby.is_empty() {
            return Err(config_error(format!(
                "hierarchical level {} must group by at least one key",
                prefix
            )));
        }
        if !seen.insert(prefix) {
            return Err(config_error(format!(
                "duplicate hierarchical level prefix {}",
                prefix
            )));
        }
    }
    Ok(())
}

fn require_positive_list(key: &str, values: &[usize]) -> Result<()> {
    if values.is_empty() {
        return Err(config_error(format!(
            "{} must contain at least one value",
            key
        )));
    }
    if let Some(zero) = values.iter().find(|value| **value == 0) {
        return Err(config_error(format!(
            "{} must contain only positive values (value: {})",
            key, zero
        )));
    }
    Ok(())
}

fn require_positive_f64(key: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(config_error(format!(
            "{} must be a positive number (value: {})",
            key, value
        )));
    }
    Ok(())
}

fn require_fraction(key: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 || value > 1.0 {
        return Err(config_error(format!(
            "{} must be in (0, 1] (value: {})",
            key, value
        )));
    }
    Ok(())
}

fn config_error(message: impl Into<String>) -> ForecastError {
    ForecastError::Config(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[paths]
raw_data = "data/raw"
output = "outputs/forecasts"

[data]
history_days = 600
test_horizon = 28

[features]
lags = [7, 14, 28]
rolling_windows = [7, 28]

[[features.hierarchical_levels]]
groupby = ["id"]
prefix = "id"

[[features.hierarchical_levels]]
groupby = ["store_id", "dept_id"]
prefix = "store_dept"

[model.params]
objective = "tweedie"
learning_rate = 0.03

[model.training]
num_boost_round = 200
num_models = 28
"#;

    #[test]
    fn parses_sample_config_with_defaults() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.horizons(), 28);
        assert_eq!(config.model.training.parallel_horizons, 2);
        assert_eq!(config.model.params.learning_rate, 0.03);
        assert_eq!(config.model.params.num_leaves, 63);
        assert_eq!(
            config.features.hierarchical_levels[1].groupby,
            vec![GroupKey::StoreId, GroupKey::DeptId]
        );
        assert_eq!(config.output.forecast_filename, "forecasts.bin");
        assert!(config.evaluation.levels.is_none());
        assert_eq!(
            config.summary_path(),
            PathBuf::from("outputs/forecasts/summary.json")
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        let raw = SAMPLE.replace("history_days = 600", "history_days = 600\nhistroy = 1");
        assert!(matches!(
            Config::from_toml_str(&raw),
            Err(ForecastError::Config(_))
        ));
    }

    #[test]
    fn rejects_more_models_than_test_days() {
        let raw = SAMPLE.replace("num_models = 28", "num_models = 29");
        let err = Config::from_toml_str(&raw).unwrap_err();
        assert!(err.to_string().contains("num_models"));
    }

    #[test]
    fn rejects_zero_lag_and_empty_windows() {
        let raw = SAMPLE.replace("lags = [7, 14, 28]", "lags = [0, 7]");
        assert!(Config::from_toml_str(&raw).is_err());

        let raw = SAMPLE.replace("rolling_windows = [7, 28]", "rolling_windows = []");
        assert!(Config::from_toml_str(&raw).is_err());
    }

    #[test]
    fn rejects_prefixes_that_collide_with_feature_markers() {
        let duplicate = vec![
            HierarchyLevel::new(vec![GroupKey::Id], "id"),
            HierarchyLevel::new(vec![GroupKey::ItemId], "id"),
        ];
        assert!(validate_levels(&duplicate).is_err());

        let marker = vec![HierarchyLevel::new(vec![GroupKey::Id], "id_lag_x")];
        assert!(validate_levels(&marker).is_err());

        let empty = vec![HierarchyLevel::new(vec![GroupKey::Id], "")];
        assert!(validate_levels(&empty).is_err());
    }

    #[test]
    fn rejects_unknown_group_key() {
        let raw = SAMPLE.replace(r#"groupby = ["id"]"#, r#"groupby = ["region"]"#);
        assert!(Config::from_toml_str(&raw).is_err());
    }
}
