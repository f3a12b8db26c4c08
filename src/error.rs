use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the forecasting pipeline and the serving lookup.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Required raw data file not found: {}", .0.display())]
    DataNotFound(PathBuf),

    #[error("Schema error in {source_name}: {message}")]
    Schema {
        source_name: String,
        message: String,
    },

    #[error("No trainable rows remain for horizon {horizon} after dropping incomplete feature vectors")]
    InsufficientData { horizon: usize },

    #[error("Test window holds {found} distinct dates but {required} horizons were requested")]
    InsufficientHorizons { found: usize, required: usize },

    #[error("Forecast artifacts are not loaded; call load() first")]
    ModelNotLoaded,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Boosted-tree trainer failed for horizon {horizon}: {message}")]
    Trainer { horizon: usize, message: String },

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ForecastError {
    pub fn schema(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
