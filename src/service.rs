use crate::artifacts::{load_forecast_snapshot, read_summary};
use crate::error::{ForecastError, Result};
use crate::models::{EvaluationSummary, ForecastMatrix};
use log::{error, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceState {
    Uninitialized,
    Loaded,
    Failed(String),
}

impl ServiceState {
    pub fn label(&self) -> &'static str {
        match self {
            ServiceState::Uninitialized => "uninitialized",
            ServiceState::Loaded => "healthy",
            ServiceState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub model_loaded: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub wrmsse: f64,
    pub history_days: u32,
    pub test_horizon: u32,
    pub lags: Vec<usize>,
    pub rolling_windows: Vec<usize>,
    pub num_boost_round: u32,
    pub num_models: usize,
    pub num_features: usize,
    pub num_items: usize,
    pub forecast_horizon: usize,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemPage {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub items: Vec<String>,
}

/// Read-only lookup over persisted forecasts and their evaluation summary.
#[derive(Debug)]
pub struct ForecastService {
    forecasts_path: PathBuf,
    summary_path: PathBuf,
    state: ServiceState,
    forecasts: Option<ForecastMatrix>,
    summary: Option<EvaluationSummary>,
}

impl ForecastService {
    pub fn new(forecasts_path: impl Into<PathBuf>, summary_path: impl Into<PathBuf>) -> Self {
        Self {
            forecasts_path: forecasts_path.into(),
            summary_path: summary_path.into(),
            state: ServiceState::Uninitialized,
            forecasts: None,
            summary: None,
        }
    }

    pub fn forecasts_path(&self) -> &Path {
        &self.forecasts_path
    }

    pub fn state(&self) -> &ServiceState {
        &self.state
    }

    /// Loads both artifacts. On failure the service moves to `Failed` and
    /// keeps nothing from the attempt.
    pub fn load(&mut self) -> Result<()> {
        info!("Loading forecasts from {}", self.forecasts_path.display());
        let loaded = load_forecast_snapshot(&self.forecasts_path).and_then(|forecasts| {
            info!("Loading summary from {}", self.summary_path.display());
            read_summary(&self.summary_path).map(|summary| (forecasts, summary))
        });
        match loaded {
            Ok((forecasts, summary)) => {
                info!(
                    "Forecast service loaded {} series x {} horizons",
                    forecasts.len(),
                    forecasts.horizon()
                );
                self.forecasts = Some(forecasts);
                self.summary = Some(summary);
                self.state = ServiceState::Loaded;
                Ok(())
            }
            Err(err) => {
                error!("Failed to load forecast artifacts: {}", err);
                self.forecasts = None;
                self.summary = None;
                self.state = ServiceState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    fn loaded(&self) -> Result<(&ForecastMatrix, &EvaluationSummary)> {
        match (&self.state, &self.forecasts, &self.summary) {
            (ServiceState::Loaded, Some(forecasts), Some(summary)) => Ok((forecasts, summary)),
            _ => Err(ForecastError::ModelNotLoaded),
        }
    }

    /// Forecast rows for `ids` in request order; unknown ids get zeros.
    pub fn predict(&self, ids: &[String]) -> Result<Vec<(String, Vec<f64>)>> {
        let (forecasts, _) = self.loaded()?;
        Ok(ids
            .iter()
            .map(|id| match forecasts.get(id) {
                Some(row) => (id.clone(), row.to_vec()),
                None => {
                    warn!("Item ID {} not found in forecasts; returning zeros", id);
                    (id.clone(), vec![0.0; forecasts.horizon()])
                }
            })
            .collect())
    }

    pub fn model_info(&self) -> Result<ModelInfo> {
        let (forecasts, summary) = self.loaded()?;
        Ok(ModelInfo {
            model_type: "Hierarchical LightGBM".to_string(),
            wrmsse: summary.wrmsse,
            history_days: summary.history_days,
            test_horizon: summary.test_horizon,
            lags: summary.lags.clone(),
            rolling_windows: summary.rolling_windows.clone(),
            num_boost_round: summary.num_boost_round,
            num_models: summary.num_models,
            num_features: summary.num_features,
            num_items: forecasts.len(),
            forecast_horizon: forecasts.horizon(),
            created_at: summary.created_at.to_rfc3339(),
        })
    }

    pub fn items(&self, limit: usize, offset: usize) -> Result<ItemPage> {
        let (forecasts, _) = self.loaded()?;
        let ids = forecasts.ids();
        let items = ids.iter().skip(offset).take(limit).cloned().collect();
        Ok(ItemPage {
            total: ids.len(),
            limit,
            offset,
            items,
        })
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: self.state.label().to_string(),
            model_loaded: matches!(self.state, ServiceState::Loaded),
            detail: match &self.state {
                ServiceState::Failed(reason) => Some(reason.clone()),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{save_forecast_snapshot, write_summary};
    use chrono::Utc;
    use tempfile::tempdir;

    fn write_artifacts(dir: &Path) -> (PathBuf, PathBuf) {
        let forecasts = ForecastMatrix::from_rows(
            2,
            vec![
                ("A".to_string(), vec![1.0, 2.0]),
                ("B".to_string(), vec![3.0, 4.0]),
                ("C".to_string(), vec![5.0, 6.0]),
            ],
        )
        .unwrap();
        let summary = EvaluationSummary {
            wrmsse: 0.75,
            history_days: 600,
            test_horizon: 28,
            lags: vec![7, 28],
            rolling_windows: vec![7],
            num_boost_round: 200,
            num_models: 2,
            training_time_seconds: 12.5,
            num_features: 14,
            created_at: Utc::now(),
        };
        let forecasts_path = dir.join("forecasts.bin");
        let summary_path = dir.join("summary.json");
        save_forecast_snapshot(&forecasts_path, &forecasts).unwrap();
        write_summary(&summary_path, &summary).unwrap();
        (forecasts_path, summary_path)
    }

    #[test]
    fn requires_load_before_queries() {
        let service = ForecastService::new("missing.bin", "missing.json");
        assert_eq!(service.state(), &ServiceState::Uninitialized);
        assert!(matches!(
            service.predict(&["A".to_string()]),
            Err(ForecastError::ModelNotLoaded)
        ));
        assert!(matches!(service.items(10, 0), Err(ForecastError::ModelNotLoaded)));
        assert!(!service.health().model_loaded);
    }

    #[test]
    fn failed_load_reports_reason() {
        let dir = tempdir().unwrap();
        let mut service =
            ForecastService::new(dir.path().join("none.bin"), dir.path().join("none.json"));
        assert!(service.load().is_err());
        assert!(matches!(service.state(), ServiceState::Failed(_)));
        let health = service.health();
        assert_eq!(health.status, "failed");
        assert!(health.detail.is_some());
        assert!(matches!(service.model_info(), Err(ForecastError::ModelNotLoaded)));
    }

    #[test]
    fn serves_predictions_items_and_info_once_loaded() {
        let dir = tempdir().unwrap();
        let (forecasts_path, summary_path) = write_artifacts(dir.path());
        let mut service = ForecastService::new(forecasts_path, summary_path);
        service.load().unwrap();
        assert_eq!(service.health().status, "healthy");

        let predictions = service
            .predict(&["B".to_string(), "unknown".to_string()])
            .unwrap();
        assert_eq!(predictions[0], ("B".to_string(), vec![3.0, 4.0]));
        assert_eq!(predictions[1], ("unknown".to_string(), vec![0.0, 0.0]));

        let page = service.items(1, 1).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items, vec!["B".to_string()]);
        assert!(service.items(10, 5).unwrap().items.is_empty());

        let info = service.model_info().unwrap();
        assert_eq!(info.wrmsse, 0.75);
        assert_eq!(info.num_items, 3);
        assert_eq!(info.forecast_horizon, 2);
        assert_eq!(info.lags, vec![7, 28]);
    }
}
