use crate::error::{ForecastError, Result};
use crate::horizon_trainer::HorizonModels;
use crate::models::{EvaluationSummary, ForecastMatrix};
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const FORECAST_SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct ForecastSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    horizon: usize,
    ids: Vec<String>,
    values: Vec<f64>,
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn save_forecast_snapshot(path: &Path, forecast: &ForecastMatrix) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    let snapshot = ForecastSnapshot {
        version: FORECAST_SNAPSHOT_VERSION,
        generated_at: Utc::now(),
        horizon: forecast.horizon(),
        ids: forecast.ids().to_vec(),
        values: forecast.values().to_vec(),
    };
    bincode::serialize_into(&mut writer, &snapshot).map_err(|err| {
        ForecastError::Artifact(format!(
            "failed to serialize forecast snapshot {}: {}",
            path.display(),
            err
        ))
    })?;
    writer.flush()?;
    info!(
        "Saved forecast snapshot ({} series x {} horizons) to {}",
        forecast.len(),
        forecast.horizon(),
        path.display()
    );
    Ok(())
}

pub fn load_forecast_snapshot(path: &Path) -> Result<ForecastMatrix> {
    let file = File::open(path).map_err(|err| {
        ForecastError::Artifact(format!(
            "failed to open forecast snapshot {}: {}",
            path.display(),
            err
        ))
    })?;
    let snapshot: ForecastSnapshot = bincode::deserialize_from(BufReader::new(file))
        .map_err(|err| {
            ForecastError::Artifact(format!(
                "forecast snapshot decode failed for {}: {}",
                path.display(),
                err
            ))
        })?;

    if snapshot.version != FORECAST_SNAPSHOT_VERSION {
        return Err(ForecastError::Artifact(format!(
            "forecast snapshot version mismatch (found {}, expected {})",
            snapshot.version, FORECAST_SNAPSHOT_VERSION
        )));
    }
    if snapshot.values.len() != snapshot.ids.len() * snapshot.horizon {
        return Err(ForecastError::Artifact(format!(
            "forecast snapshot holds {} values for {} series x {} horizons",
            snapshot.values.len(),
            snapshot.ids.len(),
            snapshot.horizon
        )));
    }

    let horizon = snapshot.horizon;
    let rows = snapshot
        .ids
        .into_iter()
        .enumerate()
        .map(|(row, id)| {
            let start = row * horizon;
            (id, snapshot.values[start..start + horizon].to_vec())
        })
        .collect();
    ForecastMatrix::from_rows(horizon, rows)
}

/// Header `id,F1..FH`, one row per series in matrix order.
pub fn write_forecast_csv(path: &Path, forecast: &ForecastMatrix) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = WriterBuilder::new().has_headers(false).from_path(path)?;
    let mut header = vec!["id".to_string()];
    header.extend(forecast.column_names());
    writer.write_record(&header)?;
    for (row, id) in forecast.ids().iter().enumerate() {
        let mut record = Vec::with_capacity(forecast.horizon() + 1);
        record.push(id.clone());
        record.extend(forecast.row(row).iter().map(|value| value.to_string()));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_summary(path: &Path, summary: &EvaluationSummary) -> Result<()> {
    ensure_parent(path)?;
    let payload = serde_json::to_string_pretty(summary).map_err(|err| {
        ForecastError::Artifact(format!("failed to serialize summary: {}", err))
    })?;
    fs::write(path, payload)?;
    info!("Saved evaluation summary to {}", path.display());
    Ok(())
}

pub fn read_summary(path: &Path) -> Result<EvaluationSummary> {
    let raw = fs::read_to_string(path).map_err(|err| {
        ForecastError::Artifact(format!(
            "failed to read summary {}: {}",
            path.display(),
            err
        ))
    })?;
    serde_json::from_str(&raw).map_err(|err| {
        ForecastError::Artifact(format!(
            "failed to parse summary {}: {}",
            path.display(),
            err
        ))
    })
}

pub fn model_filename(horizon: usize) -> String {
    format!("horizon_{:02}.txt", horizon)
}

/// Writes each trained model's LightGBM text to `dir/horizon_XX.txt`.
pub fn write_models(dir: &Path, models: &HorizonModels) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(models.trained());
    for model in models.iter() {
        let path = dir.join(model_filename(model.horizon()));
        fs::write(&path, model.model_text())?;
        written.push(path);
    }
    info!("Saved {} horizon models to {}", written.len(), dir.display());
    Ok(written)
}
