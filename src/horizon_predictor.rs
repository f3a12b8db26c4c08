use crate::error::{ForecastError, Result};
use crate::features::FeatureFrame;
use crate::horizon_trainer::HorizonModels;
use crate::models::ForecastMatrix;
use chrono::NaiveDate;
use log::{info, warn};
use rayon::prelude::*;
use std::collections::HashMap;

/// Applies model `h` to the `h`-th test date of every series.
pub struct HorizonPredictor<'a> {
    models: &'a HorizonModels,
}

impl<'a> HorizonPredictor<'a> {
    pub fn new(models: &'a HorizonModels) -> Self {
        Self { models }
    }

    /// Forecasts every series in `canonical_ids` for horizons `1..=H`.
    ///
    /// Each test row sees the same horizon-shifted feature vector the model
    /// was trained on. Missing features are read as 0 and predictions are
    /// clamped at 0. Series without a row on a test date keep 0.
    pub fn predict(
        &self,
        frame: &FeatureFrame,
        cutoff: NaiveDate,
        canonical_ids: &[String],
    ) -> Result<ForecastMatrix> {
        let horizons = self.models.horizons();
        let test_dates: Vec<NaiveDate> = frame
            .panel()
            .dates()
            .iter()
            .copied()
            .filter(|date| *date > cutoff)
            .collect();
        if test_dates.len() < horizons {
            return Err(ForecastError::InsufficientHorizons {
                found: test_dates.len(),
                required: horizons,
            });
        }

        let per_horizon: Vec<Vec<(usize, f64)>> = (1..=horizons)
            .into_par_iter()
            .map(|horizon| self.predict_horizon(frame, horizon, test_dates[horizon - 1]))
            .collect::<Result<_>>()?;

        let panel = frame.panel();
        let canonical_pos: HashMap<&str, usize> = canonical_ids
            .iter()
            .enumerate()
            .map(|(pos, id)| (id.as_str(), pos))
            .collect();
        let mut grid = vec![vec![0.0; horizons]; canonical_ids.len()];
        let mut predicted = vec![false; canonical_ids.len()];
        let mut outside_canonical = 0usize;
        for (h_idx, predictions) in per_horizon.iter().enumerate() {
            for &(series_idx, value) in predictions {
                match canonical_pos.get(panel.series()[series_idx].id.as_str()) {
                    Some(&pos) => {
                        grid[pos][h_idx] = value;
                        predicted[pos] = true;
                    }
                    None => outside_canonical += 1,
                }
            }
        }

        let missing = predicted.iter().filter(|p| !**p).count();
        if missing > 0 {
            warn!(
                "{} of {} series had no test rows; their forecasts are zero-filled",
                missing,
                canonical_ids.len()
            );
        }
        if outside_canonical > 0 {
            warn!(
                "Dropped {} predictions for series outside the canonical id list",
                outside_canonical
            );
        }
        info!(
            "Predicted {} horizons for {} series ({} to {})",
            horizons,
            canonical_ids.len(),
            test_dates[0],
            test_dates[horizons.saturating_sub(1)]
        );

        ForecastMatrix::from_rows(
            horizons,
            canonical_ids.iter().cloned().zip(grid).collect(),
        )
    }

    fn predict_horizon(
        &self,
        frame: &FeatureFrame,
        horizon: usize,
        date: NaiveDate,
    ) -> Result<Vec<(usize, f64)>> {
        let model = self.models.get(horizon).ok_or_else(|| {
            ForecastError::Artifact(format!("no trained model for horizon {}", horizon))
        })?;
        let panel = frame.panel();
        let records = panel.records();
        let mut buffer = vec![0.0; frame.num_features()];
        let mut predictions = Vec::with_capacity(panel.series().len());

        for series_idx in 0..panel.series().len() {
            let rows = panel.series_rows(series_idx);
            let Ok(offset) = records[rows.clone()].binary_search_by_key(&date, |r| r.date) else {
                continue;
            };
            frame.horizon_row(rows.start + offset, horizon, &mut buffer);
            for value in buffer.iter_mut() {
                if value.is_nan() {
                    *value = 0.0;
                }
            }
            let forecast = model.predict(&buffer).max(0.0);
            predictions.push((series_idx, forecast));
        }
        Ok(predictions)
    }
}
