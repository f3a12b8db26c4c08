//! Synthetic panels and a scripted trainer shared by unit tests.

use crate::error::{ForecastError, Result};
use crate::lightgbm_cli::{BoostedTreeTrainer, FitRequest};
use crate::models::{SeriesInfo, SeriesRecord};
use crate::panel::Panel;
use chrono::{Duration, NaiveDate};
use std::collections::HashSet;
use std::sync::Mutex;

pub fn series_info(id: &str, item: &str, store: &str, state: &str) -> SeriesInfo {
    SeriesInfo {
        id: id.to_string(),
        item_id: item.to_string(),
        dept_id: format!("{}_dept", item),
        cat_id: "FOODS".to_string(),
        store_id: store.to_string(),
        state_id: state.to_string(),
    }
}

pub fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2016, 4, 1).unwrap()
}

/// Series `s` sells `10 * s + day` units on day `day`.
pub fn synthetic_panel(series: Vec<SeriesInfo>, days: usize) -> Panel {
    let mut records = Vec::with_capacity(series.len() * days);
    for s in 0..series.len() {
        for day in 0..days {
            records.push(SeriesRecord {
                series: s as u32,
                date: start_date() + Duration::days(day as i64),
                sales: (10 * s + day) as f64,
                sell_price: Some(1.0),
                wday: (day % 7 + 1) as u8,
                month: 4,
                year: 2016,
                snap: 0,
            });
        }
    }
    Panel::from_records(series, records).expect("synthetic panel is valid")
}

/// A single-leaf regression model that always predicts `value`.
pub fn constant_model_text(value: f64, num_features: usize) -> String {
    format!(
        "tree\nversion=v4\nnum_class=1\nnum_tree_per_iteration=1\nmax_feature_idx={}\n\
         objective=regression\n\nTree=0\nnum_leaves=1\nsplit_feature=\nthreshold=\n\
         left_child=\nright_child=\nleaf_value={}\nshrinkage=1\n\nend of trees\n",
        num_features.saturating_sub(1),
        value
    )
}

/// Records every fit and answers with a constant model predicting
/// `horizon * scale`; fails for the horizons listed in `fail_on`.
#[derive(Default)]
pub struct ScriptedTrainer {
    pub scale: f64,
    pub fail_on: HashSet<usize>,
    pub fits: Mutex<Vec<RecordedFit>>,
}

#[derive(Debug, Clone)]
pub struct RecordedFit {
    pub horizon: usize,
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<f64>,
    pub num_threads: usize,
}

impl ScriptedTrainer {
    pub fn new(scale: f64) -> Self {
        Self {
            scale,
            ..Self::default()
        }
    }

    pub fn failing_on(mut self, horizon: usize) -> Self {
        self.fail_on.insert(horizon);
        self
    }

    pub fn recorded(&self) -> Vec<RecordedFit> {
        let mut fits = self.fits.lock().expect("fits lock").clone();
        fits.sort_by_key(|fit| fit.horizon);
        fits
    }
}

impl BoostedTreeTrainer for ScriptedTrainer {
    fn fit(&self, request: &FitRequest<'_>) -> Result<String> {
        let matrix = request.matrix;
        self.fits.lock().expect("fits lock").push(RecordedFit {
            horizon: request.horizon,
            rows: (0..matrix.num_rows())
                .map(|row| matrix.row(row).to_vec())
                .collect(),
            labels: matrix.labels().to_vec(),
            num_threads: request.num_threads,
        });
        if self.fail_on.contains(&request.horizon) {
            return Err(ForecastError::Trainer {
                horizon: request.horizon,
                message: "scripted failure".to_string(),
            });
        }
        Ok(constant_model_text(
            request.horizon as f64 * self.scale,
            request.feature_names.len(),
        ))
    }
}
