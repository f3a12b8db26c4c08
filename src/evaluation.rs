use crate::error::{ForecastError, Result};
use crate::models::{ForecastMatrix, GroupKey};
use crate::raw_data::RawData;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::HashMap;

/// Dollar-sales weights are taken over this many trailing history days.
pub const WEIGHT_WINDOW_DAYS: usize = 28;

/// Scores a canonical-ordered forecast matrix; lower is better.
pub trait ForecastScorer: Send + Sync {
    fn score(&self, forecast: &ForecastMatrix) -> Result<f64>;
}

/// The twelve M5 aggregation levels, from the grand total down to single
/// series.
pub fn default_levels() -> Vec<Vec<GroupKey>> {
    use GroupKey::*;
    vec![
        vec![],
        vec![StateId],
        vec![StoreId],
        vec![CatId],
        vec![DeptId],
        vec![StateId, CatId],
        vec![StateId, DeptId],
        vec![StoreId, CatId],
        vec![StoreId, DeptId],
        vec![ItemId],
        vec![ItemId, StateId],
        vec![ItemId, StoreId],
    ]
}

pub fn level_name(keys: &[GroupKey]) -> String {
    if keys.is_empty() {
        return "total".to_string();
    }
    keys.iter()
        .map(|key| key.as_str())
        .collect::<Vec<_>>()
        .join("+")
}

#[derive(Debug, Clone)]
struct GroupReference {
    members: Vec<usize>,
    weight: f64,
    scale: f64,
    truth: Vec<f64>,
}

#[derive(Debug, Clone)]
struct LevelReference {
    name: String,
    groups: Vec<GroupReference>,
}

/// Weighted root mean squared scaled error over a set of aggregation levels,
/// with truth, scales and weights taken from the raw sales table.
#[derive(Debug, Clone)]
pub struct WrmsseScorer {
    horizon: usize,
    num_series: usize,
    levels: Vec<LevelReference>,
}

impl WrmsseScorer {
    /// The last `horizon` sales day columns are the truth; everything before
    /// them is history.
    pub fn from_raw(raw: &RawData, horizon: usize, levels: &[Vec<GroupKey>]) -> Result<Self> {
        Self::from_raw_window(raw, horizon, horizon, levels)
    }

    /// The last `test_window` sales day columns are held out; the first
    /// `horizon` of them are the truth and everything before them is history.
    pub fn from_raw_window(
        raw: &RawData,
        test_window: usize,
        horizon: usize,
        levels: &[Vec<GroupKey>],
    ) -> Result<Self> {
        let sales = &raw.sales;
        let num_days = sales.num_days();
        if horizon == 0 || horizon > test_window {
            return Err(ForecastError::Evaluation(format!(
                "horizon {} must be within 1..={} test days",
                horizon, test_window
            )));
        }
        if num_days < test_window + 2 {
            return Err(ForecastError::Evaluation(format!(
                "sales table has {} days; need at least {} for a {}-day test window",
                num_days,
                test_window + 2,
                test_window
            )));
        }
        let history_len = num_days - test_window;
        let weight_start = history_len.saturating_sub(WEIGHT_WINDOW_DAYS);

        let dollar_sales: Vec<f64> = sales
            .series()
            .par_iter()
            .enumerate()
            .map(|(series_idx, info)| {
                let row = sales.row(series_idx);
                let prices = raw.prices.series_prices(&info.store_id, &info.item_id);
                (weight_start..history_len)
                    .map(|pos| {
                        let price = prices
                            .and_then(|p| p.get(&raw.sales_day(pos).wm_yr_wk).copied())
                            .unwrap_or(0.0);
                        f64::from(row[pos]) * price
                    })
                    .sum::<f64>()
            })
            .collect();

        let references = levels
            .par_iter()
            .map(|keys| build_level(raw, keys, history_len, horizon, &dollar_sales))
            .collect::<Vec<_>>();

        for level in &references {
            debug!(
                "WRMSSE level {}: {} scored groups",
                level.name,
                level.groups.len()
            );
        }
        Ok(Self {
            horizon,
            num_series: sales.series().len(),
            levels: references,
        })
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Per-level scores; levels without any scorable group are omitted.
    pub fn level_scores(&self, forecast: &ForecastMatrix) -> Result<Vec<(String, f64)>> {
        if forecast.horizon() != self.horizon {
            return Err(ForecastError::Evaluation(format!(
                "forecast has {} horizons, reference expects {}",
                forecast.horizon(),
                self.horizon
            )));
        }
        if forecast.len() != self.num_series {
            return Err(ForecastError::Evaluation(format!(
                "forecast has {} series, reference expects {}",
                forecast.len(),
                self.num_series
            )));
        }

        let scores = self
            .levels
            .iter()
            .filter_map(|level| {
                let total_weight: f64 = level.groups.iter().map(|g| g.weight).sum();
                if level.groups.is_empty() || total_weight <= 0.0 {
                    warn!("WRMSSE level {} has no weighted groups; skipped", level.name);
                    return None;
                }
                let weighted: f64 = level
                    .groups
                    .iter()
                    .map(|group| group.weight / total_weight * self.rmsse(group, forecast))
                    .sum();
                Some((level.name.clone(), weighted))
            })
            .collect::<Vec<_>>();
        Ok(scores)
    }

    fn rmsse(&self, group: &GroupReference, forecast: &ForecastMatrix) -> f64 {
        let mut predicted = vec![0.0; self.horizon];
        for &member in &group.members {
            for (slot, value) in predicted.iter_mut().zip(forecast.row(member)) {
                *slot += value;
            }
        }
        let mse = group
            .truth
            .iter()
            .zip(&predicted)
            .map(|(truth, pred)| (truth - pred).powi(2))
            .sum::<f64>()
            / self.horizon as f64;
        (mse / group.scale).sqrt()
    }
}

impl ForecastScorer for WrmsseScorer {
    fn score(&self, forecast: &ForecastMatrix) -> Result<f64> {
        let scores = self.level_scores(forecast)?;
        if scores.is_empty() {
            return Err(ForecastError::Evaluation(
                "no aggregation level could be scored".to_string(),
            ));
        }
        for (name, score) in &scores {
            debug!("Level {} RMSSE: {:.4}", name, score);
        }
        Ok(scores.iter().map(|(_, score)| score).sum::<f64>() / scores.len() as f64)
    }
}

fn build_level(
    raw: &RawData,
    keys: &[GroupKey],
    history_len: usize,
    horizon: usize,
    dollar_sales: &[f64],
) -> LevelReference {
    let sales = &raw.sales;
    let mut group_index: HashMap<Vec<&str>, usize> = HashMap::new();
    let mut members: Vec<Vec<usize>> = Vec::new();
    for (series_idx, info) in sales.series().iter().enumerate() {
        let key: Vec<&str> = keys.iter().map(|k| info.key(*k)).collect();
        let next = group_index.len();
        let group = *group_index.entry(key).or_insert(next);
        if group == members.len() {
            members.push(Vec::new());
        }
        members[group].push(series_idx);
    }

    let name = level_name(keys);
    let groups: Vec<GroupReference> = members
        .into_par_iter()
        .filter_map(|members| {
            let mut aggregate = vec![0.0f64; sales.num_days()];
            for &member in &members {
                for (slot, value) in aggregate.iter_mut().zip(sales.row(member)) {
                    *slot += f64::from(*value);
                }
            }
            let scale = naive_scale(&aggregate[..history_len])?;
            let weight = members.iter().map(|&m| dollar_sales[m]).sum();
            Some(GroupReference {
                members,
                weight,
                scale,
                truth: aggregate[history_len..history_len + horizon].to_vec(),
            })
        })
        .collect();

    LevelReference { name, groups }
}

/// Mean squared one-step difference from the first non-zero value onward.
/// `None` when that is undefined or zero.
fn naive_scale(history: &[f64]) -> Option<f64> {
    let first = history.iter().position(|v| *v != 0.0)?;
    let active = &history[first..];
    if active.len() < 2 {
        return None;
    }
    let scale = active
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).powi(2))
        .sum::<f64>()
        / (active.len() - 1) as f64;
    (scale > 0.0 && scale.is_finite()).then_some(scale)
}

/// Aligns forecasts to the canonical series order before scoring.
pub struct Evaluator {
    canonical_ids: Vec<String>,
    scorer: Box<dyn ForecastScorer>,
}

impl Evaluator {
    pub fn new(canonical_ids: Vec<String>, scorer: Box<dyn ForecastScorer>) -> Self {
        Self {
            canonical_ids,
            scorer,
        }
    }

    pub fn evaluate(&self, forecast: &ForecastMatrix) -> Result<f64> {
        let (aligned, missing) = forecast.reindex(&self.canonical_ids);
        if !missing.is_empty() {
            warn!(
                "{} series missing from the forecast were zero-filled (first: {})",
                missing.len(),
                missing[0]
            );
        }
        let score = self.scorer.score(&aligned)?;
        info!("WRMSSE over {} series: {:.4}", aligned.len(), score);
        Ok(score)
    }
}
