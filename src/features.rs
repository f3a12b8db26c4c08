use crate::error::{ForecastError, Result};
use crate::models::{GroupKey, HierarchyLevel};
use crate::panel::Panel;
use log::{debug, info};
use rayon::prelude::*;
use std::collections::HashMap;
use std::time::Instant;

pub const BASE_FEATURES: [&str; 10] = [
    "wday",
    "month",
    "year",
    "is_weekend",
    "snap",
    "sell_price",
    "state_id_enc",
    "store_id_enc",
    "dept_id_enc",
    "item_id_enc",
];

const ENCODED_KEYS: [GroupKey; 4] = [
    GroupKey::StateId,
    GroupKey::StoreId,
    GroupKey::DeptId,
    GroupKey::ItemId,
];

/// Columns whose values depend on past sales and therefore move with the
/// forecast horizon.
pub fn is_shiftable(name: &str) -> bool {
    name.contains("_lag_") || name.contains("_roll_")
}

pub fn lag_feature_name(prefix: &str, lag: usize) -> String {
    format!("{}_lag_{}", prefix, lag)
}

pub fn rolling_feature_name(prefix: &str, window: usize) -> String {
    format!("{}_roll_{}", prefix, window)
}

/// `out[i] = values[i - lag]`, NaN for the first `lag` positions.
pub fn lag_values(values: &[f64], lag: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| if i >= lag { values[i - lag] } else { f64::NAN })
        .collect()
}

/// Mean of the `window` values strictly before each position. NaN when fewer
/// than `window` prior values exist or any of them is NaN.
pub fn shifted_rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 {
        return out;
    }
    let mut sum = 0.0;
    let mut nan_count = 0usize;
    for i in 0..values.len() {
        if i >= window {
            out[i] = if nan_count == 0 {
                sum / window as f64
            } else {
                f64::NAN
            };
        }
        // slide: value i enters, value i - window leaves
        let entering = values[i];
        if entering.is_nan() {
            nan_count += 1;
        } else {
            sum += entering;
        }
        if i >= window {
            let leaving = values[i - window];
            if leaving.is_nan() {
                nan_count -= 1;
            } else {
                sum -= leaving;
            }
        }
    }
    out
}

/// Panel plus one dense column per feature, NaN meaning missing.
#[derive(Debug, Clone)]
pub struct FeatureFrame {
    panel: Panel,
    names: Vec<String>,
    shiftable: Vec<bool>,
    columns: Vec<Vec<f64>>,
}

impl FeatureFrame {
    pub fn panel(&self) -> &Panel {
        &self.panel
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn num_features(&self) -> usize {
        self.names.len()
    }

    pub fn len(&self) -> usize {
        self.panel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panel.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.columns[idx].as_slice())
    }

    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.columns[col][row]
    }

    pub fn is_shiftable_column(&self, col: usize) -> bool {
        self.shiftable[col]
    }

    /// Writes the feature vector of `row` as seen by the model for horizon
    /// `h`: lag/rolling columns take the value of the same series `h` rows
    /// earlier (NaN when that row does not exist), other columns are kept.
    /// Returns false when any written value is missing.
    pub fn horizon_row(&self, row: usize, h: usize, out: &mut [f64]) -> bool {
        let series_start = self
            .panel
            .series_rows(self.panel.records()[row].series as usize)
            .start;
        let source = row.checked_sub(h).filter(|&src| src >= series_start);
        let mut complete = true;
        for (col, slot) in out.iter_mut().enumerate().take(self.columns.len()) {
            let value = if self.shiftable[col] {
                source.map_or(f64::NAN, |src| self.columns[col][src])
            } else {
                self.columns[col][row]
            };
            complete &= !value.is_nan();
            *slot = value;
        }
        complete
    }
}

pub struct FeatureEngineer {
    lags: Vec<usize>,
    rolling_windows: Vec<usize>,
}

struct LevelColumns {
    lags: Vec<Vec<f64>>,
    rolls: Vec<Vec<f64>>,
}

impl FeatureEngineer {
    pub fn new(lags: Vec<usize>, rolling_windows: Vec<usize>) -> Self {
        Self {
            lags,
            rolling_windows,
        }
    }

    pub fn lags(&self) -> &[usize] {
        &self.lags
    }

    pub fn rolling_windows(&self) -> &[usize] {
        &self.rolling_windows
    }

    /// Base names, then every level's lag names, then every level's rolling
    /// names, in level order.
    pub fn get_feature_names(&self, levels: &[HierarchyLevel]) -> Vec<String> {
        let mut names: Vec<String> = BASE_FEATURES.iter().map(|s| s.to_string()).collect();
        for level in levels {
            for &lag in &self.lags {
                names.push(lag_feature_name(&level.prefix, lag));
            }
        }
        for level in levels {
            for &window in &self.rolling_windows {
                names.push(rolling_feature_name(&level.prefix, window));
            }
        }
        names
    }

    pub fn create_all_features(
        &self,
        panel: Panel,
        levels: &[HierarchyLevel],
    ) -> Result<FeatureFrame> {
        crate::config::validate_levels(levels)?;
        let started = Instant::now();
        let names = self.get_feature_names(levels);

        let mut columns = base_columns(&panel);

        let level_columns: Vec<LevelColumns> = levels
            .par_iter()
            .map(|level| {
                let level_started = Instant::now();
                let computed = self.level_columns(&panel, level);
                debug!(
                    "Computed level {} ({}) in {:.2}s",
                    level.prefix,
                    level
                        .groupby
                        .iter()
                        .map(|key| key.as_str())
                        .collect::<Vec<_>>()
                        .join("+"),
                    level_started.elapsed().as_secs_f64()
                );
                computed
            })
            .collect();

        let mut rolls = Vec::with_capacity(levels.len() * self.rolling_windows.len());
        for level in level_columns {
            columns.extend(level.lags);
            rolls.extend(level.rolls);
        }
        columns.extend(rolls);

        if columns.len() != names.len() {
            return Err(ForecastError::schema(
                "feature frame",
                format!(
                    "built {} columns for {} feature names",
                    columns.len(),
                    names.len()
                ),
            ));
        }

        let shiftable = names.iter().map(|name| is_shiftable(name)).collect();
        info!(
            "Built {} features for {} rows across {} levels in {:.2}s",
            names.len(),
            panel.len(),
            levels.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(FeatureFrame {
            panel,
            names,
            shiftable,
            columns,
        })
    }

    fn level_columns(&self, panel: &Panel, level: &HierarchyLevel) -> LevelColumns {
        if level.is_series_level() {
            self.series_level_columns(panel)
        } else {
            self.aggregate_level_columns(panel, level)
        }
    }

    /// Each group is one series; lags are positional over its own rows.
    fn series_level_columns(&self, panel: &Panel) -> LevelColumns {
        let rows = panel.len();
        let mut lags = vec![vec![f64::NAN; rows]; self.lags.len()];
        let mut rolls = vec![vec![f64::NAN; rows]; self.rolling_windows.len()];
        let sales: Vec<f64> = panel.records().iter().map(|r| r.sales).collect();

        for series_idx in 0..panel.series().len() {
            let range = panel.series_rows(series_idx);
            let values = &sales[range.clone()];
            for (slot, &lag) in self.lags.iter().enumerate() {
                lags[slot][range.clone()].copy_from_slice(&lag_values(values, lag));
            }
            for (slot, &window) in self.rolling_windows.iter().enumerate() {
                rolls[slot][range.clone()].copy_from_slice(&shifted_rolling_mean(values, window));
            }
        }
        LevelColumns { lags, rolls }
    }

    /// Mean sales per (group, date), lagged/rolled over the group's dates and
    /// broadcast back to every member row.
    fn aggregate_level_columns(&self, panel: &Panel, level: &HierarchyLevel) -> LevelColumns {
        let dates = panel.dates();
        let date_index: HashMap<_, _> = dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

        let mut group_index: HashMap<Vec<&str>, usize> = HashMap::new();
        let series_group: Vec<usize> = panel
            .series()
            .iter()
            .map(|info| {
                let key: Vec<&str> = level.groupby.iter().map(|k| info.key(*k)).collect();
                let next = group_index.len();
                *group_index.entry(key).or_insert(next)
            })
            .collect();
        let num_groups = group_index.len();
        let num_dates = dates.len();

        let mut sums = vec![0.0f64; num_groups * num_dates];
        let mut counts = vec![0u32; num_groups * num_dates];
        let row_cells: Vec<usize> = panel
            .records()
            .iter()
            .map(|record| {
                let group = series_group[record.series as usize];
                let cell = group * num_dates + date_index[&record.date];
                sums[cell] += record.sales;
                counts[cell] += 1;
                cell
            })
            .collect();

        let mut lag_cells = vec![vec![f64::NAN; num_groups * num_dates]; self.lags.len()];
        let mut roll_cells =
            vec![vec![f64::NAN; num_groups * num_dates]; self.rolling_windows.len()];
        for group in 0..num_groups {
            let cells: Vec<usize> = (group * num_dates..(group + 1) * num_dates)
                .filter(|&cell| counts[cell] > 0)
                .collect();
            let means: Vec<f64> = cells
                .iter()
                .map(|&cell| sums[cell] / f64::from(counts[cell]))
                .collect();
            for (slot, &lag) in self.lags.iter().enumerate() {
                for (cell, value) in cells.iter().zip(lag_values(&means, lag)) {
                    lag_cells[slot][*cell] = value;
                }
            }
            for (slot, &window) in self.rolling_windows.iter().enumerate() {
                for (cell, value) in cells.iter().zip(shifted_rolling_mean(&means, window)) {
                    roll_cells[slot][*cell] = value;
                }
            }
        }

        let broadcast = |cells: &[f64]| -> Vec<f64> {
            row_cells.iter().map(|&cell| cells[cell]).collect()
        };
        LevelColumns {
            lags: lag_cells.iter().map(|cells| broadcast(cells)).collect(),
            rolls: roll_cells.iter().map(|cells| broadcast(cells)).collect(),
        }
    }
}

fn base_columns(panel: &Panel) -> Vec<Vec<f64>> {
    let records = panel.records();
    let encodings: Vec<Vec<f64>> = ENCODED_KEYS
        .iter()
        .map(|&key| first_appearance_codes(panel, key))
        .collect();

    let mut columns = vec![Vec::with_capacity(records.len()); BASE_FEATURES.len()];
    for record in records {
        let series = record.series as usize;
        columns[0].push(f64::from(record.wday));
        columns[1].push(f64::from(record.month));
        columns[2].push(f64::from(record.year));
        columns[3].push(if record.wday == 1 || record.wday == 7 {
            1.0
        } else {
            0.0
        });
        columns[4].push(f64::from(record.snap));
        columns[5].push(record.sell_price.unwrap_or(f64::NAN));
        for (offset, codes) in encodings.iter().enumerate() {
            columns[6 + offset].push(codes[series]);
        }
    }
    columns
}

/// Integer code per series for one categorical key, numbered in order of
/// first appearance over the panel rows.
fn first_appearance_codes(panel: &Panel, key: GroupKey) -> Vec<f64> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut codes = vec![f64::NAN; panel.series().len()];
    for record in panel.records() {
        let series = record.series as usize;
        if !codes[series].is_nan() {
            continue;
        }
        let value = panel.series()[series].key(key);
        let next = seen.len();
        codes[series] = *seen.entry(value).or_insert(next) as f64;
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SeriesInfo, SeriesRecord};
    use chrono::{Duration, NaiveDate};

    fn info(id: &str, item: &str, store: &str, state: &str) -> SeriesInfo {
        SeriesInfo {
            id: id.to_string(),
            item_id: item.to_string(),
            dept_id: "FOODS_1".to_string(),
            cat_id: "FOODS".to_string(),
            store_id: store.to_string(),
            state_id: state.to_string(),
        }
    }

    /// Series `s` sells `10 * s + day` units on each of `days` days.
    fn panel(days: usize) -> Panel {
        let series = vec![
            info("A", "I1", "CA_1", "CA"),
            info("B", "I2", "CA_1", "CA"),
            info("C", "I1", "TX_1", "TX"),
        ];
        let start = NaiveDate::from_ymd_opt(2016, 3, 1).unwrap();
        let mut records = Vec::new();
        for s in 0..series.len() {
            for day in 0..days {
                records.push(SeriesRecord {
                    series: s as u32,
                    date: start + Duration::days(day as i64),
                    sales: (10 * s + day) as f64,
                    sell_price: if day == 0 { None } else { Some(2.0) },
                    wday: (day % 7 + 1) as u8,
                    month: 3,
                    year: 2016,
                    snap: 0,
                });
            }
        }
        Panel::from_records(series, records).unwrap()
    }

    fn levels() -> Vec<HierarchyLevel> {
        vec![
            HierarchyLevel::new(vec![GroupKey::Id], "id"),
            HierarchyLevel::new(vec![GroupKey::StoreId], "store"),
        ]
    }

    #[test]
    fn feature_names_follow_base_lag_roll_order() {
        let engineer = FeatureEngineer::new(vec![1, 7], vec![3]);
        let names = engineer.get_feature_names(&levels());
        assert_eq!(&names[..10], BASE_FEATURES.map(String::from).as_slice());
        assert_eq!(
            &names[10..],
            &[
                "id_lag_1",
                "id_lag_7",
                "store_lag_1",
                "store_lag_7",
                "id_roll_3",
                "store_roll_3"
            ]
        );

        let frame = engineer.create_all_features(panel(10), &levels()).unwrap();
        assert_eq!(frame.names(), names.as_slice());
        assert_eq!(frame.num_features(), names.len());
    }

    #[test]
    fn series_lag_is_the_same_series_k_rows_earlier() {
        let engineer = FeatureEngineer::new(vec![1, 3], vec![2]);
        let frame = engineer.create_all_features(panel(8), &levels()).unwrap();
        let lag3 = frame.column("id_lag_3").unwrap();
        let records = frame.panel().records();

        for series_idx in 0..3 {
            let rows = frame.panel().series_rows(series_idx);
            for (pos, row) in rows.clone().enumerate() {
                if pos < 3 {
                    assert!(lag3[row].is_nan());
                } else {
                    assert_eq!(lag3[row], records[row - 3].sales);
                }
            }
        }
    }

    #[test]
    fn rolling_mean_uses_only_prior_values() {
        let values = [1.0, 2.0, 3.0, 4.0, 100.0];
        let rolled = shifted_rolling_mean(&values, 2);
        assert!(rolled[0].is_nan());
        assert!(rolled[1].is_nan());
        assert_eq!(rolled[2], 1.5);
        assert_eq!(rolled[3], 2.5);
        assert_eq!(rolled[4], 3.5);

        let with_gap = shifted_rolling_mean(&[1.0, f64::NAN, 3.0, 4.0, 5.0], 2);
        assert!(with_gap[2].is_nan());
        assert!(with_gap[3].is_nan());
        assert_eq!(with_gap[4], 3.5);
    }

    #[test]
    fn aggregate_level_averages_members_and_broadcasts() {
        let engineer = FeatureEngineer::new(vec![1], vec![2]);
        let frame = engineer.create_all_features(panel(5), &levels()).unwrap();
        let store_lag = frame.column("store_lag_1").unwrap();
        let store_roll = frame.column("store_roll_2").unwrap();

        // CA_1 holds A (day) and B (10 + day): mean on day d is 5 + d
        let a_rows = frame.panel().series_rows(0);
        let b_rows = frame.panel().series_rows(1);
        assert!(store_lag[a_rows.start].is_nan());
        assert_eq!(store_lag[a_rows.start + 2], 6.0);
        assert_eq!(store_lag[b_rows.start + 2], 6.0);
        assert_eq!(store_roll[a_rows.start + 3], 6.5);

        // TX_1 holds only C
        let c_rows = frame.panel().series_rows(2);
        assert_eq!(store_lag[c_rows.start + 1], 20.0);
    }

    #[test]
    fn categorical_codes_follow_first_appearance() {
        let engineer = FeatureEngineer::new(vec![1], vec![2]);
        let frame = engineer.create_all_features(panel(3), &levels()).unwrap();
        let item_enc = frame.column("item_id_enc").unwrap();
        let store_enc = frame.column("store_id_enc").unwrap();
        let rows = |s| frame.panel().series_rows(s).start;

        assert_eq!(item_enc[rows(0)], 0.0);
        assert_eq!(item_enc[rows(1)], 1.0);
        assert_eq!(item_enc[rows(2)], 0.0);
        assert_eq!(store_enc[rows(2)], 1.0);
        assert!(frame.column("sell_price").unwrap()[rows(0)].is_nan());
    }

    #[test]
    fn horizon_row_shifts_only_lag_and_rolling_columns() {
        let engineer = FeatureEngineer::new(vec![1], vec![2]);
        let frame = engineer.create_all_features(panel(8), &levels()).unwrap();
        let lag_col = frame.names().iter().position(|n| n == "id_lag_1").unwrap();
        let wday_col = 0;
        let mut out = vec![0.0; frame.num_features()];

        let rows = frame.panel().series_rows(1);
        let row = rows.start + 5;
        let complete = frame.horizon_row(row, 2, &mut out);
        assert!(complete);
        assert_eq!(out[lag_col], frame.value(row - 2, lag_col));
        assert_eq!(out[wday_col], frame.value(row, wday_col));

        // the source row would belong to the previous series
        let complete = frame.horizon_row(rows.start + 1, 2, &mut out);
        assert!(!complete);
        assert!(out[lag_col].is_nan());
    }

    #[test]
    fn rejects_prefix_with_feature_marker() {
        let engineer = FeatureEngineer::new(vec![1], vec![2]);
        let bad = vec![HierarchyLevel::new(vec![GroupKey::Id], "x_roll_y")];
        assert!(engineer.create_all_features(panel(3), &bad).is_err());
    }
}
