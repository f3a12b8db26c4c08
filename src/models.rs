use crate::error::{ForecastError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Categorical identity of one store/item series, as listed in the raw sales table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub id: String,
    pub item_id: String,
    pub dept_id: String,
    pub cat_id: String,
    pub store_id: String,
    pub state_id: String,
}

impl SeriesInfo {
    pub fn key(&self, key: GroupKey) -> &str {
        match key {
            GroupKey::Id => &self.id,
            GroupKey::ItemId => &self.item_id,
            GroupKey::DeptId => &self.dept_id,
            GroupKey::CatId => &self.cat_id,
            GroupKey::StoreId => &self.store_id,
            GroupKey::StateId => &self.state_id,
        }
    }
}

/// One panel row. Categorical attributes live in the series table and are
/// reached through `series`, the index into `Panel::series()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesRecord {
    pub series: u32,
    pub date: NaiveDate,
    pub sales: f64,
    pub sell_price: Option<f64>,
    pub wday: u8,
    pub month: u8,
    pub year: i32,
    pub snap: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Id,
    ItemId,
    DeptId,
    CatId,
    StoreId,
    StateId,
}

impl GroupKey {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupKey::Id => "id",
            GroupKey::ItemId => "item_id",
            GroupKey::DeptId => "dept_id",
            GroupKey::CatId => "cat_id",
            GroupKey::StoreId => "store_id",
            GroupKey::StateId => "state_id",
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named aggregation of the product/store hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HierarchyLevel {
    pub groupby: Vec<GroupKey>,
    pub prefix: String,
}

impl HierarchyLevel {
    pub fn new(groupby: Vec<GroupKey>, prefix: impl Into<String>) -> Self {
        Self {
            groupby,
            prefix: prefix.into(),
        }
    }

    /// Levels keyed by the series id hold exactly one series per group.
    pub fn is_series_level(&self) -> bool {
        self.groupby.contains(&GroupKey::Id)
    }
}

/// Wide series x horizon forecast table in canonical series order.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastMatrix {
    ids: Vec<String>,
    horizon: usize,
    values: Vec<f64>,
    index: HashMap<String, usize>,
}

impl ForecastMatrix {
    pub fn zeros(ids: &[String], horizon: usize) -> Result<Self> {
        let rows = ids
            .iter()
            .map(|id| (id.clone(), vec![0.0; horizon]))
            .collect();
        Self::from_rows(horizon, rows)
    }

    pub fn from_rows(horizon: usize, rows: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let mut ids = Vec::with_capacity(rows.len());
        let mut values = Vec::with_capacity(rows.len() * horizon);
        let mut index = HashMap::with_capacity(rows.len());
        for (id, row) in rows {
            if row.len() != horizon {
                return Err(ForecastError::schema(
                    "forecast matrix",
                    format!(
                        "series {} has {} values, expected {}",
                        id,
                        row.len(),
                        horizon
                    ),
                ));
            }
            if index.insert(id.clone(), ids.len()).is_some() {
                return Err(ForecastError::schema(
                    "forecast matrix",
                    format!("duplicate series id {}", id),
                ));
            }
            ids.push(id);
            values.extend(row);
        }
        Ok(Self {
            ids,
            horizon,
            values,
            index,
        })
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn row(&self, row_idx: usize) -> &[f64] {
        let start = row_idx * self.horizon;
        &self.values[start..start + self.horizon]
    }

    pub fn get(&self, id: &str) -> Option<&[f64]> {
        self.index.get(id).map(|&row_idx| self.row(row_idx))
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn column_names(&self) -> Vec<String> {
        (1..=self.horizon).map(|h| format!("F{}", h)).collect()
    }

    /// Returns the matrix laid out in `canonical` order, together with the ids
    /// that had no row and were filled with zeros.
    pub fn reindex(&self, canonical: &[String]) -> (ForecastMatrix, Vec<String>) {
        let mut missing = Vec::new();
        let mut values = Vec::with_capacity(canonical.len() * self.horizon);
        let mut index = HashMap::with_capacity(canonical.len());
        for (row_idx, id) in canonical.iter().enumerate() {
            match self.get(id) {
                Some(row) => values.extend_from_slice(row),
                None => {
                    missing.push(id.clone());
                    values.extend(std::iter::repeat(0.0).take(self.horizon));
                }
            }
            index.insert(id.clone(), row_idx);
        }
        let matrix = ForecastMatrix {
            ids: canonical.to_vec(),
            horizon: self.horizon,
            values,
            index,
        };
        (matrix, missing)
    }
}

/// Scalar outcome of one training run plus the configuration that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub wrmsse: f64,
    pub history_days: u32,
    pub test_horizon: u32,
    pub lags: Vec<usize>,
    pub rolling_windows: Vec<usize>,
    pub num_boost_round: u32,
    pub num_models: usize,
    pub training_time_seconds: f64,
    pub num_features: usize,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn reindex_zero_fills_absent_series_and_reports_them() {
        let matrix = ForecastMatrix::from_rows(
            2,
            vec![
                ("B".to_string(), vec![1.0, 2.0]),
                ("A".to_string(), vec![3.0, 4.0]),
            ],
        )
        .unwrap();

        let (aligned, missing) = matrix.reindex(&ids(&["A", "C", "B"]));

        assert_eq!(aligned.ids(), ids(&["A", "C", "B"]).as_slice());
        assert_eq!(aligned.get("A"), Some(&[3.0, 4.0][..]));
        assert_eq!(aligned.get("C"), Some(&[0.0, 0.0][..]));
        assert_eq!(aligned.row(2), &[1.0, 2.0]);
        assert_eq!(missing, ids(&["C"]));
    }

    #[test]
    fn rejects_duplicate_ids_and_ragged_rows() {
        let duplicate = ForecastMatrix::from_rows(
            1,
            vec![("A".to_string(), vec![1.0]), ("A".to_string(), vec![2.0])],
        );
        assert!(matches!(duplicate, Err(ForecastError::Schema { .. })));

        let ragged = ForecastMatrix::from_rows(2, vec![("A".to_string(), vec![1.0])]);
        assert!(matches!(ragged, Err(ForecastError::Schema { .. })));
    }

    #[test]
    fn column_names_follow_horizon_order() {
        let matrix = ForecastMatrix::zeros(&ids(&["A"]), 3).unwrap();
        assert_eq!(matrix.column_names(), vec!["F1", "F2", "F3"]);
    }
}
