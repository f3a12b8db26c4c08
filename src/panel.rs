use crate::error::{ForecastError, Result};
use crate::models::{SeriesInfo, SeriesRecord};
use crate::raw_data::{RawData, SALES_FILE};
use chrono::{Duration, NaiveDate};
use log::{debug, info};
use std::ops::Range;

/// Long-format daily panel: one record per (series, date), sorted by series
/// then date, restricted to the history + test window.
#[derive(Debug, Clone)]
pub struct Panel {
    series: Vec<SeriesInfo>,
    records: Vec<SeriesRecord>,
    series_rows: Vec<Range<usize>>,
    dates: Vec<NaiveDate>,
}

/// Row partition of a panel at `cutoff`: train rows are `date <= cutoff`.
#[derive(Debug, Clone)]
pub struct PanelSplit {
    pub cutoff: NaiveDate,
    pub train_rows: Vec<usize>,
    pub test_rows: Vec<usize>,
}

pub struct PanelBuilder {
    history_days: u32,
    test_horizon: u32,
}

impl PanelBuilder {
    pub fn new(history_days: u32, test_horizon: u32) -> Self {
        Self {
            history_days,
            test_horizon,
        }
    }

    pub fn build(&self, raw: &RawData) -> Result<Panel> {
        let sales = &raw.sales;
        let window = i64::from(self.history_days) + i64::from(self.test_horizon);

        let last_date = (0..sales.num_days())
            .map(|pos| raw.sales_day(pos).date)
            .max()
            .ok_or_else(|| ForecastError::schema(SALES_FILE, "no d_ day columns found"))?;
        let first_kept = last_date - Duration::days(window);
        let kept_days: Vec<usize> = (0..sales.num_days())
            .filter(|&pos| raw.sales_day(pos).date >= first_kept)
            .collect();
        debug!(
            "Keeping {} of {} day columns from {} to {}",
            kept_days.len(),
            sales.num_days(),
            first_kept,
            last_date
        );

        let mut records = Vec::with_capacity(sales.series().len() * kept_days.len());
        for (series_idx, info) in sales.series().iter().enumerate() {
            let row = sales.row(series_idx);
            let snap_slot = raw.calendar.snap_slot(&info.state_id);
            let series_prices = raw.prices.series_prices(&info.store_id, &info.item_id);
            for &pos in &kept_days {
                let day = raw.sales_day(pos);
                records.push(SeriesRecord {
                    series: series_idx as u32,
                    date: day.date,
                    sales: f64::from(row[pos]),
                    sell_price: series_prices.and_then(|p| p.get(&day.wm_yr_wk).copied()),
                    wday: day.wday,
                    month: day.month,
                    year: day.year,
                    snap: snap_slot.map(|slot| day.snap[slot]).unwrap_or(0),
                });
            }
        }

        let panel = Panel::from_records(sales.series().to_vec(), records)?;
        let panel = panel.restrict_to_window(self.history_days, self.test_horizon)?;
        info!(
            "Built panel: {} series, {} rows, {} dates ({} to {})",
            panel.series().len(),
            panel.len(),
            panel.dates().len(),
            panel.dates().first().map(|d| d.to_string()).unwrap_or_default(),
            panel.dates().last().map(|d| d.to_string()).unwrap_or_default()
        );
        Ok(panel)
    }
}

impl Panel {
    /// Sorts `records` by (series, date) and indexes them. Every record must
    /// reference a row of `series` and (series, date) must be unique.
    pub fn from_records(series: Vec<SeriesInfo>, mut records: Vec<SeriesRecord>) -> Result<Self> {
        records.sort_by(|a, b| a.series.cmp(&b.series).then(a.date.cmp(&b.date)));

        let mut series_rows = vec![0..0; series.len()];
        let mut start = 0;
        while start < records.len() {
            let series_idx = records[start].series as usize;
            if series_idx >= series.len() {
                return Err(ForecastError::schema(
                    "panel",
                    format!("record references unknown series index {}", series_idx),
                ));
            }
            let mut end = start + 1;
            while end < records.len() && records[end].series as usize == series_idx {
                if records[end].date == records[end - 1].date {
                    return Err(ForecastError::schema(
                        "panel",
                        format!(
                            "duplicate row for series {} on {}",
                            series[series_idx].id,
                            records[end].date
                        ),
                    ));
                }
                end += 1;
            }
            series_rows[series_idx] = start..end;
            start = end;
        }

        let mut dates: Vec<NaiveDate> = records.iter().map(|r| r.date).collect();
        dates.sort_unstable();
        dates.dedup();

        Ok(Self {
            series,
            records,
            series_rows,
            dates,
        })
    }

    /// Keeps rows in `[max - test_horizon - history_days, max]`, where `max`
    /// is the panel's own latest date.
    pub fn restrict_to_window(self, history_days: u32, test_horizon: u32) -> Result<Self> {
        let Some(max_date) = self.max_date() else {
            return Ok(self);
        };
        let start =
            max_date - Duration::days(i64::from(test_horizon) + i64::from(history_days));
        if self.dates.first().map_or(true, |first| *first >= start) {
            return Ok(self);
        }
        let records = self
            .records
            .into_iter()
            .filter(|r| r.date >= start && r.date <= max_date)
            .collect();
        Self::from_records(self.series, records)
    }

    pub fn series(&self) -> &[SeriesInfo] {
        &self.series
    }

    pub fn records(&self) -> &[SeriesRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Contiguous row range of one series.
    pub fn series_rows(&self, series_idx: usize) -> Range<usize> {
        self.series_rows[series_idx].clone()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn max_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn cutoff(&self, test_horizon: u32) -> Result<NaiveDate> {
        let max_date = self
            .max_date()
            .ok_or_else(|| ForecastError::schema("panel", "panel has no rows"))?;
        Ok(max_date - Duration::days(i64::from(test_horizon)))
    }

    pub fn split(&self, test_horizon: u32) -> Result<PanelSplit> {
        let cutoff = self.cutoff(test_horizon)?;
        let (train_rows, test_rows): (Vec<usize>, Vec<usize>) =
            (0..self.records.len()).partition(|&row| self.records[row].date <= cutoff);
        Ok(PanelSplit {
            cutoff,
            train_rows,
            test_rows,
        })
    }
}
