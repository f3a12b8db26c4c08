use crate::error::{ForecastError, Result};
use crate::models::SeriesInfo;
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use log::info;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const CALENDAR_FILE: &str = "calendar.csv";
pub const PRICES_FILE: &str = "sell_prices.csv";
pub const SALES_FILE: &str = "sales_train_evaluation.csv";

const SNAP_PREFIX: &str = "snap_";
const DAY_PREFIX: &str = "d_";

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub d: String,
    pub wm_yr_wk: u32,
    pub wday: u8,
    pub month: u8,
    pub year: i32,
    /// SNAP flags in `Calendar::snap_states` order.
    pub snap: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct Calendar {
    days: Vec<CalendarDay>,
    by_day_key: HashMap<String, usize>,
    snap_states: Vec<String>,
}

impl Calendar {
    pub fn new(days: Vec<CalendarDay>, snap_states: Vec<String>) -> Result<Self> {
        let mut by_day_key = HashMap::with_capacity(days.len());
        for (idx, day) in days.iter().enumerate() {
            if day.snap.len() != snap_states.len() {
                return Err(ForecastError::schema(
                    CALENDAR_FILE,
                    format!("day {} carries {} SNAP flags", day.d, day.snap.len()),
                ));
            }
            if by_day_key.insert(day.d.clone(), idx).is_some() {
                return Err(ForecastError::schema(
                    CALENDAR_FILE,
                    format!("duplicate day key {}", day.d),
                ));
            }
        }
        Ok(Self {
            days,
            by_day_key,
            snap_states,
        })
    }

    pub fn days(&self) -> &[CalendarDay] {
        &self.days
    }

    pub fn day(&self, day_key: &str) -> Option<&CalendarDay> {
        self.by_day_key.get(day_key).map(|&idx| &self.days[idx])
    }

    pub fn snap_states(&self) -> &[String] {
        &self.snap_states
    }

    /// Column of the SNAP flag for `state`, if the calendar has one.
    pub fn snap_slot(&self, state: &str) -> Option<usize> {
        self.snap_states.iter().position(|s| s == state)
    }
}

/// Weekly shelf prices keyed by store, then item, then `wm_yr_wk`.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    prices: HashMap<String, HashMap<String, HashMap<u32, f64>>>,
    rows: usize,
}

impl PriceTable {
    pub fn insert(&mut self, store_id: &str, item_id: &str, wm_yr_wk: u32, price: f64) {
        let previous = self
            .prices
            .entry(store_id.to_string())
            .or_default()
            .entry(item_id.to_string())
            .or_default()
            .insert(wm_yr_wk, price);
        if previous.is_none() {
            self.rows += 1;
        }
    }

    pub fn series_prices(&self, store_id: &str, item_id: &str) -> Option<&HashMap<u32, f64>> {
        self.prices.get(store_id)?.get(item_id)
    }

    pub fn price(&self, store_id: &str, item_id: &str, wm_yr_wk: u32) -> Option<f64> {
        self.series_prices(store_id, item_id)?
            .get(&wm_yr_wk)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Wide daily unit sales, one row per series in file order.
#[derive(Debug, Clone)]
pub struct SalesTable {
    series: Vec<SeriesInfo>,
    day_keys: Vec<String>,
    values: Vec<f32>,
}

impl SalesTable {
    pub fn new(series: Vec<SeriesInfo>, day_keys: Vec<String>, values: Vec<f32>) -> Result<Self> {
        if day_keys.is_empty() {
            return Err(ForecastError::schema(SALES_FILE, "no d_ day columns found"));
        }
        if values.len() != series.len() * day_keys.len() {
            return Err(ForecastError::schema(
                SALES_FILE,
                format!(
                    "expected {} values for {} series x {} days, found {}",
                    series.len() * day_keys.len(),
                    series.len(),
                    day_keys.len(),
                    values.len()
                ),
            ));
        }
        Ok(Self {
            series,
            day_keys,
            values,
        })
    }

    pub fn series(&self) -> &[SeriesInfo] {
        &self.series
    }

    pub fn canonical_ids(&self) -> Vec<String> {
        self.series.iter().map(|info| info.id.clone()).collect()
    }

    pub fn day_keys(&self) -> &[String] {
        &self.day_keys
    }

    pub fn num_days(&self) -> usize {
        self.day_keys.len()
    }

    pub fn row(&self, series_idx: usize) -> &[f32] {
        let width = self.day_keys.len();
        let start = series_idx * width;
        &self.values[start..start + width]
    }
}

/// The three raw M5 tables, with every sales day column resolved to its
/// calendar entry.
#[derive(Debug, Clone)]
pub struct RawData {
    pub calendar: Calendar,
    pub prices: PriceTable,
    pub sales: SalesTable,
    day_calendar: Vec<usize>,
}

impl RawData {
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let calendar = load_calendar(&dir.join(CALENDAR_FILE))?;
        let prices = load_prices(&dir.join(PRICES_FILE))?;
        let sales = load_sales(&dir.join(SALES_FILE))?;
        info!(
            "Loaded raw data from {}: {} calendar days, {} price rows, {} series x {} days",
            dir.display(),
            calendar.days().len(),
            prices.len(),
            sales.series().len(),
            sales.num_days()
        );
        Self::from_tables(calendar, prices, sales)
    }

    pub fn from_tables(calendar: Calendar, prices: PriceTable, sales: SalesTable) -> Result<Self> {
        let mut day_calendar = Vec::<usize>::with_capacity(sales.num_days());
        for day_key in sales.day_keys() {
            let idx = calendar.by_day_key.get(day_key).copied().ok_or_else(|| {
                ForecastError::schema(
                    SALES_FILE,
                    format!("day column {} is not present in {}", day_key, CALENDAR_FILE),
                )
            })?;
            if let Some(&prev) = day_calendar.last() {
                let prev_date = calendar.days[prev].date;
                if calendar.days[idx].date <= prev_date {
                    return Err(ForecastError::schema(
                        SALES_FILE,
                        format!("day column {} is out of chronological order", day_key),
                    ));
                }
            }
            day_calendar.push(idx);
        }
        Ok(Self {
            calendar,
            prices,
            sales,
            day_calendar,
        })
    }

    /// Calendar entry of the `day_pos`-th sales day column.
    pub fn sales_day(&self, day_pos: usize) -> &CalendarDay {
        &self.calendar.days[self.day_calendar[day_pos]]
    }
}

pub fn load_calendar(path: &Path) -> Result<Calendar> {
    let (headers, records) = read_table(path)?;
    let date_idx = column_index(&headers, "date", CALENDAR_FILE)?;
    let d_idx = column_index(&headers, "d", CALENDAR_FILE)?;
    let wk_idx = column_index(&headers, "wm_yr_wk", CALENDAR_FILE)?;
    let wday_idx = column_index(&headers, "wday", CALENDAR_FILE)?;
    let month_idx = column_index(&headers, "month", CALENDAR_FILE)?;
    let year_idx = column_index(&headers, "year", CALENDAR_FILE)?;

    let snap_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter_map(|(idx, name)| {
            name.strip_prefix(SNAP_PREFIX)
                .map(|state| (idx, state.to_string()))
        })
        .collect();

    let mut days = Vec::with_capacity(records.len());
    for (row, record) in records.iter().enumerate() {
        let raw_date = field(record, date_idx, row, "date", CALENDAR_FILE)?;
        let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|err| {
            ForecastError::schema(
                CALENDAR_FILE,
                format!("row {}: invalid date {:?}: {}", row + 1, raw_date, err),
            )
        })?;
        let snap = snap_columns
            .iter()
            .map(|(idx, state)| {
                let column = format!("{}{}", SNAP_PREFIX, state);
                parse_field::<u8>(record, *idx, row, &column, CALENDAR_FILE)
                    .map(|flag| u8::from(flag != 0))
            })
            .collect::<Result<Vec<_>>>()?;
        days.push(CalendarDay {
            date,
            d: field(record, d_idx, row, "d", CALENDAR_FILE)?.to_string(),
            wm_yr_wk: parse_field(record, wk_idx, row, "wm_yr_wk", CALENDAR_FILE)?,
            wday: parse_field(record, wday_idx, row, "wday", CALENDAR_FILE)?,
            month: parse_field(record, month_idx, row, "month", CALENDAR_FILE)?,
            year: parse_field(record, year_idx, row, "year", CALENDAR_FILE)?,
            snap,
        });
    }

    let snap_states = snap_columns.into_iter().map(|(_, state)| state).collect();
    Calendar::new(days, snap_states)
}

pub fn load_prices(path: &Path) -> Result<PriceTable> {
    let (headers, records) = read_table(path)?;
    let store_idx = column_index(&headers, "store_id", PRICES_FILE)?;
    let item_idx = column_index(&headers, "item_id", PRICES_FILE)?;
    let wk_idx = column_index(&headers, "wm_yr_wk", PRICES_FILE)?;
    let price_idx = column_index(&headers, "sell_price", PRICES_FILE)?;

    let mut prices = PriceTable::default();
    for (row, record) in records.iter().enumerate() {
        let store_id = field(record, store_idx, row, "store_id", PRICES_FILE)?;
        let item_id = field(record, item_idx, row, "item_id", PRICES_FILE)?;
        let wm_yr_wk = parse_field(record, wk_idx, row, "wm_yr_wk", PRICES_FILE)?;
        let price: f64 = parse_field(record, price_idx, row, "sell_price", PRICES_FILE)?;
        prices.insert(store_id, item_id, wm_yr_wk, price);
    }
    Ok(prices)
}

pub fn load_sales(path: &Path) -> Result<SalesTable> {
    let (headers, records) = read_table(path)?;
    let id_idx = column_index(&headers, "id", SALES_FILE)?;
    let item_idx = column_index(&headers, "item_id", SALES_FILE)?;
    let dept_idx = column_index(&headers, "dept_id", SALES_FILE)?;
    let cat_idx = column_index(&headers, "cat_id", SALES_FILE)?;
    let store_idx = column_index(&headers, "store_id", SALES_FILE)?;
    let state_idx = column_index(&headers, "state_id", SALES_FILE)?;

    let day_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(_, name)| name.starts_with(DAY_PREFIX))
        .map(|(idx, name)| (idx, name.to_string()))
        .collect();

    let mut series = Vec::with_capacity(records.len());
    let mut values = Vec::with_capacity(records.len() * day_columns.len());
    for (row, record) in records.iter().enumerate() {
        series.push(SeriesInfo {
            id: field(record, id_idx, row, "id", SALES_FILE)?.to_string(),
            item_id: field(record, item_idx, row, "item_id", SALES_FILE)?.to_string(),
            dept_id: field(record, dept_idx, row, "dept_id", SALES_FILE)?.to_string(),
            cat_id: field(record, cat_idx, row, "cat_id", SALES_FILE)?.to_string(),
            store_id: field(record, store_idx, row, "store_id", SALES_FILE)?.to_string(),
            state_id: field(record, state_idx, row, "state_id", SALES_FILE)?.to_string(),
        });
        for (idx, name) in &day_columns {
            values.push(parse_field::<f32>(record, *idx, row, name, SALES_FILE)?);
        }
    }

    let day_keys = day_columns.into_iter().map(|(_, name)| name).collect();
    SalesTable::new(series, day_keys, values)
}

fn read_table(path: &Path) -> Result<(StringRecord, Vec<StringRecord>)> {
    if !path.exists() {
        return Err(ForecastError::DataNotFound(PathBuf::from(path)));
    }
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let records = reader.records().collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((headers, records))
}

fn column_index(headers: &StringRecord, name: &str, source: &str) -> Result<usize> {
    headers
        .iter()
        .position(|header| header.trim() == name)
        .ok_or_else(|| ForecastError::schema(source, format!("missing required column {}", name)))
}

fn field<'a>(
    record: &'a StringRecord,
    idx: usize,
    row: usize,
    column: &str,
    source: &str,
) -> Result<&'a str> {
    record.get(idx).map(str::trim).ok_or_else(|| {
        ForecastError::schema(source, format!("row {}: missing value for {}", row + 1, column))
    })
}

fn parse_field<T>(
    record: &StringRecord,
    idx: usize,
    row: usize,
    column: &str,
    source: &str,
) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let raw = field(record, idx, row, column, source)?;
    raw.parse::<T>().map_err(|err| {
        ForecastError::schema(
            source,
            format!("row {}: invalid {} value {:?}: {}", row + 1, column, raw, err),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    fn write_minimal_tables(dir: &Path) {
        write(
            dir,
            CALENDAR_FILE,
            "date,wm_yr_wk,weekday,wday,month,year,d,snap_CA\n\
             2016-01-01,11549,Friday,7,1,2016,d_1,1\n\
             2016-01-02,11549,Saturday,1,1,2016,d_2,0\n",
        );
        write(
            dir,
            PRICES_FILE,
            "store_id,item_id,wm_yr_wk,sell_price\nCA_1,FOODS_1_001,11549,2.5\n",
        );
        write(
            dir,
            SALES_FILE,
            "id,item_id,dept_id,cat_id,store_id,state_id,d_1,d_2\n\
             FOODS_1_001_CA_1_evaluation,FOODS_1_001,FOODS_1,FOODS,CA_1,CA,3,0\n",
        );
    }

    #[test]
    fn loads_all_three_tables() {
        let dir = tempdir().unwrap();
        write_minimal_tables(dir.path());

        let raw = RawData::load(dir.path()).unwrap();
        assert_eq!(raw.calendar.snap_states(), &["CA".to_string()]);
        assert_eq!(raw.calendar.day("d_1").unwrap().snap, vec![1]);
        assert_eq!(raw.prices.price("CA_1", "FOODS_1_001", 11549), Some(2.5));
        assert_eq!(raw.sales.row(0), &[3.0, 0.0]);
        assert_eq!(
            raw.sales_day(1).date,
            NaiveDate::from_ymd_opt(2016, 1, 2).unwrap()
        );
    }

    #[test]
    fn missing_file_is_data_not_found() {
        let dir = tempdir().unwrap();
        let err = RawData::load(dir.path()).unwrap_err();
        assert!(matches!(err, ForecastError::DataNotFound(path) if path.ends_with(CALENDAR_FILE)));
    }

    #[test]
    fn missing_column_is_schema_error() {
        let dir = tempdir().unwrap();
        write_minimal_tables(dir.path());
        write(
            dir.path(),
            PRICES_FILE,
            "store_id,item_id,sell_price\nCA_1,FOODS_1_001,2.5\n",
        );
        let err = RawData::load(dir.path()).unwrap_err();
        assert!(matches!(err, ForecastError::Schema { ref message, .. } if message.contains("wm_yr_wk")));
    }

    #[test]
    fn day_column_outside_calendar_is_schema_error() {
        let dir = tempdir().unwrap();
        write_minimal_tables(dir.path());
        write(
            dir.path(),
            SALES_FILE,
            "id,item_id,dept_id,cat_id,store_id,state_id,d_1,d_9\n\
             A,FOODS_1_001,FOODS_1,FOODS,CA_1,CA,3,0\n",
        );
        let err = RawData::load(dir.path()).unwrap_err();
        assert!(matches!(err, ForecastError::Schema { ref message, .. } if message.contains("d_9")));
    }

    #[test]
    fn unparsable_sales_value_is_schema_error() {
        let dir = tempdir().unwrap();
        write_minimal_tables(dir.path());
        write(
            dir.path(),
            SALES_FILE,
            "id,item_id,dept_id,cat_id,store_id,state_id,d_1,d_2\n\
             A,FOODS_1_001,FOODS_1,FOODS,CA_1,CA,three,0\n",
        );
        assert!(matches!(
            RawData::load(dir.path()),
            Err(ForecastError::Schema { .. })
        ));
    }
}
