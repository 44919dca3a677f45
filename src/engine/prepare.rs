//! Daily series preparation.
//!
//! Turns the loose `daily` block of an archive payload into a clean,
//! date-indexed [`DailyTable`]: three aligned columns, numeric cells
//! coerced, incomplete days dropped.
//!
//! A day with only one of the two metrics is dropped entirely, so a
//! missing temperature also discards that day's precipitation and vice
//! versa.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;

use crate::types::{
    DailyRecord, RawYearPayload, PRECIPITATION_COLUMN, TEMPERATURE_COLUMN, TIME_COLUMN,
};

/// Why a payload produced no table.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PrepareError {
    #[error("payload has no 'daily' block")]
    MissingDaily,

    #[error("daily block is missing column '{0}'")]
    MissingColumn(&'static str),

    #[error("daily columns have different lengths")]
    MisalignedColumns,

    #[error("unparseable date '{0}'")]
    InvalidDate(String),

    #[error("no usable rows after dropping incomplete days")]
    NoUsableRows,
}

/// Cleaned daily observations. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyTable {
    dates: Vec<NaiveDate>,
    temperature: Vec<f64>,
    precipitation: Vec<f64>,
}

impl DailyTable {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// `(date, mean temperature, precipitation sum)` in received order.
    pub fn rows(&self) -> impl Iterator<Item = (NaiveDate, f64, f64)> + '_ {
        self.dates
            .iter()
            .zip(&self.temperature)
            .zip(&self.precipitation)
            .map(|((d, t), p)| (*d, *t, *p))
    }

    /// Content hash, used as a memo key.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for (date, temp, precip) in self.rows() {
            date.hash(&mut hasher);
            temp.to_bits().hash(&mut hasher);
            precip.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Keep only complete records. Fails if none are complete.
    pub fn from_records<I>(records: I) -> Result<Self, PrepareError>
    where
        I: IntoIterator<Item = DailyRecord>,
    {
        let mut table = DailyTable {
            dates: Vec::new(),
            temperature: Vec::new(),
            precipitation: Vec::new(),
        };
        for record in records {
            if let (Some(t), Some(p)) = (record.mean_temperature, record.precipitation_sum) {
                table.dates.push(record.date);
                table.temperature.push(t);
                table.precipitation.push(p);
            }
        }
        if table.is_empty() {
            return Err(PrepareError::NoUsableRows);
        }
        Ok(table)
    }
}

/// Validate and clean an archive payload.
pub fn prepare(payload: &RawYearPayload) -> Result<DailyTable, PrepareError> {
    let records = parse_records(payload)?;
    let total = records.len();
    let table = DailyTable::from_records(records)?;
    debug!(total, kept = table.len(), "Prepared daily table");
    Ok(table)
}

/// Parse the three columns into records without dropping anything.
pub fn parse_records(payload: &RawYearPayload) -> Result<Vec<DailyRecord>, PrepareError> {
    let daily = payload.daily.as_ref().ok_or(PrepareError::MissingDaily)?;

    let times = column(daily, TIME_COLUMN)?;
    let temps = column(daily, TEMPERATURE_COLUMN)?;
    let precips = column(daily, PRECIPITATION_COLUMN)?;

    if times.len() != temps.len() || times.len() != precips.len() {
        return Err(PrepareError::MisalignedColumns);
    }

    times
        .iter()
        .zip(temps)
        .zip(precips)
        .map(|((time, temp), precip)| {
            Ok(DailyRecord {
                date: parse_date(time)?,
                mean_temperature: coerce_number(temp),
                precipitation_sum: coerce_number(precip),
            })
        })
        .collect()
}

fn column<'a>(
    daily: &'a Map<String, Value>,
    name: &'static str,
) -> Result<&'a Vec<Value>, PrepareError> {
    daily
        .get(name)
        .and_then(Value::as_array)
        .ok_or(PrepareError::MissingColumn(name))
}

fn parse_date(value: &Value) -> Result<NaiveDate, PrepareError> {
    let raw = value
        .as_str()
        .ok_or_else(|| PrepareError::InvalidDate(value.to_string()))?;
    // Accept bare dates and the datetime form some endpoints return.
    let day = raw.split('T').next().unwrap_or(raw).trim();
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|_| PrepareError::InvalidDate(raw.to_string()))
}

/// Numbers and numeric strings become `f64`; everything else is missing.
fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
