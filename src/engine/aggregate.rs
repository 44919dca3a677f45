//! Daily → monthly aggregation.
//!
//! Buckets a [`DailyTable`] by calendar month of the requested year and
//! produces exactly twelve
//! [`MonthlyStatistic`](crate::types::MonthlyStatistic)s: mean temperature
//! and total precipitation, rounded to two decimals, null where a month has
//! no rows.

use chrono::Datelike;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use super::prepare::DailyTable;
use crate::types::{empty_series, MonthlySeries};

/// Entries kept before the memo is cleared.
const MEMO_CAPACITY: usize = 128;

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Aggregate a table into twelve monthly statistics for `year`.
///
/// Rows dated outside `year` are ignored. `None` yields an all-null series.
pub fn aggregate(table: Option<&DailyTable>, year: i32) -> MonthlySeries {
    let mut series = empty_series();
    let Some(table) = table else {
        return series;
    };

    // (temperature sum, precipitation sum, row count) per month.
    let mut buckets = [(0.0_f64, 0.0_f64, 0_u32); 12];
    for (date, temp, precip) in table.rows() {
        if date.year() != year {
            continue;
        }
        let bucket = &mut buckets[date.month0() as usize];
        bucket.0 += temp;
        bucket.1 += precip;
        bucket.2 += 1;
    }

    for (stat, (temp_sum, precip_sum, count)) in series.iter_mut().zip(buckets) {
        if count > 0 {
            stat.avg_temp = Some(round2(temp_sum / f64::from(count)));
            stat.total_precip = Some(round2(precip_sum));
        }
    }
    series
}

/// [`aggregate`] with a memo keyed on `(year, table fingerprint)`.
#[derive(Debug, Default)]
pub struct Aggregator {
    memo: Mutex<HashMap<(i32, u64), MonthlySeries>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregate(&self, table: Option<&DailyTable>, year: i32) -> MonthlySeries {
        let Some(table) = table else {
            return aggregate(None, year);
        };

        let key = (year, table.fingerprint());
        let mut memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = memo.get(&key) {
            debug!(year, "Aggregation memo hit");
            return *hit;
        }

        let series = aggregate(Some(table), year);
        if memo.len() >= MEMO_CAPACITY {
            memo.clear();
        }
        memo.insert(key, series);
        series
    }

    pub fn memo_len(&self) -> usize {
        self.memo.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
