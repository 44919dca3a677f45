//! Per-month climatology over a window of past years.
//!
//! Runs the annual pipeline for each year in `[end - n + 1, end]` and
//! averages the surviving values month by month. Years that fail or come
//! back empty are skipped; the window only fails as a whole when nothing
//! contributes.

use chrono::{Datelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::aggregate::round2;
use super::annual::AnnualService;
use crate::cache::{cache_key, get_typed, put_typed, CacheStore};
use crate::data::coord_key;
use crate::types::{
    empty_series, AnnualWeather, MultiYearAverage, WeatherError, DEFAULT_PRECIP_UNIT,
    DEFAULT_TEMP_UNIT,
};

/// Default window length in years.
pub const DEFAULT_NUM_YEARS: u32 = 5;

/// Longest window accepted. The archive starts in 1940.
pub const MAX_NUM_YEARS: u32 = 100;

/// The most recent complete calendar year.
pub fn default_end_year() -> i32 {
    Utc::now().year() - 1
}

pub struct MultiYearAverager {
    annual: Arc<AnnualService>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl MultiYearAverager {
    pub fn new(annual: Arc<AnnualService>, cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { annual, cache, ttl }
    }

    pub async fn average(
        &self,
        latitude: f64,
        longitude: f64,
        end_year: Option<i32>,
        num_years: u32,
    ) -> Result<MultiYearAverage, WeatherError> {
        let end_year = end_year.unwrap_or_else(default_end_year);
        let start_year = window_start(end_year, num_years)?;

        let key = cache_key(&[
            "multi_year",
            &coord_key(latitude),
            &coord_key(longitude),
            &start_year.to_string(),
            &end_year.to_string(),
        ]);
        if let Some(hit) = get_typed::<MultiYearAverage>(self.cache.as_ref(), &key).await {
            debug!(lat = latitude, lon = longitude, start_year, end_year, "Multi-year cache hit");
            return Ok(hit);
        }

        let mut units: Option<(String, String)> = None;
        let mut years: Vec<AnnualWeather> = Vec::new();

        for year in start_year..=end_year {
            let annual = match self.annual.get_annual(latitude, longitude, year).await {
                Ok(annual) => annual,
                Err(e) => {
                    info!(year, error = %e, "Skipping year");
                    continue;
                }
            };
            if units.is_none() {
                units = Some((annual.temp_unit.clone(), annual.precip_unit.clone()));
            }
            if !annual.has_data() {
                debug!(year, "Skipping year with no monthly data");
                continue;
            }
            years.push(annual);
        }

        if years.is_empty() {
            return Err(WeatherError::NotAvailable {
                start_year,
                end_year,
            });
        }

        let (temp_unit, precip_unit) = units.unwrap_or_else(|| {
            (DEFAULT_TEMP_UNIT.to_string(), DEFAULT_PRECIP_UNIT.to_string())
        });

        let mut monthly_data = empty_series();
        for (idx, stat) in monthly_data.iter_mut().enumerate() {
            stat.avg_temp = mean(years.iter().filter_map(|y| y.monthly_data[idx].avg_temp));
            stat.total_precip = mean(years.iter().filter_map(|y| y.monthly_data[idx].total_precip));
        }

        let result = MultiYearAverage {
            monthly_data,
            temp_unit,
            precip_unit,
            year_range: format!("{start_year}-{end_year}"),
        };

        info!(
            lat = latitude,
            lon = longitude,
            years_used = years.len(),
            range = %result.year_range,
            "Multi-year average ready"
        );
        put_typed(self.cache.as_ref(), &key, &result, self.ttl).await;
        Ok(result)
    }
}

/// First year of `[end - n + 1, end]`. Zero years counts as one.
fn window_start(end_year: i32, num_years: u32) -> Result<i32, WeatherError> {
    let invalid = || {
        WeatherError::Config(format!(
            "invalid averaging window: {num_years} years ending {end_year} (max {MAX_NUM_YEARS})"
        ))
    };
    if num_years > MAX_NUM_YEARS {
        return Err(invalid());
    }
    let span = i32::try_from(num_years.max(1)).map_err(|_| invalid())?;
    end_year.checked_sub(span - 1).ok_or_else(invalid)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0u32), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| round2(sum / f64::from(count)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
