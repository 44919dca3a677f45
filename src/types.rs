//! Shared types for the weather comparer.
//!
//! These types form the data model passed between the external clients,
//! the aggregation pipeline, and whatever front end sits on top of it.
//! Everything here is plain data: serializable so it can live in the
//! cache, cloneable so cache hits can be handed out freely.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Temperature unit used when the archive omits `daily_units`.
pub const DEFAULT_TEMP_UNIT: &str = "°C";

/// Precipitation unit used when the archive omits `daily_units`.
pub const DEFAULT_PRECIP_UNIT: &str = "mm";

/// Wind unit used when the forecast omits `current_units`.
pub const DEFAULT_WIND_UNIT: &str = "km/h";

/// Archive column holding the ISO dates.
pub const TIME_COLUMN: &str = "time";

/// Archive column holding the daily mean temperature.
pub const TEMPERATURE_COLUMN: &str = "temperature_2m_mean";

/// Archive column holding the daily precipitation sum.
pub const PRECIPITATION_COLUMN: &str = "precipitation_sum";

// ---------------------------------------------------------------------------
// Geocoding
// ---------------------------------------------------------------------------

/// A geocoded place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    /// Display address as returned by the geocoder.
    pub address: String,
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.4}, {:.4})",
            self.address, self.latitude, self.longitude
        )
    }
}

// ---------------------------------------------------------------------------
// Archive payload and daily series
// ---------------------------------------------------------------------------

/// A year of archive data as returned by Open-Meteo.
///
/// The `daily` block is kept as loose JSON: cells may be numbers, numeric
/// strings or nulls, and the preparer decides what is usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawYearPayload {
    #[serde(default)]
    pub daily: Option<Map<String, Value>>,
    #[serde(default)]
    pub daily_units: Option<Map<String, Value>>,
}

impl RawYearPayload {
    /// Temperature unit from `daily_units`, or the default.
    pub fn temperature_unit(&self) -> String {
        self.unit_for(TEMPERATURE_COLUMN)
            .unwrap_or(DEFAULT_TEMP_UNIT)
            .to_string()
    }

    /// Precipitation unit from `daily_units`, or the default.
    pub fn precipitation_unit(&self) -> String {
        self.unit_for(PRECIPITATION_COLUMN)
            .unwrap_or(DEFAULT_PRECIP_UNIT)
            .to_string()
    }

    fn unit_for(&self, column: &str) -> Option<&str> {
        self.daily_units.as_ref()?.get(column)?.as_str()
    }
}

/// One archive row after parsing but before cleaning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub mean_temperature: Option<f64>,
    pub precipitation_sum: Option<f64>,
}

impl DailyRecord {
    /// Both metrics present. A row missing either one is unusable for both.
    pub fn is_complete(&self) -> bool {
        self.mean_temperature.is_some() && self.precipitation_sum.is_some()
    }
}

// ---------------------------------------------------------------------------
// Aggregated results
// ---------------------------------------------------------------------------

/// Statistics for one calendar month. `None` means no usable data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonthlyStatistic {
    /// Calendar month, 1–12.
    pub month: u32,
    pub avg_temp: Option<f64>,
    pub total_precip: Option<f64>,
}

impl MonthlyStatistic {
    /// A month with no data.
    pub fn empty(month: u32) -> Self {
        Self {
            month,
            avg_temp: None,
            total_precip: None,
        }
    }

    pub fn has_data(&self) -> bool {
        self.avg_temp.is_some() || self.total_precip.is_some()
    }
}

/// Twelve months, January first.
pub type MonthlySeries = [MonthlyStatistic; 12];

/// A series with every month null.
pub fn empty_series() -> MonthlySeries {
    std::array::from_fn(|i| MonthlyStatistic::empty(i as u32 + 1))
}

/// Monthly statistics for a single year at one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnualWeather {
    pub monthly_data: MonthlySeries,
    pub temp_unit: String,
    pub precip_unit: String,
}

impl AnnualWeather {
    /// At least one month has a value.
    pub fn has_data(&self) -> bool {
        self.monthly_data.iter().any(MonthlyStatistic::has_data)
    }
}

/// Per-month means across a window of years.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiYearAverage {
    pub monthly_data: MonthlySeries,
    pub temp_unit: String,
    pub precip_unit: String,
    /// `"{start}-{end}"`, e.g. `"2020-2024"`.
    pub year_range: String,
}

// ---------------------------------------------------------------------------
// Current conditions
// ---------------------------------------------------------------------------

/// An instantaneous weather reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    /// Degrees, meteorological convention (0 = from the north).
    pub wind_direction: Option<f64>,
    pub weather_code: Option<i32>,
    pub weather_icon: String,
    pub weather_description: String,
    pub temp_unit: String,
    pub wind_unit: String,
    /// Local observation time as reported by the API (`YYYY-MM-DDTHH:MM`).
    pub timestamp: String,
}

impl fmt::Display for CurrentConditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.temperature {
            Some(t) => write!(f, "{t:.1}{}", self.temp_unit)?,
            None => write!(f, "n/a")?,
        }
        write!(f, ", {}", self.weather_description)?;
        if let Some(h) = self.humidity {
            write!(f, ", {h:.0}% humidity")?;
        }
        if let Some(w) = self.wind_speed {
            write!(f, ", wind {w:.1}{}", self.wind_unit)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a geocoding lookup produced nothing. Diagnostic only: every variant
/// reaches the caller as [`WeatherError::NotFound`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeocodeFailure {
    EmptyQuery,
    NoMatch,
    Timeout,
    Unavailable,
    Transport(String),
}

impl fmt::Display for GeocodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeocodeFailure::EmptyQuery => write!(f, "empty query"),
            GeocodeFailure::NoMatch => write!(f, "no match"),
            GeocodeFailure::Timeout => write!(f, "geocoder timed out"),
            GeocodeFailure::Unavailable => write!(f, "geocoder unavailable"),
            GeocodeFailure::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

/// Domain errors surfaced by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Location not found ({query}): {reason}")]
    NotFound {
        query: String,
        reason: GeocodeFailure,
    },

    #[error("Fetch failed ({service}): {message}")]
    Fetch {
        service: &'static str,
        message: String,
    },

    #[error("No weather data available for {start_year}-{end_year}")]
    NotAvailable { start_year: i32, end_year: i32 },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WeatherError {
    pub(crate) fn fetch(service: &'static str, message: impl Into<String>) -> Self {
        WeatherError::Fetch {
            service,
            message: message.into(),
        }
    }

    /// "Try again later" failures, as opposed to "nothing there".
    pub fn is_critical(&self) -> bool {
        matches!(self, WeatherError::Fetch { .. } | WeatherError::Config(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
