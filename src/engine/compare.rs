//! Per-city comparison with a bounded worker pool.
//!
//! Each city runs its own geocode → weather chain; at most `workers` cities
//! are in flight at once. A failure for one city becomes a message on that
//! city's report and never touches the others. Reports come back in the
//! order the cities were given.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::annual::AnnualService;
use super::multi_year::MultiYearAverager;
use crate::cache::{CacheStore, MemoryCache};
use crate::config::AppConfig;
use crate::data::archive::ArchiveClient;
use crate::data::forecast::ForecastClient;
use crate::data::geocode::GeocodingClient;
use crate::data::{CurrentSource, Geocoder};
use crate::rate_limit::{RateLimiter, Throttle};
use crate::types::{AnnualWeather, Coordinates, CurrentConditions, MultiYearAverage, WeatherError};

/// Outcome for one requested city.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityReport {
    /// The name as typed.
    pub query: String,
    /// Trimmed and title-cased, for display.
    pub name: String,
    pub coordinates: Option<Coordinates>,
    pub current: Option<CurrentConditions>,
    pub averages: Option<MultiYearAverage>,
    pub annual: Option<AnnualWeather>,
    /// User-facing messages, empty when everything succeeded.
    pub errors: Vec<String>,
}

impl CityReport {
    fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            name: display_name(query),
            coordinates: None,
            current: None,
            averages: None,
            annual: None,
            errors: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Title-case a city name: first letter of every alphabetic run upper,
/// the rest lower.
pub fn display_name(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut in_word = false;
    for c in query.trim().chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

pub struct CityComparer {
    geocoder: Arc<dyn Geocoder>,
    current: Arc<dyn CurrentSource>,
    annual: Arc<AnnualService>,
    averager: Arc<MultiYearAverager>,
    workers: usize,
    num_years: u32,
}

impl CityComparer {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        current: Arc<dyn CurrentSource>,
        annual: Arc<AnnualService>,
        averager: Arc<MultiYearAverager>,
        workers: usize,
        num_years: u32,
    ) -> Self {
        Self {
            geocoder,
            current,
            annual,
            averager,
            workers: workers.max(1),
            num_years,
        }
    }

    /// Wire up the HTTP clients with one shared cache, a geocoder limiter,
    /// and a single Open-Meteo limiter used by both the archive and the
    /// current-conditions endpoint.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, WeatherError> {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());

        let geocode_limiter: Arc<dyn Throttle> = Arc::new(RateLimiter::new(
            "nominatim",
            cfg.geocoding.calls_limit,
            cfg.geocoding.period(),
        ));
        let open_meteo_limiter: Arc<dyn Throttle> = Arc::new(RateLimiter::new(
            "open-meteo",
            cfg.open_meteo.calls_limit,
            cfg.open_meteo.period(),
        ));

        let geocoder = Arc::new(GeocodingClient::new(cfg, cache.clone(), geocode_limiter)?);
        let archive = Arc::new(ArchiveClient::new(cfg, cache.clone(), open_meteo_limiter.clone())?);
        let current = Arc::new(ForecastClient::new(cfg, cache.clone(), open_meteo_limiter)?);

        let annual = Arc::new(AnnualService::new(archive, cache.clone(), cfg.cache.weather_ttl()));
        let averager = Arc::new(MultiYearAverager::new(
            annual.clone(),
            cache,
            cfg.cache.multi_year_ttl(),
        ));

        Ok(Self::new(
            geocoder,
            current,
            annual,
            averager,
            cfg.comparison.workers,
            cfg.comparison.num_years,
        ))
    }

    /// Current conditions plus the multi-year monthly averages per city.
    pub async fn compare_averages(&self, cities: &[String]) -> Vec<CityReport> {
        info!(cities = cities.len(), workers = self.workers, "Comparing averages");
        let mut indexed: Vec<(usize, CityReport)> = stream::iter(cities.iter().enumerate())
            .map(|(idx, city)| async move { (idx, self.averages_for(city).await) })
            .buffer_unordered(self.workers)
            .collect()
            .await;
        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, report)| report).collect()
    }

    /// Monthly statistics for one calendar year per city.
    pub async fn compare_year(&self, cities: &[String], year: i32) -> Vec<CityReport> {
        info!(cities = cities.len(), year, workers = self.workers, "Comparing year");
        let mut indexed: Vec<(usize, CityReport)> = stream::iter(cities.iter().enumerate())
            .map(|(idx, city)| async move { (idx, self.year_for(city, year).await) })
            .buffer_unordered(self.workers)
            .collect()
            .await;
        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, report)| report).collect()
    }

    async fn locate(&self, report: &mut CityReport) -> Option<Coordinates> {
        match self.geocoder.resolve(&report.query).await {
            Ok(coords) => {
                report.coordinates = Some(coords.clone());
                Some(coords)
            }
            Err(e) => {
                warn!(city = %report.name, error = %e, "Could not locate city");
                report
                    .errors
                    .push(format!("Could not find coordinates for '{}'.", report.name));
                None
            }
        }
    }

    async fn averages_for(&self, city: &str) -> CityReport {
        let mut report = CityReport::new(city);
        let Some(coords) = self.locate(&mut report).await else {
            return report;
        };

        match self.current.current(coords.latitude, coords.longitude).await {
            Ok(now) => report.current = Some(now),
            Err(e) => {
                warn!(city = %report.name, error = %e, "Current conditions unavailable");
                report.errors.push(format!(
                    "Could not retrieve current weather data for '{}'.",
                    report.name
                ));
            }
        }

        match self
            .averager
            .average(coords.latitude, coords.longitude, None, self.num_years)
            .await
        {
            Ok(avg) => report.averages = Some(avg),
            Err(WeatherError::NotAvailable { start_year, end_year }) => {
                report.errors.push(format!(
                    "Could not retrieve historical weather data for '{}' \
                     ({start_year}-{end_year}).",
                    report.name
                ));
            }
            Err(e) => {
                warn!(city = %report.name, error = %e, "Multi-year average failed");
                report.errors.push(format!(
                    "Could not retrieve historical weather data for '{}'. Please try again later.",
                    report.name
                ));
            }
        }
        report
    }

    async fn year_for(&self, city: &str, year: i32) -> CityReport {
        let mut report = CityReport::new(city);
        let Some(coords) = self.locate(&mut report).await else {
            return report;
        };

        match self
            .annual
            .get_annual(coords.latitude, coords.longitude, year)
            .await
        {
            Ok(annual) => report.annual = Some(annual),
            Err(e) => {
                warn!(city = %report.name, year, error = %e, "Annual weather failed");
                report.errors.push(format!(
                    "Could not retrieve annual weather data for '{}'. Please try again later.",
                    report.name
                ));
            }
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
