//! External data sources.
//!
//! Defines one trait per upstream service and the HTTP-backed
//! implementations: the Nominatim geocoder, the Open-Meteo archive, and the
//! Open-Meteo current-conditions endpoint. Each implementation owns its
//! cache and rate-limiter handles; the engine only sees the traits.

pub mod archive;
pub mod forecast;
pub mod geocode;

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::types::{Coordinates, CurrentConditions, RawYearPayload, WeatherError};

/// Name-to-coordinates lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a free-text place name. Every failure is `NotFound`.
    async fn resolve(&self, city_name: &str) -> Result<Coordinates, WeatherError>;
}

/// A year of daily observations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Fetch Jan 1 – Dec 31 of `year`. Failures are `Fetch`.
    async fn fetch_year(
        &self,
        latitude: f64,
        longitude: f64,
        year: i32,
    ) -> Result<RawYearPayload, WeatherError>;
}

/// Instantaneous conditions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CurrentSource: Send + Sync {
    async fn current(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<CurrentConditions, WeatherError>;
}

/// Build an HTTP client with a fixed per-request timeout.
pub(crate) fn http_client(timeout: Duration, user_agent: &str) -> Result<Client, WeatherError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(|e| WeatherError::Config(format!("Failed to build HTTP client: {e}")))
}

/// Shorten an error body for logs.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Stable textual form of a coordinate for cache keys.
pub(crate) fn coord_key(value: f64) -> String {
    format!("{value:.4}")
}
