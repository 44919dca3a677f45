//! Single-year pipeline: fetch → prepare → aggregate, cached.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::aggregate::Aggregator;
use super::prepare::prepare;
use crate::cache::{cache_key, get_typed, put_typed, CacheStore};
use crate::data::{coord_key, ArchiveSource};
use crate::types::{AnnualWeather, WeatherError};

pub struct AnnualService {
    archive: Arc<dyn ArchiveSource>,
    cache: Arc<dyn CacheStore>,
    aggregator: Aggregator,
    ttl: Duration,
}

impl AnnualService {
    pub fn new(archive: Arc<dyn ArchiveSource>, cache: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            archive,
            cache,
            aggregator: Aggregator::new(),
            ttl,
        }
    }

    /// Monthly statistics for `year` at a location.
    ///
    /// A payload that cannot be prepared still yields a result: twelve null
    /// months with whatever units the payload declared. Only a failed fetch
    /// is an error.
    pub async fn get_annual(
        &self,
        latitude: f64,
        longitude: f64,
        year: i32,
    ) -> Result<AnnualWeather, WeatherError> {
        let key = cache_key(&[
            "annual",
            &coord_key(latitude),
            &coord_key(longitude),
            &year.to_string(),
        ]);
        if let Some(hit) = get_typed::<AnnualWeather>(self.cache.as_ref(), &key).await {
            debug!(lat = latitude, lon = longitude, year, "Annual cache hit");
            return Ok(hit);
        }

        let payload = self.archive.fetch_year(latitude, longitude, year).await?;

        let table = match prepare(&payload) {
            Ok(table) => Some(table),
            Err(e) => {
                warn!(lat = latitude, lon = longitude, year, reason = %e, "No usable daily data");
                None
            }
        };

        let annual = AnnualWeather {
            monthly_data: self.aggregator.aggregate(table.as_ref(), year),
            temp_unit: payload.temperature_unit(),
            precip_unit: payload.precipitation_unit(),
        };

        info!(
            lat = latitude,
            lon = longitude,
            year,
            has_data = annual.has_data(),
            "Annual weather ready"
        );
        put_typed(self.cache.as_ref(), &key, &annual, self.ttl).await;
        Ok(annual)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
