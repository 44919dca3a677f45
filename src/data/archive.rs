//! Historical weather from the Open-Meteo archive.
//!
//! Fetches a full calendar year of daily mean temperature and precipitation
//! sum for a coordinate pair. Payloads are validated for shape only (a
//! `daily` object with a `time` array); cell-level cleaning belongs to the
//! preparer.
//!
//! API: `https://archive-api.open-meteo.com/v1/archive`
//! Auth: None required.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{coord_key, http_client, truncate_body, ArchiveSource};
use crate::cache::{cache_key, get_typed, put_typed, CacheStore};
use crate::config::AppConfig;
use crate::rate_limit::Throttle;
use crate::types::{
    RawYearPayload, WeatherError, PRECIPITATION_COLUMN, TEMPERATURE_COLUMN, TIME_COLUMN,
};

const SERVICE: &str = "open-meteo archive";

/// Cached, rate-limited archive client.
pub struct ArchiveClient {
    http: Client,
    base_url: String,
    timezone: String,
    cache: Arc<dyn CacheStore>,
    limiter: Arc<dyn Throttle>,
    ttl: Duration,
}

impl ArchiveClient {
    pub fn new(
        cfg: &AppConfig,
        cache: Arc<dyn CacheStore>,
        limiter: Arc<dyn Throttle>,
    ) -> Result<Self, WeatherError> {
        let http = http_client(cfg.open_meteo.archive_timeout(), "weather-comparer/0.1.0")?;
        Ok(Self {
            http,
            base_url: cfg.open_meteo.archive_url.clone(),
            timezone: cfg.open_meteo.timezone.clone(),
            cache,
            limiter,
            ttl: cfg.cache.weather_ttl(),
        })
    }

    async fn request(
        &self,
        latitude: f64,
        longitude: f64,
        year: i32,
    ) -> Result<RawYearPayload, WeatherError> {
        let start_date = format!("{year}-01-01");
        let end_date = format!("{year}-12-31");
        let daily = format!("{TEMPERATURE_COLUMN},{PRECIPITATION_COLUMN}");

        let resp = self
            .http
            .get(&self.base_url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("start_date", start_date),
                ("end_date", end_date),
                ("daily", daily),
                ("timezone", self.timezone.clone()),
            ])
            .send()
            .await
            .map_err(|e| WeatherError::fetch(SERVICE, format!("request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| WeatherError::fetch(SERVICE, format!("failed to read body: {e}")))?;

        if !status.is_success() {
            return Err(WeatherError::fetch(
                SERVICE,
                format!("HTTP {status}: {}", truncate_body(&body)),
            ));
        }

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| WeatherError::fetch(SERVICE, format!("invalid JSON: {e}")))?;

        validate_shape(json)
    }
}

/// The payload must carry a `daily` object with a `time` array.
fn validate_shape(json: Value) -> Result<RawYearPayload, WeatherError> {
    let has_time_array = json
        .get("daily")
        .and_then(|d| d.get(TIME_COLUMN))
        .is_some_and(Value::is_array);
    if !has_time_array {
        return Err(WeatherError::fetch(
            SERVICE,
            "response lacks 'daily' data or its 'time' array",
        ));
    }
    serde_json::from_value(json)
        .map_err(|e| WeatherError::fetch(SERVICE, format!("unexpected payload shape: {e}")))
}

#[async_trait]
impl ArchiveSource for ArchiveClient {
    async fn fetch_year(
        &self,
        latitude: f64,
        longitude: f64,
        year: i32,
    ) -> Result<RawYearPayload, WeatherError> {
        let key = cache_key(&[
            "archive",
            &coord_key(latitude),
            &coord_key(longitude),
            &year.to_string(),
        ]);
        if let Some(hit) = get_typed::<RawYearPayload>(self.cache.as_ref(), &key).await {
            debug!(lat = latitude, lon = longitude, year, "Archive cache hit");
            return Ok(hit);
        }

        self.limiter.acquire().await;

        match self.request(latitude, longitude, year).await {
            Ok(payload) => {
                info!(lat = latitude, lon = longitude, year, "Fetched archive year");
                put_typed(self.cache.as_ref(), &key, &payload, self.ttl).await;
                Ok(payload)
            }
            Err(e) => {
                warn!(lat = latitude, lon = longitude, year, error = %e, "Archive fetch failed");
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::rate_limit::{CountingThrottle, Unthrottled};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ArchiveClient {
        let mut cfg = AppConfig::default();
        cfg.open_meteo.archive_url = format!("{}/v1/archive", server.uri());
        ArchiveClient::new(&cfg, Arc::new(MemoryCache::new()), Arc::new(Unthrottled)).unwrap()
    }

    fn sample_body() -> Value {
        json!({
            "daily": {
                "time": ["2023-01-01"],
                "temperature_2m_mean": [5.0],
                "precipitation_sum": [0.5]
            },
            "daily_units": {"temperature_2m_mean": "°C", "precipitation_sum": "mm"}
        })
    }

    #[tokio::test]
    async fn test_fetch_year_builds_full_year_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/archive"))
            .and(query_param("start_date", "2023-01-01"))
            .and(query_param("end_date", "2023-12-31"))
            .and(query_param("daily", "temperature_2m_mean,precipitation_sum"))
            .and(query_param("timezone", "GMT"))
            .and(query_param("latitude", "51.5"))
            .and(query_param("longitude", "-0.1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let payload = client.fetch_year(51.5, -0.1, 2023).await.unwrap();
        assert_eq!(payload, serde_json::from_value(sample_body()).unwrap());
    }

    #[tokio::test]
    async fn test_fetch_year_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let a = client.fetch_year(51.5, -0.1, 2023).await.unwrap();
        let b = client.fetch_year(51.5, -0.1, 2023).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_http_error_is_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_year(0.0, 0.0, 2022).await.unwrap_err();
        assert!(err.is_critical());
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_year(0.0, 0.0, 2022).await.unwrap_err();
        assert!(matches!(err, WeatherError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_missing_daily_is_fetch_failure_and_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"unexpected_structure": true})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert!(client.fetch_year(0.0, 0.0, 2022).await.is_err());
        assert!(client.fetch_year(0.0, 0.0, 2022).await.is_err());
    }

    #[tokio::test]
    async fn test_cache_hit_does_not_take_a_rate_limit_slot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .expect(2)
            .mount(&server)
            .await;

        let mut cfg = AppConfig::default();
        cfg.open_meteo.archive_url = format!("{}/v1/archive", server.uri());
        let limiter = Arc::new(CountingThrottle::default());
        let client =
            ArchiveClient::new(&cfg, Arc::new(MemoryCache::new()), limiter.clone()).unwrap();

        client.fetch_year(51.5, -0.1, 2023).await.unwrap();
        client.fetch_year(51.5, -0.1, 2023).await.unwrap();
        assert_eq!(limiter.calls(), 1);

        client.fetch_year(51.5, -0.1, 2022).await.unwrap();
        assert_eq!(limiter.calls(), 2);
    }

    #[test]
    fn test_validate_shape_requires_time_array() {
        assert!(validate_shape(json!({"daily": {"time": "2023-01-01"}})).is_err());
        assert!(validate_shape(json!({"daily": {}})).is_err());
        assert!(validate_shape(json!({"daily": null})).is_err());
        let ok = validate_shape(json!({"daily": {"time": []}})).unwrap();
        assert!(ok.daily_units.is_none());
    }
}
