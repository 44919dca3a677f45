//! Current conditions from the Open-Meteo forecast API.
//!
//! Requests only the `current` block for a one-day window, with the
//! timezone resolved from the coordinates. The numeric WMO weather code is
//! mapped to an icon identifier and a description through a fixed table.
//!
//! API: `https://api.open-meteo.com/v1/forecast`
//! Auth: None required.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{coord_key, http_client, truncate_body, CurrentSource};
use crate::cache::{cache_key, get_typed, put_typed, CacheStore};
use crate::config::AppConfig;
use crate::rate_limit::Throttle;
use crate::types::{CurrentConditions, WeatherError, DEFAULT_TEMP_UNIT, DEFAULT_WIND_UNIT};

const SERVICE: &str = "open-meteo forecast";

const CURRENT_METRICS: &str =
    "temperature_2m,relativehumidity_2m,windspeed_10m,winddirection_10m,weathercode";

// ---------------------------------------------------------------------------
// Weather codes
// ---------------------------------------------------------------------------

/// Icon used for codes missing from the table.
pub const UNKNOWN_ICON: &str = "unknown";

/// Description used for codes missing from the table.
pub const UNKNOWN_DESCRIPTION: &str = "Unknown";

/// A WMO weather code with its icon and description.
struct WeatherCode {
    code: i32,
    icon: &'static str,
    description: &'static str,
}

#[rustfmt::skip]
const WEATHER_CODES: &[WeatherCode] = &[
    WeatherCode { code: 0, icon: "clear", description: "Clear sky" },
    WeatherCode { code: 1, icon: "mostly-clear", description: "Mainly clear" },
    WeatherCode { code: 2, icon: "partly-cloudy", description: "Partly cloudy" },
    WeatherCode { code: 3, icon: "cloudy", description: "Overcast" },
    WeatherCode { code: 45, icon: "fog", description: "Fog" },
    WeatherCode { code: 48, icon: "fog", description: "Depositing rime fog" },
    WeatherCode { code: 51, icon: "drizzle", description: "Light drizzle" },
    WeatherCode { code: 53, icon: "drizzle", description: "Moderate drizzle" },
    WeatherCode { code: 55, icon: "drizzle", description: "Dense drizzle" },
    WeatherCode { code: 56, icon: "sleet", description: "Light freezing drizzle" },
    WeatherCode { code: 57, icon: "sleet", description: "Dense freezing drizzle" },
    WeatherCode { code: 61, icon: "rain", description: "Slight rain" },
    WeatherCode { code: 63, icon: "rain", description: "Moderate rain" },
    WeatherCode { code: 65, icon: "heavy-rain", description: "Heavy rain" },
    WeatherCode { code: 66, icon: "sleet", description: "Light freezing rain" },
    WeatherCode { code: 67, icon: "sleet", description: "Heavy freezing rain" },
    WeatherCode { code: 71, icon: "snow", description: "Slight snowfall" },
    WeatherCode { code: 73, icon: "snow", description: "Moderate snowfall" },
    WeatherCode { code: 75, icon: "snow", description: "Heavy snowfall" },
    WeatherCode { code: 77, icon: "snow", description: "Snow grains" },
    WeatherCode { code: 80, icon: "showers", description: "Slight rain showers" },
    WeatherCode { code: 81, icon: "showers", description: "Moderate rain showers" },
    WeatherCode { code: 82, icon: "heavy-rain", description: "Violent rain showers" },
    WeatherCode { code: 85, icon: "snow", description: "Slight snow showers" },
    WeatherCode { code: 86, icon: "snow", description: "Heavy snow showers" },
    WeatherCode { code: 95, icon: "thunderstorm", description: "Thunderstorm" },
    WeatherCode { code: 96, icon: "thunderstorm", description: "Thunderstorm with slight hail" },
    WeatherCode { code: 99, icon: "thunderstorm", description: "Thunderstorm with heavy hail" },
];

/// `(icon, description)` for a WMO code; unknown codes get the sentinel pair.
pub fn describe_weather_code(code: Option<i32>) -> (&'static str, &'static str) {
    code.and_then(|c| WEATHER_CODES.iter().find(|wc| wc.code == c))
        .map(|wc| (wc.icon, wc.description))
        .unwrap_or((UNKNOWN_ICON, UNKNOWN_DESCRIPTION))
}

// ---------------------------------------------------------------------------
// Compass
// ---------------------------------------------------------------------------

const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// One of 16 compass labels for a bearing in degrees.
///
/// Normalises to [0, 360), divides into 22.5° sectors, rounds to the
/// nearest sector and wraps 16 back to north.
pub fn compass_direction(degrees: f64) -> &'static str {
    let normalised = degrees.rem_euclid(360.0);
    let index = (normalised / 22.5).round() as usize % COMPASS_POINTS.len();
    COMPASS_POINTS[index]
}

// ---------------------------------------------------------------------------
// Open-Meteo response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    current: Option<CurrentBlock>,
    #[serde(default)]
    current_units: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    temperature_2m: Option<f64>,
    #[serde(default)]
    relativehumidity_2m: Option<f64>,
    #[serde(default)]
    windspeed_10m: Option<f64>,
    #[serde(default)]
    winddirection_10m: Option<f64>,
    #[serde(default)]
    weathercode: Option<i32>,
}

impl ForecastResponse {
    fn into_conditions(self) -> Result<CurrentConditions, WeatherError> {
        let current = self
            .current
            .ok_or_else(|| WeatherError::fetch(SERVICE, "response lacks 'current' block"))?;
        let (icon, description) = describe_weather_code(current.weathercode);
        let unit = |name: &str, default: &str| {
            self.current_units
                .get(name)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        Ok(CurrentConditions {
            temperature: current.temperature_2m,
            humidity: current.relativehumidity_2m,
            wind_speed: current.windspeed_10m,
            wind_direction: current.winddirection_10m,
            weather_code: current.weathercode,
            weather_icon: icon.to_string(),
            weather_description: description.to_string(),
            temp_unit: unit("temperature_2m", DEFAULT_TEMP_UNIT),
            wind_unit: unit("windspeed_10m", DEFAULT_WIND_UNIT),
            timestamp: current.time.unwrap_or_default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Cached, rate-limited current-conditions client.
pub struct ForecastClient {
    http: Client,
    base_url: String,
    cache: Arc<dyn CacheStore>,
    limiter: Arc<dyn Throttle>,
    ttl: Duration,
}

impl ForecastClient {
    pub fn new(
        cfg: &AppConfig,
        cache: Arc<dyn CacheStore>,
        limiter: Arc<dyn Throttle>,
    ) -> Result<Self, WeatherError> {
        let http = http_client(cfg.open_meteo.forecast_timeout(), "weather-comparer/0.1.0")?;
        Ok(Self {
            http,
            base_url: cfg.open_meteo.forecast_url.clone(),
            cache,
            limiter,
            ttl: cfg.cache.current_ttl(),
        })
    }

    async fn request(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<CurrentConditions, WeatherError> {
        let resp = self
            .http
            .get(&self.base_url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current", CURRENT_METRICS.to_string()),
                ("timezone", "auto".to_string()),
                ("forecast_days", "1".to_string()),
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

        let parsed: ForecastResponse = serde_json::from_str(&body)
            .map_err(|e| WeatherError::fetch(SERVICE, format!("invalid JSON: {e}")))?;
        parsed.into_conditions()
    }
}

#[async_trait]
impl CurrentSource for ForecastClient {
    async fn current(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<CurrentConditions, WeatherError> {
        let key = cache_key(&["current", &coord_key(latitude), &coord_key(longitude)]);
        if let Some(hit) = get_typed::<CurrentConditions>(self.cache.as_ref(), &key).await {
            debug!(lat = latitude, lon = longitude, "Current conditions cache hit");
            return Ok(hit);
        }

        self.limiter.acquire().await;

        let conditions = self.request(latitude, longitude).await.map_err(|e| {
            warn!(lat = latitude, lon = longitude, error = %e, "Current conditions fetch failed");
            e
        })?;
        put_typed(self.cache.as_ref(), &key, &conditions, self.ttl).await;
        Ok(conditions)
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

    #[test]
    fn test_compass_cardinal_points() {
        assert_eq!(compass_direction(0.0), "N");
        assert_eq!(compass_direction(45.0), "NE");
        assert_eq!(compass_direction(90.0), "E");
        assert_eq!(compass_direction(180.0), "S");
        assert_eq!(compass_direction(270.0), "W");
    }

    #[test]
    fn test_compass_wraps_to_north() {
        assert_eq!(compass_direction(359.0), "N");
        assert_eq!(compass_direction(360.0), "N");
        assert_eq!(compass_direction(-10.0), "N");
        assert_eq!(compass_direction(720.0 + 45.0), "NE");
    }

    #[test]
    fn test_compass_sector_rounding() {
        // 190 / 22.5 = 8.44, rounds to sector 8.
        assert_eq!(compass_direction(190.0), "S");
        // 200 / 22.5 = 8.89, rounds to sector 9.
        assert_eq!(compass_direction(200.0), "SSW");
        assert_eq!(compass_direction(11.0), "N");
        assert_eq!(compass_direction(12.0), "NNE");
        assert_eq!(compass_direction(337.5), "NNW");
    }

    #[test]
    fn test_weather_code_lookup() {
        assert_eq!(describe_weather_code(Some(0)), ("clear", "Clear sky"));
        assert_eq!(describe_weather_code(Some(3)), ("cloudy", "Overcast"));
        assert_eq!(describe_weather_code(Some(95)).0, "thunderstorm");
    }

    #[test]
    fn test_unknown_weather_code_is_sentinel() {
        assert_eq!(describe_weather_code(Some(42)), (UNKNOWN_ICON, UNKNOWN_DESCRIPTION));
        assert_eq!(describe_weather_code(Some(-1)), (UNKNOWN_ICON, UNKNOWN_DESCRIPTION));
        assert_eq!(describe_weather_code(None), (UNKNOWN_ICON, UNKNOWN_DESCRIPTION));
    }

    fn client_for(server: &MockServer) -> ForecastClient {
        let mut cfg = AppConfig::default();
        cfg.open_meteo.forecast_url = format!("{}/v1/forecast", server.uri());
        ForecastClient::new(&cfg, Arc::new(MemoryCache::new()), Arc::new(Unthrottled)).unwrap()
    }

    fn sample_body() -> serde_json::Value {
        json!({
            "current": {
                "time": "2024-05-01T14:00",
                "temperature_2m": 17.3,
                "relativehumidity_2m": 62,
                "windspeed_10m": 11.2,
                "winddirection_10m": 225,
                "weathercode": 2
            },
            "current_units": {
                "temperature_2m": "°C",
                "windspeed_10m": "km/h"
            }
        })
    }

    #[tokio::test]
    async fn test_current_success_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("timezone", "auto"))
            .and(query_param("forecast_days", "1"))
            .and(query_param("current", CURRENT_METRICS))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let c = client.current(48.85, 2.35).await.unwrap();
        assert_eq!(c.temperature, Some(17.3));
        assert_eq!(c.humidity, Some(62.0));
        assert_eq!(c.wind_direction, Some(225.0));
        assert_eq!(c.weather_code, Some(2));
        assert_eq!(c.weather_icon, "partly-cloudy");
        assert_eq!(c.weather_description, "Partly cloudy");
        assert_eq!(c.wind_unit, "km/h");
        assert_eq!(c.timestamp, "2024-05-01T14:00");

        let again = client.current(48.85, 2.35).await.unwrap();
        assert_eq!(c, again);
    }

    #[tokio::test]
    async fn test_cache_hit_does_not_take_a_rate_limit_slot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .expect(1)
            .mount(&server)
            .await;

        let mut cfg = AppConfig::default();
        cfg.open_meteo.forecast_url = format!("{}/v1/forecast", server.uri());
        let limiter = Arc::new(CountingThrottle::default());
        let client =
            ForecastClient::new(&cfg, Arc::new(MemoryCache::new()), limiter.clone()).unwrap();

        client.current(48.85, 2.35).await.unwrap();
        client.current(48.85, 2.35).await.unwrap();
        assert_eq!(limiter.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_code_and_default_units() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "current": {"time": "2024-05-01T14:00", "temperature_2m": 1.0, "weathercode": 123}
            })))
            .mount(&server)
            .await;

        let c = client_for(&server).current(0.0, 0.0).await.unwrap();
        assert_eq!(c.weather_icon, UNKNOWN_ICON);
        assert_eq!(c.weather_description, UNKNOWN_DESCRIPTION);
        assert_eq!(c.temp_unit, "°C");
        assert_eq!(c.wind_unit, "km/h");
        assert_eq!(c.wind_speed, None);
    }

    #[tokio::test]
    async fn test_missing_current_block_is_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hourly": {}})))
            .mount(&server)
            .await;

        let err = client_for(&server).current(0.0, 0.0).await.unwrap_err();
        assert!(err.is_critical());
    }

    #[tokio::test]
    async fn test_http_error_is_fetch_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"reason": "bad lat"})))
            .mount(&server)
            .await;

        let err = client_for(&server).current(999.0, 0.0).await.unwrap_err();
        assert!(err.to_string().contains("400"));
    }
}
