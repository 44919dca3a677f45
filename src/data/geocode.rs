//! Forward geocoding: city name → coordinates.
//!
//! Uses Nominatim (OpenStreetMap) `search`, free with no key but subject to
//! a usage policy: identify yourself in the User-Agent and stay under one
//! request per second.
//!
//! API: `https://nominatim.openstreetmap.org/search?q=…&format=json&limit=1`
//! Auth: None; User-Agent required.
//! Rate limit: 1 req/s.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{http_client, Geocoder};
use crate::cache::{cache_key, get_typed, put_typed, CacheStore};
use crate::config::AppConfig;
use crate::rate_limit::Throttle;
use crate::types::{Coordinates, GeocodeFailure, WeatherError};

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: String,
}

/// Cached, rate-limited Nominatim client.
pub struct GeocodingClient {
    http: Client,
    base_url: String,
    cache: Arc<dyn CacheStore>,
    limiter: Arc<dyn Throttle>,
    ttl: Duration,
}

impl GeocodingClient {
    pub fn new(
        cfg: &AppConfig,
        cache: Arc<dyn CacheStore>,
        limiter: Arc<dyn Throttle>,
    ) -> Result<Self, WeatherError> {
        let http = http_client(cfg.geocoding.timeout(), &cfg.geocoding.user_agent())?;
        Ok(Self {
            http,
            base_url: cfg.geocoding.base_url.trim_end_matches('/').to_string(),
            cache,
            limiter,
            ttl: cfg.cache.geocode_ttl(),
        })
    }

    /// Single request, no retries.
    async fn lookup(&self, query: &str) -> Result<Coordinates, GeocodeFailure> {
        let url = format!(
            "{}/search?q={}&format=json&limit=1",
            self.base_url,
            urlencoding::encode(query)
        );
        debug!(url = %url, "Geocoding request");

        let resp = self.http.get(&url).send().await.map_err(classify_transport)?;

        let status = resp.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeFailure::Unavailable);
        }
        if !status.is_success() {
            return Err(GeocodeFailure::Transport(format!("HTTP {status}")));
        }

        let places: Vec<NominatimPlace> = resp
            .json()
            .await
            .map_err(|e| GeocodeFailure::Transport(format!("invalid response: {e}")))?;

        let place = places.into_iter().next().ok_or(GeocodeFailure::NoMatch)?;
        let latitude = parse_degrees(&place.lat)?;
        let longitude = parse_degrees(&place.lon)?;

        Ok(Coordinates {
            latitude,
            longitude,
            address: place.display_name,
        })
    }
}

#[async_trait]
impl Geocoder for GeocodingClient {
    async fn resolve(&self, city_name: &str) -> Result<Coordinates, WeatherError> {
        let query = city_name.trim();
        if query.is_empty() {
            debug!("Empty city name, skipping geocoder");
            return Err(WeatherError::NotFound {
                query: city_name.to_string(),
                reason: GeocodeFailure::EmptyQuery,
            });
        }

        let key = cache_key(&["geocode", query]);
        if let Some(hit) = get_typed::<Coordinates>(self.cache.as_ref(), &key).await {
            debug!(city = query, "Geocode cache hit");
            return Ok(hit);
        }

        self.limiter.acquire().await;

        match self.lookup(query).await {
            Ok(coords) => {
                info!(
                    city = query,
                    lat = coords.latitude,
                    lon = coords.longitude,
                    "Geocoded"
                );
                put_typed(self.cache.as_ref(), &key, &coords, self.ttl).await;
                Ok(coords)
            }
            Err(reason) => {
                match &reason {
                    GeocodeFailure::NoMatch => info!(city = query, "No geocoding match"),
                    other => warn!(city = query, reason = %other, "Geocoding failed"),
                }
                Err(WeatherError::NotFound {
                    query: query.to_string(),
                    reason,
                })
            }
        }
    }
}

fn classify_transport(e: reqwest::Error) -> GeocodeFailure {
    if e.is_timeout() {
        GeocodeFailure::Timeout
    } else if e.is_connect() {
        GeocodeFailure::Unavailable
    } else {
        GeocodeFailure::Transport(e.to_string())
    }
}

fn parse_degrees(raw: &str) -> Result<f64, GeocodeFailure> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| GeocodeFailure::Transport(format!("unparseable coordinate '{raw}'")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::rate_limit::{CountingThrottle, Unthrottled};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, timeout_secs: u64) -> GeocodingClient {
        let mut cfg = AppConfig::default();
        cfg.geocoding.base_url = server.uri();
        cfg.geocoding.timeout_secs = timeout_secs;
        GeocodingClient::new(&cfg, Arc::new(MemoryCache::new()), Arc::new(Unthrottled)).unwrap()
    }

    fn london() -> serde_json::Value {
        serde_json::json!([{
            "lat": "51.5073219",
            "lon": "-0.1276474",
            "display_name": "London, Greater London, England, United Kingdom"
        }])
    }

    #[tokio::test]
    async fn test_resolve_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "London"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(london()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        let coords = client.resolve("London").await.unwrap();
        assert!((coords.latitude - 51.5073219).abs() < 1e-9);
        assert!((coords.longitude + 0.1276474).abs() < 1e-9);
        assert!(coords.address.starts_with("London"));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network_and_normalises_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(london()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        let first = client.resolve("london").await.unwrap();
        let second = client.resolve("  LONDON ").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_blank_name_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(london()))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        let err = client.resolve("   ").await.unwrap_err();
        assert!(matches!(
            err,
            WeatherError::NotFound { reason: GeocodeFailure::EmptyQuery, .. }
        ));
    }

    #[tokio::test]
    async fn test_no_match_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        let err = client.resolve("NonExistentCity123XYZ").await.unwrap_err();
        assert!(matches!(
            err,
            WeatherError::NotFound { reason: GeocodeFailure::NoMatch, .. }
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        let err = client.resolve("Paris").await.unwrap_err();
        assert!(matches!(
            err,
            WeatherError::NotFound { reason: GeocodeFailure::Unavailable, .. }
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(london())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, 1);
        let err = client.resolve("London").await.unwrap_err();
        assert!(matches!(
            err,
            WeatherError::NotFound { reason: GeocodeFailure::Timeout, .. }
        ));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server, 10);
        assert!(client.resolve("Nowhere").await.is_err());
        assert!(client.resolve("Nowhere").await.is_err());
    }

    #[tokio::test]
    async fn test_cache_hit_does_not_take_a_rate_limit_slot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(london()))
            .expect(1)
            .mount(&server)
            .await;

        let mut cfg = AppConfig::default();
        cfg.geocoding.base_url = server.uri();
        let limiter = Arc::new(CountingThrottle::default());
        let client =
            GeocodingClient::new(&cfg, Arc::new(MemoryCache::new()), limiter.clone()).unwrap();

        client.resolve("London").await.unwrap();
        client.resolve("London").await.unwrap();
        assert_eq!(limiter.calls(), 1);

        // Blank names never reach the limiter either.
        assert!(client.resolve(" ").await.is_err());
        assert_eq!(limiter.calls(), 1);
    }

    #[test]
    fn test_parse_degrees() {
        assert_eq!(parse_degrees(" 48.85 ").unwrap(), 48.85);
        assert!(parse_degrees("north").is_err());
    }
}
