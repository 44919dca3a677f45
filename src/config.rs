//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section has defaults, so a partial file (or no file at all) yields the
//! reference behaviour. Identity values for the geocoder are referenced by
//! env-var name in the config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::engine::multi_year::DEFAULT_NUM_YEARS;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub geocoding: GeocodingConfig,
    pub open_meteo: OpenMeteoConfig,
    pub cache: CacheConfig,
    pub comparison: ComparisonConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeocodingConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Env var holding the application name sent in the User-Agent.
    pub app_name_env: String,
    /// Env var holding the contact e-mail sent in the User-Agent.
    pub contact_email_env: String,
    pub calls_limit: usize,
    pub period_secs: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            timeout_secs: 10,
            app_name_env: "NOMINATIM_USER_AGENT_APP_NAME".to_string(),
            contact_email_env: "NOMINATIM_USER_AGENT_EMAIL".to_string(),
            // Nominatim usage policy: at most one request per second.
            calls_limit: 1,
            period_secs: 1,
        }
    }
}

impl GeocodingConfig {
    /// `"{app}/1.0 ({email})"`, falling back to anonymous defaults.
    pub fn user_agent(&self) -> String {
        let app = AppConfig::resolve_env(&self.app_name_env)
            .unwrap_or_else(|_| "DefaultWeatherApp".to_string());
        let email = AppConfig::resolve_env(&self.contact_email_env)
            .unwrap_or_else(|_| "anonymous_user@example.com".to_string());
        format!("{app}/1.0 ({email})")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OpenMeteoConfig {
    pub archive_url: String,
    pub forecast_url: String,
    pub archive_timeout_secs: u64,
    pub forecast_timeout_secs: u64,
    /// Timezone the archive aligns daily buckets to.
    pub timezone: String,
    /// Shared quota for archive and forecast calls.
    pub calls_limit: usize,
    pub period_secs: u64,
}

impl Default for OpenMeteoConfig {
    fn default() -> Self {
        Self {
            archive_url: "https://archive-api.open-meteo.com/v1/archive".to_string(),
            forecast_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            archive_timeout_secs: 20,
            forecast_timeout_secs: 10,
            timezone: "GMT".to_string(),
            calls_limit: 10,
            period_secs: 60,
        }
    }
}

impl OpenMeteoConfig {
    pub fn archive_timeout(&self) -> Duration {
        Duration::from_secs(self.archive_timeout_secs)
    }

    pub fn forecast_timeout(&self) -> Duration {
        Duration::from_secs(self.forecast_timeout_secs)
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub geocode_ttl_secs: u64,
    pub weather_ttl_secs: u64,
    /// Multi-year results live this many times longer than annual ones.
    pub multi_year_factor: u32,
    pub current_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            geocode_ttl_secs: 7 * 24 * 60 * 60,
            weather_ttl_secs: 24 * 60 * 60,
            multi_year_factor: 7,
            current_ttl_secs: 10 * 60,
        }
    }
}

impl CacheConfig {
    pub fn geocode_ttl(&self) -> Duration {
        Duration::from_secs(self.geocode_ttl_secs)
    }

    pub fn weather_ttl(&self) -> Duration {
        Duration::from_secs(self.weather_ttl_secs)
    }

    pub fn multi_year_ttl(&self) -> Duration {
        self.weather_ttl() * self.multi_year_factor
    }

    pub fn current_ttl(&self) -> Duration {
        Duration::from_secs(self.current_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Cities processed concurrently.
    pub workers: usize,
    /// Years in the multi-year averaging window.
    pub num_years: u32,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            num_years: DEFAULT_NUM_YEARS,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Invalid TOML")?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
