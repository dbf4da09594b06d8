//! Configuration management for the water conditions service
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with WCS_ prefix

use std::time::Duration;

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use shared::{BackoffPolicy, ConditionThresholds};
use validator::Validate;

/// Main application configuration
#[derive(Debug, Deserialize, Clone, Validate)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Which store backs the registry, cache and refresh bookkeeping
    pub storage: StorageConfig,

    /// Weather provider configuration
    #[validate]
    pub weather: WeatherConfig,

    /// Sample cache configuration
    #[validate]
    pub cache: CacheConfig,

    /// Refresh scheduler configuration
    #[validate]
    pub scheduler: SchedulerConfig,

    /// Condition classification thresholds
    pub thresholds: ConditionThresholds,

    /// Log output configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    /// Empty, non-persistent store for local runs; refused in production
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct WeatherConfig {
    /// Weather API endpoint
    #[validate(url)]
    pub api_endpoint: String,

    /// Weather API key
    pub api_key: String,

    /// Per-call timeout in seconds
    #[validate(range(min = 1, max = 60))]
    pub timeout_secs: u32,
}

impl WeatherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_secs))
    }
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct CacheConfig {
    /// How long a fetched sample counts as fresh
    #[validate(range(min = 1, max = 1440))]
    pub ttl_minutes: i32,
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.ttl_minutes))
    }
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks
    #[validate(range(min = 1))]
    pub tick_interval_secs: u32,

    /// Maximum locations refreshed in one tick
    #[validate(range(min = 1, max = 1000))]
    pub batch_size: u32,

    /// Concurrent fetches per tick
    #[validate(range(min = 1, max = 32))]
    pub worker_pool_size: u32,

    /// Pause each worker takes between its own calls
    pub min_call_spacing_ms: u32,

    /// Provider's published rate limit, never exceeded
    #[validate(range(min = 1))]
    pub rate_limit_per_minute: u32,

    /// Interval growth for locations that keep failing
    pub backoff: BackoffPolicy,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.tick_interval_secs))
    }

    pub fn min_call_spacing(&self) -> Duration {
        Duration::from_millis(u64::from(self.min_call_spacing_ms))
    }

    /// Minimum gap between any two upstream calls
    pub fn rate_limit_spacing(&self) -> Duration {
        Duration::from_millis(60_000 / u64::from(self.rate_limit_per_minute.max(1)))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            batch_size: 50,
            worker_pool_size: 4,
            min_call_spacing_ms: 100,
            rate_limit_per_minute: 60,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("WCS_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.url", "postgres://localhost/water_conditions")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("storage.backend", "postgres")?
            .set_default("weather.api_endpoint", "https://api.weatherapi.com/v1")?
            .set_default("weather.api_key", "")?
            .set_default("weather.timeout_secs", 5)?
            .set_default("cache.ttl_minutes", 10)?
            .set_default("scheduler.tick_interval_secs", 60)?
            .set_default("scheduler.batch_size", 50)?
            .set_default("scheduler.worker_pool_size", 4)?
            .set_default("scheduler.min_call_spacing_ms", 100)?
            .set_default("scheduler.rate_limit_per_minute", 60)?
            .set_default("scheduler.backoff.failure_threshold", 10)?
            .set_default("scheduler.backoff.max_multiplier", 4)?
            .set_default("thresholds.beginner_wind_max", "10")?
            .set_default("thresholds.intermediate_wind_max", "18")?
            .set_default("thresholds.beginner_wave_max", "1.5")?
            .set_default("thresholds.intermediate_wave_max", "3.5")?
            .set_default("logging.format", "pretty")?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (WCS prefix)
            .add_source(
                Environment::with_prefix("WCS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.check()?;
        Ok(config)
    }

    /// Field-level and cross-field validation
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;
        shared::validate_thresholds(&self.thresholds)
            .map_err(|e| ConfigError::Message(format!("invalid thresholds: {}", e)))?;
        if self.storage.backend == StorageBackend::Postgres && self.database.url.is_empty() {
            return Err(ConfigError::Message("database.url is required for postgres storage".into()));
        }
        if self.storage.backend == StorageBackend::Memory && self.environment == "production" {
            return Err(ConfigError::Message("memory storage is for development and tests only".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_spacing() {
        let scheduler = SchedulerConfig {
            rate_limit_per_minute: 60,
            ..SchedulerConfig::default()
        };
        assert_eq!(scheduler.rate_limit_spacing(), Duration::from_secs(1));

        let fast = SchedulerConfig {
            rate_limit_per_minute: 600,
            ..SchedulerConfig::default()
        };
        assert_eq!(fast.rate_limit_spacing(), Duration::from_millis(100));
    }

    #[test]
    fn test_scheduler_defaults_validate() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_defaults_load() {
        let config = Config::load().unwrap();
        assert_eq!(config.cache.ttl(), chrono::Duration::minutes(10));
        assert_eq!(config.weather.timeout(), Duration::from_secs(5));
        assert_eq!(config.thresholds, ConditionThresholds::default());
        assert_eq!(config.scheduler.backoff, BackoffPolicy::default());
    }

    #[test]
    fn test_memory_storage_rejected_in_production() {
        let mut config = Config::load().unwrap();
        config.storage.backend = StorageBackend::Memory;
        config.environment = "development".to_string();
        assert!(config.check().is_ok());

        config.environment = "production".to_string();
        assert!(config.check().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let scheduler = SchedulerConfig {
            worker_pool_size: 0,
            ..SchedulerConfig::default()
        };
        assert!(scheduler.validate().is_err());
    }
}
