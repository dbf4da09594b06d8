//! Refresh pipeline shared by the scheduler and on-demand reads
//!
//! fetch -> classify -> cache put -> refresh-state update, with at most one
//! flight per location at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use super::cache::CacheStore;
use super::refresh_state::RefreshStateStore;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{AppError, FetchError};
use crate::external::WeatherSource;
use crate::models::{classify, BackoffPolicy, ConditionThresholds, Location, NewSample, Sample};

/// Why a refresh produced no new sample
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("failed to store sample: {0}")]
    Storage(String),
}

impl From<RefreshError> for AppError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::Fetch(e) => AppError::Fetch(e),
            RefreshError::InvalidLocation(msg) => AppError::ValidationError(msg),
            RefreshError::Storage(msg) => AppError::Internal(msg),
        }
    }
}

type FlightResult = Result<Sample, RefreshError>;

/// Tunables for the pipeline
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub thresholds: ConditionThresholds,
    pub ttl: chrono::Duration,
    pub fetch_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub rate_limit_spacing: Duration,
}

impl RefreshSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            thresholds: config.thresholds,
            ttl: config.cache.ttl(),
            fetch_timeout: config.weather.timeout(),
            backoff: config.scheduler.backoff,
            rate_limit_spacing: config.scheduler.rate_limit_spacing(),
        }
    }
}

/// Spaces upstream calls so the provider's published rate is never exceeded
pub struct RateLimiter {
    min_interval: Duration,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_tick: AsyncMutex::new(None),
        }
    }

    /// Wait for the next free slot. Callers are served in lock order.
    pub async fn wait(&self) {
        let mut guard = self.last_tick.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}

/// Runs refreshes and collapses concurrent requests for the same location
pub struct RefreshCoordinator {
    source: Arc<dyn WeatherSource>,
    cache: Arc<dyn CacheStore>,
    states: Arc<dyn RefreshStateStore>,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    settings: RefreshSettings,
    // guards map access only; never held across an await
    in_flight: Mutex<HashMap<Uuid, Arc<OnceCell<FlightResult>>>>,
    // earliest next attempt for locations whose refresh state write failed
    deferred: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl RefreshCoordinator {
    pub fn new(
        source: Arc<dyn WeatherSource>,
        cache: Arc<dyn CacheStore>,
        states: Arc<dyn RefreshStateStore>,
        clock: Arc<dyn Clock>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            source,
            cache,
            states,
            clock,
            limiter: RateLimiter::new(settings.rate_limit_spacing),
            settings,
            in_flight: Mutex::new(HashMap::new()),
            deferred: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Whether a refresh for this location is currently running
    pub fn is_in_flight(&self, location_id: Uuid) -> bool {
        self.lock_in_flight().contains_key(&location_id)
    }

    /// If the last attempt for this location could not be recorded, the
    /// instant before which it must not be attempted again
    pub fn deferred_until(&self, location_id: Uuid, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut deferred = self.lock_deferred();
        match deferred.get(&location_id).copied() {
            Some(until) if now < until => Some(until),
            Some(_) => {
                deferred.remove(&location_id);
                None
            }
            None => None,
        }
    }

    /// Refresh one location. Callers arriving while a refresh for the same
    /// location is running wait for it and receive the same result.
    pub async fn refresh(&self, location: &Location) -> Result<Sample, RefreshError> {
        let flight = {
            let mut in_flight = self.lock_in_flight();
            in_flight
                .entry(location.id)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = flight.get_or_init(|| self.run_pipeline(location)).await.clone();

        let mut in_flight = self.lock_in_flight();
        if in_flight
            .get(&location.id)
            .map(|current| Arc::ptr_eq(current, &flight))
            .unwrap_or(false)
        {
            in_flight.remove(&location.id);
        }

        result
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<OnceCell<FlightResult>>>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_deferred(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, DateTime<Utc>>> {
        self.deferred.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_outcome(&self, location_id: Uuid, recorded: bool, next_attempt: DateTime<Utc>) {
        let mut deferred = self.lock_deferred();
        if recorded {
            deferred.remove(&location_id);
        } else {
            deferred.insert(location_id, next_attempt);
        }
    }

    async fn run_pipeline(&self, location: &Location) -> FlightResult {
        let interval = location.refresh_interval();

        if let Err(reason) = shared::validate_location(location) {
            let attempted_at = self.clock.now();
            self.persist_failure(location, attempted_at, reason).await;
            return Err(RefreshError::InvalidLocation(reason.to_string()));
        }

        // a flight that finished just before this one may already have
        // stored a sample within the refresh interval
        let now = self.clock.now();
        match self.cache.get_fresh(location.id, now).await {
            Ok(Some(sample)) if now < sample.fetched_at + interval => {
                tracing::debug!(
                    location_id = %location.id,
                    fetched_at = %sample.fetched_at,
                    "Reusing recently refreshed sample"
                );
                return Ok(sample);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(location_id = %location.id, error = %err, "Freshness check failed");
            }
        }

        self.limiter.wait().await;

        let attempted_at = self.clock.now();
        let started = Utc::now();
        let fetched = match tokio::time::timeout(
            self.settings.fetch_timeout,
            self.source.fetch(location.coordinates),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Network(format!(
                "request timed out after {}ms",
                self.settings.fetch_timeout.as_millis()
            ))),
        };

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(err) => {
                tracing::warn!(
                    location_id = %location.id,
                    kind = err.kind(),
                    error = %err,
                    "Weather fetch failed"
                );
                self.persist_failure(location, attempted_at, &err.to_string()).await;
                return Err(err.into());
            }
        };

        let reading = fetched.reading;
        if !reading.data_quality.is_empty() {
            tracing::warn!(
                location_id = %location.id,
                data_quality = ?reading.data_quality,
                "Provider payload needed correction"
            );
        }

        let classification = classify(
            reading.wind_speed_mph,
            reading.gust_speed_mph,
            reading.wave_height_ft,
            &self.settings.thresholds,
        )
        .with_sky_note(reading.conditions_text.as_deref());

        let new_sample = NewSample {
            location_id: location.id,
            wind_speed_mph: reading.wind_speed_mph,
            gust_speed_mph: reading.gust_speed_mph,
            wind_direction_deg: reading.wind_direction_deg,
            wind_direction: reading.wind_direction,
            wave_height_ft: reading.wave_height_ft,
            air_temperature_f: reading.air_temperature_f,
            conditions_text: reading.conditions_text,
            tier: classification.tier,
            rationale: classification.rationale,
            data_quality: reading.data_quality,
            raw_payload: fetched.raw,
            fetched_at: self.clock.now(),
        };

        let sample = match self.cache.put(location.id, new_sample, self.settings.ttl).await {
            Ok(sample) => sample,
            Err(err) => {
                tracing::error!(location_id = %location.id, error = %err, "Failed to cache sample");
                self.persist_failure(location, attempted_at, &err.to_string()).await;
                return Err(RefreshError::Storage(err.to_string()));
            }
        };

        let recorded = match self
            .states
            .record_success(location.id, attempted_at, interval)
            .await
        {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(location_id = %location.id, error = %err, "Failed to record refresh success");
                false
            }
        };
        self.record_outcome(location.id, recorded, attempted_at + interval);

        tracing::debug!(
            location_id = %location.id,
            tier = %sample.tier,
            elapsed_ms = (Utc::now() - started).num_milliseconds(),
            "Location refreshed"
        );

        Ok(sample)
    }

    async fn persist_failure(&self, location: &Location, attempted_at: DateTime<Utc>, error: &str) {
        let interval = location.refresh_interval();
        let recorded = match self
            .states
            .record_failure(location.id, attempted_at, interval, error, &self.settings.backoff)
            .await
        {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(location_id = %location.id, error = %err, "Failed to record refresh failure");
                false
            }
        };
        self.record_outcome(location.id, recorded, attempted_at + interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_spaces_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(40));
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_rate_limiter_first_call_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let start = Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_refresh_error_maps_to_app_error() {
        let err: AppError = RefreshError::Fetch(FetchError::Parse("bad".into())).into();
        assert!(matches!(err, AppError::Fetch(FetchError::Parse(_))));

        let err: AppError = RefreshError::Storage("down".into()).into();
        assert!(matches!(err, AppError::Internal(_)));
    }
}
