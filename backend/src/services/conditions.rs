//! Serving facade for widget reads
//!
//! Fresh cache hit, else an on-demand refresh, else the last known sample
//! flagged as stale.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::cache::CacheStore;
use super::refresh::RefreshCoordinator;
use super::registry::LocationRegistry;
use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::models::{classify, Classification, ConditionThresholds, Location, Sample};

/// Everything the widget needs for one location
#[derive(Debug, Clone)]
pub struct ConditionsReport {
    pub location: Location,
    pub sample: Sample,
    /// Classification under the thresholds configured now, which may differ
    /// from the ones in force when the sample was stored
    pub classification: Classification,
    pub stale: bool,
    pub next_refresh_hint: DateTime<Utc>,
}

pub struct ConditionsService {
    registry: Arc<dyn LocationRegistry>,
    cache: Arc<dyn CacheStore>,
    coordinator: Arc<RefreshCoordinator>,
    clock: Arc<dyn Clock>,
    thresholds: ConditionThresholds,
}

impl ConditionsService {
    pub fn new(
        registry: Arc<dyn LocationRegistry>,
        cache: Arc<dyn CacheStore>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        let clock = Arc::clone(coordinator.clock());
        let thresholds = coordinator.settings().thresholds;
        Self {
            registry,
            cache,
            coordinator,
            clock,
            thresholds,
        }
    }

    /// Current conditions for an active location
    pub async fn get_conditions(&self, location_id: Uuid) -> AppResult<ConditionsReport> {
        let location = self
            .registry
            .get_active_location(location_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Location".to_string()))?;

        self.conditions_for(location).await
    }

    /// Resolve a tenant's location from its API key, then serve it. Without
    /// an explicit id the tenant's first active location is used.
    pub async fn get_conditions_for_api_key(
        &self,
        api_key: &str,
        location_id: Option<Uuid>,
    ) -> AppResult<ConditionsReport> {
        if api_key.trim().is_empty() {
            return Err(AppError::Unauthorized("API key required".to_string()));
        }

        let tenant = self
            .registry
            .find_tenant_by_api_key(api_key)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Invalid API key".to_string()))?;

        let locations = self.registry.active_locations_for_tenant(tenant.id).await?;
        let location = match location_id {
            Some(id) => locations.into_iter().find(|l| l.id == id),
            None => locations.into_iter().next(),
        }
        .ok_or_else(|| AppError::NotFound("Active location".to_string()))?;

        self.conditions_for(location).await
    }

    /// Storage connectivity for health checks
    pub async fn storage_ok(&self) -> bool {
        self.registry.ping().await.is_ok()
    }

    async fn conditions_for(&self, location: Location) -> AppResult<ConditionsReport> {
        let now = self.clock.now();

        match self.cache.get_fresh(location.id, now).await {
            Ok(Some(sample)) => return Ok(self.report(location, sample, false, now)),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    location_id = %location.id,
                    error = %err,
                    "Cache read failed, refreshing instead"
                );
            }
        }

        match self.coordinator.refresh(&location).await {
            Ok(sample) => Ok(self.report(location, sample, false, now)),
            Err(err) => {
                let latest = self.cache.get_latest(location.id).await?;
                match latest {
                    Some(sample) => {
                        tracing::warn!(
                            location_id = %location.id,
                            error = %err,
                            fetched_at = %sample.fetched_at,
                            "Refresh failed, serving stale conditions"
                        );
                        Ok(self.report(location, sample, true, now))
                    }
                    None => {
                        tracing::warn!(
                            location_id = %location.id,
                            error = %err,
                            "Refresh failed and no conditions were ever stored"
                        );
                        Err(AppError::NoConditions(location.id))
                    }
                }
            }
        }
    }

    fn report(
        &self,
        location: Location,
        sample: Sample,
        stale: bool,
        now: DateTime<Utc>,
    ) -> ConditionsReport {
        let classification = classify(
            sample.wind_speed_mph,
            sample.gust_speed_mph,
            sample.wave_height_ft,
            &self.thresholds,
        )
        .with_sky_note(sample.conditions_text.as_deref());

        let next_refresh_hint = if stale {
            now + location.refresh_interval()
        } else {
            sample.expires_at
        };

        ConditionsReport {
            location,
            sample,
            classification,
            stale,
            next_refresh_hint,
        }
    }
}
