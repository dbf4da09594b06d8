//! Fixtures shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use water_conditions_backend::clock::{Clock, ManualClock};
use water_conditions_backend::config::SchedulerConfig;
use water_conditions_backend::error::FetchError;
use water_conditions_backend::external::normalize::{normalize_current, ProviderCurrent};
use water_conditions_backend::external::{FetchedReading, WeatherSource};
use water_conditions_backend::models::{
    BackoffPolicy, ConditionThresholds, Coordinates, Location, Tenant,
};
use water_conditions_backend::services::{
    ConditionsService, MemoryStore, RefreshCoordinator, RefreshScheduler, RefreshSettings,
};

pub const API_KEY: &str = "widget-key-123";

// Helper to create Decimal from string
pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn tenant() -> Tenant {
    Tenant {
        id: Uuid::new_v4(),
        name: "Bay Paddle Co".to_string(),
        is_active: true,
    }
}

/// Location with a distinct latitude so fakes can script per-location results
pub fn location(tenant_id: Uuid, index: u32) -> Location {
    Location {
        id: Uuid::new_v4(),
        tenant_id,
        name: format!("Launch {}", index),
        water_body: Some("Grand Traverse Bay".to_string()),
        city: Some("Traverse City".to_string()),
        state: Some("MI".to_string()),
        coordinates: Coordinates::new(Decimal::from(40 + index), dec("-85.6206")),
        is_active: true,
        refresh_interval_minutes: 10,
        timezone: "America/Detroit".to_string(),
    }
}

pub fn reading(wind: &str, gust: &str) -> FetchedReading {
    let current = ProviderCurrent {
        temp_f: Some(dec("68")),
        temp_c: Some(dec("20")),
        wind_mph: Some(dec(wind)),
        gust_mph: Some(dec(gust)),
        wind_degree: Some(200.0),
        ..ProviderCurrent::default()
    };
    FetchedReading {
        reading: normalize_current(&current),
        raw: serde_json::json!({
            "current": { "temp_f": 68.0, "temp_c": 20.0, "wind_mph": wind, "gust_mph": gust }
        }),
    }
}

/// What the fake provider does on a call
#[derive(Clone, Debug)]
pub enum Behavior {
    Reading(FetchedReading),
    Fail(FetchError),
    /// Never answers within any sane timeout
    Hang,
    Panic,
}

/// Scripted weather source that counts its calls
pub struct FakeSource {
    default: Mutex<Behavior>,
    per_location: Mutex<HashMap<String, Behavior>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn new(default: Behavior) -> Self {
        Self::with_delay(default, Duration::ZERO)
    }

    pub fn with_delay(default: Behavior, delay: Duration) -> Self {
        Self {
            default: Mutex::new(default),
            per_location: Mutex::new(HashMap::new()),
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_default(&self, behavior: Behavior) {
        *self.default.lock().unwrap() = behavior;
    }

    pub fn set_for(&self, location: &Location, behavior: Behavior) {
        self.per_location
            .lock()
            .unwrap()
            .insert(location.coordinates.as_query(), behavior);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherSource for FakeSource {
    async fn fetch(&self, coordinates: Coordinates) -> Result<FetchedReading, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let behavior = self
            .per_location
            .lock()
            .unwrap()
            .get(&coordinates.as_query())
            .cloned()
            .unwrap_or_else(|| self.default.lock().unwrap().clone());

        match behavior {
            Behavior::Reading(reading) => Ok(reading),
            Behavior::Fail(err) => Err(err),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(FetchError::Network("gave up".to_string()))
            }
            Behavior::Panic => panic!("provider adapter bug"),
        }
    }
}

pub fn test_settings() -> RefreshSettings {
    RefreshSettings {
        thresholds: ConditionThresholds::default(),
        ttl: chrono::Duration::minutes(10),
        fetch_timeout: Duration::from_millis(100),
        backoff: BackoffPolicy::default(),
        rate_limit_spacing: Duration::ZERO,
    }
}

pub fn test_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        min_call_spacing_ms: 0,
        ..SchedulerConfig::default()
    }
}

/// Fully wired service over the in-memory store
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub source: Arc<FakeSource>,
    pub coordinator: Arc<RefreshCoordinator>,
    pub scheduler: RefreshScheduler,
    pub service: Arc<ConditionsService>,
    pub tenant: Tenant,
}

impl Harness {
    pub async fn new(source: FakeSource) -> Self {
        Self::with_scheduler_config(source, test_scheduler_config()).await
    }

    pub async fn with_scheduler_config(source: FakeSource, config: SchedulerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let source = Arc::new(source);
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let coordinator = Arc::new(RefreshCoordinator::new(
            source.clone(),
            store.clone(),
            store.clone(),
            dyn_clock.clone(),
            test_settings(),
        ));
        let scheduler =
            RefreshScheduler::new(coordinator.clone(), store.clone(), dyn_clock, config);
        let service = Arc::new(ConditionsService::new(
            store.clone(),
            store.clone(),
            coordinator.clone(),
        ));

        let tenant = tenant();
        store.insert_tenant(tenant.clone(), API_KEY).await;

        Self {
            store,
            clock,
            source,
            coordinator,
            scheduler,
            service,
            tenant,
        }
    }

    /// Register `count` active locations for the harness tenant
    pub async fn add_locations(&self, count: u32) -> Vec<Location> {
        let mut added = Vec::new();
        for index in 0..count {
            let location = location(self.tenant.id, index);
            self.store.insert_location(location.clone()).await;
            added.push(location);
        }
        added
    }
}
