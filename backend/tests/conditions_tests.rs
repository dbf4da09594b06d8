//! Serving facade tests
//!
//! Tests for widget reads including:
//! - Fresh hits without provider calls
//! - Single-flight refreshes on concurrent misses
//! - Stale fallback and the never-fetched case

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{location, reading, start_time, test_settings, Behavior, FakeSource, Harness, API_KEY};
use uuid::Uuid;
use water_conditions_backend::clock::{Clock, ManualClock};
use water_conditions_backend::error::{AppError, AppResult, FetchError};
use water_conditions_backend::models::{ConditionTier, NewSample, Sample};
use water_conditions_backend::services::{
    CacheStore, ConditionsService, MemoryStore, RefreshCoordinator, RefreshStateStore,
};

#[tokio::test]
async fn test_fresh_hit_skips_provider() {
    let harness = Harness::new(FakeSource::new(Behavior::Reading(reading("6", "8")))).await;
    let location = harness.add_locations(1).await.remove(0);

    harness.scheduler.tick().await.unwrap();
    harness.clock.advance(ChronoDuration::minutes(5));

    let report = harness.service.get_conditions(location.id).await.unwrap();
    assert!(!report.stale);
    assert_eq!(report.next_refresh_hint, report.sample.expires_at);
    assert_eq!(harness.source.calls(), 1);
}

#[tokio::test]
async fn test_miss_refreshes_on_demand() {
    let harness = Harness::new(FakeSource::new(Behavior::Reading(reading("14", "15")))).await;
    let location = harness.add_locations(1).await.remove(0);

    let report = harness.service.get_conditions(location.id).await.unwrap();

    assert!(!report.stale);
    assert_eq!(report.classification.tier, ConditionTier::Moderate);
    assert_eq!(report.sample.fetched_at, start_time());
    assert_eq!(harness.source.calls(), 1);

    // the on-demand path updates refresh bookkeeping like the scheduler does
    let state = harness.store.get(location.id).await.unwrap().unwrap();
    assert_eq!(state.next_due_at, start_time() + ChronoDuration::minutes(10));
}

#[tokio::test]
async fn test_concurrent_misses_share_one_fetch() {
    // slow enough for every caller to arrive, well inside the 100ms fetch timeout
    let source = FakeSource::with_delay(Behavior::Reading(reading("6", "8")), Duration::from_millis(60));
    let harness = Harness::new(source).await;
    let location = harness.add_locations(1).await.remove(0);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = harness.service.clone();
        let id = location.id;
        handles.push(tokio::spawn(async move { service.get_conditions(id).await }));
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(harness.coordinator.is_in_flight(location.id));

    let mut sample_ids = Vec::new();
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert!(!report.stale);
        sample_ids.push(report.sample.id);
    }

    assert_eq!(harness.source.calls(), 1);
    assert!(sample_ids.iter().all(|id| *id == sample_ids[0]));
    assert!(!harness.coordinator.is_in_flight(location.id));
}

#[tokio::test]
async fn test_concurrent_failures_share_one_error() {
    let source = FakeSource::with_delay(
        Behavior::Fail(FetchError::Network("connection reset".to_string())),
        Duration::from_millis(60),
    );
    let harness = Harness::new(source).await;
    let location = harness.add_locations(1).await.remove(0);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let coordinator = harness.coordinator.clone();
        let location = location.clone();
        handles.push(tokio::spawn(async move { coordinator.refresh(&location).await }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_err());
    }

    assert_eq!(harness.source.calls(), 1);
    let state = harness.store.get(location.id).await.unwrap().unwrap();
    assert_eq!(state.consecutive_failures, 1);
}

#[tokio::test]
async fn test_failed_refresh_serves_stale_sample() {
    let harness = Harness::new(FakeSource::new(Behavior::Reading(reading("6", "8")))).await;
    let location = harness.add_locations(1).await.remove(0);

    let first = harness.service.get_conditions(location.id).await.unwrap();

    harness
        .source
        .set_default(Behavior::Fail(FetchError::Upstream { status: 500, body: String::new() }));
    harness.clock.advance(ChronoDuration::minutes(15));

    let report = harness.service.get_conditions(location.id).await.unwrap();
    assert!(report.stale);
    assert_eq!(report.sample.id, first.sample.id);
    assert_eq!(
        report.next_refresh_hint,
        start_time() + ChronoDuration::minutes(25)
    );
}

#[tokio::test]
async fn test_never_fetched_and_failing_is_no_conditions() {
    let harness = Harness::new(FakeSource::new(Behavior::Fail(FetchError::Parse(
        "garbage".to_string(),
    ))))
    .await;
    let location = harness.add_locations(1).await.remove(0);

    let err = harness.service.get_conditions(location.id).await.unwrap_err();
    assert!(matches!(err, AppError::NoConditions(id) if id == location.id));
}

#[tokio::test]
async fn test_unknown_or_inactive_location_is_not_found() {
    let harness = Harness::new(FakeSource::new(Behavior::Reading(reading("6", "8")))).await;
    let mut location = harness.add_locations(1).await.remove(0);

    let err = harness.service.get_conditions(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    location.is_active = false;
    harness.store.insert_location(location.clone()).await;
    let err = harness.service.get_conditions(location.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(harness.source.calls(), 0);
}

#[tokio::test]
async fn test_thresholds_applied_at_read_time() {
    let harness = Harness::new(FakeSource::new(Behavior::Reading(reading("6", "8")))).await;
    let location = harness.add_locations(1).await.remove(0);

    let report = harness.service.get_conditions(location.id).await.unwrap();
    assert_eq!(report.classification.tier, report.sample.tier);
    assert!(report.classification.rationale.starts_with("Calm conditions."));
}

#[tokio::test]
async fn test_api_key_resolves_first_active_location() {
    let harness = Harness::new(FakeSource::new(Behavior::Reading(reading("6", "8")))).await;
    let locations = harness.add_locations(2).await;

    let report = harness
        .service
        .get_conditions_for_api_key(API_KEY, None)
        .await
        .unwrap();
    assert_eq!(report.location.id, locations[0].id);

    let report = harness
        .service
        .get_conditions_for_api_key(API_KEY, Some(locations[1].id))
        .await
        .unwrap();
    assert_eq!(report.location.id, locations[1].id);
}

#[tokio::test]
async fn test_api_key_errors() {
    let harness = Harness::new(FakeSource::new(Behavior::Reading(reading("6", "8")))).await;

    let err = harness
        .service
        .get_conditions_for_api_key("wrong-key", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));

    let err = harness
        .service
        .get_conditions_for_api_key("   ", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));

    // valid key, but the tenant has no locations yet
    let err = harness
        .service
        .get_conditions_for_api_key(API_KEY, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    // another tenant's location is not reachable with this key
    let foreign = location(Uuid::new_v4(), 7);
    harness.store.insert_location(foreign.clone()).await;
    let err = harness
        .service
        .get_conditions_for_api_key(API_KEY, Some(foreign.id))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

/// Cache whose storage is down: writes and reads fail, nothing is fresh
struct BrokenCache;

#[async_trait]
impl CacheStore for BrokenCache {
    async fn get_fresh(&self, _location_id: Uuid, _now: DateTime<Utc>) -> AppResult<Option<Sample>> {
        Ok(None)
    }

    async fn get_latest(&self, _location_id: Uuid) -> AppResult<Option<Sample>> {
        Err(AppError::DatabaseError(sqlx::Error::PoolTimedOut))
    }

    async fn put(&self, _location_id: Uuid, _sample: NewSample, _ttl: ChronoDuration) -> AppResult<Sample> {
        Err(AppError::DatabaseError(sqlx::Error::PoolTimedOut))
    }
}

#[tokio::test]
async fn test_storage_failure_during_fallback_is_database_error() {
    let store = Arc::new(MemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(start_time()));
    let cache: Arc<dyn CacheStore> = Arc::new(BrokenCache);
    let source = Arc::new(FakeSource::new(Behavior::Reading(reading("6", "8"))));

    let coordinator = Arc::new(RefreshCoordinator::new(
        source,
        cache.clone(),
        store.clone(),
        clock,
        test_settings(),
    ));
    let service = ConditionsService::new(store.clone(), cache, coordinator);

    let tenant = common::tenant();
    store.insert_tenant(tenant.clone(), API_KEY).await;
    let location = location(tenant.id, 0);
    store.insert_location(location.clone()).await;

    let err = service.get_conditions(location.id).await.unwrap_err();
    assert!(matches!(err, AppError::DatabaseError(_)));

    // the failed write still counts against the location
    let state = store.get(location.id).await.unwrap().unwrap();
    assert_eq!(state.consecutive_failures, 1);
}

/// Wraps the memory store; the first freshness read stalls after reading,
/// like a lagging replica
struct SlowFirstRead {
    inner: Arc<MemoryStore>,
    stalled: AtomicBool,
}

#[async_trait]
impl CacheStore for SlowFirstRead {
    async fn get_fresh(&self, location_id: Uuid, now: DateTime<Utc>) -> AppResult<Option<Sample>> {
        let result = self.inner.get_fresh(location_id, now).await;
        if !self.stalled.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        result
    }

    async fn get_latest(&self, location_id: Uuid) -> AppResult<Option<Sample>> {
        self.inner.get_latest(location_id).await
    }

    async fn put(&self, location_id: Uuid, sample: NewSample, ttl: ChronoDuration) -> AppResult<Sample> {
        self.inner.put(location_id, sample, ttl).await
    }
}

/// Wraps the memory store; freshness reads fail, everything else works
struct FailingFreshRead {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl CacheStore for FailingFreshRead {
    async fn get_fresh(&self, _location_id: Uuid, _now: DateTime<Utc>) -> AppResult<Option<Sample>> {
        Err(AppError::DatabaseError(sqlx::Error::PoolTimedOut))
    }

    async fn get_latest(&self, location_id: Uuid) -> AppResult<Option<Sample>> {
        self.inner.get_latest(location_id).await
    }

    async fn put(&self, location_id: Uuid, sample: NewSample, ttl: ChronoDuration) -> AppResult<Sample> {
        self.inner.put(location_id, sample, ttl).await
    }
}

/// Service over `cache` with a single registered location
async fn service_with_cache(
    store: Arc<MemoryStore>,
    cache: Arc<dyn CacheStore>,
    source: Arc<FakeSource>,
) -> (Arc<ConditionsService>, Uuid) {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(start_time()));
    let coordinator = Arc::new(RefreshCoordinator::new(
        source,
        cache.clone(),
        store.clone(),
        clock,
        test_settings(),
    ));
    let service = Arc::new(ConditionsService::new(store.clone(), cache, coordinator));

    let tenant = common::tenant();
    store.insert_tenant(tenant.clone(), API_KEY).await;
    let location = location(tenant.id, 0);
    store.insert_location(location.clone()).await;

    (service, location.id)
}

#[tokio::test]
async fn test_caller_behind_finished_refresh_reuses_its_sample() {
    let store = Arc::new(MemoryStore::new());
    let cache: Arc<dyn CacheStore> = Arc::new(SlowFirstRead {
        inner: store.clone(),
        stalled: AtomicBool::new(false),
    });
    let source = Arc::new(FakeSource::with_delay(
        Behavior::Reading(reading("6", "8")),
        Duration::from_millis(50),
    ));
    let (service, location_id) = service_with_cache(store, cache, source.clone()).await;

    // misses the cache first, then stalls until the other refresh is over
    let lagging = {
        let service = service.clone();
        tokio::spawn(async move { service.get_conditions(location_id).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let prompt = service.get_conditions(location_id).await.unwrap();
    let lagging = lagging.await.unwrap().unwrap();

    assert_eq!(source.calls(), 1);
    assert_eq!(lagging.sample.id, prompt.sample.id);
    assert!(!lagging.stale);
}

#[tokio::test]
async fn test_failed_cache_read_still_refreshes() {
    let store = Arc::new(MemoryStore::new());
    let cache: Arc<dyn CacheStore> = Arc::new(FailingFreshRead {
        inner: store.clone(),
    });
    let source = Arc::new(FakeSource::new(Behavior::Reading(reading("6", "8"))));
    let (service, location_id) = service_with_cache(store, cache, source.clone()).await;

    let report = service.get_conditions(location_id).await.unwrap();

    assert!(!report.stale);
    assert_eq!(report.sample.location_id, location_id);
    assert_eq!(source.calls(), 1);
}
