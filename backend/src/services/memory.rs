//! In-process storage for local development and tests
//!
//! Nothing persists across restarts and tenants can only be added through
//! the `insert_*` helpers, so configuration refuses this backend in
//! production.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::cache::CacheStore;
use super::refresh_state::RefreshStateStore;
use super::registry::{api_key_digest, LocationRegistry};
use crate::error::AppResult;
use crate::models::{BackoffPolicy, BatchReport, Location, NewSample, RefreshState, Sample, Tenant};

/// Batch reports kept before the oldest are dropped
pub const BATCH_HISTORY_LIMIT: usize = 500;

/// Registry, cache and refresh bookkeeping held in memory
///
/// Only the latest sample per location is kept. A `put` replaces the stored
/// `Arc<Sample>` under the write lock, so readers never see a partial sample.
#[derive(Default)]
pub struct MemoryStore {
    tenants: RwLock<HashMap<Uuid, StoredTenant>>,
    locations: RwLock<Vec<Location>>,
    states: RwLock<HashMap<Uuid, RefreshState>>,
    samples: RwLock<HashMap<Uuid, Arc<Sample>>>,
    batches: RwLock<VecDeque<BatchReport>>,
}

struct StoredTenant {
    tenant: Tenant,
    api_key_digest: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_tenant(&self, tenant: Tenant, api_key: &str) {
        self.tenants.write().await.insert(
            tenant.id,
            StoredTenant {
                tenant,
                api_key_digest: api_key_digest(api_key),
            },
        );
    }

    /// Insert or replace a location, keeping first-insert order
    pub async fn insert_location(&self, location: Location) {
        let mut locations = self.locations.write().await;
        match locations.iter_mut().find(|l| l.id == location.id) {
            Some(existing) => *existing = location,
            None => locations.push(location),
        }
    }

    /// Overwrite a location's refresh state, e.g. to disable it
    pub async fn set_refresh_state(&self, state: RefreshState) {
        self.states.write().await.insert(state.location_id, state);
    }

    /// Most recent reports, oldest first
    pub async fn batches(&self) -> Vec<BatchReport> {
        self.batches.read().await.iter().cloned().collect()
    }

    async fn tenant_is_active(&self, tenant_id: Uuid) -> bool {
        self.tenants
            .read()
            .await
            .get(&tenant_id)
            .map(|t| t.tenant.is_active)
            .unwrap_or(false)
    }

    async fn update_state<F>(&self, location_id: Uuid, now: DateTime<Utc>, apply: F) -> RefreshState
    where
        F: FnOnce(&mut RefreshState),
    {
        let mut states = self.states.write().await;
        let state = states
            .entry(location_id)
            .or_insert_with(|| RefreshState::initial(location_id, now));
        apply(state);
        state.clone()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_fresh(&self, location_id: Uuid, now: DateTime<Utc>) -> AppResult<Option<Sample>> {
        Ok(self
            .samples
            .read()
            .await
            .get(&location_id)
            .filter(|sample| sample.is_fresh(now))
            .map(|sample| Sample::clone(sample)))
    }

    async fn get_latest(&self, location_id: Uuid) -> AppResult<Option<Sample>> {
        Ok(self
            .samples
            .read()
            .await
            .get(&location_id)
            .map(|sample| Sample::clone(sample)))
    }

    async fn put(&self, location_id: Uuid, sample: NewSample, ttl: Duration) -> AppResult<Sample> {
        let sample = NewSample {
            location_id,
            ..sample
        }
        .into_sample(ttl);

        self.samples
            .write()
            .await
            .insert(location_id, Arc::new(sample.clone()));

        Ok(sample)
    }
}

#[async_trait]
impl LocationRegistry for MemoryStore {
    async fn get_active_location(&self, location_id: Uuid) -> AppResult<Option<Location>> {
        let location = self
            .locations
            .read()
            .await
            .iter()
            .find(|l| l.id == location_id && l.is_active)
            .cloned();

        match location {
            Some(location) if self.tenant_is_active(location.tenant_id).await => Ok(Some(location)),
            _ => Ok(None),
        }
    }

    async fn find_tenant_by_api_key(&self, api_key: &str) -> AppResult<Option<Tenant>> {
        let digest = api_key_digest(api_key);
        Ok(self
            .tenants
            .read()
            .await
            .values()
            .find(|t| t.tenant.is_active && t.api_key_digest == digest)
            .map(|t| t.tenant.clone()))
    }

    async fn active_locations_for_tenant(&self, tenant_id: Uuid) -> AppResult<Vec<Location>> {
        if !self.tenant_is_active(tenant_id).await {
            return Ok(Vec::new());
        }

        Ok(self
            .locations
            .read()
            .await
            .iter()
            .filter(|l| l.tenant_id == tenant_id && l.is_active)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
impl RefreshStateStore for MemoryStore {
    async fn due_locations(&self, now: DateTime<Utc>, limit: u32) -> AppResult<Vec<Location>> {
        let active_tenants: Vec<Uuid> = self
            .tenants
            .read()
            .await
            .values()
            .filter(|t| t.tenant.is_active)
            .map(|t| t.tenant.id)
            .collect();
        let states = self.states.read().await;

        let mut due: Vec<(Option<DateTime<Utc>>, Location)> = self
            .locations
            .read()
            .await
            .iter()
            .filter(|l| l.is_active && active_tenants.contains(&l.tenant_id))
            .filter_map(|l| match states.get(&l.id) {
                None => Some((None, l.clone())),
                Some(state) if state.is_due(now) => Some((Some(state.next_due_at), l.clone())),
                Some(_) => None,
            })
            .collect();

        // stable sort keeps insertion order among equally overdue locations
        due.sort_by_key(|(next_due, _)| *next_due);

        Ok(due
            .into_iter()
            .take(limit as usize)
            .map(|(_, location)| location)
            .collect())
    }

    async fn get(&self, location_id: Uuid) -> AppResult<Option<RefreshState>> {
        Ok(self.states.read().await.get(&location_id).cloned())
    }

    async fn record_success(
        &self,
        location_id: Uuid,
        attempted_at: DateTime<Utc>,
        interval: Duration,
    ) -> AppResult<RefreshState> {
        Ok(self
            .update_state(location_id, attempted_at, |state| {
                state.record_success(attempted_at, interval)
            })
            .await)
    }

    async fn record_failure(
        &self,
        location_id: Uuid,
        attempted_at: DateTime<Utc>,
        interval: Duration,
        error: &str,
        backoff: &BackoffPolicy,
    ) -> AppResult<RefreshState> {
        Ok(self
            .update_state(location_id, attempted_at, |state| {
                state.record_failure(attempted_at, interval, error, backoff)
            })
            .await)
    }

    async fn record_batch(&self, report: &BatchReport) -> AppResult<()> {
        let mut batches = self.batches.write().await;
        if batches.len() == BATCH_HISTORY_LIMIT {
            batches.pop_front();
        }
        batches.push_back(report.clone());
        Ok(())
    }
}
