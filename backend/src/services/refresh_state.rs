//! Per-location refresh bookkeeping and batch history

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::registry::{LocationRow, LOCATION_COLUMNS};
use crate::error::AppResult;
use crate::models::{BackoffPolicy, BatchReport, Location, RefreshState};

/// Storage for `RefreshState` rows and tick reports
#[async_trait]
pub trait RefreshStateStore: Send + Sync {
    /// Enabled, active locations whose next refresh is due, most overdue first.
    /// Locations that were never refreshed are always due.
    async fn due_locations(&self, now: DateTime<Utc>, limit: u32) -> AppResult<Vec<Location>>;

    async fn get(&self, location_id: Uuid) -> AppResult<Option<RefreshState>>;

    async fn record_success(
        &self,
        location_id: Uuid,
        attempted_at: DateTime<Utc>,
        interval: Duration,
    ) -> AppResult<RefreshState>;

    async fn record_failure(
        &self,
        location_id: Uuid,
        attempted_at: DateTime<Utc>,
        interval: Duration,
        error: &str,
        backoff: &BackoffPolicy,
    ) -> AppResult<RefreshState>;

    async fn record_batch(&self, report: &BatchReport) -> AppResult<()>;
}

#[derive(Debug, Clone, FromRow)]
struct RefreshStateRow {
    location_id: Uuid,
    last_attempt_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    next_due_at: DateTime<Utc>,
    consecutive_failures: i32,
    last_error: Option<String>,
    is_enabled: bool,
}

impl From<RefreshStateRow> for RefreshState {
    fn from(row: RefreshStateRow) -> Self {
        RefreshState {
            location_id: row.location_id,
            last_attempt_at: row.last_attempt_at,
            last_success_at: row.last_success_at,
            next_due_at: row.next_due_at,
            consecutive_failures: row.consecutive_failures,
            last_error: row.last_error,
            is_enabled: row.is_enabled,
        }
    }
}

/// PostgreSQL store over `refresh_state` and `refresh_log`
#[derive(Clone)]
pub struct PgRefreshStateStore {
    db: PgPool,
}

impl PgRefreshStateStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Lock the row, apply the transition, write it back in one transaction
    async fn update_state<F>(
        &self,
        location_id: Uuid,
        now: DateTime<Utc>,
        apply: F,
    ) -> AppResult<RefreshState>
    where
        F: FnOnce(&mut RefreshState) + Send,
    {
        let mut tx = self.db.begin().await?;

        let existing = sqlx::query_as::<_, RefreshStateRow>(
            r#"
            SELECT location_id, last_attempt_at, last_success_at, next_due_at,
                   consecutive_failures, last_error, is_enabled
            FROM refresh_state
            WHERE location_id = $1
            FOR UPDATE
            "#,
        )
        .bind(location_id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut state = existing
            .map(RefreshState::from)
            .unwrap_or_else(|| RefreshState::initial(location_id, now));
        apply(&mut state);

        sqlx::query(
            r#"
            INSERT INTO refresh_state (
                location_id, last_attempt_at, last_success_at, next_due_at,
                consecutive_failures, last_error, is_enabled, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (location_id) DO UPDATE SET
                last_attempt_at = EXCLUDED.last_attempt_at,
                last_success_at = EXCLUDED.last_success_at,
                next_due_at = EXCLUDED.next_due_at,
                consecutive_failures = EXCLUDED.consecutive_failures,
                last_error = EXCLUDED.last_error,
                updated_at = NOW()
            "#,
        )
        .bind(state.location_id)
        .bind(state.last_attempt_at)
        .bind(state.last_success_at)
        .bind(state.next_due_at)
        .bind(state.consecutive_failures)
        .bind(&state.last_error)
        .bind(state.is_enabled)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(state)
    }
}

#[async_trait]
impl RefreshStateStore for PgRefreshStateStore {
    async fn due_locations(&self, now: DateTime<Utc>, limit: u32) -> AppResult<Vec<Location>> {
        let rows = sqlx::query_as::<_, LocationRow>(&format!(
            r#"
            SELECT {}
            FROM locations l
            JOIN tenants t ON t.id = l.tenant_id
            LEFT JOIN refresh_state rs ON rs.location_id = l.id
            WHERE l.is_active
              AND t.is_active
              AND COALESCE(rs.is_enabled, TRUE)
              AND COALESCE(rs.next_due_at, $1) <= $1
            ORDER BY rs.next_due_at ASC NULLS FIRST, l.id ASC
            LIMIT $2
            "#,
            LOCATION_COLUMNS
        ))
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Location::from).collect())
    }

    async fn get(&self, location_id: Uuid) -> AppResult<Option<RefreshState>> {
        let row = sqlx::query_as::<_, RefreshStateRow>(
            r#"
            SELECT location_id, last_attempt_at, last_success_at, next_due_at,
                   consecutive_failures, last_error, is_enabled
            FROM refresh_state
            WHERE location_id = $1
            "#,
        )
        .bind(location_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(RefreshState::from))
    }

    async fn record_success(
        &self,
        location_id: Uuid,
        attempted_at: DateTime<Utc>,
        interval: Duration,
    ) -> AppResult<RefreshState> {
        self.update_state(location_id, attempted_at, |state| {
            state.record_success(attempted_at, interval)
        })
        .await
    }

    async fn record_failure(
        &self,
        location_id: Uuid,
        attempted_at: DateTime<Utc>,
        interval: Duration,
        error: &str,
        backoff: &BackoffPolicy,
    ) -> AppResult<RefreshState> {
        let backoff = *backoff;
        let error = error.to_string();
        self.update_state(location_id, attempted_at, move |state| {
            state.record_failure(attempted_at, interval, &error, &backoff)
        })
        .await
    }

    async fn record_batch(&self, report: &BatchReport) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_log (
                started_at, locations_attempted, locations_succeeded,
                locations_failed, duration_ms, status
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(report.started_at)
        .bind(report.attempted as i32)
        .bind(report.succeeded as i32)
        .bind(report.failed as i32)
        .bind(report.elapsed_ms)
        .bind(report.status())
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
