//! Read-only access to tenants and their monitored locations

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Coordinates, Location, Tenant};

/// Digest stored in place of a tenant's raw API key
pub fn api_key_digest(api_key: &str) -> String {
    STANDARD.encode(Sha256::digest(api_key.trim().as_bytes()))
}

/// Tenant and location lookups. Locations and tenants are owned by another
/// part of the platform; this service only reads them.
#[async_trait]
pub trait LocationRegistry: Send + Sync {
    /// Location by id, only when both it and its tenant are active
    async fn get_active_location(&self, location_id: Uuid) -> AppResult<Option<Location>>;

    /// Active tenant owning this API key
    async fn find_tenant_by_api_key(&self, api_key: &str) -> AppResult<Option<Tenant>>;

    /// Active locations of a tenant, oldest first
    async fn active_locations_for_tenant(&self, tenant_id: Uuid) -> AppResult<Vec<Location>>;

    /// Cheap connectivity probe for health checks
    async fn ping(&self) -> AppResult<()>;
}

/// Location record as stored
#[derive(Debug, Clone, FromRow)]
pub(crate) struct LocationRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub water_body: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub is_active: bool,
    pub refresh_interval_minutes: i32,
    pub timezone: String,
}

impl From<LocationRow> for Location {
    fn from(row: LocationRow) -> Self {
        Location {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            water_body: row.water_body,
            city: row.city,
            state: row.state,
            coordinates: Coordinates::new(row.latitude, row.longitude),
            is_active: row.is_active,
            refresh_interval_minutes: row.refresh_interval_minutes,
            timezone: row.timezone,
        }
    }
}

pub(crate) const LOCATION_COLUMNS: &str = "l.id, l.tenant_id, l.name, l.water_body, l.city, \
     l.state, l.latitude, l.longitude, l.is_active, l.refresh_interval_minutes, l.timezone";

#[derive(Debug, Clone, FromRow)]
struct TenantRow {
    id: Uuid,
    name: String,
    is_active: bool,
}

/// PostgreSQL registry over the `tenants` and `locations` tables
#[derive(Clone)]
pub struct PgLocationRegistry {
    db: PgPool,
}

impl PgLocationRegistry {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LocationRegistry for PgLocationRegistry {
    async fn get_active_location(&self, location_id: Uuid) -> AppResult<Option<Location>> {
        let row = sqlx::query_as::<_, LocationRow>(&format!(
            r#"
            SELECT {}
            FROM locations l
            JOIN tenants t ON t.id = l.tenant_id
            WHERE l.id = $1 AND l.is_active AND t.is_active
            "#,
            LOCATION_COLUMNS
        ))
        .bind(location_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Location::from))
    }

    async fn find_tenant_by_api_key(&self, api_key: &str) -> AppResult<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT id, name, is_active
            FROM tenants
            WHERE api_key_digest = $1 AND is_active
            "#,
        )
        .bind(api_key_digest(api_key))
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|r| Tenant {
            id: r.id,
            name: r.name,
            is_active: r.is_active,
        }))
    }

    async fn active_locations_for_tenant(&self, tenant_id: Uuid) -> AppResult<Vec<Location>> {
        let rows = sqlx::query_as::<_, LocationRow>(&format!(
            r#"
            SELECT {}
            FROM locations l
            JOIN tenants t ON t.id = l.tenant_id
            WHERE l.tenant_id = $1 AND l.is_active AND t.is_active
            ORDER BY l.created_at ASC, l.id ASC
            "#,
            LOCATION_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Location::from).collect())
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}
