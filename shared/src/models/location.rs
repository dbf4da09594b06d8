//! Tenant and location models

use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Coordinates;

/// Tenant website that embeds the widget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
}

/// A monitored body of water owned by one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub water_body: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub coordinates: Coordinates,
    pub is_active: bool,
    /// How often the scheduler should fetch new data
    pub refresh_interval_minutes: i32,
    /// IANA timezone name, display only
    pub timezone: String,
}

impl Location {
    /// Refresh interval as a duration, never shorter than one minute
    pub fn refresh_interval(&self) -> Duration {
        Duration::minutes(i64::from(self.refresh_interval_minutes.max(1)))
    }
}
