//! Weather samples fetched for a location

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ConditionTier;
use crate::types::CompassDirection;

/// Problems found while normalizing a provider payload
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DataQualityWarning {
    /// Neither temperature field was present; defaulted to 0
    MissingTemperature,
    /// The fahrenheit field held a Celsius value and was converted
    CorrectedTemperatureUnit,
    /// No wind speed reported; defaulted to 0
    MissingWindSpeed,
    /// No wind direction reported; defaulted to north
    MissingWindDirection,
}

/// Stored weather sample. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub id: Uuid,
    pub location_id: Uuid,
    pub wind_speed_mph: Decimal,
    pub gust_speed_mph: Decimal,
    pub wind_direction_deg: i32,
    pub wind_direction: CompassDirection,
    pub wave_height_ft: Decimal,
    pub air_temperature_f: Decimal,
    pub conditions_text: Option<String>,
    pub tier: ConditionTier,
    pub rationale: String,
    pub data_quality: Vec<DataQualityWarning>,
    /// Verbatim provider response, kept for audit
    pub raw_payload: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Sample {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Sample produced by the fetch pipeline, before the cache assigns an expiry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewSample {
    pub location_id: Uuid,
    pub wind_speed_mph: Decimal,
    pub gust_speed_mph: Decimal,
    pub wind_direction_deg: i32,
    pub wind_direction: CompassDirection,
    pub wave_height_ft: Decimal,
    pub air_temperature_f: Decimal,
    pub conditions_text: Option<String>,
    pub tier: ConditionTier,
    pub rationale: String,
    pub data_quality: Vec<DataQualityWarning>,
    pub raw_payload: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

impl NewSample {
    /// Finalize with `expires_at = fetched_at + ttl`
    pub fn into_sample(self, ttl: Duration) -> Sample {
        Sample {
            id: Uuid::new_v4(),
            location_id: self.location_id,
            wind_speed_mph: self.wind_speed_mph,
            gust_speed_mph: self.gust_speed_mph,
            wind_direction_deg: self.wind_direction_deg,
            wind_direction: self.wind_direction,
            wave_height_ft: self.wave_height_ft,
            air_temperature_f: self.air_temperature_f,
            conditions_text: self.conditions_text,
            tier: self.tier,
            rationale: self.rationale,
            data_quality: self.data_quality,
            raw_payload: self.raw_payload,
            expires_at: self.fetched_at + ttl,
            fetched_at: self.fetched_at,
        }
    }
}
