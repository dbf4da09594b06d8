//! Sample cache backed by the `weather_samples` table

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{CompassDirection, ConditionTier, DataQualityWarning, NewSample, Sample};

/// Latest-wins sample storage keyed by location
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Latest sample, only while `now < expires_at`
    async fn get_fresh(&self, location_id: Uuid, now: DateTime<Utc>) -> AppResult<Option<Sample>>;

    /// Latest sample regardless of freshness
    async fn get_latest(&self, location_id: Uuid) -> AppResult<Option<Sample>>;

    /// Store a sample with `expires_at = fetched_at + ttl`. Readers see either
    /// the previous sample or this one, never a partial write.
    async fn put(&self, location_id: Uuid, sample: NewSample, ttl: Duration) -> AppResult<Sample>;
}

/// Sample record as stored
#[derive(Debug, Clone, FromRow)]
struct SampleRow {
    id: Uuid,
    location_id: Uuid,
    wind_speed_mph: Decimal,
    gust_speed_mph: Decimal,
    wind_direction_deg: i32,
    wind_direction: String,
    wave_height_ft: Decimal,
    air_temperature_f: Decimal,
    conditions_text: Option<String>,
    tier: String,
    rationale: String,
    data_quality: serde_json::Value,
    raw_payload: serde_json::Value,
    fetched_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<SampleRow> for Sample {
    type Error = AppError;

    fn try_from(row: SampleRow) -> Result<Self, Self::Error> {
        let tier = ConditionTier::parse(&row.tier)
            .ok_or_else(|| AppError::Internal(format!("Unknown stored tier '{}'", row.tier)))?;
        let wind_direction = CompassDirection::parse(&row.wind_direction).ok_or_else(|| {
            AppError::Internal(format!("Unknown stored direction '{}'", row.wind_direction))
        })?;
        let data_quality = decode_data_quality(row.id, row.data_quality);

        Ok(Sample {
            id: row.id,
            location_id: row.location_id,
            wind_speed_mph: row.wind_speed_mph,
            gust_speed_mph: row.gust_speed_mph,
            wind_direction_deg: row.wind_direction_deg,
            wind_direction,
            wave_height_ft: row.wave_height_ft,
            air_temperature_f: row.air_temperature_f,
            conditions_text: row.conditions_text,
            tier,
            rationale: row.rationale,
            data_quality,
            raw_payload: row.raw_payload,
            fetched_at: row.fetched_at,
            expires_at: row.expires_at,
        })
    }
}

/// Audit-only column: an unreadable value is logged and read as empty rather
/// than hiding the sample
fn decode_data_quality(sample_id: Uuid, value: serde_json::Value) -> Vec<DataQualityWarning> {
    match serde_json::from_value(value) {
        Ok(warnings) => warnings,
        Err(err) => {
            tracing::warn!(%sample_id, error = %err, "Unreadable data_quality column");
            Vec::new()
        }
    }
}

const SAMPLE_COLUMNS: &str = "id, location_id, wind_speed_mph, gust_speed_mph, wind_direction_deg, \
     wind_direction, wave_height_ft, air_temperature_f, conditions_text, tier, rationale, \
     data_quality, raw_payload, fetched_at, expires_at";

/// PostgreSQL cache store. Older rows stay for audit; only the newest is read.
#[derive(Clone)]
pub struct PgCacheStore {
    db: PgPool,
}

impl PgCacheStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn get_fresh(&self, location_id: Uuid, now: DateTime<Utc>) -> AppResult<Option<Sample>> {
        Ok(self
            .get_latest(location_id)
            .await?
            .filter(|sample| sample.is_fresh(now)))
    }

    async fn get_latest(&self, location_id: Uuid) -> AppResult<Option<Sample>> {
        let row = sqlx::query_as::<_, SampleRow>(&format!(
            r#"
            SELECT {}
            FROM weather_samples
            WHERE location_id = $1
            ORDER BY fetched_at DESC
            LIMIT 1
            "#,
            SAMPLE_COLUMNS
        ))
        .bind(location_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(Sample::try_from).transpose()
    }

    async fn put(&self, location_id: Uuid, sample: NewSample, ttl: Duration) -> AppResult<Sample> {
        let sample = NewSample {
            location_id,
            ..sample
        }
        .into_sample(ttl);

        let data_quality = serde_json::to_value(&sample.data_quality)
            .map_err(|e| AppError::Internal(format!("Failed to encode data quality: {}", e)))?;

        let row = sqlx::query_as::<_, SampleRow>(&format!(
            r#"
            INSERT INTO weather_samples (
                id, location_id, wind_speed_mph, gust_speed_mph, wind_direction_deg,
                wind_direction, wave_height_ft, air_temperature_f, conditions_text, tier,
                rationale, data_quality, raw_payload, fetched_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {}
            "#,
            SAMPLE_COLUMNS
        ))
        .bind(sample.id)
        .bind(sample.location_id)
        .bind(sample.wind_speed_mph)
        .bind(sample.gust_speed_mph)
        .bind(sample.wind_direction_deg)
        .bind(sample.wind_direction.as_str())
        .bind(sample.wave_height_ft)
        .bind(sample.air_temperature_f)
        .bind(&sample.conditions_text)
        .bind(sample.tier.as_str())
        .bind(&sample.rationale)
        .bind(data_quality)
        .bind(&sample.raw_payload)
        .bind(sample.fetched_at)
        .bind(sample.expires_at)
        .fetch_one(&self.db)
        .await?;

        Sample::try_from(row)
    }
}
