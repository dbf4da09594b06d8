//! HTTP handlers for the embeddable conditions widget

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::ApiKey;
use crate::models::{CompassDirection, ConditionTier, DataQualityWarning};
use crate::services::ConditionsReport;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ConditionsQuery {
    pub location_id: Option<String>,
}

impl ConditionsQuery {
    fn location_id(&self) -> AppResult<Option<Uuid>> {
        match self.location_id.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => Uuid::parse_str(raw)
                .map(Some)
                .map_err(|_| AppError::ValidationError("location_id must be a UUID".to_string())),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetConditionsResponse {
    pub location: WidgetLocation,
    pub conditions: WidgetConditions,
    pub fetched_at: DateTime<Utc>,
    pub next_refresh_hint: DateTime<Utc>,
    pub stale: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetLocation {
    pub id: Uuid,
    pub name: String,
    pub water_body: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub timezone: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetConditions {
    pub tier: ConditionTier,
    /// Paddler level the tier suits
    pub level: &'static str,
    pub color: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    pub wind_speed: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub gust_speed: Decimal,
    pub wind_direction: CompassDirection,
    pub wind_degrees: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub wave_height: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub temperature: Decimal,
    pub weather_text: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub data_quality: Vec<DataQualityWarning>,
}

impl From<ConditionsReport> for WidgetConditionsResponse {
    fn from(report: ConditionsReport) -> Self {
        let ConditionsReport {
            location,
            sample,
            classification,
            stale,
            next_refresh_hint,
        } = report;
        let tier = classification.tier;

        Self {
            location: WidgetLocation {
                id: location.id,
                name: location.name,
                water_body: location.water_body,
                city: location.city,
                state: location.state,
                timezone: location.timezone,
            },
            conditions: WidgetConditions {
                tier,
                level: tier.audience(),
                color: tier.color(),
                wind_speed: sample.wind_speed_mph.round_dp(1),
                gust_speed: sample.gust_speed_mph.round_dp(1),
                wind_direction: sample.wind_direction,
                wind_degrees: sample.wind_direction_deg,
                wave_height: sample.wave_height_ft.round_dp(1),
                temperature: sample.air_temperature_f.round_dp(1),
                weather_text: sample.conditions_text,
                message: classification.rationale,
                data_quality: sample.data_quality,
            },
            fetched_at: sample.fetched_at,
            next_refresh_hint,
            stale,
        }
    }
}

/// Conditions for the key in the path, e.g. `/widget/conditions/{api_key}`
pub async fn get_widget_conditions_by_key(
    State(state): State<AppState>,
    Path(api_key): Path<String>,
    Query(query): Query<ConditionsQuery>,
) -> AppResult<Json<WidgetConditionsResponse>> {
    let report = state
        .conditions
        .get_conditions_for_api_key(&api_key, query.location_id()?)
        .await?;
    Ok(Json(report.into()))
}

/// Conditions for the key in the `X-API-Key` header or `api_key` parameter
pub async fn get_widget_conditions(
    State(state): State<AppState>,
    ApiKey(api_key): ApiKey,
    Query(query): Query<ConditionsQuery>,
) -> AppResult<Json<WidgetConditionsResponse>> {
    let report = state
        .conditions
        .get_conditions_for_api_key(&api_key, query.location_id()?)
        .await?;
    Ok(Json(report.into()))
}
