//! Provider payload normalization
//!
//! Every provider quirk is handled here, as pure functions over the typed
//! payload, so the rules can be checked against literal fixture payloads.

use rust_decimal::Decimal;
use serde::Deserialize;
use shared::{CompassDirection, DataQualityWarning};

/// Readings closer than this are the same number under two labels
const MISLABEL_TOLERANCE: Decimal = Decimal::from_parts(2, 0, 0, false, 0);

/// Top-level `current.json` response
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderPayload {
    pub current: ProviderCurrent,
}

/// The `current` block of a provider response. Any field may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderCurrent {
    #[serde(default)]
    pub temp_f: Option<Decimal>,
    #[serde(default)]
    pub temp_c: Option<Decimal>,
    #[serde(default)]
    pub wind_mph: Option<Decimal>,
    #[serde(default)]
    pub gust_mph: Option<Decimal>,
    #[serde(default)]
    pub wind_degree: Option<f64>,
    #[serde(default)]
    pub condition: Option<ProviderCondition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderCondition {
    #[serde(default)]
    pub text: Option<String>,
}

/// Which temperature fields the provider actually sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureReading {
    Both { fahrenheit: Decimal, celsius: Decimal },
    FahrenheitOnly(Decimal),
    CelsiusOnly(Decimal),
    Missing,
}

impl TemperatureReading {
    pub fn from_fields(fahrenheit: Option<Decimal>, celsius: Option<Decimal>) -> Self {
        match (fahrenheit, celsius) {
            (Some(fahrenheit), Some(celsius)) => TemperatureReading::Both {
                fahrenheit,
                celsius,
            },
            (Some(f), None) => TemperatureReading::FahrenheitOnly(f),
            (None, Some(c)) => TemperatureReading::CelsiusOnly(c),
            (None, None) => TemperatureReading::Missing,
        }
    }

    /// Resolve to degrees Fahrenheit
    ///
    /// When both fields are within 2 degrees of each other the "fahrenheit"
    /// field is really Celsius and gets converted.
    pub fn to_fahrenheit(self) -> (Decimal, Option<DataQualityWarning>) {
        match self {
            TemperatureReading::Both {
                fahrenheit,
                celsius,
            } => {
                if (fahrenheit - celsius).abs() < MISLABEL_TOLERANCE {
                    (
                        celsius_to_fahrenheit(fahrenheit),
                        Some(DataQualityWarning::CorrectedTemperatureUnit),
                    )
                } else {
                    (fahrenheit, None)
                }
            }
            TemperatureReading::FahrenheitOnly(f) => (f, None),
            TemperatureReading::CelsiusOnly(c) => (celsius_to_fahrenheit(c), None),
            TemperatureReading::Missing => {
                (Decimal::ZERO, Some(DataQualityWarning::MissingTemperature))
            }
        }
    }
}

pub fn celsius_to_fahrenheit(celsius: Decimal) -> Decimal {
    celsius * Decimal::from(9) / Decimal::from(5) + Decimal::from(32)
}

/// Rough wave height in feet from wind, for providers without marine data
pub fn estimate_wave_height(wind_speed: Decimal, gust_speed: Decimal) -> Decimal {
    let effective = wind_speed.max(gust_speed * Decimal::new(8, 1));
    (effective * Decimal::new(1, 1)).round_dp(2)
}

/// Canonical reading extracted from one provider response
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReading {
    pub wind_speed_mph: Decimal,
    pub gust_speed_mph: Decimal,
    pub wind_direction_deg: i32,
    pub wind_direction: CompassDirection,
    pub wave_height_ft: Decimal,
    pub air_temperature_f: Decimal,
    pub conditions_text: Option<String>,
    pub data_quality: Vec<DataQualityWarning>,
}

/// Apply the precedence rules to one `current` block
pub fn normalize_current(current: &ProviderCurrent) -> NormalizedReading {
    let mut data_quality = Vec::new();

    let (air_temperature_f, temp_warning) =
        TemperatureReading::from_fields(current.temp_f, current.temp_c).to_fahrenheit();
    data_quality.extend(temp_warning);

    let wind_speed_mph = current.wind_mph.unwrap_or_else(|| {
        data_quality.push(DataQualityWarning::MissingWindSpeed);
        Decimal::ZERO
    });
    let gust_speed_mph = current.gust_mph.unwrap_or(wind_speed_mph);

    let degrees = match current.wind_degree.filter(|d| d.is_finite()) {
        Some(d) => d.rem_euclid(360.0),
        None => {
            data_quality.push(DataQualityWarning::MissingWindDirection);
            0.0
        }
    };

    let conditions_text = current
        .condition
        .as_ref()
        .and_then(|c| c.text.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    NormalizedReading {
        wave_height_ft: estimate_wave_height(wind_speed_mph, gust_speed_mph),
        wind_speed_mph: wind_speed_mph.round_dp(2),
        gust_speed_mph: gust_speed_mph.round_dp(2),
        wind_direction_deg: degrees.round() as i32 % 360,
        wind_direction: CompassDirection::from_degrees(degrees),
        air_temperature_f: air_temperature_f.round_dp(2),
        conditions_text,
        data_quality,
    }
}
