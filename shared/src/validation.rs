//! Validation utilities for the water conditions service

use rust_decimal::Decimal;

use crate::models::{ConditionThresholds, Location};
use crate::types::Coordinates;

/// Longest refresh interval a location may request (one day)
pub const MAX_REFRESH_INTERVAL_MINUTES: i32 = 24 * 60;

/// Validate latitude/longitude ranges
pub fn validate_coordinates(coords: &Coordinates) -> Result<(), &'static str> {
    if coords.latitude < Decimal::from(-90) || coords.latitude > Decimal::from(90) {
        return Err("Latitude must be between -90 and 90");
    }
    if coords.longitude < Decimal::from(-180) || coords.longitude > Decimal::from(180) {
        return Err("Longitude must be between -180 and 180");
    }
    Ok(())
}

/// Validate a location's refresh interval in minutes
pub fn validate_refresh_interval(minutes: i32) -> Result<(), &'static str> {
    if minutes < 1 {
        return Err("Refresh interval must be at least one minute");
    }
    if minutes > MAX_REFRESH_INTERVAL_MINUTES {
        return Err("Refresh interval cannot exceed one day");
    }
    Ok(())
}

/// Validate that threshold pairs are ordered and non-negative
pub fn validate_thresholds(t: &ConditionThresholds) -> Result<(), &'static str> {
    let all = [
        t.beginner_wind_max,
        t.intermediate_wind_max,
        t.beginner_wave_max,
        t.intermediate_wave_max,
    ];
    if all.iter().any(|v| *v < Decimal::ZERO) {
        return Err("Thresholds cannot be negative");
    }
    if t.beginner_wind_max > t.intermediate_wind_max {
        return Err("Beginner wind maximum cannot exceed intermediate wind maximum");
    }
    if t.beginner_wave_max > t.intermediate_wave_max {
        return Err("Beginner wave maximum cannot exceed intermediate wave maximum");
    }
    Ok(())
}

/// Check a registry row before the scheduler relies on it
pub fn validate_location(location: &Location) -> Result<(), &'static str> {
    validate_coordinates(&location.coordinates)?;
    validate_refresh_interval(location.refresh_interval_minutes)
}
