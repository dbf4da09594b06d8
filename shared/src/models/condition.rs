//! Condition tiers and the wind/wave classification rule

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Risk tier derived from wind and wave data
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConditionTier {
    Calm,
    Moderate,
    Rough,
}

impl ConditionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionTier::Calm => "calm",
            ConditionTier::Moderate => "moderate",
            ConditionTier::Rough => "rough",
        }
    }

    /// Fixed display color used by the widget
    pub fn color(&self) -> &'static str {
        match self {
            ConditionTier::Calm => "#06A77D",
            ConditionTier::Moderate => "#F77F00",
            ConditionTier::Rough => "#E63946",
        }
    }

    /// Paddler level the tier is suitable for
    pub fn audience(&self) -> &'static str {
        match self {
            ConditionTier::Calm => "beginner",
            ConditionTier::Moderate => "intermediate",
            ConditionTier::Rough => "advanced",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "calm" | "beginner" => Some(ConditionTier::Calm),
            "moderate" | "intermediate" => Some(ConditionTier::Moderate),
            "rough" | "advanced" => Some(ConditionTier::Rough),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConditionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification thresholds (wind in mph, waves in feet)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConditionThresholds {
    pub beginner_wind_max: Decimal,
    pub intermediate_wind_max: Decimal,
    pub beginner_wave_max: Decimal,
    pub intermediate_wave_max: Decimal,
}

impl Default for ConditionThresholds {
    fn default() -> Self {
        Self {
            beginner_wind_max: Decimal::from(10),
            intermediate_wind_max: Decimal::from(18),
            beginner_wave_max: Decimal::new(15, 1),
            intermediate_wave_max: Decimal::new(35, 1),
        }
    }
}

/// Tier plus the human-readable reason for it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Classification {
    pub tier: ConditionTier,
    pub rationale: String,
}

impl Classification {
    /// Append a short note derived from the provider's sky description
    pub fn with_sky_note(mut self, conditions_text: Option<&str>) -> Self {
        if let Some(note) = conditions_text.and_then(sky_note) {
            self.rationale.push(' ');
            self.rationale.push_str(note);
        }
        self
    }
}

/// Classify conditions using strict `>` comparisons against the thresholds
pub fn classify(
    wind_speed: Decimal,
    gust_speed: Decimal,
    wave_height: Decimal,
    thresholds: &ConditionThresholds,
) -> Classification {
    let effective_wind = wind_speed.max(gust_speed);

    let tier = if effective_wind > thresholds.intermediate_wind_max
        || wave_height > thresholds.intermediate_wave_max
    {
        ConditionTier::Rough
    } else if effective_wind > thresholds.beginner_wind_max
        || wave_height > thresholds.beginner_wave_max
    {
        ConditionTier::Moderate
    } else {
        ConditionTier::Calm
    };

    Classification {
        tier,
        rationale: rationale(tier, effective_wind, wave_height),
    }
}

fn rationale(tier: ConditionTier, effective_wind: Decimal, wave_height: Decimal) -> String {
    let wind = effective_wind.round();
    let waves = wave_height.round_dp(1);
    match tier {
        ConditionTier::Calm => format!(
            "Calm conditions. Light winds ({} mph) and smooth water ({} ft). Great day to paddle!",
            wind, waves
        ),
        ConditionTier::Moderate => format!(
            "Moderate conditions. Winds at {} mph with {} ft waves. Suitable for intermediate paddlers.",
            wind, waves
        ),
        ConditionTier::Rough => format!(
            "Rough conditions. Strong winds ({} mph) and {} ft waves. Experienced paddlers only.",
            wind, waves
        ),
    }
}

fn sky_note(conditions_text: &str) -> Option<&'static str> {
    let lower = conditions_text.to_lowercase();
    if lower.contains("rain") || lower.contains("storm") || lower.contains("thunder") {
        Some("Precipitation detected - use caution.")
    } else if lower.contains("clear") || lower.contains("sun") {
        Some("Clear skies!")
    } else {
        None
    }
}
