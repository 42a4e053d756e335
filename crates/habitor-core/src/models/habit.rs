//! Habit domain fields
//!
//! The sync engine never interprets these; they only have to survive the trip
//! through the local table, the queue snapshot, and the remote document.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Smallest geofence radius accepted, in meters
pub const MIN_LOCATION_RADIUS_M: u32 = 50;
/// Largest geofence radius accepted, in meters
pub const MAX_LOCATION_RADIUS_M: u32 = 500;

/// How often a habit repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepeatPattern {
    #[default]
    Daily,
    Weekly,
    Custom,
}

/// Habit priority, used for ordering in the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Ok(Self::High),
            "MEDIUM" => Ok(Self::Medium),
            "LOW" => Ok(Self::Low),
            other => Err(Error::InvalidInput(format!("unknown priority: {other}"))),
        }
    }
}

/// Whether a geofence fires on entering or leaving the area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationTriggerKind {
    #[default]
    Enter,
    Exit,
}

/// Location reminder attached to a habit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationTrigger {
    #[serde(default)]
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_radius")]
    pub radius_m: u32,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub trigger: LocationTriggerKind,
}

const fn default_radius() -> u32 {
    100
}

impl LocationTrigger {
    /// Create a trigger at the given coordinates with the default radius
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            name: None,
            latitude,
            longitude,
            radius_m: default_radius(),
            enabled: false,
            trigger: LocationTriggerKind::Enter,
        }
    }

    /// Set the radius, clamped to the supported range
    #[must_use]
    pub fn with_radius(mut self, radius_m: u32) -> Self {
        self.radius_m = radius_m.clamp(MIN_LOCATION_RADIUS_M, MAX_LOCATION_RADIUS_M);
        self
    }
}

/// Opaque habit payload carried alongside the sync metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HabitDetails {
    /// Free-form note
    pub note: String,
    /// Current streak length in days
    pub streak_count: u32,
    /// Reminder time formatted as `HH:mm`
    pub reminder_time: Option<String>,
    pub reminder_enabled: bool,
    pub repeat_pattern: RepeatPattern,
    /// Weekday numbers (1 = Monday) for weekly repeats
    pub repeat_days: Vec<u8>,
    /// Interval for custom repeats
    pub custom_interval_days: u32,
    pub priority: Priority,
    pub category: String,
    pub location: Option<LocationTrigger>,
}

impl Default for HabitDetails {
    fn default() -> Self {
        Self {
            note: String::new(),
            streak_count: 0,
            reminder_time: None,
            reminder_enabled: false,
            repeat_pattern: RepeatPattern::Daily,
            repeat_days: Vec::new(),
            custom_interval_days: 1,
            priority: Priority::Medium,
            category: "Other".to_string(),
            location: None,
        }
    }
}
