use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// One sample from the field device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub temperature: f64,
    pub humidity: f64,
    pub moisture: f64,
}

/// A persisted reading. Timestamps are unique across the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub data: SensorReading,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryRecord {
    /// Stamps a reading with `at` truncated to microseconds, the resolution
    /// Postgres keeps for `timestamptz`.
    pub fn new(data: SensorReading, at: DateTime<Utc>) -> Self {
        Self {
            data,
            timestamp: at.trunc_subsecs(6),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub upper: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafeThresholds {
    pub temperature: Range,
    pub humidity: Range,
    pub moisture: Range,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantProfile {
    pub plant_type: String,
    pub safe_thresholds: SafeThresholds,
}

/// Pump actuation command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpDecision {
    On,
    Off,
}

impl PumpDecision {
    /// Payload the device firmware expects on the pump topic.
    pub fn as_command(self) -> &'static str {
        match self {
            PumpDecision::On => "YES",
            PumpDecision::Off => "NO",
        }
    }
}

impl fmt::Display for PumpDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_command())
    }
}

/// Device component a state update refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceComponent {
    Pump,
    AutoMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStateUpdate {
    /// Components this bridge does not know about are reported as `None`.
    #[serde(
        default,
        deserialize_with = "known_component",
        skip_serializing_if = "Option::is_none"
    )]
    pub state: Option<DeviceComponent>,
    pub enable: bool,
}

fn known_component<'de, D>(deserializer: D) -> Result<Option<DeviceComponent>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// Command sent from a dashboard to the field device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    content = "value",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum DeviceCommand {
    Pump(bool),
    ToggleAuto(bool),
    SetThreshold(SensorReading),
}

/// Someone to alert when a reading leaves the safe range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Recipient {
    pub username: String,
    pub email: Option<String>,
    #[sqlx(rename = "phone_number")]
    pub phone: Option<String>,
}

/// REST API response wrapper
#[derive(Debug, Serialize)]
pub struct TelemetryResponse {
    pub data: Vec<TelemetryRecord>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}
