//! Immutable snapshots handed to the presentation layer.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneReport {
    pub id: String,
    pub location: String,
    pub critical_level: u8,
    pub max_level: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValveReport {
    pub id: String,
    pub location: String,
    pub zone_id: String,
    pub is_open: bool,
    pub is_failed: bool,
    pub is_recorded: bool,
    pub flow_rate: u32,
    pub minutes_open: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorReport {
    pub id: String,
    pub location: String,
    pub zone_id: String,
    pub is_failed: bool,
    pub is_recorded: bool,
    /// Last successful reading, if any.
    pub level: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDeviceReport {
    pub device_id: String,
    pub zone_id: String,
    pub location: String,
    pub is_recorded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub failed_sensors: Vec<FailedDeviceReport>,
    pub failed_valves: Vec<FailedDeviceReport>,
}

impl FailureReport {
    pub fn is_empty(&self) -> bool {
        self.failed_sensors.is_empty() && self.failed_valves.is_empty()
    }
}
