use thiserror::Error;

use crate::device::DeviceFailure;
use crate::store::StoreFailure;

pub type Result<T> = std::result::Result<T, IrrigationError>;

/// Rejections raised at the call site.  Device failures only surface here
/// from zone-level operations; the facade records them instead of returning
/// them.
#[derive(Debug, Error)]
pub enum IrrigationError {
    #[error("unknown zone '{0}'")]
    UnknownZone(String),
    #[error("unknown device '{0}'")]
    UnknownDevice(String),
    #[error("id '{0}' is already in use")]
    DuplicateId(String),
    #[error("zone '{0}' already has a sensor")]
    SensorAlreadyInstalled(String),
    #[error("moisture level {0} out of range [0, 100]")]
    LevelOutOfRange(u32),
    #[error("invalid irrigation time '{0}' (expected HHMM)")]
    InvalidTime(String),
    #[error("invalid day code '{0}'")]
    InvalidDays(String),
    #[error("unknown mode '{0}'")]
    InvalidMode(String),
    #[error("operation requires {0} mode")]
    WrongMode(&'static str),
    #[error("no manual cycle is running")]
    NoManualCycle,
    #[error("stored value for '{key}' is corrupt: '{value}'")]
    CorruptValue { key: String, value: String },
    #[error("configuration store unavailable")]
    Store(#[from] StoreFailure),
    #[error(transparent)]
    Device(#[from] DeviceFailure),
}
