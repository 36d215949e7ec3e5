//! Orchestration core of a multi-zone irrigation controller: zones with a
//! moisture sensor and valves, manual and automatic watering cycles, and the
//! [`Irrigator`] facade that ties them to a clock and a key/value store.

pub mod clock;
pub mod cycle;
pub mod device;
pub mod error;
pub mod irrigator;
pub mod report;
pub mod schedule;
pub mod sensor;
pub mod store;
pub mod valve;
pub mod zone;

pub use clock::{Clock, SimClock, SystemClock};
pub use cycle::CycleKind;
pub use device::{DeviceError, DeviceFailure, SensorDevice, ValveDevice};
pub use error::{IrrigationError, Result};
pub use irrigator::Irrigator;
pub use report::{FailedDeviceReport, FailureReport, SensorReport, ValveReport, ZoneReport};
pub use schedule::{DaySet, MilitaryTime, Mode};
pub use store::{MemoryStore, Store, StoreFailure};
