use tracing::warn;

use crate::device::{with_retries, DeviceError, DeviceFailure, SensorDevice};

/// A zone's moisture sensor plus its health bookkeeping.
pub struct Sensor {
    id: String,
    location: String,
    device: Box<dyn SensorDevice>,
    is_failed: bool,
    /// True while the store reflects `is_failed`.
    is_recorded: bool,
    last_level: Option<u8>,
}

impl Sensor {
    pub fn new(id: impl Into<String>, location: impl Into<String>, device: Box<dyn SensorDevice>) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            device,
            is_failed: false,
            is_recorded: true,
            last_level: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_failed(&self) -> bool {
        self.is_failed
    }

    pub fn is_recorded(&self) -> bool {
        self.is_recorded
    }

    pub fn last_level(&self) -> Option<u8> {
        self.last_level
    }

    /// Read the moisture level.  A sensor already marked failed is not
    /// touched; its id is reported straight away.
    pub fn read(&mut self) -> Result<u8, DeviceFailure> {
        if self.is_failed {
            return Err(DeviceFailure::single(&self.id));
        }
        let device = &mut self.device;
        let result = with_retries(&self.id, || {
            let level = device.read()?;
            if level > 100 {
                return Err(DeviceError(format!("level {level} out of range")));
            }
            Ok(level)
        });
        match result {
            Ok(level) => {
                self.last_level = Some(level);
                Ok(level)
            }
            Err(e) => {
                self.set_failed(true);
                Err(e)
            }
        }
    }

    /// Change the failed flag.  Any change leaves the sensor unrecorded until
    /// the store catches up.
    pub fn set_failed(&mut self, failed: bool) {
        if self.is_failed != failed {
            self.is_recorded = false;
        }
        self.is_failed = failed;
        if failed {
            warn!(sensor = %self.id, "sensor marked failed");
        }
    }

    pub fn set_recorded(&mut self, recorded: bool) {
        self.is_recorded = recorded;
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testing::FakeSensor;

    #[test]
    fn two_failed_reads_are_absorbed() {
        let (dev, script, _) = FakeSensor::new(40);
        let mut sensor = Sensor::new("s1", "bed", Box::new(dev));
        script.fail(2);
        assert_eq!(sensor.read(), Ok(40));
        assert!(!sensor.is_failed());
        assert_eq!(sensor.last_level(), Some(40));
    }

    #[test]
    fn third_failed_read_marks_sensor_failed() {
        let (dev, script, _) = FakeSensor::new(40);
        let mut sensor = Sensor::new("s1", "bed", Box::new(dev));
        script.fail(3);
        let err = sensor.read().unwrap_err();
        assert!(err.contains("s1"));
        assert!(sensor.is_failed());
        assert!(!sensor.is_recorded());
    }

    #[test]
    fn failed_sensor_is_not_called_again() {
        let (dev, script, _) = FakeSensor::new(40);
        let mut sensor = Sensor::new("s1", "bed", Box::new(dev));
        script.fail(3);
        let _ = sensor.read();
        let calls = script.calls();
        assert!(sensor.read().is_err());
        assert_eq!(script.calls(), calls);
    }

    #[test]
    fn out_of_range_level_counts_as_failed_attempt() {
        let (dev, _, _) = FakeSensor::new(150);
        let mut sensor = Sensor::new("s1", "bed", Box::new(dev));
        assert!(sensor.read().is_err());
        assert!(sensor.is_failed());
    }

    #[test]
    fn repair_makes_sensor_readable_again() {
        let (dev, script, _) = FakeSensor::new(55);
        let mut sensor = Sensor::new("s1", "bed", Box::new(dev));
        script.fail(3);
        let _ = sensor.read();
        sensor.set_failed(false);
        assert_eq!(sensor.read(), Ok(55));
    }
}
