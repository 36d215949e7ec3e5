use tracing::debug;

use crate::device::DeviceFailure;
use crate::error::{IrrigationError, Result};
use crate::report::{FailedDeviceReport, SensorReport, ValveReport, ZoneReport};
use crate::sensor::Sensor;
use crate::valve::Valve;

/// Highest moisture level a sensor can report.
pub const MAX_LEVEL: u32 = 100;

/// An irrigated area: one sensor, its valves, thresholds and the running
/// tally for the current cycle.
pub struct Zone {
    id: String,
    location: String,
    /// Irrigate when the measured level is below this.
    critical_level: u8,
    maximal_level: u8,
    sensor: Option<Sensor>,
    valves: Vec<Valve>,
    /// Gallons this zone may use in the current cycle.
    allocation: u32,
    water_used: u32,
}

impl Zone {
    pub fn new(id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            critical_level: 0,
            maximal_level: MAX_LEVEL as u8,
            sensor: None,
            valves: Vec::new(),
            allocation: 0,
            water_used: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn critical_level(&self) -> u8 {
        self.critical_level
    }

    pub fn maximal_level(&self) -> u8 {
        self.maximal_level
    }

    pub fn sensor(&self) -> Option<&Sensor> {
        self.sensor.as_ref()
    }

    pub fn valves(&self) -> &[Valve] {
        &self.valves
    }

    pub fn allocation(&self) -> u32 {
        self.allocation
    }

    pub fn set_allocation(&mut self, gallons: u32) {
        self.allocation = gallons;
    }

    pub fn water_used(&self) -> u32 {
        self.water_used
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    pub fn install_sensor(&mut self, sensor: Sensor) -> Result<()> {
        if self.sensor.is_some() {
            return Err(IrrigationError::SensorAlreadyInstalled(self.id.clone()));
        }
        self.sensor = Some(sensor);
        Ok(())
    }

    pub fn add_valve(&mut self, valve: Valve) {
        self.valves.push(valve);
    }

    pub fn set_critical_moisture_level(&mut self, level: u32) -> Result<()> {
        self.critical_level = checked_level(level)?;
        Ok(())
    }

    pub fn set_maximal_moisture_level(&mut self, level: u32) -> Result<()> {
        self.maximal_level = checked_level(level)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sensing
    // -----------------------------------------------------------------------

    /// Current moisture level, or `None` when no sensor is installed.
    pub fn measured_moisture_level(&mut self) -> std::result::Result<Option<u8>, DeviceFailure> {
        match self.sensor.as_mut() {
            Some(sensor) => sensor.read().map(Some),
            None => Ok(None),
        }
    }

    /// Whether the zone is below its critical level and should be watered.
    /// Unreadable or missing sensors count as "not dry".
    pub fn is_dry(&mut self) -> std::result::Result<bool, DeviceFailure> {
        let critical = self.critical_level;
        Ok(matches!(self.measured_moisture_level()?, Some(level) if level < critical))
    }

    /// Zone-completion predicate: allocation used up, moisture at or above
    /// the critical level, or no working valve left.  A failed sensor only
    /// disables the moisture test.
    pub fn is_irrigated(&mut self) -> std::result::Result<bool, DeviceFailure> {
        if self.allocation <= self.water_used || self.working_valve_count() == 0 {
            return Ok(true);
        }
        match self.sensor.as_ref() {
            Some(s) if !s.is_failed() => {}
            _ => return Ok(false),
        }
        let critical = self.critical_level;
        Ok(matches!(self.measured_moisture_level()?, Some(level) if level >= critical))
    }

    // -----------------------------------------------------------------------
    // Valves
    // -----------------------------------------------------------------------

    pub fn working_valve_count(&self) -> usize {
        self.valves.iter().filter(|v| !v.is_failed()).count()
    }

    pub fn has_open_valve(&self) -> bool {
        self.valves.iter().any(Valve::is_open)
    }

    pub fn toggle_valve(&mut self, valve_id: &str) -> Result<()> {
        let valve = self
            .valves
            .iter_mut()
            .find(|v| v.id() == valve_id)
            .ok_or_else(|| IrrigationError::UnknownDevice(valve_id.to_string()))?;
        if valve.is_failed() {
            debug!(valve = %valve_id, "toggle skipped, valve is failed");
            return Ok(());
        }
        valve.toggle()?;
        Ok(())
    }

    /// Open every working valve.  A failing valve does not stop the rest.
    pub fn open_all_valves(&mut self) -> std::result::Result<(), DeviceFailure> {
        self.for_each_working_valve(Valve::open)
    }

    /// Close every working valve.  A failing valve does not stop the rest.
    pub fn close_all_valves(&mut self) -> std::result::Result<(), DeviceFailure> {
        self.for_each_working_valve(Valve::close)
    }

    fn for_each_working_valve(
        &mut self,
        op: fn(&mut Valve) -> std::result::Result<(), DeviceFailure>,
    ) -> std::result::Result<(), DeviceFailure> {
        let mut failure = DeviceFailure::default();
        for valve in self.valves.iter_mut().filter(|v| !v.is_failed()) {
            failure.absorb(op(valve));
        }
        failure.into_result()
    }

    // -----------------------------------------------------------------------
    // Cycle bookkeeping
    // -----------------------------------------------------------------------

    /// Start-of-cycle reset.  Failed valves keep their counters.
    pub fn reset(&mut self) {
        for valve in self.valves.iter_mut().filter(|v| !v.is_failed()) {
            valve.reset();
        }
        self.allocation = 0;
        self.recompute_water_used();
    }

    pub fn tick(&mut self) {
        for valve in &mut self.valves {
            valve.tick();
        }
        self.recompute_water_used();
    }

    fn recompute_water_used(&mut self) {
        self.water_used = self
            .valves
            .iter()
            .map(Valve::water_used)
            .fold(0, u32::saturating_add);
    }

    // -----------------------------------------------------------------------
    // Device health
    // -----------------------------------------------------------------------

    pub fn has_device(&self, device_id: &str) -> bool {
        self.sensor.as_ref().is_some_and(|s| s.id() == device_id)
            || self.valves.iter().any(|v| v.id() == device_id)
    }

    /// Clear the failed flag.  Returns whether the id belongs to this zone.
    pub fn repair_device(&mut self, device_id: &str) -> bool {
        self.set_device_failed(device_id, false)
    }

    /// Reflect an externally known failure state.  Returns whether the id
    /// belongs to this zone.
    pub fn set_device_failed(&mut self, device_id: &str, failed: bool) -> bool {
        if let Some(sensor) = self.sensor.as_mut().filter(|s| s.id() == device_id) {
            sensor.set_failed(failed);
            return true;
        }
        if let Some(valve) = self.valves.iter_mut().find(|v| v.id() == device_id) {
            valve.set_failed(failed);
            return true;
        }
        false
    }

    pub fn set_device_recorded(&mut self, device_id: &str, recorded: bool) -> bool {
        if let Some(sensor) = self.sensor.as_mut().filter(|s| s.id() == device_id) {
            sensor.set_recorded(recorded);
            return true;
        }
        if let Some(valve) = self.valves.iter_mut().find(|v| v.id() == device_id) {
            valve.set_recorded(recorded);
            return true;
        }
        false
    }

    /// Devices whose failure state has not reached the store yet, with that
    /// state.
    pub fn unrecorded_devices(&self) -> Vec<(String, bool)> {
        let sensor = self
            .sensor
            .iter()
            .filter(|s| !s.is_recorded())
            .map(|s| (s.id().to_string(), s.is_failed()));
        let valves = self
            .valves
            .iter()
            .filter(|v| !v.is_recorded())
            .map(|v| (v.id().to_string(), v.is_failed()));
        sensor.chain(valves).collect()
    }

    // -----------------------------------------------------------------------
    // Reports
    // -----------------------------------------------------------------------

    pub fn report(&self) -> ZoneReport {
        ZoneReport {
            id: self.id.clone(),
            location: self.location.clone(),
            critical_level: self.critical_level,
            max_level: self.maximal_level,
        }
    }

    pub fn valve_reports(&self) -> Vec<ValveReport> {
        self.valves
            .iter()
            .map(|v| ValveReport {
                id: v.id().to_string(),
                location: v.location().to_string(),
                zone_id: self.id.clone(),
                is_open: v.is_open(),
                is_failed: v.is_failed(),
                is_recorded: v.is_recorded(),
                flow_rate: v.flow_rate(),
                minutes_open: v.minutes_open(),
            })
            .collect()
    }

    pub fn sensor_report(&self) -> Option<SensorReport> {
        self.sensor.as_ref().map(|s| SensorReport {
            id: s.id().to_string(),
            location: s.location().to_string(),
            zone_id: self.id.clone(),
            is_failed: s.is_failed(),
            is_recorded: s.is_recorded(),
            level: s.last_level(),
        })
    }

    /// Snapshot of one device for the failure notice, if it lives here.
    pub fn failed_device_report(&self, device_id: &str) -> Option<FailedDeviceReport> {
        if let Some(s) = self.sensor.as_ref().filter(|s| s.id() == device_id) {
            return Some(self.device_report(s.id(), s.location(), s.is_recorded()));
        }
        self.valves
            .iter()
            .find(|v| v.id() == device_id)
            .map(|v| self.device_report(v.id(), v.location(), v.is_recorded()))
    }

    pub fn failed_sensor_reports(&self) -> Vec<FailedDeviceReport> {
        self.sensor
            .iter()
            .filter(|s| s.is_failed())
            .map(|s| self.device_report(s.id(), s.location(), s.is_recorded()))
            .collect()
    }

    pub fn failed_valve_reports(&self) -> Vec<FailedDeviceReport> {
        self.valves
            .iter()
            .filter(|v| v.is_failed())
            .map(|v| self.device_report(v.id(), v.location(), v.is_recorded()))
            .collect()
    }

    fn device_report(&self, device_id: &str, location: &str, is_recorded: bool) -> FailedDeviceReport {
        FailedDeviceReport {
            device_id: device_id.to_string(),
            zone_id: self.id.clone(),
            location: location.to_string(),
            is_recorded,
        }
    }
}

fn checked_level(level: u32) -> Result<u8> {
    if level > MAX_LEVEL {
        return Err(IrrigationError::LevelOutOfRange(level));
    }
    Ok(level as u8)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::device::testing::{FakeSensor, FakeValve, Script};
    use std::sync::{Arc, Mutex};

    /// Handles into a test zone's fake devices.
    pub(crate) struct Rig {
        pub(crate) level: Arc<Mutex<u8>>,
        pub(crate) sensor: Script,
        pub(crate) valves: Vec<Script>,
    }

    /// A zone whose sensor reads `level` and whose valves have the given
    /// flow rates, named `<id>-v0`, `<id>-v1`, ...
    pub(crate) fn rigged_zone(id: &str, level: u8, flows: &[u32]) -> (Zone, Rig) {
        let mut zone = Zone::new(id, format!("{id} bed"));
        let (dev, sensor, level) = FakeSensor::new(level);
        zone.install_sensor(Sensor::new(format!("{id}-s"), "probe", Box::new(dev)))
            .unwrap();
        let mut valves = Vec::new();
        for (i, &flow) in flows.iter().enumerate() {
            let (dev, script) = FakeValve::new();
            zone.add_valve(Valve::new(format!("{id}-v{i}"), "line", "drip", flow, Box::new(dev)));
            valves.push(script);
        }
        (zone, Rig { level, sensor, valves })
    }

    // -- thresholds ---------------------------------------------------------

    #[test]
    fn levels_outside_range_rejected() {
        let (mut z, _) = rigged_zone("z1", 50, &[10]);
        assert!(matches!(
            z.set_critical_moisture_level(101),
            Err(IrrigationError::LevelOutOfRange(101))
        ));
        assert!(z.set_maximal_moisture_level(250).is_err());
        z.set_critical_moisture_level(100).unwrap();
        z.set_maximal_moisture_level(0).unwrap();
        assert_eq!(z.critical_level(), 100);
        assert_eq!(z.maximal_level(), 0);
    }

    #[test]
    fn second_sensor_rejected() {
        let (mut z, _) = rigged_zone("z1", 50, &[]);
        let (dev, _, _) = FakeSensor::new(1);
        assert!(z.install_sensor(Sensor::new("other", "x", Box::new(dev))).is_err());
    }

    // -- is_irrigated: each disjunct ----------------------------------------

    #[test]
    fn irrigated_when_allocation_exhausted() {
        let (mut z, _) = rigged_zone("z1", 10, &[10]);
        z.set_critical_moisture_level(50).unwrap();
        z.set_allocation(30);
        z.open_all_valves().unwrap();
        assert!(!z.is_irrigated().unwrap());
        for _ in 0..3 {
            z.tick();
        }
        assert_eq!(z.water_used(), 30);
        assert!(z.is_irrigated().unwrap());
    }

    #[test]
    fn irrigated_when_moisture_reaches_critical() {
        let (mut z, rig) = rigged_zone("z1", 10, &[10]);
        z.set_critical_moisture_level(50).unwrap();
        z.set_allocation(1000);
        assert!(!z.is_irrigated().unwrap());
        *rig.level.lock().unwrap() = 50;
        assert!(z.is_irrigated().unwrap());
    }

    #[test]
    fn irrigated_when_no_working_valves() {
        let (mut z, _) = rigged_zone("z1", 10, &[10, 12]);
        z.set_critical_moisture_level(50).unwrap();
        z.set_allocation(1000);
        assert!(!z.is_irrigated().unwrap());
        z.set_device_failed("z1-v0", true);
        z.set_device_failed("z1-v1", true);
        assert_eq!(z.working_valve_count(), 0);
        assert!(z.is_irrigated().unwrap());
    }

    #[test]
    fn failed_sensor_only_disables_moisture_test() {
        let (mut z, rig) = rigged_zone("z1", 10, &[10]);
        z.set_critical_moisture_level(50).unwrap();
        z.set_allocation(1000);
        rig.sensor.fail(3);
        assert!(z.is_irrigated().is_err());
        assert!(!z.is_irrigated().unwrap());
    }

    // -- valves -------------------------------------------------------------

    #[test]
    fn open_all_attempts_every_valve_and_merges_failures() {
        let (mut z, rig) = rigged_zone("z1", 10, &[10, 12, 8]);
        rig.valves[0].fail(3);
        rig.valves[2].fail(3);
        let err = z.open_all_valves().unwrap_err();
        assert!(err.contains("z1-v0"));
        assert!(err.contains("z1-v2"));
        assert!(z.valves()[1].is_open());
        assert_eq!(z.working_valve_count(), 1);
    }

    #[test]
    fn close_all_skips_failed_valves() {
        let (mut z, rig) = rigged_zone("z1", 10, &[10, 12]);
        z.set_device_failed("z1-v0", true);
        let before = rig.valves[0].calls();
        z.close_all_valves().unwrap();
        assert_eq!(rig.valves[0].calls(), before);
    }

    #[test]
    fn toggle_unknown_valve_rejected() {
        let (mut z, _) = rigged_zone("z1", 10, &[10]);
        assert!(matches!(
            z.toggle_valve("nope"),
            Err(IrrigationError::UnknownDevice(_))
        ));
    }

    #[test]
    fn toggle_failure_surfaces_as_device_error() {
        let (mut z, rig) = rigged_zone("z1", 10, &[10]);
        rig.valves[0].fail(3);
        match z.toggle_valve("z1-v0") {
            Err(IrrigationError::Device(f)) => assert!(f.contains("z1-v0")),
            other => panic!("expected device failure, got {other:?}"),
        }
    }

    // -- bookkeeping --------------------------------------------------------

    #[test]
    fn tick_accumulates_open_valves_only() {
        let (mut z, _) = rigged_zone("z1", 10, &[10, 12]);
        z.toggle_valve("z1-v1").unwrap();
        z.tick();
        z.tick();
        assert_eq!(z.water_used(), 24);
        z.reset();
        assert_eq!(z.water_used(), 0);
    }

    #[test]
    fn zone_usage_saturates() {
        let (mut z, _) = rigged_zone("z1", 50, &[u32::MAX, u32::MAX]);
        z.open_all_valves().unwrap();
        z.tick();
        assert_eq!(z.water_used(), u32::MAX);
    }

    #[test]
    fn repair_reports_ownership_and_clears_flag() {
        let (mut z, _) = rigged_zone("z1", 10, &[10]);
        z.set_device_failed("z1-s", true);
        assert!(z.sensor().unwrap().is_failed());
        assert!(z.repair_device("z1-s"));
        assert!(!z.sensor().unwrap().is_failed());
        assert!(!z.repair_device("elsewhere"));
    }

    #[test]
    fn repaired_valve_ticks_again() {
        let (mut z, _) = rigged_zone("z1", 10, &[10]);
        z.set_device_failed("z1-v0", true);
        z.repair_device("z1-v0");
        z.open_all_valves().unwrap();
        z.tick();
        assert_eq!(z.water_used(), 10);
    }

    #[test]
    fn unrecorded_devices_follow_state_changes() {
        let (mut z, _) = rigged_zone("z1", 10, &[10]);
        assert!(z.unrecorded_devices().is_empty());
        z.set_device_failed("z1-v0", true);
        assert_eq!(z.unrecorded_devices(), vec![("z1-v0".to_string(), true)]);
        z.set_device_recorded("z1-v0", true);
        assert!(z.unrecorded_devices().is_empty());
    }

    // -- reports ------------------------------------------------------------

    #[test]
    fn reports_reflect_state() {
        let (mut z, _) = rigged_zone("z1", 33, &[10]);
        z.measured_moisture_level().unwrap();
        z.toggle_valve("z1-v0").unwrap();
        let s = z.sensor_report().unwrap();
        assert_eq!(s.level, Some(33));
        assert_eq!(s.zone_id, "z1");
        let v = &z.valve_reports()[0];
        assert!(v.is_open);
        assert_eq!(v.flow_rate, 10);
        assert_eq!(z.report().max_level, 100);
    }

    #[test]
    fn failed_device_report_found_by_id() {
        let (mut z, _) = rigged_zone("z1", 33, &[10]);
        z.set_device_failed("z1-v0", true);
        let r = z.failed_device_report("z1-v0").unwrap();
        assert_eq!(r.zone_id, "z1");
        assert!(!r.is_recorded);
        assert_eq!(z.failed_valve_reports().len(), 1);
        assert!(z.failed_sensor_reports().is_empty());
    }
}
