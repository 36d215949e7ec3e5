use tracing::{info, warn};

use crate::device::{with_retries, DeviceFailure, ValveDevice};

/// A zone valve: driver handle, open/failed state, and per-cycle minutes.
pub struct Valve {
    id: String,
    location: String,
    kind: String,
    /// Gallons per minute.
    flow_rate: u32,
    device: Box<dyn ValveDevice>,
    is_open: bool,
    is_failed: bool,
    is_recorded: bool,
    minutes_open: u32,
}

impl Valve {
    pub fn new(
        id: impl Into<String>,
        location: impl Into<String>,
        kind: impl Into<String>,
        flow_rate: u32,
        device: Box<dyn ValveDevice>,
    ) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            kind: kind.into(),
            flow_rate,
            device,
            is_open: false,
            is_failed: false,
            is_recorded: true,
            minutes_open: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn flow_rate(&self) -> u32 {
        self.flow_rate
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn is_failed(&self) -> bool {
        self.is_failed
    }

    pub fn is_recorded(&self) -> bool {
        self.is_recorded
    }

    pub fn minutes_open(&self) -> u32 {
        self.minutes_open
    }

    /// Gallons delivered since the last reset.
    pub fn water_used(&self) -> u32 {
        self.flow_rate.saturating_mul(self.minutes_open)
    }

    pub fn open(&mut self) -> Result<(), DeviceFailure> {
        self.actuate(true)
    }

    pub fn close(&mut self) -> Result<(), DeviceFailure> {
        self.actuate(false)
    }

    pub fn toggle(&mut self) -> Result<(), DeviceFailure> {
        self.actuate(!self.is_open)
    }

    fn actuate(&mut self, open: bool) -> Result<(), DeviceFailure> {
        if self.is_failed {
            return Err(DeviceFailure::single(&self.id));
        }
        let device = &mut self.device;
        let result = with_retries(&self.id, || {
            if open {
                device.open()
            } else {
                device.close()
            }
        });
        match result {
            Ok(()) => {
                self.is_open = open;
                info!(valve = %self.id, open, "valve actuated");
                Ok(())
            }
            Err(e) => {
                self.set_failed(true);
                Err(e)
            }
        }
    }

    /// Advance one minute of bookkeeping.  Only an open, working valve
    /// accumulates time.
    pub fn tick(&mut self) {
        if self.is_open && !self.is_failed {
            self.minutes_open += 1;
        }
    }

    pub fn reset(&mut self) {
        self.minutes_open = 0;
    }

    /// A failed valve is always considered closed.
    pub fn set_failed(&mut self, failed: bool) {
        if self.is_failed != failed {
            self.is_recorded = false;
        }
        self.is_failed = failed;
        if failed {
            self.is_open = false;
            warn!(valve = %self.id, "valve marked failed");
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
    use crate::device::testing::FakeValve;

    fn valve(flow: u32) -> (Valve, crate::device::testing::Script) {
        let (dev, script) = FakeValve::new();
        (Valve::new("v1", "north bed", "drip", flow, Box::new(dev)), script)
    }

    #[test]
    fn open_survives_two_failures() {
        let (mut v, script) = valve(10);
        script.fail(2);
        v.open().unwrap();
        assert!(v.is_open());
        assert!(!v.is_failed());
    }

    #[test]
    fn third_failure_fails_and_closes_valve() {
        let (mut v, script) = valve(10);
        v.open().unwrap();
        script.fail(3);
        let err = v.close().unwrap_err();
        assert!(err.contains("v1"));
        assert!(v.is_failed());
        assert!(!v.is_open());
    }

    #[test]
    fn marking_failed_forces_closed() {
        let (mut v, _) = valve(10);
        v.open().unwrap();
        v.set_failed(true);
        assert!(!v.is_open());
        assert!(!v.is_recorded());
    }

    #[test]
    fn water_used_is_flow_times_minutes() {
        let (mut v, _) = valve(12);
        v.open().unwrap();
        for _ in 0..5 {
            v.tick();
        }
        assert_eq!(v.minutes_open(), 5);
        assert_eq!(v.water_used(), 60);
        v.reset();
        assert_eq!(v.water_used(), 0);
    }

    #[test]
    fn huge_flow_rate_saturates_instead_of_overflowing() {
        let (mut v, _) = valve(u32::MAX / 2);
        v.open().unwrap();
        for _ in 0..3 {
            v.tick();
        }
        assert_eq!(v.water_used(), u32::MAX);
    }

    #[test]
    fn closed_valve_does_not_accumulate() {
        let (mut v, _) = valve(12);
        v.tick();
        assert_eq!(v.minutes_open(), 0);
    }

    #[test]
    fn toggle_flips_state() {
        let (mut v, _) = valve(5);
        v.toggle().unwrap();
        assert!(v.is_open());
        v.toggle().unwrap();
        assert!(!v.is_open());
    }

    #[test]
    fn failed_valve_is_not_actuated() {
        let (mut v, script) = valve(5);
        v.set_failed(true);
        assert!(v.open().is_err());
        assert_eq!(script.calls(), 0);
    }
}
