//! Device capability contracts and the retry discipline wrapped around them.
//!
//! Drivers only report that a single attempt failed (`DeviceError`).  The
//! retry wrapper turns three failed attempts in a row into a `DeviceFailure`
//! that names the device, and failures from several devices touched by one
//! logical operation merge into a single report.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, warn};

/// Total attempts per device call before the device is declared failed.
pub const MAX_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Driver contracts
// ---------------------------------------------------------------------------

/// One failed attempt reported by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DeviceError(pub String);

/// A soil moisture probe.  Returns a level in `0..=100`.
pub trait SensorDevice: Send + Sync {
    fn read(&mut self) -> Result<u8, DeviceError>;
}

/// A water valve actuator.
pub trait ValveDevice: Send + Sync {
    fn open(&mut self) -> Result<(), DeviceError>;
    fn close(&mut self) -> Result<(), DeviceError>;
}

// ---------------------------------------------------------------------------
// Failure report
// ---------------------------------------------------------------------------

/// Ids of every device that failed during one logical operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("device failure: {}", join_ids(.devices))]
pub struct DeviceFailure {
    devices: BTreeSet<String>,
}

fn join_ids(ids: &BTreeSet<String>) -> String {
    ids.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

impl DeviceFailure {
    pub fn single(device_id: impl Into<String>) -> Self {
        let mut devices = BTreeSet::new();
        devices.insert(device_id.into());
        Self { devices }
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: DeviceFailure) {
        self.devices.extend(other.devices);
    }

    /// Merge the error side of `result`, passing the success value through.
    pub fn absorb<T>(&mut self, result: Result<T, DeviceFailure>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.merge(e);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.contains(device_id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(String::as_str)
    }

    /// `Ok(())` when nothing failed, otherwise the accumulated report.
    pub fn into_result(self) -> Result<(), DeviceFailure> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

// ---------------------------------------------------------------------------
// Retry wrapper
// ---------------------------------------------------------------------------

/// Run `op` up to [`MAX_ATTEMPTS`] times.  The first two failures are
/// absorbed; the last one becomes a `DeviceFailure` naming `device_id`.
pub(crate) fn with_retries<T>(
    device_id: &str,
    mut op: impl FnMut() -> Result<T, DeviceError>,
) -> Result<T, DeviceFailure> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < MAX_ATTEMPTS => {
                debug!(device = %device_id, attempt, "device call failed, retrying: {e}");
                attempt += 1;
            }
            Err(e) => {
                warn!(device = %device_id, attempts = attempt, "device declared failed: {e}");
                return Err(DeviceFailure::single(device_id));
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted devices: each call pops the next outcome, and an empty script
    //! means success.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub(crate) struct Script {
        outcomes: Arc<Mutex<VecDeque<bool>>>,
        calls: Arc<Mutex<u32>>,
    }

    impl Script {
        /// Queue `n` consecutive failing attempts.
        pub(crate) fn fail(&self, n: usize) {
            let mut q = self.outcomes.lock().unwrap();
            q.extend(std::iter::repeat(false).take(n));
        }

        pub(crate) fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }

        fn next(&self) -> Result<(), DeviceError> {
            *self.calls.lock().unwrap() += 1;
            match self.outcomes.lock().unwrap().pop_front() {
                Some(false) => Err(DeviceError("scripted fault".into())),
                _ => Ok(()),
            }
        }
    }

    pub(crate) struct FakeSensor {
        pub(crate) script: Script,
        pub(crate) level: Arc<Mutex<u8>>,
    }

    impl FakeSensor {
        pub(crate) fn new(level: u8) -> (Self, Script, Arc<Mutex<u8>>) {
            let script = Script::default();
            let level = Arc::new(Mutex::new(level));
            let sensor = Self {
                script: script.clone(),
                level: Arc::clone(&level),
            };
            (sensor, script, level)
        }
    }

    impl SensorDevice for FakeSensor {
        fn read(&mut self) -> Result<u8, DeviceError> {
            self.script.next()?;
            Ok(*self.level.lock().unwrap())
        }
    }

    pub(crate) struct FakeValve {
        pub(crate) script: Script,
    }

    impl FakeValve {
        pub(crate) fn new() -> (Self, Script) {
            let script = Script::default();
            (
                Self {
                    script: script.clone(),
                },
                script,
            )
        }
    }

    impl ValveDevice for FakeValve {
        fn open(&mut self) -> Result<(), DeviceError> {
            self.script.next()
        }

        fn close(&mut self) -> Result<(), DeviceError> {
            self.script.next()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flaky(failures: u32) -> impl FnMut() -> Result<u8, DeviceError> {
        let mut left = failures;
        move || {
            if left > 0 {
                left -= 1;
                Err(DeviceError("no response".into()))
            } else {
                Ok(42)
            }
        }
    }

    // -- with_retries -------------------------------------------------------

    #[test]
    fn retries_absorb_one_failure() {
        assert_eq!(with_retries("s1", flaky(1)), Ok(42));
    }

    #[test]
    fn retries_absorb_two_failures() {
        assert_eq!(with_retries("s1", flaky(2)), Ok(42));
    }

    #[test]
    fn third_failure_names_the_device() {
        let err = with_retries("s1", flaky(3)).unwrap_err();
        assert!(err.contains("s1"));
        assert_eq!(err.devices().count(), 1);
    }

    #[test]
    fn gives_up_after_three_attempts() {
        let mut calls = 0;
        let _ = with_retries("v1", || -> Result<(), DeviceError> {
            calls += 1;
            Err(DeviceError("stuck".into()))
        });
        assert_eq!(calls, MAX_ATTEMPTS);
    }

    // -- DeviceFailure ------------------------------------------------------

    #[test]
    fn merge_is_additive_and_deduplicates() {
        let mut f = DeviceFailure::single("v1");
        f.merge(DeviceFailure::single("v2"));
        f.merge(DeviceFailure::single("v1"));
        let ids: Vec<&str> = f.devices().collect();
        assert_eq!(ids, vec!["v1", "v2"]);
    }

    #[test]
    fn empty_report_is_ok() {
        assert!(DeviceFailure::default().into_result().is_ok());
        assert!(DeviceFailure::single("s1").into_result().is_err());
    }

    #[test]
    fn absorb_passes_values_through() {
        let mut f = DeviceFailure::default();
        assert_eq!(f.absorb(Ok::<_, DeviceFailure>(7)), Some(7));
        assert_eq!(f.absorb(Err::<u8, _>(DeviceFailure::single("s9"))), None);
        assert!(f.contains("s9"));
    }

    #[test]
    fn display_lists_ids() {
        let mut f = DeviceFailure::single("b");
        f.merge(DeviceFailure::single("a"));
        assert_eq!(f.to_string(), "device failure: a, b");
    }
}
