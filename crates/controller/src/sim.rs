//! Simulated soil and field devices for running the controller without
//! hardware.
//!
//! Each zone gets a `SoilModel` shared by its sensor and valves:
//! - Moisture drifts drier on every read (evaporation)
//! - Every open valve in the zone wets the soil while it stays open
//! - Readings carry Gaussian probe noise
//!
//! Devices fail individual attempts at their configured `failure_rate`, which
//! exercises the controller's retry and failure recording paths.

use std::sync::{Arc, Mutex};

use irrigation_core::{DeviceError, SensorDevice, ValveDevice};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Gaussian approximation
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

/// Fail one attempt with probability `rate`.
fn inject_fault(rate: f32, device_id: &str, action: &str) -> Result<(), DeviceError> {
    if fastrand::f32() < rate {
        return Err(DeviceError(format!("{device_id}: simulated {action} fault")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Soil model
// ---------------------------------------------------------------------------

/// `[soil]` section of the config file.  Levels are moisture percent, rates
/// are per read (one read per tick while a cycle watches the zone).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SoilParams {
    pub start_level: f64,
    pub dry_rate: f64,
    /// Moisture added per open valve per read.
    pub wet_rate: f64,
    pub noise_sigma: f64,
}

impl Default for SoilParams {
    fn default() -> Self {
        Self {
            start_level: 40.0,
            dry_rate: 0.2,
            wet_rate: 2.5,
            noise_sigma: 1.0,
        }
    }
}

pub struct SoilModel {
    /// "True" moisture, 0..=100.
    level: f64,
    params: SoilParams,
    open_valves: usize,
}

pub type SharedSoil = Arc<Mutex<SoilModel>>;

impl SoilModel {
    pub fn new(params: SoilParams) -> Self {
        Self {
            level: params.start_level.clamp(0.0, 100.0),
            params,
            open_valves: 0,
        }
    }

    pub fn shared(params: SoilParams) -> SharedSoil {
        Arc::new(Mutex::new(Self::new(params)))
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn open_valves(&self) -> usize {
        self.open_valves
    }

    /// Advance the soil by one read and return a noisy probe reading.
    pub fn sample(&mut self) -> u8 {
        self.level -= self.params.dry_rate;
        self.level += self.params.wet_rate * self.open_valves as f64;
        self.level = self.level.clamp(0.0, 100.0);

        gaussian(self.level, self.params.noise_sigma)
            .round()
            .clamp(0.0, 100.0) as u8
    }

    fn valve_opened(&mut self) {
        self.open_valves += 1;
    }

    fn valve_closed(&mut self) {
        self.open_valves = self.open_valves.saturating_sub(1);
    }
}

fn lock<'a>(soil: &'a SharedSoil, device_id: &str) -> Result<std::sync::MutexGuard<'a, SoilModel>, DeviceError> {
    soil.lock()
        .map_err(|_| DeviceError(format!("{device_id}: soil model poisoned")))
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

pub struct SimSensor {
    id: String,
    soil: SharedSoil,
    failure_rate: f32,
}

impl SimSensor {
    pub fn new(id: impl Into<String>, soil: SharedSoil, failure_rate: f32) -> Self {
        Self {
            id: id.into(),
            soil,
            failure_rate,
        }
    }
}

impl SensorDevice for SimSensor {
    fn read(&mut self) -> Result<u8, DeviceError> {
        inject_fault(self.failure_rate, &self.id, "read")?;
        Ok(lock(&self.soil, &self.id)?.sample())
    }
}

pub struct SimValve {
    id: String,
    soil: SharedSoil,
    failure_rate: f32,
    open: bool,
}

impl SimValve {
    pub fn new(id: impl Into<String>, soil: SharedSoil, failure_rate: f32) -> Self {
        Self {
            id: id.into(),
            soil,
            failure_rate,
            open: false,
        }
    }
}

impl ValveDevice for SimValve {
    fn open(&mut self) -> Result<(), DeviceError> {
        inject_fault(self.failure_rate, &self.id, "open")?;
        if !self.open {
            lock(&self.soil, &self.id)?.valve_opened();
            self.open = true;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        inject_fault(self.failure_rate, &self.id, "close")?;
        if self.open {
            lock(&self.soil, &self.id)?.valve_closed();
            self.open = false;
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(start_level: f64) -> SoilParams {
        SoilParams {
            start_level,
            noise_sigma: 0.0,
            ..SoilParams::default()
        }
    }

    // -- SoilModel ----------------------------------------------------------

    #[test]
    fn soil_dries_without_water() {
        let mut soil = SoilModel::new(quiet(50.0));
        for _ in 0..10 {
            soil.sample();
        }
        assert!(soil.level() < 50.0);
    }

    #[test]
    fn open_valves_wet_the_soil() {
        let soil = SoilModel::shared(quiet(20.0));
        let mut a = SimValve::new("v1", Arc::clone(&soil), 0.0);
        let mut b = SimValve::new("v2", Arc::clone(&soil), 0.0);
        a.open().unwrap();
        b.open().unwrap();
        let mut sensor = SimSensor::new("s1", Arc::clone(&soil), 0.0);
        let first = sensor.read().unwrap();
        let later = (0..5).map(|_| sensor.read().unwrap()).last().unwrap();
        assert!(later > first, "expected {later} > {first}");
    }

    #[test]
    fn level_stays_in_range() {
        let mut soil = SoilModel::new(SoilParams {
            start_level: 99.0,
            wet_rate: 50.0,
            noise_sigma: 5.0,
            ..SoilParams::default()
        });
        soil.valve_opened();
        for _ in 0..50 {
            assert!(soil.sample() <= 100);
        }
        assert_eq!(soil.level(), 100.0);
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let n = 5000;
        let sum: f64 = (0..n).map(|_| approx_std_normal()).sum();
        let mean = sum / n as f64;
        assert!(mean.abs() < 0.15, "mean should be near zero: {mean}");
    }

    // -- Devices ------------------------------------------------------------

    #[test]
    fn repeated_open_counts_once() {
        let soil = SoilModel::shared(quiet(30.0));
        let mut v = SimValve::new("v1", Arc::clone(&soil), 0.0);
        v.open().unwrap();
        v.open().unwrap();
        assert_eq!(soil.lock().unwrap().open_valves(), 1);
        v.close().unwrap();
        v.close().unwrap();
        assert_eq!(soil.lock().unwrap().open_valves(), 0);
    }

    #[test]
    fn certain_failure_rate_always_fails() {
        let soil = SoilModel::shared(quiet(30.0));
        let mut s = SimSensor::new("s1", Arc::clone(&soil), 1.0);
        let mut v = SimValve::new("v1", Arc::clone(&soil), 1.0);
        assert!(s.read().is_err());
        assert!(v.open().is_err());
        assert_eq!(soil.lock().unwrap().open_valves(), 0);
    }

    #[test]
    fn soil_section_defaults() {
        let params: SoilParams = toml::from_str("dry_rate = 1.0").unwrap();
        assert_eq!(params.dry_rate, 1.0);
        assert_eq!(params.start_level, SoilParams::default().start_level);
    }
}
