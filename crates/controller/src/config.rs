//! TOML config file loading, validation, and registration of zones, sensors
//! and valves with the irrigator.

use anyhow::{bail, Context, Result};
use irrigation_core::{Irrigator, Store};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

use crate::sim::{SimSensor, SimValve, SoilModel, SoilParams};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub zones: Vec<ZoneEntry>,
    #[serde(default)]
    pub sensors: Vec<SensorEntry>,
    #[serde(default)]
    pub valves: Vec<ValveEntry>,
    #[serde(default)]
    pub soil: SoilParams,
}

#[derive(Debug, Deserialize)]
pub struct ZoneEntry {
    pub zone_id: String,
    pub location: String,
}

#[derive(Debug, Deserialize)]
pub struct SensorEntry {
    pub sensor_id: String,
    pub zone_id: String,
    pub location: String,
    #[serde(default)]
    pub failure_rate: f32,
}

#[derive(Debug, Deserialize)]
pub struct ValveEntry {
    pub valve_id: String,
    pub zone_id: String,
    pub kind: String,
    pub flow_rate_gpm: u32,
    pub location: String,
    #[serde(default)]
    pub failure_rate: f32,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();
        // Zones and devices share one id namespace in the store.
        let mut seen_ids: HashSet<&str> = HashSet::new();

        self.validate_zones(&mut seen_ids, &mut errors);
        self.validate_sensors(&mut seen_ids, &mut errors);
        self.validate_valves(&mut seen_ids, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn zone_ids(&self) -> HashSet<&str> {
        self.zones.iter().map(|z| z.zone_id.as_str()).collect()
    }

    fn validate_zones<'a>(&'a self, seen_ids: &mut HashSet<&'a str>, errors: &mut Vec<String>) {
        let mut sensors_per_zone: HashMap<&str, usize> = HashMap::new();
        for s in &self.sensors {
            *sensors_per_zone.entry(s.zone_id.as_str()).or_default() += 1;
        }

        for (i, z) in self.zones.iter().enumerate() {
            let ctx = || {
                if z.zone_id.is_empty() {
                    format!("zones[{i}]")
                } else {
                    format!("zone '{}'", z.zone_id)
                }
            };

            if z.zone_id.trim().is_empty() {
                errors.push(format!("{}: zone_id is empty", ctx()));
            } else if !seen_ids.insert(&z.zone_id) {
                errors.push(format!("{}: duplicate id", ctx()));
            }

            match sensors_per_zone.get(z.zone_id.as_str()).copied().unwrap_or(0) {
                1 => {}
                0 => errors.push(format!("{}: no sensor configured", ctx())),
                n => errors.push(format!("{}: {n} sensors configured, expected one", ctx())),
            }
        }
    }

    fn validate_sensors<'a>(&'a self, seen_ids: &mut HashSet<&'a str>, errors: &mut Vec<String>) {
        let zone_ids = self.zone_ids();

        for (i, s) in self.sensors.iter().enumerate() {
            let ctx = || {
                if s.sensor_id.is_empty() {
                    format!("sensors[{i}]")
                } else {
                    format!("sensor '{}'", s.sensor_id)
                }
            };

            if s.sensor_id.trim().is_empty() {
                errors.push(format!("{}: sensor_id is empty", ctx()));
            } else if !seen_ids.insert(&s.sensor_id) {
                errors.push(format!("{}: duplicate id", ctx()));
            }
            check_zone_ref(&zone_ids, &s.zone_id, &ctx, errors);
            check_failure_rate(s.failure_rate, &ctx, errors);
        }
    }

    fn validate_valves<'a>(&'a self, seen_ids: &mut HashSet<&'a str>, errors: &mut Vec<String>) {
        let zone_ids = self.zone_ids();

        for (i, v) in self.valves.iter().enumerate() {
            let ctx = || {
                if v.valve_id.is_empty() {
                    format!("valves[{i}]")
                } else {
                    format!("valve '{}'", v.valve_id)
                }
            };

            if v.valve_id.trim().is_empty() {
                errors.push(format!("{}: valve_id is empty", ctx()));
            } else if !seen_ids.insert(&v.valve_id) {
                errors.push(format!("{}: duplicate id", ctx()));
            }
            check_zone_ref(&zone_ids, &v.zone_id, &ctx, errors);
            check_failure_rate(v.failure_rate, &ctx, errors);

            if v.flow_rate_gpm == 0 {
                errors.push(format!("{}: flow_rate_gpm must be positive", ctx()));
            }
        }
    }
}

fn check_zone_ref(
    zone_ids: &HashSet<&str>,
    zone_id: &str,
    ctx: &dyn Fn() -> String,
    errors: &mut Vec<String>,
) {
    if zone_id.trim().is_empty() {
        errors.push(format!("{}: zone_id is empty", ctx()));
    } else if !zone_ids.contains(zone_id) {
        errors.push(format!(
            "{}: zone_id '{}' does not match any defined zone",
            ctx(),
            zone_id
        ));
    }
}

fn check_failure_rate(rate: f32, ctx: &dyn Fn() -> String, errors: &mut Vec<String>) {
    if !(0.0..=1.0).contains(&rate) {
        errors.push(format!(
            "{}: failure_rate {} out of range [0.0, 1.0]",
            ctx(),
            rate
        ));
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Register every zone, sensor and valve with the irrigator, each device
/// backed by its zone's simulated soil.
pub async fn apply<S: Store>(config: &Config, irrigator: &Irrigator<S>) -> Result<()> {
    let mut soils = HashMap::new();

    for z in &config.zones {
        irrigator
            .add_zone(&z.zone_id, &z.location)
            .await
            .with_context(|| format!("failed to add zone '{}'", z.zone_id))?;
        soils.insert(z.zone_id.as_str(), SoilModel::shared(config.soil));
    }

    for s in &config.sensors {
        let soil = soils
            .get(s.zone_id.as_str())
            .with_context(|| format!("sensor '{}': unknown zone '{}'", s.sensor_id, s.zone_id))?;
        let device = SimSensor::new(&s.sensor_id, soil.clone(), s.failure_rate);
        irrigator
            .add_sensor(&s.zone_id, &s.sensor_id, Box::new(device), &s.location)
            .await
            .with_context(|| format!("failed to add sensor '{}'", s.sensor_id))?;
    }

    for v in &config.valves {
        let soil = soils
            .get(v.zone_id.as_str())
            .with_context(|| format!("valve '{}': unknown zone '{}'", v.valve_id, v.zone_id))?;
        let device = SimValve::new(&v.valve_id, soil.clone(), v.failure_rate);
        irrigator
            .add_valve(
                &v.zone_id,
                &v.valve_id,
                Box::new(device),
                &v.kind,
                v.flow_rate_gpm,
                &v.location,
            )
            .await
            .with_context(|| format!("failed to add valve '{}'", v.valve_id))?;
    }

    tracing::info!(
        zones = config.zones.len(),
        sensors = config.sensors.len(),
        valves = config.valves.len(),
        "config applied"
    );

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
