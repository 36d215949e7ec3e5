//! The controller facade.  Owns every zone, the active cycle and the
//! persisted configuration, and is the only thing the UI and the clock talk
//! to.
//!
//! All state sits behind one async mutex and every public operation holds it
//! for its whole duration, so a clock tick can never interleave with an
//! operator command.  Device failures raised underneath are recorded
//! (persisted as not working, queued for the operator) rather than returned.
//! Store writes are best-effort: a failed write only raises a sticky flag.

use std::collections::VecDeque;
use std::str::FromStr;

use time::Weekday;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::cycle::{Cycle, CycleKind};
use crate::device::{DeviceFailure, SensorDevice, ValveDevice};
use crate::error::{IrrigationError, Result};
use crate::report::{FailedDeviceReport, FailureReport, SensorReport, ValveReport, ZoneReport};
use crate::schedule::{DaySet, MilitaryTime, Mode};
use crate::sensor::Sensor;
use crate::store::{keys, Store};
use crate::valve::Valve;
use crate::zone::Zone;

const DEFAULT_MODE: &str = "Automatic";
const DEFAULT_ALLOCATION: &str = "1000";
const DEFAULT_IRRIGATION_TIME: &str = "600";
const DEFAULT_IRRIGATION_DAYS: &str = "";
const DEFAULT_CRITICAL_LEVEL: &str = "0";
const DEFAULT_MAXIMAL_LEVEL: &str = "100";

pub struct Irrigator<S: Store> {
    state: Mutex<State<S>>,
}

struct State<S> {
    store: S,
    clock: Box<dyn Clock>,
    mode: Mode,
    /// Gallons per automatic cycle.
    allocation: u32,
    irrigation_time: MilitaryTime,
    irrigation_days: DaySet,
    zones: Vec<Zone>,
    cycle: Option<Cycle>,
    /// Usage of the running cycle, or of the last one once it is gone.
    last_water_used: u32,
    /// Scheduled slot that already started a cycle, so it fires only once.
    last_scheduled: Option<(MilitaryTime, Weekday)>,
    failed_devices: VecDeque<String>,
    store_failed: bool,
}

/// Read and parse a persisted value.  Used at configuration time, where an
/// unreadable store aborts startup.
async fn load<S: Store, T: FromStr>(store: &S, key: &str, default: &str) -> Result<T> {
    let raw = store.get_data(key, default).await?;
    raw.trim().parse().map_err(|_| IrrigationError::CorruptValue {
        key: key.to_string(),
        value: raw.clone(),
    })
}

impl<S: Store> Irrigator<S> {
    /// Build the controller from whatever the store holds.  Zones, sensors
    /// and valves are added afterwards through the configuration calls.
    pub async fn open(store: S, clock: Box<dyn Clock>) -> Result<Self> {
        let mode: Mode = load(&store, keys::MODE, DEFAULT_MODE).await?;
        let allocation: u32 = load(&store, keys::ALLOCATION, DEFAULT_ALLOCATION).await?;
        let irrigation_time: MilitaryTime =
            load(&store, keys::IRRIGATION_TIME, DEFAULT_IRRIGATION_TIME).await?;
        let irrigation_days: DaySet =
            load(&store, keys::IRRIGATION_DAYS, DEFAULT_IRRIGATION_DAYS).await?;

        info!(
            %mode,
            allocation,
            time = %irrigation_time,
            days = %irrigation_days,
            "irrigator configuration loaded"
        );

        Ok(Self {
            state: Mutex::new(State {
                store,
                clock,
                mode,
                allocation,
                irrigation_time,
                irrigation_days,
                zones: Vec::new(),
                cycle: None,
                last_water_used: 0,
                last_scheduled: None,
                failed_devices: VecDeque::new(),
                store_failed: false,
            }),
        })
    }

    // -----------------------------------------------------------------------
    // Configuration contract
    // -----------------------------------------------------------------------

    pub async fn add_zone(&self, zone_id: &str, location: &str) -> Result<()> {
        let mut st = self.state.lock().await;
        st.ensure_unused(zone_id)?;
        let mut zone = Zone::new(zone_id, location);
        let critical: u32 =
            load(&st.store, &keys::critical_level(zone_id), DEFAULT_CRITICAL_LEVEL).await?;
        let maximal: u32 =
            load(&st.store, &keys::maximal_level(zone_id), DEFAULT_MAXIMAL_LEVEL).await?;
        zone.set_critical_moisture_level(critical)?;
        zone.set_maximal_moisture_level(maximal)?;
        info!(zone = %zone_id, critical, maximal, "zone added");
        st.zones.push(zone);
        Ok(())
    }

    pub async fn add_sensor(
        &self,
        zone_id: &str,
        sensor_id: &str,
        device: Box<dyn SensorDevice>,
        location: &str,
    ) -> Result<()> {
        let mut st = self.state.lock().await;
        st.ensure_unused(sensor_id)?;
        let working = load_is_working(&st.store, sensor_id).await?;
        let zone = st.zone_mut(zone_id)?;
        zone.install_sensor(Sensor::new(sensor_id, location, device))?;
        restore_health(zone, sensor_id, working);
        info!(zone = %zone_id, sensor = %sensor_id, working, "sensor added");
        Ok(())
    }

    pub async fn add_valve(
        &self,
        zone_id: &str,
        valve_id: &str,
        device: Box<dyn ValveDevice>,
        kind: &str,
        flow_rate: u32,
        location: &str,
    ) -> Result<()> {
        let mut st = self.state.lock().await;
        st.ensure_unused(valve_id)?;
        let working = load_is_working(&st.store, valve_id).await?;
        let zone = st.zone_mut(zone_id)?;
        zone.add_valve(Valve::new(valve_id, location, kind, flow_rate, device));
        restore_health(zone, valve_id, working);
        info!(zone = %zone_id, valve = %valve_id, flow_rate, working, "valve added");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    pub async fn mode(&self) -> Mode {
        self.state.lock().await.mode
    }

    /// Change mode.  An actual change ends whatever cycle is running; it
    /// never starts one.
    pub async fn set_mode(&self, mode: Mode) {
        let mut st = self.state.lock().await;
        if st.mode == mode {
            return;
        }
        st.end_cycle().await;
        st.mode = mode;
        info!(%mode, "mode changed");
        st.persist(keys::MODE, mode.to_string()).await;
    }

    pub async fn allocation(&self) -> u32 {
        self.state.lock().await.allocation
    }

    /// Change the per-cycle budget, re-planning a running automatic cycle.
    pub async fn set_allocation(&self, gallons: u32) {
        let mut st = self.state.lock().await;
        st.allocation = gallons;
        st.persist(keys::ALLOCATION, gallons.to_string()).await;

        let st = &mut *st;
        if let Some(cycle) = st.cycle.as_mut() {
            let result = cycle.set_allocation(&mut st.zones, gallons);
            let done = cycle.is_done();
            st.last_water_used = cycle.water_used();
            st.note(result).await;
            if done {
                st.cycle = None;
                info!("cycle ended by budget change");
            }
        }
    }

    pub async fn irrigation_time(&self) -> MilitaryTime {
        self.state.lock().await.irrigation_time
    }

    pub async fn set_irrigation_time(&self, time: MilitaryTime) {
        let mut st = self.state.lock().await;
        st.irrigation_time = time;
        st.persist(keys::IRRIGATION_TIME, time.as_military().to_string()).await;
    }

    pub async fn irrigation_days(&self) -> DaySet {
        self.state.lock().await.irrigation_days
    }

    pub async fn set_irrigation_days(&self, days: DaySet) {
        let mut st = self.state.lock().await;
        st.irrigation_days = days;
        st.persist(keys::IRRIGATION_DAYS, days.to_string()).await;
    }

    pub async fn set_critical_moisture_level(&self, zone_id: &str, level: u32) -> Result<()> {
        let mut st = self.state.lock().await;
        st.zone_mut(zone_id)?.set_critical_moisture_level(level)?;
        st.persist(&keys::critical_level(zone_id), level.to_string()).await;
        Ok(())
    }

    pub async fn set_maximal_moisture_level(&self, zone_id: &str, level: u32) -> Result<()> {
        let mut st = self.state.lock().await;
        st.zone_mut(zone_id)?.set_maximal_moisture_level(level)?;
        st.persist(&keys::maximal_level(zone_id), level.to_string()).await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cycles and valves
    // -----------------------------------------------------------------------

    /// Start an operator-driven cycle.  A no-op while any cycle is running.
    pub async fn start_manual_cycle(&self) -> Result<()> {
        let mut st = self.state.lock().await;
        if st.cycle.is_some() {
            debug!("cycle already running; start ignored");
            return Ok(());
        }
        if st.mode != Mode::Manual {
            return Err(IrrigationError::WrongMode("Manual"));
        }
        let st = &mut *st;
        let mut cycle = Cycle::manual(&mut st.zones);
        let result = cycle.start(&mut st.zones);
        st.last_water_used = 0;
        st.cycle = Some(cycle);
        st.note(result).await;
        Ok(())
    }

    /// End the running cycle, whichever kind it is.
    pub async fn stop_manual_cycle(&self) {
        self.state.lock().await.end_cycle().await;
    }

    pub async fn toggle_valve(&self, valve_id: &str) -> Result<()> {
        let mut st = self.state.lock().await;
        st.ensure_manual_cycle()?;
        let zone = st
            .zones
            .iter_mut()
            .find(|z| z.valves().iter().any(|v| v.id() == valve_id))
            .ok_or_else(|| IrrigationError::UnknownDevice(valve_id.to_string()))?;
        match zone.toggle_valve(valve_id) {
            Err(IrrigationError::Device(failure)) => {
                st.note(Err(failure)).await;
                Ok(())
            }
            other => other,
        }
    }

    pub async fn open_all_valves(&self, zone_id: &str) -> Result<()> {
        let mut st = self.state.lock().await;
        st.ensure_manual_cycle()?;
        let result = st.zone_mut(zone_id)?.open_all_valves();
        st.note(result).await;
        Ok(())
    }

    pub async fn close_all_valves(&self, zone_id: &str) -> Result<()> {
        let mut st = self.state.lock().await;
        st.ensure_manual_cycle()?;
        let result = st.zone_mut(zone_id)?.close_all_valves();
        st.note(result).await;
        Ok(())
    }

    /// Mark a device working again and persist that.
    pub async fn repair_device(&self, device_id: &str) -> Result<()> {
        let mut st = self.state.lock().await;
        let repaired = st.zones.iter_mut().any(|z| z.repair_device(device_id));
        if !repaired {
            return Err(IrrigationError::UnknownDevice(device_id.to_string()));
        }
        st.failed_devices.retain(|id| id != device_id);
        info!(device = %device_id, "device repaired");
        if st.persist(&keys::is_working(device_id), "true".to_string()).await {
            st.mark_recorded(device_id);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Clock
    // -----------------------------------------------------------------------

    /// Tick handler: start a scheduled automatic cycle, or advance the
    /// running one and drop it once it is done.
    pub async fn update(&self) {
        self.state.lock().await.update().await;
    }

    /// One elapsed minute: move the clock forward, then run [`update`].
    ///
    /// [`update`]: Irrigator::update
    pub async fn on_minute(&self) {
        let mut st = self.state.lock().await;
        st.clock.advance_minute();
        st.update().await;
    }

    pub async fn clock_time(&self) -> MilitaryTime {
        self.state.lock().await.clock.time()
    }

    pub async fn clock_day(&self) -> Weekday {
        self.state.lock().await.clock.day()
    }

    pub async fn set_clock_time(&self, time: MilitaryTime) {
        self.state.lock().await.clock.set_time(time);
    }

    pub async fn set_clock_day(&self, day: Weekday) {
        self.state.lock().await.clock.set_day(day);
    }

    /// Close everything down before exit.
    pub async fn shutdown(&self) {
        let mut st = self.state.lock().await;
        st.end_cycle().await;
        st.sync_unrecorded().await;
        info!("irrigator shut down");
    }

    // -----------------------------------------------------------------------
    // Reports
    // -----------------------------------------------------------------------

    pub async fn zone_reports(&self) -> Vec<ZoneReport> {
        self.state.lock().await.zones.iter().map(Zone::report).collect()
    }

    pub async fn valve_reports(&self, zone_id: &str) -> Result<Vec<ValveReport>> {
        Ok(self.state.lock().await.zone(zone_id)?.valve_reports())
    }

    pub async fn sensor_report(&self, zone_id: &str) -> Result<Option<SensorReport>> {
        Ok(self.state.lock().await.zone(zone_id)?.sensor_report())
    }

    pub async fn failure_report(&self) -> FailureReport {
        let st = self.state.lock().await;
        FailureReport {
            failed_sensors: st.zones.iter().flat_map(Zone::failed_sensor_reports).collect(),
            failed_valves: st.zones.iter().flat_map(Zone::failed_valve_reports).collect(),
        }
    }

    /// Whether a fresh device failure is waiting to be shown.
    pub async fn is_failed_device(&self) -> bool {
        !self.state.lock().await.failed_devices.is_empty()
    }

    /// Take the oldest unreported failure off the queue.
    pub async fn next_failed_device(&self) -> Option<FailedDeviceReport> {
        let mut st = self.state.lock().await;
        while let Some(id) = st.failed_devices.pop_front() {
            if let Some(report) = st.zones.iter().find_map(|z| z.failed_device_report(&id)) {
                return Some(report);
            }
        }
        None
    }

    pub async fn has_store_failure(&self) -> bool {
        self.state.lock().await.store_failed
    }

    /// Acknowledge the store failure notice.
    pub async fn clear_store_failure(&self) {
        self.state.lock().await.store_failed = false;
    }

    pub async fn water_used(&self) -> u32 {
        let st = self.state.lock().await;
        st.cycle.as_ref().map_or(st.last_water_used, Cycle::water_used)
    }

    pub async fn cycle_kind(&self) -> Option<CycleKind> {
        self.state.lock().await.cycle.as_ref().map(Cycle::kind)
    }
}

async fn load_is_working<S: Store>(store: &S, device_id: &str) -> Result<bool> {
    load(store, &keys::is_working(device_id), "true").await
}

/// Apply a persisted health flag to a freshly added device.
fn restore_health(zone: &mut Zone, device_id: &str, working: bool) {
    if !working {
        zone.set_device_failed(device_id, true);
        zone.set_device_recorded(device_id, true);
    }
}

// ---------------------------------------------------------------------------
// Locked state
// ---------------------------------------------------------------------------

impl<S: Store> State<S> {
    fn zone(&self, zone_id: &str) -> Result<&Zone> {
        self.zones
            .iter()
            .find(|z| z.id() == zone_id)
            .ok_or_else(|| IrrigationError::UnknownZone(zone_id.to_string()))
    }

    fn zone_mut(&mut self, zone_id: &str) -> Result<&mut Zone> {
        self.zones
            .iter_mut()
            .find(|z| z.id() == zone_id)
            .ok_or_else(|| IrrigationError::UnknownZone(zone_id.to_string()))
    }

    /// Zone and device ids share one namespace in the store.
    fn ensure_unused(&self, id: &str) -> Result<()> {
        if self.zones.iter().any(|z| z.id() == id || z.has_device(id)) {
            return Err(IrrigationError::DuplicateId(id.to_string()));
        }
        Ok(())
    }

    fn ensure_manual_cycle(&self) -> Result<()> {
        match self.cycle {
            Some(Cycle::Manual(_)) => Ok(()),
            _ => Err(IrrigationError::NoManualCycle),
        }
    }

    fn mark_recorded(&mut self, device_id: &str) {
        for zone in &mut self.zones {
            if zone.set_device_recorded(device_id, true) {
                return;
            }
        }
    }

    /// Best-effort write.  Returns whether it reached the store.
    async fn persist(&mut self, key: &str, value: String) -> bool {
        match self.store.set_data(key, &value).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key, "persist failed: {e}");
                self.store_failed = true;
                false
            }
        }
    }

    /// Record every device named in a failed result: persist it as not
    /// working and queue it for the operator.
    async fn note(&mut self, result: std::result::Result<(), DeviceFailure>) {
        let Err(failure) = result else {
            return;
        };
        let ids: Vec<String> = failure.devices().map(str::to_string).collect();
        for id in ids {
            let already_recorded = self
                .zones
                .iter()
                .find_map(|z| z.failed_device_report(&id))
                .is_some_and(|r| r.is_recorded);
            if already_recorded {
                debug!(device = %id, "failure already on record");
                continue;
            }
            warn!(device = %id, "device failure recorded");
            if !self.failed_devices.contains(&id) {
                self.failed_devices.push_back(id.clone());
            }
            if self.persist(&keys::is_working(&id), "false".to_string()).await {
                self.mark_recorded(&id);
            }
        }
    }

    /// Retry persisting device health that an earlier store failure lost.
    async fn sync_unrecorded(&mut self) {
        let pending: Vec<(String, bool)> = self
            .zones
            .iter()
            .flat_map(Zone::unrecorded_devices)
            .collect();
        for (id, failed) in pending {
            let value = if failed { "false" } else { "true" };
            if self.persist(&keys::is_working(&id), value.to_string()).await {
                debug!(device = %id, "device health recorded");
                self.mark_recorded(&id);
            }
        }
    }

    async fn end_cycle(&mut self) {
        let Some(mut cycle) = self.cycle.take() else {
            return;
        };
        let result = cycle.end(&mut self.zones);
        self.last_water_used = cycle.water_used();
        self.note(result).await;
    }

    fn is_scheduled_now(&self) -> bool {
        let now = (self.clock.time(), self.clock.day());
        now.0 == self.irrigation_time
            && self.irrigation_days.contains(now.1)
            && self.last_scheduled != Some(now)
    }

    async fn update(&mut self) {
        match self.cycle.as_mut() {
            None => {
                if self.mode == Mode::Automatic && self.is_scheduled_now() {
                    self.begin_automatic().await;
                }
            }
            Some(cycle) => {
                let result = cycle.tick(&mut self.zones);
                self.last_water_used = cycle.water_used();
                let done = cycle.is_done();
                self.note(result).await;
                if done {
                    self.cycle = None;
                    info!(water_used = self.last_water_used, "cycle finished");
                }
            }
        }
        self.sync_unrecorded().await;
    }

    async fn begin_automatic(&mut self) {
        self.last_scheduled = Some((self.clock.time(), self.clock.day()));
        let mut cycle = Cycle::automatic(&mut self.zones, self.allocation);
        let result = cycle.start(&mut self.zones);
        self.last_water_used = 0;
        if !cycle.is_done() {
            self.cycle = Some(cycle);
        } else {
            info!("nothing to irrigate; scheduled cycle finished at once");
        }
        self.note(result).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
