//! Irrigation cycles: one episode of watering driven minute by minute.
//!
//! A cycle never owns zones.  It keeps the ids of the zones it governs and
//! is handed the irrigator's zones on every call.
//!
//! ```text
//! NotStarted ──start()──▶ Running ──end() / done──▶ Ended
//! ```
//!
//! Manual cycles run until the operator ends them.  Automatic cycles water
//! the dry zones one at a time, re-splitting whatever budget is left each
//! time a zone finishes.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::info;

use crate::device::DeviceFailure;
use crate::zone::Zone;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleKind {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CyclePhase {
    NotStarted,
    Running,
    Ended,
}

type DeviceResult = Result<(), DeviceFailure>;

fn zone_mut<'a>(zones: &'a mut [Zone], id: &str) -> Option<&'a mut Zone> {
    zones.iter_mut().find(|z| z.id() == id)
}

fn total_water_used(zones: &[Zone], ids: &[String]) -> u32 {
    zones
        .iter()
        .filter(|z| ids.iter().any(|id| id == z.id()))
        .map(Zone::water_used)
        .fold(0, u32::saturating_add)
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

pub enum Cycle {
    Manual(ManualCycle),
    Automatic(AutoCycle),
}

impl Cycle {
    /// A manual cycle over every zone.  Zone counters are reset.
    pub fn manual(zones: &mut [Zone]) -> Self {
        Self::Manual(ManualCycle::new(zones))
    }

    /// An automatic cycle over every zone with `allocation` gallons to
    /// spend.  Zone counters are reset.
    pub fn automatic(zones: &mut [Zone], allocation: u32) -> Self {
        Self::Automatic(AutoCycle::new(zones, allocation))
    }

    pub fn kind(&self) -> CycleKind {
        match self {
            Self::Manual(_) => CycleKind::Manual,
            Self::Automatic(_) => CycleKind::Automatic,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        match self {
            Self::Manual(c) => c.phase,
            Self::Automatic(c) => c.phase,
        }
    }

    pub fn water_used(&self) -> u32 {
        match self {
            Self::Manual(c) => c.water_used,
            Self::Automatic(c) => c.water_used,
        }
    }

    pub fn start(&mut self, zones: &mut [Zone]) -> DeviceResult {
        match self {
            Self::Manual(c) => {
                c.start();
                Ok(())
            }
            Self::Automatic(c) => c.start(zones),
        }
    }

    pub fn tick(&mut self, zones: &mut [Zone]) -> DeviceResult {
        match self {
            Self::Manual(c) => {
                c.tick(zones);
                Ok(())
            }
            Self::Automatic(c) => c.tick(zones),
        }
    }

    pub fn end(&mut self, zones: &mut [Zone]) -> DeviceResult {
        match self {
            Self::Manual(c) => c.end(zones),
            Self::Automatic(c) => c.end(zones),
        }
    }

    pub fn is_done(&self) -> bool {
        match self {
            Self::Manual(c) => c.is_done(),
            Self::Automatic(c) => c.is_done(),
        }
    }

    /// Change the budget mid-cycle.  Manual cycles have no budget.
    pub fn set_allocation(&mut self, zones: &mut [Zone], gallons: u32) -> DeviceResult {
        match self {
            Self::Manual(_) => Ok(()),
            Self::Automatic(c) => c.set_allocation(zones, gallons),
        }
    }
}

// ---------------------------------------------------------------------------
// Manual
// ---------------------------------------------------------------------------

pub struct ManualCycle {
    zone_ids: Vec<String>,
    water_used: u32,
    phase: CyclePhase,
}

impl ManualCycle {
    fn new(zones: &mut [Zone]) -> Self {
        for zone in zones.iter_mut() {
            zone.reset();
        }
        Self {
            zone_ids: zones.iter().map(|z| z.id().to_string()).collect(),
            water_used: 0,
            phase: CyclePhase::NotStarted,
        }
    }

    fn start(&mut self) {
        self.phase = CyclePhase::Running;
        info!(zones = self.zone_ids.len(), "manual cycle started");
    }

    fn tick(&mut self, zones: &mut [Zone]) {
        if self.phase != CyclePhase::Running {
            return;
        }
        for id in &self.zone_ids {
            if let Some(zone) = zone_mut(zones, id) {
                zone.tick();
            }
        }
        self.water_used = total_water_used(zones, &self.zone_ids);
    }

    fn end(&mut self, zones: &mut [Zone]) -> DeviceResult {
        let mut failure = DeviceFailure::default();
        for id in &self.zone_ids {
            if let Some(zone) = zone_mut(zones, id) {
                failure.absorb(zone.close_all_valves());
            }
        }
        self.phase = CyclePhase::Ended;
        info!(water_used = self.water_used, "manual cycle ended");
        failure.into_result()
    }

    /// Manual cycles end only when the operator says so.
    fn is_done(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Automatic
// ---------------------------------------------------------------------------

pub struct AutoCycle {
    zone_ids: Vec<String>,
    /// Dry zones not yet irrigated, in watering order.
    pending: VecDeque<String>,
    current: Option<String>,
    total_allocation: u32,
    water_used: u32,
    phase: CyclePhase,
}

impl AutoCycle {
    fn new(zones: &mut [Zone], total_allocation: u32) -> Self {
        for zone in zones.iter_mut() {
            zone.reset();
        }
        Self {
            zone_ids: zones.iter().map(|z| z.id().to_string()).collect(),
            pending: VecDeque::new(),
            current: None,
            total_allocation,
            water_used: 0,
            phase: CyclePhase::NotStarted,
        }
    }

    pub fn current_zone(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn pending_zones(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    pub fn total_allocation(&self) -> u32 {
        self.total_allocation
    }

    fn start(&mut self, zones: &mut [Zone]) -> DeviceResult {
        let mut failure = DeviceFailure::default();
        for id in &self.zone_ids {
            let Some(zone) = zone_mut(zones, id) else {
                continue;
            };
            // A known-failed sensor was reported when it failed.
            if zone.sensor().is_some_and(|s| s.is_failed()) {
                continue;
            }
            if failure.absorb(zone.is_dry()).unwrap_or(false) {
                self.pending.push_back(id.clone());
            }
        }
        self.phase = CyclePhase::Running;
        info!(
            dry_zones = self.pending.len(),
            allocation = self.total_allocation,
            "automatic cycle started"
        );
        self.allocate(zones);
        failure.absorb(self.open_next(zones));
        failure.absorb(self.finish_if_done(zones));
        failure.into_result()
    }

    fn tick(&mut self, zones: &mut [Zone]) -> DeviceResult {
        if self.phase != CyclePhase::Running {
            return Ok(());
        }
        let mut failure = DeviceFailure::default();
        let Some(current) = self.current.clone() else {
            return self.finish_if_done(zones);
        };

        let irrigated = match zone_mut(zones, &current) {
            Some(zone) => {
                zone.tick();
                failure.absorb(zone.is_irrigated()).unwrap_or(false)
            }
            None => true,
        };
        self.water_used = total_water_used(zones, &self.zone_ids);

        if self.water_used >= self.total_allocation {
            failure.absorb(self.close_current(zones));
            self.pending.clear();
        } else if irrigated {
            failure.absorb(self.close_current(zones));
            self.allocate(zones);
            failure.absorb(self.open_next(zones));
        }
        failure.absorb(self.finish_if_done(zones));
        failure.into_result()
    }

    fn end(&mut self, zones: &mut [Zone]) -> DeviceResult {
        let mut failure = DeviceFailure::default();
        failure.absorb(self.close_current(zones));
        for id in &self.zone_ids {
            if let Some(zone) = zone_mut(zones, id).filter(|z| z.has_open_valve()) {
                failure.absorb(zone.close_all_valves());
            }
        }
        self.pending.clear();
        self.phase = CyclePhase::Ended;
        info!(water_used = self.water_used, "automatic cycle ended");
        failure.into_result()
    }

    fn is_done(&self) -> bool {
        self.phase == CyclePhase::Ended
            || self.water_used >= self.total_allocation
            || (self.pending.is_empty() && self.current.is_none())
    }

    /// Interrupt the current zone, then carry on under the new budget.
    fn set_allocation(&mut self, zones: &mut [Zone], gallons: u32) -> DeviceResult {
        let mut failure = DeviceFailure::default();
        failure.absorb(self.close_current(zones));
        self.total_allocation = gallons;
        info!(allocation = gallons, water_used = self.water_used, "cycle budget changed");
        if self.water_used >= self.total_allocation {
            self.pending.clear();
        } else {
            self.allocate(zones);
            failure.absorb(self.open_next(zones));
        }
        failure.absorb(self.finish_if_done(zones));
        failure.into_result()
    }

    /// Split the water left over the pending zones in proportion to their
    /// working valves.  Each share is truncated, so the sum may fall a few
    /// gallons short of what is left.
    fn allocate(&mut self, zones: &mut [Zone]) {
        let remaining = u64::from(self.total_allocation.saturating_sub(self.water_used));
        let valve_counts: Vec<(String, u64)> = self
            .pending
            .iter()
            .filter_map(|id| {
                let zone = zones.iter().find(|z| z.id() == id)?;
                Some((id.clone(), zone.working_valve_count() as u64))
            })
            .collect();
        let total_valves: u64 = valve_counts.iter().map(|(_, n)| n).sum();

        for (id, valves) in valve_counts {
            let share = if total_valves == 0 {
                0
            } else {
                valves * remaining / total_valves
            };
            if let Some(zone) = zone_mut(zones, &id) {
                zone.set_allocation(share as u32);
            }
        }
    }

    /// Open the next pending zone that still has a working valve.
    fn open_next(&mut self, zones: &mut [Zone]) -> DeviceResult {
        let mut failure = DeviceFailure::default();
        while let Some(id) = self.pending.pop_front() {
            let Some(zone) = zone_mut(zones, &id) else {
                continue;
            };
            if zone.working_valve_count() == 0 {
                continue;
            }
            failure.absorb(zone.open_all_valves());
            if zone.has_open_valve() {
                info!(zone = %id, allocation = zone.allocation(), "irrigating zone");
                self.current = Some(id);
                break;
            }
            // Every valve failed to open: the zone is finished and its share
            // goes back to the zones still waiting.
            self.allocate(zones);
        }
        failure.into_result()
    }

    fn close_current(&mut self, zones: &mut [Zone]) -> DeviceResult {
        match self.current.take() {
            Some(id) => match zone_mut(zones, &id) {
                Some(zone) => {
                    info!(zone = %id, water_used = zone.water_used(), "zone finished");
                    zone.close_all_valves()
                }
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    /// Move to `Ended` once the cycle is done, shutting the current zone.
    fn finish_if_done(&mut self, zones: &mut [Zone]) -> DeviceResult {
        if self.phase != CyclePhase::Running || !self.is_done() {
            return Ok(());
        }
        let result = self.close_current(zones);
        self.pending.clear();
        self.phase = CyclePhase::Ended;
        info!(water_used = self.water_used, "automatic cycle complete");
        result
    }
}

// ===========================================================================
// Tests
// ===========================================================================
