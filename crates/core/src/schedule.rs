//! Operating mode and the daily irrigation schedule, with the text forms they
//! are persisted in.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use time::Weekday;

use crate::error::IrrigationError;

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    /// Cycles start from the schedule.
    Automatic,
    /// Cycles are started and stopped by the operator.
    Manual,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automatic => write!(f, "Automatic"),
            Self::Manual => write!(f, "Manual"),
        }
    }
}

impl FromStr for Mode {
    type Err = IrrigationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Automatic" => Ok(Self::Automatic),
            "Manual" => Ok(Self::Manual),
            other => Err(IrrigationError::InvalidMode(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Time of day
// ---------------------------------------------------------------------------

/// Minute-resolution time of day, written as military time (`630` = 06:30).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct MilitaryTime {
    hour: u8,
    minute: u8,
}

impl MilitaryTime {
    pub const MIDNIGHT: MilitaryTime = MilitaryTime { hour: 0, minute: 0 };

    pub fn new(hour: u8, minute: u8) -> Result<Self, IrrigationError> {
        if hour >= 24 || minute >= 60 {
            return Err(IrrigationError::InvalidTime(format!("{hour:02}{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    pub fn from_military(hhmm: u32) -> Result<Self, IrrigationError> {
        let hour = hhmm / 100;
        let minute = hhmm % 100;
        if hour >= 24 || minute >= 60 {
            return Err(IrrigationError::InvalidTime(hhmm.to_string()));
        }
        Ok(Self {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    pub fn as_military(&self) -> u32 {
        u32::from(self.hour) * 100 + u32::from(self.minute)
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// One minute later.  The flag is set when the day rolled over.
    pub fn next_minute(&self) -> (Self, bool) {
        match (self.hour, self.minute) {
            (23, 59) => (Self::MIDNIGHT, true),
            (h, 59) => (Self { hour: h + 1, minute: 0 }, false),
            (h, m) => (Self { hour: h, minute: m + 1 }, false),
        }
    }
}

impl fmt::Display for MilitaryTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:02}", self.hour, self.minute)
    }
}

impl FromStr for MilitaryTime {
    type Err = IrrigationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hhmm: u32 = s
            .trim()
            .parse()
            .map_err(|_| IrrigationError::InvalidTime(s.to_string()))?;
        Self::from_military(hhmm)
    }
}

// ---------------------------------------------------------------------------
// Days of week
// ---------------------------------------------------------------------------

/// Monday-first order, matching the compact code string.
const DAY_CODES: [(Weekday, &str); 7] = [
    (Weekday::Monday, "M"),
    (Weekday::Tuesday, "Tu"),
    (Weekday::Wednesday, "W"),
    (Weekday::Thursday, "Th"),
    (Weekday::Friday, "F"),
    (Weekday::Saturday, "Sa"),
    (Weekday::Sunday, "Su"),
];

/// Days of the week scheduled for irrigation.  Text form is the compact
/// code string, e.g. `"MWF"` or `"MTuWThFSaSu"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaySet(u8);

impl DaySet {
    pub const EMPTY: DaySet = DaySet(0);

    pub fn every_day() -> Self {
        Self(0x7f)
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & bit(day) != 0
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= bit(day);
    }

    pub fn remove(&mut self, day: Weekday) {
        self.0 &= !bit(day);
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        DAY_CODES
            .iter()
            .map(|(d, _)| *d)
            .filter(move |d| self.contains(*d))
    }
}

fn bit(day: Weekday) -> u8 {
    1 << day.number_days_from_monday()
}

impl FromIterator<Weekday> for DaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = DaySet::EMPTY;
        for d in iter {
            set.insert(d);
        }
        set
    }
}

impl fmt::Display for DaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (day, code) in DAY_CODES {
            if self.contains(day) {
                f.write_str(code)?;
            }
        }
        Ok(())
    }
}

impl FromStr for DaySet {
    type Err = IrrigationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = DaySet::EMPTY;
        let mut rest = s.trim();
        while !rest.is_empty() {
            // Two-letter codes first so "Tu" is not read as an unknown "T".
            let (day, code) = DAY_CODES
                .iter()
                .filter(|(_, code)| rest.starts_with(code))
                .max_by_key(|(_, code)| code.len())
                .ok_or_else(|| IrrigationError::InvalidDays(s.to_string()))?;
            set.insert(*day);
            rest = &rest[code.len()..];
        }
        Ok(set)
    }
}

impl Serialize for DaySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
