//! Weekly schedule bitmask: one bit per 15-minute slot, Sunday 00:00 first.

use crate::ScheduleError;
use chrono::{DateTime, Datelike, TimeZone, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const SLOTS_PER_HOUR: usize = 4;
pub const SLOTS_PER_DAY: usize = 24 * SLOTS_PER_HOUR;
pub const SLOT_COUNT: usize = 7 * SLOTS_PER_DAY;

const WORDS: usize = SLOT_COUNT.div_ceil(64);

#[derive(Clone, PartialEq, Eq)]
pub struct Schedule {
    bits: [u64; WORDS],
}

impl Schedule {
    pub fn always() -> Self {
        let mut schedule = Self::never();
        for slot in 0..SLOT_COUNT {
            schedule.set(slot, true);
        }
        schedule
    }

    pub fn never() -> Self {
        Self { bits: [0; WORDS] }
    }

    /// Parses a mask of `0`/`1` characters. An empty mask means always on.
    pub fn parse(mask: &str) -> Result<Self, ScheduleError> {
        if mask.is_empty() {
            return Ok(Self::always());
        }
        let len = mask.chars().count();
        if len != SLOT_COUNT {
            return Err(ScheduleError::InvalidLength {
                expected: SLOT_COUNT,
                actual: len,
            });
        }
        let mut schedule = Self::never();
        for (slot, c) in mask.chars().enumerate() {
            match c {
                '1' => schedule.set(slot, true),
                '0' => {}
                other => return Err(ScheduleError::InvalidCharacter(other)),
            }
        }
        Ok(schedule)
    }

    pub fn set(&mut self, slot: usize, on: bool) {
        if slot >= SLOT_COUNT {
            return;
        }
        let mask = 1u64 << (slot % 64);
        if on {
            self.bits[slot / 64] |= mask;
        } else {
            self.bits[slot / 64] &= !mask;
        }
    }

    pub fn is_set(&self, slot: usize) -> bool {
        slot < SLOT_COUNT && self.bits[slot / 64] & (1u64 << (slot % 64)) != 0
    }

    pub fn slot_for<Tz: TimeZone>(at: &DateTime<Tz>) -> usize {
        at.weekday().num_days_from_sunday() as usize * SLOTS_PER_DAY
            + at.hour() as usize * SLOTS_PER_HOUR
            + at.minute() as usize / 15
    }

    pub fn is_active_at<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        self.is_set(Self::slot_for(at))
    }

    pub fn is_always(&self) -> bool {
        (0..SLOT_COUNT).all(|slot| self.is_set(slot))
    }

    pub fn to_mask(&self) -> String {
        (0..SLOT_COUNT)
            .map(|slot| if self.is_set(slot) { '1' } else { '0' })
            .collect()
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::always()
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_always() {
            f.write_str("Schedule(always)")
        } else {
            let active = (0..SLOT_COUNT).filter(|s| self.is_set(*s)).count();
            write!(f, "Schedule({}/{} slots)", active, SLOT_COUNT)
        }
    }
}

impl Serialize for Schedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_always() {
            serializer.serialize_str("")
        } else {
            serializer.serialize_str(&self.to_mask())
        }
    }
}

impl<'de> Deserialize<'de> for Schedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mask = String::deserialize(deserializer)?;
        Schedule::parse(&mask).map_err(serde::de::Error::custom)
    }
}
