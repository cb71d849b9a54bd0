//! Doctor and room availability.
//!
//! The scheduler only sees the [`Availability`] trait. [`RosterAvailability`]
//! is the shipped adapter: weekly working hours per resource minus booked
//! intervals.

mod roster;

pub use roster::{RosterAvailability, RosterError, RosterFile};

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Something that can be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Resource {
    Doctor(i64),
    Room(i64),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Doctor(id) => write!(f, "doctor {id}"),
            Self::Room(id) => write!(f, "room {id}"),
        }
    }
}

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Every day in the range, in order. Empty when `end < start`.
    pub fn days(self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

/// A free `[starts_at, ends_at)` interval for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeSlot {
    pub resource: Resource,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
}

impl FreeSlot {
    pub fn minutes(&self) -> i64 {
        (self.ends_at - self.starts_at).num_minutes()
    }
}

/// Source of free time for doctors and rooms.
#[async_trait]
pub trait Availability: Send + Sync {
    /// Free intervals for `resource` on the days of `range`, sorted by start.
    async fn free_slots(&self, resource: Resource, range: DateRange) -> Result<Vec<FreeSlot>>;

    /// Doctors able to perform a service, in ascending id order.
    async fn doctors_for_service(&self, service_id: i64) -> Result<Vec<i64>>;
}

// Compile-time assertion: Availability must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Availability) {}
};

/// Remove `busy` intervals from `free`, keeping the result sorted by start.
/// Intervals are half-open.
pub(crate) fn subtract_intervals(
    free: &[(NaiveDateTime, NaiveDateTime)],
    busy: &[(NaiveDateTime, NaiveDateTime)],
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let mut busy = busy.to_vec();
    busy.sort();

    let mut out = Vec::new();
    for &(start, end) in free {
        let mut cursor = start;
        for &(b_start, b_end) in &busy {
            if b_end <= cursor || b_start >= end {
                continue;
            }
            if b_start > cursor {
                out.push((cursor, b_start));
            }
            cursor = cursor.max(b_end);
            if cursor >= end {
                break;
            }
        }
        if cursor < end {
            out.push((cursor, end));
        }
    }
    out.sort();
    out
}
