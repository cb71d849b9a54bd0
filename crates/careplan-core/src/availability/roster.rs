//! Weekly roster availability.
//!
//! A roster lists working hours per doctor and room for each weekday. Free
//! slots for a day are those hours minus any booked intervals.
//!
//! ```toml
//! [[doctors]]
//! id = 7
//! services = [100, 101]
//!
//! [[doctors.hours]]
//! weekday = "mon"
//! start = "09:00"
//! end = "17:00"
//!
//! [[booked]]
//! doctor = 7
//! starts_at = "2026-10-19 09:00"
//! ends_at = "2026-10-19 10:00"
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Availability, DateRange, FreeSlot, Resource, subtract_intervals};

type Interval = (NaiveDateTime, NaiveDateTime);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WorkingHours {
    weekday: Weekday,
    start: NaiveTime,
    end: NaiveTime,
}

/// In-memory availability built from working hours.
#[derive(Debug, Clone, Default)]
pub struct RosterAvailability {
    hours: HashMap<Resource, Vec<WorkingHours>>,
    services: BTreeMap<i64, BTreeSet<i64>>,
    booked: HashMap<Resource, Vec<Interval>>,
}

impl RosterAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a working block. Blocks with `end <= start` are ignored.
    pub fn with_hours(
        mut self,
        resource: Resource,
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Self {
        if start < end {
            let blocks = self.hours.entry(resource).or_default();
            blocks.push(WorkingHours {
                weekday,
                start,
                end,
            });
            blocks.sort_by_key(|h| (h.weekday.num_days_from_monday(), h.start));
        }
        self
    }

    /// Same hours on every listed weekday.
    pub fn with_weekly_hours(
        self,
        resource: Resource,
        weekdays: &[Weekday],
        start: NaiveTime,
        end: NaiveTime,
    ) -> Self {
        weekdays
            .iter()
            .fold(self, |roster, day| roster.with_hours(resource, *day, start, end))
    }

    pub fn with_services(mut self, doctor_id: i64, services: &[i64]) -> Self {
        for service in services {
            self.services.entry(*service).or_default().insert(doctor_id);
        }
        self
    }

    /// Mark an interval as already taken.
    pub fn with_booked(
        mut self,
        resource: Resource,
        starts_at: NaiveDateTime,
        ends_at: NaiveDateTime,
    ) -> Self {
        self.add_booked(resource, starts_at, ends_at);
        self
    }

    pub fn add_booked(
        &mut self,
        resource: Resource,
        starts_at: NaiveDateTime,
        ends_at: NaiveDateTime,
    ) {
        if starts_at < ends_at {
            self.booked.entry(resource).or_default().push((starts_at, ends_at));
        }
    }

    /// Doctors listed in the roster, ascending.
    pub fn doctor_ids(&self) -> Vec<i64> {
        let ids: BTreeSet<i64> = self
            .hours
            .keys()
            .filter_map(|r| match r {
                Resource::Doctor(id) => Some(*id),
                Resource::Room(_) => None,
            })
            .chain(self.services.values().flatten().copied())
            .collect();
        ids.into_iter().collect()
    }

    /// Parse a roster TOML document.
    pub fn from_toml(content: &str) -> Result<Self, RosterError> {
        let file: RosterFile = toml::from_str(content)?;
        file.into_roster()
    }

    /// Read and parse a roster file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read roster file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("failed to parse roster file {}", path.display()))
    }

    fn free_intervals(&self, resource: Resource, range: DateRange) -> Vec<Interval> {
        let Some(blocks) = self.hours.get(&resource) else {
            return Vec::new();
        };

        let working: Vec<Interval> = range
            .days()
            .flat_map(|day| {
                blocks
                    .iter()
                    .filter(move |h| h.weekday == day.weekday())
                    .map(move |h| (day.and_time(h.start), day.and_time(h.end)))
            })
            .collect();

        let busy = self.booked.get(&resource).map(Vec::as_slice).unwrap_or(&[]);
        subtract_intervals(&working, busy)
    }
}

#[async_trait]
impl Availability for RosterAvailability {
    async fn free_slots(&self, resource: Resource, range: DateRange) -> Result<Vec<FreeSlot>> {
        Ok(self
            .free_intervals(resource, range)
            .into_iter()
            .map(|(starts_at, ends_at)| FreeSlot {
                resource,
                starts_at,
                ends_at,
            })
            .collect())
    }

    async fn doctors_for_service(&self, service_id: i64) -> Result<Vec<i64>> {
        Ok(self
            .services
            .get(&service_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// TOML format
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid {field} {value:?}")]
    BadValue { field: &'static str, value: String },

    #[error("{resource} has working hours ending before they start ({start} - {end})")]
    InvertedHours {
        resource: Resource,
        start: String,
        end: String,
    },

    #[error("booked interval must name exactly one of doctor or room")]
    AmbiguousBooking,
}

/// Top-level structure of a roster file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RosterFile {
    #[serde(default)]
    pub doctors: Vec<DoctorToml>,
    #[serde(default)]
    pub rooms: Vec<RoomToml>,
    #[serde(default)]
    pub booked: Vec<BookedToml>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoctorToml {
    pub id: i64,
    #[serde(default)]
    pub services: Vec<i64>,
    #[serde(default)]
    pub hours: Vec<HoursToml>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomToml {
    pub id: i64,
    #[serde(default)]
    pub hours: Vec<HoursToml>,
}

/// `weekday` is "mon".."sun" (or the full name); times are `HH:MM`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HoursToml {
    pub weekday: String,
    pub start: String,
    pub end: String,
}

/// Times are `YYYY-MM-DD HH:MM`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookedToml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<i64>,
    pub starts_at: String,
    pub ends_at: String,
}

impl RosterFile {
    pub fn into_roster(self) -> Result<RosterAvailability, RosterError> {
        let mut roster = RosterAvailability::new();

        for doctor in &self.doctors {
            let resource = Resource::Doctor(doctor.id);
            roster = roster.with_services(doctor.id, &doctor.services);
            roster = add_hours(roster, resource, &doctor.hours)?;
        }
        for room in &self.rooms {
            roster = add_hours(roster, Resource::Room(room.id), &room.hours)?;
        }

        for booked in &self.booked {
            let resource = match (booked.doctor, booked.room) {
                (Some(id), None) => Resource::Doctor(id),
                (None, Some(id)) => Resource::Room(id),
                _ => return Err(RosterError::AmbiguousBooking),
            };
            let starts_at = parse_datetime("starts_at", &booked.starts_at)?;
            let ends_at = parse_datetime("ends_at", &booked.ends_at)?;
            roster.add_booked(resource, starts_at, ends_at);
        }

        Ok(roster)
    }
}

fn add_hours(
    roster: RosterAvailability,
    resource: Resource,
    hours: &[HoursToml],
) -> Result<RosterAvailability, RosterError> {
    hours.iter().try_fold(roster, |roster, h| {
        let weekday = Weekday::from_str(h.weekday.trim()).map_err(|_| RosterError::BadValue {
            field: "weekday",
            value: h.weekday.clone(),
        })?;
        let start = parse_time("start", &h.start)?;
        let end = parse_time("end", &h.end)?;
        if end <= start {
            return Err(RosterError::InvertedHours {
                resource,
                start: h.start.clone(),
                end: h.end.clone(),
            });
        }
        Ok(roster.with_hours(resource, weekday, start, end))
    })
}

fn parse_time(field: &'static str, raw: &str) -> Result<NaiveTime, RosterError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| RosterError::BadValue {
        field,
        value: raw.to_owned(),
    })
}

fn parse_datetime(field: &'static str, raw: &str) -> Result<NaiveDateTime, RosterError> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M").map_err(|_| RosterError::BadValue {
        field,
        value: raw.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{at, date};

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    const ROSTER: &str = r#"
[[doctors]]
id = 7
services = [10, 20]

[[doctors.hours]]
weekday = "mon"
start = "09:00"
end = "12:00"

[[doctors.hours]]
weekday = "mon"
start = "13:00"
end = "17:00"

[[doctors]]
id = 3
services = [10]

[[doctors.hours]]
weekday = "tue"
start = "08:00"
end = "10:00"

[[rooms]]
id = 1

[[rooms.hours]]
weekday = "mon"
start = "08:00"
end = "18:00"

[[booked]]
doctor = 7
starts_at = "2026-10-19 09:00"
ends_at = "2026-10-19 10:30"
"#;

    #[tokio::test]
    async fn parses_roster_and_subtracts_bookings() {
        let roster = RosterAvailability::from_toml(ROSTER).unwrap();
        let monday = DateRange::new(date(2026, 10, 19), date(2026, 10, 19));

        let slots = roster.free_slots(Resource::Doctor(7), monday).await.unwrap();
        let spans: Vec<_> = slots.iter().map(|s| (s.starts_at, s.ends_at)).collect();
        assert_eq!(
            spans,
            vec![
                (at(2026, 10, 19, 10, 30), at(2026, 10, 19, 12, 0)),
                (at(2026, 10, 19, 13, 0), at(2026, 10, 19, 17, 0)),
            ]
        );
        assert_eq!(slots[0].minutes(), 90);

        let room = roster.free_slots(Resource::Room(1), monday).await.unwrap();
        assert_eq!(room.len(), 1);

        assert_eq!(roster.doctors_for_service(10).await.unwrap(), vec![3, 7]);
        assert_eq!(roster.doctors_for_service(20).await.unwrap(), vec![7]);
        assert!(roster.doctors_for_service(99).await.unwrap().is_empty());
        assert_eq!(roster.doctor_ids(), vec![3, 7]);
    }

    #[tokio::test]
    async fn free_slots_span_the_range() {
        let roster = RosterAvailability::new().with_weekly_hours(
            Resource::Doctor(1),
            &[Weekday::Mon, Weekday::Wed],
            hm(9, 0),
            hm(10, 0),
        );
        let week = DateRange::new(date(2026, 10, 19), date(2026, 10, 25));
        let slots = roster.free_slots(Resource::Doctor(1), week).await.unwrap();
        let days: Vec<_> = slots.iter().map(|s| s.starts_at.date()).collect();
        assert_eq!(days, vec![date(2026, 10, 19), date(2026, 10, 21)]);

        let unknown = roster.free_slots(Resource::Doctor(2), week).await.unwrap();
        assert!(unknown.is_empty());
    }

    #[test]
    fn rejects_bad_roster_values() {
        let bad_day = ROSTER.replace("\"tue\"", "\"someday\"");
        assert!(matches!(
            RosterAvailability::from_toml(&bad_day),
            Err(RosterError::BadValue { field: "weekday", .. })
        ));

        let inverted = ROSTER.replace("end = \"10:00\"", "end = \"07:00\"");
        assert!(matches!(
            RosterAvailability::from_toml(&inverted),
            Err(RosterError::InvertedHours { .. })
        ));

        let ambiguous = ROSTER.replace("doctor = 7\nstarts_at", "doctor = 7\nroom = 1\nstarts_at");
        assert!(matches!(
            RosterAvailability::from_toml(&ambiguous),
            Err(RosterError::AmbiguousBooking)
        ));
    }
}
