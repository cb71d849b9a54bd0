//! Clinic holiday calendar.

use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use sqlx::PgPool;

use careplan_db::queries::holidays;

/// Answers whether the clinic is closed on a given day.
#[async_trait]
pub trait HolidayCalendar: Send + Sync {
    async fn is_holiday(&self, day: NaiveDate) -> Result<bool>;
}

// Compile-time assertion: HolidayCalendar must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn HolidayCalendar) {}
};

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Fixed closure dates plus weekdays the clinic never opens.
#[derive(Debug, Clone, Default)]
pub struct StaticHolidayCalendar {
    dates: BTreeSet<NaiveDate>,
    closed_weekdays: HashSet<Weekday>,
}

impl StaticHolidayCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date(mut self, day: NaiveDate) -> Self {
        self.dates.insert(day);
        self
    }

    pub fn with_dates(mut self, days: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.dates.extend(days);
        self
    }

    pub fn with_closed_weekday(mut self, weekday: Weekday) -> Self {
        self.closed_weekdays.insert(weekday);
        self
    }

    /// Closed on Saturdays and Sundays.
    pub fn weekends_closed() -> Self {
        Self::new()
            .with_closed_weekday(Weekday::Sat)
            .with_closed_weekday(Weekday::Sun)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.dates.contains(&day) || self.closed_weekdays.contains(&day.weekday())
    }
}

#[async_trait]
impl HolidayCalendar for StaticHolidayCalendar {
    async fn is_holiday(&self, day: NaiveDate) -> Result<bool> {
        Ok(self.contains(day))
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// Reads closures from the `clinic_holidays` table.
#[derive(Debug, Clone)]
pub struct PgHolidayCalendar {
    pool: PgPool,
}

impl PgHolidayCalendar {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HolidayCalendar for PgHolidayCalendar {
    async fn is_holiday(&self, day: NaiveDate) -> Result<bool> {
        holidays::is_holiday(&self.pool, day).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::date;

    #[tokio::test]
    async fn explicit_dates_and_weekdays() {
        let calendar = StaticHolidayCalendar::weekends_closed().with_date(date(2026, 12, 25));

        assert!(calendar.is_holiday(date(2026, 12, 25)).await.unwrap());
        // Saturday
        assert!(calendar.is_holiday(date(2026, 10, 24)).await.unwrap());
        // Monday
        assert!(!calendar.is_holiday(date(2026, 10, 19)).await.unwrap());
    }

    #[test]
    fn empty_calendar_is_always_open() {
        let calendar = StaticHolidayCalendar::new();
        assert!(!calendar.contains(date(2026, 10, 24)));
    }
}
