//! Database query functions for the `clinic_holidays` table.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::PgPool;

use crate::models::Holiday;

/// Whether the clinic is closed on `day`.
pub async fn is_holiday(pool: &PgPool, day: NaiveDate) -> Result<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM clinic_holidays WHERE day = $1)")
            .bind(day)
            .fetch_one(pool)
            .await
            .context("failed to query clinic holidays")?;
    Ok(exists)
}

/// Insert or rename a holiday.
pub async fn upsert_holiday(pool: &PgPool, day: NaiveDate, name: &str) -> Result<Holiday> {
    let holiday = sqlx::query_as::<_, Holiday>(
        "INSERT INTO clinic_holidays (day, name) VALUES ($1, $2) \
         ON CONFLICT (day) DO UPDATE SET name = EXCLUDED.name \
         RETURNING *",
    )
    .bind(day)
    .bind(name)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to store holiday {day}"))?;
    Ok(holiday)
}

/// Holidays within `[from, until]`, ordered by day.
pub async fn list_holidays(
    pool: &PgPool,
    from: NaiveDate,
    until: NaiveDate,
) -> Result<Vec<Holiday>> {
    let rows = sqlx::query_as::<_, Holiday>(
        "SELECT * FROM clinic_holidays WHERE day BETWEEN $1 AND $2 ORDER BY day ASC",
    )
    .bind(from)
    .bind(until)
    .fetch_all(pool)
    .await
    .context("failed to list clinic holidays")?;
    Ok(rows)
}
