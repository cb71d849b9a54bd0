//! Reservations in the `appointments` table.
//!
//! This is the only place shared calendar state is mutated. Reservation is
//! serialized per doctor with a transaction-scoped advisory lock so the
//! overlap check and the insert are atomic with respect to each other.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Appointment;

/// Advisory-lock namespace for per-doctor booking. Room locks use the
/// negated id so the two never collide.
fn doctor_lock_key(doctor_id: i64) -> i64 {
    doctor_id
}

fn room_lock_key(room_id: i64) -> i64 {
    -room_id - 1
}

/// Attempt to reserve `[starts_at, ends_at)` for a doctor (and optionally a
/// room).
///
/// Returns `Ok(None)` if the doctor or room already has an overlapping
/// reservation; nothing is written in that case.
pub async fn reserve_slot(
    pool: &PgPool,
    item_id: Uuid,
    doctor_id: i64,
    room_id: Option<i64>,
    starts_at: NaiveDateTime,
    ends_at: NaiveDateTime,
) -> Result<Option<Appointment>> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(doctor_lock_key(doctor_id))
        .execute(&mut *tx)
        .await
        .context("failed to take doctor booking lock")?;

    if let Some(room_id) = room_id {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(room_lock_key(room_id))
            .execute(&mut *tx)
            .await
            .context("failed to take room booking lock")?;
    }

    let overlapping: bool = sqlx::query_scalar(
        "SELECT EXISTS( \
             SELECT 1 FROM appointments \
             WHERE (doctor_id = $1 OR ($2::BIGINT IS NOT NULL AND room_id = $2)) \
               AND starts_at < $4 AND ends_at > $3)",
    )
    .bind(doctor_id)
    .bind(room_id)
    .bind(starts_at)
    .bind(ends_at)
    .fetch_one(&mut *tx)
    .await
    .context("failed to check for overlapping appointments")?;

    if overlapping {
        return Ok(None);
    }

    let appointment = sqlx::query_as::<_, Appointment>(
        "INSERT INTO appointments (id, item_id, doctor_id, room_id, starts_at, ends_at) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(item_id)
    .bind(doctor_id)
    .bind(room_id)
    .bind(starts_at)
    .bind(ends_at)
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert appointment")?;

    tx.commit().await.context("failed to commit transaction")?;
    Ok(Some(appointment))
}

/// Reservations for a doctor that intersect `[from, until)`, ordered by start.
pub async fn list_for_doctor(
    pool: &PgPool,
    doctor_id: i64,
    from: NaiveDateTime,
    until: NaiveDateTime,
) -> Result<Vec<Appointment>> {
    let rows = sqlx::query_as::<_, Appointment>(
        "SELECT * FROM appointments \
         WHERE doctor_id = $1 AND starts_at < $3 AND ends_at > $2 \
         ORDER BY starts_at ASC",
    )
    .bind(doctor_id)
    .bind(from)
    .bind(until)
    .fetch_all(pool)
    .await
    .context("failed to list appointments for doctor")?;
    Ok(rows)
}
