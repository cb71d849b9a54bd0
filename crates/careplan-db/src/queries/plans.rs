//! Database query functions for the `treatment_plans`, `plan_phases`,
//! `plan_items`, and `item_appointments` tables.
//!
//! A plan is always read and written as a whole aggregate. Writes go through
//! [`update_plan_versioned`], which only touches the rows when the stored
//! `version` still matches the caller's expectation.

use std::collections::HashMap;

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{Item, LinkedAppointment, Phase, TreatmentPlan};

/// Insert a new plan with all its phases, items, and linked appointments in
/// a single transaction.
pub async fn insert_plan(pool: &PgPool, plan: &TreatmentPlan) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query(
        "INSERT INTO treatment_plans \
         (id, code, name, patient_id, doctor_id, approval_status, status, start_date, \
          expected_end_date, total_cost, discount_amount, final_cost, payment_type, notes, \
          review_notes, version, created_at, submitted_at, reviewed_at, approved_at, \
          completed_at, cancelled_at, cancellation_reason) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                 $17, $18, $19, $20, $21, $22, $23)",
    )
    .bind(plan.id)
    .bind(&plan.code)
    .bind(&plan.name)
    .bind(plan.patient_id)
    .bind(plan.doctor_id)
    .bind(plan.approval_status)
    .bind(plan.status)
    .bind(plan.start_date)
    .bind(plan.expected_end_date)
    .bind(plan.total_cost)
    .bind(plan.discount_amount)
    .bind(plan.final_cost)
    .bind(plan.payment_type)
    .bind(&plan.notes)
    .bind(&plan.review_notes)
    .bind(plan.version)
    .bind(plan.created_at)
    .bind(plan.submitted_at)
    .bind(plan.reviewed_at)
    .bind(plan.approved_at)
    .bind(plan.completed_at)
    .bind(plan.cancelled_at)
    .bind(&plan.cancellation_reason)
    .execute(&mut *tx)
    .await
    .with_context(|| format!("failed to insert plan {}", plan.code))?;

    for phase in &plan.phases {
        sqlx::query(
            "INSERT INTO plan_phases \
             (id, plan_id, phase_number, name, description, estimated_duration_days, released) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(phase.id)
        .bind(plan.id)
        .bind(phase.phase_number)
        .bind(&phase.name)
        .bind(&phase.description)
        .bind(phase.estimated_duration_days)
        .bind(phase.released)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to insert phase {}", phase.phase_number))?;

        // Prerequisites always point backwards, so insertion order satisfies
        // the self-referencing foreign key.
        for item in &phase.items {
            insert_item(&mut tx, phase.id, item).await?;
        }
    }

    tx.commit().await.context("failed to commit transaction")?;
    Ok(())
}

async fn insert_item(
    tx: &mut Transaction<'_, Postgres>,
    phase_id: Uuid,
    item: &Item,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO plan_items \
         (id, phase_id, sequence_number, service_id, item_name, price, estimated_time_minutes, \
          status, prerequisite_item_id, spacing_days, default_doctor_id, completed_on, \
          completion_note) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(item.id)
    .bind(phase_id)
    .bind(item.sequence_number)
    .bind(item.service_id)
    .bind(&item.item_name)
    .bind(item.price)
    .bind(item.estimated_time_minutes)
    .bind(item.status)
    .bind(item.prerequisite_item_id)
    .bind(item.spacing_days)
    .bind(item.default_doctor_id)
    .bind(item.completed_on)
    .bind(&item.completion_note)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("failed to insert item {:?}", item.item_name))?;

    for appt in &item.linked_appointments {
        upsert_linked_appointment(tx, appt).await?;
    }
    Ok(())
}

async fn upsert_linked_appointment(
    tx: &mut Transaction<'_, Postgres>,
    appt: &LinkedAppointment,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO item_appointments (appointment_id, item_id, doctor_id, starts_at, status) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (appointment_id) DO UPDATE \
         SET doctor_id = EXCLUDED.doctor_id, \
             starts_at = EXCLUDED.starts_at, \
             status = EXCLUDED.status",
    )
    .bind(appt.appointment_id)
    .bind(appt.item_id)
    .bind(appt.doctor_id)
    .bind(appt.starts_at)
    .bind(appt.status)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("failed to store linked appointment {}", appt.appointment_id))?;
    Ok(())
}

/// Fetch a plan aggregate by its business code.
pub async fn get_plan_by_code(pool: &PgPool, code: &str) -> Result<Option<TreatmentPlan>> {
    let plan = sqlx::query_as::<_, TreatmentPlan>("SELECT * FROM treatment_plans WHERE code = $1")
        .bind(code)
        .fetch_optional(pool)
        .await
        .context("failed to fetch plan")?;

    match plan {
        Some(mut plan) => {
            plan.phases = load_phases(pool, plan.id).await?;
            Ok(Some(plan))
        }
        None => Ok(None),
    }
}

/// Load phases with their items and linked appointments, ordered by phase
/// and sequence number.
async fn load_phases(pool: &PgPool, plan_id: Uuid) -> Result<Vec<Phase>> {
    let mut phases = sqlx::query_as::<_, Phase>(
        "SELECT * FROM plan_phases WHERE plan_id = $1 ORDER BY phase_number ASC",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("failed to list phases")?;

    let items = sqlx::query_as::<_, Item>(
        "SELECT i.* FROM plan_items i \
         JOIN plan_phases p ON p.id = i.phase_id \
         WHERE p.plan_id = $1 \
         ORDER BY p.phase_number ASC, i.sequence_number ASC",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("failed to list plan items")?;

    let appointments = sqlx::query_as::<_, LinkedAppointment>(
        "SELECT a.* FROM item_appointments a \
         JOIN plan_items i ON i.id = a.item_id \
         JOIN plan_phases p ON p.id = i.phase_id \
         WHERE p.plan_id = $1 \
         ORDER BY a.starts_at ASC",
    )
    .bind(plan_id)
    .fetch_all(pool)
    .await
    .context("failed to list linked appointments")?;

    let mut by_item: HashMap<Uuid, Vec<LinkedAppointment>> = HashMap::new();
    for appt in appointments {
        by_item.entry(appt.item_id).or_default().push(appt);
    }

    let mut by_phase: HashMap<Uuid, Vec<Item>> = HashMap::new();
    for mut item in items {
        item.linked_appointments = by_item.remove(&item.id).unwrap_or_default();
        by_phase.entry(item.phase_id).or_default().push(item);
    }

    for phase in &mut phases {
        phase.items = by_phase.remove(&phase.id).unwrap_or_default();
    }
    Ok(phases)
}

/// List the codes of all plans, newest first.
pub async fn list_plan_codes(pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT code FROM treatment_plans ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
            .context("failed to list plans")?;
    Ok(rows.into_iter().map(|(code,)| code).collect())
}

/// Current stored version of a plan, or `None` if it does not exist.
pub async fn get_plan_version(pool: &PgPool, code: &str) -> Result<Option<i32>> {
    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM treatment_plans WHERE code = $1")
            .bind(code)
            .fetch_optional(pool)
            .await
            .context("failed to fetch plan version")?;
    Ok(version)
}

/// Find the code of the plan owning an item.
pub async fn plan_code_for_item(pool: &PgPool, item_id: Uuid) -> Result<Option<String>> {
    let code: Option<String> = sqlx::query_scalar(
        "SELECT t.code FROM plan_items i \
         JOIN plan_phases p ON p.id = i.phase_id \
         JOIN treatment_plans t ON t.id = p.plan_id \
         WHERE i.id = $1",
    )
    .bind(item_id)
    .fetch_optional(pool)
    .await
    .context("failed to look up plan for item")?;
    Ok(code)
}

/// Write a plan aggregate back, guarded by an optimistic version check.
///
/// The plan row is only updated when its stored `version` equals
/// `expected_version`; the stored version becomes `expected_version + 1`.
/// Returns the number of plan rows affected (0 means the version did not
/// match or the plan does not exist, and nothing was written).
pub async fn update_plan_versioned(
    pool: &PgPool,
    plan: &TreatmentPlan,
    expected_version: i32,
) -> Result<u64> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let result = sqlx::query(
        "UPDATE treatment_plans \
         SET name = $1, approval_status = $2, status = $3, start_date = $4, \
             expected_end_date = $5, total_cost = $6, discount_amount = $7, final_cost = $8, \
             payment_type = $9, notes = $10, review_notes = $11, submitted_at = $12, \
             reviewed_at = $13, approved_at = $14, completed_at = $15, cancelled_at = $16, \
             cancellation_reason = $17, version = version + 1 \
         WHERE code = $18 AND version = $19",
    )
    .bind(&plan.name)
    .bind(plan.approval_status)
    .bind(plan.status)
    .bind(plan.start_date)
    .bind(plan.expected_end_date)
    .bind(plan.total_cost)
    .bind(plan.discount_amount)
    .bind(plan.final_cost)
    .bind(plan.payment_type)
    .bind(&plan.notes)
    .bind(&plan.review_notes)
    .bind(plan.submitted_at)
    .bind(plan.reviewed_at)
    .bind(plan.approved_at)
    .bind(plan.completed_at)
    .bind(plan.cancelled_at)
    .bind(&plan.cancellation_reason)
    .bind(&plan.code)
    .bind(expected_version)
    .execute(&mut *tx)
    .await
    .context("failed to update plan")?;

    if result.rows_affected() == 0 {
        // Rolls back on drop.
        return Ok(0);
    }

    for phase in &plan.phases {
        sqlx::query("UPDATE plan_phases SET name = $1, released = $2 WHERE id = $3")
            .bind(&phase.name)
            .bind(phase.released)
            .bind(phase.id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to update phase {}", phase.phase_number))?;

        for item in &phase.items {
            sqlx::query(
                "UPDATE plan_items \
                 SET item_name = $1, price = $2, estimated_time_minutes = $3, status = $4, \
                     completed_on = $5, completion_note = $6 \
                 WHERE id = $7",
            )
            .bind(&item.item_name)
            .bind(item.price)
            .bind(item.estimated_time_minutes)
            .bind(item.status)
            .bind(item.completed_on)
            .bind(&item.completion_note)
            .bind(item.id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to update item {}", item.id))?;

            for appt in &item.linked_appointments {
                upsert_linked_appointment(&mut tx, appt).await?;
            }
        }
    }

    tx.commit().await.context("failed to commit transaction")?;
    Ok(result.rows_affected())
}
