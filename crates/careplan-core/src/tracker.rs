//! Item progress tracking.
//!
//! Applies completion events to a plan: appointment status changes, manual
//! completion, skips, and edits. After any item closes, dependents whose
//! prerequisite is now satisfied become bookable, the next phase is released
//! once every earlier item is closed, and the plan status is re-derived.
//!
//! All functions take `&mut TreatmentPlan` and leave it untouched when they
//! return an error.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use careplan_db::models::{
    AppointmentStatus, ApprovalStatus, Item, ItemStatus, LinkedAppointment, PlanStatus,
    TreatmentPlan,
};

use crate::error::{PlanError, ValidationError, status_label};
use crate::financial::{self, FinancialImpact};
use crate::status;

/// An appointment status change reported by the booking side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentEvent {
    pub item_id: Uuid,
    pub appointment_id: Uuid,
    pub doctor_id: i64,
    pub starts_at: NaiveDateTime,
    pub status: AppointmentStatus,
    /// Day the event happened; becomes `completed_on` for done appointments.
    pub on_date: NaiveDate,
}

/// Editable item fields. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub item_name: Option<String>,
    pub price: Option<Decimal>,
    pub estimated_time_minutes: Option<i32>,
}

impl ItemUpdate {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.item_name.is_none() && self.price.is_none() && self.estimated_time_minutes.is_none()
        {
            return Err(ValidationError::EmptyUpdate);
        }
        let name = self.item_name.as_deref().unwrap_or("item");
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyItemName);
        }
        if let Some(price) = self.price.filter(|p| *p < Decimal::ZERO) {
            return Err(ValidationError::NegativePrice {
                item: name.to_owned(),
                price,
            });
        }
        if let Some(minutes) = self.estimated_time_minutes.filter(|m| *m <= 0) {
            return Err(ValidationError::InvalidEstimatedTime {
                item: name.to_owned(),
                minutes,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

fn plan_entity(plan: &TreatmentPlan) -> String {
    format!("plan {}", plan.code)
}

fn item_entity(item: &Item) -> String {
    format!("item {}", item.id)
}

fn is_active(plan: &TreatmentPlan) -> bool {
    plan.approval_status == ApprovalStatus::Approved
        && !matches!(
            plan.status,
            Some(PlanStatus::Completed | PlanStatus::Cancelled)
        )
}

/// Approved and neither completed nor cancelled.
fn ensure_active(plan: &TreatmentPlan, to: impl fmt::Display) -> Result<(), PlanError> {
    if is_active(plan) {
        return Ok(());
    }
    let from = if plan.approval_status == ApprovalStatus::Approved {
        status_label(plan.status)
    } else {
        plan.approval_status.to_string()
    };
    Err(PlanError::transition(plan_entity(plan), from, to))
}

/// Draft plans and active plans accept edits.
fn ensure_editable(plan: &TreatmentPlan, to: impl fmt::Display) -> Result<(), PlanError> {
    if status::is_withdrawn(plan) {
        return Err(PlanError::transition(plan_entity(plan), "withdrawn", to));
    }
    if plan.approval_status == ApprovalStatus::Draft {
        return Ok(());
    }
    ensure_active(plan, to)
}

fn find_item(plan: &TreatmentPlan, item_id: Uuid) -> Result<&Item, PlanError> {
    plan.find_item(item_id)
        .ok_or_else(|| PlanError::NotFound(format!("item {item_id} in plan {}", plan.code)))
}

/// No prerequisite, or a prerequisite that is completed or skipped.
pub fn prerequisite_satisfied(plan: &TreatmentPlan, item: &Item) -> bool {
    match item.prerequisite_item_id {
        None => true,
        Some(id) => plan.find_item(id).is_some_and(|p| p.status.is_closed()),
    }
}

fn ensure_prerequisite(plan: &TreatmentPlan, item: &Item) -> Result<(), PlanError> {
    match item.prerequisite_item_id {
        Some(prerequisite_item_id) if !prerequisite_satisfied(plan, item) => {
            Err(PlanError::PrerequisiteNotMet {
                item_id: item.id,
                prerequisite_item_id,
            })
        }
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Phase release
// ---------------------------------------------------------------------------

/// Hand a phase's pending items to scheduling.
///
/// Each pending item becomes ready for booking, or waits for its
/// prerequisite when that is not yet satisfied.
pub fn release_phase(plan: &mut TreatmentPlan, phase_number: i32) -> Result<(), PlanError> {
    ensure_active(plan, format!("release phase {phase_number}"))?;
    let idx = plan
        .phases
        .iter()
        .position(|p| p.phase_number == phase_number)
        .ok_or(ValidationError::UnknownPhase(phase_number))?;
    release_at(plan, idx);
    Ok(())
}

fn release_at(plan: &mut TreatmentPlan, idx: usize) {
    let updates: Vec<(usize, ItemStatus)> = plan.phases[idx]
        .items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.status == ItemStatus::Pending)
        .map(|(i, item)| {
            let status = if prerequisite_satisfied(plan, item) {
                ItemStatus::ReadyForBooking
            } else {
                ItemStatus::WaitingForPrerequisite
            };
            (i, status)
        })
        .collect();

    let phase = &mut plan.phases[idx];
    for (i, status) in updates {
        phase.items[i].status = status;
    }
    if !phase.released {
        tracing::debug!(phase = phase.phase_number, "phase released");
    }
    phase.released = true;
}

/// Release phases in order for as long as every earlier item is closed.
///
/// The first phase is always released; empty phases never hold up the next.
pub(crate) fn release_available_phases(plan: &mut TreatmentPlan) {
    if !is_active(plan) {
        return;
    }
    let mut order: Vec<usize> = (0..plan.phases.len()).collect();
    order.sort_by_key(|&i| plan.phases[i].phase_number);

    for idx in order {
        if !plan.phases[idx].released {
            release_at(plan, idx);
        }
        if plan.phases[idx].items.iter().any(|i| !i.status.is_closed()) {
            break;
        }
    }
}

/// Move released waiting items whose prerequisite is now satisfied to ready.
fn promote_dependents(plan: &mut TreatmentPlan) {
    let ready: HashSet<Uuid> = plan
        .phases
        .iter()
        .filter(|p| p.released)
        .flat_map(|p| p.items.iter())
        .filter(|i| {
            i.status == ItemStatus::WaitingForPrerequisite && prerequisite_satisfied(plan, i)
        })
        .map(|i| i.id)
        .collect();

    for item in plan.phases.iter_mut().flat_map(|p| p.items.iter_mut()) {
        if ready.contains(&item.id) {
            item.status = ItemStatus::ReadyForBooking;
        }
    }
}

/// Re-derive the plan status from its phases and items.
pub(crate) fn refresh_plan_status(plan: &mut TreatmentPlan, now: DateTime<Utc>) {
    if plan.approval_status != ApprovalStatus::Approved {
        return;
    }
    let derived = status::plan_status(plan);
    if derived == Some(PlanStatus::Completed) && plan.completed_at.is_none() {
        plan.completed_at = Some(now);
        tracing::info!(plan_code = %plan.code, "plan completed");
    }
    plan.status = derived;
}

fn after_item_closed(plan: &mut TreatmentPlan, now: DateTime<Utc>) {
    promote_dependents(plan);
    release_available_phases(plan);
    refresh_plan_status(plan, now);
}

// ---------------------------------------------------------------------------
// Completion events
// ---------------------------------------------------------------------------

fn status_from_active_appointments(appointments: &[LinkedAppointment]) -> ItemStatus {
    if appointments
        .iter()
        .any(|a| a.status == AppointmentStatus::CheckedIn)
    {
        ItemStatus::InProgress
    } else if appointments
        .iter()
        .any(|a| a.status == AppointmentStatus::Booked)
    {
        ItemStatus::Scheduled
    } else {
        ItemStatus::ReadyForBooking
    }
}

/// Apply an appointment status change to its item.
///
/// Booked schedules the item, checked in starts it, done completes it.
/// Cancelled and no-show return it to ready for booking unless another
/// active appointment remains. Returns the item's new status.
pub fn record_appointment(
    plan: &mut TreatmentPlan,
    event: &AppointmentEvent,
    now: DateTime<Utc>,
) -> Result<ItemStatus, PlanError> {
    ensure_active(plan, format!("appointment {}", event.status))?;
    let item = find_item(plan, event.item_id)?;

    if item.status.is_closed() || item.status == ItemStatus::Pending {
        return Err(PlanError::transition(
            item_entity(item),
            item.status,
            format!("appointment {}", event.status),
        ));
    }
    if matches!(
        event.status,
        AppointmentStatus::Booked | AppointmentStatus::CheckedIn | AppointmentStatus::Done
    ) {
        ensure_prerequisite(plan, item)?;
    }

    let Some(item) = plan.find_item_mut(event.item_id) else {
        return Err(PlanError::NotFound(format!("item {}", event.item_id)));
    };
    match item
        .linked_appointments
        .iter_mut()
        .find(|a| a.appointment_id == event.appointment_id)
    {
        Some(existing) => {
            existing.doctor_id = event.doctor_id;
            existing.starts_at = event.starts_at;
            existing.status = event.status;
        }
        None => item.linked_appointments.push(LinkedAppointment {
            appointment_id: event.appointment_id,
            item_id: item.id,
            doctor_id: event.doctor_id,
            starts_at: event.starts_at,
            status: event.status,
        }),
    }

    let new_status = if event.status == AppointmentStatus::Done {
        item.completed_on = Some(event.on_date);
        ItemStatus::Completed
    } else {
        status_from_active_appointments(&item.linked_appointments)
    };
    item.status = new_status;

    tracing::debug!(
        plan_code = %plan.code,
        item_id = %event.item_id,
        appointment = %event.status,
        status = %new_status,
        "appointment recorded"
    );

    if new_status.is_closed() {
        after_item_closed(plan, now);
    } else {
        refresh_plan_status(plan, now);
    }
    Ok(new_status)
}

/// Mark an item completed without a done appointment. A note is required.
pub fn complete_item_manually(
    plan: &mut TreatmentPlan,
    item_id: Uuid,
    on_date: NaiveDate,
    note: &str,
    now: DateTime<Utc>,
) -> Result<(), PlanError> {
    ensure_active(plan, "complete item")?;
    let note = note.trim();
    if note.is_empty() {
        return Err(ValidationError::MissingCompletionNote.into());
    }
    let item = find_item(plan, item_id)?;
    if item.status.is_closed() || item.status == ItemStatus::Pending {
        return Err(PlanError::transition(
            item_entity(item),
            item.status,
            ItemStatus::Completed,
        ));
    }
    ensure_prerequisite(plan, item)?;

    if let Some(item) = plan.find_item_mut(item_id) {
        item.status = ItemStatus::Completed;
        item.completed_on = Some(on_date);
        item.completion_note = Some(note.to_owned());
    }
    after_item_closed(plan, now);
    Ok(())
}

/// Drop an item from the plan's scope and recompute totals.
pub fn skip_item(
    plan: &mut TreatmentPlan,
    item_id: Uuid,
    now: DateTime<Utc>,
) -> Result<FinancialImpact, PlanError> {
    ensure_editable(plan, "skip item")?;
    let item = find_item(plan, item_id)?;
    if item.status.is_closed()
        || item
            .linked_appointments
            .iter()
            .any(|a| a.status.is_active())
    {
        return Err(PlanError::transition(
            item_entity(item),
            status::item_display_status(plan, item),
            ItemStatus::Skipped,
        ));
    }

    let mut next = plan.clone();
    if let Some(item) = next.find_item_mut(item_id) {
        item.status = ItemStatus::Skipped;
    }
    let impact = financial::apply_totals(&mut next)?;
    after_item_closed(&mut next, now);

    *plan = next;
    Ok(impact)
}

/// Edit an item's name, price, or duration and recompute totals.
pub fn update_item(
    plan: &mut TreatmentPlan,
    item_id: Uuid,
    update: &ItemUpdate,
) -> Result<FinancialImpact, PlanError> {
    update.validate()?;
    ensure_editable(plan, "edit item")?;
    let item = find_item(plan, item_id)?;
    if item.status.is_closed() {
        return Err(PlanError::transition(item_entity(item), item.status, "edited"));
    }

    let mut next = plan.clone();
    if let Some(item) = next.find_item_mut(item_id) {
        if let Some(name) = &update.item_name {
            item.item_name = name.trim().to_owned();
        }
        if let Some(price) = update.price {
            item.price = price;
        }
        if let Some(minutes) = update.estimated_time_minutes {
            item.estimated_time_minutes = minutes;
        }
    }
    let impact = financial::apply_totals(&mut next)?;

    *plan = next;
    Ok(impact)
}

/// Cancel a plan.
///
/// An active plan becomes cancelled. A plan that was never approved is
/// withdrawn instead: its status stays null and it accepts no further
/// changes.
pub fn cancel_plan(
    plan: &mut TreatmentPlan,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(), PlanError> {
    let activated = plan.approval_status == ApprovalStatus::Approved;
    if status::is_withdrawn(plan) {
        return Err(PlanError::transition(
            plan_entity(plan),
            "withdrawn",
            PlanStatus::Cancelled,
        ));
    }
    if activated {
        ensure_active(plan, PlanStatus::Cancelled)?;
    }
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ValidationError::MissingCancellationReason.into());
    }

    if activated {
        plan.status = Some(PlanStatus::Cancelled);
    } else {
        tracing::info!(
            plan_code = %plan.code,
            approval = %plan.approval_status,
            "plan withdrawn before approval"
        );
    }
    plan.cancelled_at = Some(now);
    plan.cancellation_reason = Some(reason.to_owned());
    Ok(())
}

// ---------------------------------------------------------------------------
// Invariants
// ---------------------------------------------------------------------------

/// Check the structural, financial, and status invariants of a plan.
///
/// Returns a description of every violation; an empty list means the plan
/// is consistent.
pub fn check_invariants(plan: &TreatmentPlan) -> Vec<String> {
    let mut violations = Vec::new();

    if plan.discount_amount < Decimal::ZERO {
        violations.push(format!("discount {} is negative", plan.discount_amount));
    }
    if plan.final_cost < Decimal::ZERO {
        violations.push(format!("final cost {} is negative", plan.final_cost));
    }
    if plan.total_cost.checked_sub(plan.discount_amount) != Some(plan.final_cost) {
        violations.push(format!(
            "final cost {} != total {} - discount {}",
            plan.final_cost, plan.total_cost, plan.discount_amount
        ));
    }
    let expected_total = plan
        .items()
        .filter(|i| i.status != ItemStatus::Skipped)
        .try_fold(Decimal::ZERO, |acc, i| acc.checked_add(i.price));
    match expected_total {
        Some(expected) if expected == plan.total_cost => {}
        Some(expected) => violations.push(format!(
            "total cost {} != sum of non-skipped prices {expected}",
            plan.total_cost
        )),
        None => violations.push("sum of non-skipped prices overflows".to_owned()),
    }

    let mut numbers: Vec<i32> = plan.phases.iter().map(|p| p.phase_number).collect();
    numbers.sort_unstable();
    if numbers.iter().copied().ne(1..=numbers.len() as i32) {
        violations.push(format!(
            "phase numbers {numbers:?} are not unique and contiguous from 1"
        ));
    }
    for phase in &plan.phases {
        let mut seen = HashSet::new();
        for item in &phase.items {
            if !seen.insert(item.sequence_number) {
                violations.push(format!(
                    "sequence number {} repeats in phase {}",
                    item.sequence_number, phase.phase_number
                ));
            }
        }
    }

    match (plan.approval_status, plan.status) {
        (ApprovalStatus::Approved, None) => {
            violations.push("approved plan has no status".to_owned());
        }
        (approval, Some(s)) if approval != ApprovalStatus::Approved => {
            violations.push(format!("{approval} plan has status {s}"));
        }
        _ => {}
    }

    let mut position = HashSet::new();
    for item in plan.items() {
        if let Some(prereq) = item.prerequisite_item_id {
            if !position.contains(&prereq) {
                violations.push(format!(
                    "item {} depends on {prereq}, which is not an earlier item",
                    item.id
                ));
            }
        }
        position.insert(item.id);

        if item.status == ItemStatus::WaitingForPrerequisite && item.prerequisite_item_id.is_none()
        {
            violations.push(format!("item {} waits without a prerequisite", item.id));
        }
        if item.status == ItemStatus::Completed
            && item.completion_note.is_none()
            && !item
                .linked_appointments
                .iter()
                .any(|a| a.status == AppointmentStatus::Done)
        {
            violations.push(format!(
                "item {} is completed without a done appointment or manual note",
                item.id
            ));
        }
    }

    if plan.status == Some(PlanStatus::Completed) && plan.items().any(|i| !i.status.is_closed()) {
        violations.push("plan is completed but has open items".to_owned());
    }

    violations
}
