//! Plan service layer.
//!
//! Every mutation runs load -> check version -> change -> save while holding
//! the plan's lock from [`PlanLocks`]. Callers may pass the version they last
//! read; a mismatch fails with [`PlanError::StaleState`] before anything
//! changes. The store's compare-and-swap catches writers in other processes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use careplan_db::models::{
    AppointmentStatus, ApprovalStatus, Item, ItemStatus, PlanStatus, TreatmentPlan,
};

use crate::approval::ApprovalWorkflow;
use crate::availability::Availability;
use crate::booking::{AppointmentRef, BookingGateway};
use crate::calendar::HolidayCalendar;
use crate::error::{PlanError, ValidationError, status_label};
use crate::financial::FinancialImpact;
use crate::locks::PlanLocks;
use crate::plan::{CustomPlanRequest, build_custom_plan, plan_code};
use crate::scheduler::{AutoScheduler, ScheduleRequest, ScheduleResult, ScheduleScope, Suggestion};
use crate::status::{PlanSummary, PlanView};
use crate::store::PlanStore;
use crate::tracker::{self, AppointmentEvent, ItemUpdate};

/// Result of an item edit or skip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemChange {
    pub item: Item,
    pub financial_impact: FinancialImpact,
    pub plan_version: i32,
}

/// A confirmed booking and the plan it was recorded on.
#[derive(Debug, Clone, PartialEq)]
pub struct Booking {
    pub appointment: AppointmentRef,
    pub plan: TreatmentPlan,
}

/// Inserts tried with fresh codes before a collision is reported.
const CODE_ATTEMPTS: u32 = 5;

pub struct PlanService<S> {
    store: S,
    locks: PlanLocks,
}

impl<S: PlanStore> PlanService<S> {
    pub fn new(store: S) -> Self {
        Self::with_locks(store, PlanLocks::new())
    }

    /// Share a lock registry with other services over the same plans.
    pub fn with_locks(store: S, locks: PlanLocks) -> Self {
        Self { store, locks }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Creation and approval
    // -----------------------------------------------------------------------

    pub async fn create_custom_plan(
        &self,
        request: &CustomPlanRequest,
    ) -> Result<TreatmentPlan, PlanError> {
        let mut plan = build_custom_plan(request, Utc::now())?;
        let mut attempt = 1;
        loop {
            match self.store.insert_plan(&plan).await {
                Ok(()) => break,
                Err(PlanError::DuplicateCode(code)) if attempt < CODE_ATTEMPTS => {
                    tracing::warn!(plan_code = %code, attempt, "plan code taken, regenerating");
                    plan.code = plan_code(Uuid::new_v4(), plan.created_at);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
        tracing::info!(
            plan_code = %plan.code,
            items = plan.items().count(),
            final_cost = %plan.final_cost,
            "plan created"
        );
        Ok(plan)
    }

    pub async fn submit_for_review(
        &self,
        code: &str,
        expected_version: Option<i32>,
    ) -> Result<TreatmentPlan, PlanError> {
        let (plan, ()) = self
            .mutate(code, expected_version, "submit", |plan, now| {
                ApprovalWorkflow::submit(plan, now)
            })
            .await?;
        Ok(plan)
    }

    pub async fn approve(
        &self,
        code: &str,
        notes: Option<&str>,
        expected_version: Option<i32>,
    ) -> Result<TreatmentPlan, PlanError> {
        let (plan, ()) = self
            .mutate(code, expected_version, "approve", |plan, now| {
                ApprovalWorkflow::approve(plan, notes, now)
            })
            .await?;
        Ok(plan)
    }

    pub async fn reject(
        &self,
        code: &str,
        notes: &str,
        expected_version: Option<i32>,
    ) -> Result<TreatmentPlan, PlanError> {
        let (plan, ()) = self
            .mutate(code, expected_version, "reject", |plan, now| {
                ApprovalWorkflow::reject(plan, notes, now)
            })
            .await?;
        Ok(plan)
    }

    pub async fn reopen(
        &self,
        code: &str,
        expected_version: Option<i32>,
    ) -> Result<TreatmentPlan, PlanError> {
        let (plan, ()) = self
            .mutate(code, expected_version, "reopen", |plan, _| {
                ApprovalWorkflow::reopen(plan)
            })
            .await?;
        Ok(plan)
    }

    // -----------------------------------------------------------------------
    // Item progress
    // -----------------------------------------------------------------------

    pub async fn update_item(
        &self,
        item_id: Uuid,
        update: &ItemUpdate,
        expected_version: Option<i32>,
    ) -> Result<ItemChange, PlanError> {
        let code = self.code_for_item(item_id).await?;
        let (plan, impact) = self
            .mutate(&code, expected_version, "update item", |plan, _| {
                tracker::update_item(plan, item_id, update)
            })
            .await?;
        item_change(&plan, item_id, impact)
    }

    pub async fn skip_item(
        &self,
        item_id: Uuid,
        expected_version: Option<i32>,
    ) -> Result<ItemChange, PlanError> {
        let code = self.code_for_item(item_id).await?;
        let (plan, impact) = self
            .mutate(&code, expected_version, "skip item", |plan, now| {
                tracker::skip_item(plan, item_id, now)
            })
            .await?;
        item_change(&plan, item_id, impact)
    }

    pub async fn complete_item_manually(
        &self,
        item_id: Uuid,
        on_date: NaiveDate,
        note: &str,
        expected_version: Option<i32>,
    ) -> Result<TreatmentPlan, PlanError> {
        let code = self.code_for_item(item_id).await?;
        let (plan, ()) = self
            .mutate(&code, expected_version, "complete item", |plan, now| {
                tracker::complete_item_manually(plan, item_id, on_date, note, now)
            })
            .await?;
        Ok(plan)
    }

    /// Apply an appointment status change reported by the booking side.
    pub async fn record_appointment(
        &self,
        event: &AppointmentEvent,
        expected_version: Option<i32>,
    ) -> Result<TreatmentPlan, PlanError> {
        let code = self.code_for_item(event.item_id).await?;
        let (plan, _) = self
            .mutate(&code, expected_version, "record appointment", |plan, now| {
                tracker::record_appointment(plan, event, now)
            })
            .await?;
        Ok(plan)
    }

    pub async fn release_phase(
        &self,
        code: &str,
        phase_number: i32,
        expected_version: Option<i32>,
    ) -> Result<TreatmentPlan, PlanError> {
        let (plan, ()) = self
            .mutate(code, expected_version, "release phase", |plan, _| {
                tracker::release_phase(plan, phase_number)
            })
            .await?;
        Ok(plan)
    }

    pub async fn cancel_plan(
        &self,
        code: &str,
        reason: &str,
        expected_version: Option<i32>,
    ) -> Result<TreatmentPlan, PlanError> {
        let (plan, ()) = self
            .mutate(code, expected_version, "cancel", |plan, now| {
                tracker::cancel_plan(plan, reason, now)
            })
            .await?;
        Ok(plan)
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Suggest slots for a plan or one of its phases. Read-only, so no lock
    /// is taken.
    pub async fn auto_schedule(
        &self,
        code: &str,
        scope: ScheduleScope,
        request: &ScheduleRequest,
        calendar: &dyn HolidayCalendar,
        availability: &dyn Availability,
        cancel: &CancellationToken,
    ) -> Result<ScheduleResult, PlanError> {
        let plan = self.store.load_plan(code).await?;
        AutoScheduler::new(calendar, availability)
            .suggest(&plan, scope, request, cancel)
            .await
    }

    /// Reserve a suggested slot and link the appointment to its item.
    ///
    /// A slot taken since the suggestion was made fails with
    /// [`PlanError::SlotConflict`]; run the scheduler again for a fresh one.
    pub async fn book_suggestion(
        &self,
        code: &str,
        suggestion: &Suggestion,
        gateway: &dyn BookingGateway,
        expected_version: Option<i32>,
    ) -> Result<Booking, PlanError> {
        let _guard = self.locks.lock(code).await;
        let mut plan = self.load_checked(code, expected_version).await?;
        let loaded_version = plan.version;

        ensure_bookable(&plan, suggestion.item_id)?;

        let appointment = gateway
            .confirm(suggestion.item_id, &suggestion.slot())
            .await
            .inspect_err(|err| {
                tracing::warn!(
                    plan_code = %code,
                    item_id = %suggestion.item_id,
                    error = %err,
                    "booking not confirmed"
                );
            })?;

        let event = AppointmentEvent {
            item_id: suggestion.item_id,
            appointment_id: appointment.appointment_id,
            doctor_id: appointment.doctor_id,
            starts_at: appointment.starts_at,
            status: AppointmentStatus::Booked,
            on_date: appointment.starts_at.date(),
        };
        tracker::record_appointment(&mut plan, &event, Utc::now())?;

        let plan = self.save_checked(&plan, loaded_version, "book").await.inspect_err(|err| {
            tracing::error!(
                plan_code = %code,
                appointment_id = %appointment.appointment_id,
                error = %err,
                "appointment reserved but plan not saved"
            );
        })?;
        Ok(Booking { appointment, plan })
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_plan(&self, code: &str) -> Result<TreatmentPlan, PlanError> {
        self.store.load_plan(code).await
    }

    pub async fn view(&self, code: &str, detail: bool) -> Result<PlanView, PlanError> {
        let view = PlanView::detail(self.store.load_plan(code).await?);
        Ok(if detail { view } else { view.into_summary() })
    }

    /// Summaries of every plan, newest first.
    pub async fn list_plans(&self) -> Result<Vec<PlanSummary>, PlanError> {
        Ok(self
            .store
            .list_plans()
            .await?
            .iter()
            .map(PlanSummary::from_detail)
            .collect())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn code_for_item(&self, item_id: Uuid) -> Result<String, PlanError> {
        self.store
            .plan_code_for_item(item_id)
            .await?
            .ok_or_else(|| PlanError::NotFound(format!("item {item_id}")))
    }

    async fn load_checked(
        &self,
        code: &str,
        expected_version: Option<i32>,
    ) -> Result<TreatmentPlan, PlanError> {
        let plan = self.store.load_plan(code).await?;
        match expected_version {
            Some(expected) if expected != plan.version => Err(PlanError::StaleState {
                code: code.to_owned(),
                expected,
                actual: plan.version,
            }),
            _ => Ok(plan),
        }
    }

    async fn save_checked(
        &self,
        plan: &TreatmentPlan,
        loaded_version: i32,
        op: &str,
    ) -> Result<TreatmentPlan, PlanError> {
        let violations = tracker::check_invariants(plan);
        if !violations.is_empty() {
            tracing::warn!(plan_code = %plan.code, ?violations, "plan invariants violated");
        }
        let saved = self.store.save_plan(plan, loaded_version).await?;
        tracing::info!(
            plan_code = %saved.code,
            op,
            version = saved.version,
            approval = %saved.approval_status,
            status = %status_label(saved.status),
            "plan updated"
        );
        Ok(saved)
    }

    /// Lock, load, check the caller's version, apply `change`, and save.
    async fn mutate<T, F>(
        &self,
        code: &str,
        expected_version: Option<i32>,
        op: &str,
        change: F,
    ) -> Result<(TreatmentPlan, T), PlanError>
    where
        F: FnOnce(&mut TreatmentPlan, DateTime<Utc>) -> Result<T, PlanError>,
    {
        let _guard = self.locks.lock(code).await;
        let mut plan = self.load_checked(code, expected_version).await?;
        let loaded_version = plan.version;

        let out = change(&mut plan, Utc::now())?;

        let saved = self.save_checked(&plan, loaded_version, op).await?;
        Ok((saved, out))
    }
}

fn item_change(
    plan: &TreatmentPlan,
    item_id: Uuid,
    financial_impact: FinancialImpact,
) -> Result<ItemChange, PlanError> {
    let item = plan
        .find_item(item_id)
        .cloned()
        .ok_or_else(|| PlanError::NotFound(format!("item {item_id}")))?;
    Ok(ItemChange {
        item,
        financial_impact,
        plan_version: plan.version,
    })
}

/// The plan is active and the item is ready for booking.
fn ensure_bookable(plan: &TreatmentPlan, item_id: Uuid) -> Result<(), PlanError> {
    let active = plan.approval_status == ApprovalStatus::Approved
        && matches!(
            plan.status,
            Some(PlanStatus::Pending | PlanStatus::InProgress)
        );
    if !active {
        return Err(PlanError::transition(
            format!("plan {}", plan.code),
            status_label(plan.status),
            "book",
        ));
    }

    let item = plan.find_item(item_id).ok_or_else(|| ValidationError::ForeignItem {
        item_id,
        code: plan.code.clone(),
    })?;
    match item.status {
        ItemStatus::ReadyForBooking => Ok(()),
        ItemStatus::WaitingForPrerequisite => Err(PlanError::PrerequisiteNotMet {
            item_id,
            prerequisite_item_id: item.prerequisite_item_id.unwrap_or_default(),
        }),
        other => Err(PlanError::transition(
            format!("item {item_id}"),
            other,
            ItemStatus::Scheduled,
        )),
    }
}
