//! Integration tests for the plan lifecycle over the in-memory adapters.
//!
//! create -> submit -> approve -> schedule -> book -> complete, plus the
//! rejection and validation paths.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Weekday};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use careplan_core::availability::{Resource, RosterAvailability};
use careplan_core::booking::InMemoryBookingLedger;
use careplan_core::calendar::StaticHolidayCalendar;
use careplan_core::plan::{CustomPlanRequest, ItemTemplate, PhaseRequest};
use careplan_core::scheduler::{ScheduleRequest, ScheduleScope};
use careplan_core::service::PlanService;
use careplan_core::status::{PlanView, phase_status};
use careplan_core::store::{InMemoryPlanStore, PlanStore};
use careplan_core::tracker::{AppointmentEvent, ItemUpdate};
use careplan_core::{PlanError, ValidationError};
use careplan_db::models::{
    AppointmentStatus, ApprovalStatus, ItemStatus, PaymentType, PhaseStatus, PlanStatus,
    TreatmentPlan,
};
use uuid::Uuid;

// ===========================================================================
// Fixtures
// ===========================================================================

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn template(seq: i32, service_id: i64, name: &str, price: i64) -> ItemTemplate {
    ItemTemplate {
        sequence_number: seq,
        service_id,
        item_name: name.to_owned(),
        price: Decimal::new(price, 0),
        estimated_time_minutes: 30,
        quantity: 1,
        key: None,
        prerequisite: None,
        spacing_days: None,
        default_doctor_id: None,
    }
}

/// Two phases: an exam and five cleanings, then an implant and a crown that
/// needs the implant. Eight trackable items in total.
fn restoration_request() -> CustomPlanRequest {
    let mut cleanings = template(2, 101, "Cleaning", 80);
    cleanings.quantity = 5;

    let mut implant = template(1, 200, "Implant", 1000);
    implant.key = Some("implant".into());

    let mut crown = template(2, 201, "Crown", 600);
    crown.prerequisite = Some("implant".into());
    crown.spacing_days = Some(7);

    CustomPlanRequest {
        plan_name: "Restoration".into(),
        patient_id: 42,
        doctor_id: 7,
        discount_amount: Decimal::new(50, 0),
        payment_type: PaymentType::Phased,
        start_date: date(2026, 10, 19),
        expected_end_date: None,
        notes: None,
        phases: vec![
            PhaseRequest {
                phase_number: 1,
                name: "Preparation".into(),
                description: None,
                estimated_duration_days: Some(14),
                items: vec![template(1, 100, "Exam", 50), cleanings],
            },
            PhaseRequest {
                phase_number: 2,
                name: "Restoration".into(),
                description: None,
                estimated_duration_days: None,
                items: vec![implant, crown],
            },
        ],
    }
}

fn clinic_roster() -> RosterAvailability {
    RosterAvailability::new()
        .with_weekly_hours(
            Resource::Doctor(7),
            &[
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        )
        .with_services(7, &[100, 101, 200, 201])
}

/// Reports the first `collisions` inserts as taken codes and records every
/// code it was offered.
struct CollidingStore {
    inner: InMemoryPlanStore,
    collisions: AtomicUsize,
    offered: Mutex<Vec<String>>,
}

impl CollidingStore {
    fn new(collisions: usize) -> Self {
        Self {
            inner: InMemoryPlanStore::new(),
            collisions: AtomicUsize::new(collisions),
            offered: Mutex::new(Vec::new()),
        }
    }

    fn offered(&self) -> Vec<String> {
        self.offered.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlanStore for CollidingStore {
    async fn insert_plan(&self, plan: &TreatmentPlan) -> Result<(), PlanError> {
        self.offered.lock().unwrap().push(plan.code.clone());
        let remaining = self.collisions.load(Ordering::SeqCst);
        if remaining > 0 {
            self.collisions.store(remaining - 1, Ordering::SeqCst);
            return Err(PlanError::DuplicateCode(plan.code.clone()));
        }
        self.inner.insert_plan(plan).await
    }

    async fn load_plan(&self, code: &str) -> Result<TreatmentPlan, PlanError> {
        self.inner.load_plan(code).await
    }

    async fn save_plan(
        &self,
        plan: &TreatmentPlan,
        expected_version: i32,
    ) -> Result<TreatmentPlan, PlanError> {
        self.inner.save_plan(plan, expected_version).await
    }

    async fn plan_code_for_item(&self, item_id: Uuid) -> Result<Option<String>, PlanError> {
        self.inner.plan_code_for_item(item_id).await
    }

    async fn list_plans(&self) -> Result<Vec<TreatmentPlan>, PlanError> {
        self.inner.list_plans().await
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn full_lifecycle_through_completion() {
    let service = PlanService::new(InMemoryPlanStore::new());

    let plan = service.create_custom_plan(&restoration_request()).await.unwrap();
    let code = plan.code.clone();
    assert_eq!(plan.items().count(), 8);
    assert_eq!(plan.total_cost, Decimal::new(2050, 0));
    assert_eq!(plan.final_cost, Decimal::new(2000, 0));
    assert_eq!(plan.status, None);
    assert_eq!(plan.version, 1);

    let plan = service.submit_for_review(&code, Some(1)).await.unwrap();
    assert_eq!(plan.approval_status, ApprovalStatus::PendingReview);
    assert_eq!(plan.status, None);

    let plan = service.approve(&code, Some("approved"), None).await.unwrap();
    assert_eq!(plan.status, Some(PlanStatus::Pending));
    assert!(plan.phases[0].items.iter().all(|i| i.status == ItemStatus::ReadyForBooking));
    assert!(plan.phases[1].items.iter().all(|i| i.status == ItemStatus::Pending));

    // Schedule and book the first phase.
    let calendar = StaticHolidayCalendar::weekends_closed();
    let roster = clinic_roster();
    let result = service
        .auto_schedule(
            &code,
            ScheduleScope::Phase(1),
            &ScheduleRequest::default(),
            &calendar,
            &roster,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.summary.successful_suggestions, 6);
    assert_eq!(result.summary.failed_items, 0);

    let ledger = InMemoryBookingLedger::new();
    let mut bookings = Vec::new();
    for suggestion in result.suggestions() {
        let booking = service
            .book_suggestion(&code, suggestion, &ledger, None)
            .await
            .unwrap();
        bookings.push((suggestion.item_id, booking.appointment));
    }
    let plan = service.get_plan(&code).await.unwrap();
    assert_eq!(plan.status, Some(PlanStatus::InProgress));
    assert!(plan.phases[0].items.iter().all(|i| i.status == ItemStatus::Scheduled));

    // Every appointment is attended.
    for (item_id, appointment) in &bookings {
        service
            .record_appointment(
                &AppointmentEvent {
                    item_id: *item_id,
                    appointment_id: appointment.appointment_id,
                    doctor_id: appointment.doctor_id,
                    starts_at: appointment.starts_at,
                    status: AppointmentStatus::Done,
                    on_date: appointment.starts_at.date(),
                },
                None,
            )
            .await
            .unwrap();
    }

    let plan = service.get_plan(&code).await.unwrap();
    assert_eq!(phase_status(&plan, &plan.phases[0]), PhaseStatus::Completed);
    assert!(plan.phases[1].released);
    let implant = plan.phases[1].items[0].clone();
    let crown = plan.phases[1].items[1].clone();
    assert_eq!(implant.status, ItemStatus::ReadyForBooking);
    assert_eq!(crown.status, ItemStatus::WaitingForPrerequisite);

    // The crown cannot be booked before the implant is done.
    let early = service
        .auto_schedule(
            &code,
            ScheduleScope::Phase(2),
            &ScheduleRequest::default(),
            &calendar,
            &roster,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(early.summary.successful_suggestions, 1);
    assert_eq!(early.summary.skipped_items, 1);
    let implant_slot = early.suggestion_for(implant.id).unwrap().clone();

    let mut crown_attempt = implant_slot.clone();
    crown_attempt.item_id = crown.id;
    let err = service
        .book_suggestion(&code, &crown_attempt, &ledger, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::PrerequisiteNotMet { .. }));

    service
        .complete_item_manually(implant.id, date(2026, 11, 2), "placed at partner clinic", None)
        .await
        .unwrap();
    let plan = service.get_plan(&code).await.unwrap();
    assert_eq!(
        plan.find_item(crown.id).unwrap().status,
        ItemStatus::ReadyForBooking
    );

    let change = service.skip_item(crown.id, None).await.unwrap();
    assert_eq!(change.item.status, ItemStatus::Skipped);
    assert_eq!(change.financial_impact.new_total_cost, Decimal::new(1450, 0));
    assert_eq!(change.financial_impact.new_final_cost, Decimal::new(1400, 0));
    assert_eq!(change.financial_impact.describe(), "plan cost decreased by 600.00");

    let plan = service.get_plan(&code).await.unwrap();
    assert_eq!(plan.status, Some(PlanStatus::Completed));
    assert!(plan.completed_at.is_some());
    assert_eq!(plan.version, change.plan_version);
}

#[tokio::test]
async fn skipping_recomputes_totals() {
    let service = PlanService::new(InMemoryPlanStore::new());
    let mut request = restoration_request();
    request.discount_amount = Decimal::ZERO;
    request.phases = vec![PhaseRequest {
        phase_number: 1,
        name: "Only".into(),
        description: None,
        estimated_duration_days: None,
        items: vec![template(1, 100, "A", 100), template(2, 100, "B", 200)],
    }];

    let plan = service.create_custom_plan(&request).await.unwrap();
    assert_eq!(plan.total_cost, Decimal::new(300, 0));
    assert_eq!(plan.final_cost, Decimal::new(300, 0));

    let second = plan.phases[0].items[1].id;
    let change = service.skip_item(second, None).await.unwrap();
    assert_eq!(change.financial_impact.new_total_cost, Decimal::new(100, 0));
    let plan = service.get_plan(&plan.code).await.unwrap();
    assert_eq!(plan.total_cost, Decimal::new(100, 0));
    assert_eq!(plan.final_cost, plan.total_cost - plan.discount_amount);
}

#[tokio::test]
async fn submit_without_phases_is_a_validation_error() {
    let service = PlanService::new(InMemoryPlanStore::new());
    let mut request = restoration_request();
    request.phases.clear();
    request.discount_amount = Decimal::ZERO;

    let plan = service.create_custom_plan(&request).await.unwrap();
    let err = service.submit_for_review(&plan.code, None).await.unwrap_err();
    assert!(matches!(err, PlanError::Validation(ValidationError::NoPhases)));

    let stored = service.get_plan(&plan.code).await.unwrap();
    assert_eq!(stored.approval_status, ApprovalStatus::Draft);
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn approve_after_reject_is_refused() {
    let service = PlanService::new(InMemoryPlanStore::new());
    let plan = service.create_custom_plan(&restoration_request()).await.unwrap();
    let code = plan.code;

    service.submit_for_review(&code, None).await.unwrap();
    let rejected = service.reject(&code, "too expensive", None).await.unwrap();
    assert_eq!(rejected.status, None);

    let err = service.approve(&code, None, None).await.unwrap_err();
    assert!(matches!(err, PlanError::InvalidStateTransition { .. }));

    let stored = service.get_plan(&code).await.unwrap();
    assert_eq!(stored.approval_status, ApprovalStatus::Rejected);
    assert_eq!(stored.version, rejected.version);

    // Reopen, edit, and resubmit.
    service.reopen(&code, None).await.unwrap();
    let exam = stored.phases[0].items[0].id;
    let change = service
        .update_item(
            exam,
            &ItemUpdate {
                price: Some(Decimal::new(40, 0)),
                ..ItemUpdate::default()
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(change.financial_impact.price_change, Decimal::new(-10, 0));
    let resubmitted = service.submit_for_review(&code, None).await.unwrap();
    assert_eq!(resubmitted.approval_status, ApprovalStatus::PendingReview);
}

#[tokio::test]
async fn cancelling_active_and_unapproved_plans() {
    let service = PlanService::new(InMemoryPlanStore::new());
    let draft = service.create_custom_plan(&restoration_request()).await.unwrap();
    service.submit_for_review(&draft.code, None).await.unwrap();
    let withdrawn = service.cancel_plan(&draft.code, "patient declined", None).await.unwrap();
    assert_eq!(withdrawn.status, None);
    assert!(withdrawn.cancelled_at.is_some());
    let err = service.approve(&draft.code, None, None).await.unwrap_err();
    assert!(matches!(err, PlanError::InvalidStateTransition { .. }));
    match service.view(&draft.code, false).await.unwrap() {
        PlanView::Summary(summary) => assert!(summary.withdrawn()),
        other => panic!("expected summary, got {other:?}"),
    }

    let plan = service.create_custom_plan(&restoration_request()).await.unwrap();
    let code = plan.code;
    service.submit_for_review(&code, None).await.unwrap();
    service.approve(&code, None, None).await.unwrap();
    let cancelled = service.cancel_plan(&code, "patient moved", None).await.unwrap();
    assert_eq!(cancelled.status, Some(PlanStatus::Cancelled));
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("patient moved"));

    let err = service
        .auto_schedule(
            &code,
            ScheduleScope::Plan,
            &ScheduleRequest::default(),
            &StaticHolidayCalendar::new(),
            &clinic_roster(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn views_and_listing() {
    let service = PlanService::new(InMemoryPlanStore::new());
    let plan = service.create_custom_plan(&restoration_request()).await.unwrap();

    match service.view(&plan.code, false).await.unwrap() {
        PlanView::Summary(summary) => {
            assert_eq!(summary.code(), plan.code);
            assert_eq!(summary.status(), None);
            assert_eq!(summary.progress().total(), 8);
        }
        other => panic!("expected summary, got {other:?}"),
    }
    assert!(matches!(
        service.view(&plan.code, true).await.unwrap(),
        PlanView::Detail(_)
    ));

    let listed = service.list_plans().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].final_cost(), Decimal::new(2000, 0));

    assert!(matches!(
        service.get_plan("TP-MISSING").await,
        Err(PlanError::NotFound(_))
    ));
}

#[tokio::test]
async fn plan_with_an_empty_phase_still_completes() {
    let mut request = restoration_request();
    request.discount_amount = Decimal::ZERO;
    request.phases.truncate(1);
    request.phases[0].items.truncate(1);
    request.phases.push(PhaseRequest {
        phase_number: 2,
        name: "Follow-up".into(),
        description: None,
        estimated_duration_days: None,
        items: vec![],
    });

    let service = PlanService::new(InMemoryPlanStore::new());
    let plan = service.create_custom_plan(&request).await.unwrap();
    service.submit_for_review(&plan.code, None).await.unwrap();
    service.approve(&plan.code, None, None).await.unwrap();

    let exam = plan.phases[0].items[0].id;
    let done = service
        .complete_item_manually(exam, date(2026, 10, 19), "seen as walk-in", None)
        .await
        .unwrap();
    assert_eq!(done.status, Some(PlanStatus::Completed));
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn taken_plan_code_is_regenerated() {
    let service = PlanService::new(CollidingStore::new(2));
    let plan = service.create_custom_plan(&restoration_request()).await.unwrap();

    let offered = service.store().offered();
    assert_eq!(offered.len(), 3);
    assert_eq!(offered[2], plan.code);
    assert_ne!(offered[0], offered[2]);
    assert_eq!(service.get_plan(&plan.code).await.unwrap().id, plan.id);
}

#[tokio::test]
async fn persistent_code_collisions_are_reported() {
    let service = PlanService::new(CollidingStore::new(usize::MAX));
    let err = service
        .create_custom_plan(&restoration_request())
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::DuplicateCode(_)));
    assert_eq!(service.store().offered().len(), 5);
}
