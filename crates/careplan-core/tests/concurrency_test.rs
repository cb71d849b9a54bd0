//! Concurrent edits and bookings against shared in-memory adapters.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Weekday};
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use careplan_core::PlanError;
use careplan_core::availability::{Resource, RosterAvailability};
use careplan_core::booking::{BookingGateway, InMemoryBookingLedger};
use careplan_core::calendar::StaticHolidayCalendar;
use careplan_core::plan::{CustomPlanRequest, ItemTemplate, PhaseRequest};
use careplan_core::scheduler::{ScheduleRequest, ScheduleScope};
use careplan_core::service::PlanService;
use careplan_core::store::InMemoryPlanStore;
use careplan_core::tracker::ItemUpdate;
use careplan_db::models::{PaymentType, TreatmentPlan};

fn request(patient_id: i64) -> CustomPlanRequest {
    CustomPlanRequest {
        plan_name: format!("plan for {patient_id}"),
        patient_id,
        doctor_id: 7,
        discount_amount: Decimal::ZERO,
        payment_type: PaymentType::Full,
        start_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
        expected_end_date: None,
        notes: None,
        phases: vec![PhaseRequest {
            phase_number: 1,
            name: "Treatment".into(),
            description: None,
            estimated_duration_days: None,
            items: vec![
                ItemTemplate {
                    sequence_number: 1,
                    service_id: 10,
                    item_name: "Consultation".into(),
                    price: Decimal::new(100, 0),
                    estimated_time_minutes: 30,
                    quantity: 1,
                    key: None,
                    prerequisite: None,
                    spacing_days: None,
                    default_doctor_id: None,
                },
                ItemTemplate {
                    sequence_number: 2,
                    service_id: 10,
                    item_name: "Follow-up".into(),
                    price: Decimal::new(200, 0),
                    estimated_time_minutes: 30,
                    quantity: 1,
                    key: None,
                    prerequisite: None,
                    spacing_days: None,
                    default_doctor_id: None,
                },
            ],
        }],
    }
}

fn roster() -> RosterAvailability {
    RosterAvailability::new()
        .with_hours(
            Resource::Doctor(7),
            Weekday::Mon,
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        )
        .with_services(7, &[10])
}

async fn approved_plan(service: &PlanService<InMemoryPlanStore>, patient_id: i64) -> TreatmentPlan {
    let plan = service.create_custom_plan(&request(patient_id)).await.unwrap();
    service.submit_for_review(&plan.code, None).await.unwrap();
    service.approve(&plan.code, None, None).await.unwrap()
}

#[tokio::test]
async fn concurrent_item_updates_with_same_version_one_goes_stale() {
    let service = Arc::new(PlanService::new(InMemoryPlanStore::new()));
    let plan = service.create_custom_plan(&request(1)).await.unwrap();
    let item_id = plan.phases[0].items[0].id;
    let read_version = plan.version;

    let handles: Vec<_> = [150, 175]
        .into_iter()
        .map(|price| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .update_item(
                        item_id,
                        &ItemUpdate {
                            price: Some(Decimal::new(price, 0)),
                            ..ItemUpdate::default()
                        },
                        Some(read_version),
                    )
                    .await
            })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let stale = results
        .iter()
        .filter(|r| matches!(r, Err(PlanError::StaleState { .. })))
        .count();
    assert_eq!((ok, stale), (1, 1));

    let stored = service.get_plan(&plan.code).await.unwrap();
    assert_eq!(stored.version, read_version + 1);
    assert_eq!(stored.final_cost, stored.total_cost - stored.discount_amount);
}

#[tokio::test]
async fn concurrent_updates_without_version_serialize() {
    let service = Arc::new(PlanService::new(InMemoryPlanStore::new()));
    let plan = service.create_custom_plan(&request(1)).await.unwrap();
    let items: Vec<_> = plan.phases[0].items.iter().map(|i| i.id).collect();

    let handles: Vec<_> = items
        .iter()
        .map(|item_id| {
            let service = Arc::clone(&service);
            let item_id = *item_id;
            tokio::spawn(async move {
                service
                    .update_item(
                        item_id,
                        &ItemUpdate {
                            price: Some(Decimal::new(10, 0)),
                            ..ItemUpdate::default()
                        },
                        None,
                    )
                    .await
            })
        })
        .collect();
    for joined in join_all(handles).await {
        joined.unwrap().unwrap();
    }

    // Neither edit was lost.
    let stored = service.get_plan(&plan.code).await.unwrap();
    assert_eq!(stored.version, 3);
    assert_eq!(stored.total_cost, Decimal::new(20, 0));
}

#[tokio::test]
async fn racing_bookings_for_one_slot_produce_one_conflict() {
    let service = PlanService::new(InMemoryPlanStore::new());
    let first = approved_plan(&service, 1).await;
    let second = approved_plan(&service, 2).await;

    let calendar = StaticHolidayCalendar::new();
    let roster = roster();
    let mut suggestions = Vec::new();
    for plan in [&first, &second] {
        let result = service
            .auto_schedule(
                &plan.code,
                ScheduleScope::Plan,
                &ScheduleRequest::default(),
                &calendar,
                &roster,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        suggestions.push((plan.code.clone(), result.suggestions().next().unwrap().clone()));
    }
    // Both plans were offered the same slot.
    assert_eq!(suggestions[0].1.starts_at, suggestions[1].1.starts_at);

    let ledger = InMemoryBookingLedger::new();
    let results = join_all(
        suggestions
            .iter()
            .map(|(code, s)| service.book_suggestion(code, s, &ledger, None)),
    )
    .await;

    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(PlanError::SlotConflict { doctor_id: 7, .. })))
        .count();
    assert_eq!(conflicts, 1);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| r.as_ref().is_err_and(PlanError::is_retryable)));

    // The loser re-suggests against the updated calendar and books.
    let loser = results.iter().position(|r| r.is_err()).unwrap();
    let mut refreshed = roster.clone();
    for (_, slot) in ledger.bookings() {
        refreshed.add_booked(Resource::Doctor(slot.doctor_id), slot.starts_at, slot.ends_at);
    }
    let retry = service
        .auto_schedule(
            &suggestions[loser].0,
            ScheduleScope::Plan,
            &ScheduleRequest::default(),
            &calendar,
            &refreshed,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    let fresh = retry.suggestions().next().unwrap();
    assert_ne!(fresh.starts_at, suggestions[loser].1.starts_at);
    service
        .book_suggestion(&suggestions[loser].0, fresh, &ledger, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn ledger_admits_one_of_many_identical_requests() {
    let ledger = Arc::new(InMemoryBookingLedger::new());
    let slot = careplan_core::booking::Slot {
        doctor_id: 3,
        room_id: Some(1),
        starts_at: NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap(),
        ends_at: NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(10, 45, 0)
            .unwrap(),
    };

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.confirm(uuid::Uuid::new_v4(), &slot).await })
        })
        .collect();
    let confirmed = join_all(handles)
        .await
        .into_iter()
        .filter(|joined| joined.as_ref().is_ok_and(|r| r.is_ok()))
        .count();
    assert_eq!(confirmed, 1);
    assert_eq!(ledger.bookings().len(), 1);
}
