//! Hand-built plans for unit tests.

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use careplan_db::models::{
    ApprovalStatus, Item, ItemStatus, PaymentType, Phase, TreatmentPlan,
};

use crate::approval::ApprovalWorkflow;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(h, min, 0).unwrap()
}

pub fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap()
}

pub fn item(seq: i32, price: i64) -> Item {
    Item {
        id: Uuid::new_v4(),
        phase_id: Uuid::nil(),
        sequence_number: seq,
        service_id: 10,
        item_name: format!("item {seq}"),
        price: Decimal::new(price, 0),
        estimated_time_minutes: 30,
        status: ItemStatus::Pending,
        prerequisite_item_id: None,
        spacing_days: None,
        default_doctor_id: None,
        completed_on: None,
        completion_note: None,
        linked_appointments: Vec::new(),
    }
}

pub fn phase(n: i32, mut items: Vec<Item>) -> Phase {
    let id = Uuid::new_v4();
    for item in &mut items {
        item.phase_id = id;
    }
    Phase {
        id,
        plan_id: Uuid::nil(),
        phase_number: n,
        name: format!("phase {n}"),
        description: None,
        estimated_duration_days: None,
        released: false,
        items,
    }
}

/// A draft plan owned by doctor 7 starting on Monday 2026-10-19.
pub fn plan_with(mut phases: Vec<Phase>) -> TreatmentPlan {
    let id = Uuid::new_v4();
    for phase in &mut phases {
        phase.plan_id = id;
    }
    let total: Decimal = phases
        .iter()
        .flat_map(|p| p.items.iter())
        .filter(|i| i.status != ItemStatus::Skipped)
        .map(|i| i.price)
        .sum();
    TreatmentPlan {
        id,
        code: "TP-20261016-TEST".to_owned(),
        name: "test plan".to_owned(),
        patient_id: 1,
        doctor_id: 7,
        approval_status: ApprovalStatus::Draft,
        status: None,
        start_date: date(2026, 10, 19),
        expected_end_date: None,
        total_cost: total,
        discount_amount: Decimal::ZERO,
        final_cost: total,
        payment_type: PaymentType::Full,
        notes: None,
        review_notes: None,
        version: 1,
        created_at: now(),
        submitted_at: None,
        reviewed_at: None,
        approved_at: None,
        completed_at: None,
        cancelled_at: None,
        cancellation_reason: None,
        phases,
    }
}

/// Submit and approve, which releases the first phase.
pub fn approved(mut plan: TreatmentPlan) -> TreatmentPlan {
    ApprovalWorkflow::submit(&mut plan, now()).unwrap();
    ApprovalWorkflow::approve(&mut plan, None, now()).unwrap();
    plan
}
