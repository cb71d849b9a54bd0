//! Status derivation for items, phases, and plans.
//!
//! Every function here is pure: it reads stored state and linked
//! appointments and never mutates. Calling them repeatedly on the same plan
//! yields the same answer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use careplan_db::models::{
    AppointmentStatus, ApprovalStatus, Item, ItemStatus, Phase, PhaseStatus, PlanStatus,
    TreatmentPlan,
};

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Display status of an item.
///
/// `prerequisite` is the stored status of the item this one depends on, if
/// it has one. A skipped prerequisite counts as satisfied. Rules are applied
/// in order and the first match wins:
///
/// 1. stored completed or skipped stays as is
/// 2. any appointment done -> completed
/// 3. unsatisfied prerequisite -> waiting for prerequisite
/// 4. any appointment checked in -> in progress
/// 5. any appointment booked -> scheduled
/// 6. released (stored status past pending) -> ready for booking
/// 7. otherwise pending
pub fn derive_item_status(item: &Item, prerequisite: Option<ItemStatus>) -> ItemStatus {
    if item.status.is_closed() {
        return item.status;
    }

    let has = |status: AppointmentStatus| {
        item.linked_appointments
            .iter()
            .any(|appt| appt.status == status)
    };

    if has(AppointmentStatus::Done) {
        return ItemStatus::Completed;
    }
    if item.prerequisite_item_id.is_some() && !prerequisite.is_some_and(ItemStatus::is_closed) {
        return ItemStatus::WaitingForPrerequisite;
    }
    if has(AppointmentStatus::CheckedIn) {
        return ItemStatus::InProgress;
    }
    if has(AppointmentStatus::Booked) {
        return ItemStatus::Scheduled;
    }
    if item.status != ItemStatus::Pending {
        return ItemStatus::ReadyForBooking;
    }
    ItemStatus::Pending
}

/// Display status of an item, looking its prerequisite up in the plan.
pub fn item_display_status(plan: &TreatmentPlan, item: &Item) -> ItemStatus {
    let prerequisite = item
        .prerequisite_item_id
        .and_then(|id| plan.find_item(id))
        .map(|p| p.status);
    derive_item_status(item, prerequisite)
}

// ---------------------------------------------------------------------------
// Phases and plans
// ---------------------------------------------------------------------------

/// Aggregate status of a phase from its items' display statuses.
///
/// An empty phase is pending.
pub fn derive_phase_status(items: &[ItemStatus]) -> PhaseStatus {
    if !items.is_empty() && items.iter().all(|s| s.is_closed()) {
        PhaseStatus::Completed
    } else if items
        .iter()
        .any(|s| matches!(s, ItemStatus::Scheduled | ItemStatus::InProgress))
    {
        PhaseStatus::InProgress
    } else {
        PhaseStatus::Pending
    }
}

pub fn phase_status(plan: &TreatmentPlan, phase: &Phase) -> PhaseStatus {
    let items: Vec<ItemStatus> = phase
        .items
        .iter()
        .map(|item| item_display_status(plan, item))
        .collect();
    derive_phase_status(&items)
}

/// Aggregate status of a plan.
///
/// Returns `None` unless the plan is approved: draft, under-review, and
/// rejected plans are not activated and have no execution status. A stored
/// cancellation is kept as is.
pub fn derive_plan_status(
    approval: ApprovalStatus,
    stored: Option<PlanStatus>,
    phases: &[PhaseStatus],
    any_item_scheduled: bool,
) -> Option<PlanStatus> {
    if approval != ApprovalStatus::Approved {
        return None;
    }
    if stored == Some(PlanStatus::Cancelled) {
        return Some(PlanStatus::Cancelled);
    }
    if !phases.is_empty() && phases.iter().all(|s| *s == PhaseStatus::Completed) {
        Some(PlanStatus::Completed)
    } else if any_item_scheduled || phases.contains(&PhaseStatus::InProgress) {
        Some(PlanStatus::InProgress)
    } else {
        Some(PlanStatus::Pending)
    }
}

/// Cancelled before approval. The plan keeps a null status and accepts no
/// further changes.
pub fn is_withdrawn(plan: &TreatmentPlan) -> bool {
    plan.approval_status != ApprovalStatus::Approved && plan.cancelled_at.is_some()
}

/// Plan status from its phases. Empty phases have nothing to finish and are
/// left out, so they never hold the plan back from completing.
pub fn plan_status(plan: &TreatmentPlan) -> Option<PlanStatus> {
    let phases: Vec<PhaseStatus> = plan
        .phases
        .iter()
        .filter(|p| !p.items.is_empty())
        .map(|p| phase_status(plan, p))
        .collect();
    let any_scheduled = plan
        .items()
        .any(|item| item_display_status(plan, item) == ItemStatus::Scheduled);
    derive_plan_status(plan.approval_status, plan.status, &phases, any_scheduled)
}

// ---------------------------------------------------------------------------
// Progress counts
// ---------------------------------------------------------------------------

/// Number of items in each display status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemProgress {
    pub pending: usize,
    pub waiting_for_prerequisite: usize,
    pub ready_for_booking: usize,
    pub scheduled: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub skipped: usize,
}

impl ItemProgress {
    pub fn from_plan(plan: &TreatmentPlan) -> Self {
        let mut progress = Self::default();
        for item in plan.items() {
            progress.add(item_display_status(plan, item));
        }
        progress
    }

    fn add(&mut self, status: ItemStatus) {
        let slot = match status {
            ItemStatus::Pending => &mut self.pending,
            ItemStatus::WaitingForPrerequisite => &mut self.waiting_for_prerequisite,
            ItemStatus::ReadyForBooking => &mut self.ready_for_booking,
            ItemStatus::Scheduled => &mut self.scheduled,
            ItemStatus::InProgress => &mut self.in_progress,
            ItemStatus::Completed => &mut self.completed,
            ItemStatus::Skipped => &mut self.skipped,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        self.pending
            + self.waiting_for_prerequisite
            + self.ready_for_booking
            + self.scheduled
            + self.in_progress
            + self.completed
            + self.skipped
    }

    /// Completed plus skipped.
    pub fn closed(&self) -> usize {
        self.completed + self.skipped
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// A plan as shown to callers: either the full aggregate or a summary.
///
/// Plan status is only ever computed from phase and item data, so a summary
/// can only be produced from a detail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum PlanView {
    Summary(PlanSummary),
    Detail(Box<TreatmentPlan>),
}

impl PlanView {
    pub fn detail(plan: TreatmentPlan) -> Self {
        Self::Detail(Box::new(plan))
    }

    pub fn status(&self) -> Option<PlanStatus> {
        match self {
            Self::Summary(summary) => summary.status,
            Self::Detail(plan) => plan_status(plan),
        }
    }

    /// Collapse a detail view into a summary. Summaries are returned as is.
    pub fn into_summary(self) -> Self {
        match self {
            Self::Detail(plan) => Self::Summary(PlanSummary::from_detail(&plan)),
            summary => summary,
        }
    }
}

/// Headline figures of a plan, captured from its full data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    code: String,
    name: String,
    patient_id: i64,
    doctor_id: i64,
    approval_status: ApprovalStatus,
    status: Option<PlanStatus>,
    final_cost: Decimal,
    version: i32,
    withdrawn: bool,
    progress: ItemProgress,
}

impl PlanSummary {
    pub fn from_detail(plan: &TreatmentPlan) -> Self {
        Self {
            code: plan.code.clone(),
            name: plan.name.clone(),
            patient_id: plan.patient_id,
            doctor_id: plan.doctor_id,
            approval_status: plan.approval_status,
            status: plan_status(plan),
            final_cost: plan.final_cost,
            version: plan.version,
            withdrawn: is_withdrawn(plan),
            progress: ItemProgress::from_plan(plan),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn patient_id(&self) -> i64 {
        self.patient_id
    }

    pub fn doctor_id(&self) -> i64 {
        self.doctor_id
    }

    pub fn approval_status(&self) -> ApprovalStatus {
        self.approval_status
    }

    pub fn status(&self) -> Option<PlanStatus> {
        self.status
    }

    pub fn final_cost(&self) -> Decimal {
        self.final_cost
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn withdrawn(&self) -> bool {
        self.withdrawn
    }

    pub fn progress(&self) -> ItemProgress {
        self.progress
    }
}
