//! Approval workflow state machine.
//!
//! Governs plan activation. Every transition validates first and only
//! mutates the plan once all checks pass.

use chrono::{DateTime, Utc};

use careplan_db::models::{ApprovalStatus, PlanStatus, TreatmentPlan};

use crate::error::{PlanError, ValidationError};
use crate::{financial, status, tracker};

/// The plan approval state machine.
///
/// ```text
/// draft          -> pending_review  (submit)
/// pending_review -> approved        (approve)
/// pending_review -> rejected        (reject, note required)
/// rejected       -> draft           (reopen)
/// ```
///
/// Approved is terminal here; the plan then follows the item-completion
/// lifecycle.
pub struct ApprovalWorkflow;

impl ApprovalWorkflow {
    pub fn is_valid_transition(from: ApprovalStatus, to: ApprovalStatus) -> bool {
        matches!(
            (from, to),
            (ApprovalStatus::Draft, ApprovalStatus::PendingReview)
                | (ApprovalStatus::PendingReview, ApprovalStatus::Approved)
                | (ApprovalStatus::PendingReview, ApprovalStatus::Rejected)
                | (ApprovalStatus::Rejected, ApprovalStatus::Draft)
        )
    }

    fn check(plan: &TreatmentPlan, to: ApprovalStatus) -> Result<(), PlanError> {
        if status::is_withdrawn(plan) {
            return Err(PlanError::transition(
                format!("plan {}", plan.code),
                "withdrawn",
                to,
            ));
        }
        if Self::is_valid_transition(plan.approval_status, to) {
            Ok(())
        } else {
            Err(PlanError::transition(
                format!("plan {}", plan.code),
                plan.approval_status,
                to,
            ))
        }
    }

    /// Draft -> pending review.
    ///
    /// The plan needs at least one item, no negative prices, and a
    /// non-negative final cost.
    pub fn submit(plan: &mut TreatmentPlan, now: DateTime<Utc>) -> Result<(), PlanError> {
        Self::check(plan, ApprovalStatus::PendingReview)?;

        if plan.phases.is_empty() {
            return Err(ValidationError::NoPhases.into());
        }
        if plan.items().next().is_none() {
            return Err(ValidationError::NoItems.into());
        }
        let totals = financial::recompute(&plan.phases, plan.discount_amount)?;

        plan.total_cost = totals.total_cost;
        plan.final_cost = totals.final_cost;
        plan.approval_status = ApprovalStatus::PendingReview;
        plan.submitted_at = Some(now);
        Ok(())
    }

    /// Pending review -> approved. Activates the plan and releases its first
    /// phase for booking.
    pub fn approve(
        plan: &mut TreatmentPlan,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), PlanError> {
        Self::check(plan, ApprovalStatus::Approved)?;

        plan.approval_status = ApprovalStatus::Approved;
        if plan.status.is_none() {
            plan.status = Some(PlanStatus::Pending);
        }
        plan.reviewed_at = Some(now);
        plan.approved_at = Some(now);
        if let Some(notes) = notes.map(str::trim).filter(|n| !n.is_empty()) {
            plan.review_notes = Some(notes.to_owned());
        }

        tracker::release_available_phases(plan);
        tracker::refresh_plan_status(plan, now);
        Ok(())
    }

    /// Pending review -> rejected. The plan stays not activated.
    pub fn reject(
        plan: &mut TreatmentPlan,
        notes: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PlanError> {
        Self::check(plan, ApprovalStatus::Rejected)?;

        let notes = notes.trim();
        if notes.is_empty() {
            return Err(ValidationError::MissingRejectionNote.into());
        }

        plan.approval_status = ApprovalStatus::Rejected;
        plan.status = None;
        plan.reviewed_at = Some(now);
        plan.review_notes = Some(notes.to_owned());
        Ok(())
    }

    /// Rejected -> draft, making the plan editable again.
    pub fn reopen(plan: &mut TreatmentPlan) -> Result<(), PlanError> {
        Self::check(plan, ApprovalStatus::Draft)?;

        plan.approval_status = ApprovalStatus::Draft;
        plan.review_notes = None;
        plan.submitted_at = None;
        plan.reviewed_at = None;
        Ok(())
    }
}
