//! Error taxonomy for plan operations.
//!
//! [`ValidationError`] covers malformed input and is always raised before
//! any mutation. [`PlanError`] wraps it together with workflow, concurrency,
//! and storage failures.

use std::fmt;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use careplan_db::models::PlanStatus;

/// Input rejected before any state change.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("plan name must not be empty")]
    EmptyPlanName,

    #[error("discount amount must not be negative (got {0})")]
    NegativeDiscount(Decimal),

    #[error("duplicate phase number {0}")]
    DuplicatePhaseNumber(i32),

    #[error("phase numbers must be contiguous from 1 (expected {expected}, found {found})")]
    NonContiguousPhaseNumbers { expected: i32, found: i32 },

    #[error("duplicate sequence number {sequence_number} in phase {phase_number}")]
    DuplicateSequenceNumber {
        phase_number: i32,
        sequence_number: i32,
    },

    #[error("item {item:?} has quantity {quantity} (must be between 1 and 100)")]
    InvalidQuantity { item: String, quantity: i32 },

    #[error("item {item:?} has negative price {price}")]
    NegativePrice { item: String, price: Decimal },

    #[error("item {item:?} has estimated time {minutes} minutes (must be greater than zero)")]
    InvalidEstimatedTime { item: String, minutes: i32 },

    #[error("item {item:?} has negative spacing of {days} days")]
    NegativeSpacing { item: String, days: i32 },

    #[error("duplicate item key {0:?}")]
    DuplicateItemKey(String),

    #[error("item {item:?} names unknown prerequisite {prerequisite:?}")]
    UnknownPrerequisite { item: String, prerequisite: String },

    #[error("prerequisite cycle detected involving items: {0}")]
    CyclicPrerequisite(String),

    #[error("item {item:?} depends on {prerequisite:?}, which comes later in the plan")]
    ForwardPrerequisite { item: String, prerequisite: String },

    #[error(
        "item {item:?} depends on {prerequisite:?}, which expands into {quantity} separate items"
    )]
    AmbiguousPrerequisite {
        item: String,
        prerequisite: String,
        quantity: i32,
    },

    #[error("plan total exceeds the largest representable amount")]
    CostOverflow,

    #[error("final cost would be negative ({0})")]
    NegativeFinalCost(Decimal),

    #[error("plan has no phases")]
    NoPhases,

    #[error("plan has no items")]
    NoItems,

    #[error("unknown phase {0}")]
    UnknownPhase(i32),

    #[error("item name must not be empty")]
    EmptyItemName,

    #[error("update changes nothing")]
    EmptyUpdate,

    #[error("rejection requires a non-empty note")]
    MissingRejectionNote,

    #[error("manual completion requires a non-empty note")]
    MissingCompletionNote,

    #[error("cancellation requires a non-empty reason")]
    MissingCancellationReason,

    #[error("item {item_id} does not belong to plan {code}")]
    ForeignItem { item_id: Uuid, code: String },
}

/// Failure of a plan operation.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid state transition for {entity}: {from} -> {to}")]
    InvalidStateTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("plan {code} changed concurrently (expected version {expected}, found {actual})")]
    StaleState {
        code: String,
        expected: i32,
        actual: i32,
    },

    #[error("slot for doctor {doctor_id} at {starts_at} is already taken")]
    SlotConflict {
        doctor_id: i64,
        starts_at: NaiveDateTime,
    },

    #[error("item {item_id} is waiting for prerequisite {prerequisite_item_id}")]
    PrerequisiteNotMet {
        item_id: Uuid,
        prerequisite_item_id: Uuid,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("plan code {0} is already taken")]
    DuplicateCode(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl PlanError {
    /// Whether the caller may reload (or re-suggest) and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleState { .. } | Self::SlotConflict { .. })
    }

    pub(crate) fn transition(
        entity: impl Into<String>,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        Self::InvalidStateTransition {
            entity: entity.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Render a nullable plan status for error messages and CLI output.
pub fn status_label(status: Option<PlanStatus>) -> String {
    match status {
        Some(s) => s.to_string(),
        None => "not_activated".to_owned(),
    }
}
