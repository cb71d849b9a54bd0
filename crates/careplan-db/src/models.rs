use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Position of a plan in the review workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Draft,
    PendingReview,
    Approved,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl FromStr for ApprovalStatus {
    type Err = ApprovalStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "pending_review" => Ok(Self::PendingReview),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(ApprovalStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ApprovalStatus`] string.
#[derive(Debug, Clone)]
pub struct ApprovalStatusParseError(pub String);

impl fmt::Display for ApprovalStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid approval status: {:?}", self.0)
    }
}

impl std::error::Error for ApprovalStatusParseError {}

// ---------------------------------------------------------------------------

/// Execution status of an activated plan.
///
/// Stored as a nullable column: `NULL` means the plan has not been activated
/// (it is still in draft or under review).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanStatus {
    type Err = PlanStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(PlanStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PlanStatus`] string.
#[derive(Debug, Clone)]
pub struct PlanStatusParseError(pub String);

impl fmt::Display for PlanStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan status: {:?}", self.0)
    }
}

impl std::error::Error for PlanStatusParseError {}

// ---------------------------------------------------------------------------

/// Derived status of a phase. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------

/// How the patient pays for the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Full,
    Phased,
    Installment,
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Full => "full",
            Self::Phased => "phased",
            Self::Installment => "installment",
        };
        f.write_str(s)
    }
}

impl FromStr for PaymentType {
    type Err = PaymentTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "phased" => Ok(Self::Phased),
            "installment" => Ok(Self::Installment),
            other => Err(PaymentTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PaymentType`] string.
#[derive(Debug, Clone)]
pub struct PaymentTypeParseError(pub String);

impl fmt::Display for PaymentTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid payment type: {:?}", self.0)
    }
}

impl std::error::Error for PaymentTypeParseError {}

// ---------------------------------------------------------------------------

/// Status of a single trackable plan item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    WaitingForPrerequisite,
    ReadyForBooking,
    Scheduled,
    InProgress,
    Completed,
    Skipped,
}

impl ItemStatus {
    /// Completed and skipped items need no further work.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::WaitingForPrerequisite => "waiting_for_prerequisite",
            Self::ReadyForBooking => "ready_for_booking",
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

impl FromStr for ItemStatus {
    type Err = ItemStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "waiting_for_prerequisite" => Ok(Self::WaitingForPrerequisite),
            "ready_for_booking" => Ok(Self::ReadyForBooking),
            "scheduled" => Ok(Self::Scheduled),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "skipped" => Ok(Self::Skipped),
            other => Err(ItemStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ItemStatus`] string.
#[derive(Debug, Clone)]
pub struct ItemStatusParseError(pub String);

impl fmt::Display for ItemStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid item status: {:?}", self.0)
    }
}

impl std::error::Error for ItemStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of an appointment as last reported by the booking side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Booked,
    CheckedIn,
    Done,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Booked or checked in: the appointment still occupies the item.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Booked | Self::CheckedIn)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Booked => "booked",
            Self::CheckedIn => "checked_in",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        };
        f.write_str(s)
    }
}

impl FromStr for AppointmentStatus {
    type Err = AppointmentStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booked" => Ok(Self::Booked),
            "checked_in" => Ok(Self::CheckedIn),
            "done" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            "no_show" => Ok(Self::NoShow),
            other => Err(AppointmentStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`AppointmentStatus`] string.
#[derive(Debug, Clone)]
pub struct AppointmentStatusParseError(pub String);

impl fmt::Display for AppointmentStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid appointment status: {:?}", self.0)
    }
}

impl std::error::Error for AppointmentStatusParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A treatment plan -- the aggregate root.
///
/// `phases` is not a column; query functions assemble it from the `phases`,
/// `plan_items`, and `item_appointments` tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TreatmentPlan {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub approval_status: ApprovalStatus,
    pub status: Option<PlanStatus>,
    pub start_date: NaiveDate,
    pub expected_end_date: Option<NaiveDate>,
    pub total_cost: Decimal,
    pub discount_amount: Decimal,
    pub final_cost: Decimal,
    pub payment_type: PaymentType,
    pub notes: Option<String>,
    pub review_notes: Option<String>,
    /// Optimistic concurrency stamp, bumped on every save.
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    #[sqlx(skip)]
    pub phases: Vec<Phase>,
}

impl TreatmentPlan {
    /// All items across all phases, in phase then sequence order.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.phases.iter().flat_map(|p| p.items.iter())
    }

    pub fn find_item(&self, item_id: Uuid) -> Option<&Item> {
        self.items().find(|i| i.id == item_id)
    }

    pub fn find_item_mut(&mut self, item_id: Uuid) -> Option<&mut Item> {
        self.phases
            .iter_mut()
            .flat_map(|p| p.items.iter_mut())
            .find(|i| i.id == item_id)
    }

    pub fn phase(&self, phase_number: i32) -> Option<&Phase> {
        self.phases.iter().find(|p| p.phase_number == phase_number)
    }

    /// Phase number owning the given item.
    pub fn phase_number_of(&self, item_id: Uuid) -> Option<i32> {
        self.phases
            .iter()
            .find(|p| p.items.iter().any(|i| i.id == item_id))
            .map(|p| p.phase_number)
    }
}

/// An ordered stage of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Phase {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub phase_number: i32,
    pub name: String,
    pub description: Option<String>,
    pub estimated_duration_days: Option<i32>,
    /// Set once the phase's items have been handed to scheduling.
    pub released: bool,
    #[sqlx(skip)]
    pub items: Vec<Item>,
}

/// A single trackable unit of treatment work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Item {
    pub id: Uuid,
    pub phase_id: Uuid,
    pub sequence_number: i32,
    pub service_id: i64,
    pub item_name: String,
    pub price: Decimal,
    pub estimated_time_minutes: i32,
    pub status: ItemStatus,
    pub prerequisite_item_id: Option<Uuid>,
    /// Minimum days after the previous item in scheduling order.
    pub spacing_days: Option<i32>,
    pub default_doctor_id: Option<i64>,
    pub completed_on: Option<NaiveDate>,
    pub completion_note: Option<String>,
    #[sqlx(skip)]
    pub linked_appointments: Vec<LinkedAppointment>,
}

/// Back-reference from an item to an appointment owned by the booking side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LinkedAppointment {
    pub appointment_id: Uuid,
    pub item_id: Uuid,
    pub doctor_id: i64,
    pub starts_at: NaiveDateTime,
    pub status: AppointmentStatus,
}

/// A confirmed reservation in the `appointments` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Appointment {
    pub id: Uuid,
    pub item_id: Uuid,
    pub doctor_id: i64,
    pub room_id: Option<i64>,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub created_at: DateTime<Utc>,
}

/// A clinic closure day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Holiday {
    pub day: NaiveDate,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_status_display_roundtrip() {
        let variants = [
            ApprovalStatus::Draft,
            ApprovalStatus::PendingReview,
            ApprovalStatus::Approved,
            ApprovalStatus::Rejected,
        ];
        for v in &variants {
            let parsed: ApprovalStatus = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn approval_status_invalid() {
        assert!("accepted".parse::<ApprovalStatus>().is_err());
    }

    #[test]
    fn item_status_display_roundtrip() {
        let variants = [
            ItemStatus::Pending,
            ItemStatus::WaitingForPrerequisite,
            ItemStatus::ReadyForBooking,
            ItemStatus::Scheduled,
            ItemStatus::InProgress,
            ItemStatus::Completed,
            ItemStatus::Skipped,
        ];
        for v in &variants {
            let parsed: ItemStatus = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn item_status_closed() {
        assert!(ItemStatus::Completed.is_closed());
        assert!(ItemStatus::Skipped.is_closed());
        assert!(!ItemStatus::Scheduled.is_closed());
    }

    #[test]
    fn plan_status_invalid() {
        let err = "paused".parse::<PlanStatus>().unwrap_err();
        assert_eq!(err.to_string(), "invalid plan status: \"paused\"");
    }

    #[test]
    fn payment_type_parses() {
        assert_eq!("phased".parse::<PaymentType>().unwrap(), PaymentType::Phased);
        assert!("card".parse::<PaymentType>().is_err());
    }

    #[test]
    fn appointment_status_activity() {
        assert!(AppointmentStatus::Booked.is_active());
        assert!(AppointmentStatus::CheckedIn.is_active());
        assert!(!AppointmentStatus::NoShow.is_active());
        assert_eq!(
            "no_show".parse::<AppointmentStatus>().unwrap(),
            AppointmentStatus::NoShow
        );
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ItemStatus::WaitingForPrerequisite).unwrap();
        assert_eq!(json, "\"waiting_for_prerequisite\"");
    }
}
