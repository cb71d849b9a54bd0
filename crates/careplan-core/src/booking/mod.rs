//! Appointment booking: the only operation that mutates shared calendar
//! state.
//!
//! Suggestions from the scheduler are non-binding. A [`BookingGateway`]
//! performs the atomic reservation and refuses slots taken in the meantime.

mod ledger;
mod postgres;

pub use ledger::InMemoryBookingLedger;
pub use postgres::PgBookingGateway;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::PlanError;

/// A doctor/room/time tuple considered for booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub doctor_id: i64,
    pub room_id: Option<i64>,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
}

impl Slot {
    /// Half-open overlap: touching slots do not conflict.
    pub fn overlaps(&self, other: &Slot) -> bool {
        let same_resource = self.doctor_id == other.doctor_id
            || (self.room_id.is_some() && self.room_id == other.room_id);
        same_resource && self.starts_at < other.ends_at && other.starts_at < self.ends_at
    }
}

/// A confirmed reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRef {
    pub appointment_id: Uuid,
    pub doctor_id: i64,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("slot for doctor {doctor_id} at {starts_at} is already taken")]
    SlotConflict {
        doctor_id: i64,
        starts_at: NaiveDateTime,
    },

    #[error("booking backend unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

impl From<BookingError> for PlanError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::SlotConflict {
                doctor_id,
                starts_at,
            } => PlanError::SlotConflict {
                doctor_id,
                starts_at,
            },
            BookingError::Unavailable(source) => PlanError::Storage(source),
        }
    }
}

/// Atomically reserves slots for plan items.
#[async_trait]
pub trait BookingGateway: Send + Sync {
    /// Reserve `slot` for `item_id`, or fail with
    /// [`BookingError::SlotConflict`] if any part of it is taken.
    async fn confirm(&self, item_id: Uuid, slot: &Slot) -> Result<AppointmentRef, BookingError>;
}

// Compile-time assertion: BookingGateway must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn BookingGateway) {}
};
