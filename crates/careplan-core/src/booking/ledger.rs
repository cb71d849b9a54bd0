use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{AppointmentRef, BookingError, BookingGateway, Slot};

/// Process-local booking ledger. The overlap check and the insert happen
/// under one mutex.
#[derive(Debug, Default)]
pub struct InMemoryBookingLedger {
    booked: Mutex<Vec<(Uuid, Slot)>>,
}

impl InMemoryBookingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All reservations made so far, in booking order.
    pub fn bookings(&self) -> Vec<(Uuid, Slot)> {
        self.booked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl BookingGateway for InMemoryBookingLedger {
    async fn confirm(&self, item_id: Uuid, slot: &Slot) -> Result<AppointmentRef, BookingError> {
        let mut booked = self
            .booked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if booked.iter().any(|(_, existing)| existing.overlaps(slot)) {
            tracing::debug!(
                doctor_id = slot.doctor_id,
                starts_at = %slot.starts_at,
                "slot already taken"
            );
            return Err(BookingError::SlotConflict {
                doctor_id: slot.doctor_id,
                starts_at: slot.starts_at,
            });
        }

        booked.push((item_id, *slot));
        Ok(AppointmentRef {
            appointment_id: Uuid::new_v4(),
            doctor_id: slot.doctor_id,
            starts_at: slot.starts_at,
            ends_at: slot.ends_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::at;

    #[tokio::test]
    async fn second_overlapping_booking_conflicts() {
        let ledger = InMemoryBookingLedger::new();
        let slot = Slot {
            doctor_id: 7,
            room_id: None,
            starts_at: at(2026, 10, 19, 9, 0),
            ends_at: at(2026, 10, 19, 9, 30),
        };

        let first = ledger.confirm(Uuid::new_v4(), &slot).await.unwrap();
        assert_eq!(first.doctor_id, 7);

        let err = ledger.confirm(Uuid::new_v4(), &slot).await.unwrap_err();
        assert!(matches!(err, BookingError::SlotConflict { doctor_id: 7, .. }));

        let later = Slot {
            starts_at: at(2026, 10, 19, 9, 30),
            ends_at: at(2026, 10, 19, 10, 0),
            ..slot
        };
        ledger.confirm(Uuid::new_v4(), &later).await.unwrap();
        assert_eq!(ledger.bookings().len(), 2);
    }
}
