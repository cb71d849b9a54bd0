use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use careplan_db::queries::appointments;

use super::{AppointmentRef, BookingError, BookingGateway, Slot};

/// Reserves slots in the `appointments` table.
#[derive(Debug, Clone)]
pub struct PgBookingGateway {
    pool: PgPool,
}

impl PgBookingGateway {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingGateway for PgBookingGateway {
    async fn confirm(&self, item_id: Uuid, slot: &Slot) -> Result<AppointmentRef, BookingError> {
        let reserved = appointments::reserve_slot(
            &self.pool,
            item_id,
            slot.doctor_id,
            slot.room_id,
            slot.starts_at,
            slot.ends_at,
        )
        .await
        .map_err(BookingError::Unavailable)?;

        match reserved {
            Some(appointment) => Ok(AppointmentRef {
                appointment_id: appointment.id,
                doctor_id: appointment.doctor_id,
                starts_at: appointment.starts_at,
                ends_at: appointment.ends_at,
            }),
            None => Err(BookingError::SlotConflict {
                doctor_id: slot.doctor_id,
                starts_at: slot.starts_at,
            }),
        }
    }
}
