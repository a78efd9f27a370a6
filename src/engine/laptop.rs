use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Reserve a laptop for one person. Single-party, so there is no
    /// pending phase: the interval commits and the booking is active
    /// in the same event.
    pub async fn reserve_laptop(
        &self,
        actor: Actor,
        resource_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Ulid, EngineError> {
        let (mut rs, window) = self
            .prepare_booking(resource_id, ResourceFamily::Laptop, date, start, end)
            .await?;

        let id = Ulid::new();
        let event = Event::LaptopReserved {
            id,
            resource_id,
            holder: actor.id,
            date,
            window,
            created_at: self.clock.now(),
        };
        self.commit_creation(&mut rs, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL, "family" => "laptop")
            .increment(1);
        Ok(id)
    }

    /// Staff hands the laptop over. Assigns the staff member and
    /// marks the unit in use; the booking stays active.
    pub async fn confirm_laptop(&self, actor: Actor, booking_id: Ulid) -> Result<(), EngineError> {
        if !actor.role.is_staff() {
            return Err(EngineError::Forbidden { required: Role::Staff });
        }

        let record_arc = self
            .get_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let mut record = record_arc.write_owned().await;

        if !matches!(record.kind, BookingKind::Laptop) {
            return Err(EngineError::KindMismatch { expected: ResourceFamily::Laptop });
        }
        if record.state != ReservationState::Active {
            return Err(EngineError::NotActive(booking_id));
        }
        if record.checked_in_by.is_some() {
            return Err(EngineError::AlreadyConfirmed(booking_id));
        }

        let rs_arc = self
            .get_resource(&record.resource_id)
            .ok_or(EngineError::NotFound(record.resource_id))?;
        let mut rs = rs_arc.write_owned().await;

        let event = Event::CheckedIn {
            booking_id,
            resource_id: rs.id,
            staff: actor.id,
        };
        self.persist_booking_event(&mut rs, &mut record, &event).await
    }
}
