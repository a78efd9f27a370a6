use chrono::{NaiveDate, NaiveTime};
use tokio::sync::OwnedRwLockWriteGuard;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Front half of every booking create: resolve the resource,
    /// check family and administrative status, validate the window,
    /// and run the overlap check — returning the still-held resource
    /// lock so the caller commits under it. Two concurrent creates on
    /// one resource serialize here; at most one of an overlapping pair
    /// survives.
    pub(super) async fn prepare_booking(
        &self,
        resource_id: Ulid,
        family: ResourceFamily,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<(OwnedRwLockWriteGuard<ResourceState>, Window), EngineError> {
        if self.bookings.len() >= MAX_BOOKINGS {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }

        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.write_owned().await;

        // The arc can outlive removal from the map; re-check under the lock.
        if !self.resources.contains_key(&resource_id) {
            return Err(EngineError::NotFound(resource_id));
        }
        if guard.kind.family() != family {
            return Err(EngineError::KindMismatch { expected: family });
        }
        if !guard.is_available() {
            return Err(EngineError::ResourceUnavailable(resource_id));
        }
        if start >= end {
            return Err(EngineError::InvalidWindow { start, end });
        }
        let window = Window::new(start, end);
        if !self.policy.hours.contains(&window) {
            return Err(EngineError::InvalidWindow { start, end });
        }
        if guard.schedule.day_len(date) >= MAX_INTERVALS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings that day"));
        }
        if let Some(holder) = guard.schedule.conflict(date, &window) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::SlotTaken(holder));
        }

        Ok((guard, window))
    }

    /// Close out an active booking. Cubicles must have been checked
    /// in first. The committed interval stays in the schedule as
    /// history; only the walk-in occupancy is released.
    pub async fn finalize_booking(&self, actor: Actor, booking_id: Ulid) -> Result<(), EngineError> {
        let record_arc = self
            .get_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let mut record = record_arc.write_owned().await;

        if actor.id != record.holder && !actor.role.is_staff() {
            return Err(EngineError::Forbidden { required: Role::Staff });
        }
        if record.state != ReservationState::Active {
            return Err(EngineError::NotActive(booking_id));
        }
        if matches!(record.kind, BookingKind::Cubicle { .. }) && record.checked_in_by.is_none() {
            return Err(EngineError::NotCheckedIn(booking_id));
        }

        let rs_arc = self
            .get_resource(&record.resource_id)
            .ok_or(EngineError::NotFound(record.resource_id))?;
        let mut rs = rs_arc.write_owned().await;

        let event = Event::BookingFinalized { id: booking_id, resource_id: rs.id };
        self.persist_booking_event(&mut rs, &mut record, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_FINALIZED_TOTAL).increment(1);
        Ok(())
    }

    /// Cancel a live booking and release its window. Laptops cancel
    /// from active; cubicle groups from pending or active.
    pub async fn cancel_booking(&self, actor: Actor, booking_id: Ulid) -> Result<(), EngineError> {
        let record_arc = self
            .get_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let mut record = record_arc.write_owned().await;

        if actor.id != record.holder && !actor.role.is_staff() {
            return Err(EngineError::Forbidden { required: Role::Staff });
        }
        let cancellable = match &record.kind {
            BookingKind::Laptop => record.state == ReservationState::Active,
            BookingKind::Cubicle { .. } => matches!(
                record.state,
                ReservationState::Pending | ReservationState::Active
            ),
        };
        if !cancellable {
            return Err(EngineError::NotActive(booking_id));
        }

        let rs_arc = self
            .get_resource(&record.resource_id)
            .ok_or(EngineError::NotFound(record.resource_id))?;
        let mut rs = rs_arc.write_owned().await;

        let event = Event::BookingCancelled {
            id: booking_id,
            resource_id: rs.id,
            date: record.date,
        };
        self.persist_booking_event(&mut rs, &mut record, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        Ok(())
    }

    /// Reaper path: cancel a pending group whose window has lapsed.
    /// Not actor-gated — nobody asked for this, the calendar did. A
    /// racing confirm wins; the stale check is re-done under the lock
    /// via the state test.
    pub async fn expire_pending(&self, booking_id: Ulid) -> Result<(), EngineError> {
        let record_arc = self
            .get_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let mut record = record_arc.write_owned().await;
        if record.state != ReservationState::Pending {
            return Err(EngineError::NotPending(booking_id));
        }

        let rs_arc = self
            .get_resource(&record.resource_id)
            .ok_or(EngineError::NotFound(record.resource_id))?;
        let mut rs = rs_arc.write_owned().await;

        let event = Event::BookingCancelled {
            id: booking_id,
            resource_id: rs.id,
            date: record.date,
        };
        self.persist_booking_event(&mut rs, &mut record, &event).await?;
        metrics::counter!(crate::observability::REAPED_PENDING_TOTAL).increment(1);
        metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        Ok(())
    }
}
