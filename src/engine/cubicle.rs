use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Reserve a cubicle for a group. The slot commits at creation;
    /// the reservation sits in `Pending` until every invitee accepts
    /// and the creator confirms. Only cancellation (explicit or
    /// reaped) releases the interval.
    pub async fn reserve_cubicle(
        &self,
        actor: Actor,
        resource_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        invitees: &[Ulid],
    ) -> Result<Ulid, EngineError> {
        // Creator counts toward quorum; duplicates and a self-invite
        // collapse to one seat each.
        let mut party: Vec<Ulid> = Vec::with_capacity(invitees.len());
        for person in invitees {
            if *person != actor.id && !party.contains(person) {
                party.push(*person);
            }
        }
        let size = party.len() + 1;
        if size < self.policy.min_party_size {
            return Err(EngineError::QuorumTooSmall { size, min: self.policy.min_party_size });
        }
        if size > MAX_PARTY_SIZE {
            return Err(EngineError::LimitExceeded("party too large"));
        }

        let (mut rs, window) = self
            .prepare_booking(resource_id, ResourceFamily::Cubicle, date, start, end)
            .await?;

        let id = Ulid::new();
        let event = Event::CubicleReserved {
            id,
            resource_id,
            holder: actor.id,
            date,
            window,
            invitees: party,
            created_at: self.clock.now(),
        };
        self.commit_creation(&mut rs, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL, "family" => "cubicle")
            .increment(1);
        Ok(id)
    }

    /// An invitee accepts or declines their seat. Each member answers
    /// exactly once; the creator's seat was accepted at creation and
    /// cannot be answered again.
    pub async fn respond_invitation(
        &self,
        actor: Actor,
        booking_id: Ulid,
        accept: bool,
    ) -> Result<(), EngineError> {
        let record_arc = self
            .get_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let mut record = record_arc.write_owned().await;

        if record.state != ReservationState::Pending {
            return Err(EngineError::NotPending(booking_id));
        }
        match record.member(actor.id) {
            Some(m) if m.consent == Consent::Pending => {}
            _ => return Err(EngineError::NotFound(actor.id)),
        }

        let event = Event::InvitationAnswered {
            booking_id,
            resource_id: record.resource_id,
            person: actor.id,
            accepted: accept,
        };
        self.persist_record_event(&mut record, &event).await?;
        let answer = if accept { "accept" } else { "reject" };
        metrics::counter!(crate::observability::INVITATIONS_ANSWERED_TOTAL, "answer" => answer)
            .increment(1);
        Ok(())
    }

    /// Creator (or staff) activates the reservation once every invitee
    /// has accepted. Rejections are permanent, so a group with any
    /// rejected seat can only be cancelled.
    pub async fn confirm_group(&self, actor: Actor, booking_id: Ulid) -> Result<(), EngineError> {
        let record_arc = self
            .get_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let mut record = record_arc.write_owned().await;

        if actor.id != record.holder && !actor.role.is_staff() {
            return Err(EngineError::Forbidden { required: Role::Staff });
        }
        if record.state != ReservationState::Pending {
            return Err(EngineError::NotPending(booking_id));
        }
        if !record.quorum_met() {
            let (pending, rejected) = record.quorum_blockers();
            return Err(EngineError::QuorumNotMet { pending, rejected });
        }

        let event = Event::BookingConfirmed { id: booking_id, resource_id: record.resource_id };
        self.persist_record_event(&mut record, &event).await
    }

    /// Staff marks the group as physically present. Required before the
    /// reservation can finalize.
    pub async fn check_in(&self, actor: Actor, booking_id: Ulid) -> Result<(), EngineError> {
        if !actor.role.is_staff() {
            return Err(EngineError::Forbidden { required: Role::Staff });
        }

        let record_arc = self
            .get_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let mut record = record_arc.write_owned().await;

        if !matches!(record.kind, BookingKind::Cubicle { .. }) {
            return Err(EngineError::KindMismatch { expected: ResourceFamily::Cubicle });
        }
        if record.state != ReservationState::Active {
            return Err(EngineError::NotActive(booking_id));
        }
        if record.checked_in_by.is_some() {
            return Err(EngineError::AlreadyCheckedIn(booking_id));
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
