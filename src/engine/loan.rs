use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Request a book-copy loan for a date span. The copy is held from
    /// this moment: a second request while this loan is open fails
    /// `CopyOnLoan`. Whether the loan reads as awaiting delivery, on
    /// loan, or overdue is derived from the dates, never stored.
    pub async fn request_loan(
        &self,
        actor: Actor,
        copy_id: Ulid,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Ulid, EngineError> {
        if self.loans.len() >= MAX_LOANS {
            return Err(EngineError::LimitExceeded("too many loans"));
        }
        let (Some(start_date), Some(end_date)) = (start_date, end_date) else {
            return Err(EngineError::MissingWindow);
        };

        let rs_arc = self
            .get_resource(&copy_id)
            .ok_or(EngineError::NotFound(copy_id))?;
        let mut rs = rs_arc.write_owned().await;

        // The arc can outlive removal from the map; re-check under the lock.
        if !self.resources.contains_key(&copy_id) {
            return Err(EngineError::NotFound(copy_id));
        }
        if rs.kind.family() != ResourceFamily::BookCopy {
            return Err(EngineError::KindMismatch { expected: ResourceFamily::BookCopy });
        }
        if rs.status != AdminStatus::Available {
            return Err(EngineError::ResourceUnavailable(copy_id));
        }
        if let Some(loan_id) = rs.active_loan {
            return Err(EngineError::CopyOnLoan(loan_id));
        }

        let now = self.clock.now();
        if start_date < now.date() {
            return Err(EngineError::StartInPast { start: start_date });
        }
        if end_date < start_date {
            return Err(EngineError::EndBeforeStart { start: start_date, end: end_date });
        }
        if start_date == now.date() && now.time() >= self.policy.same_day_cutoff {
            metrics::counter!(crate::observability::GATE_REJECTIONS_TOTAL, "gate" => "same_day_cutoff")
                .increment(1);
            return Err(EngineError::SameDayCutoff { cutoff: self.policy.same_day_cutoff });
        }
        let days = (end_date - start_date).num_days();
        if days > self.policy.max_loan_days {
            return Err(EngineError::DurationExceeded {
                days,
                max_days: self.policy.max_loan_days,
            });
        }

        let id = Ulid::new();
        let event = Event::LoanRequested {
            id,
            copy_id,
            borrower: actor.id,
            start_date,
            end_date,
            created_at: now,
        };
        self.commit_creation(&mut rs, &event).await?;
        metrics::counter!(crate::observability::LOANS_REQUESTED_TOTAL).increment(1);
        Ok(id)
    }

    /// Staff hands the copy to the borrower. Gated to the delivery
    /// window and to the loan's own date span.
    pub async fn deliver_loan(&self, actor: Actor, loan_id: Ulid) -> Result<(), EngineError> {
        if !actor.role.is_staff() {
            return Err(EngineError::Forbidden { required: Role::Staff });
        }

        let record_arc = self
            .get_loan(&loan_id)
            .ok_or(EngineError::NotFound(loan_id))?;
        let mut record = record_arc.write_owned().await;

        if record.state.is_terminal() {
            return Err(EngineError::NotActive(loan_id));
        }
        if record.delivered() {
            return Err(EngineError::AlreadyAssigned(loan_id));
        }
        let now = self.clock.now();
        if now.date() < record.start_date {
            return Err(EngineError::NotYetStarted { start_date: record.start_date });
        }
        if now.date() > record.end_date {
            return Err(EngineError::Overdue { end_date: record.end_date });
        }
        if !self.policy.delivery_window.contains_instant(now.time()) {
            metrics::counter!(crate::observability::GATE_REJECTIONS_TOTAL, "gate" => "delivery")
                .increment(1);
            return Err(EngineError::OutsideWindow {
                gate: "delivery",
                window: self.policy.delivery_window,
            });
        }

        let rs_arc = self
            .get_resource(&record.copy_id)
            .ok_or(EngineError::NotFound(record.copy_id))?;
        let mut rs = rs_arc.write_owned().await;

        let event = Event::LoanDelivered { id: loan_id, copy_id: rs.id, staff: actor.id };
        self.persist_loan_event(&mut rs, &mut record, &event).await?;
        metrics::counter!(crate::observability::LOANS_DELIVERED_TOTAL).increment(1);
        Ok(())
    }

    /// Staff takes the copy back. `returned_on` defaults to today;
    /// finishing past the due date lands in `FinalizedLate`. Frees the
    /// copy either way.
    pub async fn return_loan(
        &self,
        actor: Actor,
        loan_id: Ulid,
        returned_on: Option<NaiveDate>,
    ) -> Result<(), EngineError> {
        if !actor.role.is_staff() {
            return Err(EngineError::Forbidden { required: Role::Staff });
        }

        let record_arc = self
            .get_loan(&loan_id)
            .ok_or(EngineError::NotFound(loan_id))?;
        let mut record = record_arc.write_owned().await;

        match record.state {
            LoanState::Finalized | LoanState::FinalizedLate => {
                return Err(EngineError::AlreadyReturned(loan_id));
            }
            LoanState::Cancelled => return Err(EngineError::NotActive(loan_id)),
            LoanState::Open => {}
        }
        if !record.delivered() {
            return Err(EngineError::NotDelivered(loan_id));
        }
        let now = self.clock.now();
        if !self.policy.return_window.contains_instant(now.time()) {
            metrics::counter!(crate::observability::GATE_REJECTIONS_TOTAL, "gate" => "return")
                .increment(1);
            return Err(EngineError::OutsideWindow {
                gate: "return",
                window: self.policy.return_window,
            });
        }

        let rs_arc = self
            .get_resource(&record.copy_id)
            .ok_or(EngineError::NotFound(record.copy_id))?;
        let mut rs = rs_arc.write_owned().await;

        let returned_on = returned_on.unwrap_or_else(|| now.date());
        let late = returned_on > record.end_date;
        let event = Event::LoanReturned { id: loan_id, copy_id: rs.id, returned_on, late };
        self.persist_loan_event(&mut rs, &mut record, &event).await?;
        metrics::counter!(
            crate::observability::LOANS_RETURNED_TOTAL,
            "late" => if late { "true" } else { "false" }
        )
        .increment(1);
        Ok(())
    }

    /// Borrower (or staff) withdraws the request. Only valid before the
    /// start date and before delivery; after either point the loan must
    /// run its course through return.
    pub async fn cancel_loan(&self, actor: Actor, loan_id: Ulid) -> Result<(), EngineError> {
        let record_arc = self
            .get_loan(&loan_id)
            .ok_or(EngineError::NotFound(loan_id))?;
        let mut record = record_arc.write_owned().await;

        if actor.id != record.borrower && !actor.role.is_staff() {
            return Err(EngineError::Forbidden { required: Role::Staff });
        }
        match record.state {
            LoanState::Finalized | LoanState::FinalizedLate => {
                return Err(EngineError::AlreadyReturned(loan_id));
            }
            LoanState::Cancelled => return Err(EngineError::NotActive(loan_id)),
            LoanState::Open => {}
        }
        if record.delivered() {
            return Err(EngineError::AlreadyDelivered(loan_id));
        }
        if self.clock.today() >= record.start_date {
            return Err(EngineError::InProgressOrOverdue(loan_id));
        }

        let rs_arc = self
            .get_resource(&record.copy_id)
            .ok_or(EngineError::NotFound(record.copy_id))?;
        let mut rs = rs_arc.write_owned().await;

        let event = Event::LoanCancelled { id: loan_id, copy_id: rs.id };
        self.persist_loan_event(&mut rs, &mut record, &event).await?;
        metrics::counter!(crate::observability::LOANS_CANCELLED_TOTAL).increment(1);
        Ok(())
    }
}
