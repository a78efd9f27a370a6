use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::index::Commitment;
use crate::model::*;

use super::{Engine, EngineError, SharedBooking, SharedLoan, SharedResourceState};

// ── Read surface ─────────────────────────────────────────
//
// Snapshots clone under a read lock, so every answer is internally
// consistent even while mutations run on other records. DashMap shard
// guards are never held across an await: collect the Arcs first, then
// lock.

impl Engine {
    fn resource_arcs(&self) -> Vec<(Ulid, SharedResourceState)> {
        let mut arcs: Vec<_> = self
            .resources
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        arcs.sort_unstable_by_key(|(id, _)| *id);
        arcs
    }

    fn loan_arcs(&self) -> Vec<SharedLoan> {
        self.loans.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let mut out = Vec::new();
        for (_, arc) in self.resource_arcs() {
            let rs = arc.read().await;
            out.push(ResourceInfo {
                id: rs.id,
                kind: rs.kind.clone(),
                status: rs.status,
                effective: rs.effective_status(),
            });
        }
        out
    }

    pub async fn resource_info(&self, id: Ulid) -> Option<ResourceInfo> {
        let arc = self.get_resource(&id)?;
        let rs = arc.read().await;
        Some(ResourceInfo {
            id: rs.id,
            kind: rs.kind.clone(),
            status: rs.status,
            effective: rs.effective_status(),
        })
    }

    /// Book copies a borrower could request right now: admin-available
    /// and not referenced by an open loan. Ordered by id.
    pub async fn loanable_copies(&self) -> Vec<ResourceInfo> {
        let mut out = Vec::new();
        for (_, arc) in self.resource_arcs() {
            let rs = arc.read().await;
            if rs.kind.family() == ResourceFamily::BookCopy
                && rs.is_available()
                && rs.active_loan.is_none()
            {
                out.push(ResourceInfo {
                    id: rs.id,
                    kind: rs.kind.clone(),
                    status: rs.status,
                    effective: rs.effective_status(),
                });
            }
        }
        out
    }

    pub async fn booking_snapshot(&self, id: Ulid) -> Option<BookingRecord> {
        let arc: SharedBooking = self.get_booking(&id)?;
        let record = arc.read().await;
        Some(record.clone())
    }

    pub async fn loan_snapshot(&self, id: Ulid) -> Option<LoanRecord> {
        let arc = self.get_loan(&id)?;
        let record = arc.read().await;
        Some(record.clone())
    }

    /// Where the loan stands as of the clock's today. `Overdue` is
    /// derived here, never stored.
    pub async fn loan_phase_of(&self, id: Ulid) -> Option<LoanPhase> {
        let arc = self.get_loan(&id)?;
        let record = arc.read().await;
        Some(record.phase(self.clock.today()))
    }

    /// Committed intervals on one resource for one day, in window order.
    pub async fn schedule_on(&self, resource_id: Ulid, date: NaiveDate) -> Vec<Commitment> {
        let Some(arc) = self.get_resource(&resource_id) else {
            return Vec::new();
        };
        let rs = arc.read().await;
        rs.schedule.commitments_on(date).to_vec()
    }

    pub async fn loans_for_borrower(&self, person: Ulid) -> Vec<LoanRecord> {
        let mut out = Vec::new();
        for arc in self.loan_arcs() {
            let record = arc.read().await;
            if record.borrower == person {
                out.push(record.clone());
            }
        }
        out.sort_unstable_by_key(|r| r.id);
        out
    }

    pub async fn overdue_loans(&self) -> Vec<LoanRecord> {
        let today = self.clock.today();
        let mut out = Vec::new();
        for arc in self.loan_arcs() {
            let record = arc.read().await;
            if record.phase(today) == LoanPhase::Overdue {
                out.push(record.clone());
            }
        }
        out.sort_unstable_by_key(|r| r.id);
        out
    }

    /// Would this window commit cleanly right now? Advisory only — the
    /// answer can go stale the moment the lock drops; `reserve_*` is
    /// the authority.
    pub async fn is_free(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<bool, EngineError> {
        if start >= end {
            return Err(EngineError::InvalidWindow { start, end });
        }
        let arc = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let rs = arc.read().await;
        let window = Window::new(start, end);
        Ok(!rs.schedule.overlaps(date, &window))
    }
}
