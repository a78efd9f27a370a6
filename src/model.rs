use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::index::IntervalIndex;

// ── time ────────────────────────────────────────────────────────────

/// Half-open time-of-day window `[start, end)` within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Window {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "Window start must be before end");
        Self { start, end }
    }

    /// Strict overlap. Windows that merely touch (`a.end == b.start`)
    /// do not overlap.
    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether `t` falls inside the window (start inclusive, end
    /// exclusive).
    pub fn contains_instant(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`. Edge-aligned
    /// windows count as contained.
    pub fn contains(&self, other: &Window) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

// ── resources ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Cubicle { capacity: u32 },
    Laptop { os: String, brand: String },
    BookCopy { title: String },
}

/// Kind with the per-resource attributes stripped. Lifecycle rules
/// are keyed by family, not by the concrete resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceFamily {
    Cubicle,
    Laptop,
    BookCopy,
}

impl ResourceKind {
    pub fn family(&self) -> ResourceFamily {
        match self {
            ResourceKind::Cubicle { .. } => ResourceFamily::Cubicle,
            ResourceKind::Laptop { .. } => ResourceFamily::Laptop,
            ResourceKind::BookCopy { .. } => ResourceFamily::BookCopy,
        }
    }
}

/// Status set by staff. Orthogonal to whatever bookings and loans are
/// doing to the resource at this instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminStatus {
    Available,
    Maintenance,
    Disabled,
}

/// What a patron asking "can I use this right now?" actually sees.
/// Derived on read, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveStatus {
    Available,
    InUse,
    OnLoan,
    Maintenance,
    Disabled,
}

/// Full in-memory state of one resource. Guarded by a single RwLock;
/// no event ever mutates two resources.
#[derive(Debug)]
pub struct ResourceState {
    pub id: Ulid,
    pub kind: ResourceKind,
    pub status: AdminStatus,
    /// Committed reservation intervals, bucketed by day.
    pub schedule: IntervalIndex,
    /// Booking currently checked in (cubicles and laptops).
    pub occupied_by: Option<Ulid>,
    /// Loan currently out on this copy (book copies only).
    pub active_loan: Option<Ulid>,
}

impl ResourceState {
    pub fn new(id: Ulid, kind: ResourceKind) -> Self {
        Self {
            id,
            kind,
            status: AdminStatus::Available,
            schedule: IntervalIndex::default(),
            occupied_by: None,
            active_loan: None,
        }
    }

    /// Bookable at all — admin status only, says nothing about the
    /// calendar.
    pub fn is_available(&self) -> bool {
        self.status == AdminStatus::Available
    }

    pub fn effective_status(&self) -> EffectiveStatus {
        match self.status {
            AdminStatus::Maintenance => EffectiveStatus::Maintenance,
            AdminStatus::Disabled => EffectiveStatus::Disabled,
            AdminStatus::Available if self.active_loan.is_some() => EffectiveStatus::OnLoan,
            AdminStatus::Available if self.occupied_by.is_some() => EffectiveStatus::InUse,
            AdminStatus::Available => EffectiveStatus::Available,
        }
    }
}

// ── bookings ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    /// Cubicle group awaiting quorum. Laptop bookings never pass
    /// through here.
    Pending,
    Active,
    Finalized,
    Cancelled,
}

impl ReservationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationState::Finalized | ReservationState::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consent {
    Pending,
    Accepted,
    Rejected,
}

/// One invited member of a cubicle group, holder included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub person: Ulid,
    pub consent: Consent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingKind {
    Laptop,
    Cubicle { party: Vec<Membership> },
}

#[derive(Debug, Clone)]
pub struct BookingRecord {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub holder: Ulid,
    pub date: NaiveDate,
    pub window: Window,
    pub state: ReservationState,
    pub kind: BookingKind,
    /// Staff member who performed the check-in, once use began.
    pub checked_in_by: Option<Ulid>,
    pub created_at: NaiveDateTime,
}

impl BookingRecord {
    pub fn party(&self) -> Option<&[Membership]> {
        match &self.kind {
            BookingKind::Laptop => None,
            BookingKind::Cubicle { party } => Some(party),
        }
    }

    pub fn member(&self, person: Ulid) -> Option<&Membership> {
        self.party()?.iter().find(|m| m.person == person)
    }

    /// Every member has accepted. Laptop bookings carry no party and
    /// are trivially satisfied.
    pub fn quorum_met(&self) -> bool {
        match &self.kind {
            BookingKind::Laptop => true,
            BookingKind::Cubicle { party } => {
                party.iter().all(|m| m.consent == Consent::Accepted)
            }
        }
    }

    /// `(still pending, rejected)` member counts, for error payloads.
    pub fn quorum_blockers(&self) -> (usize, usize) {
        let Some(party) = self.party() else { return (0, 0) };
        let pending = party.iter().filter(|m| m.consent == Consent::Pending).count();
        let rejected = party.iter().filter(|m| m.consent == Consent::Rejected).count();
        (pending, rejected)
    }
}

// ── loans ───────────────────────────────────────────────────────────

/// Stored loan lifecycle. Overdue is deliberately absent: it is a
/// function of the clock, not of anything that happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanState {
    Open,
    Finalized,
    FinalizedLate,
    Cancelled,
}

impl LoanState {
    pub fn is_terminal(&self) -> bool {
        *self != LoanState::Open
    }
}

/// Where a loan sits relative to today. Recomputed on every read; two
/// queries straddling midnight may legitimately disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanPhase {
    /// Requested, copy not yet handed over.
    AwaitingDelivery,
    /// Copy is out, inside the agreed dates.
    OnLoan,
    /// Copy is out past `end_date`.
    Overdue,
    Finalized,
    FinalizedLate,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct LoanRecord {
    pub id: Ulid,
    pub copy_id: Ulid,
    pub borrower: Ulid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub state: LoanState,
    /// Staff member who handed the copy over, once delivered.
    pub delivered_by: Option<Ulid>,
    pub returned_on: Option<NaiveDate>,
    pub created_at: NaiveDateTime,
}

impl LoanRecord {
    pub fn delivered(&self) -> bool {
        self.delivered_by.is_some()
    }

    pub fn phase(&self, today: NaiveDate) -> LoanPhase {
        match self.state {
            LoanState::Finalized => LoanPhase::Finalized,
            LoanState::FinalizedLate => LoanPhase::FinalizedLate,
            LoanState::Cancelled => LoanPhase::Cancelled,
            LoanState::Open if !self.delivered() => LoanPhase::AwaitingDelivery,
            LoanState::Open if today > self.end_date => LoanPhase::Overdue,
            LoanState::Open => LoanPhase::OnLoan,
        }
    }
}

// ── actors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Staff,
    Admin,
}

impl Role {
    /// Staff-or-above. Admins can do anything staff can.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Staff | Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Caller identity, passed into every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn student(id: Ulid) -> Self {
        Self { id, role: Role::Student }
    }

    pub fn staff(id: Ulid) -> Self {
        Self { id, role: Role::Staff }
    }

    pub fn admin(id: Ulid) -> Self {
        Self { id, role: Role::Admin }
    }
}

// ── events ──────────────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
/// Replaying these in order rebuilds full engine state, so each
/// variant carries exactly what its apply step needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ResourceRegistered {
        id: Ulid,
        kind: ResourceKind,
    },
    ResourceStatusChanged {
        id: Ulid,
        status: AdminStatus,
    },
    ResourceRemoved {
        id: Ulid,
    },
    LaptopReserved {
        id: Ulid,
        resource_id: Ulid,
        holder: Ulid,
        date: NaiveDate,
        window: Window,
        created_at: NaiveDateTime,
    },
    CubicleReserved {
        id: Ulid,
        resource_id: Ulid,
        holder: Ulid,
        date: NaiveDate,
        window: Window,
        invitees: Vec<Ulid>,
        created_at: NaiveDateTime,
    },
    InvitationAnswered {
        booking_id: Ulid,
        resource_id: Ulid,
        person: Ulid,
        accepted: bool,
    },
    /// Quorum reached — the reservation leaves `Pending`. The interval
    /// was already committed at creation time.
    BookingConfirmed {
        id: Ulid,
        resource_id: Ulid,
    },
    CheckedIn {
        booking_id: Ulid,
        resource_id: Ulid,
        staff: Ulid,
    },
    BookingFinalized {
        id: Ulid,
        resource_id: Ulid,
    },
    BookingCancelled {
        id: Ulid,
        resource_id: Ulid,
        date: NaiveDate,
    },
    LoanRequested {
        id: Ulid,
        copy_id: Ulid,
        borrower: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        created_at: NaiveDateTime,
    },
    LoanDelivered {
        id: Ulid,
        copy_id: Ulid,
        staff: Ulid,
    },
    LoanReturned {
        id: Ulid,
        copy_id: Ulid,
        returned_on: NaiveDate,
        late: bool,
    },
    LoanCancelled {
        id: Ulid,
        copy_id: Ulid,
    },
}

// ── query result types ──────────────────────────────────────────────

/// Snapshot of one resource for catalog queries.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub kind: ResourceKind,
    pub status: AdminStatus,
    pub effective: EffectiveStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(y: i32, mo: u32, da: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, mo, da).unwrap()
    }

    #[test]
    fn window_overlap_is_strict() {
        let a = Window::new(t(9, 0), t(11, 0));
        let b = Window::new(t(10, 0), t(12, 0));
        let c = Window::new(t(11, 0), t(13, 0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn window_instant_end_exclusive() {
        let w = Window::new(t(9, 0), t(11, 0));
        assert!(w.contains_instant(t(9, 0)));
        assert!(w.contains_instant(t(10, 59)));
        assert!(!w.contains_instant(t(11, 0))); // half-open
        assert!(!w.contains_instant(t(8, 59)));
    }

    #[test]
    fn window_containment_allows_aligned_edges() {
        let hours = Window::new(t(8, 0), t(20, 0));
        assert!(hours.contains(&Window::new(t(8, 0), t(20, 0)))); // self-containment
        assert!(hours.contains(&Window::new(t(18, 0), t(20, 0))));
        assert!(!hours.contains(&Window::new(t(19, 0), t(20, 30))));
        assert!(!hours.contains(&Window::new(t(7, 0), t(9, 0))));
    }

    #[test]
    fn window_duration() {
        let w = Window::new(t(9, 30), t(11, 0));
        assert_eq!(w.duration_minutes(), 90);
    }

    #[test]
    fn effective_status_prefers_admin_state() {
        let mut r = ResourceState::new(Ulid::new(), ResourceKind::Cubicle { capacity: 4 });
        assert_eq!(r.effective_status(), EffectiveStatus::Available);

        r.occupied_by = Some(Ulid::new());
        assert_eq!(r.effective_status(), EffectiveStatus::InUse);

        // admin status wins over occupancy
        r.status = AdminStatus::Maintenance;
        assert_eq!(r.effective_status(), EffectiveStatus::Maintenance);
    }

    #[test]
    fn effective_status_on_loan() {
        let mut r = ResourceState::new(
            Ulid::new(),
            ResourceKind::BookCopy { title: "Dune".into() },
        );
        r.active_loan = Some(Ulid::new());
        assert_eq!(r.effective_status(), EffectiveStatus::OnLoan);
    }

    #[test]
    fn quorum_counts_every_member() {
        let holder = Ulid::new();
        let guest = Ulid::new();
        let mut booking = BookingRecord {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            holder,
            date: d(2026, 3, 2),
            window: Window::new(t(9, 0), t(11, 0)),
            state: ReservationState::Pending,
            kind: BookingKind::Cubicle {
                party: vec![
                    Membership { person: holder, consent: Consent::Accepted },
                    Membership { person: guest, consent: Consent::Pending },
                ],
            },
            checked_in_by: None,
            created_at: d(2026, 3, 1).and_time(t(12, 0)),
        };
        assert!(!booking.quorum_met());
        assert_eq!(booking.quorum_blockers(), (1, 0));

        if let BookingKind::Cubicle { party } = &mut booking.kind {
            party[1].consent = Consent::Rejected;
        }
        assert!(!booking.quorum_met());
        assert_eq!(booking.quorum_blockers(), (0, 1));

        if let BookingKind::Cubicle { party } = &mut booking.kind {
            party[1].consent = Consent::Accepted;
        }
        assert!(booking.quorum_met());
        assert_eq!(booking.quorum_blockers(), (0, 0));
    }

    #[test]
    fn loan_phase_follows_the_calendar() {
        let mut loan = LoanRecord {
            id: Ulid::new(),
            copy_id: Ulid::new(),
            borrower: Ulid::new(),
            start_date: d(2026, 3, 2),
            end_date: d(2026, 3, 9),
            state: LoanState::Open,
            delivered_by: None,
            returned_on: None,
            created_at: d(2026, 3, 1).and_time(t(9, 0)),
        };
        assert_eq!(loan.phase(d(2026, 3, 2)), LoanPhase::AwaitingDelivery);

        loan.delivered_by = Some(Ulid::new());
        assert_eq!(loan.phase(d(2026, 3, 5)), LoanPhase::OnLoan);
        // the end date itself is still in-term
        assert_eq!(loan.phase(d(2026, 3, 9)), LoanPhase::OnLoan);
        assert_eq!(loan.phase(d(2026, 3, 10)), LoanPhase::Overdue);

        loan.state = LoanState::FinalizedLate;
        loan.returned_on = Some(d(2026, 3, 10));
        assert_eq!(loan.phase(d(2026, 3, 10)), LoanPhase::FinalizedLate);
        assert_eq!(loan.phase(d(2026, 3, 20)), LoanPhase::FinalizedLate);
    }

    #[test]
    fn terminal_states() {
        assert!(!ReservationState::Pending.is_terminal());
        assert!(!ReservationState::Active.is_terminal());
        assert!(ReservationState::Finalized.is_terminal());
        assert!(ReservationState::Cancelled.is_terminal());

        assert!(!LoanState::Open.is_terminal());
        assert!(LoanState::Finalized.is_terminal());
        assert!(LoanState::FinalizedLate.is_terminal());
        assert!(LoanState::Cancelled.is_terminal());
    }

    #[test]
    fn role_ladder() {
        assert!(!Role::Student.is_staff());
        assert!(Role::Staff.is_staff());
        assert!(Role::Admin.is_staff());
        assert!(!Role::Staff.is_admin());
        assert!(Role::Admin.is_admin());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::CubicleReserved {
            id: Ulid::new(),
            resource_id: Ulid::new(),
            holder: Ulid::new(),
            date: d(2026, 3, 2),
            window: Window::new(t(14, 0), t(16, 0)),
            invitees: vec![Ulid::new(), Ulid::new()],
            created_at: d(2026, 3, 1).and_time(t(10, 30)),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
