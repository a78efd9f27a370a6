use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::{ResourceFamily, Role, Window};

/// Broad cause of a failure. Transport layers map these to status
/// codes instead of matching on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected before any mutation; the request itself is malformed.
    Input,
    /// Someone else holds the window/copy; retry with different input.
    Conflict,
    /// Transition not valid from the current state.
    State,
    /// Valid transition attempted at the wrong wall-clock time.
    TemporalGate,
    /// Engine-side failure (persistence).
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    // ── input ───────────────────────────────────────────
    /// Loan request without both dates.
    MissingWindow,
    /// start >= end, or the window does not fit operating hours.
    InvalidWindow { start: NaiveTime, end: NaiveTime },
    EndBeforeStart { start: NaiveDate, end: NaiveDate },
    StartInPast { start: NaiveDate },
    DurationExceeded { days: i64, max_days: i64 },
    QuorumTooSmall { size: usize, min: usize },
    /// Operation aimed at the wrong resource family.
    KindMismatch { expected: ResourceFamily },
    LimitExceeded(&'static str),

    // ── conflict ────────────────────────────────────────
    AlreadyExists(Ulid),
    /// Window overlaps the named booking's committed interval.
    SlotTaken(Ulid),
    /// Copy already referenced by the named non-terminal loan.
    CopyOnLoan(Ulid),

    // ── state ───────────────────────────────────────────
    NotFound(Ulid),
    NotActive(Ulid),
    NotPending(Ulid),
    QuorumNotMet { pending: usize, rejected: usize },
    AlreadyConfirmed(Ulid),
    AlreadyCheckedIn(Ulid),
    NotCheckedIn(Ulid),
    AlreadyAssigned(Ulid),
    NotDelivered(Ulid),
    AlreadyReturned(Ulid),
    AlreadyDelivered(Ulid),
    ResourceUnavailable(Ulid),
    /// Resource still has live bookings or an open loan.
    ResourceBusy(Ulid),
    Forbidden { required: Role },

    // ── temporal gate ───────────────────────────────────
    OutsideWindow { gate: &'static str, window: Window },
    SameDayCutoff { cutoff: NaiveTime },
    NotYetStarted { start_date: NaiveDate },
    Overdue { end_date: NaiveDate },
    InProgressOrOverdue(Ulid),

    // ── internal ────────────────────────────────────────
    WalError(String),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        use EngineError::*;
        match self {
            MissingWindow
            | InvalidWindow { .. }
            | EndBeforeStart { .. }
            | StartInPast { .. }
            | DurationExceeded { .. }
            | QuorumTooSmall { .. }
            | KindMismatch { .. }
            | LimitExceeded(_) => ErrorCategory::Input,

            AlreadyExists(_) | SlotTaken(_) | CopyOnLoan(_) => ErrorCategory::Conflict,

            NotFound(_)
            | NotActive(_)
            | NotPending(_)
            | QuorumNotMet { .. }
            | AlreadyConfirmed(_)
            | AlreadyCheckedIn(_)
            | NotCheckedIn(_)
            | AlreadyAssigned(_)
            | NotDelivered(_)
            | AlreadyReturned(_)
            | AlreadyDelivered(_)
            | ResourceUnavailable(_)
            | ResourceBusy(_)
            | Forbidden { .. } => ErrorCategory::State,

            OutsideWindow { .. }
            | SameDayCutoff { .. }
            | NotYetStarted { .. }
            | Overdue { .. }
            | InProgressOrOverdue(_) => ErrorCategory::TemporalGate,

            WalError(_) => ErrorCategory::Internal,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::MissingWindow => write!(f, "loan window requires both dates"),
            EngineError::InvalidWindow { start, end } => {
                write!(f, "invalid window [{start}, {end})")
            }
            EngineError::EndBeforeStart { start, end } => {
                write!(f, "end date {end} is before start date {start}")
            }
            EngineError::StartInPast { start } => {
                write!(f, "start date {start} is in the past")
            }
            EngineError::DurationExceeded { days, max_days } => {
                write!(f, "loan of {days} days exceeds maximum of {max_days}")
            }
            EngineError::QuorumTooSmall { size, min } => {
                write!(f, "party of {size} is below the minimum of {min}")
            }
            EngineError::KindMismatch { expected } => {
                write!(f, "resource is not a {expected:?}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotTaken(id) => write!(f, "window overlaps booking: {id}"),
            EngineError::CopyOnLoan(id) => write!(f, "copy already out on loan: {id}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::NotActive(id) => write!(f, "booking not active: {id}"),
            EngineError::NotPending(id) => write!(f, "reservation no longer pending: {id}"),
            EngineError::QuorumNotMet { pending, rejected } => {
                write!(f, "quorum not met: {pending} pending, {rejected} rejected")
            }
            EngineError::AlreadyConfirmed(id) => {
                write!(f, "staff already confirmed booking: {id}")
            }
            EngineError::AlreadyCheckedIn(id) => write!(f, "already checked in: {id}"),
            EngineError::NotCheckedIn(id) => {
                write!(f, "cannot finalize before check-in: {id}")
            }
            EngineError::AlreadyAssigned(id) => {
                write!(f, "staff already assigned to loan: {id}")
            }
            EngineError::NotDelivered(id) => write!(f, "loan not yet delivered: {id}"),
            EngineError::AlreadyReturned(id) => write!(f, "loan already returned: {id}"),
            EngineError::AlreadyDelivered(id) => {
                write!(f, "loan already delivered: {id}")
            }
            EngineError::ResourceUnavailable(id) => {
                write!(f, "resource not available for booking: {id}")
            }
            EngineError::ResourceBusy(id) => {
                write!(f, "resource has live allocations: {id}")
            }
            EngineError::Forbidden { required } => {
                write!(f, "requires {required:?} role")
            }
            EngineError::OutsideWindow { gate, window } => {
                write!(
                    f,
                    "{gate} only allowed between {} and {}",
                    window.start, window.end
                )
            }
            EngineError::SameDayCutoff { cutoff } => {
                write!(f, "same-day loans must be requested before {cutoff}")
            }
            EngineError::NotYetStarted { start_date } => {
                write!(f, "loan does not start until {start_date}")
            }
            EngineError::Overdue { end_date } => {
                write!(f, "loan ended {end_date} and is overdue")
            }
            EngineError::InProgressOrOverdue(id) => {
                write!(f, "loan already started, cannot cancel: {id}")
            }
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn categories_follow_the_taxonomy() {
        assert_eq!(EngineError::MissingWindow.category(), ErrorCategory::Input);
        assert_eq!(
            EngineError::SlotTaken(Ulid::new()).category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            EngineError::NotActive(Ulid::new()).category(),
            ErrorCategory::State
        );
        assert_eq!(
            EngineError::SameDayCutoff { cutoff: t(12) }.category(),
            ErrorCategory::TemporalGate
        );
        assert_eq!(
            EngineError::WalError("disk full".into()).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn display_names_the_blocking_detail() {
        let err = EngineError::OutsideWindow {
            gate: "delivery",
            window: Window::new(t(10), t(12)),
        };
        let msg = err.to_string();
        assert!(msg.contains("delivery"));
        assert!(msg.contains("10:00"));

        let err = EngineError::QuorumNotMet { pending: 2, rejected: 1 };
        assert!(err.to_string().contains("2 pending"));
    }
}
