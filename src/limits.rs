//! Hard caps on unbounded inputs. Requests beyond these fail with
//! `EngineError::LimitExceeded`; nothing is ever truncated silently.

/// Resources a single engine will track.
pub const MAX_RESOURCES: usize = 10_000;

/// Booking records held in memory, terminal ones included.
pub const MAX_BOOKINGS: usize = 100_000;

/// Loan records held in memory, terminal ones included.
pub const MAX_LOANS: usize = 100_000;

/// Committed intervals per resource per date.
pub const MAX_INTERVALS_PER_DAY: usize = 64;

/// Cubicle party members, holder included.
pub const MAX_PARTY_SIZE: usize = 16;

/// Length of any free-text attribute (os, brand, title).
pub const MAX_LABEL_LEN: usize = 256;
