pub mod clock;
pub mod engine;
pub mod index;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod reaper;
pub mod wal;

pub use engine::{AvailabilityFilter, Engine, EngineError, ErrorCategory, ResourceAvailability};
