//! Backend-side services: reservation issuance, session handoff, and the
//! minimal session record store, plus the bus glue that ties them to a
//! server id.

pub mod handoff;
pub mod host;
pub mod reservation;
pub mod session;

pub use handoff::{HandoffRecord, HandoffStore};
pub use host::{BackendHost, JoinDecision};
pub use reservation::{ReservationRecord, ReservationService};
pub use session::{EnvironmentSegment, PlayerSessionRecord, SessionRecordStore};
