//! Domain types for conntrace
//!
//! - Stage: one timestamped lifecycle event with a typed payload
//! - Timeline: the ordered stages of one attempt
//! - AttemptOutcome: completed, transport failure or setup failure
//! - AttemptRecord: the persisted form of an attempt

pub mod attempt;
pub mod outcome;
pub mod stage;
pub mod timeline;

pub use attempt::{Attempt, AttemptRecord, OutcomeRecord};
pub use outcome::AttemptOutcome;
pub use stage::{ConnInfo, Stage, StageKind, StagePayload, StageRecord, TlsState};
pub use timeline::Timeline;
