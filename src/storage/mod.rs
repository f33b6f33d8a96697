//! Storage layer for conntrace - where attempt records go.
//!
//! The loop hands each [`AttemptRecord`](crate::domain::AttemptRecord) to a
//! [`TimelineSink`]. [`JsonlSink`] writes one artifact file per attempt; [`MemorySink`]
//! keeps records in memory.

mod jsonl;
mod traits;

pub use jsonl::{JsonlSink, artifact_name, latest_artifact, read_artifact};
pub use traits::{MemorySink, TimelineSink};
