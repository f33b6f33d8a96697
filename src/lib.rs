//! Conntrace - HTTP connection lifecycle diagnostics
//!
//! Conntrace sends the same request over and over through an instrumented HTTP/1.1
//! transport, records every connection lifecycle event of each attempt on a
//! timeline, persists that timeline, and stops at the first transport-level failure.

pub mod domain;
pub mod error;
pub mod id;
pub mod runner;
pub mod storage;
pub mod trace;
pub mod transport;

pub use error::{ConntraceError, Result};
