//! Runner module - executes attempts and drives the capture loop.
//!
//! This module provides:
//! - AttemptExecutor / InstrumentedExecutor for one traced request
//! - DiagnosticLoop for repeating attempts until a transport failure

mod diagnostic_loop;
mod executor;

pub use diagnostic_loop::{DiagnosticLoop, LoopState, LoopSummary, Reporter, SilentReporter, StopReason};
pub use executor::{AttemptExecutor, InstrumentedExecutor, RequestTemplate};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let state = LoopState::Running;
        assert!(!state.is_stopped());
        assert_eq!(RequestTemplate::get("http://example.com/").method, "GET");
    }
}
