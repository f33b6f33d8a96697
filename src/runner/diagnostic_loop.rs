//! The capture loop: attempt, persist, decide, repeat.
//!
//! Attempts run back to back with no delay and no cap until one ends in a transport
//! failure or the run is cancelled.

use chrono::Utc;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use super::executor::AttemptExecutor;
use crate::domain::{AttemptOutcome, AttemptRecord};
use crate::error::Result;
use crate::id::generate_run_id;
use crate::storage::TimelineSink;

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Attempt `attempt` ended in a transport failure
    FailureFound { attempt: u64 },
    /// Cancellation was observed after `attempts` attempts
    Cancelled { attempts: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped(StopReason),
}

impl LoopState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped(_))
    }
}

/// What a finished run reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSummary {
    pub run_id: String,
    pub attempts: u64,
    pub stop: StopReason,
}

/// Progress callbacks for the console.
pub trait Reporter: Send {
    fn attempt_finished(&mut self, _record: &AttemptRecord) {}

    fn stopped(&mut self, _summary: &LoopSummary) {}
}

/// Reports nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl Reporter for SilentReporter {}

pub struct DiagnosticLoop<E, S>
where
    E: AttemptExecutor,
    S: TimelineSink,
{
    executor: E,
    sink: S,
    run_id: String,
    state: LoopState,
    attempts: u64,
}

impl<E, S> DiagnosticLoop<E, S>
where
    E: AttemptExecutor,
    S: TimelineSink,
{
    pub fn new(executor: E, sink: S) -> Self {
        Self::with_run_id(executor, sink, generate_run_id(Utc::now()))
    }

    pub fn with_run_id(executor: E, sink: S, run_id: impl Into<String>) -> Self {
        Self {
            executor,
            sink,
            run_id: run_id.into(),
            state: LoopState::Running,
            attempts: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn into_parts(self) -> (E, S) {
        (self.executor, self.sink)
    }

    /// Run until stopped. A persistence error aborts the run immediately.
    pub async fn run(&mut self, cancel: &CancellationToken, reporter: &mut dyn Reporter) -> Result<LoopSummary> {
        info!("run {} starting", self.run_id);
        loop {
            if let LoopState::Stopped(stop) = &self.state {
                let summary = LoopSummary {
                    run_id: self.run_id.clone(),
                    attempts: self.attempts,
                    stop: stop.clone(),
                };
                reporter.stopped(&summary);
                return Ok(summary);
            }

            if cancel.is_cancelled() {
                info!("run {} cancelled after {} attempts", self.run_id, self.attempts);
                self.state = LoopState::Stopped(StopReason::Cancelled {
                    attempts: self.attempts,
                });
                continue;
            }

            let number = self.attempts + 1;
            let attempt = self.executor.execute(number, cancel).await;
            self.attempts = number;

            let record = AttemptRecord::new(&self.run_id, number, &attempt);
            // Synchronous on the loop task: no attempt is in flight while the artifact is written.
            self.sink.persist(&record)?;
            reporter.attempt_finished(&record);

            self.state = next_state(&attempt.outcome, number);
        }
    }
}

fn next_state(outcome: &AttemptOutcome, attempt: u64) -> LoopState {
    match outcome {
        AttemptOutcome::TransportFailure(err) if err.is_cancelled() => {
            info!("attempt {} cancelled in flight", attempt);
            LoopState::Stopped(StopReason::Cancelled { attempts: attempt })
        }
        AttemptOutcome::TransportFailure(err) => {
            warn!("attempt {}: connection error found: {}", attempt, err);
            LoopState::Stopped(StopReason::FailureFound { attempt })
        }
        AttemptOutcome::Completed { status } => {
            info!("attempt {}: {}", attempt, status);
            LoopState::Running
        }
        AttemptOutcome::SetupFailure(message) => {
            warn!("attempt {}: setup failure: {}", attempt, message);
            LoopState::Running
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Attempt, OutcomeRecord, StagePayload, Timeline};
    use crate::error::ConntraceError;
    use crate::storage::MemorySink;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use http::StatusCode;
    use std::collections::VecDeque;

    enum Step {
        Ok(u16),
        Fail,
        Setup,
        Cancelled,
        /// Completes, but cancels the run token first
        CancelAfter,
    }

    struct ScriptedExecutor {
        steps: VecDeque<Step>,
        calls: u64,
        cancel: Option<CancellationToken>,
    }

    impl ScriptedExecutor {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                calls: 0,
                cancel: None,
            }
        }
    }

    #[async_trait]
    impl AttemptExecutor for ScriptedExecutor {
        async fn execute(&mut self, _attempt: u64, _cancel: &CancellationToken) -> Attempt {
            self.calls += 1;
            let mut timeline = Timeline::new();
            timeline.record(StagePayload::GetConn {
                host_port: "scripted:80".into(),
            });
            let outcome = match self.steps.pop_front() {
                Some(Step::Ok(code)) => AttemptOutcome::completed(StatusCode::from_u16(code).unwrap()),
                Some(Step::Fail) => AttemptOutcome::TransportFailure(TransportError::Protocol("boom".into())),
                Some(Step::Setup) => AttemptOutcome::SetupFailure("bad url".into()),
                Some(Step::Cancelled) => AttemptOutcome::TransportFailure(TransportError::Cancelled),
                Some(Step::CancelAfter) => {
                    if let Some(cancel) = &self.cancel {
                        cancel.cancel();
                    }
                    AttemptOutcome::completed(StatusCode::OK)
                }
                None => panic!("script exhausted"),
            };
            Attempt::new(timeline, outcome)
        }
    }

    struct FailingSink;

    impl TimelineSink for FailingSink {
        fn persist(&mut self, _record: &AttemptRecord) -> Result<()> {
            Err(ConntraceError::Storage("disk full".into()))
        }
    }

    #[derive(Default)]
    struct CountingReporter {
        finished: usize,
        stopped: Option<LoopSummary>,
    }

    impl Reporter for CountingReporter {
        fn attempt_finished(&mut self, _record: &AttemptRecord) {
            self.finished += 1;
        }

        fn stopped(&mut self, summary: &LoopSummary) {
            self.stopped = Some(summary.clone());
        }
    }

    #[tokio::test]
    async fn test_loop_stops_on_first_transport_failure() {
        let executor = ScriptedExecutor::new(vec![Step::Ok(200), Step::Ok(500), Step::Fail]);
        let mut runner = DiagnosticLoop::with_run_id(executor, MemorySink::new(), "run-test");
        let mut reporter = CountingReporter::default();

        let summary = runner.run(&CancellationToken::new(), &mut reporter).await.unwrap();

        assert_eq!(summary.attempts, 3);
        assert_eq!(summary.stop, StopReason::FailureFound { attempt: 3 });
        assert_eq!(reporter.finished, 3);
        assert_eq!(reporter.stopped, Some(summary));
        assert!(runner.state().is_stopped());

        let (executor, sink) = runner.into_parts();
        assert_eq!(executor.calls, 3);
        let records = sink.into_records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].outcome, OutcomeRecord::Completed { status: 500 });
        assert!(records[2].outcome.is_transport_failure());
        assert!(records.iter().all(|r| r.run_id == "run-test"));
        assert_eq!(records.iter().map(|r| r.attempt).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_setup_failure_does_not_stop_the_loop() {
        let executor = ScriptedExecutor::new(vec![Step::Setup, Step::Ok(204), Step::Fail]);
        let mut runner = DiagnosticLoop::new(executor, MemorySink::new());

        let summary = runner.run(&CancellationToken::new(), &mut SilentReporter).await.unwrap();

        assert_eq!(summary.attempts, 3);
        let (_, sink) = runner.into_parts();
        assert!(matches!(sink.records()[0].outcome, OutcomeRecord::SetupFailure { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut runner = DiagnosticLoop::new(ScriptedExecutor::new(vec![]), MemorySink::new());

        let summary = runner.run(&cancel, &mut SilentReporter).await.unwrap();

        assert_eq!(summary.attempts, 0);
        assert_eq!(summary.stop, StopReason::Cancelled { attempts: 0 });
        assert!(runner.into_parts().1.records().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_between_attempts() {
        let cancel = CancellationToken::new();
        let mut executor = ScriptedExecutor::new(vec![Step::Ok(200), Step::CancelAfter, Step::Ok(200)]);
        executor.cancel = Some(cancel.clone());
        let mut runner = DiagnosticLoop::new(executor, MemorySink::new());

        let summary = runner.run(&cancel, &mut SilentReporter).await.unwrap();

        assert_eq!(summary.stop, StopReason::Cancelled { attempts: 2 });
        assert_eq!(runner.into_parts().1.records().len(), 2);
    }

    #[tokio::test]
    async fn test_in_flight_cancellation_is_persisted() {
        let executor = ScriptedExecutor::new(vec![Step::Ok(200), Step::Cancelled]);
        let mut runner = DiagnosticLoop::new(executor, MemorySink::new());

        let summary = runner.run(&CancellationToken::new(), &mut SilentReporter).await.unwrap();

        assert_eq!(summary.stop, StopReason::Cancelled { attempts: 2 });
        let (_, sink) = runner.into_parts();
        assert_eq!(
            sink.records()[1].outcome,
            OutcomeRecord::TransportFailure {
                error_kind: "cancelled".into(),
                error: "request cancelled".into()
            }
        );
    }

    #[tokio::test]
    async fn test_persistence_error_aborts_run() {
        let executor = ScriptedExecutor::new(vec![Step::Ok(200), Step::Ok(200)]);
        let mut runner = DiagnosticLoop::new(executor, FailingSink);
        let mut reporter = CountingReporter::default();

        let err = runner.run(&CancellationToken::new(), &mut reporter).await.unwrap_err();

        assert!(err.to_string().contains("disk full"));
        assert_eq!(runner.attempts(), 1);
        assert_eq!(reporter.finished, 0);
        assert!(reporter.stopped.is_none());
    }

    #[test]
    fn test_next_state_transitions() {
        assert_eq!(next_state(&AttemptOutcome::completed(StatusCode::OK), 1), LoopState::Running);
        assert_eq!(
            next_state(&AttemptOutcome::TransportFailure(TransportError::Protocol("x".into())), 4),
            LoopState::Stopped(StopReason::FailureFound { attempt: 4 })
        );
    }
}
