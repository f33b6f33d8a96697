//! One request attempt and its persisted record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::AttemptOutcome;
use super::stage::StageRecord;
use super::timeline::Timeline;

/// Result of one executor invocation: the timeline plus its classification.
#[derive(Debug)]
pub struct Attempt {
    pub timeline: Timeline,
    pub outcome: AttemptOutcome,
    pub finished_at: DateTime<Utc>,
}

impl Attempt {
    pub fn new(timeline: Timeline, outcome: AttemptOutcome) -> Self {
        let finished_at = timeline.now();
        Self {
            timeline,
            outcome,
            finished_at,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.timeline.started_at()
    }
}

/// Serializable outcome, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeRecord {
    Completed { status: u16 },
    TransportFailure { error_kind: String, error: String },
    SetupFailure { error: String },
}

impl From<&AttemptOutcome> for OutcomeRecord {
    fn from(outcome: &AttemptOutcome) -> Self {
        match outcome {
            AttemptOutcome::Completed { status } => Self::Completed {
                status: status.as_u16(),
            },
            AttemptOutcome::TransportFailure(err) => Self::TransportFailure {
                error_kind: err.kind().to_string(),
                error: err.to_string(),
            },
            AttemptOutcome::SetupFailure(message) => Self::SetupFailure {
                error: message.clone(),
            },
        }
    }
}

impl OutcomeRecord {
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Self::TransportFailure { .. })
    }
}

/// What the persistence sink receives for each attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub run_id: String,
    pub attempt: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: OutcomeRecord,
    pub stages: Vec<StageRecord>,
}

impl AttemptRecord {
    pub fn new(run_id: &str, attempt_number: u64, attempt: &Attempt) -> Self {
        Self {
            run_id: run_id.to_string(),
            attempt: attempt_number,
            started_at: attempt.started_at(),
            finished_at: attempt.finished_at,
            outcome: OutcomeRecord::from(&attempt.outcome),
            stages: attempt.timeline.iter().map(|stage| stage.to_record()).collect(),
        }
    }
}
