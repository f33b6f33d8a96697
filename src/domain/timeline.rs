//! Append-only timeline of stages for a single attempt.

use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};

use super::stage::{Stage, StagePayload};

const INITIAL_CAPACITY: usize = 16;

/// Ordered stages of one request attempt.
///
/// Stages recorded through [`Timeline::record`] are stamped from a wall-clock origin
/// plus a monotonic offset, so timestamps never decrease even if the system clock
/// steps backwards mid-attempt.
#[derive(Debug, Clone)]
pub struct Timeline {
    started_at: DateTime<Utc>,
    origin: Instant,
    stages: Vec<Stage>,
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            origin: Instant::now(),
            stages: Vec::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Wall-clock instant the timeline was created.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current time on this timeline's monotonic clock.
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.origin.elapsed()).unwrap_or(TimeDelta::MAX);
        self.started_at
            .checked_add_signed(elapsed)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Stamp `payload` with the current time and append it.
    pub fn record(&mut self, payload: StagePayload) {
        let stage = Stage::at(payload, self.now());
        self.append(stage);
    }

    /// Add a stage at the end of the sequence.
    ///
    /// A stage stamped earlier than the current last stage takes the last stage's
    /// timestamp so the sequence stays non-decreasing.
    pub fn append(&mut self, stage: Stage) {
        let stage = match self.stages.last() {
            Some(last) if stage.timestamp() < last.timestamp() => stage.restamped(last.timestamp()),
            _ => stage,
        };
        self.stages.push(stage);
    }

    /// Read-only view of the stages recorded so far.
    pub fn snapshot(&self) -> &[Stage] {
        &self.stages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Stage> {
        self.stages.iter()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn into_stages(self) -> Vec<Stage> {
        self.stages
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IntoIterator for &'a Timeline {
    type Item = &'a Stage;
    type IntoIter = std::slice::Iter<'a, Stage>;

    fn into_iter(self) -> Self::IntoIter {
        self.stages.iter()
    }
}
