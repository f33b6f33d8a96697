//! Persistence sink trait and an in-memory implementation.

use crate::domain::AttemptRecord;
use crate::error::Result;

/// Receives one record per attempt, in attempt order.
///
/// Constructed once per run. An error from `persist` aborts the run.
pub trait TimelineSink: Send {
    fn persist(&mut self, record: &AttemptRecord) -> Result<()>;
}

impl<S: TimelineSink + ?Sized> TimelineSink for &mut S {
    fn persist(&mut self, record: &AttemptRecord) -> Result<()> {
        (**self).persist(record)
    }
}

impl<S: TimelineSink + ?Sized> TimelineSink for Box<S> {
    fn persist(&mut self, record: &AttemptRecord) -> Result<()> {
        (**self).persist(record)
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Vec<AttemptRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<AttemptRecord> {
        self.records
    }
}

impl TimelineSink for MemorySink {
    fn persist(&mut self, record: &AttemptRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}
