//! Console progress for the capture loop.

use std::path::PathBuf;

use colored::*;
use conntrace::domain::{AttemptRecord, OutcomeRecord};
use conntrace::runner::{LoopSummary, Reporter, StopReason};
use conntrace::storage::artifact_name;

use super::show::{describe_outcome, render_stages};

/// Prints one line per attempt; with `verbose`, the whole timeline too.
pub struct ConsoleReporter {
    out_dir: PathBuf,
    verbose: bool,
    last_artifact: Option<PathBuf>,
}

impl ConsoleReporter {
    pub fn new(out_dir: PathBuf, verbose: bool) -> Self {
        Self {
            out_dir,
            verbose,
            last_artifact: None,
        }
    }
}

pub fn elapsed_ms(record: &AttemptRecord) -> i64 {
    (record.finished_at - record.started_at).num_milliseconds()
}

impl Reporter for ConsoleReporter {
    fn attempt_finished(&mut self, record: &AttemptRecord) {
        let label = format!("attempt {:>6}", record.attempt);
        let outcome = describe_outcome(&record.outcome);
        let detail = format!("({} stages, {}ms)", record.stages.len(), elapsed_ms(record));
        match &record.outcome {
            OutcomeRecord::Completed { .. } => println!("{} {} {}", label.cyan(), outcome.green(), detail.dimmed()),
            OutcomeRecord::SetupFailure { .. } => println!("{} {} {}", label.cyan(), outcome.yellow(), detail.dimmed()),
            OutcomeRecord::TransportFailure { .. } => println!("{} {} {}", label.cyan(), outcome.red(), detail.dimmed()),
        }
        if self.verbose {
            for line in render_stages(&record.stages) {
                println!("{}", line.dimmed());
            }
        }
        self.last_artifact = Some(self.out_dir.join(artifact_name(record)));
    }

    fn stopped(&mut self, summary: &LoopSummary) {
        let artifact = self
            .last_artifact
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        match summary.stop {
            StopReason::FailureFound { attempt } => {
                println!("{} on attempt {}", "connection error found".red().bold(), attempt);
                println!("{} {}", "Timeline:".green(), artifact);
            }
            StopReason::Cancelled { attempts } => {
                println!("{} after {} attempts", "Cancelled".yellow(), attempts);
                if attempts > 0 {
                    println!("{} {}", "Last timeline:".green(), artifact);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_reporter_tracks_last_artifact_path() {
        let record = AttemptRecord {
            run_id: "r".into(),
            attempt: 2,
            started_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            finished_at: Utc.timestamp_opt(1_700_000_001, 0).unwrap(),
            outcome: OutcomeRecord::Completed { status: 200 },
            stages: vec![],
        };
        let mut reporter = ConsoleReporter::new(PathBuf::from("out"), false);
        reporter.attempt_finished(&record);

        assert_eq!(elapsed_ms(&record), 1000);
        assert_eq!(reporter.last_artifact, Some(PathBuf::from("out/1700000000-000002-log.jsonl")));
    }
}
