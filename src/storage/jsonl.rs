//! JSONL artifact files, one per attempt.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::debug;

use super::traits::TimelineSink;
use crate::domain::AttemptRecord;
use crate::error::{ConntraceError, Result};

const SUFFIX: &str = "-log.jsonl";

/// Writes `<dir>/<unix-start>-<attempt:06>-log.jsonl` for every attempt.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    dir: PathBuf,
}

impl JsonlSink {
    /// Create the output directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, record: &AttemptRecord) -> PathBuf {
        self.dir.join(artifact_name(record))
    }
}

pub fn artifact_name(record: &AttemptRecord) -> String {
    format!("{}-{:06}{}", record.started_at.timestamp(), record.attempt, SUFFIX)
}

impl TimelineSink for JsonlSink {
    /// Blocking write and fsync. The caller's task waits until the artifact is durable.
    fn persist(&mut self, record: &AttemptRecord) -> Result<()> {
        let path = self.artifact_path(record);
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| ConntraceError::Storage(format!("creating {}: {}", path.display(), e)))?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        file.sync_all()?;
        debug!("persisted attempt {} to {}", record.attempt, path.display());
        Ok(())
    }
}

/// Read every record in an artifact file.
pub fn read_artifact(path: impl AsRef<Path>) -> Result<Vec<AttemptRecord>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ConntraceError::Storage(format!("opening {}: {}", path.display(), e)))?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            records.push(serde_json::from_str(&line)?);
        }
    }
    Ok(records)
}

/// The artifact with the highest `(unix-start, attempt)` in `dir`, if any.
pub fn latest_artifact(dir: impl AsRef<Path>) -> Result<Option<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(None);
    }
    let mut newest: Option<((i64, u64), PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(key) = path.file_name().and_then(|name| name.to_str()).and_then(sort_key) else {
            continue;
        };
        if newest.as_ref().is_none_or(|(best, _)| key > *best) {
            newest = Some((key, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

fn sort_key(name: &str) -> Option<(i64, u64)> {
    let stem = name.strip_suffix(SUFFIX)?;
    let (start, attempt) = stem.split_once('-')?;
    Some((start.parse().ok()?, attempt.parse().ok()?))
}
