//! Per-run event journal.
//!
//! Milestones of a run are appended to `<run root>/events.jsonl`, one JSON
//! object per line, flushed as they happen so a killed runner still leaves
//! a readable journal.

use crate::artifacts::{ArtifactError, ArtifactHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const EVENTS_FILE: &str = "events.jsonl";

/// One line of the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub ts: DateTime<Utc>,

    /// Dotted event name, e.g. `process.finished`.
    pub event: String,

    pub data: Value,
}

impl EventRecord {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            ts: Utc::now(),
            event: event.into(),
            data,
        }
    }
}

/// Append-only journal writer. Write failures are logged once; later
/// records are dropped.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    inner: Option<LineWriter<File>>,
    counts: BTreeMap<String, u32>,
}

impl EventLog {
    pub fn open(handle: &ArtifactHandle) -> Result<Self, ArtifactError> {
        let path = handle.root().join(EVENTS_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ArtifactError::io(&path, e))?;
        Ok(Self {
            path,
            inner: Some(LineWriter::new(file)),
            counts: BTreeMap::new(),
        })
    }

    /// A journal that records counts but writes nothing.
    pub fn disabled() -> Self {
        Self {
            path: PathBuf::new(),
            inner: None,
            counts: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, event: &str, data: Value) {
        *self.counts.entry(event.to_string()).or_default() += 1;
        let Some(inner) = self.inner.as_mut() else {
            return;
        };
        let record = EventRecord::new(event, data);
        let written = serde_json::to_string(&record)
            .map_err(std::io::Error::other)
            .and_then(|line| writeln!(inner, "{line}"));
        if let Err(e) = written {
            warn!(path = %self.path.display(), error = %e, "Failed to write event; journal disabled");
            self.inner = None;
        }
    }

    /// How many times `event` was recorded.
    pub fn count(&self, event: &str) -> u32 {
        self.counts.get(event).copied().unwrap_or(0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads a journal back, skipping lines that do not parse.
pub fn read_events(path: &Path) -> Result<Vec<EventRecord>, ArtifactError> {
    let content = std::fs::read_to_string(path).map_err(|e| ArtifactError::io(path, e))?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
