//! Run-scoped artifact directories.
//!
//! Layout under the artifacts root:
//!
//! ```text
//! <root>/<run_id>/
//!   logs/stdout.log
//!   logs/stderr.log
//!   logs/player.log            (written by the executable when requested)
//!   screenshots/screenshot_<UTC timestamp>.png
//!   episode_payload.json
//!   episode_response.json      (delivered)
//!   episode_pending.json       (not delivered)
//!   events.jsonl               (run journal)
//!   report_last_run.md         (plan report copy)
//! ```
//!
//! The supervising task owns `logs/` and the sampler owns `screenshots/`, so
//! neither needs a lock. Report files are written only after both are done.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use runner_proto::{CapturedImage, EpisodeArtifacts, RunMode};
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const LOGS_DIR: &str = "logs";
pub const SCREENSHOTS_DIR: &str = "screenshots";
pub const PAYLOAD_FILE: &str = "episode_payload.json";
pub const RESPONSE_FILE: &str = "episode_response.json";
pub const PENDING_FILE: &str = "episode_pending.json";
pub const PLAYER_LOG_FILE: &str = "player.log";

const MAX_COLLISION_SUFFIX: u32 = 1000;

/// Which child output channel a log file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn file_name(self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout.log",
            LogStream::Stderr => "stderr.log",
        }
    }
}

/// Builds a run identifier: `<UTC timestamp>_<mode>_<project>_<build>`.
pub fn run_id(now: DateTime<Utc>, mode: RunMode, project: &str, build_id: &str) -> String {
    format!(
        "{}_{}_{}_{}",
        now.format("%Y%m%d_%H%M%S"),
        mode,
        slugify(project),
        slugify(build_id)
    )
}

/// Lowercase ASCII slug; runs of other characters collapse to one `-`.
pub fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug.to_string()
    }
}

/// Root under which every run gets its own directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the directory tree for `run_id`.
    ///
    /// An existing directory is never reused: on collision `-2`, `-3`, ... is
    /// appended to the identifier.
    pub fn open(&self, run_id: &str) -> Result<ArtifactHandle, ArtifactError> {
        std::fs::create_dir_all(&self.root).map_err(|e| ArtifactError::io(&self.root, e))?;
        let root = std::path::absolute(&self.root).map_err(|e| ArtifactError::io(&self.root, e))?;

        let mut attempt = 1;
        let (run_id, run_root) = loop {
            let candidate = if attempt == 1 {
                run_id.to_string()
            } else {
                format!("{run_id}-{attempt}")
            };
            let path = root.join(&candidate);
            match std::fs::create_dir(&path) {
                Ok(()) => break (candidate, path),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < MAX_COLLISION_SUFFIX => {
                    attempt += 1;
                }
                Err(e) => return Err(ArtifactError::io(&path, e)),
            }
        };

        let handle = ArtifactHandle {
            logs_dir: run_root.join(LOGS_DIR),
            screenshots_dir: run_root.join(SCREENSHOTS_DIR),
            run_id,
            root: run_root,
        };
        for dir in [&handle.logs_dir, &handle.screenshots_dir] {
            std::fs::create_dir(dir).map_err(|e| ArtifactError::io(dir, e))?;
        }
        debug!(run_id = %handle.run_id, root = %handle.root.display(), "Artifact directories created");
        Ok(handle)
    }
}

/// An opened run directory. Every writer it hands out flushes on drop.
#[derive(Debug, Clone)]
pub struct ArtifactHandle {
    run_id: String,
    root: PathBuf,
    logs_dir: PathBuf,
    screenshots_dir: PathBuf,
}

impl ArtifactHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Absolute path of the run root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the executable is asked to write its own log.
    pub fn player_log_path(&self) -> PathBuf {
        self.logs_dir.join(PLAYER_LOG_FILE)
    }

    pub fn pending_path(&self) -> PathBuf {
        self.root.join(PENDING_FILE)
    }

    /// Opens the append-only log file for one output stream.
    pub fn log_writer(&self, stream: LogStream) -> Result<LogWriter, ArtifactError> {
        let path = self.logs_dir.join(stream.file_name());
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ArtifactError::io(&path, e))?;
        Ok(LogWriter {
            path,
            inner: LineWriter::new(file),
            failed: false,
        })
    }

    /// Writer for the screenshots area, owned by the sampler.
    pub fn screenshot_writer(&self) -> ScreenshotWriter {
        ScreenshotWriter {
            dir: self.screenshots_dir.clone(),
            last: None,
        }
    }

    /// The exact bytes offered to the ingestion endpoint.
    pub fn write_payload(&self, payload: &[u8]) -> Result<PathBuf, ArtifactError> {
        self.write_atomic(PAYLOAD_FILE, payload)
    }

    /// Persists an undelivered payload for later replay.
    pub fn write_pending_report(&self, payload: &[u8]) -> Result<PathBuf, ArtifactError> {
        self.write_atomic(PENDING_FILE, payload)
    }

    pub fn write_response(&self, body: &[u8]) -> Result<PathBuf, ArtifactError> {
        self.write_atomic(RESPONSE_FILE, body)
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, ArtifactError> {
        let path = self.root.join(name);
        write_atomic(&path, bytes)?;
        Ok(path)
    }

    /// Absolute paths of every log and screenshot written so far, sorted.
    pub fn paths(&self) -> Result<EpisodeArtifacts, ArtifactError> {
        Ok(EpisodeArtifacts {
            logs: list_files(&self.logs_dir)?,
            screenshots: list_files(&self.screenshots_dir)?,
        })
    }
}

/// Writes `<path>.tmp` and renames it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);
    std::fs::write(&tmp_path, bytes).map_err(|e| ArtifactError::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| ArtifactError::io(path, e))
}

fn list_files(dir: &Path) -> Result<Vec<String>, ArtifactError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| ArtifactError::io(dir, e))? {
        let entry = entry.map_err(|e| ArtifactError::io(dir, e))?;
        let is_file = entry
            .file_type()
            .map_err(|e| ArtifactError::io(&entry.path(), e))?
            .is_file();
        if is_file {
            files.push(entry.path().to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(files)
}

/// Line-buffered, append-only writer for one child output stream.
#[derive(Debug)]
pub struct LogWriter {
    path: PathBuf,
    inner: LineWriter<File>,
    failed: bool,
}

impl LogWriter {
    /// Appends one line. The first write failure is logged; later lines are
    /// dropped so a full disk does not flood the log.
    pub fn write_line(&mut self, line: &str) {
        if self.failed {
            return;
        }
        if let Err(e) = writeln!(self.inner, "{line}") {
            self.failed = true;
            warn!(path = %self.path.display(), error = %e, "Failed to write log line; further output dropped");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes and closes the file.
    pub fn finish(mut self) -> Result<(), ArtifactError> {
        self.inner.flush().map_err(|e| ArtifactError::io(&self.path, e))
    }
}

/// Persists captured images with strictly increasing timestamped names.
#[derive(Debug)]
pub struct ScreenshotWriter {
    dir: PathBuf,
    last: Option<DateTime<Utc>>,
}

impl ScreenshotWriter {
    /// Saves `image` stamped with `captured_at`, nudged forward by a
    /// microsecond if it would not sort after the previous capture.
    pub fn save(
        &mut self,
        image: &CapturedImage,
        captured_at: DateTime<Utc>,
    ) -> Result<PathBuf, ArtifactError> {
        let mut stamp = captured_at;
        if let Some(last) = self.last
            && stamp <= last
        {
            stamp = last + ChronoDuration::microseconds(1);
        }
        let name = format!(
            "screenshot_{}.{}",
            stamp.format("%Y%m%d_%H%M%S_%6f"),
            image.extension
        );
        let path = self.dir.join(name);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| ArtifactError::io(&path, e))?;
        file.write_all(&image.bytes)
            .map_err(|e| ArtifactError::io(&path, e))?;
        self.last = Some(stamp);
        Ok(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ArtifactError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
