//! Supervised process contract.
//!
//! The target executable is opaque: it is started, its two text channels are
//! streamed line by line, it is terminated on deadline, and its exit status is
//! reported as a [`ProcessOutcome`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Exit code reported when the runner forcibly terminated the child on deadline.
pub const TERMINATED_EXIT_CODE: i32 = -1;

/// Everything needed to launch the target executable.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub executable: PathBuf,
    pub args: Vec<String>,
    /// Working directory; defaults to the executable's parent when `None`.
    pub working_dir: Option<PathBuf>,
    /// Hard deadline after which the child is forcibly terminated.
    pub deadline: Duration,
}

/// How the supervised child ended. Produced once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub exit_code: i32,
    pub timed_out: bool,
    pub wall_clock_seconds: f64,
    /// Terminated by a signal or fault rather than a normal exit.
    pub crashed: bool,
}

impl ProcessOutcome {
    /// Outcome for a child the runner killed at the deadline.
    pub fn timed_out(wall_clock_seconds: f64) -> Self {
        Self {
            exit_code: TERMINATED_EXIT_CODE,
            timed_out: true,
            wall_clock_seconds,
            crashed: false,
        }
    }

    /// Outcome for a child that exited on its own.
    pub fn exited(exit_code: i32, wall_clock_seconds: f64) -> Self {
        Self {
            exit_code,
            timed_out: false,
            wall_clock_seconds,
            crashed: false,
        }
    }

    /// Outcome for a child that died from a signal or fault.
    pub fn crashed(exit_code: i32, wall_clock_seconds: f64) -> Self {
        Self {
            exit_code,
            timed_out: false,
            wall_clock_seconds,
            crashed: true,
        }
    }
}

/// The executable could not be started; no outcome exists.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("executable not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to start {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Callback receiving one line of child output, in emission order.
pub type LineCallback<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Launches and supervises one child process.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs the child to completion or deadline.
    ///
    /// Lines are delivered to the callbacks as they arrive. Timeouts and
    /// crashes are reported through the outcome, not as errors.
    async fn run(
        &self,
        request: &LaunchRequest,
        on_stdout: LineCallback<'_>,
        on_stderr: LineCallback<'_>,
    ) -> Result<ProcessOutcome, LaunchError>;
}
