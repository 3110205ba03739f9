//! Child process supervision.
//!
//! Launches the target executable with piped stdout/stderr, forwards each
//! line to the caller as soon as it is read, and enforces a hard deadline.
//! Both pipes are read concurrently with the exit wait so a chatty stderr can
//! never block the child on a full pipe buffer.
//!
//! On Unix the child leads its own process group and the deadline kills the
//! whole group with SIGKILL, so helper processes spawned by the executable do
//! not outlive the run.

use async_trait::async_trait;
use runner_proto::{
    LaunchError, LaunchRequest, LineCallback, ProcessOutcome, ProcessRunner, TERMINATED_EXIT_CODE,
};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long to keep reading pipes after the child exits. Grandchildren that
/// inherited the pipes would otherwise keep them open indefinitely.
pub const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Supervises one child process per call.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    drain_grace: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self {
            drain_grace: DRAIN_GRACE,
        }
    }

    fn command(request: &LaunchRequest, executable: &Path) -> Command {
        let mut command = Command::new(executable);
        command
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let working_dir = request.working_dir.clone().or_else(|| {
            executable
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(std::path::Path::to_path_buf)
        });
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        #[cfg(unix)]
        command.process_group(0);

        command
    }
}

#[async_trait]
impl ProcessRunner for ProcessSupervisor {
    async fn run(
        &self,
        request: &LaunchRequest,
        on_stdout: LineCallback<'_>,
        on_stderr: LineCallback<'_>,
    ) -> Result<ProcessOutcome, LaunchError> {
        let executable = resolve_executable(&request.executable)?;

        debug!(
            executable = %executable.display(),
            args = ?request.args,
            deadline_secs = request.deadline.as_secs_f64(),
            "Spawning supervised process"
        );
        let started = Instant::now();
        let mut child = Self::command(request, &executable).spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                LaunchError::NotFound(request.executable.clone())
            } else {
                LaunchError::Spawn {
                    path: request.executable.clone(),
                    source: e,
                }
            }
        })?;
        debug!(pid = ?child.id(), "Supervised process started");

        let mut stdout = Pipe::new(child.stdout.take().map(BufReader::new));
        let mut stderr = Pipe::new(child.stderr.take().map(BufReader::new));

        let deadline = tokio::time::sleep(request.deadline);
        tokio::pin!(deadline);

        // Phase 1: until the child exits or the deadline fires.
        let exit = loop {
            tokio::select! {
                status = child.wait() => break Exit::Exited(status),
                () = &mut deadline => break Exit::Deadline,
                read = stdout.next_line(), if stdout.open => stdout.deliver(read, on_stdout, "stdout"),
                read = stderr.next_line(), if stderr.open => stderr.deliver(read, on_stderr, "stderr"),
            }
        };

        let timed_out = matches!(exit, Exit::Deadline);
        let status = match exit {
            Exit::Exited(status) => status,
            Exit::Deadline => {
                warn!(
                    deadline_secs = request.deadline.as_secs_f64(),
                    "Deadline reached, killing supervised process"
                );
                terminate(&mut child);
                child.wait().await
            }
        };
        let wall_clock_seconds = started.elapsed().as_secs_f64();

        // Phase 2: drain what is left in the pipes.
        let grace = tokio::time::sleep(self.drain_grace);
        tokio::pin!(grace);
        while stdout.open || stderr.open {
            tokio::select! {
                () = &mut grace => {
                    debug!("Output pipes still open after exit; giving up on drain");
                    break;
                }
                read = stdout.next_line(), if stdout.open => stdout.deliver(read, on_stdout, "stdout"),
                read = stderr.next_line(), if stderr.open => stderr.deliver(read, on_stderr, "stderr"),
            }
        }
        stdout.flush_partial(on_stdout);
        stderr.flush_partial(on_stderr);

        let outcome = match (timed_out, status) {
            (true, _) => ProcessOutcome::timed_out(wall_clock_seconds),
            (false, Ok(status)) => classify(status, wall_clock_seconds),
            (false, Err(e)) => {
                warn!(error = %e, "Failed to collect exit status");
                ProcessOutcome::crashed(TERMINATED_EXIT_CODE, wall_clock_seconds)
            }
        };
        debug!(
            exit_code = outcome.exit_code,
            timed_out = outcome.timed_out,
            crashed = outcome.crashed,
            wall_clock_secs = wall_clock_seconds,
            "Supervised process finished"
        );
        Ok(outcome)
    }
}

/// Makes a path-like executable absolute so that changing the child's working
/// directory cannot change what gets launched. Bare names are left for the
/// `PATH` search.
fn resolve_executable(executable: &Path) -> Result<PathBuf, LaunchError> {
    if executable.components().count() <= 1 {
        return Ok(executable.to_path_buf());
    }
    let absolute = std::path::absolute(executable)
        .map_err(|_| LaunchError::NotFound(executable.to_path_buf()))?;
    if !absolute.is_file() {
        return Err(LaunchError::NotFound(executable.to_path_buf()));
    }
    Ok(absolute)
}

enum Exit {
    Exited(io::Result<ExitStatus>),
    Deadline,
}

/// One output pipe with a persistent line buffer.
///
/// `read_until` appends partial data to the buffer when cancelled by
/// `select!`, so keeping the buffer across iterations loses nothing.
struct Pipe<R> {
    reader: Option<R>,
    buf: Vec<u8>,
    open: bool,
}

impl<R: AsyncBufRead + Unpin> Pipe<R> {
    fn new(reader: Option<R>) -> Self {
        Self {
            open: reader.is_some(),
            reader,
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> io::Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => reader.read_until(b'\n', &mut self.buf).await,
            None => Ok(0),
        }
    }

    fn deliver<F>(&mut self, read: io::Result<usize>, callback: &mut F, stream: &str)
    where
        F: FnMut(&str) + ?Sized,
    {
        match read {
            Ok(0) => {
                self.open = false;
                self.flush_partial(callback);
            }
            Ok(_) => {
                if self.buf.ends_with(b"\n") {
                    callback(&decode_line(&self.buf));
                    self.buf.clear();
                }
            }
            Err(e) => {
                warn!(stream, error = %e, "Failed to read child output");
                self.open = false;
            }
        }
    }

    fn flush_partial<F>(&mut self, callback: &mut F)
    where
        F: FnMut(&str) + ?Sized,
    {
        if !self.buf.is_empty() {
            callback(&decode_line(&self.buf));
            self.buf.clear();
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let trimmed = raw
        .strip_suffix(b"\n")
        .map(|r| r.strip_suffix(b"\r").unwrap_or(r))
        .unwrap_or(raw);
    String::from_utf8_lossy(trimmed).into_owned()
}

/// Forcibly terminates the child and, on Unix, its process group.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        #[allow(clippy::cast_possible_wrap)]
        let pgid = Pid::from_raw(pid as i32);
        debug!(%pgid, "Sending SIGKILL to process group");
        if killpg(pgid, Signal::SIGKILL).is_ok() {
            return;
        }
    }

    if let Err(e) = child.start_kill() {
        warn!(error = %e, "Failed to kill supervised process");
    }
}

#[cfg(unix)]
fn classify(status: ExitStatus, wall_clock_seconds: f64) -> ProcessOutcome {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => ProcessOutcome::exited(code, wall_clock_seconds),
        (None, Some(signal)) => ProcessOutcome::crashed(-signal, wall_clock_seconds),
        (None, None) => ProcessOutcome::crashed(TERMINATED_EXIT_CODE, wall_clock_seconds),
    }
}

#[cfg(windows)]
fn classify(status: ExitStatus, wall_clock_seconds: f64) -> ProcessOutcome {
    // NTSTATUS error codes (access violation, stack overflow, ...) have both
    // high bits set.
    const NTSTATUS_ERROR: u32 = 0xC000_0000;

    match status.code() {
        Some(code) if (code as u32) >= NTSTATUS_ERROR => {
            ProcessOutcome::crashed(code, wall_clock_seconds)
        }
        Some(code) => ProcessOutcome::exited(code, wall_clock_seconds),
        None => ProcessOutcome::crashed(TERMINATED_EXIT_CODE, wall_clock_seconds),
    }
}
