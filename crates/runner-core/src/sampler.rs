//! Periodic screenshot sampling.
//!
//! The sampler is its own tokio task. It ticks on a fixed cadence that is
//! independent of the supervised process, skips (never queues) ticks missed
//! while a capture is slow, and stops cooperatively: a capture in flight is
//! allowed to finish, up to [`STOP_GRACE`], before the task is aborted.

use crate::artifacts::{ArtifactError, ScreenshotWriter};
use chrono::{DateTime, Utc};
use runner_proto::{CapturedImage, SamplerUnavailable, ScreenCapture};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How long [`SamplerHandle::stop`] waits for an in-flight capture.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Destination for captured images.
pub trait ScreenshotSink: Send + 'static {
    fn save(
        &mut self,
        image: &CapturedImage,
        captured_at: DateTime<Utc>,
    ) -> Result<PathBuf, ArtifactError>;
}

impl ScreenshotSink for ScreenshotWriter {
    fn save(
        &mut self,
        image: &CapturedImage,
        captured_at: DateTime<Utc>,
    ) -> Result<PathBuf, ArtifactError> {
        ScreenshotWriter::save(self, image, captured_at)
    }
}

/// Final sampler result, read only after the task has terminated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerReport {
    pub captured: u32,
    /// Set when the host could not capture at all.
    pub disabled_reason: Option<String>,
}

pub struct ScreenshotSampler;

impl ScreenshotSampler {
    /// Starts sampling. The first capture happens one `interval` after start.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S: ScreenshotSink>(
        interval: Duration,
        max_captures: Option<u32>,
        capture: Arc<dyn ScreenCapture>,
        sink: S,
    ) -> SamplerHandle {
        if let Err(reason) = capture.check_available() {
            info!(
                reason = reason.reason_code(),
                detail = %reason,
                "Screenshot capture unavailable on this host; skipping"
            );
            return SamplerHandle {
                inner: HandleState::Unavailable(reason),
            };
        }
        if max_captures == Some(0) || interval.is_zero() {
            debug!("Screenshot sampler has nothing to do");
            return SamplerHandle::disabled();
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let captured = Arc::new(AtomicU32::new(0));
        let task = tokio::spawn(sample_loop(
            interval,
            max_captures,
            capture,
            sink,
            stop_rx,
            Arc::clone(&captured),
        ));
        debug!(interval_ms = interval.as_millis() as u64, max_captures = ?max_captures, "Screenshot sampler started");
        SamplerHandle {
            inner: HandleState::Running {
                stop_tx,
                task,
                captured,
                stop_grace: STOP_GRACE,
            },
        }
    }
}

enum HandleState {
    Disabled,
    Unavailable(SamplerUnavailable),
    Running {
        stop_tx: watch::Sender<bool>,
        task: JoinHandle<()>,
        captured: Arc<AtomicU32>,
        stop_grace: Duration,
    },
}

/// Owns the sampling task until [`SamplerHandle::stop`] joins it.
pub struct SamplerHandle {
    inner: HandleState,
}

impl SamplerHandle {
    /// A handle for runs with screenshots turned off.
    pub fn disabled() -> Self {
        Self {
            inner: HandleState::Disabled,
        }
    }

    /// Overrides how long [`stop`](Self::stop) waits for a capture in flight.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        if let HandleState::Running { stop_grace, .. } = &mut self.inner {
            *stop_grace = grace;
        }
        self
    }

    /// Signals the task to stop and waits for its current capture to finish.
    /// A capture still running after the grace period is abandoned.
    pub async fn stop(self) -> SamplerReport {
        match self.inner {
            HandleState::Disabled => SamplerReport::default(),
            HandleState::Unavailable(reason) => SamplerReport {
                captured: 0,
                disabled_reason: Some(reason.reason_code().to_string()),
            },
            HandleState::Running {
                stop_tx,
                mut task,
                captured,
                stop_grace,
            } => {
                // The receiver is gone if the task already hit its cap.
                let _ = stop_tx.send(true);
                let joined = match tokio::time::timeout(stop_grace, &mut task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!(
                            grace_ms = stop_grace.as_millis() as u64,
                            "Screenshot capture still running at stop; abandoning it"
                        );
                        task.abort();
                        Ok(())
                    }
                };
                let captured = captured.load(Ordering::SeqCst);
                match joined {
                    Ok(()) => {
                        debug!(captured, "Screenshot sampler stopped");
                        SamplerReport {
                            captured,
                            disabled_reason: None,
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Screenshot sampler task failed");
                        SamplerReport {
                            captured: 0,
                            disabled_reason: Some("sampler-failed".to_string()),
                        }
                    }
                }
            }
        }
    }
}

async fn sample_loop<S: ScreenshotSink>(
    interval: Duration,
    max_captures: Option<u32>,
    capture: Arc<dyn ScreenCapture>,
    mut sink: S,
    mut stop_rx: watch::Receiver<bool>,
    captured: Arc<AtomicU32>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if max_captures.is_some_and(|max| captured.load(Ordering::SeqCst) >= max) {
            debug!("Screenshot cap reached");
            break;
        }

        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        // A slow capture runs to completion; the ticks it overlaps are skipped.
        match capture.capture().await {
            Ok(image) => match sink.save(&image, Utc::now()) {
                Ok(path) => {
                    let count = captured.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!(path = %path.display(), captured = count, "Screenshot saved");
                }
                Err(e) => warn!(error = %e, "Failed to persist screenshot"),
            },
            Err(e) => warn!(error = %e, "Screenshot capture failed"),
        }

        if *stop_rx.borrow() {
            break;
        }
    }
}
