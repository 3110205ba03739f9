//! Run orchestration.
//!
//! One run walks `Configuring → Launching → Running → Reporting → Done`.
//! Only configuration and launch failures abort a run; anything observed after
//! the child started (timeouts, crashes, delivery failures) is recorded as
//! data in the episode or the report outcome.

use crate::artifacts::{ArtifactError, ArtifactHandle, ArtifactStore, LogStream, run_id};
use crate::config::{
    ConfigError, ConfigLayer, RunConfig, redact_secret, requested_mode, requested_scenario_id,
};
use crate::episode::EpisodeBuilder;
use crate::events::EventLog;
use crate::reporter::{EpisodeReporter, ReportOutcome, ReporterError};
use crate::sampler::{SamplerHandle, ScreenshotSampler};
use crate::scenario::{Scenario, ScenarioCatalog, ScenarioError};
use chrono::Utc;
use runner_proto::{
    Episode, EpisodeStatus, IngestionTransport, LaunchError, LaunchRequest, ProcessRunner,
    ScreenCapture,
};
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Phases of a single run, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Configuring,
    Launching,
    Running,
    Reporting,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Configuring => "configuring",
            RunState::Launching => "launching",
            RunState::Running => "running",
            RunState::Reporting => "reporting",
            RunState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Failures that end a run before (or instead of) a delivered episode.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    ScenarioNotFound(#[from] ScenarioError),

    #[error("artifact store error: {0}")]
    Artifacts(#[from] ArtifactError),

    #[error("launch failed: {0}")]
    Launch(#[from] LaunchError),

    #[error("reporting failed: {0}")]
    Reporting(#[from] ReporterError),
}

/// Terminal state of a run.
#[derive(Debug)]
pub enum RunDisposition {
    Success { episode_id: String },
    Pending { path: PathBuf, reason: String },
    Error(RunError),
}

impl RunDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunDisposition::Success { .. } => "success",
            RunDisposition::Pending { .. } => "pending",
            RunDisposition::Error(_) => "error",
        }
    }

    /// Process exit code for this disposition.
    ///
    /// - 0: episode delivered
    /// - 1: configuration or launch error
    /// - 3: episode saved for replay
    pub fn exit_code(&self) -> i32 {
        match self {
            RunDisposition::Success { .. } => 0,
            RunDisposition::Error(_) => 1,
            RunDisposition::Pending { .. } => 3,
        }
    }
}

/// Exit code used with `--strict` when the episode status is not `pass`.
pub const STRICT_NON_PASS_EXIT_CODE: i32 = 4;

/// Everything the caller learns about a finished run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Option<String>,
    pub artifact_root: Option<PathBuf>,
    pub scenario_id: Option<String>,
    pub episode: Option<Episode>,
    pub disposition: RunDisposition,
}

impl RunReport {
    fn failed(
        handle: Option<&ArtifactHandle>,
        scenario_id: Option<String>,
        error: impl Into<RunError>,
    ) -> Self {
        Self {
            run_id: handle.map(|h| h.run_id().to_string()),
            artifact_root: handle.map(|h| h.root().to_path_buf()),
            scenario_id,
            episode: None,
            disposition: RunDisposition::Error(error.into()),
        }
    }

    /// A report for a run refused before it could start, e.g. because the
    /// environment or config file did not parse.
    pub fn rejected(error: impl Into<RunError>) -> Self {
        Self::failed(None, None, error)
    }

    pub fn status(&self) -> Option<EpisodeStatus> {
        self.episode.as_ref().map(|e| e.status)
    }

    /// A run passes when it produced a `pass` episode and did not end in error.
    pub fn passed(&self) -> bool {
        !matches!(self.disposition, RunDisposition::Error(_))
            && self.status() == Some(EpisodeStatus::Pass)
    }

    /// Exit code, optionally treating a non-pass episode as a failure.
    pub fn exit_code(&self, strict: bool) -> i32 {
        let base = self.disposition.exit_code();
        if base == 1 {
            return base;
        }
        if strict && self.status() != Some(EpisodeStatus::Pass) {
            return STRICT_NON_PASS_EXIT_CODE;
        }
        base
    }

    /// One human-readable line naming the artifact root, the scenario and the
    /// ingestion outcome.
    pub fn summary_line(&self) -> String {
        let run_id = self.run_id.as_deref().unwrap_or("-");
        let artifacts = self
            .artifact_root
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string());
        let scenario = self.scenario_id.as_deref().unwrap_or("none");
        let status = self.status().map(|s| s.as_str()).unwrap_or("none");

        match &self.disposition {
            RunDisposition::Success { episode_id } => format!(
                "run {run_id} success: status={status} artifacts={artifacts} scenario={scenario} ingestion=delivered id={episode_id}"
            ),
            RunDisposition::Pending { path, reason } => format!(
                "run {run_id} pending: status={status} artifacts={artifacts} scenario={scenario} ingestion=pending {} ({reason})",
                path.display()
            ),
            RunDisposition::Error(e) => format!(
                "run {run_id} error: {e} artifacts={artifacts} scenario={scenario}"
            ),
        }
    }
}

/// Sequences one run end to end.
pub struct RunOrchestrator {
    catalog: Arc<ScenarioCatalog>,
    runner: Arc<dyn ProcessRunner>,
    capture: Arc<dyn ScreenCapture>,
    transport: Arc<dyn IngestionTransport>,
}

impl RunOrchestrator {
    pub fn new(
        catalog: Arc<ScenarioCatalog>,
        runner: Arc<dyn ProcessRunner>,
        capture: Arc<dyn ScreenCapture>,
        transport: Arc<dyn IngestionTransport>,
    ) -> Self {
        Self {
            catalog,
            runner,
            capture,
            transport,
        }
    }

    /// Executes one run. Never panics on run failures; the outcome is in the
    /// returned report.
    pub async fn run(&self, layers: &[&ConfigLayer], extra_labels: &[String]) -> RunReport {
        let mut state = RunState::Configuring;
        debug!(state = %state, "Run state");

        let (config, scenario) = match self.configure(layers, extra_labels) {
            Ok(resolved) => resolved,
            Err(e) => {
                transition(&mut state, RunState::Done);
                return RunReport::failed(None, requested_scenario_id(layers), e);
            }
        };
        let scenario_id = config.scenario_id.clone();

        transition(&mut state, RunState::Launching);
        let store = ArtifactStore::new(&config.artifacts_root);
        let handle = match store.open(&run_id(
            Utc::now(),
            config.mode,
            &config.project_name,
            &config.build_id,
        )) {
            Ok(handle) => handle,
            Err(e) => {
                transition(&mut state, RunState::Done);
                return RunReport::failed(None, scenario_id, e);
            }
        };
        info!(
            run_id = %handle.run_id(),
            mode = %config.mode,
            scenario = scenario_id.as_deref().unwrap_or("none"),
            executable = %config.executable.display(),
            deadline_secs = config.duration_cap_seconds,
            screenshots = config.screenshots_enabled,
            ingestion = config.ingestion.as_ref().map(|t| t.base_url.as_str()).unwrap_or("none"),
            api_key = %config.ingestion.as_ref().map(|t| redact_secret(&t.api_key, 4)).unwrap_or_default(),
            artifacts = %handle.root().display(),
            "Starting run"
        );
        let mut events = EventLog::open(&handle).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to open event journal; continuing without it");
            EventLog::disabled()
        });
        events.record(
            "run.started",
            json!({
                "run_id": handle.run_id(),
                "mode": config.mode.as_str(),
                "scenario": scenario_id,
                "executable": config.executable.display().to_string(),
                "deadline_secs": config.duration_cap_seconds,
            }),
        );

        let (mut stdout_log, mut stderr_log) = match (
            handle.log_writer(LogStream::Stdout),
            handle.log_writer(LogStream::Stderr),
        ) {
            (Ok(out), Ok(err)) => (out, err),
            (Err(e), _) | (_, Err(e)) => {
                transition(&mut state, RunState::Done);
                return RunReport::failed(Some(&handle), scenario_id, e);
            }
        };

        let sampler = if config.screenshots_enabled {
            ScreenshotSampler::start(
                config.screenshot_interval(),
                config.screenshot_max_captures,
                Arc::clone(&self.capture),
                handle.screenshot_writer(),
            )
        } else {
            SamplerHandle::disabled()
        };

        transition(&mut state, RunState::Running);
        let request = launch_request(&config, &handle);
        let result = self
            .runner
            .run(
                &request,
                &mut |line: &str| stdout_log.write_line(line),
                &mut |line: &str| stderr_log.write_line(line),
            )
            .await;

        // Join point: the sampler is stopped whether or not the child ran.
        let sampler_report = sampler.stop().await;
        for writer in [stdout_log, stderr_log] {
            let path = writer.path().to_path_buf();
            if let Err(e) = writer.finish() {
                warn!(path = %path.display(), error = %e, "Failed to flush log");
            }
        }

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                events.record("launch.failed", json!({ "error": e.to_string() }));
                transition(&mut state, RunState::Done);
                return RunReport::failed(Some(&handle), scenario_id, e);
            }
        };
        events.record(
            "process.finished",
            json!({
                "exit_code": outcome.exit_code,
                "timed_out": outcome.timed_out,
                "crashed": outcome.crashed,
                "wall_clock_secs": outcome.wall_clock_seconds,
                "screenshots": sampler_report.captured,
                "capture_disabled_reason": sampler_report.disabled_reason,
            }),
        );
        info!(
            exit_code = outcome.exit_code,
            timed_out = outcome.timed_out,
            crashed = outcome.crashed,
            wall_clock_secs = outcome.wall_clock_seconds,
            screenshots = sampler_report.captured,
            "Process finished"
        );

        transition(&mut state, RunState::Reporting);
        let artifacts = match handle.paths() {
            Ok(paths) => paths,
            Err(e) => {
                transition(&mut state, RunState::Done);
                return RunReport::failed(Some(&handle), scenario_id, e);
            }
        };
        let episode = EpisodeBuilder::build(
            &config,
            scenario.as_ref(),
            &outcome,
            &sampler_report,
            artifacts,
        );
        let reporter = EpisodeReporter::new(Arc::clone(&self.transport), config.ingestion.clone());
        let disposition = match reporter.send(&episode, &handle).await {
            Ok(ReportOutcome::Delivered { episode_id }) => RunDisposition::Success { episode_id },
            Ok(ReportOutcome::Pending { path, reason }) => RunDisposition::Pending { path, reason },
            Err(e) => RunDisposition::Error(e.into()),
        };
        match &disposition {
            RunDisposition::Success { episode_id } => {
                events.record("episode.delivered", json!({ "episode_id": episode_id }))
            }
            RunDisposition::Pending { path, reason } => events.record(
                "episode.pending",
                json!({ "path": path.display().to_string(), "reason": reason }),
            ),
            RunDisposition::Error(e) => {
                events.record("episode.failed", json!({ "error": e.to_string() }))
            }
        }

        transition(&mut state, RunState::Done);
        RunReport {
            run_id: Some(handle.run_id().to_string()),
            artifact_root: Some(handle.root().to_path_buf()),
            scenario_id,
            episode: Some(episode),
            disposition,
        }
    }

    /// Resolves the configuration and the scenario it names. No IO beyond
    /// the already-loaded catalog.
    fn configure(
        &self,
        layers: &[&ConfigLayer],
        extra_labels: &[String],
    ) -> Result<(RunConfig, Option<Scenario>), RunError> {
        // A bad mode is reported ahead of an unknown scenario.
        requested_mode(layers)?;
        let scenario = match requested_scenario_id(layers) {
            Some(id) => Some(self.catalog.resolve(&id)?.clone()),
            None => None,
        };
        let config = RunConfig::resolve(layers, scenario.as_ref())?
            .with_extra_labels(extra_labels.iter().map(String::as_str));
        Ok((config, scenario))
    }
}

fn transition(state: &mut RunState, next: RunState) {
    debug!(from = %state, to = %next, "Run state");
    *state = next;
}

fn launch_request(config: &RunConfig, handle: &ArtifactHandle) -> LaunchRequest {
    let mut args = config.args.clone();
    if config.player_log {
        args.push("-logFile".to_string());
        args.push(handle.player_log_path().to_string_lossy().into_owned());
    }
    LaunchRequest {
        executable: config.executable.clone(),
        args,
        working_dir: config
            .executable
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from),
        deadline: config.deadline(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EVENTS_FILE, read_events};
    use async_trait::async_trait;
    use runner_proto::{
        CaptureError, CapturedImage, EpisodeReceipt, IngestionTarget, LineCallback,
        ProcessOutcome, ReportError, SamplerUnavailable,
    };
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Emits scripted lines, waits, then exits with a fixed outcome.
    struct ScriptedRunner {
        stdout: Vec<&'static str>,
        stderr: Vec<&'static str>,
        runtime: Duration,
        exit_code: i32,
        launch_fails: bool,
        requests: Mutex<Vec<LaunchRequest>>,
    }

    impl ScriptedRunner {
        fn exiting(exit_code: i32, runtime: Duration) -> Self {
            Self {
                stdout: vec!["boot", "ready"],
                stderr: vec!["warning: low fps"],
                runtime,
                exit_code,
                launch_fails: false,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(
            &self,
            request: &LaunchRequest,
            on_stdout: LineCallback<'_>,
            on_stderr: LineCallback<'_>,
        ) -> Result<ProcessOutcome, LaunchError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.launch_fails {
                return Err(LaunchError::NotFound(request.executable.clone()));
            }
            for line in &self.stdout {
                on_stdout(line);
            }
            for line in &self.stderr {
                on_stderr(line);
            }
            if self.runtime >= request.deadline {
                tokio::time::sleep(request.deadline).await;
                return Ok(ProcessOutcome::timed_out(request.deadline.as_secs_f64()));
            }
            tokio::time::sleep(self.runtime).await;
            Ok(ProcessOutcome::exited(
                self.exit_code,
                self.runtime.as_secs_f64(),
            ))
        }
    }

    struct StaticCapture {
        available: bool,
    }

    #[async_trait]
    impl ScreenCapture for StaticCapture {
        fn check_available(&self) -> Result<(), SamplerUnavailable> {
            if self.available {
                Ok(())
            } else {
                Err(SamplerUnavailable::NoDesktop)
            }
        }

        async fn capture(&self) -> Result<CapturedImage, CaptureError> {
            Ok(CapturedImage::png(vec![1, 2, 3, 4]))
        }
    }

    struct FakeTransport {
        reachable: bool,
        bodies: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl IngestionTransport for FakeTransport {
        async fn post_episode(
            &self,
            _target: &IngestionTarget,
            body: &[u8],
        ) -> Result<EpisodeReceipt, ReportError> {
            self.bodies.lock().unwrap().push(body.to_vec());
            if self.reachable {
                Ok(EpisodeReceipt {
                    episode_id: "ep-1".to_string(),
                    response_body: br#"{"episode_id": "ep-1"}"#.to_vec(),
                })
            } else {
                Err(ReportError::Transport("connection refused".to_string()))
            }
        }
    }

    struct Harness {
        temp: TempDir,
        runner: Arc<ScriptedRunner>,
        transport: Arc<FakeTransport>,
        orchestrator: RunOrchestrator,
    }

    fn harness(runner: ScriptedRunner, capture_available: bool, reachable: bool) -> Harness {
        let runner = Arc::new(runner);
        let transport = Arc::new(FakeTransport {
            reachable,
            bodies: Mutex::new(Vec::new()),
        });
        let orchestrator = RunOrchestrator::new(
            Arc::new(ScenarioCatalog::builtin().unwrap()),
            runner.clone(),
            Arc::new(StaticCapture {
                available: capture_available,
            }),
            transport.clone(),
        );
        Harness {
            temp: TempDir::new().unwrap(),
            runner,
            transport,
            orchestrator,
        }
    }

    impl Harness {
        fn layer(&self, mode: &str) -> ConfigLayer {
            ConfigLayer {
                executable: Some(PathBuf::from("/opt/game/Game.x86_64")),
                mode: Some(mode.to_string()),
                project_name: Some("Babylon".to_string()),
                build_id: Some("b-1".to_string()),
                ingestion_base_url: Some("http://127.0.0.1:8000".to_string()),
                ingestion_api_key: Some("secret-key".to_string()),
                artifacts_root: Some(self.temp.path().join("artifacts")),
                ..ConfigLayer::default()
            }
        }
    }

    #[tokio::test]
    async fn test_freestyle_pass_is_delivered() {
        let h = harness(ScriptedRunner::exiting(0, Duration::from_millis(50)), true, true);
        let layer = h.layer("freestyle");

        let report = h.orchestrator.run(&[&layer], &[]).await;

        assert!(matches!(report.disposition, RunDisposition::Success { .. }));
        assert_eq!(report.exit_code(false), 0);
        let episode = report.episode.as_ref().unwrap();
        assert_eq!(episode.status, EpisodeStatus::Pass);
        assert_eq!(episode.metrics.exit_code, 0);
        assert_eq!(episode.metrics.screenshots_captured, 0);
        assert_eq!(episode.artifacts.logs.len(), 2);

        let root = report.artifact_root.as_ref().unwrap();
        assert_eq!(
            std::fs::read_to_string(root.join("logs/stdout.log")).unwrap(),
            "boot\nready\n"
        );
        assert_eq!(
            std::fs::read_to_string(root.join("logs/stderr.log")).unwrap(),
            "warning: low fps\n"
        );
        assert!(!root.join("episode_pending.json").exists());
        assert!(root.join("episode_response.json").exists());
        assert!(report.summary_line().contains("ingestion=delivered id=ep-1"));
    }

    #[tokio::test]
    async fn test_unreachable_ingestion_ends_pending() {
        let h = harness(ScriptedRunner::exiting(0, Duration::from_millis(10)), true, false);
        let layer = h.layer("freestyle");

        let report = h.orchestrator.run(&[&layer], &[]).await;

        let RunDisposition::Pending { path, .. } = &report.disposition else {
            panic!("expected pending, got {:?}", report.disposition);
        };
        assert_eq!(report.exit_code(false), 3);
        let persisted = std::fs::read(path).unwrap();
        assert_eq!(persisted, h.transport.bodies.lock().unwrap()[0]);
        let parsed: Episode = serde_json::from_slice(&persisted).unwrap();
        assert_eq!(Some(&parsed), report.episode.as_ref());
        assert!(report.summary_line().contains("ingestion=pending"));
    }

    #[tokio::test]
    async fn test_breaker_run_samples_screenshots() {
        let h = harness(ScriptedRunner::exiting(0, Duration::from_millis(2_500)), true, true);
        let layer = ConfigLayer {
            scenario_id: Some("breaker-sprint".to_string()),
            screenshot_interval_seconds: Some(1),
            ..h.layer("breaker")
        };

        let report = h.orchestrator.run(&[&layer], &[]).await;

        let episode = report.episode.as_ref().unwrap();
        assert_eq!(episode.status, EpisodeStatus::Pass);
        assert!((1..=3).contains(&episode.metrics.screenshots_captured));
        assert_eq!(
            episode.artifacts.screenshots.len() as u32,
            episode.metrics.screenshots_captured
        );
        let contract = episode.scenario.as_ref().unwrap();
        assert_eq!(contract.scenario_id, "breaker-sprint");
        assert_eq!(contract.observed.as_ref().unwrap().exit_code, 0);
        assert!(episode.labels.contains(&"breaker".to_string()));
        assert_eq!(report.scenario_id.as_deref(), Some("breaker-sprint"));
    }

    #[tokio::test]
    async fn test_timeout_yields_fail_episode() {
        let h = harness(ScriptedRunner::exiting(0, Duration::from_secs(3600)), true, true);
        let layer = ConfigLayer {
            duration_cap_seconds: Some(1),
            ..h.layer("freestyle")
        };

        let report = h.orchestrator.run(&[&layer], &[]).await;

        let episode = report.episode.as_ref().unwrap();
        assert!(episode.metrics.timed_out);
        assert_eq!(episode.status, EpisodeStatus::Fail);
        assert_eq!(report.exit_code(false), 0);
        assert_eq!(report.exit_code(true), STRICT_NON_PASS_EXIT_CODE);
    }

    #[tokio::test]
    async fn test_configuration_error_creates_no_artifacts() {
        let h = harness(ScriptedRunner::exiting(0, Duration::ZERO), true, true);
        let layer = h.layer("instructed");

        let report = h.orchestrator.run(&[&layer], &[]).await;

        assert!(matches!(
            report.disposition,
            RunDisposition::Error(RunError::Configuration(_))
        ));
        assert_eq!(report.exit_code(false), 1);
        assert!(report.run_id.is_none());
        assert!(!h.temp.path().join("artifacts").exists());
        assert!(h.runner.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_scenario_is_fatal() {
        let h = harness(ScriptedRunner::exiting(0, Duration::ZERO), true, true);
        let layer = ConfigLayer {
            scenario_id: Some("nope".to_string()),
            ..h.layer("breaker")
        };

        let report = h.orchestrator.run(&[&layer], &[]).await;

        assert!(matches!(
            report.disposition,
            RunDisposition::Error(RunError::ScenarioNotFound(_))
        ));
        assert_eq!(report.scenario_id.as_deref(), Some("nope"));
        assert!(report.summary_line().starts_with("run - error:"));
    }

    #[tokio::test]
    async fn test_invalid_mode_reported_before_unknown_scenario() {
        let h = harness(ScriptedRunner::exiting(0, Duration::ZERO), true, true);
        let layer = ConfigLayer {
            scenario_id: Some("nope".to_string()),
            ..h.layer("chaos")
        };

        let report = h.orchestrator.run(&[&layer], &[]).await;

        assert!(matches!(
            report.disposition,
            RunDisposition::Error(RunError::Configuration(ConfigError::UnknownMode(_)))
        ));
    }

    #[test]
    fn test_rejected_report_summarizes_configuration_error() {
        let report = RunReport::rejected(ConfigError::InvalidValue {
            field: "RUN_DURATION_SECONDS".to_string(),
            message: "'abc' is not a non-negative integer".to_string(),
        });

        assert_eq!(report.exit_code(true), 1);
        let line = report.summary_line();
        assert!(line.starts_with("run - error: configuration error:"), "{line}");
        assert!(line.contains("RUN_DURATION_SECONDS"));
    }

    #[tokio::test]
    async fn test_launch_error_has_no_episode() {
        let mut runner = ScriptedRunner::exiting(0, Duration::ZERO);
        runner.launch_fails = true;
        let h = harness(runner, true, true);
        let layer = h.layer("freestyle");

        let report = h.orchestrator.run(&[&layer], &[]).await;

        assert!(matches!(
            report.disposition,
            RunDisposition::Error(RunError::Launch(_))
        ));
        assert!(report.episode.is_none());
        assert!(h.transport.bodies.lock().unwrap().is_empty());

        let journal = report.artifact_root.as_ref().unwrap().join(EVENTS_FILE);
        let names: Vec<String> = read_events(&journal)
            .unwrap()
            .into_iter()
            .map(|e| e.event)
            .collect();
        assert_eq!(names, ["run.started", "launch.failed"]);
    }

    #[tokio::test]
    async fn test_event_journal_records_run_milestones() {
        let h = harness(ScriptedRunner::exiting(3, Duration::ZERO), false, false);
        let layer = h.layer("freestyle");

        let report = h.orchestrator.run(&[&layer], &[]).await;

        let events = read_events(&report.artifact_root.as_ref().unwrap().join(EVENTS_FILE)).unwrap();
        let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names, ["run.started", "process.finished", "episode.pending"]);
        assert_eq!(events[0].data["run_id"], report.run_id.clone().unwrap());
        assert_eq!(events[0].data["mode"], "freestyle");
        assert_eq!(events[1].data["exit_code"], 3);
        assert!(
            events[2].data["reason"]
                .as_str()
                .unwrap()
                .contains("connection refused")
        );
        assert!(!events[0].data.to_string().contains("secret-key"));
    }

    #[tokio::test]
    async fn test_player_log_and_working_dir_in_launch_request() {
        let h = harness(ScriptedRunner::exiting(0, Duration::ZERO), false, true);
        let layer = ConfigLayer {
            args: Some(vec!["-batchmode".to_string()]),
            player_log: Some(true),
            ..h.layer("freestyle")
        };

        let report = h.orchestrator.run(&[&layer], &["plan:queue".to_string()]).await;

        let requests = h.runner.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.args[0], "-batchmode");
        assert_eq!(request.args[1], "-logFile");
        assert!(request.args[2].ends_with("player.log"));
        assert_eq!(request.working_dir, Some(PathBuf::from("/opt/game")));
        assert_eq!(request.deadline, Duration::from_secs(300));

        let episode = report.episode.as_ref().unwrap();
        assert!(episode.labels.contains(&"plan:queue".to_string()));
        assert_eq!(episode.metrics.capture_disabled_reason, None);
    }

    #[tokio::test]
    async fn test_headless_host_records_disabled_reason() {
        let h = harness(ScriptedRunner::exiting(0, Duration::from_millis(10)), false, true);
        let layer = ConfigLayer {
            screenshots: Some(true),
            ..h.layer("freestyle")
        };

        let report = h.orchestrator.run(&[&layer], &[]).await;

        let episode = report.episode.as_ref().unwrap();
        assert_eq!(episode.status, EpisodeStatus::Pass);
        assert_eq!(episode.metrics.screenshots_captured, 0);
        assert_eq!(
            episode.metrics.capture_disabled_reason.as_deref(),
            Some("no-desktop")
        );
    }
}
