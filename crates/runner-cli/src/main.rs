//! # runner-cli
//!
//! Binary entry point for the Unity runner.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Layering of CLI flags, environment variables and the YAML config file
//! - `unity-runner run` for single runs, scenario queues and schedules
//! - `unity-runner replay` for re-posting a pending episode
//! - `unity-runner scenarios` for listing the scenario catalog

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use runner_adapters::{CommandScreenCapture, HttpIngestionClient, ProcessSupervisor};
use runner_core::{
    ConfigError, ConfigLayer, DEFAULT_REPORTS_DIR, EpisodeReporter, PlanError, RunDisposition, RunError,
    RunOrchestrator, RunPlan, RunReport, ScenarioCatalog, ScenarioError, requested_scenario_id,
    requested_scenarios_file, requested_screenshot_command, resolve_ingestion,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// Unattended run orchestrator for Unity builds
#[derive(Parser, Debug)]
#[command(name = "unity-runner", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (ignored when missing)
    #[arg(short, long, default_value = "unity-runner.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch the build, capture evidence and report the episode
    Run(Box<RunArgs>),

    /// Re-post a pending episode payload
    Replay(ReplayArgs),

    /// List the scenarios in the active catalog
    Scenarios(ScenariosArgs),
}

/// How many runs to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum PlanArg {
    /// One run
    #[default]
    Single,
    /// Each scenario of --scenarios once, in order
    Queue,
    /// One scenario repeated on a fixed cadence
    Schedule,
}

/// Flags shared by every subcommand that talks to the ingestion service.
#[derive(Parser, Debug, Default)]
struct IngestionArgs {
    /// Ingestion service base URL
    #[arg(long = "base-url")]
    base_url: Option<String>,

    /// Ingestion API key
    #[arg(long = "api-key")]
    api_key: Option<String>,

    /// Per-request timeout for the episode POST, in seconds
    #[arg(long = "post-timeout")]
    post_timeout: Option<u64>,
}

/// Arguments for the run subcommand.
#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the Unity player executable
    #[arg(long = "unity-exe")]
    executable: Option<PathBuf>,

    /// Run mode: freestyle, instructed or breaker
    #[arg(short, long)]
    mode: Option<String>,

    /// Scenario id from the catalog
    #[arg(short, long)]
    scenario: Option<String>,

    /// Scenario catalog file (JSON or YAML)
    #[arg(long = "scenarios-file")]
    scenarios_file: Option<PathBuf>,

    /// Hard wall-clock cap for the run, in seconds
    #[arg(short, long = "duration")]
    duration: Option<u64>,

    /// Enable periodic screenshots
    #[arg(long, conflicts_with = "no_screenshots")]
    screenshots: bool,

    /// Disable screenshots, overriding scenario and mode defaults
    #[arg(long = "no-screenshots")]
    no_screenshots: bool,

    /// Seconds between screenshots
    #[arg(long = "screenshot-interval")]
    screenshot_interval: Option<u64>,

    /// Maximum number of screenshots per run
    #[arg(long = "screenshot-max")]
    screenshot_max: Option<u32>,

    /// Capture command template; `{output}` is replaced by the image path
    #[arg(long = "screenshot-command")]
    screenshot_command: Option<String>,

    #[command(flatten)]
    ingestion: IngestionArgs,

    /// Project name reported with the episode
    #[arg(long)]
    project: Option<String>,

    /// Build identifier reported with the episode
    #[arg(long = "build-id")]
    build_id: Option<String>,

    /// Episode label (repeatable or comma separated)
    #[arg(long = "label", value_delimiter = ',')]
    labels: Vec<String>,

    /// Root directory for run artifacts
    #[arg(long = "artifacts-dir")]
    artifacts_dir: Option<PathBuf>,

    /// Pass `-logFile <run>/logs/player.log` to the player
    #[arg(long = "player-log")]
    player_log: bool,

    /// Execution plan
    #[arg(long, value_enum, default_value_t = PlanArg::Single)]
    plan: PlanArg,

    /// Scenarios for --plan queue, comma separated
    #[arg(long, value_delimiter = ',')]
    scenarios: Vec<String>,

    /// Minutes between scheduled runs
    #[arg(long = "every-minutes")]
    every_minutes: Option<u64>,

    /// Stop a schedule after this many runs
    #[arg(long = "max-runs")]
    max_runs: Option<u32>,

    /// Stop a schedule once this many minutes have elapsed
    #[arg(long = "duration-minutes")]
    duration_minutes: Option<u64>,

    /// End the plan after the first run that does not pass
    #[arg(long = "stop-on-fail")]
    stop_on_fail: bool,

    /// Directory for the Markdown plan report and its archive
    #[arg(long = "reports-dir", default_value = DEFAULT_REPORTS_DIR)]
    reports_dir: PathBuf,

    /// Skip writing the Markdown plan report
    #[arg(long = "no-report")]
    no_report: bool,

    /// Exit non-zero when an episode status is not pass
    #[arg(long)]
    strict: bool,

    /// Extra arguments passed to the player, after `--`
    #[arg(last = true)]
    player_args: Vec<String>,
}

impl RunArgs {
    fn to_layer(&self) -> ConfigLayer {
        let screenshots = if self.no_screenshots {
            Some(false)
        } else if self.screenshots {
            Some(true)
        } else {
            None
        };

        ConfigLayer {
            executable: self.executable.clone(),
            args: (!self.player_args.is_empty()).then(|| self.player_args.clone()),
            mode: self.mode.clone(),
            scenario_id: self.scenario.clone(),
            scenarios_file: self.scenarios_file.clone(),
            duration_cap_seconds: self.duration,
            screenshots,
            screenshot_interval_seconds: self.screenshot_interval,
            screenshot_max_captures: self.screenshot_max,
            screenshot_command: self.screenshot_command.clone(),
            project_name: self.project.clone(),
            build_id: self.build_id.clone(),
            labels: self.labels.clone(),
            artifacts_root: self.artifacts_dir.clone(),
            player_log: self.player_log.then_some(true),
            ..self.ingestion.to_layer()
        }
    }

    fn plan(&self, layers: &[&ConfigLayer]) -> Result<RunPlan, PlanError> {
        let plan = match self.plan {
            PlanArg::Single => RunPlan::single(),
            PlanArg::Queue => RunPlan::queue(&self.scenarios)?,
            PlanArg::Schedule => {
                let scenario = requested_scenario_id(layers).ok_or(PlanError::MissingScenario)?;
                let every = self.every_minutes.ok_or(PlanError::MissingInterval)?;
                RunPlan::schedule(
                    &scenario,
                    minutes(every),
                    self.max_runs,
                    self.duration_minutes.map(minutes),
                )?
            }
        };
        let plan = plan.with_stop_on_fail(self.stop_on_fail);
        if self.no_report {
            return Ok(plan);
        }
        Ok(plan.with_reports_dir(&self.reports_dir))
    }
}

impl IngestionArgs {
    fn to_layer(&self) -> ConfigLayer {
        ConfigLayer {
            ingestion_base_url: self.base_url.clone(),
            ingestion_api_key: self.api_key.clone(),
            post_timeout_seconds: self.post_timeout,
            ..ConfigLayer::default()
        }
    }
}

/// Arguments for the replay subcommand.
#[derive(Parser, Debug)]
struct ReplayArgs {
    /// Pending payload written by a failed report (episode_pending.json)
    pending: PathBuf,

    #[command(flatten)]
    ingestion: IngestionArgs,
}

/// Arguments for the scenarios subcommand.
#[derive(Parser, Debug)]
struct ScenariosArgs {
    /// Scenario catalog file (JSON or YAML); the built-in catalog otherwise
    #[arg(long = "scenarios-file")]
    scenarios_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only the summary.
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match cli.command {
        Commands::Run(args) => run_command(&cli.config, &args).await?,
        Commands::Replay(args) => replay_command(&cli.config, &args).await?,
        Commands::Scenarios(args) => scenarios_command(&cli.config, &args)?,
    };

    // Use explicit exit for non-zero codes to ensure proper exit status
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

async fn run_command(config_path: &Path, args: &RunArgs) -> Result<i32> {
    // Settings that fail to parse still end the run with a summary line.
    let layers = match explicit_layers(config_path, args.to_layer()) {
        Ok(layers) => layers,
        Err(e) => return Ok(reject(e)),
    };
    let layers: Vec<&ConfigLayer> = layers.iter().collect();

    let catalog = match load_catalog(&layers) {
        Ok(catalog) => catalog,
        Err(e) => return Ok(reject(e)),
    };
    let plan = args.plan(&layers).context("Invalid run plan")?;
    debug!(plan = %plan.kind(), scenarios = catalog.ids().count(), "Starting plan");

    let capture = CommandScreenCapture::from_env(requested_screenshot_command(&layers).as_deref());
    let orchestrator = RunOrchestrator::new(
        Arc::new(catalog),
        Arc::new(ProcessSupervisor::new()),
        Arc::new(capture),
        Arc::new(HttpIngestionClient::new()),
    );

    let report = plan.execute(&orchestrator, &layers).await;
    for run in &report.runs {
        println!("{}", run.summary_line());
    }
    Ok(report.exit_code(args.strict))
}

fn reject(error: impl Into<RunError>) -> i32 {
    let report = RunReport::rejected(error);
    if let RunDisposition::Error(e) = &report.disposition {
        error!(error = %e, "Run refused");
    }
    println!("{}", report.summary_line());
    report.exit_code(false)
}

async fn replay_command(config_path: &Path, args: &ReplayArgs) -> Result<i32> {
    let layers = explicit_layers(config_path, args.ingestion.to_layer())
        .context("Invalid configuration")?;
    let layers: Vec<&ConfigLayer> = layers.iter().collect();

    let target = resolve_ingestion(&layers)
        .context("Invalid ingestion configuration")?
        .context("No ingestion endpoint configured; set AI_E_BASE_URL or --base-url")?;
    let reporter = EpisodeReporter::new(Arc::new(HttpIngestionClient::new()), Some(target));

    let episode_id = reporter
        .replay(&args.pending)
        .await
        .with_context(|| format!("Failed to replay {}", args.pending.display()))?;
    println!("replayed {} episode_id={episode_id}", args.pending.display());
    Ok(0)
}

fn scenarios_command(config_path: &Path, args: &ScenariosArgs) -> Result<i32> {
    let cli_layer = ConfigLayer {
        scenarios_file: args.scenarios_file.clone(),
        ..ConfigLayer::default()
    };
    let layers = explicit_layers(config_path, cli_layer).context("Invalid configuration")?;
    let layers: Vec<&ConfigLayer> = layers.iter().collect();

    let catalog = load_catalog(&layers).context("Failed to load scenario catalog")?;
    for scenario in catalog.iter() {
        println!("{}\t{}\t{} steps", scenario.id, scenario.name, scenario.steps.len());
    }
    Ok(0)
}

/// CLI, environment and config-file layers, highest precedence first.
fn explicit_layers(
    config_path: &Path,
    cli_layer: ConfigLayer,
) -> Result<Vec<ConfigLayer>, ConfigError> {
    let env_layer = ConfigLayer::from_env(|key| std::env::var(key).ok())?;

    let file_layer = if config_path.exists() {
        ConfigLayer::from_file(config_path).inspect_err(|e| {
            error!(path = %config_path.display(), error = %e, "Failed to load config file");
        })?
    } else {
        debug!(path = %config_path.display(), "Config file not found, skipping");
        ConfigLayer::default()
    };

    Ok(vec![cli_layer, env_layer, file_layer])
}

fn load_catalog(layers: &[&ConfigLayer]) -> Result<ScenarioCatalog, ScenarioError> {
    match requested_scenarios_file(layers) {
        Some(path) => ScenarioCatalog::load(&path),
        None => ScenarioCatalog::builtin(),
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_run(args: &[&str]) -> RunArgs {
        let mut argv = vec!["unity-runner", "run"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Run(args) => *args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_run_flags_map_onto_layer() {
        let args = parse_run(&[
            "--unity-exe",
            "/opt/game/Game.x86_64",
            "--mode",
            "breaker",
            "--scenario",
            "breaker-sprint",
            "--no-screenshots",
            "--label",
            "nightly,gpu",
            "--base-url",
            "http://127.0.0.1:9",
            "--player-log",
            "--",
            "-batchmode",
            "-nographics",
        ]);
        let layer = args.to_layer();

        assert_eq!(layer.executable, Some(PathBuf::from("/opt/game/Game.x86_64")));
        assert_eq!(layer.mode.as_deref(), Some("breaker"));
        assert_eq!(layer.scenario_id.as_deref(), Some("breaker-sprint"));
        assert_eq!(layer.screenshots, Some(false));
        assert_eq!(layer.labels, vec!["nightly", "gpu"]);
        assert_eq!(layer.ingestion_base_url.as_deref(), Some("http://127.0.0.1:9"));
        assert_eq!(layer.player_log, Some(true));
        assert_eq!(
            layer.args,
            Some(vec!["-batchmode".to_string(), "-nographics".to_string()])
        );
    }

    #[test]
    fn test_unset_flags_have_no_opinion() {
        let layer = parse_run(&[]).to_layer();
        assert_eq!(layer, ConfigLayer::default());
    }

    #[test]
    fn test_screenshot_flags_conflict() {
        let result = Cli::try_parse_from(["unity-runner", "run", "--screenshots", "--no-screenshots"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_plan_selection() {
        let queue = parse_run(&["--plan", "queue", "--scenarios", "guided-tour,idle-soak"]);
        let layer = queue.to_layer();
        let plan = queue.plan(&[&layer]).unwrap();
        assert_eq!(plan.kind().as_str(), "queue");
        assert_eq!(plan.reports_dir(), Some(Path::new("reports")));

        let quiet = parse_run(&["--no-report"]);
        let layer = quiet.to_layer();
        assert_eq!(quiet.plan(&[&layer]).unwrap().reports_dir(), None);

        let empty_queue = parse_run(&["--plan", "queue"]);
        let layer = empty_queue.to_layer();
        assert_eq!(empty_queue.plan(&[&layer]).unwrap_err(), PlanError::MissingScenarios);

        let schedule = parse_run(&["--plan", "schedule", "--scenario", "idle-soak"]);
        let layer = schedule.to_layer();
        assert_eq!(schedule.plan(&[&layer]).unwrap_err(), PlanError::MissingInterval);

        let schedule = parse_run(&[
            "--plan",
            "schedule",
            "--scenario",
            "idle-soak",
            "--every-minutes",
            "30",
            "--max-runs",
            "0",
        ]);
        let layer = schedule.to_layer();
        assert_eq!(
            schedule.plan(&[&layer]).unwrap_err(),
            PlanError::NotPositive("--max-runs")
        );
    }

    #[test]
    fn test_missing_config_file_is_skipped() {
        let temp = tempfile::TempDir::new().unwrap();
        let layers = explicit_layers(&temp.path().join("absent.yml"), ConfigLayer::default()).unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[2], ConfigLayer::default());
    }
}
