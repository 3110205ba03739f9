//! # runner-core
//!
//! Everything between "a run was requested" and "its episode was delivered or
//! saved for replay":
//! - Layered run configuration with mode policy and breaker clamps
//! - The scenario catalog
//! - Run-scoped artifact directories and the per-run event journal
//! - Periodic screenshot sampling
//! - Episode construction and single-attempt reporting
//! - The run orchestrator and multi-run plans
//! - Markdown plan reports
//!
//! Process supervision, screen capture and HTTP delivery are reached through
//! the traits in `runner-proto`; concrete implementations live in
//! `runner-adapters`.

mod artifacts;
mod config;
mod episode;
mod events;
mod orchestrator;
mod plan;
mod report;
mod reporter;
mod sampler;
mod scenario;

pub use artifacts::{
    ArtifactError, ArtifactHandle, ArtifactStore, LogStream, LogWriter, PENDING_FILE,
    PAYLOAD_FILE, RESPONSE_FILE, ScreenshotWriter, run_id, slugify,
};
pub use config::{
    BREAKER_MAX_DURATION_SECONDS, BREAKER_MAX_SCREENSHOTS, BREAKER_SCREENSHOT_INTERVAL_SECONDS,
    ConfigError, ConfigLayer, DEFAULT_ARTIFACTS_DIR, DEFAULT_DURATION_SECONDS,
    DEFAULT_SCREENSHOT_INTERVAL_SECONDS, RunConfig, ScreenshotSwitch, merge_labels,
    normalize_labels, parse_bool, redact_secret, requested_mode, requested_scenario_id,
    requested_scenarios_file, requested_screenshot_command, resolve_ingestion,
};
pub use episode::{EpisodeBuilder, derive_status};
pub use events::{EVENTS_FILE, EventLog, EventRecord, read_events};
pub use orchestrator::{
    RunDisposition, RunError, RunOrchestrator, RunReport, RunState, STRICT_NON_PASS_EXIT_CODE,
};
pub use plan::{PlanError, PlanKind, PlanReport, RunPlan};
pub use report::{
    ARCHIVE_DIR, DEFAULT_REPORTS_DIR, LAST_REPORT_FILE, render_plan_report, write_plan_report,
};
pub use reporter::{EpisodeReporter, ReportOutcome, ReporterError};
pub use sampler::{STOP_GRACE, SamplerHandle, SamplerReport, ScreenshotSampler, ScreenshotSink};
pub use scenario::{Scenario, ScenarioCatalog, ScenarioDefaults, ScenarioError};
