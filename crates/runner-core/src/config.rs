//! Run configuration resolution.
//!
//! A run is described by several partial [`ConfigLayer`]s (CLI flags,
//! environment variables, an optional YAML file) plus the defaults carried by
//! the selected scenario and by the run mode. [`RunConfig::resolve`] merges
//! them in that precedence order into one validated, immutable [`RunConfig`].
//!
//! Screenshot enablement is fail-closed: an explicit disable in any layer that
//! decides the switch beats every scenario or mode default.

use crate::scenario::Scenario;
use runner_proto::{IngestionTarget, ParsedMode, RunMode, UnknownModeError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_DURATION_SECONDS: u64 = 300;
pub const DEFAULT_SCREENSHOT_INTERVAL_SECONDS: u64 = 5;
pub const DEFAULT_POST_TIMEOUT_SECONDS: u64 = 15;
pub const DEFAULT_ARTIFACTS_DIR: &str = "runner_artifacts";
pub const DEFAULT_LABELS: &[&str] = &["harness"];

pub const BREAKER_MAX_DURATION_SECONDS: u64 = 90;
pub const BREAKER_SCREENSHOT_INTERVAL_SECONDS: u64 = 2;
pub const BREAKER_MAX_SCREENSHOTS: u32 = 20;

const PLACEHOLDER_HOSTS: &[&str] = &["example.com", "www.example.com"];

/// One partial source of configuration.
///
/// Every field is optional; `None` means "this layer has no opinion".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigLayer {
    #[serde(alias = "unity_exe_path")]
    pub executable: Option<PathBuf>,
    pub args: Option<Vec<String>>,
    #[serde(alias = "run_mode")]
    pub mode: Option<String>,
    pub scenario_id: Option<String>,
    pub scenarios_file: Option<PathBuf>,
    #[serde(alias = "run_duration_seconds")]
    pub duration_cap_seconds: Option<u64>,
    pub screenshots: Option<bool>,
    pub screenshot_interval_seconds: Option<u64>,
    pub screenshot_max_captures: Option<u32>,
    pub screenshot_command: Option<String>,
    #[serde(alias = "ai_e_base_url")]
    pub ingestion_base_url: Option<String>,
    #[serde(alias = "ai_e_api_key")]
    pub ingestion_api_key: Option<String>,
    pub post_timeout_seconds: Option<u64>,
    pub project_name: Option<String>,
    pub build_id: Option<String>,
    pub labels: Vec<String>,
    pub artifacts_root: Option<PathBuf>,
    pub player_log: Option<bool>,
}

impl ConfigLayer {
    /// Loads a layer from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration layer from file");
        let content = std::fs::read_to_string(path_ref)?;
        let layer: Self = serde_yaml::from_str(&content)?;
        Ok(layer)
    }

    /// Builds a layer from environment variables.
    ///
    /// `lookup` abstracts `std::env::var` so tests can pass a map.
    pub fn from_env<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let get_any = |keys: &[&str]| keys.iter().find_map(|key| get(key));

        let labels = get("EPISODE_LABELS")
            .map(|raw| normalize_labels(raw.split(',')))
            .unwrap_or_default();

        Ok(Self {
            executable: get("UNITY_EXE_PATH").map(PathBuf::from),
            args: get("UNITY_ARGS").map(|raw| raw.split_whitespace().map(String::from).collect()),
            mode: get("RUN_MODE"),
            scenario_id: get("SCENARIO_ID"),
            scenarios_file: get("SCENARIOS_FILE").map(PathBuf::from),
            duration_cap_seconds: parse_env_number(&get, &["RUN_DURATION_SECONDS"])?,
            screenshots: parse_env_bool(&get, "RUNNER_SCREENSHOTS")?,
            screenshot_interval_seconds: parse_env_number(
                &get,
                &["RUNNER_SCREENSHOT_INTERVAL", "SCREENSHOT_INTERVAL_SECONDS"],
            )?,
            screenshot_max_captures: parse_env_number(
                &get,
                &["RUNNER_SCREENSHOT_MAX_CAPTURES", "SCREENSHOT_MAX_CAPTURES"],
            )?,
            screenshot_command: get("RUNNER_SCREENSHOT_COMMAND"),
            ingestion_base_url: get_any(&["AI_E_BASE_URL", "API_BASE_URL", "SERVER_URL"]),
            ingestion_api_key: get("AI_E_API_KEY"),
            post_timeout_seconds: parse_env_number(&get, &["RUNNER_POST_TIMEOUT_SECONDS"])?,
            project_name: get("PROJECT_NAME"),
            build_id: get("BUILD_ID"),
            labels,
            artifacts_root: get("ARTIFACTS_DIR").map(PathBuf::from),
            player_log: parse_env_bool(&get, "RUNNER_PLAYER_LOG")?,
        })
    }
}

fn parse_env_number<T, G>(get: &G, keys: &[&str]) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(raw) = get(key) {
            return raw.parse::<T>().map(Some).map_err(|_| ConfigError::InvalidValue {
                field: (*key).to_string(),
                message: format!("'{raw}' is not a non-negative integer"),
            });
        }
    }
    Ok(None)
}

fn parse_env_bool<G>(get: &G, key: &str) -> Result<Option<bool>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    parse_bool(&raw).map(Some).ok_or_else(|| ConfigError::InvalidValue {
        field: key.to_string(),
        message: format!("'{raw}' must be a boolean (0/1, true/false, yes/no, on/off)"),
    })
}

/// Parses the boolean spellings accepted in environment variables.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Explicit screenshot request after merging the explicit layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenshotSwitch {
    ForcedOff,
    ForcedOn,
    Default,
}

impl ScreenshotSwitch {
    /// The highest-precedence layer that states a value decides.
    pub fn from_layers(layers: &[&ConfigLayer]) -> Self {
        match first(layers, |l| l.screenshots) {
            Some(false) => ScreenshotSwitch::ForcedOff,
            Some(true) => ScreenshotSwitch::ForcedOn,
            None => ScreenshotSwitch::Default,
        }
    }

    /// Applies the switch over the scenario and mode defaults.
    pub fn resolve(self, scenario_default: Option<bool>, mode_default: bool) -> bool {
        match self {
            ScreenshotSwitch::ForcedOff => false,
            ScreenshotSwitch::ForcedOn => true,
            ScreenshotSwitch::Default => scenario_default.unwrap_or(mode_default),
        }
    }
}

/// Fully resolved, validated description of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub mode: RunMode,
    pub scenario_id: Option<String>,
    pub duration_cap_seconds: u64,
    pub screenshots_enabled: bool,
    pub screenshot_interval_seconds: u64,
    /// `None` means no cap beyond the run duration.
    pub screenshot_max_captures: Option<u32>,
    /// `None` when no usable ingestion endpoint is configured.
    pub ingestion: Option<IngestionTarget>,
    pub project_name: String,
    pub build_id: String,
    pub labels: Vec<String>,
    pub artifacts_root: PathBuf,
    pub player_log: bool,
}

impl RunConfig {
    /// Merges `layers` (highest precedence first) with scenario and mode
    /// defaults.
    ///
    /// Pure: performs no IO and touches no global state.
    pub fn resolve(
        layers: &[&ConfigLayer],
        scenario: Option<&Scenario>,
    ) -> Result<Self, ConfigError> {
        let parsed = requested_mode(layers)?;
        let mode = parsed.mode;

        if mode.requires_scenario() && scenario.is_none() {
            return Err(ConfigError::ScenarioRequired { mode });
        }

        let executable = first(layers, |l| l.executable.clone())
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::Missing { field: "executable" })?;
        let project_name = require_string(layers, "project_name", |l| l.project_name.clone())?;
        let build_id = require_string(layers, "build_id", |l| l.build_id.clone())?;

        let defaults = scenario.map(|s| &s.defaults);

        let mut duration_cap_seconds = first(layers, |l| l.duration_cap_seconds)
            .or_else(|| defaults.and_then(|d| d.duration_seconds))
            .unwrap_or(DEFAULT_DURATION_SECONDS);
        if duration_cap_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "duration_cap_seconds".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let switch = ScreenshotSwitch::from_layers(layers);
        let screenshots_enabled = switch.resolve(
            defaults.and_then(|d| d.screenshots),
            mode == RunMode::Breaker,
        );

        let mut screenshot_interval_seconds = first(layers, |l| l.screenshot_interval_seconds)
            .or_else(|| defaults.and_then(|d| d.screenshot_interval_seconds))
            .unwrap_or(DEFAULT_SCREENSHOT_INTERVAL_SECONDS);
        if screenshot_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "screenshot_interval_seconds".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let mut screenshot_max_captures = first(layers, |l| l.screenshot_max_captures)
            .or_else(|| defaults.and_then(|d| d.max_screenshots));

        if mode == RunMode::Breaker {
            duration_cap_seconds = duration_cap_seconds.min(BREAKER_MAX_DURATION_SECONDS);
            screenshot_interval_seconds =
                screenshot_interval_seconds.min(BREAKER_SCREENSHOT_INTERVAL_SECONDS);
            screenshot_max_captures = Some(
                screenshot_max_captures
                    .unwrap_or(BREAKER_MAX_SCREENSHOTS)
                    .min(BREAKER_MAX_SCREENSHOTS),
            );
        }

        let ingestion = resolve_ingestion(layers)?;

        let mut labels = layers
            .iter()
            .map(|l| normalize_labels(l.labels.iter().map(String::as_str)))
            .find(|labels| !labels.is_empty())
            .unwrap_or_else(|| DEFAULT_LABELS.iter().map(|s| (*s).to_string()).collect());
        if let Some(d) = defaults {
            merge_labels(&mut labels, d.labels.iter().map(String::as_str));
        }
        match mode {
            RunMode::Instructed => merge_labels(&mut labels, ["instructed"]),
            RunMode::Breaker => merge_labels(&mut labels, ["breaker"]),
            RunMode::Freestyle => {}
        }

        let config = Self {
            executable,
            args: first(layers, |l| l.args.clone()).unwrap_or_default(),
            mode,
            scenario_id: scenario.map(|s| s.id.clone()),
            duration_cap_seconds,
            screenshots_enabled,
            screenshot_interval_seconds,
            screenshot_max_captures,
            ingestion,
            project_name,
            build_id,
            labels,
            artifacts_root: first(layers, |l| l.artifacts_root.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACTS_DIR)),
            player_log: first(layers, |l| l.player_log).unwrap_or(false),
        };

        debug!(
            mode = %config.mode,
            scenario = config.scenario_id.as_deref().unwrap_or("none"),
            duration_cap_seconds = config.duration_cap_seconds,
            screenshots_enabled = config.screenshots_enabled,
            screenshot_interval_seconds = config.screenshot_interval_seconds,
            screenshot_max_captures = ?config.screenshot_max_captures,
            ingestion = config.ingestion.is_some(),
            "Run configuration resolved"
        );
        Ok(config)
    }

    /// Adds labels after resolution (plan and scenario tags).
    pub fn with_extra_labels<'a>(mut self, extra: impl IntoIterator<Item = &'a str>) -> Self {
        merge_labels(&mut self.labels, extra);
        self
    }

    /// The sampler interval as a duration.
    pub fn screenshot_interval(&self) -> Duration {
        Duration::from_secs(self.screenshot_interval_seconds)
    }

    /// The supervisor deadline as a duration.
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.duration_cap_seconds)
    }
}

/// Parses the requested mode from the highest-precedence layer that sets one.
pub fn requested_mode(layers: &[&ConfigLayer]) -> Result<ParsedMode, ConfigError> {
    let raw = first(layers, |l| l.mode.clone()).ok_or(ConfigError::Missing { field: "mode" })?;
    let parsed = RunMode::parse(&raw)?;
    if parsed.deprecated_alias {
        warn!(value = %raw, "Run mode 'c1' is deprecated; treating it as 'freestyle'");
    }
    Ok(parsed)
}

/// Scenario id requested by the explicit layers, if any.
pub fn requested_scenario_id(layers: &[&ConfigLayer]) -> Option<String> {
    first(layers, |l| l.scenario_id.clone())
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

/// Capture command template requested by the explicit layers, if any.
pub fn requested_screenshot_command(layers: &[&ConfigLayer]) -> Option<String> {
    first(layers, |l| l.screenshot_command.clone())
}

/// Scenario catalog path requested by the explicit layers, if any.
pub fn requested_scenarios_file(layers: &[&ConfigLayer]) -> Option<PathBuf> {
    first(layers, |l| l.scenarios_file.clone())
}

fn first<T>(layers: &[&ConfigLayer], pick: impl Fn(&ConfigLayer) -> Option<T>) -> Option<T> {
    layers.iter().find_map(|layer| pick(layer))
}

fn require_string(
    layers: &[&ConfigLayer],
    field: &'static str,
    pick: impl Fn(&ConfigLayer) -> Option<String>,
) -> Result<String, ConfigError> {
    first(layers, pick)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { field })
}

/// Ingestion target from the explicit layers alone; `None` when unset or a
/// placeholder.
pub fn resolve_ingestion(layers: &[&ConfigLayer]) -> Result<Option<IngestionTarget>, ConfigError> {
    let Some(raw) = first(layers, |l| l.ingestion_base_url.clone()) else {
        return Ok(None);
    };
    let Some(base_url) = parse_base_url(&raw)? else {
        warn!(
            base_url = %raw,
            "Ingestion base URL looks like a placeholder; episode posting disabled"
        );
        return Ok(None);
    };
    let api_key = require_string(layers, "ingestion_api_key", |l| l.ingestion_api_key.clone())?;
    let timeout_secs = first(layers, |l| l.post_timeout_seconds).unwrap_or(DEFAULT_POST_TIMEOUT_SECONDS);
    Ok(Some(IngestionTarget {
        base_url,
        api_key,
        timeout: Duration::from_secs(timeout_secs.max(1)),
    }))
}

/// Validates an ingestion base URL.
///
/// Returns `Ok(None)` for placeholder hosts so that a template value does not
/// turn into a network call.
fn parse_base_url(raw: &str) -> Result<Option<String>, ConfigError> {
    let base = raw.trim().trim_end_matches('/');
    let invalid = |message: &str| ConfigError::InvalidValue {
        field: "ingestion_base_url".to_string(),
        message: message.to_string(),
    };
    let rest = base
        .strip_prefix("http://")
        .or_else(|| base.strip_prefix("https://"))
        .ok_or_else(|| invalid("must include an http or https scheme"))?;
    let authority = rest.split('/').next().unwrap_or_default();
    let host = authority
        .rsplit('@')
        .next()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if host.is_empty() {
        return Err(invalid("must include a hostname"));
    }
    if PLACEHOLDER_HOSTS.contains(&host.as_str()) || host.ends_with(".example.com") {
        return Ok(None);
    }
    Ok(Some(base.to_string()))
}

/// Trims, drops empties, and de-duplicates while keeping first-seen order.
pub fn normalize_labels<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut labels = Vec::new();
    merge_labels(&mut labels, raw);
    labels
}

/// Appends labels not already present, keeping order.
pub fn merge_labels<'a>(labels: &mut Vec<String>, extra: impl IntoIterator<Item = &'a str>) {
    for label in extra {
        let cleaned = label.trim();
        if !cleaned.is_empty() && !labels.iter().any(|l| l == cleaned) {
            labels.push(cleaned.to_string());
        }
    }
}

/// Masks a secret for logging, keeping the last `visible` characters.
pub fn redact_secret(value: &str, visible: usize) -> String {
    let cleaned: Vec<char> = value.trim().chars().collect();
    if cleaned.len() <= visible {
        return "*".repeat(cleaned.len());
    }
    let hidden = cleaned.len() - visible;
    let tail: String = cleaned[hidden..].iter().collect();
    format!("{}{}", "*".repeat(hidden), tail)
}

/// Configuration errors. Each names the offending field.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("missing required field '{field}'")]
    Missing { field: &'static str },

    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    #[error("invalid value for 'mode': {0}")]
    UnknownMode(#[from] UnknownModeError),

    #[error("run mode '{mode}' requires a scenario (set SCENARIO_ID or --scenario)")]
    ScenarioRequired { mode: RunMode },
}

impl ConfigError {
    /// Name of the offending field, when the error is about one.
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigError::Missing { field } => Some(field),
            ConfigError::InvalidValue { field, .. } => Some(field),
            ConfigError::UnknownMode(_) => Some("mode"),
            ConfigError::ScenarioRequired { .. } => Some("scenario_id"),
            ConfigError::Io(_) | ConfigError::Yaml(_) => None,
        }
    }
}
