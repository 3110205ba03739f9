//! Scenario catalog.
//!
//! Scenarios are named, reusable descriptions of what a run should exercise
//! and what it is expected to observe. A catalog is loaded once per process
//! and never mutated afterwards, so shared references are safe to hand out.
//!
//! Catalog files may be JSON or YAML. The top level can be a list of entries,
//! an object with a `scenarios` list, or a mapping of id to entry.

use runner_proto::ScenarioContract;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

const BUILTIN_CATALOG: &str = include_str!("../data/scenarios.json");

/// One resolved scenario definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    pub steps: Vec<String>,
    pub expected: serde_json::Map<String, Value>,
    pub seed: Option<i64>,
    pub defaults: ScenarioDefaults,
}

impl Scenario {
    /// The contract echoed into the episode, without an observed outcome.
    pub fn contract(&self) -> ScenarioContract {
        ScenarioContract {
            scenario_id: self.id.clone(),
            scenario_name: self.name.clone(),
            scenario_steps: self.steps.clone(),
            expected: self.expected.clone(),
            scenario_seed: self.seed,
            observed: None,
        }
    }
}

/// Runner settings a scenario suggests when no explicit layer sets them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScenarioDefaults {
    pub duration_seconds: Option<u64>,
    pub screenshot_interval_seconds: Option<u64>,
    pub max_screenshots: Option<u32>,
    pub screenshots: Option<bool>,
    pub labels: Vec<String>,
}

impl ScenarioDefaults {
    /// Fields from `self` win; gaps are filled from `fallback`.
    fn or(self, fallback: ScenarioDefaults) -> ScenarioDefaults {
        ScenarioDefaults {
            duration_seconds: self.duration_seconds.or(fallback.duration_seconds),
            screenshot_interval_seconds: self
                .screenshot_interval_seconds
                .or(fallback.screenshot_interval_seconds),
            max_screenshots: self.max_screenshots.or(fallback.max_screenshots),
            screenshots: self.screenshots.or(fallback.screenshots),
            labels: if self.labels.is_empty() {
                fallback.labels
            } else {
                self.labels
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawScenario {
    #[serde(default, alias = "id")]
    scenario_id: Option<String>,
    #[serde(default, alias = "name")]
    scenario_name: Option<String>,
    #[serde(default, alias = "steps")]
    scenario_steps: Option<Vec<String>>,
    #[serde(default)]
    expected: Option<Value>,
    #[serde(default, alias = "seed")]
    scenario_seed: Option<i64>,
    #[serde(default)]
    runner: Option<ScenarioDefaults>,
    #[serde(flatten)]
    top_level: ScenarioDefaults,
}

impl RawScenario {
    fn into_scenario(self, fallback_id: Option<&str>) -> Result<Scenario, ScenarioError> {
        let id = self
            .scenario_id
            .as_deref()
            .or(fallback_id)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ScenarioError::Invalid {
                scenario: fallback_id.unwrap_or("<unnamed>").to_string(),
                message: "missing scenario_id".to_string(),
            })?
            .to_string();
        let invalid = |message: &str| ScenarioError::Invalid {
            scenario: id.clone(),
            message: message.to_string(),
        };

        let steps: Vec<String> = self
            .scenario_steps
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.trim().to_string())
            .collect();
        if steps.is_empty() || steps.iter().any(String::is_empty) {
            return Err(invalid("scenario_steps must be a non-empty list of non-empty strings"));
        }

        let expected = match self.expected {
            Some(Value::Object(map)) if !map.is_empty() => map,
            _ => return Err(invalid("expected must be a non-empty object")),
        };

        let name = self
            .scenario_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| id.clone());

        let defaults = match self.runner {
            Some(runner) => runner.or(self.top_level),
            None => self.top_level,
        };

        Ok(Scenario {
            id,
            name,
            steps,
            expected,
            seed: self.scenario_seed,
            defaults,
        })
    }
}

/// Read-only, process-wide set of scenarios.
#[derive(Debug, Clone)]
pub struct ScenarioCatalog {
    scenarios: Vec<Scenario>,
    source: String,
}

impl ScenarioCatalog {
    /// Loads a catalog file; `.yml`/`.yaml` parse as YAML, anything else as JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref).map_err(|source| ScenarioError::Io {
            path: path_ref.to_path_buf(),
            source,
        })?;
        let is_yaml = path_ref
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"));
        let root: Value = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| ScenarioError::Parse(e.to_string()))?
        } else {
            serde_json::from_str(&content).map_err(|e| ScenarioError::Parse(e.to_string()))?
        };
        let catalog = Self::from_value(root, path_ref.display().to_string())?;
        debug!(
            path = %path_ref.display(),
            scenarios = catalog.scenarios.len(),
            "Scenario catalog loaded"
        );
        Ok(catalog)
    }

    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self, ScenarioError> {
        let root: Value =
            serde_json::from_str(BUILTIN_CATALOG).map_err(|e| ScenarioError::Parse(e.to_string()))?;
        Self::from_value(root, "builtin".to_string())
    }

    fn from_value(root: Value, source: String) -> Result<Self, ScenarioError> {
        let entries: Vec<(Option<String>, Value)> = match root {
            Value::Array(items) => items.into_iter().map(|v| (None, v)).collect(),
            Value::Object(mut map) => match map.remove("scenarios") {
                Some(Value::Array(items)) => items.into_iter().map(|v| (None, v)).collect(),
                Some(other) => {
                    return Err(ScenarioError::Parse(format!(
                        "'scenarios' must be a list, found {}",
                        json_kind(&other)
                    )));
                }
                None => map.into_iter().map(|(k, v)| (Some(k), v)).collect(),
            },
            other => {
                return Err(ScenarioError::Parse(format!(
                    "catalog must be a list or an object, found {}",
                    json_kind(&other)
                )));
            }
        };

        let mut scenarios = Vec::with_capacity(entries.len());
        let mut seen = HashSet::new();
        for (key, entry) in entries {
            let raw: RawScenario = serde_json::from_value(entry).map_err(|e| ScenarioError::Invalid {
                scenario: key.clone().unwrap_or_else(|| "<unnamed>".to_string()),
                message: e.to_string(),
            })?;
            let scenario = raw.into_scenario(key.as_deref())?;
            if !seen.insert(scenario.id.clone()) {
                return Err(ScenarioError::Invalid {
                    scenario: scenario.id,
                    message: "duplicate scenario_id".to_string(),
                });
            }
            scenarios.push(scenario);
        }

        Ok(Self { scenarios, source })
    }

    /// Looks up a scenario by id.
    pub fn resolve(&self, scenario_id: &str) -> Result<&Scenario, ScenarioError> {
        let wanted = scenario_id.trim();
        self.scenarios
            .iter()
            .find(|s| s.id == wanted)
            .ok_or_else(|| ScenarioError::NotFound {
                scenario: wanted.to_string(),
                source_name: self.source.clone(),
            })
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.scenarios.iter().map(|s| s.id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter()
    }

    /// Where the catalog came from (a path or `builtin`).
    pub fn source(&self) -> &str {
        &self.source
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Errors loading or querying a scenario catalog.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("scenario '{scenario}' not found in catalog {source_name}")]
    NotFound { scenario: String, source_name: String },

    #[error("invalid scenario '{scenario}': {message}")]
    Invalid { scenario: String, message: String },

    #[error("failed to read scenario catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scenario catalog: {0}")]
    Parse(String),
}
