//! The episode report sent to the ingestion service.

use crate::mode::RunMode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value of the `source` field on every episode.
pub const EPISODE_SOURCE: &str = "unity-runner";

/// Verdict for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeStatus {
    Pass,
    Fail,
    Error,
}

impl EpisodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EpisodeStatus::Pass => "pass",
            EpisodeStatus::Fail => "fail",
            EpisodeStatus::Error => "error",
        }
    }
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured, immutable report of a single unattended run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub source: String,
    pub mode: RunMode,
    pub status: EpisodeStatus,
    pub project: String,
    pub build_id: String,
    pub metrics: EpisodeMetrics,
    pub artifacts: EpisodeArtifacts,
    pub labels: Vec<String>,
    /// Scenario contract echo. Mirrors `metrics.scenario` for consumers that
    /// read it from the top level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<ScenarioContract>,
}

impl Episode {
    /// Serializes the episode into the exact bytes sent over the wire.
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetrics {
    /// Measured wall-clock time of the supervised run.
    pub duration_seconds: f64,
    pub exit_code: i32,
    pub timed_out: bool,
    pub crashed: bool,
    pub screenshots_captured: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_disabled_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<ScenarioContract>,
}

/// Absolute paths of everything the run wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeArtifacts {
    pub logs: Vec<String>,
    pub screenshots: Vec<String>,
}

/// Scenario definition echoed back with what actually happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioContract {
    pub scenario_id: String,
    pub scenario_name: String,
    pub scenario_steps: Vec<String>,
    pub expected: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<ObservedOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedOutcome {
    pub runtime_seconds: f64,
    pub exit_code: i32,
    pub status: EpisodeStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&EpisodeStatus::Fail).unwrap();
        assert_eq!(json, "\"fail\"");
    }

    #[test]
    fn scenario_field_is_omitted_when_absent() {
        let episode = Episode {
            source: EPISODE_SOURCE.to_string(),
            mode: RunMode::Freestyle,
            status: EpisodeStatus::Pass,
            project: "demo".to_string(),
            build_id: "b1".to_string(),
            metrics: EpisodeMetrics {
                duration_seconds: 1.5,
                exit_code: 0,
                timed_out: false,
                crashed: false,
                screenshots_captured: 0,
                capture_disabled_reason: None,
                scenario: None,
            },
            artifacts: EpisodeArtifacts::default(),
            labels: vec!["harness".to_string()],
            scenario: None,
        };

        let value: serde_json::Value =
            serde_json::from_slice(&episode.to_payload().unwrap()).unwrap();
        assert!(value.get("scenario").is_none());
        assert!(value["metrics"].get("scenario").is_none());
        assert_eq!(value["mode"], "freestyle");
        assert_eq!(value["build_id"], "b1");
    }
}
