//! Episode construction.

use crate::config::RunConfig;
use crate::sampler::SamplerReport;
use crate::scenario::Scenario;
use runner_proto::{
    EPISODE_SOURCE, Episode, EpisodeArtifacts, EpisodeMetrics, EpisodeStatus, ObservedOutcome,
    ProcessOutcome,
};

/// Verdict for a process outcome. Order matters: a timeout is a failure even
/// if the kill looked like a crash.
pub fn derive_status(outcome: &ProcessOutcome) -> EpisodeStatus {
    if outcome.timed_out {
        EpisodeStatus::Fail
    } else if outcome.crashed {
        EpisodeStatus::Error
    } else if outcome.exit_code == 0 {
        EpisodeStatus::Pass
    } else {
        EpisodeStatus::Fail
    }
}

pub struct EpisodeBuilder;

impl EpisodeBuilder {
    /// Assembles the episode for a finished run. Pure.
    ///
    /// `metrics.duration_seconds` is the measured wall-clock time, not the
    /// configured cap. With a scenario, the contract goes into both
    /// `metrics.scenario` and the top-level `scenario`.
    pub fn build(
        config: &RunConfig,
        scenario: Option<&Scenario>,
        outcome: &ProcessOutcome,
        sampler: &SamplerReport,
        artifacts: EpisodeArtifacts,
    ) -> Episode {
        let status = derive_status(outcome);
        let duration_seconds = round_millis(outcome.wall_clock_seconds);

        let contract = scenario.map(|s| {
            let mut contract = s.contract();
            contract.observed = Some(ObservedOutcome {
                runtime_seconds: duration_seconds,
                exit_code: outcome.exit_code,
                status,
            });
            contract
        });

        Episode {
            source: EPISODE_SOURCE.to_string(),
            mode: config.mode,
            status,
            project: config.project_name.clone(),
            build_id: config.build_id.clone(),
            metrics: EpisodeMetrics {
                duration_seconds,
                exit_code: outcome.exit_code,
                timed_out: outcome.timed_out,
                crashed: outcome.crashed,
                screenshots_captured: sampler.captured,
                capture_disabled_reason: sampler.disabled_reason.clone(),
                scenario: contract.clone(),
            },
            artifacts,
            labels: config.labels.clone(),
            scenario: contract,
        }
    }
}

fn round_millis(seconds: f64) -> f64 {
    if seconds.is_finite() {
        (seconds * 1000.0).round() / 1000.0
    } else {
        0.0
    }
}
