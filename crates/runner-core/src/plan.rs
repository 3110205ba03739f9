//! Run plans: one run, a queue of scenarios, or a repeating schedule.

use crate::config::ConfigLayer;
use crate::orchestrator::{RunOrchestrator, RunReport};
use crate::report::write_plan_report;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    Single,
    Queue,
    Schedule,
}

impl PlanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanKind::Single => "single",
            PlanKind::Queue => "queue",
            PlanKind::Schedule => "schedule",
        }
    }
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated execution plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    kind: PlanKind,
    scenarios: Vec<String>,
    every: Option<Duration>,
    max_runs: Option<u32>,
    total_duration: Option<Duration>,
    stop_on_fail: bool,
    reports_dir: Option<PathBuf>,
}

impl RunPlan {
    /// A single run using whatever scenario the layers name.
    pub fn single() -> Self {
        Self {
            kind: PlanKind::Single,
            scenarios: Vec::new(),
            every: None,
            max_runs: None,
            total_duration: None,
            stop_on_fail: false,
            reports_dir: None,
        }
    }

    /// Runs each scenario once, in order.
    pub fn queue<I, S>(scenarios: I) -> Result<Self, PlanError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let scenarios: Vec<String> = scenarios
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if scenarios.is_empty() {
            return Err(PlanError::MissingScenarios);
        }
        Ok(Self {
            kind: PlanKind::Queue,
            scenarios,
            ..Self::single()
        })
    }

    /// Repeats `scenario` every `every`, bounded by `max_runs` and/or
    /// `total_duration` when given.
    pub fn schedule(
        scenario: &str,
        every: Duration,
        max_runs: Option<u32>,
        total_duration: Option<Duration>,
    ) -> Result<Self, PlanError> {
        let scenario = scenario.trim();
        if scenario.is_empty() {
            return Err(PlanError::MissingScenario);
        }
        if every.is_zero() {
            return Err(PlanError::NotPositive("--every-minutes"));
        }
        if max_runs == Some(0) {
            return Err(PlanError::NotPositive("--max-runs"));
        }
        if total_duration.is_some_and(|d| d.is_zero()) {
            return Err(PlanError::NotPositive("--duration-minutes"));
        }
        Ok(Self {
            kind: PlanKind::Schedule,
            scenarios: vec![scenario.to_string()],
            every: Some(every),
            max_runs,
            total_duration,
            ..Self::single()
        })
    }

    pub fn with_stop_on_fail(mut self, stop_on_fail: bool) -> Self {
        self.stop_on_fail = stop_on_fail;
        self
    }

    /// Writes a Markdown summary under `dir` once the plan finishes.
    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(dir.into());
        self
    }

    pub fn reports_dir(&self) -> Option<&Path> {
        self.reports_dir.as_deref()
    }

    pub fn kind(&self) -> PlanKind {
        self.kind
    }

    /// Executes the plan. `layers` are the explicit configuration layers; the
    /// plan's scenario choice overrides them.
    pub async fn execute(&self, orchestrator: &RunOrchestrator, layers: &[&ConfigLayer]) -> PlanReport {
        let started_at = Utc::now();
        let started = Instant::now();
        let mut runs = Vec::new();
        let mut index = 0usize;

        loop {
            let scenario = match self.kind {
                PlanKind::Single => None,
                PlanKind::Queue => match self.scenarios.get(index) {
                    Some(id) => Some(id.as_str()),
                    None => break,
                },
                PlanKind::Schedule => self.scenarios.first().map(String::as_str),
            };

            let report = self.run_once(orchestrator, layers, scenario).await;
            let stop = self.stop_on_fail && !report.passed();
            runs.push(report);
            index += 1;

            if stop {
                warn!(plan = %self.kind, run = index, "Run did not pass; stopping plan");
                break;
            }
            match self.kind {
                PlanKind::Single => break,
                PlanKind::Queue => continue,
                PlanKind::Schedule => {}
            }

            if self.max_runs.is_some_and(|max| index >= max as usize) {
                break;
            }
            let every = self.every.unwrap_or_default();
            let Some(next_start) = u32::try_from(index)
                .ok()
                .and_then(|n| every.checked_mul(n))
                .and_then(|offset| started.checked_add(offset))
            else {
                warn!(plan = %self.kind, run = index, "Next scheduled start is out of range; stopping plan");
                break;
            };
            if let Some(total) = self.total_duration
                && next_start.duration_since(started) >= total
            {
                break;
            }
            info!(plan = %self.kind, next_run = index + 1, "Waiting for next scheduled run");
            tokio::time::sleep_until(next_start).await;
        }

        let mut report = PlanReport {
            kind: self.kind,
            stop_on_fail: self.stop_on_fail,
            started_at,
            finished_at: Utc::now(),
            runs,
            report_path: None,
        };
        if let Some(dir) = &self.reports_dir {
            match write_plan_report(dir, &report) {
                Ok(path) => {
                    info!(path = %path.display(), "Plan report written");
                    report.report_path = Some(path);
                }
                Err(e) => warn!(error = %e, "Failed to write plan report"),
            }
        }
        report
    }

    async fn run_once(
        &self,
        orchestrator: &RunOrchestrator,
        layers: &[&ConfigLayer],
        scenario: Option<&str>,
    ) -> RunReport {
        if self.kind == PlanKind::Single {
            return orchestrator.run(layers, &[]).await;
        }

        let override_layer = ConfigLayer {
            scenario_id: scenario.map(String::from),
            ..ConfigLayer::default()
        };
        let mut merged: Vec<&ConfigLayer> = Vec::with_capacity(layers.len() + 1);
        merged.push(&override_layer);
        merged.extend_from_slice(layers);

        let mut labels = vec![format!("plan:{}", self.kind)];
        if let Some(id) = scenario {
            labels.push(format!("scenario:{id}"));
        }
        orchestrator.run(&merged, &labels).await
    }
}

/// Results of every run a plan executed, in order.
#[derive(Debug)]
pub struct PlanReport {
    pub kind: PlanKind,
    pub stop_on_fail: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub runs: Vec<RunReport>,
    /// `report_last_run.md`, when a report was written.
    pub report_path: Option<PathBuf>,
}

impl PlanReport {
    pub fn passed_count(&self) -> usize {
        self.runs.iter().filter(|r| r.passed()).count()
    }

    /// Worst exit code across runs.
    pub fn exit_code(&self, strict: bool) -> i32 {
        self.runs
            .iter()
            .map(|r| r.exit_code(strict))
            .max_by_key(|code| severity(*code))
            .unwrap_or(0)
    }
}

// 1 (error) outranks 4 (strict non-pass), which outranks 3 (pending).
fn severity(code: i32) -> u8 {
    match code {
        0 => 0,
        3 => 1,
        4 => 2,
        _ => 3,
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("--plan queue requires --scenarios")]
    MissingScenarios,

    #[error("--plan schedule requires --scenario")]
    MissingScenario,

    #[error("--plan schedule requires --every-minutes")]
    MissingInterval,

    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}
