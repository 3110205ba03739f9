//! Markdown summaries of executed plans.
//!
//! ```text
//! <reports dir>/
//!   report_last_run.md
//!   archive/<finished %Y%m%d_%H%M%S>_<first run id or plan_<kind>>.md
//! <run root>/report_last_run.md   (copy, one per run of the plan)
//! ```

use crate::artifacts::{ArtifactError, write_atomic};
use crate::orchestrator::{RunDisposition, RunReport};
use crate::plan::PlanReport;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory the CLI writes plan reports to, relative to the working directory.
pub const DEFAULT_REPORTS_DIR: &str = "reports";
pub const LAST_REPORT_FILE: &str = "report_last_run.md";
pub const ARCHIVE_DIR: &str = "archive";

/// Renders `report` and writes the latest copy, the archive copy and one copy
/// per run directory. Returns the path of the latest copy.
///
/// A run directory that cannot take its copy is logged and skipped.
pub fn write_plan_report(dir: &Path, report: &PlanReport) -> Result<PathBuf, ArtifactError> {
    let text = render_plan_report(report);

    let archive_dir = dir.join(ARCHIVE_DIR);
    std::fs::create_dir_all(&archive_dir).map_err(|e| ArtifactError::io(&archive_dir, e))?;

    let last = dir.join(LAST_REPORT_FILE);
    write_atomic(&last, text.as_bytes())?;

    let archive = archive_dir.join(format!(
        "{}_{}.md",
        report.finished_at.format("%Y%m%d_%H%M%S"),
        archive_suffix(report)
    ));
    write_atomic(&archive, text.as_bytes())?;

    for root in report.runs.iter().filter_map(|r| r.artifact_root.as_deref()) {
        let copy = root.join(LAST_REPORT_FILE);
        if let Err(e) = write_atomic(&copy, text.as_bytes()) {
            warn!(path = %copy.display(), error = %e, "Failed to copy plan report into run directory");
        }
    }

    debug!(last = %last.display(), archive = %archive.display(), "Plan report files written");
    Ok(last)
}

fn archive_suffix(report: &PlanReport) -> String {
    match report.runs.first().and_then(|r| r.run_id.as_deref()) {
        Some(run_id) => run_id.to_string(),
        None => format!("plan_{}", report.kind),
    }
}

/// The report as Markdown: a header, one table row per run, then one section
/// per run.
pub fn render_plan_report(report: &PlanReport) -> String {
    let passed = report.passed_count();
    let mut out = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(
        out,
        "# Unity Runner Report ({})",
        report.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "- Plan: **{}**", report.kind);
    let _ = writeln!(
        out,
        "- Runs executed: **{}** (PASS {} / FAIL {})",
        report.runs.len(),
        passed,
        report.runs.len() - passed
    );
    let _ = writeln!(out, "- Stop on fail: {}", report.stop_on_fail);
    let _ = writeln!(out, "- Started: {}", report.started_at.to_rfc3339());
    let _ = writeln!(out, "- Finished: {}", report.finished_at.to_rfc3339());
    let _ = writeln!(out);

    if report.runs.is_empty() {
        let _ = writeln!(out, "No runs were executed.");
        return out;
    }

    let _ = writeln!(
        out,
        "| # | Scenario | Mode | Status | Exit | Duration (s) | Episode | Screenshots |"
    );
    let _ = writeln!(out, "| --- | --- | --- | --- | --- | --- | --- | --- |");
    for (index, run) in report.runs.iter().enumerate() {
        let episode = run.episode.as_ref();
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} | {} |",
            index + 1,
            cell(scenario_label(run)),
            episode.map(|e| e.mode.as_str()).unwrap_or("-"),
            verdict(run),
            episode
                .map(|e| e.metrics.exit_code.to_string())
                .unwrap_or_else(|| "-".to_string()),
            episode
                .map(|e| format!("{:.3}", e.metrics.duration_seconds))
                .unwrap_or_else(|| "-".to_string()),
            episode_cell(&run.disposition),
            episode
                .map(|e| e.metrics.screenshots_captured.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }

    for (index, run) in report.runs.iter().enumerate() {
        let _ = writeln!(out);
        render_run(&mut out, index + 1, run);
    }
    out
}

fn render_run(out: &mut String, number: usize, run: &RunReport) {
    let _ = writeln!(out, "## Run {number}: {}", scenario_label(run));
    let _ = writeln!(out);
    if let Some(run_id) = &run.run_id {
        let _ = writeln!(out, "- Run id: `{run_id}`");
    }
    match run.status() {
        Some(status) => {
            let _ = writeln!(out, "- Result: {} (status {status})", verdict(run));
        }
        None => {
            let _ = writeln!(out, "- Result: {}", verdict(run));
        }
    }
    if let Some(episode) = &run.episode {
        let _ = writeln!(out, "- Exit code: {}", episode.metrics.exit_code);
        let _ = writeln!(out, "- Duration: {:.3} s", episode.metrics.duration_seconds);
        if episode.metrics.timed_out {
            let _ = writeln!(out, "- Timed out: yes");
        }
        if let Some(reason) = &episode.metrics.capture_disabled_reason {
            let _ = writeln!(out, "- Capture disabled reason: {reason}");
        }
    }
    if let Some(root) = &run.artifact_root {
        let _ = writeln!(out, "- Artifacts: `{}`", root.display());
    }
    match &run.disposition {
        RunDisposition::Success { episode_id } => {
            let _ = writeln!(out, "- Episode POST: success");
            let _ = writeln!(out, "- Episode ID: {episode_id}");
        }
        RunDisposition::Pending { path, reason } => {
            let _ = writeln!(out, "- Episode POST: pending ({reason})");
            let _ = writeln!(out, "- Pending payload: `{}`", path.display());
        }
        RunDisposition::Error(e) => {
            let _ = writeln!(out, "- Episode POST: skipped");
            let _ = writeln!(out, "- Runner error: {e}");
        }
    }
}

fn scenario_label(run: &RunReport) -> &str {
    run.scenario_id.as_deref().unwrap_or("-")
}

fn verdict(run: &RunReport) -> &'static str {
    if run.passed() { "PASS" } else { "FAIL" }
}

fn episode_cell(disposition: &RunDisposition) -> String {
    match disposition {
        RunDisposition::Success { episode_id } => format!("id {episode_id}"),
        RunDisposition::Pending { .. } => "pending".to_string(),
        RunDisposition::Error(_) => "failed".to_string(),
    }
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigError, RunConfig};
    use crate::episode::EpisodeBuilder;
    use crate::plan::PlanKind;
    use crate::sampler::SamplerReport;
    use chrono::{DateTime, TimeZone, Utc};
    use runner_proto::{Episode, EpisodeArtifacts, ProcessOutcome, RunMode};
    use tempfile::TempDir;

    fn finished() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 1, 2, 3).unwrap()
    }

    fn episode(exit_code: i32) -> Episode {
        let config = RunConfig {
            executable: PathBuf::from("/opt/game/Game.x86_64"),
            args: Vec::new(),
            mode: RunMode::Instructed,
            scenario_id: None,
            duration_cap_seconds: 60,
            screenshots_enabled: true,
            screenshot_interval_seconds: 5,
            screenshot_max_captures: None,
            ingestion: None,
            project_name: "Babylon".to_string(),
            build_id: "b-7".to_string(),
            labels: Vec::new(),
            artifacts_root: PathBuf::from("runner_artifacts"),
            player_log: false,
        };
        EpisodeBuilder::build(
            &config,
            None,
            &ProcessOutcome::exited(exit_code, 12.3456),
            &SamplerReport {
                captured: 4,
                disabled_reason: None,
            },
            EpisodeArtifacts::default(),
        )
    }

    fn run(run_id: &str, root: PathBuf, exit_code: i32, disposition: RunDisposition) -> RunReport {
        RunReport {
            run_id: Some(run_id.to_string()),
            artifact_root: Some(root),
            scenario_id: Some("guided-tour".to_string()),
            episode: Some(episode(exit_code)),
            disposition,
        }
    }

    fn plan_report(runs: Vec<RunReport>) -> PlanReport {
        PlanReport {
            kind: PlanKind::Queue,
            stop_on_fail: false,
            started_at: finished(),
            finished_at: finished(),
            runs,
            report_path: None,
        }
    }

    #[test]
    fn test_render_lists_every_run() {
        let report = plan_report(vec![
            run(
                "r1",
                PathBuf::from("/tmp/r1"),
                0,
                RunDisposition::Success {
                    episode_id: "7".to_string(),
                },
            ),
            run(
                "r2",
                PathBuf::from("/tmp/r2"),
                3,
                RunDisposition::Pending {
                    path: PathBuf::from("/tmp/r2/episode_pending.json"),
                    reason: "connection refused".to_string(),
                },
            ),
            RunReport::rejected(ConfigError::Missing { field: "mode" }),
        ]);

        let text = render_plan_report(&report);

        assert!(text.starts_with("# Unity Runner Report (2026-03-14 01:02:03 UTC)\n"));
        assert!(text.contains("- Runs executed: **3** (PASS 1 / FAIL 2)"));
        assert!(text.contains("| 1 | guided-tour | instructed | PASS | 0 | 12.346 | id 7 | 4 |"));
        assert!(text.contains("| 2 | guided-tour | instructed | FAIL | 3 | 12.346 | pending | 4 |"));
        assert!(text.contains("| 3 | - | - | FAIL | - | - | failed | - |"));
        assert!(text.contains("- Pending payload: `/tmp/r2/episode_pending.json`"));
        assert!(text.contains("- Runner error: configuration error:"));
        assert!(!text.contains('\u{2014}'));
    }

    #[test]
    fn test_render_without_runs() {
        let text = render_plan_report(&plan_report(Vec::new()));
        assert!(text.contains("- Runs executed: **0** (PASS 0 / FAIL 0)"));
        assert!(text.contains("No runs were executed."));
    }

    #[test]
    fn test_pipes_in_scenario_ids_are_escaped() {
        let mut odd = run(
            "r1",
            PathBuf::from("/tmp/r1"),
            0,
            RunDisposition::Success {
                episode_id: "1".to_string(),
            },
        );
        odd.scenario_id = Some("a|b".to_string());
        let text = render_plan_report(&plan_report(vec![odd]));
        assert!(text.contains("| 1 | a\\|b |"));
    }

    #[test]
    fn test_write_latest_archive_and_run_copies() {
        let temp = TempDir::new().unwrap();
        let run_root = temp.path().join("run-1");
        std::fs::create_dir_all(&run_root).unwrap();
        let reports = temp.path().join("reports");
        let report = plan_report(vec![run(
            "run-1",
            run_root.clone(),
            0,
            RunDisposition::Success {
                episode_id: "1".to_string(),
            },
        )]);

        let last = write_plan_report(&reports, &report).unwrap();

        let text = std::fs::read_to_string(&last).unwrap();
        assert_eq!(last, reports.join(LAST_REPORT_FILE));
        assert_eq!(text, render_plan_report(&report));
        let archived = reports.join(ARCHIVE_DIR).join("20260314_010203_run-1.md");
        assert_eq!(std::fs::read_to_string(archived).unwrap(), text);
        assert_eq!(
            std::fs::read_to_string(run_root.join(LAST_REPORT_FILE)).unwrap(),
            text
        );
        assert!(!reports.join("report_last_run.md.tmp").exists());
    }

    #[test]
    fn test_archive_named_after_plan_without_run_id() {
        let temp = TempDir::new().unwrap();
        let report = plan_report(vec![RunReport::rejected(ConfigError::Missing {
            field: "mode",
        })]);

        write_plan_report(temp.path(), &report).unwrap();

        assert!(
            temp.path()
                .join(ARCHIVE_DIR)
                .join("20260314_010203_plan_queue.md")
                .exists()
        );
    }
}
