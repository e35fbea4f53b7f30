//! Case execution orchestration.
//!
//! Coordinates workspace creation, the taskloop run, checks, and result capture.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::case::LoadedCase;
use crate::config::configure_workspace;
use crate::harness::{build_taskloop_binary, run_taskloop};
use crate::judge::{CommandLimits, JudgeInput, run_checks, write_judgment};
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{CaptureInput, capture_results, update_outcome};
use crate::workspace::create_workspace;

/// Result of running a single case.
#[derive(Debug)]
pub struct RunOutcome {
    pub eval_run_id: String,
    pub results_dir: PathBuf,
    pub outcome: Outcome,
}

/// `eval-<utc timestamp>-<workspace suffix>`; unique across repeated runs.
pub fn eval_run_id(workspace_name: &str, case_id: &str) -> String {
    let suffix = workspace_name
        .strip_prefix(case_id)
        .and_then(|rest| rest.strip_prefix('-'))
        .unwrap_or(workspace_name);
    format!("eval-{}-{}", Utc::now().format("%Y%m%d_%H%M%S"), suffix)
}

/// Run a case end-to-end: workspace, taskloop run, checks, result capture.
#[instrument(skip_all, fields(case_id = %case.id()))]
pub fn run_case(repo_root: &Path, case: &LoadedCase) -> Result<RunOutcome> {
    info!("case run started");

    debug!("building taskloop binary");
    let binary = build_taskloop_binary(repo_root)?;
    if !binary.exists() {
        bail!("taskloop binary not found at {}", binary.display());
    }

    let eval_root = repo_root.join("eval");
    let workspace = create_workspace(
        &eval_root.join("workspaces"),
        case.id(),
        case.fixture_dir().as_deref(),
    )
    .context("create workspace")?;
    let config =
        configure_workspace(&workspace.root, &case.file.config).context("configure taskloop")?;

    let eval_run_id = eval_run_id(&workspace.name, case.id());
    let results_base = eval_root.join("results");
    let logs_dir = results_base.join(case.id()).join(&eval_run_id);

    let started_at = Utc::now();
    debug!(workspace = %workspace.root.display(), "running taskloop");
    let status = run_taskloop(
        &binary,
        &workspace.root,
        &case.file.case.task,
        &logs_dir,
        &case.file.env,
    )?;
    let finished_at = Utc::now();
    let exit_code = status.code();
    info!(
        exit_code = ?exit_code,
        duration_secs = (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
        "taskloop finished"
    );

    let case_path = case.case_path();
    let capture_input = CaptureInput {
        case_id: case.id(),
        case_path: &case_path,
        eval_run_id: &eval_run_id,
        taskloop_binary: &binary,
        exit_code,
        started_at,
        finished_at,
        workspace_root: &workspace.root,
        repo_root,
    };
    let results_dir = capture_results(&results_base, &capture_input).context("capture results")?;

    let judgment = run_checks(
        &case.file.checks,
        JudgeInput {
            workspace_root: &workspace.root,
            verification: &config.verification,
            exit_code,
            limits: CommandLimits::default_limits(),
        },
    )
    .context("run checks")?;
    write_judgment(&results_dir.join("checks.json"), &judgment).context("write checks")?;

    let outcome = classify_outcome(exit_code, &judgment);
    update_outcome(&results_dir, outcome).context("update outcome")?;

    info!(outcome = ?outcome, results_dir = %results_dir.display(), "case run complete");
    Ok(RunOutcome {
        eval_run_id,
        results_dir,
        outcome,
    })
}
