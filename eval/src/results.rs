//! Result capture and persistence.
//!
//! Copies the taskloop transcript and config into the results directory and
//! writes `meta.json` for later aggregation.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use taskloop::io::config::DEFAULT_CONFIG_PATH;
use tracing::{debug, instrument, warn};

use crate::outcome::Outcome;

/// Input for capturing results from a completed run.
#[derive(Debug)]
pub struct CaptureInput<'a> {
    pub case_id: &'a str,
    pub case_path: &'a Path,
    pub eval_run_id: &'a str,
    pub taskloop_binary: &'a Path,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub workspace_root: &'a Path,
    pub repo_root: &'a Path,
}

/// Metadata for an eval run, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EvalMeta {
    pub case_id: String,
    pub eval_run_id: String,
    /// SHA-256 of the case file.
    pub case_hash: String,
    pub git_sha: Option<String>,
    pub taskloop_binary: String,
    /// Run id from `.taskloop/runs/<run-id>/`.
    pub taskloop_run_id: Option<String>,
    pub outcome: Option<Outcome>,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub exit_code: Option<i32>,
    pub workspace: String,
    /// Non-fatal errors encountered during capture.
    pub errors: Vec<String>,
}

/// Capture results from a completed run to `base_dir/<case>/<eval-run-id>/`.
#[instrument(skip_all, fields(case_id = %input.case_id, eval_run_id = %input.eval_run_id))]
pub fn capture_results(base_dir: &Path, input: &CaptureInput<'_>) -> Result<PathBuf> {
    let results_dir = results_dir(base_dir, input.case_id, input.eval_run_id);
    fs::create_dir_all(&results_dir)
        .with_context(|| format!("create results dir {}", results_dir.display()))?;

    let mut errors = Vec::new();

    let case_hash = match file_sha256(input.case_path) {
        Ok(hash) => hash,
        Err(err) => {
            errors.push(format!("case hash: {err}"));
            String::new()
        }
    };

    let git_sha = match git_rev_parse(input.repo_root) {
        Ok(sha) => Some(sha),
        Err(err) => {
            errors.push(format!("git sha: {err}"));
            None
        }
    };

    copy_if_exists(
        &input.workspace_root.join(DEFAULT_CONFIG_PATH),
        &results_dir.join("config.toml"),
        "config.toml",
        &mut errors,
    );

    let taskloop_run_id = match latest_run_id(input.workspace_root) {
        Ok(run_id) => run_id,
        Err(err) => {
            errors.push(format!("run id: {err}"));
            None
        }
    };
    match &taskloop_run_id {
        Some(run_id) => copy_if_exists(
            &input
                .workspace_root
                .join(".taskloop/runs")
                .join(run_id)
                .join("iterations.jsonl"),
            &results_dir.join("iterations.jsonl"),
            "iterations.jsonl",
            &mut errors,
        ),
        None => errors.push("iterations.jsonl: no taskloop run recorded".to_string()),
    }

    if !errors.is_empty() {
        warn!(errors = ?errors, "artifact capture had errors");
    }

    let duration = input.finished_at - input.started_at;
    let meta = EvalMeta {
        case_id: input.case_id.to_string(),
        eval_run_id: input.eval_run_id.to_string(),
        case_hash,
        git_sha,
        taskloop_binary: input.taskloop_binary.display().to_string(),
        taskloop_run_id,
        outcome: None,
        start_time: input.started_at.to_rfc3339(),
        end_time: input.finished_at.to_rfc3339(),
        duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        exit_code: input.exit_code,
        workspace: input.workspace_root.display().to_string(),
        errors,
    };

    write_meta(&results_dir.join("meta.json"), &meta)?;
    debug!(results_dir = %results_dir.display(), "results captured");
    Ok(results_dir)
}

pub fn update_outcome(results_dir: &Path, outcome: Outcome) -> Result<()> {
    let meta_path = results_dir.join("meta.json");
    let mut meta = read_meta(&meta_path)?;
    meta.outcome = Some(outcome);
    write_meta(&meta_path, &meta)
}

pub fn results_dir(base_dir: &Path, case_id: &str, eval_run_id: &str) -> PathBuf {
    base_dir.join(case_id).join(eval_run_id)
}

pub fn read_meta(path: &Path) -> Result<EvalMeta> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).context("parse meta")
}

fn write_meta(path: &Path, meta: &EvalMeta) -> Result<()> {
    let contents = serde_json::to_string_pretty(meta).context("serialize meta")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write meta {}", path.display()))?;
    Ok(())
}

/// Lexicographically last run directory; run ids embed a millisecond timestamp.
fn latest_run_id(workspace_root: &Path) -> Result<Option<String>> {
    let runs_dir = workspace_root.join(".taskloop").join("runs");
    if !runs_dir.exists() {
        return Ok(None);
    }
    let mut ids = Vec::new();
    for entry in fs::read_dir(&runs_dir).with_context(|| format!("read {}", runs_dir.display()))? {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir()
            && let Some(name) = entry.file_name().to_str()
        {
            ids.push(name.to_string());
        }
    }
    ids.sort();
    Ok(ids.pop())
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    Ok(hex::encode(hasher.finalize()))
}

fn git_rev_parse(repo_root: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_root)
        .output()
        .context("git rev-parse")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("git rev-parse failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn copy_if_exists(src: &Path, dst: &Path, label: &str, errors: &mut Vec<String>) {
    if !src.exists() {
        errors.push(format!("{label}: missing {}", src.display()));
        return;
    }
    if let Some(parent) = dst.parent()
        && let Err(err) = fs::create_dir_all(parent)
    {
        errors.push(format!("{label}: create dir failed: {err}"));
        return;
    }
    if let Err(err) = fs::copy(src, dst) {
        errors.push(format!("{label}: copy failed: {err}"));
    }
}
