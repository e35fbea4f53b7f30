//! Building and invoking the `taskloop` binary.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use anyhow::{Context, Result, bail};
use tracing::debug;

pub const LOOP_LOG: &str = "taskloop.run.log";
pub const LOOP_OUTCOME: &str = "loop_outcome.json";

pub fn build_taskloop_binary(repo_root: &Path) -> Result<PathBuf> {
    let output = Command::new("cargo")
        .arg("build")
        .arg("-p")
        .arg("taskloop")
        .current_dir(repo_root)
        .output()
        .context("build taskloop binary")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("taskloop build failed: {}", stderr.trim());
    }
    Ok(taskloop_binary_path(repo_root))
}

pub fn taskloop_binary_path(repo_root: &Path) -> PathBuf {
    let binary = format!("taskloop{}", std::env::consts::EXE_SUFFIX);
    repo_root.join("target").join("debug").join(binary)
}

/// Arguments for `taskloop run` against `workspace_root`.
pub fn run_args(workspace_root: &Path, task: &str) -> Vec<String> {
    vec![
        "run".to_string(),
        "--workdir".to_string(),
        workspace_root.display().to_string(),
        "--json".to_string(),
        "--".to_string(),
        task.to_string(),
    ]
}

/// Run the task loop, writing stderr to `taskloop.run.log` and the JSON
/// outcome (if any) to `loop_outcome.json` under `logs_dir`.
pub fn run_taskloop(
    binary: &Path,
    workspace_root: &Path,
    task: &str,
    logs_dir: &Path,
    env_overrides: &BTreeMap<String, String>,
) -> Result<ExitStatus> {
    fs::create_dir_all(logs_dir)
        .with_context(|| format!("create logs dir {}", logs_dir.display()))?;

    let mut command = Command::new(binary);
    command
        .args(run_args(workspace_root, task))
        .current_dir(workspace_root);
    for (key, value) in env_overrides {
        command.env(key, value);
    }
    let output = command.output().context("run taskloop")?;
    debug!(status = ?output.status.code(), "taskloop exited");

    let log_path = logs_dir.join(LOOP_LOG);
    fs::write(&log_path, &output.stderr)
        .with_context(|| format!("write log {}", log_path.display()))?;
    if !output.stdout.is_empty() {
        let outcome_path = logs_dir.join(LOOP_OUTCOME);
        fs::write(&outcome_path, &output.stdout)
            .with_context(|| format!("write {}", outcome_path.display()))?;
    }
    Ok(output.status)
}
