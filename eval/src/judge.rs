//! Check execution and outcome recording.
//!
//! Runs verification checks after `taskloop run` exits and records detailed
//! outcomes including command output.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use taskloop::io::config::VerificationConfig;
use taskloop::io::verify::verify_workspace;
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::case::Check;

/// Limits for command execution in checks.
#[derive(Debug, Clone, Copy)]
pub struct CommandLimits {
    pub timeout: Duration,
    /// Maximum bytes to capture from stdout/stderr.
    pub output_limit_bytes: usize,
}

impl CommandLimits {
    /// 60s timeout, 50KB output.
    pub fn default_limits() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            output_limit_bytes: 50_000,
        }
    }
}

/// Everything a check may need to look at.
#[derive(Debug, Clone, Copy)]
pub struct JudgeInput<'a> {
    pub workspace_root: &'a Path,
    pub verification: &'a VerificationConfig,
    pub exit_code: Option<i32>,
    pub limits: CommandLimits,
}

/// Collected check outcomes for a run.
#[derive(Debug, Serialize, Deserialize)]
pub struct Judgment {
    pub checks: Vec<CheckOutcome>,
}

impl Judgment {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(CheckOutcome::passed)
    }
}

/// Result of running a single check.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckOutcome {
    VerificationPasses {
        passed: bool,
        message: String,
        entry_point: Option<String>,
        mismatch_line: Option<usize>,
    },
    FileExists {
        path: String,
        passed: bool,
    },
    CommandSucceeds {
        cmd: Vec<String>,
        passed: bool,
        exit_code: Option<i32>,
        timed_out: bool,
        stdout: String,
        stderr: String,
        stdout_truncated: bool,
        stderr_truncated: bool,
    },
    LoopCompleted {
        passed: bool,
        exit_code: Option<i32>,
    },
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        match self {
            CheckOutcome::VerificationPasses { passed, .. }
            | CheckOutcome::FileExists { passed, .. }
            | CheckOutcome::CommandSucceeds { passed, .. }
            | CheckOutcome::LoopCompleted { passed, .. } => *passed,
        }
    }

    pub fn label(&self) -> String {
        match self {
            CheckOutcome::VerificationPasses { .. } => "verification_passes".to_string(),
            CheckOutcome::FileExists { path, .. } => format!("file_exists({path})"),
            CheckOutcome::CommandSucceeds { cmd, .. } => {
                format!("command_succeeds({})", cmd.join(" "))
            }
            CheckOutcome::LoopCompleted { .. } => "loop_completed".to_string(),
        }
    }
}

/// Run all checks and collect outcomes.
#[instrument(skip_all, fields(check_count = checks.len()))]
pub fn run_checks(checks: &[Check], input: JudgeInput<'_>) -> Result<Judgment> {
    let mut outcomes = Vec::with_capacity(checks.len());
    for check in checks {
        let outcome = match check {
            Check::VerificationPasses => judge_verification(input)?,
            Check::FileExists { path } => CheckOutcome::FileExists {
                path: path.display().to_string(),
                passed: input.workspace_root.join(path).exists(),
            },
            Check::CommandSucceeds { cmd } => {
                let outcome = run_command_check(cmd, input.workspace_root, input.limits)?;
                if let CheckOutcome::CommandSucceeds {
                    timed_out: true, ..
                } = &outcome
                {
                    warn!(check = "command_succeeds", cmd = ?cmd, "check timed out");
                }
                outcome
            }
            Check::LoopCompleted => CheckOutcome::LoopCompleted {
                passed: input.exit_code == Some(taskloop::exit_codes::OK),
                exit_code: input.exit_code,
            },
        };
        debug!(check = %outcome.label(), passed = outcome.passed(), "check result");
        outcomes.push(outcome);
    }
    Ok(Judgment { checks: outcomes })
}

/// A workspace without any entry point fails this check.
fn judge_verification(input: JudgeInput<'_>) -> Result<CheckOutcome> {
    let outcome = verify_workspace(input.workspace_root, input.verification)
        .context("verify workspace")?;
    Ok(CheckOutcome::VerificationPasses {
        passed: outcome.success && outcome.entry_point.is_some(),
        message: outcome.message,
        entry_point: outcome.entry_point,
        mismatch_line: outcome.mismatch_line,
    })
}

pub fn write_judgment(path: &Path, judgment: &Judgment) -> Result<()> {
    let contents = serde_json::to_string_pretty(judgment).context("serialize checks")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn run_command_check(
    cmd: &[String],
    workspace_root: &Path,
    limits: CommandLimits,
) -> Result<CheckOutcome> {
    let Some((program, args)) = cmd.split_first() else {
        bail!("command_succeeds cmd must be non-empty");
    };

    let mut child = Command::new(program)
        .args(args)
        .current_dir(workspace_root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawn command {:?}", cmd))?;

    let mut timed_out = false;
    let status = match child.wait_timeout(limits.timeout)? {
        Some(status) => status,
        None => {
            timed_out = true;
            child.kill().ok();
            child.wait().context("wait after kill")?
        }
    };

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_end(&mut stdout).context("read stdout")?;
    }
    if let Some(mut err) = child.stderr.take() {
        err.read_to_end(&mut stderr).context("read stderr")?;
    }

    let stdout_truncated = truncate_output(&mut stdout, limits.output_limit_bytes);
    let stderr_truncated = truncate_output(&mut stderr, limits.output_limit_bytes);

    Ok(CheckOutcome::CommandSucceeds {
        cmd: cmd.to_vec(),
        passed: !timed_out && status.success(),
        exit_code: status.code(),
        timed_out,
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
        stdout_truncated,
        stderr_truncated,
    })
}

fn truncate_output(buf: &mut Vec<u8>, limit: usize) -> bool {
    if buf.len() > limit {
        buf.truncate(limit);
        return true;
    }
    false
}
