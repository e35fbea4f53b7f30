//! Artifact verification: run the entry point and compare its stdout.
//!
//! With an expected-output file, stdout is compared line by line while the
//! artifact runs and the process is killed at the first wrong or extra line.
//! Without one, success is a zero exit status.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{info, instrument, warn};

use crate::core::types::VerificationOutcome;
use crate::io::config::VerificationConfig;
use crate::io::process::{LineControl, run_command_streaming};

/// First configured entry point that exists in `workdir`.
pub fn find_entry_point(workdir: &Path, config: &VerificationConfig) -> Option<String> {
    config
        .entry_points
        .iter()
        .find(|entry| workdir.join(entry).is_file())
        .cloned()
}

/// Expected output text, if the configured file exists.
pub fn read_expected(workdir: &Path, config: &VerificationConfig) -> Result<Option<String>> {
    let path = workdir.join(&config.expected_file);
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    Ok(Some(text))
}

/// Incremental comparison of streamed output lines against expected lines.
///
/// Leading blank output lines are skipped, trailing whitespace is ignored per
/// line, and blank lines after the last expected line are tolerated.
#[derive(Debug, Clone)]
pub struct StreamComparator {
    expected: Vec<String>,
    actual: Vec<String>,
    matched: usize,
    compared: usize,
    started: bool,
    mismatch_line: Option<usize>,
}

impl StreamComparator {
    pub fn new(expected: &str) -> Self {
        let expected = expected
            .trim()
            .lines()
            .map(|line| line.trim_end().to_string())
            .collect();
        Self {
            expected,
            actual: Vec::new(),
            matched: 0,
            compared: 0,
            started: false,
            mismatch_line: None,
        }
    }

    /// Feed one output line; returns [`LineControl::Stop`] at the first mismatch.
    pub fn push(&mut self, line: &str) -> LineControl {
        let line = line.trim_end();
        if !self.started && line.is_empty() {
            return LineControl::Continue;
        }
        self.started = true;
        self.actual.push(line.to_string());
        match self.expected.get(self.matched) {
            Some(expected) => {
                self.compared += 1;
                if expected == line {
                    self.matched += 1;
                    LineControl::Continue
                } else {
                    self.mismatch_line = Some(self.matched + 1);
                    LineControl::Stop
                }
            }
            None if line.is_empty() => LineControl::Continue,
            None => {
                self.mismatch_line = Some(self.matched + 1);
                LineControl::Stop
            }
        }
    }

    /// Close the stream; missing expected lines count as a mismatch.
    pub fn finish(&mut self) {
        if self.mismatch_line.is_none() && self.matched < self.expected.len() {
            self.mismatch_line = Some(self.matched + 1);
        }
    }

    pub fn mismatch_line(&self) -> Option<usize> {
        self.mismatch_line
    }

    pub fn lines_compared(&self) -> usize {
        self.compared
    }

    pub fn actual_text(&self) -> String {
        self.actual.join("\n").trim_end().to_string()
    }

    pub fn expected_text(&self) -> String {
        self.expected.join("\n")
    }
}

/// Verify the workspace's entry point against its expected output.
#[instrument(skip_all, fields(workdir = %workdir.display()))]
pub fn verify_workspace(workdir: &Path, config: &VerificationConfig) -> Result<VerificationOutcome> {
    let Some(entry) = find_entry_point(workdir, config) else {
        return Ok(VerificationOutcome::passed("No verification file found"));
    };
    let expected = read_expected(workdir, config)?;
    let outcome = verify_file(
        workdir,
        config,
        &workdir.join(&entry),
        &entry,
        expected.as_deref(),
        config.timeout(),
    )?;
    info!(
        entry = %entry,
        success = outcome.success,
        mismatch_line = ?outcome.mismatch_line,
        "verification finished"
    );
    Ok(outcome)
}

/// Run `artifact` with the configured interpreter and judge the result.
pub fn verify_file(
    workdir: &Path,
    config: &VerificationConfig,
    artifact: &Path,
    entry_label: &str,
    expected: Option<&str>,
    timeout: Duration,
) -> Result<VerificationOutcome> {
    let Some((program, args)) = config.command.split_first() else {
        bail!("verification.command must be a non-empty array");
    };
    let mut cmd = Command::new(program);
    cmd.args(args).arg(artifact).current_dir(workdir);

    let mut comparator = expected.map(StreamComparator::new);
    let mut stdout_lines: Vec<String> = Vec::new();
    let run = run_command_streaming(cmd, timeout, config.output_limit_bytes, |line| {
        match comparator.as_mut() {
            Some(comparator) => comparator.push(line),
            None => {
                stdout_lines.push(line.to_string());
                LineControl::Continue
            }
        }
    })
    .with_context(|| format!("run {entry_label}"))?;
    if run.stdout_truncated > 0 {
        warn!(
            entry = entry_label,
            dropped_bytes = run.stdout_truncated,
            limit = config.output_limit_bytes,
            "artifact stdout exceeded the output limit"
        );
    }

    let mut outcome = VerificationOutcome::passed("");
    outcome.entry_point = Some(entry_label.to_string());
    outcome.exit_code = run.exit_code;
    outcome.stderr = (!run.stderr.trim().is_empty()).then(|| run.stderr.trim().to_string());

    if run.timed_out {
        outcome.success = false;
        outcome.timed_out = true;
        outcome.message = format!("Execution timed out after {}s", timeout.as_secs());
        return Ok(outcome);
    }

    if let Some(comparator) = comparator.as_mut() {
        if !run.stopped_early {
            comparator.finish();
        }
        outcome.lines_compared = comparator.lines_compared();
        outcome.expected = Some(comparator.expected_text());
        outcome.actual = Some(comparator.actual_text());
        if let Some(line) = comparator.mismatch_line() {
            outcome.success = false;
            outcome.mismatch_line = Some(line);
            outcome.message = format!(
                "Output mismatch.\nActual: {}\nExpected: {}",
                comparator.actual_text(),
                comparator.expected_text()
            );
            return Ok(outcome);
        }
    } else {
        outcome.actual = Some(stdout_lines.join("\n").trim_end().to_string());
    }

    match run.exit_code {
        Some(0) => {
            outcome.message = if expected.is_some() {
                "Output matches expected".to_string()
            } else {
                "Execution succeeded".to_string()
            };
        }
        code => {
            outcome.success = false;
            let code_text = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            outcome.message = format!(
                "Execution failed (exit code {code_text})\nStderr: {}",
                outcome.stderr.as_deref().unwrap_or("")
            );
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparator_stops_at_first_mismatch() {
        let mut cmp = StreamComparator::new("a\nb\nc\nd\n");
        assert_eq!(cmp.push(""), LineControl::Continue);
        assert_eq!(cmp.push("a"), LineControl::Continue);
        assert_eq!(cmp.push("b  "), LineControl::Continue);
        assert_eq!(cmp.push("x"), LineControl::Stop);
        assert_eq!(cmp.mismatch_line(), Some(3));
        assert_eq!(cmp.lines_compared(), 3);
        assert_eq!(cmp.actual_text(), "a\nb\nx");
    }

    #[test]
    fn comparator_tolerates_trailing_blank_but_not_extra_text() {
        let mut cmp = StreamComparator::new("a\n");
        assert_eq!(cmp.push("a"), LineControl::Continue);
        assert_eq!(cmp.push(""), LineControl::Continue);
        cmp.finish();
        assert_eq!(cmp.mismatch_line(), None);

        let mut extra = StreamComparator::new("a\n");
        extra.push("a");
        assert_eq!(extra.push("b"), LineControl::Stop);
        assert_eq!(extra.mismatch_line(), Some(2));
    }

    #[test]
    fn comparator_flags_missing_lines() {
        let mut cmp = StreamComparator::new("a\nb\n");
        cmp.push("a");
        cmp.finish();
        assert_eq!(cmp.mismatch_line(), Some(2));
    }

    #[cfg(unix)]
    mod subprocess {
        use super::super::*;

        fn sh_config() -> VerificationConfig {
            VerificationConfig {
                command: vec!["sh".to_string()],
                entry_points: vec!["main.sh".to_string()],
                timeout_secs: 5,
                ..VerificationConfig::default()
            }
        }

        #[test]
        fn missing_entry_point_passes() {
            let temp = tempfile::tempdir().expect("tempdir");
            let outcome = verify_workspace(temp.path(), &sh_config()).expect("verify");
            assert!(outcome.success);
            assert_eq!(outcome.message, "No verification file found");
        }

        #[test]
        fn matching_output_passes() {
            let temp = tempfile::tempdir().expect("tempdir");
            fs::write(temp.path().join("main.sh"), "echo one\necho two\n").expect("write");
            fs::write(temp.path().join("expected.txt"), "one\ntwo\n").expect("write");
            let outcome = verify_workspace(temp.path(), &sh_config()).expect("verify");
            assert!(outcome.success, "{}", outcome.message);
            assert_eq!(outcome.lines_compared, 2);
        }

        #[test]
        fn exit_code_decides_without_expected_file() {
            let temp = tempfile::tempdir().expect("tempdir");
            fs::write(temp.path().join("main.sh"), "echo boom >&2\nexit 2\n").expect("write");
            let outcome = verify_workspace(temp.path(), &sh_config()).expect("verify");
            assert!(!outcome.success);
            assert_eq!(outcome.exit_code, Some(2));
            assert_eq!(outcome.message, "Execution failed (exit code 2)\nStderr: boom");
        }

        #[test]
        fn timeout_is_reported() {
            let temp = tempfile::tempdir().expect("tempdir");
            fs::write(temp.path().join("main.sh"), "exec sleep 5\n").expect("write");
            let mut config = sh_config();
            config.timeout_secs = 1;
            let outcome = verify_workspace(temp.path(), &config).expect("verify");
            assert!(outcome.timed_out);
            assert_eq!(outcome.message, "Execution timed out after 1s");
        }

        #[test]
        fn captured_output_respects_limit() {
            let temp = tempfile::tempdir().expect("tempdir");
            fs::write(temp.path().join("main.sh"), "seq 1 300000
").expect("write");
            let mut config = sh_config();
            config.output_limit_bytes = 100_000;
            let outcome = verify_workspace(temp.path(), &config).expect("verify");
            assert!(outcome.success, "{}", outcome.message);
            let actual = outcome.actual.expect("actual output");
            assert!(actual.len() <= 100_000, "captured {} bytes", actual.len());
            assert!(actual.starts_with("1\n2\n3\n"));
        }
    }
}
