//! Helpers for running child processes with timeouts and bounded output.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading stdin closes the pipe; that is not our failure.
        if let Err(e) = child_stdin.write_all(input) {
            warn!(err = %e, "child closed stdin early");
        }
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// What to do after a streamed stdout line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineControl {
    Continue,
    Stop,
}

/// Result of a streamed run.
#[derive(Debug)]
pub struct StreamedRun {
    /// `None` when the child was killed before it exited on its own.
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub timed_out: bool,
    /// The line callback asked to stop and the child was killed.
    pub stopped_early: bool,
    pub lines_seen: usize,
    /// Stdout bytes dropped past `output_limit_bytes`.
    pub stdout_truncated: usize,
}

/// Run a command and hand each stdout line to `on_line` as it arrives.
///
/// Only the first `output_limit_bytes` of stdout reach `on_line`; the rest is
/// drained and counted. When `on_line` returns [`LineControl::Stop`] or the
/// timeout elapses the child is killed immediately. Reader threads of a killed child are detached rather than
/// joined, so a grandchild holding the pipe open cannot stall the caller.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_streaming<F>(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    mut on_line: F,
) -> Result<StreamedRun>
where
    F: FnMut(&str) -> LineControl,
{
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning streamed child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel::<String>();
    let stdout_handle = thread::spawn(move || -> Result<usize> {
        let mut reader = BufReader::new(stdout);
        let mut line = Vec::new();
        let mut kept = 0usize;
        loop {
            line.clear();
            let budget = output_limit_bytes.saturating_sub(kept);
            let n = (&mut reader)
                .take(budget as u64 + 1)
                .read_until(b'\n', &mut line)
                .context("read line")?;
            if n == 0 {
                return Ok(0);
            }
            if n > budget {
                let rest = io::copy(&mut reader, &mut io::sink()).context("drain stdout")?;
                return Ok(n + usize::try_from(rest).unwrap_or(usize::MAX));
            }
            kept += n;
            let text = String::from_utf8_lossy(&line)
                .trim_end_matches(['\n', '\r'])
                .to_string();
            if tx.send(text).is_err() {
                return Ok(0);
            }
        }
    });
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let deadline = Instant::now() + timeout;
    let mut lines_seen = 0usize;
    let mut stopped_early = false;
    let mut timed_out = false;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(line) => {
                lines_seen += 1;
                if on_line(&line) == LineControl::Stop {
                    stopped_early = true;
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                timed_out = true;
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    drop(rx);

    if stopped_early || timed_out {
        warn!(stopped_early, timed_out, lines_seen, "killing streamed command");
        child.kill().context("kill command")?;
        child.wait().context("wait command after kill")?;
        return Ok(StreamedRun {
            exit_code: None,
            stderr: String::new(),
            timed_out,
            stopped_early,
            lines_seen,
            stdout_truncated: 0,
        });
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    let status = match child.wait_timeout(remaining).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!("command timed out after closing stdout, killing");
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?;
            return Ok(StreamedRun {
                exit_code: None,
                stderr: String::new(),
                timed_out: true,
                stopped_early: false,
                lines_seen,
                stdout_truncated: 0,
            });
        }
    };

    let stdout_truncated = match stdout_handle.join() {
        Ok(result) => result.context("join stdout")?,
        Err(_) => return Err(anyhow!("output reader thread panicked")),
    };
    if stdout_truncated > 0 {
        warn!(stdout_truncated, "stdout truncated");
    }
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;
    if stderr_truncated > 0 {
        warn!(stderr_truncated, "stderr truncated");
    }

    debug!(exit_code = ?status.code(), lines_seen, "streamed command finished");
    Ok(StreamedRun {
        exit_code: status.code(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        timed_out: false,
        stopped_early: false,
        lines_seen,
        stdout_truncated,
    })
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
