//! Model-free local repair: evaluate structural mutations of the artifact in parallel.
//!
//! Candidates run from hidden temp files next to the entry point on a small
//! scoped worker pool. The first candidate whose output matches the expected
//! output wins. After that, and after the pool deadline, no new candidates are
//! scheduled; in-flight ones finish within their own timeout.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::mutations::{Candidate, generate_candidates};
use crate::io::config::{RepairConfig, VerificationConfig};
use crate::io::verify::{find_entry_point, read_expected, verify_file};

/// Hard cap on concurrent candidate evaluations regardless of config.
pub const MAX_REPAIR_WORKERS: usize = 4;

/// Result of one repair attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RepairOutcome {
    NotApplicable { reason: String },
    Repaired { mutation: String, attempts: usize },
    Exhausted { attempts: usize, timed_out: bool },
}

impl RepairOutcome {
    pub fn is_repaired(&self) -> bool {
        matches!(self, RepairOutcome::Repaired { .. })
    }

    fn not_applicable(reason: &str) -> Self {
        RepairOutcome::NotApplicable {
            reason: reason.to_string(),
        }
    }
}

/// Try to repair the workspace entry point; writes the winning candidate in place.
#[instrument(skip_all, fields(workdir = %workdir.display(), workers = repair.workers))]
pub fn attempt_repair(
    workdir: &Path,
    verification: &VerificationConfig,
    repair: &RepairConfig,
) -> Result<RepairOutcome> {
    let Some(entry) = find_entry_point(workdir, verification) else {
        return Ok(RepairOutcome::not_applicable("no entry point"));
    };
    let Some(expected) = read_expected(workdir, verification)? else {
        return Ok(RepairOutcome::not_applicable("no expected output file"));
    };
    let entry_path = workdir.join(&entry);

    let baseline = verify_file(
        workdir,
        verification,
        &entry_path,
        &entry,
        Some(&expected),
        verification.timeout(),
    )?;
    if baseline.success {
        return Ok(RepairOutcome::not_applicable("artifact already passes"));
    }

    let source = fs::read_to_string(&entry_path)
        .with_context(|| format!("read {}", entry_path.display()))?;
    let candidates = generate_candidates(&source);
    if candidates.is_empty() {
        return Ok(RepairOutcome::not_applicable("no applicable mutations"));
    }
    debug!(candidates = candidates.len(), "evaluating repair candidates");

    let extension = entry_path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let pool = CandidatePool {
        workdir,
        verification,
        entry: &entry,
        extension: &extension,
        expected: &expected,
        candidate_timeout: Duration::from_secs(repair.candidate_timeout_secs),
        deadline: Instant::now() + Duration::from_secs(repair.timeout_secs),
    };
    let (winner, attempts) = pool.run(&candidates, repair.workers);

    let outcome = match winner {
        Some(candidate) => {
            fs::write(&entry_path, &candidate.source)
                .with_context(|| format!("write repaired {}", entry_path.display()))?;
            RepairOutcome::Repaired {
                mutation: candidate.label.clone(),
                attempts,
            }
        }
        None => RepairOutcome::Exhausted {
            attempts,
            timed_out: Instant::now() >= pool.deadline,
        },
    };
    info!(?outcome, "local repair finished");
    Ok(outcome)
}

struct CandidatePool<'a> {
    workdir: &'a Path,
    verification: &'a VerificationConfig,
    entry: &'a str,
    extension: &'a str,
    expected: &'a str,
    candidate_timeout: Duration,
    deadline: Instant,
}

impl CandidatePool<'_> {
    /// Evaluate candidates on up to `workers` threads (at most [`MAX_REPAIR_WORKERS`]).
    ///
    /// Returns the winner and the attempt count. `candidates` must be non-empty.
    fn run<'c>(&self, candidates: &'c [Candidate], workers: usize) -> (Option<&'c Candidate>, usize) {
        let next = AtomicUsize::new(0);
        let attempts = AtomicUsize::new(0);
        let found = AtomicBool::new(false);
        let winner: Mutex<Option<usize>> = Mutex::new(None);

        thread::scope(|scope| {
            for _ in 0..workers.clamp(1, MAX_REPAIR_WORKERS).min(candidates.len()) {
                scope.spawn(|| {
                    loop {
                        if found.load(Ordering::SeqCst) || Instant::now() >= self.deadline {
                            break;
                        }
                        let idx = next.fetch_add(1, Ordering::SeqCst);
                        let Some(candidate) = candidates.get(idx) else {
                            break;
                        };
                        attempts.fetch_add(1, Ordering::SeqCst);
                        match self.evaluate(candidate) {
                            Ok(true) => {
                                if !found.swap(true, Ordering::SeqCst)
                                    && let Ok(mut slot) = winner.lock()
                                {
                                    *slot = Some(idx);
                                }
                                break;
                            }
                            Ok(false) => {}
                            Err(err) => {
                                warn!(candidate = %candidate.label, err = %format!("{err:#}"), "candidate failed to run");
                            }
                        }
                    }
                });
            }
        });

        let winner = winner
            .into_inner()
            .ok()
            .flatten()
            .and_then(|idx| candidates.get(idx));
        (winner, attempts.into_inner())
    }

    fn evaluate(&self, candidate: &Candidate) -> Result<bool> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        let timeout = self.candidate_timeout.min(remaining);
        if timeout.is_zero() {
            return Ok(false);
        }
        let mut file = tempfile::Builder::new()
            .prefix(".repair-")
            .suffix(self.extension)
            .tempfile_in(self.workdir)
            .context("create candidate file")?;
        file.write_all(candidate.source.as_bytes())
            .context("write candidate file")?;
        file.flush().context("flush candidate file")?;
        let outcome = verify_file(
            self.workdir,
            self.verification,
            file.path(),
            self.entry,
            Some(self.expected),
            timeout,
        )?;
        debug!(candidate = %candidate.label, success = outcome.success, "candidate evaluated");
        Ok(outcome.success)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn configs() -> (VerificationConfig, RepairConfig) {
        let verification = VerificationConfig {
            command: vec!["sh".to_string()],
            entry_points: vec!["main.sh".to_string()],
            timeout_secs: 5,
            ..VerificationConfig::default()
        };
        (verification, RepairConfig::default())
    }

    #[test]
    fn repairs_flipped_comparison() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join("main.sh"),
            "n=3\nif [ $((n > 3)) -eq 1 ]; then echo big; else echo small; fi\n",
        )
        .expect("write");
        fs::write(temp.path().join("expected.txt"), "big\n").expect("write");

        let (verification, repair) = configs();
        let outcome = attempt_repair(temp.path(), &verification, &repair).expect("repair");
        match outcome {
            RepairOutcome::Repaired { mutation, attempts } => {
                assert_eq!(mutation, "swap_comparison");
                assert!(attempts >= 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        let repaired = fs::read_to_string(temp.path().join("main.sh")).expect("read");
        assert!(repaired.contains("n >= 3"));
        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(".repair-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn passing_artifact_is_not_mutated() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("main.sh"), "echo ok\n").expect("write");
        fs::write(temp.path().join("expected.txt"), "ok\n").expect("write");
        let (verification, repair) = configs();
        let outcome = attempt_repair(temp.path(), &verification, &repair).expect("repair");
        assert_eq!(
            outcome,
            RepairOutcome::NotApplicable {
                reason: "artifact already passes".to_string()
            }
        );
    }

    #[test]
    fn no_matching_mutation_exhausts() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join("main.sh"),
            "n=1\nif [ $((n > 5)) -eq 1 ]; then echo big; else echo small; fi\n",
        )
        .expect("write");
        fs::write(temp.path().join("expected.txt"), "big\n").expect("write");
        let (verification, repair) = configs();
        let outcome = attempt_repair(temp.path(), &verification, &repair).expect("repair");
        assert!(matches!(outcome, RepairOutcome::Exhausted { timed_out: false, .. }));
    }

    #[test]
    fn missing_inputs_are_not_applicable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (verification, repair) = configs();
        assert_eq!(
            attempt_repair(temp.path(), &verification, &repair).expect("repair"),
            RepairOutcome::NotApplicable {
                reason: "no entry point".to_string()
            }
        );
        fs::write(temp.path().join("main.sh"), "echo ok\n").expect("write");
        assert_eq!(
            attempt_repair(temp.path(), &verification, &repair).expect("repair"),
            RepairOutcome::NotApplicable {
                reason: "no expected output file".to_string()
            }
        );
    }
}
