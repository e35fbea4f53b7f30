//! Review/Verification Engine: decide whether a pass ends the task.
//!
//! Tool batches that changed nothing go straight back to planning. For fix and
//! build tasks the artifact is verified; a failure is fingerprinted for stuck
//! detection, local repair is tried once per task, and otherwise structured
//! feedback is appended for the next attempt.

use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::fingerprint::fingerprint;
use crate::core::scoring::contains_word;
use crate::core::state::{ConversationState, Message};
use crate::core::types::VerificationOutcome;
use crate::delegation::DelegationResult;
use crate::io::config::TaskLoopConfig;
use crate::io::repair::{RepairOutcome, attempt_repair};
use crate::io::tool_executor::{AGENT_CALL_TOOL, ToolExecutionResult};
use crate::io::verify::{find_entry_point, verify_workspace};

/// Words in the original task that make it a fix/build task.
pub const FIX_BUILD_KEYWORDS: &[&str] = &[
    "fix",
    "bug",
    "error",
    "debug",
    "issue",
    "broken",
    "incorrect",
    "wrong",
    "implement",
    "write",
    "create",
    "complete",
    "build",
];

pub fn is_fix_build_task(task: &str) -> bool {
    let lower = task.to_lowercase();
    FIX_BUILD_KEYWORDS
        .iter()
        .any(|keyword| contains_word(&lower, keyword))
}

/// What the pass produced.
#[derive(Debug, Clone, Copy)]
pub enum Execution<'a> {
    Tools(&'a ToolExecutionResult),
    Delegation(&'a DelegationResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Plan again with the new context.
    Continue,
    /// Verified, or not a task that is verified.
    Completed,
    Repaired,
    Stuck,
    /// The last pass ended without verification.
    IterationsExhausted,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Continue => "continue",
            Verdict::Completed => "completed",
            Verdict::Repaired => "repaired",
            Verdict::Stuck => "stuck",
            Verdict::IterationsExhausted => "iterations_exhausted",
        }
    }

    pub fn is_final(self) -> bool {
        self != Verdict::Continue
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewOutcome {
    pub verdict: Verdict,
    pub verification: Option<VerificationOutcome>,
    pub repair: Option<RepairOutcome>,
}

impl ReviewOutcome {
    fn verdict(verdict: Verdict) -> Self {
        Self {
            verdict,
            verification: None,
            repair: None,
        }
    }
}

pub struct Reviewer<'a> {
    pub config: &'a TaskLoopConfig,
    pub workdir: &'a Path,
}

impl Reviewer<'_> {
    #[instrument(skip_all, fields(iteration = state.iteration()))]
    pub fn review(
        &self,
        state: &mut ConversationState,
        execution: Execution<'_>,
    ) -> Result<ReviewOutcome> {
        if let Execution::Tools(result) = execution {
            let delegated = result
                .results
                .iter()
                .any(|output| output.tool == AGENT_CALL_TOOL && output.succeeded());
            if !result.mutated() && !delegated {
                debug!("tool results without changes, planning again");
                return Ok(ReviewOutcome::verdict(Verdict::Continue));
            }
        }

        if !is_fix_build_task(state.original_task()) {
            return Ok(ReviewOutcome::verdict(Verdict::Completed));
        }
        if state.iteration() >= self.config.max_iterations {
            info!(iteration = state.iteration(), "iteration budget exhausted before verification");
            return Ok(ReviewOutcome::verdict(Verdict::IterationsExhausted));
        }

        let verification = verify_workspace(self.workdir, &self.config.verification)?;
        if verification.success {
            info!(message = %verification.message, "verification passed");
            return Ok(ReviewOutcome {
                verdict: Verdict::Completed,
                verification: Some(verification),
                repair: None,
            });
        }

        let stuck = state
            .failures_mut()
            .record(fingerprint(&verification.message));
        if stuck {
            warn!(
                threshold = state.failures().threshold(),
                message = %verification.message,
                "identical verification failures, stopping"
            );
            return Ok(ReviewOutcome {
                verdict: Verdict::Stuck,
                verification: Some(verification),
                repair: None,
            });
        }

        let mut repair = None;
        if self.config.repair.enabled && !state.local_repair_attempted {
            state.local_repair_attempted = true;
            match attempt_repair(self.workdir, &self.config.verification, &self.config.repair) {
                Ok(outcome) if outcome.is_repaired() => {
                    return Ok(ReviewOutcome {
                        verdict: Verdict::Repaired,
                        verification: Some(verification),
                        repair: Some(outcome),
                    });
                }
                Ok(outcome) => repair = Some(outcome),
                Err(err) => warn!(err = %format!("{err:#}"), "local repair failed"),
            }
        }

        let artifact = self.current_artifact(&verification);
        let feedback = feedback_message(
            &verification,
            artifact.as_ref().map(|(entry, body)| (entry.as_str(), body.as_str())),
        );
        state.push(Message::feedback(feedback));
        if state.messages().len() > self.config.review.prune_threshold_messages {
            let before = state.messages().len();
            state.prune(self.config.review.max_attempt_pairs);
            debug!(before, after = state.messages().len(), "pruned conversation");
        }
        Ok(ReviewOutcome {
            verdict: Verdict::Continue,
            verification: Some(verification),
            repair,
        })
    }

    /// Entry point name and contents when small enough to quote.
    fn current_artifact(&self, verification: &VerificationOutcome) -> Option<(String, String)> {
        let entry = verification
            .entry_point
            .clone()
            .or_else(|| find_entry_point(self.workdir, &self.config.verification))?;
        let path = self.workdir.join(&entry);
        let size = fs::metadata(&path).ok()?.len();
        let limit = self.config.verification.feedback_artifact_limit_bytes;
        if !usize::try_from(size).is_ok_and(|size| size <= limit) {
            return None;
        }
        let body = fs::read_to_string(&path).ok()?;
        Some((entry, body))
    }
}

/// Structured feedback for a failed verification.
pub fn feedback_message(outcome: &VerificationOutcome, artifact: Option<(&str, &str)>) -> String {
    let mut sections = vec![format!("Verification failed: {}", outcome.message)];
    if outcome.mismatch_line.is_some() {
        sections.push(format!(
            "=== Expected Output ===\n{}",
            outcome.expected.as_deref().unwrap_or("")
        ));
        sections.push(format!(
            "=== Actual Output ===\n{}",
            outcome.actual.as_deref().unwrap_or("")
        ));
    }
    if let Some(stderr) = &outcome.stderr {
        sections.push(format!("=== Stderr ===\n{stderr}"));
    }
    if let Some((entry, body)) = artifact {
        sections.push(format!(
            "=== Current Implementation ({entry}) ===\n{}",
            body.trim_end()
        ));
    }
    sections.join("\n\n")
}
