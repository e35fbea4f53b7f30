//! Typed failure conditions and the error taxonomy.
//!
//! Most code returns `anyhow::Result`. The types here are the conditions a
//! caller must be able to tell apart via `downcast_ref`: the call budget hard
//! stop, sub-agent failures and the test-overwrite guard. [`categorize`] maps
//! any error onto a retry policy.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// The model call budget is exhausted. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("LLM call limit exceeded ({count}/{limit}) at {invoked_by}")]
pub struct BudgetExceededError {
    pub count: u32,
    pub limit: u32,
    pub invoked_by: String,
}

/// Failures of the sub-agent CLI collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("agent '{agent}' not found: {detail}")]
    NotFound { agent: String, detail: String },
    #[error("agent '{agent}' timed out after {timeout:?}")]
    TimedOut { agent: String, timeout: Duration },
    #[error("agent '{agent}' failed with exit code {code:?}: {stderr}")]
    NonZeroExit {
        agent: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Raised by the tool executor when a call would clobber an existing test file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Refusing to overwrite existing test file '{path}' without explicit request to replace/overwrite it."
)]
pub struct TestOverwriteError {
    pub path: String,
}

/// Coarse category used to decide whether a failed step is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Budget,
    Network,
    Timeout,
    Validation,
    Resource,
    Execution,
    Config,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Budget => "budget",
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Execution => "execution",
            ErrorCategory::Config => "config",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// A categorized, descriptive error for a collaborator failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorizedError {
    pub category: ErrorCategory,
    pub message: String,
    pub retry_eligible: bool,
    pub backoff_multiplier: f64,
    pub max_retries: u32,
    pub agent_feedback: String,
}

impl CategorizedError {
    fn new(
        category: ErrorCategory,
        message: String,
        retry: Option<(f64, u32)>,
        agent_feedback: &str,
    ) -> Self {
        let (retry_eligible, backoff_multiplier, max_retries) = match retry {
            Some((multiplier, retries)) => (true, multiplier, retries),
            None => (false, 1.0, 0),
        };
        Self {
            category,
            message,
            retry_eligible,
            backoff_multiplier,
            max_retries,
            agent_feedback: agent_feedback.to_string(),
        }
    }
}

impl fmt::Display for CategorizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Return true when the error chain contains a [`BudgetExceededError`].
pub fn is_budget_exceeded(err: &anyhow::Error) -> bool {
    err.downcast_ref::<BudgetExceededError>().is_some()
}

/// Classify an error into the taxonomy.
///
/// Typed conditions are matched first; anything else is classified from the
/// rendered message chain.
pub fn categorize(err: &anyhow::Error) -> CategorizedError {
    let message = format!("{err:#}");
    if is_budget_exceeded(err) {
        return CategorizedError::new(
            ErrorCategory::Budget,
            message,
            None,
            "The model call budget is exhausted; stop and report the current result.",
        );
    }
    if let Some(agent_err) = err.downcast_ref::<AgentError>() {
        return match agent_err {
            AgentError::NotFound { .. } => CategorizedError::new(
                ErrorCategory::Config,
                message,
                None,
                "The agent is not installed or not registered; pick another agent.",
            ),
            AgentError::TimedOut { .. } => CategorizedError::new(
                ErrorCategory::Timeout,
                message,
                Some((1.5, 2)),
                "The agent timed out; retry with a smaller task.",
            ),
            AgentError::NonZeroExit { .. } => CategorizedError::new(
                ErrorCategory::Execution,
                message,
                None,
                "The agent exited with an error; inspect its stderr.",
            ),
        };
    }
    if err.downcast_ref::<TestOverwriteError>().is_some() {
        return CategorizedError::new(
            ErrorCategory::Validation,
            message,
            None,
            "Ask explicitly before replacing test files.",
        );
    }
    categorize_message(message)
}

fn categorize_message(message: String) -> CategorizedError {
    let lower = message.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        return CategorizedError::new(
            ErrorCategory::Timeout,
            message,
            Some((1.5, 2)),
            "The operation timed out; retry with a longer timeout or a smaller request.",
        );
    }
    let network_markers = [
        "connection",
        "refused",
        "reset by peer",
        "max retries exceeded",
        "rate limit",
        "429",
        "502",
        "503",
        "504",
        "service unavailable",
    ];
    if network_markers.iter().any(|marker| lower.contains(marker)) {
        return CategorizedError::new(
            ErrorCategory::Network,
            message,
            Some((2.0, 3)),
            "The provider is unreachable; retry after a backoff.",
        );
    }
    if lower.contains("out of memory") || lower.contains("resource exhausted") {
        return CategorizedError::new(
            ErrorCategory::Resource,
            message,
            Some((3.0, 1)),
            "The host ran out of resources; retry once after a long backoff.",
        );
    }
    if lower.contains("invalid") || lower.contains("validation") || lower.contains("parse") {
        return CategorizedError::new(
            ErrorCategory::Validation,
            message,
            None,
            "The request or response was malformed; fix the input instead of retrying.",
        );
    }
    if lower.contains("not configured") || lower.contains("unknown profile") {
        return CategorizedError::new(
            ErrorCategory::Config,
            message,
            None,
            "Check the configuration file.",
        );
    }
    CategorizedError::new(
        ErrorCategory::Unknown,
        message,
        Some((1.0, 1)),
        "An unexpected error occurred; retry once.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn budget_errors_are_never_retryable_even_when_wrapped() {
        let err = anyhow::Error::new(BudgetExceededError {
            count: 3,
            limit: 2,
            invoked_by: "planning.full".to_string(),
        })
        .context("plan iteration");
        let categorized = categorize(&err);
        assert_eq!(categorized.category, ErrorCategory::Budget);
        assert!(!categorized.retry_eligible);
        assert!(is_budget_exceeded(&err));
        assert!(categorized.message.contains("LLM call limit exceeded (3/2)"));
    }

    #[test]
    fn message_markers_map_to_categories() {
        let cases = [
            ("request timed out", ErrorCategory::Timeout, true),
            ("Connection refused", ErrorCategory::Network, true),
            ("HTTP 429 rate limit", ErrorCategory::Network, true),
            ("CUDA out of memory", ErrorCategory::Resource, true),
            ("invalid json", ErrorCategory::Validation, false),
            ("something odd", ErrorCategory::Unknown, true),
        ];
        for (text, category, retry) in cases {
            let categorized = categorize(&anyhow!(text));
            assert_eq!(categorized.category, category, "{text}");
            assert_eq!(categorized.retry_eligible, retry, "{text}");
        }
    }

    #[test]
    fn network_errors_back_off_harder_than_timeouts() {
        let network = categorize(&anyhow!("connection reset by peer"));
        let timeout = categorize(&anyhow!("timed out"));
        assert_eq!(network.backoff_multiplier, 2.0);
        assert_eq!(network.max_retries, 3);
        assert_eq!(timeout.backoff_multiplier, 1.5);
        assert_eq!(timeout.max_retries, 2);
    }

    #[test]
    fn agent_errors_are_typed() {
        let missing = anyhow::Error::new(AgentError::NotFound {
            agent: "coding".to_string(),
            detail: "no such file".to_string(),
        });
        assert_eq!(categorize(&missing).category, ErrorCategory::Config);

        let exit = anyhow::Error::new(AgentError::NonZeroExit {
            agent: "coding".to_string(),
            code: Some(2),
            stderr: "boom".to_string(),
        });
        let categorized = categorize(&exit);
        assert_eq!(categorized.category, ErrorCategory::Execution);
        assert!(!categorized.retry_eligible);
    }
}
