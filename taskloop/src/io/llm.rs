//! Model invocation collaborator.
//!
//! [`LlmClient`] is the seam between the loop and a model provider. Every
//! call goes through [`invoke_llm`], which charges the task's [`CallBudget`]
//! before the provider is contacted. A refused charge surfaces as
//! [`BudgetExceededError`](crate::error::BudgetExceededError) and is never retried.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::CallBudget;
use crate::core::retry::RetryPolicy;
use crate::core::state::{Message, Role};
use crate::error::{categorize, is_budget_exceeded};
use crate::io::config::LlmProfileConfig;
use crate::io::process::run_command_with_timeout;

/// One message of a model prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn from_messages(messages: &[Message]) -> Vec<PromptMessage> {
        messages
            .iter()
            .map(|msg| PromptMessage::new(msg.role(), msg.text()))
            .collect()
    }
}

/// A single model call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmRequest {
    pub profile: String,
    pub messages: Vec<PromptMessage>,
    pub json_mode: bool,
    pub temperature: f64,
}

/// Abstraction over model providers.
pub trait LlmClient {
    fn complete(&self, request: &LlmRequest) -> Result<String>;
}

/// Charge one call against `budget`, then invoke the model.
pub fn invoke_llm(
    client: &dyn LlmClient,
    budget: &mut CallBudget,
    invoked_by: &str,
    request: &LlmRequest,
) -> Result<String> {
    budget.charge(invoked_by)?;
    debug!(profile = %request.profile, invoked_by, count = budget.count(), "model call");
    client.complete(request)
}

/// Which profile answered and how many attempts it took.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvokeDiagnostics {
    pub profile: Option<String>,
    pub attempts: u32,
    pub errors: Vec<String>,
}

/// Invoke with bounded exponential backoff per profile, falling through `profiles` in order.
///
/// Only retry-eligible failures are retried on the same profile; any other
/// failure moves on to the next profile. Budget exhaustion aborts immediately.
#[instrument(skip_all, fields(invoked_by = %invoked_by, profiles = profiles.len()))]
pub fn invoke_with_fallbacks(
    client: &dyn LlmClient,
    budget: &mut CallBudget,
    invoked_by: &str,
    profiles: &[String],
    policy: &RetryPolicy,
    request: &LlmRequest,
    diagnostics: &mut InvokeDiagnostics,
) -> Result<String> {
    let mut attempt_request = request.clone();
    for profile in profiles {
        attempt_request.profile.clone_from(profile);
        for attempt in 1..=policy.max_attempts.max(1) {
            diagnostics.attempts += 1;
            match invoke_llm(client, budget, invoked_by, &attempt_request) {
                Ok(text) => {
                    diagnostics.profile = Some(profile.clone());
                    return Ok(text);
                }
                Err(err) if is_budget_exceeded(&err) => return Err(err),
                Err(err) => {
                    let categorized = categorize(&err);
                    warn!(
                        profile = %profile,
                        attempt,
                        category = %categorized.category,
                        err = %categorized.message,
                        "model call failed"
                    );
                    diagnostics.errors.push(format!("{profile}: {}", categorized.message));
                    if !categorized.retry_eligible || attempt == policy.max_attempts {
                        break;
                    }
                    let delay = policy.delay_for(attempt, &categorized.message);
                    info!(
                        profile = %profile,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying model call"
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
            }
        }
    }
    Err(anyhow!(
        "all model profiles failed after {} attempts: {}",
        diagnostics.attempts,
        diagnostics.errors.last().map(String::as_str).unwrap_or("no profiles")
    ))
}

/// Render prompt messages as a plain-text transcript for CLI-backed models.
pub fn render_transcript(messages: &[PromptMessage]) -> String {
    let mut buf = String::new();
    for message in messages {
        let label = match message.role {
            Role::Human => "user",
            Role::System => "system",
            Role::Assistant => "assistant",
            Role::ToolResult => "tool",
        };
        let _ = writeln!(buf, "### {label}\n{}\n", message.content.trim_end());
    }
    buf
}

/// Model client that shells out to a configured command per profile.
///
/// The transcript is piped to stdin and stdout is the completion.
pub struct CommandLlm {
    profiles: BTreeMap<String, LlmProfileConfig>,
    workdir: PathBuf,
    output_limit_bytes: usize,
}

impl CommandLlm {
    pub fn new(
        profiles: BTreeMap<String, LlmProfileConfig>,
        workdir: PathBuf,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            profiles,
            workdir,
            output_limit_bytes,
        }
    }
}

impl LlmClient for CommandLlm {
    #[instrument(skip_all, fields(profile = %request.profile, json_mode = request.json_mode))]
    fn complete(&self, request: &LlmRequest) -> Result<String> {
        let Some(profile) = self.profiles.get(&request.profile) else {
            bail!("unknown profile '{}': not configured", request.profile);
        };
        let Some((program, args)) = profile.command.split_first() else {
            bail!("profile '{}' has an empty command", request.profile);
        };
        let mut cmd = Command::new(program);
        for arg in args {
            cmd.arg(
                arg.replace("{temperature}", &request.temperature.to_string())
                    .replace("{json_mode}", if request.json_mode { "true" } else { "false" }),
            );
        }
        cmd.current_dir(&self.workdir);

        let timeout = Duration::from_secs(profile.timeout_secs);
        let transcript = render_transcript(&request.messages);
        let output = run_command_with_timeout(
            cmd,
            Some(transcript.as_bytes()),
            timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run model profile '{}'", request.profile))?;

        if output.timed_out {
            bail!(
                "model profile '{}' timed out after {}s",
                request.profile,
                timeout.as_secs()
            );
        }
        if !output.status.success() {
            bail!(
                "model profile '{}' failed with status {:?}: {}",
                request.profile,
                output.status.code(),
                output.stderr_text().trim()
            );
        }
        Ok(output.stdout_text())
    }
}
