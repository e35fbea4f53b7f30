//! Agent Delegation: hand the task to an agent or a raw model profile.
//!
//! The agent's reply is scanned for embedded tool requests. Detected calls are
//! executed and their results folded into the next prompt, up to
//! `agents.max_tool_iterations` rounds. A reply without tool requests is final.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::decision_parse::fenced_block;
use crate::core::state::{ConversationState, Message, Role};
use crate::core::tool_detect::detect_agent_tool_calls;
use crate::error::AgentError;
use crate::io::agents::AgentRegistry;
use crate::io::config::{LLM_AGENT_PREFIX, TaskLoopConfig};
use crate::io::llm::{LlmClient, LlmRequest, PromptMessage, invoke_llm};
use crate::io::prompt::PromptEngine;
use crate::io::tool_executor::{AgentCaller, ExecOptions, SummaryMode, ToolExecutor};
use crate::io::tools::{ToolContext, ToolRegistry};
use crate::io::verify::find_entry_point;

const CONTINUE_PROMPT: &str = "Continue fixing the implementation based on the tool results.";
const DELEGATION_TEMPERATURE: f64 = 0.2;

/// Resolved form of an agent name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentRef {
    /// A registered agent implementation.
    Registered(String),
    /// A model profile invoked directly.
    Profile(String),
}

impl AgentRef {
    /// `agent:<name>` and `<name>` name registered agents; `llm:<profile>` names a profile.
    pub fn parse(reference: &str) -> Self {
        let reference = reference.trim();
        if let Some(profile) = reference.strip_prefix(LLM_AGENT_PREFIX) {
            return AgentRef::Profile(profile.to_string());
        }
        let name = reference.strip_prefix("agent:").unwrap_or(reference);
        AgentRef::Registered(name.to_string())
    }

    pub fn label(&self) -> String {
        match self {
            AgentRef::Registered(name) => name.clone(),
            AgentRef::Profile(profile) => format!("{LLM_AGENT_PREFIX}{profile}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelegationResult {
    pub agent: String,
    pub response: String,
    /// Agent invocations in the sub-loop.
    pub rounds: u32,
    pub tool_calls: usize,
    /// Entry point overwritten from a fenced code block.
    pub applied_to: Option<String>,
}

pub struct Delegator<'a> {
    pub config: &'a TaskLoopConfig,
    pub llm: &'a dyn LlmClient,
    pub agents: &'a AgentRegistry,
    pub tools: &'a ToolRegistry,
    pub prompts: &'a PromptEngine,
    pub workdir: &'a Path,
}

impl Delegator<'_> {
    /// Delegate the current task to `agent` and record the reply in `state`.
    #[instrument(skip_all, fields(agent = %agent, iteration = state.iteration()))]
    pub fn delegate(&self, agent: &str, state: &mut ConversationState) -> Result<DelegationResult> {
        let task = self.task_text(state)?;
        let result = self.run(agent, &task, state)?;
        state.selected_agent = Some(result.agent.clone());
        state.push(Message::assistant(result.response.clone()));
        Ok(result)
    }

    /// Build the delegated task text from conversation state.
    pub fn task_text(&self, state: &ConversationState) -> Result<String> {
        let original = state.original_task();
        let feedback = state.messages().iter().rev().find_map(|msg| match msg {
            Message::Feedback { content } => Some(content.as_str()),
            _ => None,
        });
        if let Some(feedback) = feedback {
            return self
                .prompts
                .render_retry(original, feedback, state.iteration());
        }

        let context: Vec<String> = state
            .messages()
            .iter()
            .filter(|msg| matches!(msg.role(), Role::System | Role::ToolResult))
            .map(Message::text)
            .collect();
        if context.is_empty() {
            return Ok(original.to_string());
        }
        Ok(format!("{original}\n\nContext:\n{}", context.join("\n\n")))
    }

    fn run(
        &self,
        agent: &str,
        task: &str,
        state: &mut ConversationState,
    ) -> Result<DelegationResult> {
        let agent_ref = AgentRef::parse(agent);
        let label = agent_ref.label();
        let executor = ToolExecutor::new(
            self.tools,
            ToolContext {
                root: self.workdir,
                allow_outside_root: self.config.tools.allow_outside_root,
                output_limit_bytes: self.config.tools.output_limit_bytes,
            },
            &self.config.agents.default_agent,
        );
        let options = ExecOptions {
            augment: true,
            summary: SummaryMode::Full,
        };
        let max_rounds = self.config.agents.max_tool_iterations.max(1);

        let mut prompt = task.to_string();
        let mut previous_tools: Option<Vec<String>> = None;
        let mut tool_calls = 0usize;
        let mut rounds = 0u32;
        let response = loop {
            rounds += 1;
            let response = self.invoke(&agent_ref, &prompt, state)?;
            let Some(calls) = detect_agent_tool_calls(&response) else {
                break response;
            };
            if rounds >= max_rounds {
                warn!(agent = %label, rounds, "tool sub-loop cap reached");
                break response;
            }
            let names: Vec<String> = calls.iter().map(|call| call.tool.clone()).collect();
            if previous_tools.as_ref() == Some(&names) {
                warn!(agent = %label, tools = ?names, "agent repeated the same tool calls");
                break response;
            }
            debug!(agent = %label, round = rounds, calls = calls.len(), "executing tool calls from agent reply");
            tool_calls += calls.len();
            let executed = executor.execute(calls, state, options, None)?;
            prompt = format!("{task}\n\n{}\n\n{CONTINUE_PROMPT}", executed.summary);
            previous_tools = Some(names);
        };

        let applied_to = match &agent_ref {
            AgentRef::Profile(_) if self.config.agents.apply_code_blocks => {
                self.apply_code_block(&response)?
            }
            _ => None,
        };
        info!(agent = %label, rounds, tool_calls, applied = ?applied_to, "delegation finished");
        Ok(DelegationResult {
            agent: label,
            response,
            rounds,
            tool_calls,
            applied_to,
        })
    }

    fn invoke(
        &self,
        agent_ref: &AgentRef,
        prompt: &str,
        state: &mut ConversationState,
    ) -> Result<String> {
        match agent_ref {
            AgentRef::Registered(name) => {
                let agent = self.agents.get(name).ok_or_else(|| AgentError::NotFound {
                    agent: name.clone(),
                    detail: "not registered".to_string(),
                })?;
                agent.execute(
                    prompt,
                    self.workdir,
                    Duration::from_secs(self.config.agents.timeout_secs),
                )
            }
            AgentRef::Profile(profile) => {
                let request = LlmRequest {
                    profile: profile.clone(),
                    messages: vec![PromptMessage::new(Role::Human, prompt)],
                    json_mode: false,
                    temperature: DELEGATION_TEMPERATURE,
                };
                invoke_llm(self.llm, state.budget_mut(), "delegation", &request)
            }
        }
    }

    /// Overwrite the existing entry point with the first fenced code block.
    fn apply_code_block(&self, response: &str) -> Result<Option<String>> {
        let Some(entry) = find_entry_point(self.workdir, &self.config.verification) else {
            return Ok(None);
        };
        let Some(code) = first_code_block(response) else {
            return Ok(None);
        };
        let path = self.workdir.join(&entry);
        let mut body = code.to_string();
        body.push('\n');
        fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
        Ok(Some(entry))
    }
}

impl AgentCaller for Delegator<'_> {
    fn call_agent(&self, agent: &str, task: &str, state: &mut ConversationState) -> Result<String> {
        self.run(agent, task, state).map(|result| result.response)
    }
}

/// Body of the first fenced block, skipping the language tag line.
fn first_code_block(text: &str) -> Option<&str> {
    let body = fenced_block(text, "```")?;
    let start = text.find("```")? + 3;
    let tag_end = text[start..].find('\n')?;
    let tag = text[start..start + tag_end].trim();
    if tag.is_empty() || tag.contains(char::is_whitespace) {
        return Some(body);
    }
    let code = text[start + tag_end + 1..].split("```").next()?.trim();
    (!code.is_empty()).then_some(code)
}
