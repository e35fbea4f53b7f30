//! Ordered execution of tool-call batches.
//!
//! Calls run strictly in sequence because later calls may read what earlier
//! ones wrote. Per-call failures become error strings and never abort the
//! batch; only budget exhaustion propagates.

use std::collections::VecDeque;

use anyhow::{Result, anyhow};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::paths::is_test_path;
use crate::core::state::{ConversationState, Message, ToolOutput, listing_paths};
use crate::core::tool_policy::{
    OVERWRITING_TOOLS, PATH_REQUIRING_TOOLS, allows_test_overwrite, augment_calls, is_mutating,
    multifile_followup, normalize_args,
};
use crate::core::types::ToolCall;
use crate::error::{TestOverwriteError, is_budget_exceeded};
use crate::io::tools::{ToolContext, ToolRegistry};

pub const AGENT_CALL_TOOL: &str = "agent_call";
const MULTIFILE_TOOL: &str = "python_ast_dependencies_multifile";

/// How much tool output the summary carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryMode {
    /// Path and size for reads and writes.
    #[default]
    Brief,
    /// Complete tool output.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    pub augment: bool,
    pub summary: SummaryMode,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            augment: true,
            summary: SummaryMode::Brief,
        }
    }
}

/// Delegates an `agent_call` tool request to a named agent.
pub trait AgentCaller {
    fn call_agent(&self, agent: &str, task: &str, state: &mut ConversationState) -> Result<String>;
}

/// Aggregate of one executed batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolExecutionResult {
    pub results: Vec<ToolOutput>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub summary: String,
}

impl ToolExecutionResult {
    /// Whether any workspace-changing call succeeded.
    pub fn mutated(&self) -> bool {
        self.results
            .iter()
            .any(|output| output.succeeded() && is_mutating(&output.tool))
    }

    pub fn read_file(&self) -> bool {
        self.results
            .iter()
            .any(|output| output.tool == "read_file" && output.succeeded())
    }
}

pub struct ToolExecutor<'a> {
    registry: &'a ToolRegistry,
    ctx: ToolContext<'a>,
    default_agent: &'a str,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(registry: &'a ToolRegistry, ctx: ToolContext<'a>, default_agent: &'a str) -> Self {
        Self {
            registry,
            ctx,
            default_agent,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.registry
    }

    /// Execute `calls` in order, appending each output to `state`.
    ///
    /// `agents` is `None` inside delegation sub-loops, where `agent_call` is refused.
    #[instrument(skip_all, fields(calls = calls.len(), augment = options.augment))]
    pub fn execute(
        &self,
        calls: Vec<ToolCall>,
        state: &mut ConversationState,
        options: ExecOptions,
        agents: Option<&dyn AgentCaller>,
    ) -> Result<ToolExecutionResult> {
        let mut calls = calls;
        for call in &mut calls {
            normalize_args(call);
        }
        if options.augment {
            calls = augment_calls(calls);
        }
        let mut has_multifile = calls.iter().any(|call| call.tool == MULTIFILE_TOOL);
        let mut queue: VecDeque<ToolCall> = calls.into();
        let mut result = ToolExecutionResult::default();
        let mut last_path: Option<String> = None;
        let mut last_read: Option<(String, String)> = None;

        while let Some(mut call) = queue.pop_front() {
            if let Some(warning) = self.inject_path(&mut call, last_path.as_deref(), state) {
                warn!(tool = %call.tool, "{warning}");
                result.warnings.push(warning);
            }
            if let Some(path) = call.path() {
                last_path = Some(path.to_string());
            }

            let outcome = if call.tool == AGENT_CALL_TOOL {
                self.run_agent_call(&call, last_read.as_ref(), state, agents)
            } else {
                self.run_tool(&call, state)
            };

            let output = match outcome {
                Ok(value) => ToolOutput {
                    tool: call.tool.clone(),
                    args: call.args.clone(),
                    output: value,
                    error: None,
                },
                Err(err) if is_budget_exceeded(&err) => return Err(err),
                Err(err) => {
                    let message = format!("{err:#}");
                    debug!(tool = %call.tool, err = %message, "tool call failed");
                    result.errors.push(format!("{}: {message}", call.tool));
                    ToolOutput {
                        tool: call.tool.clone(),
                        args: call.args.clone(),
                        output: Value::Null,
                        error: Some(message),
                    }
                }
            };

            if output.succeeded() {
                if output.tool == "read_file"
                    && let (Some(path), Some(body)) = (output.path(), output.output.as_str())
                {
                    last_read = Some((path.to_string(), body.to_string()));
                }
                if options.augment
                    && output.tool == "list_files"
                    && !has_multifile
                    && let Some(followup) = multifile_followup(&listing_paths(&output.output))
                {
                    has_multifile = true;
                    queue.push_front(followup);
                }
            }
            state.push(Message::ToolResult(output.clone()));
            result.results.push(output);
        }

        result.summary = summarize(&result.results, options.summary);
        Ok(result)
    }

    fn inject_path(
        &self,
        call: &mut ToolCall,
        last_path: Option<&str>,
        state: &ConversationState,
    ) -> Option<String> {
        if !PATH_REQUIRING_TOOLS.contains(&call.tool.as_str()) || call.path().is_some() {
            return None;
        }
        let inferred = last_path.map(str::to_string).or_else(|| {
            state
                .tool_outputs()
                .rev()
                .find_map(|output| output.path().map(str::to_string))
        })?;
        let warning = format!(
            "Injected missing path '{inferred}' into {} from the previous call",
            call.tool
        );
        call.args.insert("path".to_string(), Value::String(inferred));
        Some(warning)
    }

    fn run_tool(&self, call: &ToolCall, state: &ConversationState) -> Result<Value> {
        if PATH_REQUIRING_TOOLS.contains(&call.tool.as_str()) && call.path().is_none() {
            return Err(anyhow!("Missing required parameter 'path' for {}", call.tool));
        }
        if OVERWRITING_TOOLS.contains(&call.tool.as_str())
            && let Some(path) = call.path()
            && is_test_path(path)
            && self.ctx.resolve(path).is_ok_and(|resolved| resolved.is_file())
            && !allows_test_overwrite(state.last_human(), path)
        {
            return Err(TestOverwriteError {
                path: path.to_string(),
            }
            .into());
        }
        self.registry.run(call, &self.ctx)
    }

    fn run_agent_call(
        &self,
        call: &ToolCall,
        last_read: Option<&(String, String)>,
        state: &mut ConversationState,
        agents: Option<&dyn AgentCaller>,
    ) -> Result<Value> {
        let Some(agents) = agents else {
            return Err(anyhow!("agent_call is not available inside delegation"));
        };
        let agent = call.str_arg("agent").unwrap_or(self.default_agent);
        let mut task = call
            .str_arg("task")
            .map(str::to_string)
            .unwrap_or_else(|| state.original_task().to_string());
        if let Some((path, contents)) = last_read {
            task.push_str(&format!("\n\nFile contents ({path}):\n{contents}"));
        }
        let response = agents.call_agent(agent, &task, state)?;
        Ok(Value::String(response))
    }
}

fn render_output(output: &Value) -> String {
    match output {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Summary text for executed results.
pub fn summarize(results: &[ToolOutput], mode: SummaryMode) -> String {
    if results.is_empty() {
        return "No tool calls executed.".to_string();
    }
    results
        .iter()
        .map(|output| {
            if let Some(err) = &output.error {
                return format!("error: {err}");
            }
            let path = output.path().unwrap_or("");
            match (mode, output.tool.as_str()) {
                (SummaryMode::Brief, "read_file") => {
                    let chars = output.output.as_str().map_or(0, |text| text.chars().count());
                    format!("read_file: {path} -> {chars} chars")
                }
                (SummaryMode::Brief, "write_file") => {
                    format!("write_file: {path} -> {}", render_output(&output.output))
                }
                _ => format!("{}: {}", output.tool, render_output(&output.output)),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
