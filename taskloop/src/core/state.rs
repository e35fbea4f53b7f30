//! Conversation state owned by a single task loop.
//!
//! The message list is append-only. The only other mutation is pruning,
//! which drops messages but never reorders the survivors.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::budget::CallBudget;
use crate::core::fingerprint::FailureHistory;
use crate::core::pruning::prune_messages;
use crate::core::types::ClassificationResult;

/// Output of one executed tool call, attached to the conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub tool: String,
    pub args: Map<String, Value>,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn path(&self) -> Option<&str> {
        self.args.get("path").and_then(Value::as_str)
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Message role as seen by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Human,
    System,
    Assistant,
    ToolResult,
}

/// A tagged conversation message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    Human { content: String },
    System { content: String },
    Assistant { content: String },
    ToolResult(ToolOutput),
    /// Verification feedback appended by review. Presented with the system role.
    Feedback { content: String },
}

impl Message {
    pub fn human(content: impl Into<String>) -> Self {
        Message::Human {
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
        }
    }

    pub fn feedback(content: impl Into<String>) -> Self {
        Message::Feedback {
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::Human { .. } => Role::Human,
            Message::System { .. } | Message::Feedback { .. } => Role::System,
            Message::Assistant { .. } => Role::Assistant,
            Message::ToolResult(_) => Role::ToolResult,
        }
    }

    /// Text as presented to a model.
    pub fn text(&self) -> String {
        match self {
            Message::Human { content }
            | Message::System { content }
            | Message::Assistant { content }
            | Message::Feedback { content } => content.clone(),
            Message::ToolResult(output) => render_tool_output(output),
        }
    }
}

fn render_tool_output(output: &ToolOutput) -> String {
    match &output.error {
        Some(err) => format!("Tool results:\n{}: error: {}", output.tool, err),
        None => {
            let body = match &output.output {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            format!("Tool results:\n{}: {}", output.tool, body)
        }
    }
}

/// Owned, single-writer context for one task.
#[derive(Debug, Clone)]
pub struct ConversationState {
    messages: Vec<Message>,
    iteration: u32,
    budget: CallBudget,
    failures: FailureHistory,
    pub last_classification: Option<ClassificationResult>,
    pub local_repair_attempted: bool,
    pub selected_agent: Option<String>,
    /// Agent to delegate to once the files read by the last tool batch are in context.
    pub pending_agent_hint: Option<String>,
}

impl ConversationState {
    pub fn new(task: &str, max_llm_calls: Option<u32>, stuck_threshold: usize) -> Self {
        Self {
            messages: vec![Message::human(task)],
            iteration: 0,
            budget: CallBudget::new(max_llm_calls),
            failures: FailureHistory::new(stuck_threshold),
            last_classification: None,
            local_repair_attempted: false,
            selected_agent: None,
            pending_agent_hint: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Compress history to the original task plus recent attempt/feedback pairs.
    pub fn prune(&mut self, max_pairs: usize) {
        self.messages = prune_messages(&self.messages, max_pairs);
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Start the next loop pass and return its 1-based number.
    pub fn advance_iteration(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }

    pub fn budget(&self) -> &CallBudget {
        &self.budget
    }

    pub fn budget_mut(&mut self) -> &mut CallBudget {
        &mut self.budget
    }

    pub fn llm_calls(&self) -> u32 {
        self.budget.count()
    }

    pub fn failures(&self) -> &FailureHistory {
        &self.failures
    }

    pub fn failures_mut(&mut self) -> &mut FailureHistory {
        &mut self.failures
    }

    /// The first human message: the original task.
    pub fn original_task(&self) -> &str {
        self.messages
            .iter()
            .find_map(|msg| match msg {
                Message::Human { content } => Some(content.as_str()),
                _ => None,
            })
            .unwrap_or("")
    }

    pub fn last_human(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|msg| match msg {
            Message::Human { content } => Some(content.as_str()),
            _ => None,
        })
    }

    pub fn tool_outputs(&self) -> impl DoubleEndedIterator<Item = &ToolOutput> {
        self.messages.iter().filter_map(|msg| match msg {
            Message::ToolResult(output) => Some(output),
            _ => None,
        })
    }

    pub fn tool_results_present(&self) -> bool {
        self.tool_outputs().next().is_some()
    }

    pub fn has_read_file(&self) -> bool {
        self.tool_outputs()
            .any(|output| output.tool == "read_file" && output.succeeded())
    }

    pub fn has_feedback(&self) -> bool {
        self.messages
            .iter()
            .any(|msg| matches!(msg, Message::Feedback { .. }))
    }

    /// Paths reported by the most recent successful `list_files` call.
    pub fn latest_listing(&self) -> Option<Vec<String>> {
        self.tool_outputs()
            .rev()
            .find(|output| output.tool == "list_files" && output.succeeded())
            .map(|output| listing_paths(&output.output))
    }

    /// Most recent assistant text, used as the final response.
    pub fn last_assistant(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|msg| match msg {
            Message::Assistant { content } => Some(content.as_str()),
            _ => None,
        })
    }

    /// Best available final response: last assistant text, else last tool output.
    pub fn last_result(&self) -> Option<String> {
        self.messages.iter().rev().find_map(|msg| match msg {
            Message::Assistant { content } => Some(content.clone()),
            Message::ToolResult(_) => Some(msg.text()),
            _ => None,
        })
    }
}

/// Extract path strings from a `list_files` output value.
pub fn listing_paths(output: &Value) -> Vec<String> {
    match output {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(text) => text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
