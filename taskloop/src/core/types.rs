//! Shared deterministic types for the task loop.
//!
//! These types define stable contracts between planning, execution and
//! review. They carry no I/O handles and serialize deterministically.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Confidence at or above which a classification is acted on without a model call.
pub const CONFIDENT_THRESHOLD: f64 = 0.8;

/// Coarse task bucket used to select a routing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Greeting,
    FileOperation,
    CodeFix,
    CodeGeneration,
    Explanation,
    Refactor,
    WebSearch,
    Unknown,
}

impl TaskType {
    pub const ALL: [TaskType; 8] = [
        TaskType::Greeting,
        TaskType::FileOperation,
        TaskType::CodeFix,
        TaskType::CodeGeneration,
        TaskType::Explanation,
        TaskType::Refactor,
        TaskType::WebSearch,
        TaskType::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Greeting => "greeting",
            TaskType::FileOperation => "file_operation",
            TaskType::CodeFix => "code_fix",
            TaskType::CodeGeneration => "code_generation",
            TaskType::Explanation => "explanation",
            TaskType::Refactor => "refactor",
            TaskType::WebSearch => "web_search",
            TaskType::Unknown => "unknown",
        }
    }

    /// Tie-break priority; higher wins when scores are equal.
    pub fn priority(self) -> u8 {
        match self {
            TaskType::CodeFix => 6,
            TaskType::CodeGeneration => 5,
            TaskType::Refactor => 4,
            TaskType::Explanation => 3,
            TaskType::FileOperation => 2,
            TaskType::WebSearch => 1,
            TaskType::Greeting | TaskType::Unknown => 0,
        }
    }

    /// Parse a model-provided label. Accepts the `complex_refactor` alias.
    pub fn from_label(label: &str) -> Option<TaskType> {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "greeting" => Some(TaskType::Greeting),
            "file_operation" => Some(TaskType::FileOperation),
            "code_fix" => Some(TaskType::CodeFix),
            "code_generation" => Some(TaskType::CodeGeneration),
            "explanation" => Some(TaskType::Explanation),
            "refactor" | "complex_refactor" => Some(TaskType::Refactor),
            "web_search" => Some(TaskType::WebSearch),
            "unknown" => Some(TaskType::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ranked task-type candidate, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub task_type: TaskType,
    pub score: f64,
    pub confidence: f64,
    pub reasoning: Vec<String>,
}

/// Output of the pattern classifier. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub task_type: TaskType,
    pub confidence: f64,
    pub detected_files: Vec<String>,
    pub detected_action: Option<String>,
    pub reasoning: String,
    pub candidates: Vec<Candidate>,
}

impl ClassificationResult {
    pub fn is_confident(&self) -> bool {
        self.confidence >= CONFIDENT_THRESHOLD
    }
}

/// A single tool invocation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolCall {
    pub fn new(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            args: Map::new(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    /// String argument lookup.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    pub fn path(&self) -> Option<&str> {
        self.str_arg("path")
    }
}

/// The single structured action chosen for one loop iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanningDecision {
    Respond {
        text: String,
    },
    Tool {
        calls: Vec<ToolCall>,
        agent_hint: Option<String>,
    },
    Delegate {
        agent: String,
    },
    Done,
}

impl PlanningDecision {
    pub fn tool(calls: Vec<ToolCall>) -> Self {
        PlanningDecision::Tool {
            calls,
            agent_hint: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlanningDecision::Respond { .. } => "respond",
            PlanningDecision::Tool { .. } => "tool",
            PlanningDecision::Delegate { .. } => "delegate",
            PlanningDecision::Done => "done",
        }
    }
}

/// Result of running the produced artifact once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// 1-based line at which streamed output diverged from the expected output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mismatch_line: Option<usize>,
    #[serde(default)]
    pub lines_compared: usize,
    #[serde(default)]
    pub timed_out: bool,
}

impl VerificationOutcome {
    pub fn passed(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            entry_point: None,
            expected: None,
            actual: None,
            stderr: None,
            exit_code: None,
            mismatch_line: None,
            lines_compared: 0,
            timed_out: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_labels_round_trip_and_accept_alias() {
        for task in TaskType::ALL {
            assert_eq!(TaskType::from_label(task.as_str()), Some(task));
        }
        assert_eq!(
            TaskType::from_label("complex_refactor"),
            Some(TaskType::Refactor)
        );
        assert_eq!(TaskType::from_label("Code-Fix"), Some(TaskType::CodeFix));
        assert_eq!(TaskType::from_label("poetry"), None);
    }

    #[test]
    fn tool_call_deserializes_without_args() {
        let call: ToolCall = serde_json::from_str(r#"{"tool":"list_files"}"#).expect("parse");
        assert_eq!(call, ToolCall::new("list_files"));
    }
}
