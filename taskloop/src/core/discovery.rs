//! Task-type strategies that can resolve a planning step without a model.
//!
//! Code fix, code generation and explanation share the file discovery walk:
//! list files when nothing is known, read a selected file once a listing
//! exists, or read the first mentioned file when the classification is
//! confident.

use crate::core::file_select::select_file;
use crate::core::types::{ClassificationResult, PlanningDecision, TaskType, ToolCall};

pub const GREETING_REPLY: &str = "Hello! Tell me what you would like to build or fix.";
pub const THANKS_REPLY: &str = "You're welcome! Anything else you want to tackle?";

const TRIVIAL_GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "yo",
    "sup",
    "good morning",
    "good afternoon",
    "good evening",
];

/// Canned reply for a short greeting or thank-you, if `text` is one.
pub fn trivial_response(text: &str, max_words: usize) -> Option<&'static str> {
    let lower = text.trim().to_lowercase();
    let words: Vec<&str> = lower
        .split_whitespace()
        .map(|word| word.trim_matches(|ch: char| !ch.is_alphanumeric()))
        .filter(|word| !word.is_empty())
        .collect();
    if words.is_empty() || words.len() > max_words {
        return None;
    }
    if words.iter().any(|word| word.starts_with("thank")) {
        return Some(THANKS_REPLY);
    }
    let joined = words.join(" ");
    let greeting = TRIVIAL_GREETINGS.contains(&joined.as_str())
        || words.iter().any(|word| TRIVIAL_GREETINGS.contains(word));
    greeting.then_some(GREETING_REPLY)
}

/// Conversation facts the strategies consult.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryContext<'a> {
    pub task: &'a str,
    pub tool_results_present: bool,
    pub has_read_file: bool,
    pub listing: Option<&'a [String]>,
    pub preferred_files: &'a [String],
}

/// Run the strategy for the classified task type.
pub fn execute_strategy(
    classification: &ClassificationResult,
    ctx: &DiscoveryContext<'_>,
) -> Option<PlanningDecision> {
    match classification.task_type {
        TaskType::CodeFix | TaskType::CodeGeneration | TaskType::Explanation => {
            discover_files(classification, ctx)
        }
        TaskType::FileOperation => file_operation(classification, ctx),
        TaskType::WebSearch if !ctx.tool_results_present => Some(PlanningDecision::tool(vec![
            ToolCall::new("web_search").with_arg("query", ctx.task),
        ])),
        TaskType::Greeting => Some(PlanningDecision::Respond {
            text: GREETING_REPLY.to_string(),
        }),
        TaskType::WebSearch | TaskType::Refactor | TaskType::Unknown => None,
    }
}

/// Shared three-step discovery walk.
pub fn discover_files(
    classification: &ClassificationResult,
    ctx: &DiscoveryContext<'_>,
) -> Option<PlanningDecision> {
    let files = &classification.detected_files;
    if !ctx.tool_results_present && files.is_empty() {
        return Some(PlanningDecision::tool(vec![ToolCall::new("list_files")]));
    }
    if ctx.tool_results_present && files.is_empty() && !ctx.has_read_file {
        let candidate = ctx
            .listing
            .and_then(|listing| select_file(listing, ctx.preferred_files))?;
        return Some(read_file(&candidate));
    }
    if classification.is_confident()
        && !ctx.tool_results_present
        && let Some(first) = files.first()
    {
        return Some(read_file(first));
    }
    None
}

fn read_file(path: &str) -> PlanningDecision {
    PlanningDecision::tool(vec![ToolCall::new("read_file").with_arg("path", path)])
}

fn file_operation(
    classification: &ClassificationResult,
    ctx: &DiscoveryContext<'_>,
) -> Option<PlanningDecision> {
    if ctx.tool_results_present {
        return None;
    }
    let action = classification.detected_action.as_deref()?;
    let files = &classification.detected_files;
    let call = match action {
        "list_files" => ToolCall::new("list_files"),
        "move_file" | "copy_file" if files.len() >= 2 => ToolCall::new(action)
            .with_arg("source", files[0].as_str())
            .with_arg("destination", files[1].as_str()),
        "delete_file" if !files.is_empty() => {
            ToolCall::new(action).with_arg("path", files[0].as_str())
        }
        _ => return None,
    };
    Some(PlanningDecision::tool(vec![call]))
}
