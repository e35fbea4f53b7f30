//! Pure rules applied to tool-call batches before and during execution.
//!
//! Covers argument normalization, augmentation with follow-up analysis calls,
//! and the permission check behind the test-file overwrite guard.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::paths::is_python_file;
use crate::core::types::ToolCall;

/// Tools whose effects change the workspace.
pub const MUTATING_TOOLS: &[&str] = &[
    "write_file",
    "append_file",
    "delete_file",
    "copy_file",
    "move_file",
    "replace_in_file",
    "replace_function",
    "replace_class",
    "replace_method",
    "replace_file_content",
    "inject_function",
];

/// Tools that overwrite file content in place and are subject to the test guard.
pub const OVERWRITING_TOOLS: &[&str] = &[
    "write_file",
    "replace_in_file",
    "replace_function",
    "replace_class",
    "replace_method",
    "replace_file_content",
    "inject_function",
];

/// Mutations of Python sources that get a syntax check appended.
const PYTHON_CODE_MUTATIONS: &[&str] = &[
    "write_file",
    "replace_in_file",
    "replace_function",
    "replace_class",
    "replace_method",
    "replace_file_content",
    "inject_function",
];

/// Tools that cannot run without a `path` argument.
pub const PATH_REQUIRING_TOOLS: &[&str] = &[
    "read_file",
    "write_file",
    "append_file",
    "delete_file",
    "replace_in_file",
    "replace_function",
    "replace_class",
    "replace_method",
    "replace_file_content",
    "inject_function",
    "python_ast_dependencies",
];

const CODE_ARG_KEYS: &[&str] = &["new_code", "content", "code", "replacement"];

/// Largest listing that triggers a multi-file dependency scan.
pub const MAX_MULTIFILE_PATHS: usize = 5;

pub fn is_mutating(tool: &str) -> bool {
    MUTATING_TOOLS.contains(&tool)
}

fn strip_at(value: &str) -> &str {
    match value.strip_prefix('@') {
        Some(rest) if !rest.is_empty() => rest,
        _ => value,
    }
}

/// Strip a leading `@` from every string argument, including inside arrays.
pub fn normalize_args(call: &mut ToolCall) {
    for value in call.args.values_mut() {
        match value {
            Value::String(text) => *text = strip_at(text).to_string(),
            Value::Array(items) => {
                for item in items.iter_mut() {
                    if let Value::String(text) = item {
                        *text = strip_at(text).to_string();
                    }
                }
            }
            _ => {}
        }
    }
}

/// Insert dependency scans after Python reads and syntax checks after Python writes.
pub fn augment_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut scanned: Vec<String> = calls
        .iter()
        .filter(|call| call.tool == "python_ast_dependencies")
        .filter_map(|call| call.path().map(|path| strip_at(path).to_string()))
        .collect();

    let mut augmented = Vec::with_capacity(calls.len());
    for call in calls {
        let follow_up = follow_up_for(&call, &mut scanned);
        augmented.push(call);
        augmented.extend(follow_up);
    }
    augmented
}

fn follow_up_for(call: &ToolCall, scanned: &mut Vec<String>) -> Option<ToolCall> {
    let path = strip_at(call.path()?);
    if !is_python_file(path) {
        return None;
    }
    if call.tool == "read_file" {
        if scanned.iter().any(|existing| existing == path) {
            return None;
        }
        scanned.push(path.to_string());
        return Some(ToolCall::new("python_ast_dependencies").with_arg("path", path));
    }
    if PYTHON_CODE_MUTATIONS.contains(&call.tool.as_str()) {
        let code = CODE_ARG_KEYS
            .iter()
            .find_map(|key| call.str_arg(key).filter(|code| !code.is_empty()))?;
        return Some(ToolCall::new("validate_python_syntax").with_arg("code", code));
    }
    None
}

/// Multi-file dependency scan to run after a `list_files` output, if warranted.
pub fn multifile_followup(listing: &[String]) -> Option<ToolCall> {
    let python: Vec<&String> = listing.iter().filter(|path| is_python_file(path)).collect();
    if python.is_empty() || python.len() > MAX_MULTIFILE_PATHS {
        return None;
    }
    let paths: Vec<Value> = python.into_iter().map(|path| Value::from(path.as_str())).collect();
    Some(ToolCall::new("python_ast_dependencies_multifile").with_arg("paths", paths))
}

const OVERWRITE_VERBS: &[&str] = &[
    "overwrite",
    "replace",
    "rewrite",
    "regenerate",
    "recreate",
    "reset",
];

const WRITE_VERBS: &[&str] = &["write", "add", "update", "create", "implement", "generate"];

static TEST_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\btests?\b").unwrap());

/// Whether the request explicitly permits overwriting the named test file.
pub fn allows_test_overwrite(last_human: Option<&str>, path: &str) -> bool {
    let Some(message) = last_human else {
        return false;
    };
    let lower = message.to_lowercase();
    let file_name = path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
        .to_lowercase();
    let test_reference = (!file_name.is_empty() && lower.contains(&file_name))
        || lower.contains("test file")
        || lower.contains("unit test")
        || TEST_WORD_RE.is_match(&lower);

    if OVERWRITE_VERBS.iter().any(|verb| lower.contains(verb)) {
        return test_reference;
    }
    if WRITE_VERBS.iter().any(|verb| lower.contains(verb)) {
        return test_reference || lower.contains("unit test") || lower.contains("tests");
    }
    false
}
