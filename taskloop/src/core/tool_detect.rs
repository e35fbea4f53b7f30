//! Detect tool-call requests embedded in free text.
//!
//! JSON payloads win: a lowercase ```` ```json ```` fence, or a message that is
//! itself a JSON array/object of `{tool, args}` items. Otherwise a prioritized
//! list of textual patterns is tried. Every textual target must look like a
//! path so ordinary prose ("read the docs") does not trigger tools.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::paths::{is_code_file, looks_like_path};
use crate::core::types::ToolCall;

struct TextPattern {
    name: &'static str,
    detect: fn(&str) -> Option<Vec<ToolCall>>,
}

/// Ordered from most to least specific.
const TEXT_PATTERNS: &[TextPattern] = &[
    TextPattern {
        name: "change_intent",
        detect: change_intent,
    },
    TextPattern {
        name: "move_file",
        detect: move_file,
    },
    TextPattern {
        name: "copy_file",
        detect: copy_file,
    },
    TextPattern {
        name: "delete_file",
        detect: delete_file,
    },
    TextPattern {
        name: "read_file",
        detect: read_file,
    },
    TextPattern {
        name: "write_file",
        detect: write_file,
    },
    TextPattern {
        name: "append_file",
        detect: append_file,
    },
    TextPattern {
        name: "list_files",
        detect: list_files,
    },
    TextPattern {
        name: "replace_in_file",
        detect: replace_in_file,
    },
];

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($pattern).unwrap());
    };
}

static_regex!(CHANGE_RE, r"(?i)\b(fix|edit|update|change|modify|refactor|bug|issue)\b");
static_regex!(AT_PATH_RE, r"@([^\s,]+)");
static_regex!(IN_PATH_RE, r"(?i)\b(?:in|inside)\s+([^\s,]+)");
static_regex!(MOVE_RE, r"(?i)\bmove\s+(\S+)\s+to\s+(\S+)");
static_regex!(COPY_RE, r"(?i)\bcopy\s+(\S+)\s+to\s+(\S+)");
static_regex!(DELETE_RE, r"(?i)\bdelete\s+(\S+)");
static_regex!(READ_RE, r"(?i)\b(?:read|show|open)\s+(\S+)");
static_regex!(WRITE_RE, r"(?i)\bwrite\s+(.+?)\s+to\s+(\S+)");
static_regex!(APPEND_RE, r"(?i)\bappend\s+(.+?)\s+to\s+(\S+)");
static_regex!(LIST_RE, r"(?i)\blist\s+files\b");
static_regex!(LIST_IN_RE, r"(?i)\blist\s+files\s+in\s+(\S+)");
static_regex!(REPLACE_RE, r"(?i)\breplace\s+(.+?)\s+with\s+(.+?)\s+in\s+(\S+)");
static_regex!(QUOTED_RE, r#""([^"]+)"|'([^']+)'"#);

/// Detect tool calls in `message`, JSON first, then textual patterns.
pub fn detect_tool_calls(message: &str) -> Option<Vec<ToolCall>> {
    if let Some(calls) = detect_json_tool_calls(message) {
        return Some(calls);
    }
    detect_text_tool_calls(message)
}

/// Parse JSON-encoded tool calls. Invalid JSON is skipped, not an error.
pub fn detect_json_tool_calls(message: &str) -> Option<Vec<ToolCall>> {
    let mut rest = message;
    while let Some(start) = rest.find("```json") {
        let body_start = start + "```json".len();
        let body = &rest[body_start..];
        let end = body.find("```").unwrap_or(body.len());
        if let Some(calls) = parse_tool_json(body[..end].trim()) {
            return Some(calls);
        }
        rest = &body[(end + 3).min(body.len())..];
    }

    let trimmed = message.trim();
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        return parse_tool_json(trimmed);
    }
    None
}

fn parse_tool_json(text: &str) -> Option<Vec<ToolCall>> {
    let value: Value = serde_json::from_str(text).ok()?;
    let items = match value {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        _ => return None,
    };
    let calls: Vec<ToolCall> = items.into_iter().filter_map(tool_call_from_value).collect();
    (!calls.is_empty()).then_some(calls)
}

fn tool_call_from_value(value: Value) -> Option<ToolCall> {
    let Value::Object(mut object) = value else {
        return None;
    };
    let tool = object.get("tool")?.as_str()?.to_string();
    let args = match object.remove("args") {
        Some(Value::Object(args)) => args,
        None | Some(Value::Null) => Map::new(),
        Some(_) => return None,
    };
    Some(ToolCall { tool, args })
}

/// Detect tool calls in an agent reply.
///
/// Same as [`detect_tool_calls`] minus change intent: a reply reporting
/// finished work ("I fixed the bug in main.py") is final.
pub fn detect_agent_tool_calls(message: &str) -> Option<Vec<ToolCall>> {
    if let Some(calls) = detect_json_tool_calls(message) {
        return Some(calls);
    }
    match_patterns(
        message,
        TEXT_PATTERNS
            .iter()
            .filter(|pattern| pattern.name != "change_intent"),
    )
}

/// Run textual patterns in priority order and return the first hit.
pub fn detect_text_tool_calls(message: &str) -> Option<Vec<ToolCall>> {
    match_patterns(message, TEXT_PATTERNS.iter())
}

fn match_patterns<'a>(
    message: &str,
    mut patterns: impl Iterator<Item = &'a TextPattern>,
) -> Option<Vec<ToolCall>> {
    let msg = message.trim();
    patterns.find_map(|pattern| {
        let calls = (pattern.detect)(msg)?;
        debug!(pattern = pattern.name, "inline tool pattern matched");
        Some(calls)
    })
}

fn clean_target(raw: &str) -> Option<String> {
    let cleaned = raw
        .trim_matches(|ch: char| matches!(ch, ',' | ';' | ':' | '(' | ')' | '"' | '\'' | '`'))
        .trim_end_matches(['.', '!', '?'])
        .trim_start_matches('@');
    (!cleaned.is_empty() && looks_like_path(cleaned)).then(|| cleaned.to_string())
}

fn quoted_or_trimmed(raw: &str) -> String {
    QUOTED_RE
        .captures(raw)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map_or_else(|| raw.trim().to_string(), |found| found.as_str().to_string())
}

/// Path named by a change request: `@path`, `in <path>`, or a code file token.
fn change_target(msg: &str) -> Option<String> {
    if let Some(caps) = AT_PATH_RE.captures(msg) {
        return clean_target(&caps[1]);
    }
    if let Some(target) = IN_PATH_RE
        .captures_iter(msg)
        .find_map(|caps| clean_target(&caps[1]))
    {
        return Some(target);
    }
    msg.split_whitespace()
        .filter_map(clean_target)
        .find(|token| is_code_file(token))
}

fn change_intent(msg: &str) -> Option<Vec<ToolCall>> {
    if !CHANGE_RE.is_match(msg) {
        return None;
    }
    let target = change_target(msg)?;
    Some(vec![ToolCall::new("read_file").with_arg("path", target)])
}

fn source_destination(re: &Regex, tool: &str, msg: &str) -> Option<Vec<ToolCall>> {
    let caps = re.captures(msg)?;
    let source = clean_target(&caps[1])?;
    let destination = clean_target(&caps[2])?;
    Some(vec![
        ToolCall::new(tool)
            .with_arg("source", source)
            .with_arg("destination", destination),
    ])
}

fn move_file(msg: &str) -> Option<Vec<ToolCall>> {
    source_destination(&MOVE_RE, "move_file", msg)
}

fn copy_file(msg: &str) -> Option<Vec<ToolCall>> {
    source_destination(&COPY_RE, "copy_file", msg)
}

fn delete_file(msg: &str) -> Option<Vec<ToolCall>> {
    let path = clean_target(&DELETE_RE.captures(msg)?[1])?;
    Some(vec![ToolCall::new("delete_file").with_arg("path", path)])
}

fn read_file(msg: &str) -> Option<Vec<ToolCall>> {
    let path = READ_RE
        .captures_iter(msg)
        .find_map(|caps| clean_target(&caps[1]))?;
    Some(vec![ToolCall::new("read_file").with_arg("path", path)])
}

fn content_to_path(re: &Regex, tool: &str, msg: &str) -> Option<Vec<ToolCall>> {
    let caps = re.captures(msg)?;
    let path = clean_target(&caps[2])?;
    let content = quoted_or_trimmed(&caps[1]);
    Some(vec![
        ToolCall::new(tool)
            .with_arg("path", path)
            .with_arg("content", content),
    ])
}

fn write_file(msg: &str) -> Option<Vec<ToolCall>> {
    content_to_path(&WRITE_RE, "write_file", msg)
}

fn append_file(msg: &str) -> Option<Vec<ToolCall>> {
    content_to_path(&APPEND_RE, "append_file", msg)
}

fn list_files(msg: &str) -> Option<Vec<ToolCall>> {
    if !LIST_RE.is_match(msg) {
        return None;
    }
    let call = match LIST_IN_RE
        .captures(msg)
        .and_then(|caps| clean_target(&caps[1]))
    {
        Some(root) => ToolCall::new("list_files").with_arg("root", root),
        None => ToolCall::new("list_files"),
    };
    Some(vec![call])
}

fn replace_in_file(msg: &str) -> Option<Vec<ToolCall>> {
    let caps = REPLACE_RE.captures(msg)?;
    let path = clean_target(&caps[3])?;
    Some(vec![
        ToolCall::new("replace_in_file")
            .with_arg("path", path)
            .with_arg("pattern", quoted_or_trimmed(&caps[1]))
            .with_arg("replacement", quoted_or_trimmed(&caps[2])),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_array() {
        let message = "Here are the tool calls:\n```json\n[{\"tool\": \"read_file\", \"args\": {\"path\": \"test.py\"}}]\n```";
        let calls = detect_tool_calls(message).expect("calls");
        assert_eq!(
            calls,
            vec![ToolCall::new("read_file").with_arg("path", "test.py")]
        );
    }

    #[test]
    fn raw_json_array_and_fenced_object() {
        let raw = r#"  [{"tool": "write_file", "args": {"path": "out.txt", "content": "hello"}}]  "#;
        let calls = detect_tool_calls(raw).expect("raw");
        assert_eq!(calls[0].str_arg("content"), Some("hello"));

        let fenced = "```json\n{\"tool\": \"list_files\", \"args\": {\"root\": \".\"}}\n```";
        assert_eq!(detect_tool_calls(fenced).expect("object")[0].tool, "list_files");
    }

    #[test]
    fn invalid_block_is_skipped_for_the_next_one() {
        let message = "```json\n{ \"tool\": \"broken\" ... }\n```\n```json\n{\"tool\": \"read_file\", \"args\": {\"path\": \"ok.py\"}}\n```";
        let calls = detect_tool_calls(message).expect("calls");
        assert_eq!(calls[0].path(), Some("ok.py"));
    }

    #[test]
    fn invalid_or_wrapped_json_yields_nothing() {
        assert_eq!(detect_tool_calls("```json\n{ \"tool\": \"broken\" ... }\n```"), None);
        assert_eq!(
            detect_tool_calls("```JSON\n{\"tool\": \"read_file\", \"args\": {\"path\": \"ok.py\"}}\n```"),
            None
        );
        assert_eq!(
            detect_tool_calls(
                "```json\n{\"tool_calls\": [{\"tool\": \"read_file\", \"args\": {\"path\": \"ok.py\"}}]}\n```"
            ),
            None
        );
    }

    #[test]
    fn agent_replies_skip_change_intent() {
        assert_eq!(detect_agent_tool_calls("I fixed the bug in main.py."), None);
        assert_eq!(
            detect_agent_tool_calls("Now show main.py"),
            Some(vec![ToolCall::new("read_file").with_arg("path", "main.py")])
        );
        assert!(detect_agent_tool_calls("```json\n{\"tool\": \"list_files\"}\n```").is_some());
    }

    #[test]
    fn change_intent_reads_named_file() {
        assert_eq!(
            detect_tool_calls("Fix the bug in app.py"),
            Some(vec![ToolCall::new("read_file").with_arg("path", "app.py")])
        );
        assert_eq!(detect_tool_calls("Fix the failing tests"), None);
    }

    #[test]
    fn textual_patterns_require_path_targets() {
        assert_eq!(
            detect_tool_calls("move notes.txt to archive/notes.txt"),
            Some(vec![
                ToolCall::new("move_file")
                    .with_arg("source", "notes.txt")
                    .with_arg("destination", "archive/notes.txt")
            ])
        );
        assert_eq!(detect_tool_calls("please read the docs carefully"), None);
        assert_eq!(detect_tool_calls("delete everything"), None);
    }

    #[test]
    fn write_extracts_quoted_content() {
        assert_eq!(
            detect_tool_calls(r#"write "hello world" to greeting.txt"#),
            Some(vec![
                ToolCall::new("write_file")
                    .with_arg("path", "greeting.txt")
                    .with_arg("content", "hello world")
            ])
        );
    }

    #[test]
    fn list_files_with_and_without_root() {
        assert_eq!(
            detect_tool_calls("list files"),
            Some(vec![ToolCall::new("list_files")])
        );
        assert_eq!(
            detect_tool_calls("list files in src/"),
            Some(vec![ToolCall::new("list_files").with_arg("root", "src/")])
        );
    }
}
