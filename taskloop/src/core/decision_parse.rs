//! Parsing of planner and fast-classifier model responses.
//!
//! Responses are located inside a ```` ```json ```` fence when present, else
//! between the first `{` and the last `}`, then validated against the bundled
//! schemas before being mapped onto typed values.

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::Deserialize;
use serde_json::Value;

use crate::core::types::{PlanningDecision, TaskType, ToolCall};

const PLANNING_DECISION_SCHEMA: &str =
    include_str!("../../schemas/planning_decision.schema.json");
const FAST_CLASSIFY_SCHEMA: &str = include_str!("../../schemas/fast_classify.schema.json");

/// Locate the JSON payload inside a model response.
pub fn extract_json_text(raw: &str) -> Option<&str> {
    if let Some(inner) = fenced_block(raw, "```json") {
        return Some(inner);
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Body of the first fence opened with `opener`, trimmed.
pub fn fenced_block<'a>(raw: &'a str, opener: &str) -> Option<&'a str> {
    let start = raw.find(opener)? + opener.len();
    let rest = &raw[start..];
    let end = rest.find("```").unwrap_or(rest.len());
    Some(rest[..end].trim())
}

fn validate_schema(instance: &Value, schema_raw: &str, label: &str) -> Result<()> {
    let schema: Value =
        serde_json::from_str(schema_raw).with_context(|| format!("parse {label} schema"))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .with_context(|| format!("compile {label} schema"))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("{label} validation failed: {}", messages.join("; "));
    }
    Ok(())
}

fn load_json(raw: &str, label: &str) -> Result<Value> {
    let Some(text) = extract_json_text(raw) else {
        bail!("{label} response contains no JSON object");
    };
    serde_json::from_str(text).with_context(|| format!("parse {label} response json"))
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    action: String,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

/// Parse a full-planner response into a decision.
///
/// A `delegate` without an agent routes to `default_agent`.
pub fn parse_planning_decision(raw: &str, default_agent: &str) -> Result<PlanningDecision> {
    let value = load_json(raw, "planning decision")?;
    validate_schema(&value, PLANNING_DECISION_SCHEMA, "planning decision")?;
    let decision: RawDecision =
        serde_json::from_value(value).context("deserialize planning decision")?;

    let non_empty = |text: Option<String>| text.filter(|value| !value.trim().is_empty());
    match decision.action.as_str() {
        "respond" => {
            let Some(text) = non_empty(decision.response).or(non_empty(decision.reasoning)) else {
                bail!("invalid planning decision: respond without text");
            };
            Ok(PlanningDecision::Respond { text })
        }
        "tool" => {
            let calls = decision.tool_calls.unwrap_or_default();
            if calls.is_empty() {
                bail!("invalid planning decision: tool action without tool_calls");
            }
            Ok(PlanningDecision::Tool {
                calls,
                agent_hint: non_empty(decision.agent),
            })
        }
        "delegate" => Ok(PlanningDecision::Delegate {
            agent: non_empty(decision.agent).unwrap_or_else(|| default_agent.to_string()),
        }),
        "done" => Ok(PlanningDecision::Done),
        other => bail!("invalid planning decision: unknown action '{other}'"),
    }
}

/// Structured result of the optional fast model classification.
#[derive(Debug, Clone, PartialEq)]
pub struct FastClassification {
    pub task_type: TaskType,
    pub confidence: f64,
    pub detected_files: Vec<String>,
    pub suggested_action: Option<String>,
    pub reasoning: String,
    pub response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFastClassification {
    task_type: String,
    confidence: f64,
    #[serde(default)]
    detected_files: Vec<String>,
    #[serde(default)]
    suggested_action: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    response: Option<String>,
}

pub fn parse_fast_classification(raw: &str) -> Result<FastClassification> {
    let value = load_json(raw, "fast classification")?;
    validate_schema(&value, FAST_CLASSIFY_SCHEMA, "fast classification")?;
    let parsed: RawFastClassification =
        serde_json::from_value(value).context("deserialize fast classification")?;
    let Some(task_type) = TaskType::from_label(&parsed.task_type) else {
        bail!("invalid fast classification task_type '{}'", parsed.task_type);
    };
    Ok(FastClassification {
        task_type,
        confidence: parsed.confidence,
        detected_files: parsed
            .detected_files
            .into_iter()
            .map(|path| path.trim_start_matches('@').to_string())
            .collect(),
        suggested_action: parsed.suggested_action.map(|action| action.to_ascii_lowercase()),
        reasoning: parsed.reasoning.unwrap_or_default(),
        response: parsed.response,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_tool_decision() {
        let raw = "Plan:\n```json\n{\"action\":\"tool\",\"agent\":\"coding\",\"reasoning\":\"read first\",\"response\":null,\"tool_calls\":[{\"tool\":\"read_file\",\"args\":{\"path\":\"app.py\"}}]}\n```";
        let decision = parse_planning_decision(raw, "coding").expect("parse");
        assert_eq!(
            decision,
            PlanningDecision::Tool {
                calls: vec![ToolCall::new("read_file").with_arg("path", "app.py")],
                agent_hint: Some("coding".to_string()),
            }
        );
    }

    #[test]
    fn braces_are_found_inside_prose() {
        let raw = "Sure! {\"action\": \"delegate\", \"agent\": null, \"reasoning\": \"code\"} done";
        assert_eq!(
            parse_planning_decision(raw, "coding").expect("parse"),
            PlanningDecision::Delegate {
                agent: "coding".to_string()
            }
        );
    }

    #[test]
    fn respond_falls_back_to_reasoning() {
        let raw = r#"{"action":"respond","reasoning":"Nothing to do"}"#;
        assert_eq!(
            parse_planning_decision(raw, "coding").expect("parse"),
            PlanningDecision::Respond {
                text: "Nothing to do".to_string()
            }
        );
    }

    #[test]
    fn rejects_unknown_action_and_garbage() {
        assert!(parse_planning_decision(r#"{"action":"dance"}"#, "coding").is_err());
        assert!(parse_planning_decision("no json here", "coding").is_err());
        assert!(parse_planning_decision("{not json}", "coding").is_err());
        assert!(parse_planning_decision(r#"{"action":"tool","tool_calls":[]}"#, "coding").is_err());
    }

    #[test]
    fn fast_classification_accepts_alias() {
        let raw = r#"{"task_type":"complex_refactor","confidence":0.9,"detected_files":["@a.py"],"suggested_action":"Delegate","reasoning":"many files"}"#;
        let parsed = parse_fast_classification(raw).expect("parse");
        assert_eq!(parsed.task_type, TaskType::Refactor);
        assert_eq!(parsed.detected_files, vec!["a.py".to_string()]);
        assert_eq!(parsed.suggested_action.as_deref(), Some("delegate"));
    }

    #[test]
    fn fast_classification_rejects_out_of_range_confidence() {
        let raw = r#"{"task_type":"greeting","confidence":1.5}"#;
        assert!(parse_fast_classification(raw).is_err());
    }
}
