//! Prompt rendering for planner, fast classifier and delegation retries.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::TaskType;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const FAST_CLASSIFY_TEMPLATE: &str = include_str!("prompts/fast_classify.md");
const RETRY_TEMPLATE: &str = include_str!("prompts/retry.md");

/// Tool inventory entry shown to the planner.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
}

/// Inputs for the Phase 2 planner system prompt.
#[derive(Debug, Clone)]
pub struct PlannerInputs<'a> {
    pub task_type: TaskType,
    pub tools: Vec<ToolSummary>,
    pub agents: Vec<String>,
    pub default_agent: &'a str,
    pub explain_agent: &'a str,
    pub has_tool_results: bool,
    pub has_read_file: bool,
    pub has_feedback: bool,
    /// File used in the "read before delegating" example.
    pub example_path: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .expect("planner template should be valid");
        env.add_template("fast_classify", FAST_CLASSIFY_TEMPLATE)
            .expect("fast_classify template should be valid");
        env.add_template("retry", RETRY_TEMPLATE)
            .expect("retry template should be valid");
        Self { env }
    }

    pub fn render_planner(&self, input: &PlannerInputs<'_>) -> Result<String> {
        let template = self.env.get_template("planner")?;
        let rendered = template.render(context! {
            task_type => input.task_type.as_str(),
            tools => input.tools,
            agents => input.agents,
            default_agent => input.default_agent,
            explain_agent => input.explain_agent,
            has_tool_results => input.has_tool_results,
            has_read_file => input.has_read_file,
            has_feedback => input.has_feedback,
            example_path => input.example_path,
        })?;
        Ok(rendered)
    }

    pub fn render_fast_classify(&self, task: &str) -> Result<String> {
        let template = self.env.get_template("fast_classify")?;
        Ok(template.render(context! { task => task.trim() })?)
    }

    /// Retry prompt carrying the latest verification feedback.
    pub fn render_retry(&self, task: &str, feedback: &str, iteration: u32) -> Result<String> {
        let template = self.env.get_template("retry")?;
        Ok(template.render(context! {
            task => task.trim(),
            feedback => feedback.trim(),
            iteration => iteration,
        })?)
    }
}
