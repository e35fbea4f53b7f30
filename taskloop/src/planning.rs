//! Planning Orchestrator: pattern plan, optional fast classify, full plan.
//!
//! Each phase either resolves a [`PlanningDecision`] or defers to the next one
//! with the classification carried forward. Phase 0 never calls a model. Any
//! model failure in Phase 2 other than budget exhaustion falls back to the
//! default agent.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::classify;
use crate::core::decision_parse::{parse_fast_classification, parse_planning_decision};
use crate::core::discovery::{DiscoveryContext, execute_strategy, trivial_response};
use crate::core::file_select::select_file;
use crate::core::scoring::contains_word;
use crate::core::state::{ConversationState, Role};
use crate::core::tool_detect::detect_tool_calls;
use crate::core::types::{ClassificationResult, PlanningDecision, TaskType, ToolCall};
use crate::error::is_budget_exceeded;
use crate::io::agents::AgentRegistry;
use crate::io::config::TaskLoopConfig;
use crate::io::llm::{
    InvokeDiagnostics, LlmClient, LlmRequest, PromptMessage, invoke_llm, invoke_with_fallbacks,
};
use crate::io::prompt::{PlannerInputs, PromptEngine, ToolSummary};
use crate::io::tool_executor::AGENT_CALL_TOOL;
use crate::io::tools::ToolRegistry;

const CHANGE_REQUEST_WORDS: &[&str] = &[
    "fix", "edit", "update", "change", "modify", "refactor", "bug", "issue",
];
const FAST_RESPOND_CONFIDENCE: f64 = 0.8;

/// Phase that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPhase {
    Pattern,
    FastClassify,
    FullPlan,
    Fallback,
}

impl PlanPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanPhase::Pattern => "pattern",
            PlanPhase::FastClassify => "fast_classify",
            PlanPhase::FullPlan => "full_plan",
            PlanPhase::Fallback => "fallback",
        }
    }
}

/// Model-call diagnostics for one planning pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanDiagnostics {
    pub profile: Option<String>,
    pub attempts: u32,
    pub fallback_reason: Option<String>,
    pub raw_response: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub decision: PlanningDecision,
    pub phase: PlanPhase,
    pub classification: Option<ClassificationResult>,
    pub diagnostics: PlanDiagnostics,
}

enum PhaseResult {
    Resolved(PlanningDecision),
    Continue(ClassificationResult),
}

/// Collaborators the planner reads from; none are mutated.
pub struct Planner<'a> {
    pub config: &'a TaskLoopConfig,
    pub llm: &'a dyn LlmClient,
    pub tools: &'a ToolRegistry,
    pub agents: &'a AgentRegistry,
    pub prompts: &'a PromptEngine,
    pub workdir: &'a Path,
}

impl Planner<'_> {
    /// Produce exactly one decision for the current state.
    ///
    /// Only budget exhaustion escapes as an error.
    #[instrument(skip_all, fields(iteration = state.iteration()))]
    pub fn plan(&self, state: &mut ConversationState) -> Result<PlanOutcome> {
        let classification = match self.pattern_plan(state) {
            PhaseResult::Resolved(decision) => {
                return Ok(self.resolved(decision, PlanPhase::Pattern, state));
            }
            PhaseResult::Continue(classification) => classification,
        };

        let classification = match self.fast_classify(state, classification)? {
            PhaseResult::Resolved(decision) => {
                return Ok(self.resolved(decision, PlanPhase::FastClassify, state));
            }
            PhaseResult::Continue(classification) => classification,
        };
        state.last_classification = Some(classification.clone());

        self.full_plan(state, &classification)
    }

    fn resolved(
        &self,
        decision: PlanningDecision,
        phase: PlanPhase,
        state: &ConversationState,
    ) -> PlanOutcome {
        let classification = state.last_classification.clone();
        info!(
            phase = phase.as_str(),
            decision = decision.kind(),
            task_type = classification.as_ref().map(|c| c.task_type.as_str()),
            confidence = classification.as_ref().map(|c| c.confidence),
            "planning resolved"
        );
        PlanOutcome {
            decision,
            phase,
            classification,
            diagnostics: PlanDiagnostics::default(),
        }
    }

    fn preferred_files(&self) -> &[String] {
        &self.config.verification.entry_points
    }

    fn pattern_plan(&self, state: &mut ConversationState) -> PhaseResult {
        let message = state.last_human().unwrap_or_default().to_string();
        if let Some(reply) = trivial_response(&message, self.config.planning.greeting_max_words) {
            return PhaseResult::Resolved(PlanningDecision::Respond {
                text: reply.to_string(),
            });
        }

        let classification = classify(state);
        state.last_classification = Some(classification.clone());
        let tool_results_present = state.tool_results_present();

        if !tool_results_present
            && classification.task_type == TaskType::Explanation
            && let Some(file) = classification
                .detected_files
                .iter()
                .find(|file| self.workdir.join(file).is_file())
        {
            return PhaseResult::Resolved(PlanningDecision::tool(vec![
                ToolCall::new("read_file").with_arg("path", file.as_str()),
                ToolCall::new(AGENT_CALL_TOOL)
                    .with_arg("agent", self.config.agents.explain_agent.as_str())
                    .with_arg("task", message.as_str()),
            ]));
        }

        if !tool_results_present
            && self.config.planning.detect_tool_calls_from_text
            && let Some(calls) = detect_tool_calls(&message)
        {
            return PhaseResult::Resolved(PlanningDecision::tool(calls));
        }

        if let Some(agent) = state.pending_agent_hint.take() {
            debug!(agent = %agent, "delegating to pending agent hint");
            return PhaseResult::Resolved(PlanningDecision::Delegate { agent });
        }

        let listing = state.latest_listing();
        let ctx = DiscoveryContext {
            task: &message,
            tool_results_present,
            has_read_file: state.has_read_file(),
            listing: listing.as_deref(),
            preferred_files: self.preferred_files(),
        };
        match execute_strategy(&classification, &ctx) {
            Some(decision) => PhaseResult::Resolved(decision),
            None => PhaseResult::Continue(classification),
        }
    }

    fn fast_classify(
        &self,
        state: &mut ConversationState,
        classification: ClassificationResult,
    ) -> Result<PhaseResult> {
        if !self.config.planning.use_fast_classify {
            return Ok(PhaseResult::Continue(classification));
        }
        let task = state.last_human().unwrap_or_default().to_string();
        let prompt = match self.prompts.render_fast_classify(&task) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "fast classify prompt failed");
                return Ok(PhaseResult::Continue(classification));
            }
        };
        let request = LlmRequest {
            profile: self.config.planning.default_profile.clone(),
            messages: vec![PromptMessage::new(Role::Human, prompt)],
            json_mode: true,
            temperature: self.config.planning.fast_classify_temperature,
        };
        let parsed = invoke_llm(
            self.llm,
            state.budget_mut(),
            "planning.fast_classify",
            &request,
        )
        .and_then(|raw| parse_fast_classification(&raw));
        let fast = match parsed {
            Ok(fast) => fast,
            Err(err) if is_budget_exceeded(&err) => return Err(err),
            Err(err) => {
                debug!(err = %format!("{err:#}"), "fast classify deferred");
                return Ok(PhaseResult::Continue(classification));
            }
        };

        if fast.confidence >= FAST_RESPOND_CONFIDENCE
            && fast.suggested_action.as_deref() == Some("respond")
            && let Some(text) = fast
                .response
                .clone()
                .filter(|text| !text.trim().is_empty())
                .or_else(|| Some(fast.reasoning.clone()).filter(|text| !text.trim().is_empty()))
        {
            return Ok(PhaseResult::Resolved(PlanningDecision::Respond { text }));
        }

        let mut refined = classification;
        refined.task_type = fast.task_type;
        refined.confidence = fast.confidence.clamp(0.0, 1.0);
        if !fast.detected_files.is_empty() {
            refined.detected_files = fast.detected_files;
        }
        if !fast.reasoning.is_empty() {
            refined.reasoning = fast.reasoning;
        }
        Ok(PhaseResult::Continue(refined))
    }

    fn full_plan(
        &self,
        state: &mut ConversationState,
        classification: &ClassificationResult,
    ) -> Result<PlanOutcome> {
        let outcome = |decision, phase, diagnostics| PlanOutcome {
            decision,
            phase,
            classification: Some(classification.clone()),
            diagnostics,
        };

        if let Some(decision) = self.synthesize(state, classification) {
            info!(decision = decision.kind(), "full plan synthesized without a model call");
            return Ok(outcome(decision, PlanPhase::FullPlan, PlanDiagnostics::default()));
        }

        let default_agent = self.config.agents.default_agent.as_str();
        let mut diagnostics = PlanDiagnostics::default();
        let request = match self.planner_request(state, classification) {
            Ok(request) => request,
            Err(err) => {
                return Ok(self.fallback(classification, diagnostics, format!("{err:#}")));
            }
        };

        let mut invoke = InvokeDiagnostics::default();
        let raw = invoke_with_fallbacks(
            self.llm,
            state.budget_mut(),
            "planning.full_plan",
            &self.config.planning.profile_chain(),
            &self.config.planning.retry,
            &request,
            &mut invoke,
        );
        diagnostics.profile = invoke.profile.clone();
        diagnostics.attempts = invoke.attempts;
        let raw = match raw {
            Ok(raw) => raw,
            Err(err) if is_budget_exceeded(&err) => return Err(err),
            Err(err) => return Ok(self.fallback(classification, diagnostics, format!("{err:#}"))),
        };

        let decision = match parse_planning_decision(&raw, default_agent) {
            Ok(decision) => decision,
            Err(err) => {
                diagnostics.raw_response = Some(raw);
                return Ok(self.fallback(classification, diagnostics, format!("{err:#}")));
            }
        };
        let decision = self.coding_guard(decision, state, classification);
        info!(
            phase = PlanPhase::FullPlan.as_str(),
            decision = decision.kind(),
            task_type = classification.task_type.as_str(),
            confidence = classification.confidence,
            profile = ?diagnostics.profile,
            attempts = diagnostics.attempts,
            "planning resolved"
        );
        Ok(outcome(decision, PlanPhase::FullPlan, diagnostics))
    }

    /// Decisions Phase 2 can make without the model.
    fn synthesize(
        &self,
        state: &ConversationState,
        classification: &ClassificationResult,
    ) -> Option<PlanningDecision> {
        if classification.detected_files.is_empty()
            && !state.has_read_file()
            && let Some(listing) = state.latest_listing()
            && let Some(file) = select_file(&listing, self.preferred_files())
        {
            return Some(PlanningDecision::tool(vec![
                ToolCall::new("read_file").with_arg("path", file),
            ]));
        }
        let task = state.last_human().unwrap_or_default().to_lowercase();
        if !state.tool_results_present()
            && classification.detected_files.is_empty()
            && CHANGE_REQUEST_WORDS
                .iter()
                .any(|word| contains_word(&task, word))
        {
            return Some(PlanningDecision::tool(vec![ToolCall::new("list_files")]));
        }
        None
    }

    fn planner_request(
        &self,
        state: &ConversationState,
        classification: &ClassificationResult,
    ) -> Result<LlmRequest> {
        let listing = state.latest_listing().unwrap_or_default();
        let example_path = classification
            .detected_files
            .first()
            .cloned()
            .or_else(|| select_file(&listing, self.preferred_files()))
            .or_else(|| self.preferred_files().first().cloned())
            .unwrap_or_else(|| "main.py".to_string());
        let inputs = PlannerInputs {
            task_type: classification.task_type,
            tools: self
                .tools
                .inventory()
                .into_iter()
                .map(|(name, description)| ToolSummary { name, description })
                .collect(),
            agents: self.agents.names().map(str::to_string).collect(),
            default_agent: &self.config.agents.default_agent,
            explain_agent: &self.config.agents.explain_agent,
            has_tool_results: state.tool_results_present(),
            has_read_file: state.has_read_file(),
            has_feedback: state.has_feedback(),
            example_path: &example_path,
        };
        let system = self.prompts.render_planner(&inputs)?;
        let mut messages = vec![PromptMessage::new(Role::System, system)];
        messages.extend(PromptMessage::from_messages(state.messages()));
        Ok(LlmRequest {
            profile: self.config.planning.default_profile.clone(),
            messages,
            json_mode: true,
            temperature: self.config.planning.planner_temperature,
        })
    }

    fn fallback(
        &self,
        classification: &ClassificationResult,
        mut diagnostics: PlanDiagnostics,
        reason: String,
    ) -> PlanOutcome {
        let agent = self.config.agents.default_agent.clone();
        warn!(
            agent = %agent,
            reason = %reason,
            raw_response = ?diagnostics.raw_response,
            "planner failed, falling back to default agent"
        );
        diagnostics.fallback_reason = Some(reason);
        PlanOutcome {
            decision: PlanningDecision::Delegate { agent },
            phase: PlanPhase::Fallback,
            classification: Some(classification.clone()),
            diagnostics,
        }
    }

    /// Coding delegation requires the relevant files to be read first.
    fn coding_guard(
        &self,
        decision: PlanningDecision,
        state: &ConversationState,
        classification: &ClassificationResult,
    ) -> PlanningDecision {
        let PlanningDecision::Delegate { agent } = &decision else {
            return decision;
        };
        let default_agent = self.config.agents.default_agent.as_str();
        let name = agent.strip_prefix("agent:").unwrap_or(agent);
        let is_coding = name == default_agent || name == "coding";
        if !is_coding || state.has_read_file() {
            return decision;
        }

        let files = if classification.detected_files.is_empty() {
            state
                .latest_listing()
                .and_then(|listing| select_file(&listing, self.preferred_files()))
                .into_iter()
                .collect()
        } else {
            classification.detected_files.clone()
        };
        if files.is_empty() {
            debug!(agent = %agent, "coding guard: listing files before delegation");
            return PlanningDecision::tool(vec![ToolCall::new("list_files")]);
        }
        debug!(agent = %agent, files = files.len(), "coding guard: reading files before delegation");
        PlanningDecision::Tool {
            calls: files
                .iter()
                .map(|file| ToolCall::new("read_file").with_arg("path", file.as_str()))
                .collect(),
            agent_hint: Some(agent.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Message, ToolOutput};
    use crate::test_support::ScriptedLlm;
    use serde_json::{Map, json};

    struct Fixture {
        config: TaskLoopConfig,
        tools: ToolRegistry,
        agents: AgentRegistry,
        prompts: PromptEngine,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                config: TaskLoopConfig::default(),
                tools: ToolRegistry::builtin(),
                agents: AgentRegistry::default(),
                prompts: PromptEngine::new(),
                dir: tempfile::tempdir().expect("tempdir"),
            }
        }

        fn planner<'a>(&'a self, llm: &'a ScriptedLlm) -> Planner<'a> {
            Planner {
                config: &self.config,
                llm,
                tools: &self.tools,
                agents: &self.agents,
                prompts: &self.prompts,
                workdir: self.dir.path(),
            }
        }
    }

    fn tool_result(tool: &str, args: Map<String, serde_json::Value>, output: serde_json::Value) -> Message {
        Message::ToolResult(ToolOutput {
            tool: tool.to_string(),
            args,
            output,
            error: None,
        })
    }

    fn path_args(path: &str) -> Map<String, serde_json::Value> {
        let mut args = Map::new();
        args.insert("path".to_string(), json!(path));
        args
    }

    #[test]
    fn explain_with_existing_file_reads_then_calls_agent() {
        let fixture = Fixture::new();
        std::fs::write(fixture.dir.path().join("app.py"), "print(1)\n").expect("write");
        let llm = ScriptedLlm::new(Vec::<String>::new());
        let mut state = ConversationState::new("Explain what app.py does", None, 3);
        let outcome = fixture.planner(&llm).plan(&mut state).expect("plan");
        assert_eq!(outcome.phase, PlanPhase::Pattern);
        let PlanningDecision::Tool { calls, .. } = outcome.decision else {
            panic!("expected tool decision");
        };
        assert_eq!(calls[0], ToolCall::new("read_file").with_arg("path", "app.py"));
        assert_eq!(calls[1].tool, AGENT_CALL_TOOL);
        assert_eq!(calls[1].str_arg("agent"), Some("coding"));
        assert_eq!(llm.calls(), 0);
    }

    #[test]
    fn pending_agent_hint_delegates_without_model() {
        let fixture = Fixture::new();
        let llm = ScriptedLlm::new(Vec::<String>::new());
        let mut state = ConversationState::new("Refactor cache.py and store.py", None, 3);
        state.push(tool_result("read_file", path_args("cache.py"), json!("x = 1")));
        state.pending_agent_hint = Some("coding".to_string());
        let outcome = fixture.planner(&llm).plan(&mut state).expect("plan");
        assert_eq!(
            outcome.decision,
            PlanningDecision::Delegate {
                agent: "coding".to_string()
            }
        );
        assert!(state.pending_agent_hint.is_none());
    }

    #[test]
    fn full_plan_guard_reads_files_before_coding_delegation() {
        let fixture = Fixture::new();
        let llm = ScriptedLlm::new([
            r#"{"action":"delegate","agent":"coding","reasoning":"do it","response":null,"tool_calls":[]}"#,
        ]);
        let mut state =
            ConversationState::new("Restructure the caching logic across cache.py and store.py", None, 3);
        let outcome = fixture.planner(&llm).plan(&mut state).expect("plan");
        assert_eq!(outcome.phase, PlanPhase::FullPlan);
        assert_eq!(
            outcome.decision,
            PlanningDecision::Tool {
                calls: vec![
                    ToolCall::new("read_file").with_arg("path", "cache.py"),
                    ToolCall::new("read_file").with_arg("path", "store.py"),
                ],
                agent_hint: Some("coding".to_string()),
            }
        );
        assert_eq!(outcome.diagnostics.attempts, 1);
        assert_eq!(outcome.diagnostics.profile.as_deref(), Some("default"));
        let request = &llm.requests()[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0].content.contains("## Focus (refactor)"));
    }

    #[test]
    fn malformed_response_falls_back_to_default_agent() {
        let mut fixture = Fixture::new();
        fixture.config.planning.retry = crate::core::retry::RetryPolicy::immediate(1);
        let llm = ScriptedLlm::new(["I think you should just fix it."]);
        let mut state =
            ConversationState::new("Restructure the caching logic across cache.py and store.py", None, 3);
        let outcome = fixture.planner(&llm).plan(&mut state).expect("plan");
        assert_eq!(outcome.phase, PlanPhase::Fallback);
        assert_eq!(
            outcome.decision,
            PlanningDecision::Delegate {
                agent: "coding".to_string()
            }
        );
        assert_eq!(
            outcome.diagnostics.raw_response.as_deref(),
            Some("I think you should just fix it.")
        );
        assert!(outcome.diagnostics.fallback_reason.is_some());
    }

    #[test]
    fn budget_exhaustion_escapes_planning() {
        let fixture = Fixture::new();
        let llm = ScriptedLlm::new(["{}"]);
        let mut state = ConversationState::new(
            "Restructure the caching logic across cache.py and store.py",
            Some(0),
            3,
        );
        let err = fixture.planner(&llm).plan(&mut state).expect_err("budget");
        assert!(is_budget_exceeded(&err));
        assert_eq!(llm.calls(), 0);
    }

    #[test]
    fn fast_classify_can_respond_directly() {
        let mut fixture = Fixture::new();
        fixture.config.planning.use_fast_classify = true;
        let llm = ScriptedLlm::new([
            r#"{"task_type":"explanation","confidence":0.92,"detected_files":[],"suggested_action":"respond","reasoning":"general","response":"A closure captures its environment."}"#,
        ]);
        let mut state = ConversationState::new("Tell me a joke about compilers", None, 3);
        let outcome = fixture.planner(&llm).plan(&mut state).expect("plan");
        assert_eq!(outcome.phase, PlanPhase::FastClassify);
        assert_eq!(
            outcome.decision,
            PlanningDecision::Respond {
                text: "A closure captures its environment.".to_string()
            }
        );
        assert_eq!(state.llm_calls(), 1);
    }

    #[test]
    fn fast_classify_respond_without_response_uses_reasoning() {
        let mut fixture = Fixture::new();
        fixture.config.planning.use_fast_classify = true;
        let llm = ScriptedLlm::new([
            r#"{"task_type":"explanation","confidence":0.95,"detected_files":[],"suggested_action":"respond","reasoning":"A closure captures its environment."}"#,
            r#"{"action":"respond","agent":null,"reasoning":"","response":"second answer","tool_calls":[]}"#,
        ]);
        let mut state = ConversationState::new("Tell me a joke about compilers", None, 3);
        let outcome = fixture.planner(&llm).plan(&mut state).expect("plan");
        assert_eq!(outcome.phase, PlanPhase::FastClassify);
        assert_eq!(
            outcome.decision,
            PlanningDecision::Respond {
                text: "A closure captures its environment.".to_string()
            }
        );
        assert_eq!(llm.calls(), 1);
    }

    #[test]
    fn listing_without_read_synthesizes_read_in_full_plan() {
        let fixture = Fixture::new();
        let llm = ScriptedLlm::new(Vec::<String>::new());
        let mut state = ConversationState::new("Refactor everything in the codebase", None, 3);
        state.push(tool_result(
            "list_files",
            Map::new(),
            json!(["lib/util.py", "main.py", "README.md"]),
        ));
        let outcome = fixture.planner(&llm).plan(&mut state).expect("plan");
        assert_eq!(outcome.phase, PlanPhase::FullPlan);
        assert_eq!(
            outcome.decision,
            PlanningDecision::tool(vec![ToolCall::new("read_file").with_arg("path", "main.py")])
        );
        assert_eq!(llm.calls(), 0);
    }
}
