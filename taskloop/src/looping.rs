//! Task Loop Controller for `taskloop run`.
//!
//! Each pass plans one decision, executes it and reviews the result. The loop
//! stops on a final review verdict, after `max_iterations` passes, or as soon
//! as any phase exceeds the model call budget.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::state::{ConversationState, Message};
use crate::core::types::{PlanningDecision, VerificationOutcome};
use crate::delegation::Delegator;
use crate::error::{BudgetExceededError, categorize, is_budget_exceeded};
use crate::io::agents::AgentRegistry;
use crate::io::config::TaskLoopConfig;
use crate::io::llm::LlmClient;
use crate::io::prompt::PromptEngine;
use crate::io::tool_executor::{AGENT_CALL_TOOL, ExecOptions, ToolExecutionResult, ToolExecutor};
use crate::io::tools::{ToolContext, ToolRegistry};
use crate::io::transcript::{IterationRecord, RunTranscript};
use crate::planning::{PlanPhase, Planner};
use crate::review::{Execution, ReviewOutcome, Reviewer, Verdict};

/// Reason why [`TaskLoop::run`] stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStop {
    Completed,
    /// Local repair fixed the artifact.
    Repaired,
    /// Identical verification failures repeated.
    Stuck,
    MaxIterations,
    BudgetExceeded,
}

/// Summary of a task run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopOutcome {
    pub stop: LoopStop,
    pub final_response: Option<String>,
    pub iterations: u32,
    pub llm_calls: u32,
    pub last_verification: Option<VerificationOutcome>,
}

/// Immutable collaborators for one or more task runs.
pub struct TaskLoop<'a> {
    pub config: &'a TaskLoopConfig,
    pub llm: &'a dyn LlmClient,
    pub agents: &'a AgentRegistry,
    pub tools: &'a ToolRegistry,
    pub prompts: &'a PromptEngine,
    pub workdir: &'a Path,
}

struct PassResult {
    phase: PlanPhase,
    decision: &'static str,
    verdict: Verdict,
    response: Option<String>,
    verification: Option<VerificationOutcome>,
}

impl TaskLoop<'_> {
    /// Run `task` to completion, appending one transcript line per pass.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn run(&self, task: &str, transcript: Option<&RunTranscript>) -> Result<LoopOutcome> {
        let mut state = ConversationState::new(
            task,
            self.config.llm_call_limit(),
            self.config.review.stuck_threshold,
        );
        let mut response: Option<String> = None;
        let mut last_verification: Option<VerificationOutcome> = None;

        while state.iteration() < self.config.max_iterations {
            let iteration = state.advance_iteration();
            let started = Instant::now();
            let pass = match self.pass(&mut state) {
                Ok(pass) => pass,
                Err(err) if is_budget_exceeded(&err) => {
                    if let Some(budget) = err.downcast_ref::<BudgetExceededError>() {
                        warn!(
                            count = budget.count,
                            limit = budget.limit,
                            invoked_by = %budget.invoked_by,
                            "model call budget exhausted"
                        );
                    }
                    if let Some(transcript) = transcript {
                        transcript.append(&IterationRecord {
                            iteration,
                            phase: "budget".to_string(),
                            decision: "none".to_string(),
                            verdict: "budget_exceeded".to_string(),
                            llm_calls: state.llm_calls(),
                            duration_ms: elapsed_ms(started),
                        })?;
                    }
                    return Ok(self.outcome(
                        LoopStop::BudgetExceeded,
                        &state,
                        response,
                        last_verification,
                    ));
                }
                Err(err) => return Err(err).with_context(|| format!("iteration {iteration}")),
            };

            info!(
                iteration,
                phase = pass.phase.as_str(),
                decision = pass.decision,
                verdict = pass.verdict.as_str(),
                llm_calls = state.llm_calls(),
                "pass finished"
            );
            if let Some(transcript) = transcript {
                transcript.append(&IterationRecord {
                    iteration,
                    phase: pass.phase.as_str().to_string(),
                    decision: pass.decision.to_string(),
                    verdict: pass.verdict.as_str().to_string(),
                    llm_calls: state.llm_calls(),
                    duration_ms: elapsed_ms(started),
                })?;
            }
            if pass.response.is_some() {
                response = pass.response;
            }
            if pass.verification.is_some() {
                last_verification = pass.verification;
            }

            let stop = match pass.verdict {
                Verdict::Continue => continue,
                Verdict::Completed => LoopStop::Completed,
                Verdict::Repaired => LoopStop::Repaired,
                Verdict::Stuck => LoopStop::Stuck,
                Verdict::IterationsExhausted => LoopStop::MaxIterations,
            };
            return Ok(self.outcome(stop, &state, response, last_verification));
        }

        Ok(self.outcome(LoopStop::MaxIterations, &state, response, last_verification))
    }

    fn outcome(
        &self,
        stop: LoopStop,
        state: &ConversationState,
        response: Option<String>,
        last_verification: Option<VerificationOutcome>,
    ) -> LoopOutcome {
        LoopOutcome {
            stop,
            final_response: response.or_else(|| state.last_result()),
            iterations: state.iteration(),
            llm_calls: state.llm_calls(),
            last_verification,
        }
    }

    fn pass(&self, state: &mut ConversationState) -> Result<PassResult> {
        let planner = Planner {
            config: self.config,
            llm: self.llm,
            tools: self.tools,
            agents: self.agents,
            prompts: self.prompts,
            workdir: self.workdir,
        };
        let delegator = Delegator {
            config: self.config,
            llm: self.llm,
            agents: self.agents,
            tools: self.tools,
            prompts: self.prompts,
            workdir: self.workdir,
        };
        let reviewer = Reviewer {
            config: self.config,
            workdir: self.workdir,
        };

        let plan = planner.plan(state)?;
        let decision = plan.decision.kind();
        let finished = |verdict, response| PassResult {
            phase: plan.phase,
            decision,
            verdict,
            response,
            verification: None,
        };

        let (review, response): (ReviewOutcome, Option<String>) = match plan.decision {
            PlanningDecision::Respond { text } => {
                state.push(Message::assistant(text.clone()));
                return Ok(finished(Verdict::Completed, Some(text)));
            }
            PlanningDecision::Done => {
                return Ok(finished(Verdict::Completed, state.last_result()));
            }
            PlanningDecision::Tool { calls, agent_hint } => {
                let executor = ToolExecutor::new(
                    self.tools,
                    ToolContext {
                        root: self.workdir,
                        allow_outside_root: self.config.tools.allow_outside_root,
                        output_limit_bytes: self.config.tools.output_limit_bytes,
                    },
                    &self.config.agents.default_agent,
                );
                let result =
                    executor.execute(calls, state, ExecOptions::default(), Some(&delegator))?;
                if let Some(agent) = agent_hint
                    && result.read_file()
                    && !result.mutated()
                {
                    state.pending_agent_hint = Some(agent);
                }
                let review = reviewer.review(state, Execution::Tools(&result))?;
                (review, Some(tool_response(&result)))
            }
            PlanningDecision::Delegate { agent } => match delegator.delegate(&agent, state) {
                Ok(result) => {
                    let review = reviewer.review(state, Execution::Delegation(&result))?;
                    (review, Some(result.response))
                }
                Err(err) if is_budget_exceeded(&err) => return Err(err),
                Err(err) => {
                    let categorized = categorize(&err);
                    if !categorized.retry_eligible {
                        return Err(err).with_context(|| format!("delegate to '{agent}'"));
                    }
                    warn!(agent = %agent, error = %categorized, "delegation failed, planning again");
                    state.push(Message::system(format!(
                        "Delegation to '{agent}' failed: {categorized}. {}",
                        categorized.agent_feedback
                    )));
                    return Ok(finished(Verdict::Continue, None));
                }
            },
        };

        Ok(PassResult {
            phase: plan.phase,
            decision,
            verdict: review.verdict,
            response,
            verification: review.verification,
        })
    }
}

/// Final text of a tool pass: the last agent reply, else the batch summary.
fn tool_response(result: &ToolExecutionResult) -> String {
    result
        .results
        .iter()
        .rev()
        .filter(|output| output.tool == AGENT_CALL_TOOL && output.succeeded())
        .find_map(|output| output.output.as_str().map(str::to_string))
        .unwrap_or_else(|| result.summary.clone())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::agents::Agent;
    use crate::test_support::{ScriptedAgent, ScriptedLlm};

    fn run(
        config: &TaskLoopConfig,
        llm: &ScriptedLlm,
        agents: &AgentRegistry,
        workdir: &Path,
        task: &str,
    ) -> LoopOutcome {
        let tools = ToolRegistry::builtin();
        let prompts = PromptEngine::new();
        TaskLoop {
            config,
            llm,
            agents,
            tools: &tools,
            prompts: &prompts,
            workdir,
        }
        .run(task, None)
        .expect("run")
    }

    #[test]
    fn greeting_completes_without_model_calls() {
        let temp = tempfile::tempdir().expect("tempdir");
        let llm = ScriptedLlm::new(Vec::<String>::new());
        let outcome = run(
            &TaskLoopConfig::default(),
            &llm,
            &AgentRegistry::default(),
            temp.path(),
            "Hello!",
        );
        assert_eq!(outcome.stop, LoopStop::Completed);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.llm_calls, 0);
        assert!(outcome.final_response.is_some());
    }

    #[test]
    fn explanation_reads_then_asks_agent() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("app.py"), "print('hi')\n").expect("write");
        let agent = ScriptedAgent::new("coding", ["It prints hi."]);
        let agents = AgentRegistry::new(vec![Box::new(agent.clone()) as Box<dyn Agent>]);
        let llm = ScriptedLlm::new(Vec::<String>::new());
        let outcome = run(
            &TaskLoopConfig::default(),
            &llm,
            &agents,
            temp.path(),
            "Explain what app.py does",
        );
        assert_eq!(outcome.stop, LoopStop::Completed);
        assert_eq!(outcome.final_response.as_deref(), Some("It prints hi."));
        assert!(agent.tasks()[0].contains("File contents (app.py):\nprint('hi')"));
    }

    #[test]
    fn budget_exhaustion_is_a_hard_stop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = TaskLoopConfig {
            max_llm_calls: 1,
            ..TaskLoopConfig::default()
        };
        config.planning.use_fast_classify = true;
        let llm = ScriptedLlm::new(["not json", "not json"]);
        let outcome = run(
            &config,
            &llm,
            &AgentRegistry::default(),
            temp.path(),
            "Restructure the caching logic across cache.py and store.py",
        );
        assert_eq!(outcome.stop, LoopStop::BudgetExceeded);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.llm_calls, 1);
        assert_eq!(llm.calls(), 1);
    }

    #[test]
    fn retryable_delegation_failure_plans_again() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = TaskLoopConfig {
            max_iterations: 3,
            ..TaskLoopConfig::default()
        };
        let agent = ScriptedAgent::from_results(
            "reviewer",
            vec![Err("agent 'reviewer' timed out after 1s".to_string())],
        );
        let agents = AgentRegistry::new(vec![Box::new(agent) as Box<dyn Agent>]);
        let llm = ScriptedLlm::new([
            r#"{"action":"delegate","agent":"reviewer","reasoning":"","response":null,"tool_calls":[]}"#,
            r#"{"action":"done","agent":null,"reasoning":"","response":null,"tool_calls":[]}"#,
        ]);
        let outcome = run(
            &config,
            &llm,
            &agents,
            temp.path(),
            "Tell me a joke about compilers",
        );
        assert_eq!(outcome.stop, LoopStop::Completed);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.llm_calls, 2);
    }

    #[test]
    fn non_retryable_delegation_failure_propagates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = TaskLoopConfig::default();
        let llm = ScriptedLlm::new([
            r#"{"action":"delegate","agent":"ghost","reasoning":"","response":null,"tool_calls":[]}"#,
        ]);
        let tools = ToolRegistry::builtin();
        let prompts = PromptEngine::new();
        let agents = AgentRegistry::default();
        let err = TaskLoop {
            config: &config,
            llm: &llm,
            agents: &agents,
            tools: &tools,
            prompts: &prompts,
            workdir: temp.path(),
        }
        .run("Tell me a joke about compilers", None)
        .expect_err("missing agent");
        assert!(format!("{err:#}").contains("agent 'ghost' not found"));
    }
}
