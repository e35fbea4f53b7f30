//! End-to-end routing scenarios driven through the planner and the task loop.
//!
//! Model and agent collaborators are scripted; verification runs POSIX `sh`
//! scripts so the tests do not depend on Python.

use taskloop::core::classifier::classify_text;
use taskloop::core::state::{ConversationState, Message, ToolOutput};
use taskloop::core::types::{PlanningDecision, TaskType, ToolCall};
use taskloop::io::agents::{Agent, AgentRegistry};
use taskloop::io::config::TaskLoopConfig;
use taskloop::io::prompt::PromptEngine;
use taskloop::io::tools::ToolRegistry;
use taskloop::io::transcript::RunTranscript;
use taskloop::io::verify::verify_workspace;
use taskloop::looping::{LoopStop, TaskLoop};
use taskloop::planning::{PlanPhase, Planner};
use taskloop::test_support::{ScriptedAgent, ScriptedLlm, TestWorkspace};

const DELEGATE_CODING: &str =
    r#"{"action":"delegate","agent":"coding","reasoning":"fix it","response":null,"tool_calls":[]}"#;

fn plan(
    config: &TaskLoopConfig,
    llm: &ScriptedLlm,
    workspace: &TestWorkspace,
    state: &mut ConversationState,
) -> taskloop::planning::PlanOutcome {
    let tools = ToolRegistry::builtin();
    let agents = AgentRegistry::default();
    let prompts = PromptEngine::new();
    Planner {
        config,
        llm,
        tools: &tools,
        agents: &agents,
        prompts: &prompts,
        workdir: workspace.root(),
    }
    .plan(state)
    .expect("plan")
}

#[test]
fn named_file_fix_reads_the_file_first() {
    let workspace = TestWorkspace::new().expect("workspace");
    let llm = ScriptedLlm::new(Vec::<String>::new());
    let mut state = ConversationState::new("Fix the bug in app.py", None, 3);

    let outcome = plan(&TaskLoopConfig::default(), &llm, &workspace, &mut state);

    assert_eq!(outcome.phase, PlanPhase::Pattern);
    assert_eq!(
        outcome.decision,
        PlanningDecision::tool(vec![ToolCall::new("read_file").with_arg("path", "app.py")])
    );
    assert_eq!(llm.calls(), 0);
}

#[test]
fn unnamed_fix_lists_then_reads_preferred_entry_point() {
    let workspace = TestWorkspace::new().expect("workspace");
    let config = TaskLoopConfig::default();
    let llm = ScriptedLlm::new(Vec::<String>::new());
    let mut state = ConversationState::new("Fix the failing tests", None, 3);

    let first = plan(&config, &llm, &workspace, &mut state);
    assert_eq!(
        first.decision,
        PlanningDecision::tool(vec![ToolCall::new("list_files")])
    );

    state.push(Message::ToolResult(ToolOutput {
        tool: "list_files".to_string(),
        args: serde_json::Map::new(),
        output: serde_json::json!(["app.py", "expected.txt"]),
        error: None,
    }));
    let second = plan(&config, &llm, &workspace, &mut state);
    assert_eq!(
        second.decision,
        PlanningDecision::tool(vec![ToolCall::new("read_file").with_arg("path", "app.py")])
    );
    assert_eq!(llm.calls(), 0);
}

#[cfg(unix)]
#[test]
fn case_mismatch_diagnostic_names_both_outputs() {
    let workspace = TestWorkspace::new().expect("workspace");
    workspace
        .write("main.sh", "echo 'the lord of the rings'\n")
        .expect("write");
    workspace
        .write("expected.txt", "The Lord of the Rings\n")
        .expect("write");
    let config = workspace.sh_config();

    let outcome = verify_workspace(workspace.root(), &config.verification).expect("verify");

    assert!(!outcome.success);
    assert!(outcome.message.contains("the lord of the rings"));
    assert!(outcome.message.contains("The Lord of the Rings"));
    assert_eq!(outcome.mismatch_line, Some(1));
}

#[cfg(unix)]
#[test]
fn local_repair_finishes_without_another_model_call() {
    let workspace = TestWorkspace::new().expect("workspace");
    workspace
        .write(
            "main.sh",
            "n=3\nif [ $((n > 3)) -eq 1 ]; then echo big; else echo small; fi\n",
        )
        .expect("write");
    workspace.write("expected.txt", "big\n").expect("write");
    let config = workspace.sh_config();
    let agent = ScriptedAgent::new("coding", ["I looked at main.sh and it seems fine."]);
    let agents = AgentRegistry::new(vec![Box::new(agent.clone()) as Box<dyn Agent>]);
    let llm = ScriptedLlm::new([DELEGATE_CODING]);
    let tools = ToolRegistry::builtin();
    let prompts = PromptEngine::new();
    let transcript = RunTranscript::create_with_id(workspace.root(), "run-test").expect("transcript");

    let outcome = TaskLoop {
        config: &config,
        llm: &llm,
        agents: &agents,
        tools: &tools,
        prompts: &prompts,
        workdir: workspace.root(),
    }
    .run("Fix the bug in main.sh", Some(&transcript))
    .expect("run");

    assert_eq!(outcome.stop, LoopStop::Repaired);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.llm_calls, 1);
    assert_eq!(llm.calls(), 1);
    assert!(workspace.read("main.sh").expect("read").contains("n >= 3"));

    let lines = std::fs::read_to_string(transcript.path()).expect("read transcript");
    let records: Vec<serde_json::Value> = lines
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["phase"], "pattern");
    assert_eq!(records[0]["verdict"], "continue");
    assert_eq!(records[1]["decision"], "delegate");
    assert_eq!(records[1]["verdict"], "repaired");
    assert_eq!(records[1]["llm_calls"], 1);
}

#[test]
fn greeting_is_answered_without_model_calls() {
    let classification = classify_text("Hello!");
    assert_eq!(classification.task_type, TaskType::Greeting);
    assert!(classification.confidence >= 0.4);

    let workspace = TestWorkspace::new().expect("workspace");
    let llm = ScriptedLlm::new(Vec::<String>::new());
    let mut state = ConversationState::new("Hello!", None, 3);
    let outcome = plan(&TaskLoopConfig::default(), &llm, &workspace, &mut state);

    assert_eq!(outcome.phase, PlanPhase::Pattern);
    assert!(matches!(outcome.decision, PlanningDecision::Respond { .. }));
    assert_eq!(state.llm_calls(), 0);
    assert_eq!(llm.calls(), 0);
}

#[test]
fn classification_is_deterministic() {
    let tasks = [
        "Fix the bug in app.py",
        "Hello!",
        "Explain what utils/parser.py does",
        "Move notes.txt to archive/notes.txt",
        "Restructure the caching logic across cache.py and store.py",
        "What's the weather in Paris?",
    ];
    for task in tasks {
        let first = classify_text(task);
        for _ in 0..5 {
            assert_eq!(classify_text(task), first, "classification drifted for {task:?}");
        }
    }
}
