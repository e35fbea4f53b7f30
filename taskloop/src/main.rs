//! Task routing and verification loop CLI.
//!
//! Routes a task through planning, tool execution or agent delegation, and
//! review until the workspace artifact verifies or a budget runs out.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use taskloop::core::classifier::classify_text;
use taskloop::exit_codes;
use taskloop::io::agents::AgentRegistry;
use taskloop::io::config::{
    CliAgentConfig, DEFAULT_CONFIG_PATH, LlmProfileConfig, TaskLoopConfig, load_config,
    write_config,
};
use taskloop::io::llm::CommandLlm;
use taskloop::io::prompt::PromptEngine;
use taskloop::io::repair::{RepairOutcome, attempt_repair};
use taskloop::io::tools::ToolRegistry;
use taskloop::io::transcript::RunTranscript;
use taskloop::io::verify::verify_workspace;
use taskloop::logging;
use taskloop::looping::{LoopStop, TaskLoop};

#[derive(Parser)]
#[command(
    name = "taskloop",
    version,
    about = "Task routing and verification loop"
)]
struct Cli {
    /// Config file, relative to the workdir unless absolute.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Workspace the task operates on.
    #[arg(long, global = true, default_value = ".")]
    workdir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a task through the loop until it completes or a budget runs out.
    Run {
        /// Task text; multiple words are joined with spaces.
        #[arg(required = true)]
        task: Vec<String>,
        /// Print the loop outcome as JSON instead of the final response.
        #[arg(long)]
        json: bool,
        /// Skip writing `.taskloop/runs/<run-id>/iterations.jsonl`.
        #[arg(long)]
        no_transcript: bool,
    },
    /// Print the pattern classification of a task as JSON.
    Classify {
        #[arg(required = true)]
        task: Vec<String>,
    },
    /// Run the workspace entry point against the expected output.
    Verify,
    /// Try model-free local repair of the workspace entry point.
    Repair,
    /// Write a starter config file if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let workdir = cli
        .workdir
        .canonicalize()
        .with_context(|| format!("resolve workdir {}", cli.workdir.display()))?;
    let config_path = if cli.config.is_absolute() {
        cli.config.clone()
    } else {
        workdir.join(&cli.config)
    };
    match cli.command {
        Command::Run {
            task,
            json,
            no_transcript,
        } => cmd_run(&workdir, &config_path, &task.join(" "), json, no_transcript),
        Command::Classify { task } => cmd_classify(&task.join(" ")),
        Command::Verify => cmd_verify(&workdir, &config_path),
        Command::Repair => cmd_repair(&workdir, &config_path),
        Command::Init { force } => cmd_init(&config_path, force),
    }
}

fn cmd_run(
    workdir: &Path,
    config_path: &Path,
    task: &str,
    json: bool,
    no_transcript: bool,
) -> Result<i32> {
    if task.trim().is_empty() {
        bail!("task must be non-empty");
    }
    let config = load_config(config_path)?;
    let agents = AgentRegistry::from_config(&config.agents, config.tools.output_limit_bytes);
    config.validate_agents(agents.names())?;
    let llm = CommandLlm::new(
        config.llm.profiles.clone(),
        workdir.to_path_buf(),
        config.tools.output_limit_bytes,
    );
    let tools = ToolRegistry::builtin();
    let prompts = PromptEngine::new();
    let transcript = if no_transcript {
        None
    } else {
        Some(RunTranscript::create(workdir)?)
    };
    if let Some(transcript) = &transcript {
        info!(run_id = transcript.run_id(), path = %transcript.path().display(), "transcript");
    }

    let outcome = TaskLoop {
        config: &config,
        llm: &llm,
        agents: &agents,
        tools: &tools,
        prompts: &prompts,
        workdir,
    }
    .run(task, transcript.as_ref())?;

    if json {
        print_json(&outcome)?;
    } else {
        if let Some(response) = &outcome.final_response {
            println!("{}", response.trim_end());
        }
        eprintln!(
            "stop={} iterations={} llm_calls={}",
            stop_label(&outcome.stop),
            outcome.iterations,
            outcome.llm_calls
        );
    }
    Ok(match outcome.stop {
        LoopStop::Completed | LoopStop::Repaired => exit_codes::OK,
        LoopStop::Stuck => exit_codes::STUCK,
        LoopStop::MaxIterations => exit_codes::MAX_ITERATIONS,
        LoopStop::BudgetExceeded => exit_codes::BUDGET_EXCEEDED,
    })
}

fn cmd_classify(task: &str) -> Result<i32> {
    print_json(&classify_text(task))?;
    Ok(exit_codes::OK)
}

fn cmd_verify(workdir: &Path, config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let outcome = verify_workspace(workdir, &config.verification)?;
    println!("{}", outcome.message);
    Ok(if outcome.success {
        exit_codes::OK
    } else {
        exit_codes::VERIFY_FAILED
    })
}

fn cmd_repair(workdir: &Path, config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let outcome = attempt_repair(workdir, &config.verification, &config.repair)?;
    print_json(&outcome)?;
    Ok(match outcome {
        RepairOutcome::Exhausted { .. } => exit_codes::VERIFY_FAILED,
        RepairOutcome::Repaired { .. } | RepairOutcome::NotApplicable { .. } => exit_codes::OK,
    })
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if !force && config_path.exists() {
        println!("{} already exists", config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &starter_config())
        .with_context(|| format!("write {}", config_path.display()))?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

/// Default config plus placeholder agent and model commands to edit.
fn starter_config() -> TaskLoopConfig {
    let mut config = TaskLoopConfig::default();
    config.agents.cli = BTreeMap::from([(
        config.agents.default_agent.clone(),
        CliAgentConfig {
            command: vec!["coding-agent".to_string()],
        },
    )]);
    config.llm.profiles = BTreeMap::from([(
        config.planning.default_profile.clone(),
        LlmProfileConfig {
            command: vec![
                "llm".to_string(),
                "--temperature".to_string(),
                "{temperature}".to_string(),
            ],
            ..LlmProfileConfig::default()
        },
    )]);
    config
}

fn stop_label(stop: &LoopStop) -> &'static str {
    match stop {
        LoopStop::Completed => "completed",
        LoopStop::Repaired => "repaired",
        LoopStop::Stuck => "stuck",
        LoopStop::MaxIterations => "max_iterations",
        LoopStop::BudgetExceeded => "budget_exceeded",
    }
}

/// Print `value` as pretty JSON to stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
