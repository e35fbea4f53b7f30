//! Sub-agent CLI collaborator and the agent registry.
//!
//! The [`Agent`] trait decouples delegation from the concrete backend. The
//! registry is built once at startup from configuration and never mutated.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::error::AgentError;
use crate::io::config::AgentsConfig;
use crate::io::process::run_command_with_timeout;

/// Abstraction over agent execution backends.
pub trait Agent {
    fn name(&self) -> &str;

    /// Run the agent on `task` inside `workdir` and return its final text.
    fn execute(&self, task: &str, workdir: &Path, timeout: Duration) -> Result<String>;
}

/// Agent that pipes the task to a configured command.
pub struct CliAgent {
    name: String,
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl CliAgent {
    pub fn new(name: &str, command: Vec<String>, output_limit_bytes: usize) -> Self {
        Self {
            name: name.to_string(),
            command,
            output_limit_bytes,
        }
    }
}

impl Agent for CliAgent {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(agent = %self.name, timeout_secs = timeout.as_secs()))]
    fn execute(&self, task: &str, workdir: &Path, timeout: Duration) -> Result<String> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(AgentError::NotFound {
                agent: self.name.clone(),
                detail: "empty command".to_string(),
            }
            .into());
        };
        info!(program = %program, workdir = %workdir.display(), "starting agent");
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(workdir);

        let output =
            match run_command_with_timeout(cmd, Some(task.as_bytes()), timeout, self.output_limit_bytes)
            {
                Ok(output) => output,
                Err(err) => {
                    let missing = err
                        .downcast_ref::<std::io::Error>()
                        .is_some_and(|io| io.kind() == ErrorKind::NotFound);
                    if missing {
                        return Err(AgentError::NotFound {
                            agent: self.name.clone(),
                            detail: format!("{program}: command not found"),
                        }
                        .into());
                    }
                    return Err(err.context(format!("run agent {}", self.name)));
                }
            };

        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "agent timed out");
            return Err(AgentError::TimedOut {
                agent: self.name.clone(),
                timeout,
            }
            .into());
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            return Err(AgentError::NonZeroExit {
                agent: self.name.clone(),
                code: output.status.code(),
                stderr: output.stderr_text().trim().to_string(),
            }
            .into());
        }
        debug!(bytes = output.stdout.len(), "agent completed");
        Ok(output.stdout_text())
    }
}

/// Immutable name → agent mapping.
#[derive(Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, Box<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new(agents: Vec<Box<dyn Agent>>) -> Self {
        Self {
            agents: agents
                .into_iter()
                .map(|agent| (agent.name().to_string(), agent))
                .collect(),
        }
    }

    /// Register every `[agents.cli.<name>]` entry.
    pub fn from_config(config: &AgentsConfig, output_limit_bytes: usize) -> Self {
        let agents = config
            .cli
            .iter()
            .map(|(name, cli)| {
                Box::new(CliAgent::new(name, cli.command.clone(), output_limit_bytes))
                    as Box<dyn Agent>
            })
            .collect();
        Self::new(agents)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Agent> {
        self.agents.get(name).map(|agent| agent.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }
}
