//! Test-only fakes for the model and agent seams, plus a scratch workspace.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::io::agents::Agent;
use crate::io::config::{TaskLoopConfig, VerificationConfig};
use crate::io::llm::{LlmClient, LlmRequest};

/// Model client that replays scripted completions in order.
///
/// Running out of script is an error so tests notice unexpected calls.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    script: RefCell<VecDeque<Result<String, String>>>,
    requests: RefCell<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(responses.into_iter().map(|text| Ok(text.into())).collect())
    }

    /// `Err` entries fail the call with that message.
    pub fn from_results(results: Vec<Result<String, String>>) -> Self {
        Self {
            script: RefCell::new(results.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.borrow().clone()
    }

    pub fn profiles_seen(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.profile.clone())
            .collect()
    }
}

impl LlmClient for ScriptedLlm {
    fn complete(&self, request: &LlmRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        match self.script.borrow_mut().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted model has no response left")),
        }
    }
}

/// Agent that replays scripted replies and records the tasks it was given.
///
/// Clones share the script and the task log.
#[derive(Debug, Clone)]
pub struct ScriptedAgent {
    name: String,
    script: Rc<RefCell<VecDeque<Result<String, String>>>>,
    tasks: Rc<RefCell<Vec<String>>>,
}

impl ScriptedAgent {
    pub fn new<I, S>(name: &str, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(name, replies.into_iter().map(|text| Ok(text.into())).collect())
    }

    pub fn from_results(name: &str, results: Vec<Result<String, String>>) -> Self {
        Self {
            name: name.to_string(),
            script: Rc::new(RefCell::new(results.into())),
            tasks: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn tasks(&self) -> Vec<String> {
        self.tasks.borrow().clone()
    }
}

impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, task: &str, _workdir: &Path, _timeout: Duration) -> Result<String> {
        self.tasks.borrow_mut().push(task.to_string());
        match self.script.borrow_mut().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted agent '{}' has no reply left", self.name)),
        }
    }
}

/// Agent that rewrites a workspace file on its first call, then replies.
#[derive(Debug, Clone)]
pub struct EditingAgent {
    pub name: String,
    pub path: String,
    pub contents: String,
    pub reply: String,
}

impl Agent for EditingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _task: &str, workdir: &Path, _timeout: Duration) -> Result<String> {
        let path = workdir.join(&self.path);
        fs::write(&path, &self.contents).with_context(|| format!("write {}", path.display()))?;
        Ok(self.reply.clone())
    }
}

/// Temporary workspace with helpers for fixture files.
pub struct TestWorkspace {
    temp: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp: tempfile::tempdir().context("create temp workspace")?,
        })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.root().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Config that verifies `main.sh` with POSIX `sh`.
    pub fn sh_config(&self) -> TaskLoopConfig {
        TaskLoopConfig {
            verification: VerificationConfig {
                command: vec!["sh".to_string()],
                entry_points: vec!["main.sh".to_string()],
                timeout_secs: 5,
                ..VerificationConfig::default()
            },
            ..TaskLoopConfig::default()
        }
    }
}
