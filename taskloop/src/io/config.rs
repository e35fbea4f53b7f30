//! Task loop configuration stored under `.taskloop/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;

pub const DEFAULT_CONFIG_PATH: &str = ".taskloop/config.toml";

/// Prefix marking an agent reference that is a raw model profile.
pub const LLM_AGENT_PREFIX: &str = "llm:";

/// Task loop configuration (TOML).
///
/// Missing fields default to values that work against a Python workspace with
/// a `main.py` entry point and an `expected.txt` reference output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskLoopConfig {
    /// Upper bound on loop passes per task.
    pub max_iterations: u32,

    /// Upper bound on model calls per task. `0` disables the cap.
    pub max_llm_calls: u32,

    pub planning: PlanningConfig,
    pub agents: AgentsConfig,
    pub llm: LlmConfig,
    pub tools: ToolsConfig,
    pub verification: VerificationConfig,
    pub repair: RepairConfig,
    pub review: ReviewConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlanningConfig {
    pub use_fast_classify: bool,
    pub detect_tool_calls_from_text: bool,
    pub greeting_max_words: usize,
    pub default_profile: String,
    pub fallback_profiles: Vec<String>,
    pub fast_classify_temperature: f64,
    pub planner_temperature: f64,
    pub retry: RetryPolicy,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            use_fast_classify: false,
            detect_tool_calls_from_text: true,
            greeting_max_words: 3,
            default_profile: "default".to_string(),
            fallback_profiles: Vec::new(),
            fast_classify_temperature: 0.2,
            planner_temperature: 0.0,
            retry: RetryPolicy::default(),
        }
    }
}

impl PlanningConfig {
    /// Default profile followed by de-duplicated fallbacks.
    pub fn profile_chain(&self) -> Vec<String> {
        let mut chain = vec![self.default_profile.clone()];
        for profile in &self.fallback_profiles {
            if !chain.contains(profile) {
                chain.push(profile.clone());
            }
        }
        chain
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentsConfig {
    pub default_agent: String,
    pub explain_agent: String,
    /// Cap on tool-use rounds inside one delegation.
    pub max_tool_iterations: u32,
    pub timeout_secs: u64,
    /// Write the first fenced code block of a raw-profile response to the entry point.
    pub apply_code_blocks: bool,
    /// CLI-backed agents by name.
    pub cli: BTreeMap<String, CliAgentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CliAgentConfig {
    /// Command and arguments; the task text is piped to stdin.
    pub command: Vec<String>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            default_agent: "coding".to_string(),
            explain_agent: "coding".to_string(),
            max_tool_iterations: 5,
            timeout_secs: 600,
            apply_code_blocks: true,
            cli: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct LlmConfig {
    pub profiles: BTreeMap<String, LlmProfileConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmProfileConfig {
    /// Command and arguments; `{temperature}` and `{json_mode}` are substituted.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for LlmProfileConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub allow_outside_root: bool,
    pub output_limit_bytes: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allow_outside_root: false,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerificationConfig {
    /// Interpreter the entry point is passed to (e.g. `["python3"]`).
    pub command: Vec<String>,
    /// Candidate entry points, in preference order.
    pub entry_points: Vec<String>,
    pub expected_file: String,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Include the artifact source in feedback when it is at most this many bytes.
    pub feedback_artifact_limit_bytes: usize,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string()],
            entry_points: vec!["main.py".to_string(), "app.py".to_string()],
            expected_file: "expected.txt".to_string(),
            timeout_secs: 10,
            output_limit_bytes: 100_000,
            feedback_artifact_limit_bytes: 4_000,
        }
    }
}

impl VerificationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepairConfig {
    pub enabled: bool,
    pub workers: usize,
    /// Wall-clock cap for the whole candidate pool.
    pub timeout_secs: u64,
    pub candidate_timeout_secs: u64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: 4,
            timeout_secs: 10,
            candidate_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReviewConfig {
    pub stuck_threshold: usize,
    pub prune_threshold_messages: usize,
    pub max_attempt_pairs: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            stuck_threshold: 3,
            prune_threshold_messages: 24,
            max_attempt_pairs: 5,
        }
    }
}

impl Default for TaskLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_llm_calls: 40,
            planning: PlanningConfig::default(),
            agents: AgentsConfig::default(),
            llm: LlmConfig::default(),
            tools: ToolsConfig::default(),
            verification: VerificationConfig::default(),
            repair: RepairConfig::default(),
            review: ReviewConfig::default(),
        }
    }
}

impl TaskLoopConfig {
    /// The call cap as an option (`0` means unlimited).
    pub fn llm_call_limit(&self) -> Option<u32> {
        (self.max_llm_calls > 0).then_some(self.max_llm_calls)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.planning.default_profile.trim().is_empty() {
            return Err(anyhow!("planning.default_profile must be non-empty"));
        }
        if self.planning.retry.max_attempts == 0 {
            return Err(anyhow!("planning.retry.max_attempts must be > 0"));
        }
        if self.agents.timeout_secs == 0 {
            return Err(anyhow!("agents.timeout_secs must be > 0"));
        }
        for (name, agent) in &self.agents.cli {
            if agent.command.is_empty() || agent.command[0].trim().is_empty() {
                return Err(anyhow!("agents.cli.{name}.command must be a non-empty array"));
            }
        }
        for (name, profile) in &self.llm.profiles {
            if profile.command.is_empty() || profile.command[0].trim().is_empty() {
                return Err(anyhow!("llm.profiles.{name}.command must be a non-empty array"));
            }
            if profile.timeout_secs == 0 {
                return Err(anyhow!("llm.profiles.{name}.timeout_secs must be > 0"));
            }
        }
        if self.tools.output_limit_bytes == 0 {
            return Err(anyhow!("tools.output_limit_bytes must be > 0"));
        }
        let verification = &self.verification;
        if verification.command.is_empty() || verification.command[0].trim().is_empty() {
            return Err(anyhow!("verification.command must be a non-empty array"));
        }
        if verification.entry_points.is_empty() {
            return Err(anyhow!("verification.entry_points must be non-empty"));
        }
        if verification.timeout_secs == 0 {
            return Err(anyhow!("verification.timeout_secs must be > 0"));
        }
        if verification.output_limit_bytes == 0 {
            return Err(anyhow!("verification.output_limit_bytes must be > 0"));
        }
        if self.repair.workers == 0 {
            return Err(anyhow!("repair.workers must be > 0"));
        }
        if self.repair.timeout_secs == 0 || self.repair.candidate_timeout_secs == 0 {
            return Err(anyhow!("repair timeouts must be > 0"));
        }
        if self.review.stuck_threshold < 2 {
            return Err(anyhow!("review.stuck_threshold must be >= 2"));
        }
        Ok(())
    }

    /// Check that the default agent resolves against the registered agent names.
    pub fn validate_agents<'a>(&self, registered: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let agent = self.agents.default_agent.as_str();
        if agent.starts_with(LLM_AGENT_PREFIX) {
            return Ok(());
        }
        let name = agent.strip_prefix("agent:").unwrap_or(agent);
        if registered.into_iter().any(|known| known == name) {
            return Ok(());
        }
        Err(anyhow!(
            "agents.default_agent '{agent}' is neither a registered agent nor an llm: reference"
        ))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TaskLoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<TaskLoopConfig> {
    if !path.exists() {
        let cfg = TaskLoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TaskLoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &TaskLoopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, TaskLoopConfig::default());
        assert_eq!(cfg.llm_call_limit(), Some(40));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".taskloop/config.toml");
        let mut cfg = TaskLoopConfig::default();
        cfg.agents.cli.insert(
            "coding".to_string(),
            CliAgentConfig {
                command: vec!["my-agent".to_string(), "--quiet".to_string()],
            },
        );
        cfg.llm.profiles.insert(
            "default".to_string(),
            LlmProfileConfig {
                command: vec!["llm".to_string(), "-t".to_string(), "{temperature}".to_string()],
                timeout_secs: 30,
            },
        );
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "max_llm_calls = 0\n[verification]\ncommand = [\"sh\"]\nentry_points = [\"main.sh\"]\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.llm_call_limit(), None);
        assert_eq!(cfg.verification.entry_points, vec!["main.sh"]);
        assert_eq!(cfg.verification.expected_file, "expected.txt");
        assert_eq!(cfg.review.stuck_threshold, 3);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = TaskLoopConfig::default();
        cfg.review.stuck_threshold = 1;
        assert!(cfg.validate().is_err());

        let mut cfg = TaskLoopConfig::default();
        cfg.repair.workers = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = TaskLoopConfig::default();
        cfg.verification.entry_points.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_agent_must_resolve() {
        let mut cfg = TaskLoopConfig::default();
        assert!(cfg.validate_agents(["coding"]).is_ok());
        assert!(cfg.validate_agents(["other"]).is_err());
        cfg.agents.default_agent = "llm:default".to_string();
        assert!(cfg.validate_agents(std::iter::empty()).is_ok());
    }

    #[test]
    fn profile_chain_dedups_fallbacks() {
        let mut planning = PlanningConfig::default();
        planning.fallback_profiles = vec![
            "backup".to_string(),
            "default".to_string(),
            "backup".to_string(),
        ];
        assert_eq!(planning.profile_chain(), vec!["default", "backup"]);
    }
}
