//! Taskloop configuration merging.
//!
//! Applies case-specific overrides to the config shipped with the fixture.

use std::path::Path;

use anyhow::{Context, Result};
use taskloop::io::config::{DEFAULT_CONFIG_PATH, TaskLoopConfig, load_config, write_config};

use crate::case::CaseConfig;

/// Apply case configuration overrides to the base taskloop config.
pub fn apply_case_config(
    mut base: TaskLoopConfig,
    overrides: &CaseConfig,
) -> Result<TaskLoopConfig> {
    if let Some(max_iterations) = overrides.max_iterations {
        base.max_iterations = max_iterations;
    }
    if let Some(max_llm_calls) = overrides.max_llm_calls {
        base.max_llm_calls = max_llm_calls;
    }
    if let Some(agent) = &overrides.default_agent {
        base.agents.default_agent = agent.clone();
    }
    base.validate()?;
    Ok(base)
}

/// Merge overrides into the workspace config file and return the result.
pub fn configure_workspace(workspace_root: &Path, overrides: &CaseConfig) -> Result<TaskLoopConfig> {
    let path = workspace_root.join(DEFAULT_CONFIG_PATH);
    let base = load_config(&path).context("load fixture config")?;
    let merged = apply_case_config(base, overrides)?;
    write_config(&path, &merged).context("write taskloop config")?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn preserves_base_when_no_override() {
        let base = TaskLoopConfig::default();
        let merged = apply_case_config(base.clone(), &CaseConfig::default()).expect("merge");
        assert_eq!(merged, base);
    }

    #[test]
    fn applies_budget_overrides() {
        let overrides = CaseConfig {
            max_iterations: Some(3),
            max_llm_calls: Some(0),
            default_agent: Some("llm:default".to_string()),
        };
        let merged = apply_case_config(TaskLoopConfig::default(), &overrides).expect("merge");
        assert_eq!(merged.max_iterations, 3);
        assert_eq!(merged.llm_call_limit(), None);
        assert_eq!(merged.agents.default_agent, "llm:default");
    }

    #[test]
    fn configure_workspace_keeps_fixture_settings() {
        let temp = tempdir().expect("tempdir");
        let mut fixture = TaskLoopConfig::default();
        fixture.verification.command = vec!["sh".to_string()];
        fixture.verification.entry_points = vec!["main.sh".to_string()];
        write_config(&temp.path().join(DEFAULT_CONFIG_PATH), &fixture).expect("fixture config");

        let overrides = CaseConfig {
            max_iterations: Some(4),
            ..CaseConfig::default()
        };
        let merged = configure_workspace(temp.path(), &overrides).expect("configure");
        assert_eq!(merged.max_iterations, 4);
        assert_eq!(merged.verification.entry_points, vec!["main.sh"]);

        let reloaded = load_config(&temp.path().join(DEFAULT_CONFIG_PATH)).expect("reload");
        assert_eq!(reloaded, merged);
    }

    #[test]
    fn shipped_fixture_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("cases/flipped-comparison/fixture")
            .join(DEFAULT_CONFIG_PATH);
        let config = load_config(&path).expect("fixture config");
        config
            .validate_agents(config.agents.cli.keys().map(String::as_str))
            .expect("default agent registered");
        assert_eq!(config.verification.entry_points, vec!["main.sh"]);
    }
}
