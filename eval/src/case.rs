//! Case file parsing and validation.
//!
//! Each case is a directory `eval/cases/<id>/` holding a `case.toml` and an
//! optional `fixture/` tree copied into the workspace before the run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

pub const CASE_FILE: &str = "case.toml";
pub const FIXTURE_DIR: &str = "fixture";

/// A parsed case file containing the task, config overrides, and checks.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseFile {
    pub case: CaseMeta,
    #[serde(default)]
    pub config: CaseConfig,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`), equal to the directory name.
    pub id: String,
    /// Task text passed to `taskloop run`.
    pub task: String,
}

/// Overrides applied on top of the fixture's taskloop config.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CaseConfig {
    pub max_iterations: Option<u32>,
    /// `0` disables the model call cap.
    pub max_llm_calls: Option<u32>,
    pub default_agent: Option<String>,
}

/// Verification check run after `taskloop run` exits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Check {
    /// The workspace entry point reproduces the expected output.
    VerificationPasses,
    FileExists { path: PathBuf },
    CommandSucceeds { cmd: Vec<String> },
    /// `taskloop run` exited 0.
    LoopCompleted,
}

/// A case together with the directory it was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedCase {
    pub dir: PathBuf,
    pub file: CaseFile,
}

impl LoadedCase {
    pub fn id(&self) -> &str {
        &self.file.case.id
    }

    pub fn case_path(&self) -> PathBuf {
        self.dir.join(CASE_FILE)
    }

    /// Fixture tree, if the case ships one.
    pub fn fixture_dir(&self) -> Option<PathBuf> {
        let dir = self.dir.join(FIXTURE_DIR);
        dir.is_dir().then_some(dir)
    }
}

impl CaseFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        Self::parse_str(&contents).with_context(|| format!("load case {}", path.display()))
    }

    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.case.task.trim().is_empty() {
            bail!("case.task must be non-empty");
        }
        if self.config.max_iterations == Some(0) {
            bail!("config.max_iterations must be > 0");
        }
        if let Some(agent) = &self.config.default_agent
            && agent.trim().is_empty()
        {
            bail!("config.default_agent must be non-empty");
        }
        if self.checks.is_empty() {
            bail!("checks must be a non-empty array");
        }
        for (index, check) in self.checks.iter().enumerate() {
            check
                .validate()
                .with_context(|| format!("checks[{}] invalid", index))?;
        }
        for key in self.env.keys() {
            if key.trim().is_empty() {
                bail!("env key must be non-empty");
            }
        }
        Ok(())
    }
}

impl Check {
    fn validate(&self) -> Result<()> {
        match self {
            Check::FileExists { path } => {
                if path.as_os_str().is_empty() {
                    bail!("file_exists.path must be non-empty");
                }
                if path.is_absolute() {
                    bail!("file_exists.path must be relative to the workspace");
                }
            }
            Check::CommandSucceeds { cmd } => {
                if cmd.is_empty() || cmd[0].trim().is_empty() {
                    bail!("command_succeeds.cmd must be a non-empty array");
                }
            }
            Check::VerificationPasses | Check::LoopCompleted => {}
        }
        Ok(())
    }
}

/// Load one case by id from `cases_dir/<id>/case.toml`.
pub fn load_case(cases_dir: &Path, case_id: &str) -> Result<LoadedCase> {
    validate_case_id(case_id)?;
    let dir = cases_dir.join(case_id);
    let path = dir.join(CASE_FILE);
    if !path.exists() {
        bail!("case {} not found at {}", case_id, path.display());
    }
    let file = CaseFile::load(&path)?;
    if file.case.id != case_id {
        bail!(
            "case.id {} does not match directory {}",
            file.case.id,
            dir.display()
        );
    }
    Ok(LoadedCase { dir, file })
}

/// Discover and load every case directory under `cases_dir`.
///
/// Returns cases sorted by id. Directories without a `case.toml` are skipped.
pub fn discover_cases(cases_dir: &Path) -> Result<Vec<LoadedCase>> {
    if !cases_dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in
        fs::read_dir(cases_dir).with_context(|| format!("read cases dir {}", cases_dir.display()))?
    {
        let entry = entry.context("read case entry")?;
        if !entry.path().join(CASE_FILE).is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name
            .to_str()
            .ok_or_else(|| anyhow!("case dir name is not utf-8: {}", entry.path().display()))?;
        cases.push(load_case(cases_dir, name)?);
    }
    cases.sort_by(|left, right| left.id().cmp(right.id()));
    Ok(cases)
}

fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if id.contains('/') || id.contains('\\') {
        bail!("case.id must not contain path separators");
    }
    if id.contains("..") {
        bail!("case.id must not contain '..'");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const VALID: &str = r#"
[case]
id = "off-by-one"
task = "Fix the loop bound in main.sh"

[config]
max_iterations = 6
max_llm_calls = 12

[env]
RUST_LOG = "info"

[[checks]]
type = "verification_passes"

[[checks]]
type = "file_exists"
path = "main.sh"

[[checks]]
type = "command_succeeds"
cmd = ["sh", "main.sh"]

[[checks]]
type = "loop_completed"
"#;

    #[test]
    fn parses_valid_case() {
        let case = CaseFile::parse_str(VALID).expect("case parses");
        assert_eq!(case.case.id, "off-by-one");
        assert_eq!(case.config.max_llm_calls, Some(12));
        assert_eq!(case.checks.len(), 4);
        assert_eq!(case.checks[0], Check::VerificationPasses);
        assert_eq!(case.checks[3], Check::LoopCompleted);
    }

    #[test]
    fn rejects_invalid_id() {
        let input = r#"
[case]
id = "bad/id"
task = "do the thing"

[[checks]]
type = "loop_completed"
"#;
        let err = CaseFile::parse_str(input).expect_err("invalid id");
        assert!(err.to_string().contains("case.id"));
    }

    #[test]
    fn rejects_case_without_checks() {
        let input = r#"
[case]
id = "empty"
task = "do the thing"
"#;
        let err = CaseFile::parse_str(input).expect_err("no checks");
        assert!(err.to_string().contains("checks"));
    }

    #[test]
    fn rejects_malformed_command_check() {
        let input = r#"
[case]
id = "calc"
task = "do the thing"

[[checks]]
type = "command_succeeds"
cmd = []
"#;
        let err = CaseFile::parse_str(input).expect_err("invalid check");
        assert!(format!("{err:#}").contains("checks[0]"));
    }

    #[test]
    fn discovers_case_directories_sorted() {
        let temp = tempdir().expect("tempdir");
        for id in ["zeta", "alpha"] {
            let dir = temp.path().join(id);
            fs::create_dir_all(dir.join(FIXTURE_DIR)).expect("case dir");
            fs::write(
                dir.join(CASE_FILE),
                format!("[case]\nid = \"{id}\"\ntask = \"t\"\n[[checks]]\ntype = \"loop_completed\"\n"),
            )
            .expect("write case");
        }
        fs::create_dir_all(temp.path().join("notes")).expect("stray dir");

        let cases = discover_cases(temp.path()).expect("discover");
        let ids: Vec<&str> = cases.iter().map(LoadedCase::id).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert!(cases[0].fixture_dir().is_some());
    }

    #[test]
    fn load_rejects_id_directory_mismatch() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("one");
        fs::create_dir_all(&dir).expect("case dir");
        fs::write(
            dir.join(CASE_FILE),
            "[case]\nid = \"two\"\ntask = \"t\"\n[[checks]]\ntype = \"loop_completed\"\n",
        )
        .expect("write case");

        let err = load_case(temp.path(), "one").expect_err("mismatch");
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn shipped_cases_load() {
        let cases_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("cases");
        let cases = discover_cases(&cases_dir).expect("shipped cases");
        assert!(!cases.is_empty());
        for case in &cases {
            assert!(case.fixture_dir().is_some(), "{} has no fixture", case.id());
        }
    }
}
