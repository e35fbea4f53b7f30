//! Workspace creation and management.
//!
//! Each eval run gets an isolated copy of the case fixture.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use rand::{Rng, distributions::Alphanumeric};

/// An isolated workspace for running a case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Absolute path to the workspace root.
    pub root: PathBuf,
    /// Workspace directory name (`<case-id>-<random>`).
    pub name: String,
}

/// Create `base_dir/<case-id>-<random>` and copy the fixture into it.
pub fn create_workspace(
    base_dir: &Path,
    case_id: &str,
    fixture: Option<&Path>,
) -> Result<Workspace> {
    fs::create_dir_all(base_dir)
        .with_context(|| format!("create workspace dir {}", base_dir.display()))?;

    let name = build_workspace_name(case_id, &generate_short_id());
    let root = base_dir.join(&name);
    if root.exists() {
        bail!("workspace {} already exists", root.display());
    }
    fs::create_dir_all(&root)
        .with_context(|| format!("create workspace root {}", root.display()))?;
    if let Some(fixture) = fixture {
        copy_dir_recursive(fixture, &root).context("copy fixture")?;
    }
    let root = root
        .canonicalize()
        .with_context(|| format!("resolve {}", root.display()))?;
    Ok(Workspace { root, name })
}

pub fn build_workspace_name(case_id: &str, short_id: &str) -> String {
    format!("{case_id}-{short_id}")
}

/// True when `name` is a workspace directory created for `case_id`.
pub fn is_case_workspace(name: &str, case_id: &str) -> bool {
    name.strip_prefix(case_id)
        .and_then(|rest| rest.strip_prefix('-'))
        .is_some_and(|suffix| {
            !suffix.is_empty()
                && suffix
                    .chars()
                    .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
        })
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(8)
        .collect::<String>()
        .to_lowercase()
}

pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    if !src.exists() {
        return Err(anyhow!("missing {}", src.display()));
    }
    fs::create_dir_all(dst).with_context(|| format!("create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("read {}", src.display()))? {
        let entry = entry.context("read entry")?;
        let path = entry.path();
        let target = dst.join(entry.file_name());
        if path.is_dir() {
            copy_dir_recursive(&path, &target)?;
        } else {
            fs::copy(&path, &target).with_context(|| format!("copy {}", path.display()))?;
        }
    }
    Ok(())
}
