//! CLI command implementations.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::case::{discover_cases, load_case};
use crate::report::aggregate;
use crate::run::run_case;
use crate::workspace::is_case_workspace;

fn cases_dir(repo_root: &Path) -> PathBuf {
    repo_root.join("eval").join("cases")
}

/// List all available cases.
pub fn list_cases(repo_root: &Path) -> Result<()> {
    for case in discover_cases(&cases_dir(repo_root))? {
        println!("{}\t{}", case.id(), case.file.case.task);
    }
    Ok(())
}

/// Run a case by id (optionally multiple times).
pub fn run_case_by_id(repo_root: &Path, case_id: &str, runs: u32) -> Result<()> {
    if runs == 0 {
        bail!("--runs must be > 0");
    }
    let case = load_case(&cases_dir(repo_root), case_id).context("load case")?;

    info!(case_id, runs, "starting runs");
    for run_num in 1..=runs {
        debug!(case_id, run_num, runs, "starting run");
        let outcome = run_case(repo_root, &case).context("run case")?;
        println!(
            "run: case={} eval_run_id={} outcome={:?} results={}",
            case_id,
            outcome.eval_run_id,
            outcome.outcome,
            outcome.results_dir.display()
        );
    }
    Ok(())
}

/// Show aggregated results for a case.
pub fn report_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let results_dir = repo_root.join("eval").join("results").join(case_id);
    let (summary, warnings) = aggregate(&results_dir)?;
    println!("report: case={} runs={}", case_id, summary.runs);
    println!(
        "report: success={} fail={} stuck={} budget={} error={}",
        summary.success, summary.fail, summary.stuck, summary.budget, summary.error
    );
    if let Some(avg) = summary.avg_duration_secs {
        println!("report: avg_duration_secs={:.2}", avg);
    }
    for (label, (passed, total)) in summary.check_pass_rates {
        println!("report: check {} {}/{}", label, passed, total);
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

/// Remove workspaces and results for a case.
pub fn clean_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let workspaces_dir = repo_root.join("eval").join("workspaces");
    let case_results = repo_root.join("eval").join("results").join(case_id);

    let mut removed = 0usize;
    if workspaces_dir.exists() {
        for entry in fs::read_dir(&workspaces_dir)
            .with_context(|| format!("read {}", workspaces_dir.display()))?
        {
            let entry = entry.context("read entry")?;
            let name = entry.file_name();
            if is_case_workspace(&name.to_string_lossy(), case_id) {
                fs::remove_dir_all(entry.path())
                    .with_context(|| format!("remove {}", entry.path().display()))?;
                removed += 1;
            }
        }
    }

    if case_results.exists() {
        fs::remove_dir_all(&case_results)
            .with_context(|| format!("remove {}", case_results.display()))?;
    }

    println!(
        "clean: case={} workspaces_removed={} results={}",
        case_id,
        removed,
        case_results.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn clean_removes_only_matching_workspaces() {
        let temp = tempdir().expect("tempdir");
        let workspaces = temp.path().join("eval/workspaces");
        for name in ["calc-abc123", "calc-go-abc123", "other-xyz789"] {
            fs::create_dir_all(workspaces.join(name)).expect("workspace");
        }
        let results = temp.path().join("eval/results/calc/eval-1");
        fs::create_dir_all(&results).expect("results");

        clean_case(temp.path(), "calc").expect("clean");

        assert!(!workspaces.join("calc-abc123").exists());
        assert!(workspaces.join("calc-go-abc123").exists());
        assert!(workspaces.join("other-xyz789").exists());
        assert!(!temp.path().join("eval/results/calc").exists());
    }

    #[test]
    fn run_rejects_unknown_case() {
        let temp = tempdir().expect("tempdir");
        let err = run_case_by_id(temp.path(), "missing", 1).expect_err("unknown case");
        assert!(format!("{err:#}").contains("not found"));
    }
}
