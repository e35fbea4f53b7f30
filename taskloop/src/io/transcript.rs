//! Run transcript under `.taskloop/runs/<run-id>/iterations.jsonl`.
//!
//! One JSON line per loop iteration. This is a product artifact and is written
//! regardless of `RUST_LOG`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Serialize;

/// One line of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub phase: String,
    pub decision: String,
    pub verdict: String,
    pub llm_calls: u32,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RunTranscript {
    run_id: String,
    path: PathBuf,
}

/// `run-<unix-millis>`.
pub fn new_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("run-{millis}")
}

impl RunTranscript {
    /// Create the run directory for a fresh run id.
    pub fn create(root: &Path) -> Result<Self> {
        Self::create_with_id(root, &new_run_id())
    }

    pub fn create_with_id(root: &Path, run_id: &str) -> Result<Self> {
        let dir = root.join(".taskloop").join("runs").join(run_id);
        fs::create_dir_all(&dir).with_context(|| format!("create run dir {}", dir.display()))?;
        Ok(Self {
            run_id: run_id.to_string(),
            path: dir.join("iterations.jsonl"),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &IterationRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).context("serialize iteration record")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_line_per_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let transcript = RunTranscript::create_with_id(temp.path(), "run-1").expect("create");
        assert!(
            transcript
                .path()
                .ends_with(Path::new(".taskloop/runs/run-1/iterations.jsonl"))
        );
        for iteration in 1..=2 {
            transcript
                .append(&IterationRecord {
                    iteration,
                    phase: "pattern".to_string(),
                    decision: "tool".to_string(),
                    verdict: "continue".to_string(),
                    llm_calls: 0,
                    duration_ms: 5,
                })
                .expect("append");
        }
        let text = fs::read_to_string(transcript.path()).expect("read");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["iteration"], 1);
        assert_eq!(first["verdict"], "continue");
    }

    #[test]
    fn run_ids_are_prefixed() {
        assert!(new_run_id().starts_with("run-"));
    }
}
