//! CLI tests for the `taskloop` binary.
//!
//! Spawns the binary and checks exit codes and stdout for the commands that
//! do not need a model or an agent.

use std::process::Command;

use taskloop::exit_codes;
use taskloop::io::config::{TaskLoopConfig, load_config, write_config};
use taskloop::test_support::TestWorkspace;

fn taskloop(workspace: &TestWorkspace) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_taskloop"));
    cmd.arg("--workdir").arg(workspace.root());
    cmd
}

#[test]
fn classify_prints_json() {
    let workspace = TestWorkspace::new().expect("workspace");
    let output = taskloop(&workspace)
        .args(["classify", "Fix", "the", "bug", "in", "app.py"])
        .output()
        .expect("taskloop classify");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["task_type"], "code_fix");
    assert_eq!(value["detected_files"], serde_json::json!(["app.py"]));
}

#[test]
fn init_writes_loadable_config_once() {
    let workspace = TestWorkspace::new().expect("workspace");
    let status = taskloop(&workspace)
        .arg("init")
        .status()
        .expect("taskloop init");
    assert_eq!(status.code(), Some(exit_codes::OK));

    let path = workspace.root().join(".taskloop/config.toml");
    let config = load_config(&path).expect("load");
    assert!(config.agents.cli.contains_key("coding"));
    assert!(config.llm.profiles.contains_key("default"));

    let before = std::fs::read_to_string(&path).expect("read");
    let status = taskloop(&workspace)
        .arg("init")
        .status()
        .expect("taskloop init again");
    assert_eq!(status.code(), Some(exit_codes::OK));
    assert_eq!(std::fs::read_to_string(&path).expect("read"), before);
}

#[test]
fn invalid_config_exits_invalid() {
    let workspace = TestWorkspace::new().expect("workspace");
    workspace
        .write(".taskloop/config.toml", "max_iterations = 0\n")
        .expect("write");
    let output = taskloop(&workspace)
        .arg("verify")
        .output()
        .expect("taskloop verify");
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("max_iterations must be > 0"));
}

#[cfg(unix)]
mod sh {
    use super::*;

    fn write_sh_config(workspace: &TestWorkspace) {
        let config: TaskLoopConfig = workspace.sh_config();
        write_config(&workspace.root().join(".taskloop/config.toml"), &config)
            .expect("write config");
    }

    #[test]
    fn verify_exit_code_tracks_outcome() {
        let workspace = TestWorkspace::new().expect("workspace");
        write_sh_config(&workspace);
        workspace.write("main.sh", "echo wrong\n").expect("write");
        workspace.write("expected.txt", "right\n").expect("write");

        let output = taskloop(&workspace)
            .arg("verify")
            .output()
            .expect("taskloop verify");
        assert_eq!(output.status.code(), Some(exit_codes::VERIFY_FAILED));
        assert!(String::from_utf8_lossy(&output.stdout).starts_with("Output mismatch."));

        workspace.write("main.sh", "echo right\n").expect("write");
        let status = taskloop(&workspace)
            .arg("verify")
            .status()
            .expect("taskloop verify");
        assert_eq!(status.code(), Some(exit_codes::OK));
    }

    #[test]
    fn repair_command_fixes_flipped_comparison() {
        let workspace = TestWorkspace::new().expect("workspace");
        write_sh_config(&workspace);
        workspace
            .write(
                "main.sh",
                "n=3\nif [ $((n > 3)) -eq 1 ]; then echo big; else echo small; fi\n",
            )
            .expect("write");
        workspace.write("expected.txt", "big\n").expect("write");

        let output = taskloop(&workspace)
            .arg("repair")
            .output()
            .expect("taskloop repair");
        assert_eq!(output.status.code(), Some(exit_codes::OK));
        let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
        assert_eq!(value["outcome"], "repaired");
        assert_eq!(value["mutation"], "swap_comparison");
    }

    #[test]
    fn greeting_run_completes_without_models() {
        let workspace = TestWorkspace::new().expect("workspace");
        write_sh_config(&workspace);
        let mut config = load_config(&workspace.root().join(".taskloop/config.toml"))
            .expect("load");
        config.agents.default_agent = "llm:default".to_string();
        write_config(&workspace.root().join(".taskloop/config.toml"), &config)
            .expect("write config");

        let output = taskloop(&workspace)
            .args(["run", "--json", "Hello!"])
            .output()
            .expect("taskloop run");
        assert_eq!(output.status.code(), Some(exit_codes::OK));
        let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
        assert_eq!(value["stop"], "completed");
        assert_eq!(value["llm_calls"], 0);
        assert!(workspace.root().join(".taskloop/runs").is_dir());
    }
}
