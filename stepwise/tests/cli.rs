//! CLI tests: spawn the stepwise binary against a temporary workspace whose
//! generator is a shell one-liner, and check exit codes.

#![cfg(unix)]

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use stepwise::exit_codes;
use stepwise::io::config::{StepwiseConfig, default_config_path, load_config, write_config};

/// Configure a generator that ignores its prompt and prints `response`.
fn configure(root: &Path, response: &str, max_retries: u32) {
    let mut cfg = StepwiseConfig::default();
    cfg.generator.command = vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("cat > /dev/null; printf '%s' '{response}'"),
    ];
    cfg.executor.max_retries = max_retries;
    write_config(&default_config_path(root), &cfg).expect("write config");
}

fn stepwise(root: &Path, args: &[&str], stdin: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_stepwise"))
        .arg("--root")
        .arg(root)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn stepwise");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(stdin.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("wait stepwise")
}

#[test]
fn init_writes_the_default_config() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = stepwise(temp.path(), &["init"], "");
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let path = default_config_path(temp.path());
    assert!(path.exists());
    assert_eq!(load_config(&path).expect("load"), StepwiseConfig::default());

    let again = stepwise(temp.path(), &["init"], "");
    assert_eq!(again.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&again.stdout).contains("already exists"));
}

#[test]
fn run_with_yes_executes_the_plan() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("notes.txt"), "hello").expect("write");
    configure(
        temp.path(),
        r#"[{"action":"read","path":"notes.txt","description":"Read notes"}]"#,
        2,
    );

    let output = stepwise(temp.path(), &["run", "--yes", "read", "the", "notes"], "");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{stdout}");
    assert!(stdout.contains("**read** `notes.txt`"));
    assert!(stdout.contains("1 of 1 steps completed"));
}

#[test]
fn declining_the_plan_rejects_it() {
    let temp = tempfile::tempdir().expect("tempdir");
    configure(
        temp.path(),
        r#"[{"action":"delete","path":"keep.txt","description":"Delete keep"}]"#,
        2,
    );
    fs::write(temp.path().join("keep.txt"), "x").expect("write");

    let output = stepwise(temp.path(), &["run", "clean up"], "n\n");
    assert_eq!(output.status.code(), Some(exit_codes::REJECTED));
    assert!(temp.path().join("keep.txt").exists());
}

#[test]
fn failed_steps_exit_with_execution_failed() {
    let temp = tempfile::tempdir().expect("tempdir");
    configure(
        temp.path(),
        r#"[{"action":"run","command":"exit 3","description":"Fail"}]"#,
        0,
    );

    let output = stepwise(temp.path(), &["run", "--yes", "--json", "fail"], "");
    assert_eq!(output.status.code(), Some(exit_codes::EXECUTION_FAILED));
    let result: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("result json");
    assert_eq!(result["success"], false);
    assert_eq!(result["failedStep"], "step_1");
    assert_eq!(result["completedSteps"], 0);
}

#[test]
fn unparsable_plans_exit_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    configure(temp.path(), "I would rather not.", 2);

    let output = stepwise(temp.path(), &["plan", "anything"], "");
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("planning failed"));
    assert!(stderr.contains("I would rather not."));
}
