//! Process runner for `run` steps.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::config::ExecutorConfig;
use crate::io::process::run_command_with_timeout;

/// Result of one shell command. A non-zero exit is data, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, for step output and error messages.
    pub fn combined_output(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

pub trait CommandRunner {
    /// Run `command` with `cwd` as working directory.
    ///
    /// Errors mean the command could not be run at all.
    fn run(&self, command: &str, cwd: &Path) -> Result<CommandOutcome>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, command: &str, cwd: &Path) -> Result<CommandOutcome> {
        (**self).run(command, cwd)
    }
}

/// Runs commands through a shell (`sh -c` by default).
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ShellRunner {
    pub fn new(shell: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            shell,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(cfg: &ExecutorConfig) -> Self {
        Self::new(
            cfg.shell.clone(),
            cfg.command_timeout(),
            cfg.output_limit_bytes,
        )
    }
}

impl CommandRunner for ShellRunner {
    #[instrument(skip_all, fields(command = %command, cwd = %cwd.display()))]
    fn run(&self, command: &str, cwd: &Path) -> Result<CommandOutcome> {
        let (program, args) = self
            .shell
            .split_first()
            .ok_or_else(|| anyhow!("shell command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(command).current_dir(cwd);

        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("run `{command}`"))?;
        debug!(exit_code = ?output.status.code(), timed_out = output.timed_out, "shell command finished");
        Ok(CommandOutcome {
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
            exit_code: output.status.code(),
            timed_out: output.timed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_output_joins_non_empty_streams() {
        let outcome = CommandOutcome {
            stdout: "built\n".to_string(),
            stderr: "warning: unused\n".to_string(),
            exit_code: Some(0),
            timed_out: false,
        };
        assert!(outcome.success());
        assert_eq!(outcome.combined_output(), "built\nwarning: unused");

        let quiet = CommandOutcome {
            exit_code: Some(1),
            ..CommandOutcome::default()
        };
        assert!(!quiet.success());
        assert_eq!(quiet.combined_output(), "");
    }

    #[test]
    fn timed_out_commands_are_not_successful() {
        let outcome = CommandOutcome {
            exit_code: Some(0),
            timed_out: true,
            ..CommandOutcome::default()
        };
        assert!(!outcome.success());
    }

    #[cfg(unix)]
    #[test]
    fn runs_in_the_given_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker.txt"), "x").expect("write");
        let runner = ShellRunner::from_config(&ExecutorConfig::default());

        let outcome = runner.run("ls", temp.path()).expect("run");
        assert!(outcome.success());
        assert!(outcome.stdout.contains("marker.txt"));

        let failed = runner.run("exit 7", temp.path()).expect("run");
        assert_eq!(failed.exit_code, Some(7));
        assert!(!failed.success());
    }
}
