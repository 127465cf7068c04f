//! Text generator abstraction.
//!
//! The [`Generator`] trait decouples planning and write steps from the actual
//! model backend. [`CommandGenerator`] pipes the prompt into a configured
//! command; tests use scripted generators that replay canned responses.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::retry::truncate_on_char_boundary;
use crate::error::GenerationError;
use crate::io::config::GeneratorConfig;
use crate::io::process::run_command_with_timeout;

const STDERR_LIMIT: usize = 2_000;

/// Opaque prompt-in, text-out collaborator. Output is untrusted.
pub trait Generator {
    fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, GenerationError>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, GenerationError> {
        (**self).generate(prompt, timeout)
    }
}

/// Generator that runs a command, writes the prompt to its stdin and returns stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
    workdir: PathBuf,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn new(command: Vec<String>, workdir: impl Into<PathBuf>, output_limit_bytes: usize) -> Self {
        Self {
            command,
            workdir: workdir.into(),
            output_limit_bytes,
        }
    }

    pub fn from_config(cfg: &GeneratorConfig, workdir: &Path) -> Self {
        Self::new(cfg.command.clone(), workdir, cfg.output_limit_bytes)
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(prompt_bytes = prompt.len(), timeout_secs = timeout.as_secs()))]
    fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, GenerationError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| GenerationError::Unavailable("generator command is empty".to_string()))?;
        info!(program = %program, "invoking generator");

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| GenerationError::Unavailable(format!("{program}: {err:#}")))?;

        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "generator timed out");
            return Err(GenerationError::Timeout(timeout));
        }
        if !output.status.success() {
            let stderr = output.stderr_text();
            warn!(exit_code = ?output.status.code(), "generator failed");
            return Err(GenerationError::Failed {
                code: output.status.code(),
                stderr: truncate_on_char_boundary(stderr.trim(), STDERR_LIMIT).to_string(),
            });
        }

        let text = output.stdout_text().trim().to_string();
        if text.is_empty() {
            return Err(GenerationError::Empty);
        }
        debug!(response_bytes = text.len(), "generator responded");
        Ok(text)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandGenerator {
        let temp = std::env::temp_dir();
        CommandGenerator::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            temp,
            10_000,
        )
    }

    #[test]
    fn prompt_goes_to_stdin_and_stdout_comes_back() {
        let response = sh("cat")
            .generate("  echo me  ", Duration::from_secs(10))
            .expect("generate");
        assert_eq!(response, "echo me");
    }

    #[test]
    fn non_zero_exit_is_a_failure_with_stderr() {
        let err = sh("echo overloaded >&2; exit 4")
            .generate("p", Duration::from_secs(10))
            .expect_err("failure");
        match err {
            GenerationError::Failed { code, stderr } => {
                assert_eq!(code, Some(4));
                assert_eq!(stderr, "overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn blank_output_is_empty() {
        let err = sh("true")
            .generate("p", Duration::from_secs(10))
            .expect_err("empty");
        assert!(matches!(err, GenerationError::Empty));
    }

    #[test]
    fn timeouts_are_reported() {
        let err = sh("exec sleep 5")
            .generate("p", Duration::from_millis(200))
            .expect_err("timeout");
        assert!(matches!(err, GenerationError::Timeout(_)));
    }

    #[test]
    fn missing_program_is_unavailable() {
        let generator = CommandGenerator::new(
            vec!["stepwise-no-such-generator".to_string()],
            std::env::temp_dir(),
            100,
        );
        let err = generator
            .generate("p", Duration::from_secs(1))
            .expect_err("unavailable");
        assert!(matches!(err, GenerationError::Unavailable(_)));
    }
}
