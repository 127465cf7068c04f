//! Test-only helpers: step constructors and scripted collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::error::GenerationError;
use crate::executor::{ProgressSink, Severity};
use crate::io::generator::Generator;
use crate::io::shell::{CommandOutcome, CommandRunner};
use crate::plan::{ExecutionStep, StepAction};

fn step(id: &str, action: StepAction, path: Option<&str>, command: Option<&str>) -> ExecutionStep {
    let target = path.or(command).unwrap_or_default();
    let verb = match action {
        StepAction::Read => "Read",
        StepAction::Write => "Write",
        StepAction::Run => "Run",
        StepAction::Delete => "Delete",
    };
    ExecutionStep {
        id: id.to_string(),
        action,
        description: format!("{verb} {target}"),
        path: path.map(str::to_string),
        command: command.map(str::to_string),
        depends_on: Vec::new(),
        expected_outcome: None,
    }
}

pub fn read_step(id: &str, path: &str) -> ExecutionStep {
    step(id, StepAction::Read, Some(path), None)
}

pub fn write_step(id: &str, path: &str) -> ExecutionStep {
    step(id, StepAction::Write, Some(path), None)
}

pub fn delete_step(id: &str, path: &str) -> ExecutionStep {
    step(id, StepAction::Delete, Some(path), None)
}

pub fn run_step(id: &str, command: &str) -> ExecutionStep {
    step(id, StepAction::Run, None, Some(command))
}

pub fn with_deps(mut step: ExecutionStep, deps: &[&str]) -> ExecutionStep {
    step.depends_on = deps.iter().map(|dep| dep.to_string()).collect();
    step
}

/// Generator that replays queued responses in order and records every prompt.
///
/// Once the queue is empty it reports itself unavailable.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    responses: RefCell<VecDeque<Result<String, GenerationError>>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn replying(responses: &[&str]) -> Self {
        Self::new(responses.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, prompt: &str, _timeout: Duration) -> Result<String, GenerationError> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::Unavailable("script exhausted".to_string())))
    }
}

/// Command runner that replays queued outcomes and records every command.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    outcomes: RefCell<VecDeque<CommandOutcome>>,
    commands: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(outcomes: Vec<CommandOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            commands: RefCell::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &str, _cwd: &Path) -> Result<CommandOutcome> {
        self.commands.borrow_mut().push(command.to_string());
        self.outcomes
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted outcome for `{command}`"))
    }
}

/// Successful command outcome with `stdout`.
pub fn exit_ok(stdout: &str) -> CommandOutcome {
    CommandOutcome {
        stdout: stdout.to_string(),
        exit_code: Some(0),
        ..CommandOutcome::default()
    }
}

/// Failed command outcome with `stderr`.
pub fn exit_failed(code: i32, stderr: &str) -> CommandOutcome {
    CommandOutcome {
        stderr: stderr.to_string(),
        exit_code: Some(code),
        ..CommandOutcome::default()
    }
}

/// Progress sink that keeps every callback for later assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub progress: Vec<(usize, usize, String)>,
    pub messages: Vec<(String, Severity)>,
}

impl RecordingSink {
    pub fn messages_with(&self, severity: Severity) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|(_, s)| *s == severity)
            .map(|(text, _)| text.as_str())
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn on_progress(&mut self, index: usize, total: usize, description: &str) {
        self.progress.push((index, total, description.to_string()));
    }

    fn on_message(&mut self, text: &str, severity: Severity) {
        self.messages.push((text.to_string(), severity));
    }
}

/// Temporary workspace root.
pub struct TestWorkspace {
    temp: tempfile::TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.temp.path().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.path(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}
