//! Atomic step loop: runs a plan one step at a time with bounded retries.
//!
//! Each step is normalized, contract-checked, then executed. Retryable
//! failures go through the [`AutoCorrector`] first and fall back to a full
//! regeneration steered by the [`RetryContext`] history. The first terminal
//! failure stops the plan; earlier successes stay recorded. `execute_plan`
//! has exactly one place where the final [`ExecutionResult`] is built.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::core::contract::validate_contract;
use crate::core::correct::{AutoCorrector, Correction, check_content, describe_issues};
use crate::core::extract::strip_code_fence;
use crate::core::lang::Language;
use crate::core::retry::RetryContext;
use crate::core::sanitize::sanitize_command;
use crate::error::{ContractViolation, StepError};
use crate::io::config::{ExecutorConfig, StepwiseConfig};
use crate::io::generator::Generator;
use crate::io::prompt::{PromptBuilder, ReadContext, WriteStepInput};
use crate::io::shell::CommandRunner;
use crate::io::workspace::{DeleteOutcome, Workspace};
use crate::plan::{ExecutionResult, ExecutionStep, PlanStatus, StepAction, StepResult, TaskPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

/// Receives user-facing progress while a plan runs.
pub trait ProgressSink {
    /// Called once per successful step; `index` is 1-based.
    fn on_progress(&mut self, index: usize, total: usize, description: &str);
    fn on_message(&mut self, text: &str, severity: Severity);
}

/// Shared cancellation switch, checked between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Executor<G, R> {
    generator: G,
    runner: R,
    workspace: Workspace,
    config: ExecutorConfig,
    generator_timeout: Duration,
    corrector: AutoCorrector,
    cancel: Option<CancelFlag>,
}

/// Plan-level text shared by every write prompt.
struct PlanText<'a> {
    request: &'a str,
    reasoning: &'a str,
}

struct StepDone {
    output: String,
    attempts: u32,
    /// Normalized path, for read steps that feed later write prompts.
    path: Option<String>,
}

struct StepFailure {
    error: StepError,
    attempts: u32,
}

struct Halt {
    step_id: Option<String>,
    message: String,
    cancelled: bool,
}

impl<G: Generator, R: CommandRunner> Executor<G, R> {
    pub fn new(generator: G, runner: R, workspace: Workspace, config: &StepwiseConfig) -> Self {
        Self {
            generator,
            runner,
            workspace,
            config: config.executor.clone(),
            generator_timeout: config.generator.timeout(),
            corrector: AutoCorrector::new(),
            cancel: None,
        }
    }

    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Run every step of `plan` in order. Never fails: every outcome,
    /// including cancellation and contract violations, is reported in the
    /// returned [`ExecutionResult`].
    #[instrument(skip_all, fields(task_id = %plan.task_id, steps = plan.steps.len()))]
    pub fn execute_plan<S: ProgressSink + ?Sized>(
        &self,
        plan: &mut TaskPlan,
        sink: &mut S,
    ) -> ExecutionResult {
        let started = Instant::now();
        let total = plan.steps.len();
        let steps = plan.steps.clone();
        let request = plan.user_request.clone();
        let reasoning = plan.reasoning.clone();
        let text = PlanText {
            request: &request,
            reasoning: &reasoning,
        };

        plan.status = PlanStatus::InProgress;
        plan.current_step = None;
        plan.results.clear();

        let mut reads: Vec<ReadContext> = Vec::new();
        let mut completed = 0usize;
        let mut halt: Option<Halt> = None;

        for (index, step) in steps.iter().enumerate() {
            if self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
                halt = Some(Halt {
                    step_id: None,
                    message: format!("execution cancelled after {completed} of {total} steps"),
                    cancelled: true,
                });
                break;
            }

            plan.current_step = Some(step.id.clone());
            sink.on_message(
                &format!("Step {}/{}: {}", index + 1, total, step.description),
                Severity::Info,
            );
            let step_started = Instant::now();
            let outcome = self.run_step(&text, step, &reads, sink);
            let duration_ms = millis(step_started.elapsed());

            match outcome {
                Ok(done) => {
                    if step.action == StepAction::Read
                        && let Some(path) = done.path
                    {
                        reads.push(ReadContext {
                            path,
                            content: done.output.clone(),
                        });
                    }
                    plan.results.insert(
                        step.id.clone(),
                        StepResult {
                            step_id: step.id.clone(),
                            success: true,
                            output: done.output,
                            error: None,
                            duration_ms,
                            timestamp: Utc::now(),
                            attempts: done.attempts,
                        },
                    );
                    completed += 1;
                    sink.on_progress(index + 1, total, &step.description);
                }
                Err(failure) => {
                    let retries = failure.attempts.saturating_sub(1);
                    let message = format!(
                        "step \"{}\" ({}) failed after {} {}: {}",
                        step.description,
                        step.id,
                        retries,
                        if retries == 1 { "retry" } else { "retries" },
                        failure.error
                    );
                    plan.results.insert(
                        step.id.clone(),
                        StepResult {
                            step_id: step.id.clone(),
                            success: false,
                            output: failure.error.generated_output().unwrap_or_default().to_string(),
                            error: Some(failure.error.to_string()),
                            duration_ms,
                            timestamp: Utc::now(),
                            attempts: failure.attempts,
                        },
                    );
                    halt = Some(Halt {
                        step_id: Some(step.id.clone()),
                        message,
                        cancelled: false,
                    });
                    break;
                }
            }
        }

        let total_duration_ms = millis(started.elapsed());
        match &halt {
            None => {
                plan.status = PlanStatus::Completed;
                info!(completed, total_duration_ms, "plan completed");
                sink.on_message(
                    &format!("Plan completed: {completed} of {total} steps succeeded"),
                    Severity::Success,
                );
            }
            Some(halt) => {
                plan.status = PlanStatus::Failed;
                error!(
                    step_id = halt.step_id.as_deref().unwrap_or_default(),
                    completed,
                    cancelled = halt.cancelled,
                    "plan failed: {}",
                    halt.message
                );
                sink.on_message(&halt.message, Severity::Error);
            }
        }

        ExecutionResult {
            success: halt.is_none(),
            completed_steps: completed,
            results: plan.results.clone(),
            error: halt.as_ref().map(|h| h.message.clone()),
            failed_step: halt.as_ref().and_then(|h| h.step_id.clone()),
            cancelled: halt.as_ref().is_some_and(|h| h.cancelled),
            total_duration_ms,
        }
    }

    /// One step, start to terminal outcome.
    fn run_step<S: ProgressSink + ?Sized>(
        &self,
        text: &PlanText<'_>,
        step: &ExecutionStep,
        reads: &[ReadContext],
        sink: &mut S,
    ) -> Result<StepDone, StepFailure> {
        let step = self.prepare(step).map_err(|violation| StepFailure {
            error: StepError::Contract(violation),
            attempts: 0,
        })?;

        let mut retry = RetryContext::new(self.config.max_retries);
        let mut correction: Option<Correction> = None;
        loop {
            let attempt = retry.attempts().len() as u32 + 1;
            let (outcome, approach) = match correction.take() {
                Some(correction) => {
                    let approach = format!("auto-corrected content ({})", correction.describe());
                    let path = step.path.as_deref().unwrap_or_default();
                    (self.write_content(path, &correction.content), approach)
                }
                None => (
                    self.attempt(text, &step, reads, &retry),
                    describe_approach(&step),
                ),
            };

            let err = match outcome {
                Ok(output) => {
                    debug!(step_id = %step.id, attempt, "step succeeded");
                    return Ok(StepDone {
                        output,
                        attempts: attempt,
                        path: step.path.clone(),
                    });
                }
                Err(err) if !err.is_retryable() => {
                    return Err(StepFailure {
                        error: err,
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            let message = err.to_string();
            retry.record_attempt(err.generated_output(), message.clone(), approach);
            if retry.is_exhausted() {
                debug!(
                    step_id = %step.id,
                    attempts = attempt,
                    first_error = retry.original_error().unwrap_or_default(),
                    "retries exhausted"
                );
                return Err(StepFailure {
                    error: err,
                    attempts: attempt,
                });
            }

            warn!(
                step_id = %step.id,
                attempt,
                remaining = retry.remaining(),
                confidence = retry.confidence(),
                error = %message,
                "step attempt failed; retrying"
            );
            sink.on_message(
                &format!(
                    "Retrying \"{}\" ({}), attempt {} failed: {}",
                    step.description, step.id, attempt, message
                ),
                Severity::Warning,
            );

            correction = self.auto_correct(&step, &err, &message);
            if let Some(correction) = &correction {
                sink.on_message(
                    &format!(
                        "Auto-corrected {}: {}",
                        step.path.as_deref().unwrap_or_default(),
                        correction.describe()
                    ),
                    Severity::Info,
                );
            }
        }
    }

    /// Normalize generator artifacts, then validate. Never the other way round.
    fn prepare(&self, step: &ExecutionStep) -> Result<ExecutionStep, ContractViolation> {
        let mut step = step.clone();
        step.path = step.path.map(|path| self.workspace.normalize_path(&path));
        step.command = step.command.map(|command| sanitize_command(&command));
        validate_contract(&step)?;
        Ok(step)
    }

    fn attempt(
        &self,
        text: &PlanText<'_>,
        step: &ExecutionStep,
        reads: &[ReadContext],
        retry: &RetryContext,
    ) -> Result<String, StepError> {
        match step.action {
            StepAction::Read => {
                let path = required(step.path.as_deref(), step)?;
                self.workspace
                    .read(path, self.config.output_limit_bytes, self.config.tree_depth)
                    .map(|output| output.into_text())
                    .map_err(|err| StepError::execution(format!("{err:#}")))
            }
            StepAction::Write => {
                let path = required(step.path.as_deref(), step)?;
                self.generate_and_write(text, step, path, reads, retry)
            }
            StepAction::Run => {
                let command = required(step.command.as_deref(), step)?;
                self.run_command(command)
            }
            StepAction::Delete => {
                let path = required(step.path.as_deref(), step)?;
                let outcome = self
                    .workspace
                    .delete(path)
                    .map_err(|err| StepError::execution(format!("{err:#}")))?;
                Ok(match outcome {
                    DeleteOutcome::RemovedFile => format!("Deleted {path}"),
                    DeleteOutcome::RemovedDirectory => format!("Deleted directory {path}"),
                    DeleteOutcome::AlreadyAbsent => format!("{path} was already absent"),
                })
            }
        }
    }

    fn generate_and_write(
        &self,
        text: &PlanText<'_>,
        step: &ExecutionStep,
        path: &str,
        reads: &[ReadContext],
        retry: &RetryContext,
    ) -> Result<String, StepError> {
        let history = retry.format_history();
        let prompt = PromptBuilder::new(self.config.prompt_budget_bytes)
            .write_step(&WriteStepInput {
                request: text.request,
                reasoning: text.reasoning,
                step_id: &step.id,
                path,
                description: &step.description,
                expected_outcome: step.expected_outcome.as_deref(),
                language: Language::from_path(path).label(),
                reads,
                history: &history,
            })
            .map_err(|err| StepError::execution(format!("{err:#}")))?;

        let raw = self.generator.generate(&prompt, self.generator_timeout)?;
        let mut content = strip_code_fence(&raw).to_string();
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }

        let issues = check_content(path, &content);
        if !issues.is_empty() {
            return Err(StepError::with_output(
                format!(
                    "generated content for {path} failed checks: {}",
                    describe_issues(&issues)
                ),
                content,
            ));
        }
        self.write_content(path, &content)
    }

    fn write_content(&self, path: &str, content: &str) -> Result<String, StepError> {
        self.workspace
            .write(path, content.as_bytes())
            .map_err(|err| StepError::execution(format!("{err:#}")))?;
        Ok(format!("Wrote {} bytes to {path}", content.len()))
    }

    fn run_command(&self, command: &str) -> Result<String, StepError> {
        let outcome = self
            .runner
            .run(command, self.workspace.root())
            .map_err(|err| StepError::execution(format!("{err:#}")))?;
        if outcome.success() {
            return Ok(outcome.combined_output());
        }

        let reason = if outcome.timed_out {
            format!("command `{command}` timed out")
        } else {
            match outcome.exit_code {
                Some(code) => format!("command `{command}` exited with status {code}"),
                None => format!("command `{command}` was terminated by a signal"),
            }
        };
        let output = outcome.combined_output();
        Err(StepError::execution(if output.is_empty() {
            reason
        } else {
            format!("{reason}:\n{output}")
        }))
    }

    /// A repaired version of the failed attempt's content, if the repair
    /// passes the same checks a fresh generation would.
    fn auto_correct(
        &self,
        step: &ExecutionStep,
        err: &StepError,
        message: &str,
    ) -> Option<Correction> {
        if step.action != StepAction::Write {
            return None;
        }
        let path = step.path.as_deref()?;
        let output = err.generated_output()?;
        let correction = self.corrector.correct(path, output, message)?;
        let remaining = check_content(path, &correction.content);
        if remaining.is_empty() {
            Some(correction)
        } else {
            debug!(
                step_id = %step.id,
                issues = %describe_issues(&remaining),
                "auto-correction left issues; regenerating"
            );
            None
        }
    }
}

fn required<'a>(value: Option<&'a str>, step: &ExecutionStep) -> Result<&'a str, StepError> {
    value.ok_or_else(|| {
        StepError::Contract(ContractViolation {
            step_id: step.id.clone(),
            reason: format!("{} step has no target", step.action),
        })
    })
}

fn describe_approach(step: &ExecutionStep) -> String {
    match step.action {
        StepAction::Write => format!("generated full content for {}", step.target()),
        action => format!("{action} {}", step.target()),
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
