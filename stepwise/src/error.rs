//! Error taxonomy for planning and step execution.
//!
//! Planning errors are fatal to the planning call. Step errors are caught per
//! step by the executor and turned into a structured [`crate::plan::ExecutionResult`].

use std::time::Duration;

use thiserror::Error;

/// The text generator could not produce a response.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generator timed out after {0:?}")]
    Timeout(Duration),

    #[error("generator unavailable: {0}")]
    Unavailable(String),

    #[error("generator exited with status {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("generator returned an empty response")]
    Empty,
}

/// Planning failed; no partial plan is returned.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// Malformed or ambiguous generator output. `raw` keeps the response for debugging.
    #[error("could not parse plan: {message}")]
    Parse { message: String, raw: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("could not render prompt: {0}")]
    Prompt(String),
}

impl PlanError {
    pub(crate) fn parse(message: impl Into<String>, raw: &str) -> Self {
        PlanError::Parse {
            message: message.into(),
            raw: raw.to_string(),
        }
    }
}

/// A step is structurally invalid. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("contract violation in {step_id}: {reason}")]
pub struct ContractViolation {
    pub step_id: String,
    pub reason: String,
}

/// Failure of a single step attempt.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Contract(#[from] ContractViolation),

    /// I/O, command, or generation failure. `output` carries generated content,
    /// if any, so it can be repaired before the next attempt.
    #[error("{message}")]
    Execution {
        message: String,
        output: Option<String>,
    },
}

impl StepError {
    pub fn execution(message: impl Into<String>) -> Self {
        StepError::Execution {
            message: message.into(),
            output: None,
        }
    }

    pub fn with_output(message: impl Into<String>, output: impl Into<String>) -> Self {
        StepError::Execution {
            message: message.into(),
            output: Some(output.into()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Execution { .. })
    }

    /// Generated content attached to the failure, if any.
    pub fn generated_output(&self) -> Option<&str> {
        match self {
            StepError::Execution { output, .. } => output.as_deref(),
            StepError::Contract(_) => None,
        }
    }
}

impl From<GenerationError> for StepError {
    fn from(err: GenerationError) -> Self {
        StepError::execution(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violations_are_not_retryable() {
        let err = StepError::from(ContractViolation {
            step_id: "step_1".to_string(),
            reason: "write step requires a path".to_string(),
        });
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "contract violation in step_1: write step requires a path"
        );
    }

    #[test]
    fn generation_timeouts_become_retryable_step_errors() {
        let err = StepError::from(GenerationError::Timeout(Duration::from_secs(3)));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
        assert!(err.generated_output().is_none());
    }
}
