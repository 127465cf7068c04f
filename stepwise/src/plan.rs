//! Plan data model shared by the planner and the executor.
//!
//! Serialized field names are camelCase so printed plans and results keep the
//! same shape as the generator-facing step format.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};

/// Operation performed by a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    Read,
    Write,
    Run,
    Delete,
}

impl StepAction {
    pub fn as_str(self) -> &'static str {
        match self {
            StepAction::Read => "read",
            StepAction::Write => "write",
            StepAction::Run => "run",
            StepAction::Delete => "delete",
        }
    }

    /// True for actions that operate on a path; `run` carries a command instead.
    pub fn takes_path(self) -> bool {
        !matches!(self, StepAction::Run)
    }

    /// Map a generator-provided action name (or a common synonym) to an action.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let action = match raw.trim().to_ascii_lowercase().as_str() {
            "read" | "view" | "inspect" | "open" | "read_file" => StepAction::Read,
            "write" | "create" | "edit" | "modify" | "update" | "write_file" | "create_file" => {
                StepAction::Write
            }
            "run" | "execute" | "exec" | "command" | "shell" | "run_command" => StepAction::Run,
            "delete" | "remove" | "rm" | "delete_file" => StepAction::Delete,
            _ => return None,
        };
        Some(action)
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One atomic unit of work inside a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    /// Deterministic id (`step_1`, `step_2`, ...) assigned in generation order.
    pub id: String,
    pub action: StepAction,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Advisory only; never checked by the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
}

impl ExecutionStep {
    /// Id for the step at 1-based `position` in generation order.
    pub fn id_for(position: usize) -> String {
        format!("step_{position}")
    }

    /// Path or command the step targets, whichever the action uses.
    pub fn target(&self) -> &str {
        if self.action.takes_path() {
            self.path.as_deref().unwrap_or_default()
        } else {
            self.command.as_deref().unwrap_or_default()
        }
    }
}

/// Lifecycle of a plan. Mutated only by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Ordered, validated output of planning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPlan {
    /// Correlation id (timestamp + random suffix), used for logging only.
    pub task_id: String,
    pub user_request: String,
    pub reasoning: String,
    /// Every step appears after all entries of its `depends_on`, unless
    /// `cycle_detected` is set, in which case this is generation order.
    pub steps: Vec<ExecutionStep>,
    pub generated_at: DateTime<Utc>,
    pub cycle_detected: bool,
    pub status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default)]
    pub results: BTreeMap<String, StepResult>,
}

impl TaskPlan {
    pub fn new(
        user_request: impl Into<String>,
        reasoning: impl Into<String>,
        steps: Vec<ExecutionStep>,
        cycle_detected: bool,
    ) -> Self {
        Self {
            task_id: generate_task_id(),
            user_request: user_request.into(),
            reasoning: reasoning.into(),
            steps,
            generated_at: Utc::now(),
            cycle_detected,
            status: PlanStatus::Pending,
            current_step: None,
            results: BTreeMap::new(),
        }
    }

    pub fn step(&self, id: &str) -> Option<&ExecutionStep> {
        self.steps.iter().find(|step| step.id == id)
    }
}

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    /// Number of attempts made, including the first one.
    pub attempts: u32,
}

/// Outcome of an entire plan run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    /// Steps that reached `success=true` before any terminal failure.
    pub completed_steps: usize,
    pub results: BTreeMap<String, StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    pub cancelled: bool,
    #[serde(rename = "totalDuration")]
    pub total_duration_ms: u64,
}

/// Build a plan id such as `task_20240101_120000_ab12cd`.
pub fn generate_task_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("task_{timestamp}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_loose_accepts_synonyms() {
        assert_eq!(StepAction::parse_loose("Create"), Some(StepAction::Write));
        assert_eq!(StepAction::parse_loose(" execute "), Some(StepAction::Run));
        assert_eq!(StepAction::parse_loose("REMOVE"), Some(StepAction::Delete));
        assert_eq!(StepAction::parse_loose("view"), Some(StepAction::Read));
        assert_eq!(StepAction::parse_loose("think"), None);
    }

    #[test]
    fn task_ids_are_prefixed_and_distinct() {
        let a = generate_task_id();
        let b = generate_task_id();
        assert!(a.starts_with("task_"));
        assert_ne!(a, b);
    }

    #[test]
    fn plan_serializes_with_camel_case_fields() {
        let plan = TaskPlan::new(
            "add a readme",
            "one write",
            vec![ExecutionStep {
                id: ExecutionStep::id_for(1),
                action: StepAction::Write,
                description: "write readme".to_string(),
                path: Some("README.md".to_string()),
                command: None,
                depends_on: Vec::new(),
                expected_outcome: None,
            }],
            false,
        );
        let json = serde_json::to_value(&plan).expect("serialize");
        assert_eq!(json["userRequest"], "add a readme");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["steps"][0]["id"], "step_1");
        assert_eq!(json["steps"][0]["action"], "write");
        assert!(json["steps"][0].get("command").is_none());
    }
}
