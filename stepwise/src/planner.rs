//! Planning: request -> generator -> extracted steps -> validated, ordered plan.
//!
//! The generator is called exactly once per plan. Its response is untrusted:
//! ids are re-derived from generation order, fields are re-read through a
//! tolerant alias table, every step is sanitized and contract-checked, and
//! dependency references are resolved before ordering. Steps that cannot be
//! made valid are dropped with a warning; a plan with no valid step fails.

use std::collections::HashMap;
use std::time::Duration;

use jsonschema::Draft;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::core::contract::validate_contract;
use crate::core::extract::extract_steps;
use crate::core::graph::{order_steps, prune_unknown_dependencies};
use crate::core::sanitize::sanitize_command;
use crate::error::PlanError;
use crate::io::config::{PlannerConfig, StepwiseConfig};
use crate::io::generator::Generator;
use crate::io::prompt::{PlannerPromptInput, PromptBuilder, render_plan_summary};
use crate::io::workspace::Workspace;
use crate::plan::{ExecutionStep, StepAction, TaskPlan};

const PLAN_STEPS_SCHEMA: &str = include_str!("../schemas/plan_steps.schema.json");

const ACTION_KEYS: &[&str] = &["action", "type", "operation"];
const DESCRIPTION_KEYS: &[&str] = &["description", "desc", "title", "summary"];
const PATH_KEYS: &[&str] = &["path", "file", "filePath", "file_path", "filename"];
const COMMAND_KEYS: &[&str] = &["command", "cmd"];
const DEPENDS_KEYS: &[&str] = &["dependsOn", "depends_on", "dependencies"];
const EXPECTED_KEYS: &[&str] = &["expectedOutcome", "expected_outcome", "expected"];

/// A plan plus its rendered Markdown summary.
#[derive(Debug, Clone)]
pub struct PlannedTask {
    pub plan: TaskPlan,
    pub summary: String,
}

impl PlannedTask {
    /// Discard the plan without executing it.
    pub fn reject(self) {
        info!(task_id = %self.plan.task_id, steps = self.plan.steps.len(), "plan rejected");
    }
}

pub struct Planner<G> {
    generator: G,
    workspace: Workspace,
    config: PlannerConfig,
    generator_timeout: Duration,
    prompt_budget_bytes: usize,
}

impl<G: Generator> Planner<G> {
    /// Step paths are normalized against `workspace`, the same root the
    /// executor later runs in.
    pub fn new(generator: G, workspace: Workspace, config: &StepwiseConfig) -> Self {
        Self {
            generator,
            workspace,
            config: config.planner.clone(),
            generator_timeout: config.generator.timeout(),
            prompt_budget_bytes: config.executor.prompt_budget_bytes,
        }
    }

    /// Turn `request` into a validated, dependency-ordered plan.
    ///
    /// `project_context` is embedded in the prompt as framework and
    /// dependency hints. No partial plan is ever returned.
    #[instrument(skip_all, fields(request_len = request.len(), has_context = project_context.is_some()))]
    pub fn generate_plan(
        &self,
        request: &str,
        project_context: Option<&str>,
    ) -> Result<PlannedTask, PlanError> {
        let request = request.trim();
        if request.is_empty() {
            return Err(PlanError::InvalidRequest("request is empty".to_string()));
        }

        let prompt = PromptBuilder::new(self.prompt_budget_bytes)
            .planner(&PlannerPromptInput {
                request,
                project_context,
                min_steps: self.config.min_steps,
                max_steps: self.config.max_steps,
            })
            .map_err(|err| PlanError::Prompt(format!("{err:#}")))?;

        let raw = self.generator.generate(&prompt, self.generator_timeout)?;
        debug!(response_bytes = raw.len(), "received plan response");

        let plan = parse_plan(request, &raw, &self.config, &self.workspace)?;
        let summary =
            render_plan_summary(&plan).map_err(|err| PlanError::Prompt(format!("{err:#}")))?;
        info!(
            task_id = %plan.task_id,
            steps = plan.steps.len(),
            cycle_detected = plan.cycle_detected,
            "plan generated"
        );
        Ok(PlannedTask { plan, summary })
    }
}

/// Build a plan from a raw generator response.
///
/// Absolute paths under the workspace root are made relative before the
/// contract check; anything else outside the root is dropped with the step.
pub fn parse_plan(
    request: &str,
    raw: &str,
    config: &PlannerConfig,
    workspace: &Workspace,
) -> Result<TaskPlan, PlanError> {
    let extracted = extract_steps(raw).map_err(|err| PlanError::parse(err.to_string(), raw))?;
    validate_schema(&extracted.items).map_err(|message| PlanError::parse(message, raw))?;

    let raw_ids = raw_id_index(&extracted.items);
    let total = extracted.items.len();

    let mut steps = Vec::new();
    for (i, item) in extracted.items.iter().enumerate() {
        let id = ExecutionStep::id_for(i + 1);
        let Some(object) = item.as_object() else {
            continue;
        };
        match build_step(&id, object, &raw_ids, total, workspace) {
            Ok(step) => steps.push(step),
            Err(reason) => warn!(step_id = %id, reason = %reason, "dropping invalid step"),
        }
    }

    if steps.is_empty() {
        return Err(PlanError::parse("response contained no valid steps", raw));
    }
    if steps.len() > config.max_steps {
        warn!(
            steps = steps.len(),
            max_steps = config.max_steps,
            "truncating plan to max_steps"
        );
        steps.truncate(config.max_steps);
    }
    if steps.len() < config.min_steps {
        debug!(steps = steps.len(), min_steps = config.min_steps, "plan is shorter than requested");
    }

    prune_unknown_dependencies(&mut steps);
    renumber(&mut steps);

    let ordered = order_steps(steps);
    let cycle_detected = !ordered.cyclic.is_empty();
    let reasoning = extracted
        .reasoning
        .unwrap_or_else(|| format!("Steps generated for the request: {request}"));

    Ok(TaskPlan::new(request, reasoning, ordered.steps, cycle_detected))
}

fn validate_schema(items: &[Value]) -> Result<(), String> {
    let schema: Value = serde_json::from_str(PLAN_STEPS_SCHEMA)
        .map_err(|err| format!("parse plan schema: {err}"))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| format!("compile plan schema: {err}"))?;
    let instance = Value::Array(items.to_vec());
    let messages: Vec<String> = compiled
        .iter_errors(&instance)
        .map(|err| format!("{} at {}", err, err.instance_path()))
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "schema validation failed:\n- {}",
            messages.join("\n- ")
        ))
    }
}

/// Response-provided ids mapped to provisional `step_N` ids.
fn raw_id_index(items: &[Value]) -> HashMap<String, String> {
    let mut index = HashMap::new();
    for (i, item) in items.iter().enumerate() {
        let raw = match item.get("id") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => continue,
        };
        if raw.is_empty() {
            continue;
        }
        if index
            .insert(raw.clone(), ExecutionStep::id_for(i + 1))
            .is_some()
        {
            warn!(raw_id = %raw, "duplicate id in response; later step wins");
        }
    }
    index
}

fn build_step(
    id: &str,
    object: &Map<String, Value>,
    raw_ids: &HashMap<String, String>,
    total: usize,
    workspace: &Workspace,
) -> Result<ExecutionStep, String> {
    let action_raw =
        first_str(object, ACTION_KEYS).ok_or_else(|| "step has no action".to_string())?;
    let action = StepAction::parse_loose(action_raw)
        .ok_or_else(|| format!("unknown action '{action_raw}'"))?;

    let (path, command) = if action.takes_path() {
        let path = first_str(object, PATH_KEYS).map(|path| workspace.normalize_path(path));
        (path.filter(|p| !p.is_empty()), None)
    } else {
        let command = first_str(object, COMMAND_KEYS).map(sanitize_command);
        (None, command.filter(|c| !c.is_empty()))
    };

    let description = first_str(object, DESCRIPTION_KEYS)
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| {
            let target = path.as_deref().or(command.as_deref()).unwrap_or_default();
            format!("{action} {target}").trim().to_string()
        });

    let depends_on = DEPENDS_KEYS
        .iter()
        .find_map(|key| object.get(*key))
        .map(|value| resolve_dependencies(id, value, raw_ids, total))
        .unwrap_or_default();

    let expected_outcome = first_str(object, EXPECTED_KEYS)
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());

    let step = ExecutionStep {
        id: id.to_string(),
        action,
        description,
        path,
        command,
        depends_on,
        expected_outcome,
    };
    validate_contract(&step).map_err(|violation| violation.reason)?;
    Ok(step)
}

fn first_str<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

/// Resolve references to provisional ids. Unresolvable references are kept
/// verbatim so they are pruned (and reported) with the other unknown ids.
fn resolve_dependencies(
    id: &str,
    value: &Value,
    raw_ids: &HashMap<String, String>,
    total: usize,
) -> Vec<String> {
    let references: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(reference_text).collect(),
        other => reference_text(other).into_iter().collect(),
    };

    let mut resolved: Vec<String> = Vec::new();
    for reference in references {
        let target = raw_ids
            .get(&reference)
            .cloned()
            .or_else(|| position_reference(&reference, total).map(ExecutionStep::id_for))
            .unwrap_or(reference);
        if target == id {
            warn!(step_id = %id, "dropping self dependency");
            continue;
        }
        if !resolved.contains(&target) {
            resolved.push(target);
        }
    }
    resolved
}

fn reference_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `3`, `step_3`, `step-3`, `Step 3` -> 3 when within the plan.
fn position_reference(reference: &str, total: usize) -> Option<usize> {
    let lower = reference.to_ascii_lowercase();
    let digits = lower
        .strip_prefix("step")
        .map(|rest| rest.trim_start_matches(['_', '-', ' ']))
        .unwrap_or(lower.as_str());
    let position: usize = digits.parse().ok()?;
    (1..=total).contains(&position).then_some(position)
}

/// Reassign `step_1..step_n` over the surviving steps, rewriting references.
fn renumber(steps: &mut [ExecutionStep]) {
    let mapping: HashMap<String, String> = steps
        .iter()
        .enumerate()
        .map(|(i, step)| (step.id.clone(), ExecutionStep::id_for(i + 1)))
        .collect();
    for step in steps.iter_mut() {
        if let Some(new_id) = mapping.get(&step.id) {
            step.id = new_id.clone();
        }
        for dep in &mut step.depends_on {
            if let Some(new_id) = mapping.get(dep.as_str()) {
                *dep = new_id.clone();
            }
        }
    }
}
