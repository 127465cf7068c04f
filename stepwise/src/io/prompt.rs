//! Prompt rendering for the generator and the plan summary.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds the byte budget, droppable sections are
//! removed in a fixed order and the last section is truncated as a last resort.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::retry::truncate_on_char_boundary;
use crate::plan::TaskPlan;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const WRITE_STEP_TEMPLATE: &str = include_str!("prompts/write_step.md");
const SUMMARY_TEMPLATE: &str = include_str!("prompts/summary.md");

/// Sections dropped first when over budget.
const DROP_ORDER: &[&str] = &["reads", "context", "history"];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex is valid")
});

/// Inputs for the planning prompt.
#[derive(Debug, Clone)]
pub struct PlannerPromptInput<'a> {
    pub request: &'a str,
    pub project_context: Option<&'a str>,
    pub min_steps: usize,
    pub max_steps: usize,
}

/// Content of an earlier `read` step offered to a write prompt.
#[derive(Debug, Clone, Serialize)]
pub struct ReadContext {
    pub path: String,
    pub content: String,
}

/// Inputs for a write-step content prompt.
#[derive(Debug, Clone)]
pub struct WriteStepInput<'a> {
    pub request: &'a str,
    pub reasoning: &'a str,
    pub step_id: &'a str,
    pub path: &'a str,
    pub description: &'a str,
    pub expected_outcome: Option<&'a str>,
    pub language: Option<&'static str>,
    pub reads: &'a [ReadContext],
    /// Formatted retry history; empty on the first attempt.
    pub history: &'a str,
}

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .context("load planner template")?;
        env.add_template("write_step", WRITE_STEP_TEMPLATE)
            .context("load write step template")?;
        env.add_template("summary", SUMMARY_TEMPLATE)
            .context("load summary template")?;
        Ok(Self { env })
    }
}

static ENGINE: LazyLock<Result<PromptEngine, String>> =
    LazyLock::new(|| PromptEngine::new().map_err(|err| format!("{err:#}")));

fn engine() -> Result<&'static PromptEngine> {
    ENGINE
        .as_ref()
        .map_err(|err| anyhow::anyhow!("prompt templates failed to load: {err}"))
}

/// Builds generator prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn planner(&self, input: &PlannerPromptInput<'_>) -> Result<String> {
        let template = engine()?.env.get_template("planner")?;
        let rendered = template
            .render(context! {
                request => input.request.trim(),
                project_context => input.project_context.map(str::trim).filter(|s| !s.is_empty()),
                min_steps => input.min_steps,
                max_steps => input.max_steps,
            })
            .context("render planner prompt")?;
        Ok(self.fit(&rendered))
    }

    pub fn write_step(&self, input: &WriteStepInput<'_>) -> Result<String> {
        let template = engine()?.env.get_template("write_step")?;
        let rendered = template
            .render(context! {
                request => input.request.trim(),
                reasoning => Some(input.reasoning.trim()).filter(|s| !s.is_empty()),
                step_id => input.step_id,
                path => input.path,
                description => input.description.trim(),
                expected_outcome => input.expected_outcome.map(str::trim).filter(|s| !s.is_empty()),
                language => input.language,
                reads => input.reads,
                history => Some(input.history.trim()).filter(|s| !s.is_empty()),
            })
            .context("render write step prompt")?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}

#[derive(Debug, Clone, Serialize)]
struct SummaryStep<'a> {
    action: &'static str,
    target: &'a str,
    description: &'a str,
    depends_on: &'a [String],
    expected_outcome: Option<&'a str>,
}

/// Markdown summary of a plan for the user to review.
pub fn render_plan_summary(plan: &TaskPlan) -> Result<String> {
    let steps: Vec<SummaryStep<'_>> = plan
        .steps
        .iter()
        .map(|step| SummaryStep {
            action: step.action.as_str(),
            target: step.target(),
            description: &step.description,
            depends_on: &step.depends_on,
            expected_outcome: step.expected_outcome.as_deref(),
        })
        .collect();
    let template = engine()?.env.get_template("summary")?;
    let rendered = template
        .render(context! {
            request => plan.user_request.trim(),
            reasoning => plan.reasoning.trim(),
            steps => steps,
            cycle_detected => plan.cycle_detected,
        })
        .context("render plan summary")?;
    Ok(rendered)
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    /// Section content including its header, without the marker.
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let required = kind.as_str() == "required";
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let other_len: usize = sections
        .iter()
        .rev()
        .skip(1)
        .map(|s| s.content.len())
        .sum();
    if let Some(last) = sections.last_mut() {
        let allowed = budget.saturating_sub(other_len);
        if last.content.len() > allowed {
            let before_len = last.content.len();
            let keep = allowed.saturating_sub(12);
            let kept = truncate_on_char_boundary(&last.content, keep).to_string();
            last.content = format!("{kept}\n[truncated]");
            debug!(
                section = last.key,
                before_len,
                after_len = last.content.len(),
                "truncated section for budget"
            );
        }
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ExecutionStep;
    use crate::test_support::{run_step, with_deps, write_step};

    fn planner_input<'a>(context: Option<&'a str>) -> PlannerPromptInput<'a> {
        PlannerPromptInput {
            request: "add a health endpoint",
            project_context: context,
            min_steps: 3,
            max_steps: 10,
        }
    }

    #[test]
    fn planner_prompt_orders_sections_and_embeds_limits() {
        let prompt = PromptBuilder::new(20_000)
            .planner(&planner_input(Some("- package.json: Node package `api`")))
            .expect("render");
        let contract = prompt.find("<contract>").expect("contract");
        let request = prompt.find("<request>").expect("request");
        let context = prompt.find("<context>").expect("context");
        assert!(contract < request && request < context);
        assert!(prompt.contains("3 to 10 step objects"));
        assert!(prompt.contains("add a health endpoint"));
        assert!(!prompt.contains("<!-- section:"));
    }

    #[test]
    fn planner_prompt_omits_missing_context() {
        let prompt = PromptBuilder::new(20_000)
            .planner(&planner_input(None))
            .expect("render");
        assert!(!prompt.contains("<context>"));
    }

    #[test]
    fn budget_drops_context_before_required_sections() {
        let big = "dependency ".repeat(500);
        let prompt = PromptBuilder::new(2_500)
            .planner(&planner_input(Some(&big)))
            .expect("render");
        assert!(!prompt.contains("<context>"));
        assert!(prompt.contains("<contract>"));
        assert!(prompt.contains("<request>"));
    }

    fn write_input<'a>(reads: &'a [ReadContext], history: &'a str) -> WriteStepInput<'a> {
        WriteStepInput {
            request: "add a health endpoint",
            reasoning: "Small route addition.",
            step_id: "step_2",
            path: "src/health.ts",
            description: "Create the health route",
            expected_outcome: Some("GET /health returns ok"),
            language: Some("TypeScript"),
            reads,
            history,
        }
    }

    #[test]
    fn write_prompt_includes_reads_and_history() {
        let reads = vec![ReadContext {
            path: "src/app.ts".to_string(),
            content: "const app = express();".to_string(),
        }];
        let prompt = PromptBuilder::new(20_000)
            .write_step(&write_input(&reads, "Attempt 1 failed with: boom"))
            .expect("render");
        assert!(prompt.contains("`src/health.ts` (TypeScript)"));
        assert!(prompt.contains("Expected outcome: GET /health returns ok"));
        assert!(prompt.contains("#### src/app.ts"));
        assert!(prompt.contains("const app = express();"));
        assert!(prompt.contains("Attempt 1 failed with: boom"));
        let reads_pos = prompt.find("<reads>").expect("reads");
        let history_pos = prompt.find("<history>").expect("history");
        assert!(reads_pos < history_pos);
    }

    #[test]
    fn write_prompt_drops_reads_before_history() {
        let reads = vec![ReadContext {
            path: "big.txt".to_string(),
            content: "x".repeat(5_000),
        }];
        let prompt = PromptBuilder::new(1_500)
            .write_step(&write_input(&reads, "Attempt 1 failed with: boom"))
            .expect("render");
        assert!(!prompt.contains("<reads>"));
        assert!(prompt.contains("<history>"));
        assert!(prompt.contains("<step>"));
    }

    #[test]
    fn over_budget_required_content_is_truncated() {
        let mut sections = vec![
            ParsedSection {
                key: "a".to_string(),
                required: true,
                content: "a".repeat(50),
            },
            ParsedSection {
                key: "b".to_string(),
                required: true,
                content: "b".repeat(200),
            },
        ];
        apply_budget_to_sections(&mut sections, 100);
        assert_eq!(sections[0].content.len(), 50);
        assert!(sections[1].content.ends_with("\n[truncated]"));
        assert!(render_sections(&sections).len() <= 102);
    }

    #[test]
    fn summary_lists_steps_with_targets_and_dependencies() {
        let steps: Vec<ExecutionStep> = vec![
            write_step("step_1", "src/a.ts"),
            with_deps(run_step("step_2", "npm run build"), &["step_1"]),
        ];
        let mut plan = TaskPlan::new("build it", "Write then build.", steps, false);
        plan.steps[0].expected_outcome = Some("file exists".to_string());

        let summary = render_plan_summary(&plan).expect("summary");
        assert!(summary.starts_with("## Plan: build it"));
        assert!(summary.contains("Write then build."));
        assert!(summary.contains("1. **write** `src/a.ts`"));
        assert!(summary.contains("Expected: file exists"));
        assert!(summary.contains("2. **run** `npm run build`"));
        assert!(summary.contains("(after step_1)"));
        assert!(!summary.contains("cycle"));

        plan.cycle_detected = true;
        let summary = render_plan_summary(&plan).expect("summary");
        assert!(summary.contains("Dependency cycle detected"));
    }
}
