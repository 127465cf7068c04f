//! Per-step contract validation.
//!
//! Called after sanitizing, never before. A sanitized-but-still-invalid step
//! (for example a path that was pure punctuation) fails here loudly.

use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ContractViolation;
use crate::plan::{ExecutionStep, StepAction};

/// Generator placeholder for work it could not express as an action.
static MANUAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bmanual(?:ly)?\b").expect("manual regex is valid"));

const FORBIDDEN_PATH_CHARS: &[char] = &['<', '>', '|', '*', '?', '\0'];

/// Validate that a step's fields are consistent with its action.
///
/// - `read`/`write`/`delete` need a non-empty path and no command.
/// - `run` needs a non-empty command and no path.
/// - Description must be non-empty.
/// - Paths must stay inside the workspace (relative, no escaping `..`).
///   Only `read` may name the root itself.
/// - Paths and commands must not contain the "manual" placeholder.
pub fn validate_contract(step: &ExecutionStep) -> Result<(), ContractViolation> {
    let violation = |reason: String| ContractViolation {
        step_id: step.id.clone(),
        reason,
    };

    if step.description.trim().is_empty() {
        return Err(violation("description must be non-empty".to_string()));
    }

    let path = step.path.as_deref().map(str::trim);
    let command = step.command.as_deref().map(str::trim);

    if step.action.takes_path() {
        let Some(path) = path.filter(|p| !p.is_empty()) else {
            return Err(violation(format!("{} step requires a path", step.action)));
        };
        if command.is_some_and(|c| !c.is_empty()) {
            return Err(violation(format!(
                "{} step must not carry a command",
                step.action
            )));
        }
        check_placeholder(path, "path").map_err(&violation)?;
        check_path_shape(path, step.action == StepAction::Read).map_err(&violation)?;
    } else {
        let Some(command) = command.filter(|c| !c.is_empty()) else {
            return Err(violation("run step requires a command".to_string()));
        };
        if path.is_some_and(|p| !p.is_empty()) {
            return Err(violation("run step must not carry a path".to_string()));
        }
        check_placeholder(command, "command").map_err(&violation)?;
    }

    if step.action == StepAction::Write && step.path.as_deref().is_some_and(|p| p.ends_with('/')) {
        return Err(violation("write step path names a directory".to_string()));
    }

    Ok(())
}

fn check_placeholder(value: &str, field: &str) -> Result<(), String> {
    if MANUAL_RE.is_match(value) {
        return Err(format!(
            "{field} '{value}' is a manual placeholder, not an actionable operation"
        ));
    }
    Ok(())
}

/// `allow_root` admits paths naming the workspace root itself (`.`).
fn check_path_shape(path: &str, allow_root: bool) -> Result<(), String> {
    if let Some(ch) = path.chars().find(|c| FORBIDDEN_PATH_CHARS.contains(c)) {
        return Err(format!("path '{path}' contains invalid character '{ch}'"));
    }
    if path.starts_with('/') || path.starts_with('\\') || has_drive_prefix(path) {
        return Err(format!("path '{path}' must be relative to the workspace"));
    }

    let mut depth = 0usize;
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(format!("path '{path}' escapes the workspace"));
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("path '{path}' must be relative to the workspace"));
            }
        }
    }
    if depth == 0 && !allow_root {
        return Err(format!("path '{path}' does not name a workspace entry"));
    }
    Ok(())
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
