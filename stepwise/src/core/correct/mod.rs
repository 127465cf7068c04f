//! Deterministic repair of generated file content.
//!
//! [`check_content`] finds problems that would make a written file unusable.
//! [`AutoCorrector::correct`] tries the cheap, rule-based fixes in a fixed
//! priority order before the executor pays for another generation:
//!
//! 1. remove imports of the file's own module
//! 2. insert missing imports of well-known symbols
//! 3. remove duplicate imports
//! 4. structural repair (brackets, terminators, JSON trailing commas)

mod imports;
mod structure;

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::core::lang::Language;

static JSON_TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[\]}])").expect("trailing comma regex is valid"));

/// A problem found in generated content. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    Empty,
    SelfImport { line: usize, module: String },
    DuplicateImport { line: usize },
    MissingImport { symbol: String, module: String },
    UnbalancedBrackets { missing: String },
    UnexpectedCloser { closer: char, line: usize },
    UnterminatedString,
    MissingTerminator { line: usize },
    InvalidJson(String),
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::Empty => write!(f, "content is empty"),
            Issue::SelfImport { line, module } => {
                write!(f, "line {line} imports the file's own module '{module}'")
            }
            Issue::DuplicateImport { line } => write!(f, "line {line} repeats an earlier import"),
            Issue::MissingImport { symbol, module } => {
                write!(f, "'{symbol}' is used but not imported from '{module}'")
            }
            Issue::UnbalancedBrackets { missing } => {
                write!(f, "unbalanced brackets; missing '{missing}' at end of file")
            }
            Issue::UnexpectedCloser { closer, line } => {
                write!(f, "unexpected '{closer}' on line {line}")
            }
            Issue::UnterminatedString => write!(f, "unterminated string literal"),
            Issue::MissingTerminator { line } => write!(f, "line {line} is missing ';'"),
            Issue::InvalidJson(message) => write!(f, "invalid JSON: {message}"),
        }
    }
}

/// Check generated content for `path`. An empty result means the content is
/// acceptable to write.
pub fn check_content(path: &str, content: &str) -> Vec<Issue> {
    if content.trim().is_empty() {
        return vec![Issue::Empty];
    }
    let language = Language::from_path(path);
    let lines: Vec<&str> = content.lines().collect();
    let mut issues = Vec::new();

    for line in imports::self_import_lines(language, path, &lines) {
        issues.push(Issue::SelfImport {
            line: line + 1,
            module: imports::import_module(language, lines[line]).unwrap_or_default(),
        });
    }
    for line in imports::duplicate_import_lines(language, &lines) {
        issues.push(Issue::DuplicateImport { line: line + 1 });
    }
    for missing in imports::missing_imports(language, content, None) {
        issues.push(Issue::MissingImport {
            symbol: missing.symbol,
            module: missing.module,
        });
    }

    if language == Language::Json {
        if let Err(err) = serde_json::from_str::<serde_json::Value>(content) {
            issues.push(Issue::InvalidJson(err.to_string()));
        }
    } else if language.checks_brackets() {
        let report = structure::scan_brackets(language, content);
        if report.unterminated_string {
            issues.push(Issue::UnterminatedString);
        }
        if let Some((closer, line)) = report.unexpected {
            issues.push(Issue::UnexpectedCloser { closer, line });
        }
        if !report.missing.is_empty() {
            issues.push(Issue::UnbalancedBrackets {
                missing: report.missing,
            });
        }
    }

    for line in structure::missing_terminator_lines(language, &lines) {
        issues.push(Issue::MissingTerminator { line: line + 1 });
    }
    issues
}

/// One-line summary of `issues`, used as a step error message.
pub fn describe_issues(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    RemovedSelfImport,
    InsertedMissingImport,
    RemovedDuplicateImport,
    RemovedTrailingCommas,
    BalancedBrackets,
    AddedTerminators,
}

impl Repair {
    pub fn as_str(self) -> &'static str {
        match self {
            Repair::RemovedSelfImport => "removed self-import",
            Repair::InsertedMissingImport => "inserted missing import",
            Repair::RemovedDuplicateImport => "removed duplicate import",
            Repair::RemovedTrailingCommas => "removed trailing commas",
            Repair::BalancedBrackets => "balanced brackets",
            Repair::AddedTerminators => "added missing terminators",
        }
    }
}

impl fmt::Display for Repair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content after one or more repairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub content: String,
    pub repairs: Vec<Repair>,
}

impl Correction {
    pub fn describe(&self) -> String {
        self.repairs
            .iter()
            .map(|repair| repair.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AutoCorrector;

impl AutoCorrector {
    pub fn new() -> Self {
        Self
    }

    /// Apply the rule-based repairs to `content`.
    ///
    /// `error` is the failure message of the attempt that produced `content`;
    /// symbols it names count as used. Returns `None` when no rule changed
    /// anything.
    pub fn correct(&self, path: &str, content: &str, error: &str) -> Option<Correction> {
        if content.trim().is_empty() {
            return None;
        }
        let language = Language::from_path(path);
        let mut current = content.to_string();
        let mut repairs = Vec::new();

        if let Some(updated) = imports::remove_self_imports(language, path, &current) {
            current = updated;
            repairs.push(Repair::RemovedSelfImport);
        }

        let missing = imports::missing_imports(language, &current, Some(error));
        if !missing.is_empty() {
            let updated = imports::insert_imports(language, &current, &missing);
            if updated != current {
                current = updated;
                repairs.push(Repair::InsertedMissingImport);
            }
        }

        let duplicate_lines = {
            let lines: Vec<&str> = current.lines().collect();
            imports::duplicate_import_lines(language, &lines)
        };
        if !duplicate_lines.is_empty() {
            current = imports::remove_lines(&current, &duplicate_lines);
            repairs.push(Repair::RemovedDuplicateImport);
        }

        if language == Language::Json
            && serde_json::from_str::<serde_json::Value>(&current).is_err()
        {
            let updated = JSON_TRAILING_COMMA_RE.replace_all(&current, "$1").into_owned();
            if updated != current {
                current = updated;
                repairs.push(Repair::RemovedTrailingCommas);
            }
        }

        if language.checks_brackets() {
            if let Some(updated) = structure::repair_brackets(language, &current) {
                current = updated;
                repairs.push(Repair::BalancedBrackets);
            }
        }

        let terminator_lines = {
            let lines: Vec<&str> = current.lines().collect();
            structure::missing_terminator_lines(language, &lines)
        };
        if !terminator_lines.is_empty() {
            current = structure::add_terminators(&current, &terminator_lines);
            repairs.push(Repair::AddedTerminators);
        }

        if repairs.is_empty() {
            return None;
        }
        debug!(path, repairs = ?repairs, "auto-corrected generated content");
        Some(Correction {
            content: current,
            repairs,
        })
    }
}
