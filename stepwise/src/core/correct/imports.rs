//! Import-line analysis and repairs for generated source files.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::lang::Language;

static SCRIPT_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:import\b[^'"]*?\bfrom\s*|import\s*|export\b[^'"]*?\bfrom\s*)['"]([^'"]+)['"]"#)
        .expect("script import regex is valid")
});

static SCRIPT_REQUIRE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:const|let|var)\b[^=]*=\s*require\(\s*['"]([^'"]+)['"]\s*\)"#)
        .expect("require regex is valid")
});

static PY_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:from\s+(\.*[\w.]*)\s+import\b|import\s+([\w.]+(?:\s+as\s+\w+)?(?:\s*,\s*[\w.]+(?:\s+as\s+\w+)?)*))",
    )
        .expect("python import regex is valid")
});

static RUST_USE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+([^;]+);?\s*$").expect("use regex is valid"));

static ERROR_SYMBOL_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"Cannot find name '(\w+)'",
        r"'(\w+)' is not defined",
        r"name '(\w+)' is not defined",
        r"undefined name '(\w+)'",
        r"cannot find (?:type|struct|value|trait|function|macro) `(\w+)`",
        r"use of undeclared (?:type|crate or module) `(\w+)`",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("error symbol regex is valid"))
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportKind {
    /// `import { sym } from 'module'` / `from module import sym` / `use module::sym;`
    Named,
    /// `import sym from 'module'`
    Default,
    /// `import sym` (Python module import)
    Module,
}

#[derive(Debug, Clone, Copy)]
struct KnownSymbol {
    language: Language,
    symbol: &'static str,
    module: &'static str,
    kind: ImportKind,
}

const fn known(
    language: Language,
    symbol: &'static str,
    module: &'static str,
    kind: ImportKind,
) -> KnownSymbol {
    KnownSymbol {
        language,
        symbol,
        module,
        kind,
    }
}

/// Well-known symbol -> module pairs used for missing-import insertion.
const KNOWN_SYMBOLS: &[KnownSymbol] = &[
    known(Language::Script, "useState", "react", ImportKind::Named),
    known(Language::Script, "useEffect", "react", ImportKind::Named),
    known(Language::Script, "useRef", "react", ImportKind::Named),
    known(Language::Script, "useMemo", "react", ImportKind::Named),
    known(Language::Script, "useCallback", "react", ImportKind::Named),
    known(Language::Script, "useContext", "react", ImportKind::Named),
    known(Language::Script, "useReducer", "react", ImportKind::Named),
    known(Language::Script, "React", "react", ImportKind::Default),
    known(Language::Script, "axios", "axios", ImportKind::Default),
    known(Language::Script, "express", "express", ImportKind::Default),
    known(Language::Python, "os", "os", ImportKind::Module),
    known(Language::Python, "sys", "sys", ImportKind::Module),
    known(Language::Python, "json", "json", ImportKind::Module),
    known(Language::Python, "re", "re", ImportKind::Module),
    known(Language::Python, "math", "math", ImportKind::Module),
    known(Language::Python, "Path", "pathlib", ImportKind::Named),
    known(Language::Python, "dataclass", "dataclasses", ImportKind::Named),
    known(Language::Python, "defaultdict", "collections", ImportKind::Named),
    known(Language::Python, "Optional", "typing", ImportKind::Named),
    known(Language::Python, "List", "typing", ImportKind::Named),
    known(Language::Python, "Dict", "typing", ImportKind::Named),
    known(Language::Python, "Any", "typing", ImportKind::Named),
    known(Language::Rust, "HashMap", "std::collections", ImportKind::Named),
    known(Language::Rust, "HashSet", "std::collections", ImportKind::Named),
    known(Language::Rust, "BTreeMap", "std::collections", ImportKind::Named),
    known(Language::Rust, "Arc", "std::sync", ImportKind::Named),
    known(Language::Rust, "Mutex", "std::sync", ImportKind::Named),
    known(Language::Rust, "PathBuf", "std::path", ImportKind::Named),
    known(Language::Rust, "Duration", "std::time", ImportKind::Named),
    known(Language::Rust, "Instant", "std::time", ImportKind::Named),
];

/// Module specifier of an import line, if the line is one.
pub(super) fn import_module(language: Language, line: &str) -> Option<String> {
    let caps = match language {
        Language::Script => SCRIPT_IMPORT_RE
            .captures(line)
            .or_else(|| SCRIPT_REQUIRE_RE.captures(line))?,
        Language::Python => PY_IMPORT_RE.captures(line)?,
        Language::Rust => RUST_USE_RE.captures(line)?,
        Language::Json | Language::Other => return None,
    };
    caps.iter()
        .skip(1)
        .flatten()
        .next()
        .map(|m| m.as_str().trim().to_string())
}

pub(super) fn is_import_line(language: Language, line: &str) -> bool {
    import_module(language, line).is_some()
}

/// Line indices of imports that pull in the file's own module.
pub(super) fn self_import_lines(language: Language, path: &str, lines: &[&str]) -> Vec<usize> {
    let Some(stem) = Language::module_name(path) else {
        return Vec::new();
    };
    if stem == "__init__" || stem == "index" || stem == "mod" {
        return Vec::new();
    }

    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| {
            import_module(language, line)
                .is_some_and(|module| refers_to_self(language, &module, &stem))
        })
        .map(|(i, _)| i)
        .collect()
}

fn refers_to_self(language: Language, module: &str, stem: &str) -> bool {
    match language {
        Language::Script => {
            if !module.starts_with('.') {
                return false;
            }
            let segment = module.rsplit('/').next().unwrap_or(module);
            let last = segment.split('.').next().unwrap_or(segment);
            !last.is_empty() && last.eq_ignore_ascii_case(stem)
        }
        // `import a, b as c` lists several modules on one line.
        Language::Python => module.split(',').any(|part| python_module_is(part, stem)),
        Language::Rust | Language::Json | Language::Other => false,
    }
}

fn python_module_is(part: &str, stem: &str) -> bool {
    let name = part.split_whitespace().next().unwrap_or_default();
    let trimmed = name.trim_start_matches('.');
    let last = trimmed.rsplit('.').next().unwrap_or(trimmed);
    !last.is_empty() && last.eq_ignore_ascii_case(stem)
}

/// Drop self-import lines. A Python `import a, b` line that also names
/// other modules keeps them. Returns `None` when there was nothing to drop.
pub(super) fn remove_self_imports(language: Language, path: &str, content: &str) -> Option<String> {
    let lines: Vec<&str> = content.lines().collect();
    let self_lines = self_import_lines(language, path, &lines);
    if self_lines.is_empty() {
        return None;
    }
    let stem = Language::module_name(path).unwrap_or_default();

    let kept: Vec<String> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| {
            if !self_lines.contains(&i) {
                return Some(line.to_string());
            }
            if language != Language::Python {
                return None;
            }
            let rest = line.trim_start().strip_prefix("import ")?;
            let others: Vec<&str> = rest
                .split(',')
                .map(str::trim)
                .filter(|part| !python_module_is(part, &stem))
                .collect();
            if others.is_empty() {
                return None;
            }
            let indent = &line[..line.len() - line.trim_start().len()];
            Some(format!("{indent}import {}", others.join(", ")))
        })
        .collect();
    Some(rejoin(content, &kept))
}

/// Line indices of imports identical to an earlier import.
pub(super) fn duplicate_import_lines(language: Language, lines: &[&str]) -> Vec<usize> {
    let mut seen = HashSet::new();
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| is_import_line(language, line))
        .filter(|(_, line)| !seen.insert(normalize_import(line)))
        .map(|(i, _)| i)
        .collect()
}

fn normalize_import(line: &str) -> String {
    line.trim()
        .trim_end_matches(';')
        .replace('"', "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A well-known symbol that is used but never imported or declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct MissingImport {
    pub symbol: String,
    pub module: String,
}

/// Find well-known symbols that are used without an import.
///
/// `error` may name extra symbols (compiler/linter output); they count as used.
pub(super) fn missing_imports(
    language: Language,
    content: &str,
    error: Option<&str>,
) -> Vec<MissingImport> {
    let lines: Vec<&str> = content.lines().collect();
    if has_wildcard_import(language, &lines) {
        return Vec::new();
    }
    let reported = error.map(symbols_from_error).unwrap_or_default();

    KNOWN_SYMBOLS
        .iter()
        .filter(|entry| entry.language == language)
        .filter(|entry| {
            reported.iter().any(|s| s == entry.symbol) || is_used(entry, &lines)
        })
        .filter(|entry| !is_bound(language, entry.symbol, content))
        .map(|entry| MissingImport {
            symbol: entry.symbol.to_string(),
            module: entry.module.to_string(),
        })
        .collect()
}

fn symbols_from_error(error: &str) -> Vec<String> {
    ERROR_SYMBOL_RES
        .iter()
        .flat_map(|re| re.captures_iter(error))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn has_wildcard_import(language: Language, lines: &[&str]) -> bool {
    lines.iter().any(|line| {
        is_import_line(language, line)
            && match language {
                Language::Python => line.trim_end().ends_with("import *"),
                Language::Rust => line.contains("::*"),
                Language::Script | Language::Json | Language::Other => false,
            }
    })
}

fn is_used(entry: &KnownSymbol, lines: &[&str]) -> bool {
    lines
        .iter()
        .filter(|line| !is_import_line(entry.language, line))
        .map(|line| strip_line_comment(entry.language, line))
        .any(|code| line_uses(entry, code))
}

fn strip_line_comment(language: Language, line: &str) -> &str {
    let marker = match language {
        Language::Python => "#",
        _ => "//",
    };
    match line.find(marker) {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn line_uses(entry: &KnownSymbol, code: &str) -> bool {
    let symbol = entry.symbol;
    let mut from = 0;
    while let Some(offset) = code[from..].find(symbol) {
        let start = from + offset;
        let end = start + symbol.len();
        from = end;

        let before = code[..start].chars().next_back();
        if before.is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == ':') {
            continue;
        }
        let after = code[end..].chars().next();
        if after.is_some_and(|c| c.is_alphanumeric() || c == '_') {
            continue;
        }
        if inside_string(entry.language, &code[..start]) {
            continue;
        }

        let decorator = before == Some('@');
        let next = code[end..].trim_start().chars().next();
        let used = match entry.kind {
            ImportKind::Module | ImportKind::Default => {
                matches!(next, Some('.' | '(')) || decorator
            }
            ImportKind::Named => decorator || matches!(next, Some('(' | '[' | '<' | ':' | '.')),
        };
        if used {
            return true;
        }
    }
    false
}

fn inside_string(language: Language, prefix: &str) -> bool {
    let quotes: &[char] = match language {
        Language::Script => &['"', '\'', '`'],
        Language::Python => &['"', '\''],
        _ => &['"'],
    };
    quotes
        .iter()
        .any(|q| prefix.chars().filter(|c| c == q).count() % 2 == 1)
}

fn is_bound(language: Language, symbol: &str, content: &str) -> bool {
    let sym = regex::escape(symbol);
    let patterns: Vec<String> = match language {
        Language::Script => vec![
            format!(r"(?s)\bimport\s[^;]*?\b{sym}\b[^;]*?\bfrom\s"),
            format!(r"\b(?:const|let|var|function|class|interface|type|enum)\s+{sym}\b"),
            format!(r"\b(?:const|let|var)\s*\{{[^}}]*\b{sym}\b[^}}]*\}}\s*="),
        ],
        Language::Python => vec![
            format!(r"(?m)^\s*import\s+[^\n]*\b{sym}\b"),
            format!(r"(?m)^\s*from\s+\S+\s+import\s+(?:\([^)]*\b{sym}\b[^)]*\)|[^\n]*\b{sym}\b)"),
            format!(r"(?m)^\s*(?:def|class)\s+{sym}\b"),
            format!(r"(?m)^\s*{sym}\s*="),
        ],
        Language::Rust => vec![
            format!(r"\buse\s[^;]*\b{sym}\b[^;]*;"),
            format!(r"\b(?:struct|enum|trait|type|fn|mod|let|const|static)\s+(?:mut\s+)?{sym}\b"),
        ],
        Language::Json | Language::Other => return true,
    };
    patterns.iter().any(|pattern| {
        Regex::new(pattern)
            .map(|re| re.is_match(content))
            .unwrap_or(false)
    })
}

/// Insert imports for `missing`, merging into existing imports of the same
/// module where the language allows it.
pub(super) fn insert_imports(language: Language, content: &str, missing: &[MissingImport]) -> String {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

    for item in missing {
        let Some(entry) = KNOWN_SYMBOLS
            .iter()
            .find(|entry| entry.language == language && entry.symbol == item.symbol)
        else {
            continue;
        };
        if merge_into_existing(language, entry, &mut lines) {
            continue;
        }
        let statement = render_import(entry, &lines);
        let at = insertion_index(language, &lines);
        lines.insert(at, statement);
    }

    rejoin(content, &lines)
}

fn merge_into_existing(language: Language, entry: &KnownSymbol, lines: &mut [String]) -> bool {
    if entry.kind != ImportKind::Named {
        return false;
    }
    for line in lines.iter_mut() {
        if import_module(language, line).as_deref() != Some(entry.module) {
            continue;
        }
        match language {
            Language::Script => {
                let (Some(open), Some(close)) = (line.find('{'), line.rfind('}')) else {
                    continue;
                };
                if close < open {
                    continue;
                }
                let inner = line[open + 1..close].trim().trim_end_matches(',').trim();
                let merged = if inner.is_empty() {
                    entry.symbol.to_string()
                } else {
                    format!("{inner}, {}", entry.symbol)
                };
                *line = format!("{}{{ {merged} }}{}", &line[..open], &line[close + 1..]);
                return true;
            }
            Language::Python => {
                if !line.trim_start().starts_with("from ") || line.contains('(') {
                    continue;
                }
                let code = line.trim_end().trim_end_matches(',').to_string();
                *line = format!("{code}, {}", entry.symbol);
                return true;
            }
            Language::Rust | Language::Json | Language::Other => return false,
        }
    }
    false
}

fn render_import(entry: &KnownSymbol, lines: &[String]) -> String {
    match entry.language {
        Language::Script => {
            let script_imports: Vec<&String> = lines
                .iter()
                .filter(|line| is_import_line(Language::Script, line))
                .collect();
            let quote = if script_imports.iter().any(|l| l.contains('"')) {
                '"'
            } else {
                '\''
            };
            let semi = if script_imports.is_empty()
                || script_imports.iter().any(|l| l.trim_end().ends_with(';'))
            {
                ";"
            } else {
                ""
            };
            match entry.kind {
                ImportKind::Default | ImportKind::Module => format!(
                    "import {} from {quote}{}{quote}{semi}",
                    entry.symbol, entry.module
                ),
                ImportKind::Named => format!(
                    "import {{ {} }} from {quote}{}{quote}{semi}",
                    entry.symbol, entry.module
                ),
            }
        }
        Language::Python => match entry.kind {
            ImportKind::Module | ImportKind::Default => format!("import {}", entry.module),
            ImportKind::Named => format!("from {} import {}", entry.module, entry.symbol),
        },
        Language::Rust => format!("use {}::{};", entry.module, entry.symbol),
        Language::Json | Language::Other => String::new(),
    }
}

/// Insert after the last import; otherwise after leading directives,
/// shebangs, module docs, and inner attributes.
fn insertion_index(language: Language, lines: &[String]) -> usize {
    if let Some(last) = lines.iter().rposition(|line| is_import_line(language, line)) {
        return last + 1;
    }
    lines
        .iter()
        .position(|line| {
            let t = line.trim();
            let header = t.starts_with("#!")
                || t.starts_with("//!")
                || t.starts_with("#![")
                || t == "'use client';"
                || t == "\"use client\";"
                || t == "'use strict';"
                || t == "\"use strict\";"
                || (language == Language::Python && t.starts_with('#'));
            !header
        })
        .unwrap_or(lines.len())
}

/// Remove the given line indices.
pub(super) fn remove_lines(content: &str, indices: &[usize]) -> String {
    let drop: HashSet<usize> = indices.iter().copied().collect();
    let kept: Vec<String> = content
        .lines()
        .enumerate()
        .filter(|(i, _)| !drop.contains(i))
        .map(|(_, line)| line.to_string())
        .collect();
    rejoin(content, &kept)
}

/// Join lines, keeping the original trailing newline convention.
pub(super) fn rejoin(original: &str, lines: &[String]) -> String {
    let mut out = lines.join("\n");
    if original.ends_with('\n') && !out.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(content: &str) -> Vec<&str> {
        content.lines().collect()
    }

    #[test]
    fn recognizes_import_lines_per_language() {
        assert_eq!(
            import_module(Language::Script, "import { a } from './utils';").as_deref(),
            Some("./utils")
        );
        assert_eq!(
            import_module(Language::Script, "const x = require(\"lodash\")").as_deref(),
            Some("lodash")
        );
        assert_eq!(
            import_module(Language::Python, "from .helpers import run").as_deref(),
            Some(".helpers")
        );
        assert_eq!(
            import_module(Language::Python, "import os").as_deref(),
            Some("os")
        );
        assert_eq!(
            import_module(Language::Rust, "use std::collections::HashMap;").as_deref(),
            Some("std::collections::HashMap")
        );
        assert!(!is_import_line(Language::Script, "const imported = 1;"));
    }

    #[test]
    fn finds_self_imports_case_insensitively() {
        let content = "import { helper } from './Utils';\nimport x from 'utils';\nexport const a = 1;";
        assert_eq!(
            self_import_lines(Language::Script, "src/utils.ts", &lines(content)),
            vec![0]
        );

        let py = "from helpers import run\nimport helpers\nimport os";
        assert_eq!(
            self_import_lines(Language::Python, "pkg/helpers.py", &lines(py)),
            vec![0, 1]
        );
    }

    #[test]
    fn python_import_lists_are_checked_module_by_module() {
        let py = "import os, helpers as h\nimport json\n";
        assert_eq!(
            self_import_lines(Language::Python, "pkg/helpers.py", &lines(py)),
            vec![0]
        );
        assert_eq!(
            remove_self_imports(Language::Python, "pkg/helpers.py", py).as_deref(),
            Some("import os\nimport json\n")
        );
        assert_eq!(
            remove_self_imports(Language::Python, "pkg/helpers.py", "import helpers\nx = 1\n")
                .as_deref(),
            Some("x = 1\n")
        );
        assert_eq!(remove_self_imports(Language::Python, "pkg/helpers.py", "import os\n"), None);
    }

    #[test]
    fn index_files_are_never_self_imports() {
        let content = "import { a } from './index';";
        assert!(self_import_lines(Language::Script, "src/index.ts", &lines(content)).is_empty());
    }

    #[test]
    fn finds_duplicate_imports() {
        let content = "import os\nimport json\nimport os\nimport  json";
        assert_eq!(duplicate_import_lines(Language::Python, &lines(content)), vec![2, 3]);

        let ts = "import a from 'a';\nimport a from \"a\"\nconst b = 1;";
        assert_eq!(duplicate_import_lines(Language::Script, &lines(ts)), vec![1]);
    }

    #[test]
    fn detects_missing_react_hook() {
        let content = "export function App() {\n  const [n, setN] = useState(0);\n  return n;\n}\n";
        let missing = missing_imports(Language::Script, content, None);
        assert_eq!(
            missing,
            vec![MissingImport {
                symbol: "useState".to_string(),
                module: "react".to_string(),
            }]
        );
    }

    #[test]
    fn imported_or_declared_symbols_are_not_missing() {
        let multi_line = "import {\n  useState,\n} from 'react';\nconst [a] = useState(1);\n";
        assert!(missing_imports(Language::Script, multi_line, None).is_empty());

        let py = "def json(x):\n    return x\n\nprint(json(1))\n";
        assert!(missing_imports(Language::Python, py, None).is_empty());

        let rs = "use std::collections::{HashMap, HashSet};\nfn f() { let m: HashMap<u8, u8> = HashMap::new(); }\n";
        assert!(missing_imports(Language::Rust, rs, None).is_empty());
    }

    #[test]
    fn member_access_and_strings_are_not_usage() {
        let ts = "const a = React2.useState(0);\nconst s = \"useState(\";\nobj.useEffect();\n";
        assert!(missing_imports(Language::Script, ts, None).is_empty());

        let rs = "fn f() { let m = std::collections::HashMap::<u8, u8>::new(); }\n";
        assert!(missing_imports(Language::Rust, rs, None).is_empty());
    }

    #[test]
    fn error_text_reports_symbols() {
        let py = "def load(p):\n    return p\n";
        let missing = missing_imports(
            Language::Python,
            py,
            Some("NameError: name 'json' is not defined"),
        );
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].symbol, "json");
    }

    #[test]
    fn wildcard_imports_disable_missing_checks() {
        let py = "from os.path import *\nfrom typing import *\nx: Optional[int] = None\n";
        assert!(missing_imports(Language::Python, py, None).is_empty());
    }

    #[test]
    fn inserts_after_last_import_and_merges() {
        let ts = "import { useEffect } from 'react';\nimport x from './x';\n\nuseEffect(() => {});\nuseState(1);\n";
        let missing = missing_imports(Language::Script, ts, None);
        let fixed = insert_imports(Language::Script, ts, &missing);
        assert!(fixed.starts_with("import { useEffect, useState } from 'react';\n"));
        assert!(fixed.ends_with('\n'));

        let py = "\"\"\"Tool.\"\"\"\nfrom typing import List\n\ndef f(p: Optional[str]) -> List[str]:\n    return os.listdir(p)\n";
        let missing = missing_imports(Language::Python, py, None);
        let fixed = insert_imports(Language::Python, py, &missing);
        assert!(fixed.contains("from typing import List, Optional\n"));
        assert!(fixed.contains("import os\n"));

        let rs = "//! Crate docs.\nfn main() { let m: HashMap<u8, u8> = HashMap::new(); }\n";
        let missing = missing_imports(Language::Rust, rs, None);
        let fixed = insert_imports(Language::Rust, rs, &missing);
        assert_eq!(
            fixed,
            "//! Crate docs.\nuse std::collections::HashMap;\nfn main() { let m: HashMap<u8, u8> = HashMap::new(); }\n"
        );
    }

    #[test]
    fn remove_lines_keeps_trailing_newline() {
        assert_eq!(remove_lines("a\nb\nc\n", &[1]), "a\nc\n");
        assert_eq!(remove_lines("a\nb", &[0]), "b");
    }
}
