//! Bracket balance and statement terminator checks.

use crate::core::lang::Language;

use super::imports::is_import_line;

/// Bracket state at the end of a file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(super) struct BracketReport {
    /// Closers needed to balance the file, innermost first.
    pub missing: String,
    /// First closer with no matching opener, with its 1-based line.
    pub unexpected: Option<(char, usize)>,
    pub unterminated_string: bool,
}

impl BracketReport {
    pub fn is_balanced(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_none() && !self.unterminated_string
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    LineComment,
    BlockComment,
    Str { quote: char, triple: bool, raw_hashes: Option<usize> },
    /// Script regex literal; brackets inside a `[...]` class are literal too.
    Regex { in_class: bool },
}

/// Keywords after which `/` starts a regex literal rather than a division.
const REGEX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "of", "new", "delete", "void", "throw",
    "yield", "await", "instanceof",
];

fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn opener_for(close: char) -> char {
    match close {
        ')' => '(',
        ']' => '[',
        _ => '{',
    }
}

/// Scan `content` for unbalanced brackets, skipping strings and comments.
pub(super) fn scan_brackets(language: Language, content: &str) -> BracketReport {
    let chars: Vec<char> = content.chars().collect();
    let mut stack: Vec<char> = Vec::new();
    let mut report = BracketReport::default();
    let mut state = State::Code;
    let mut line = 1usize;
    let mut i = 0usize;

    let slash_comments = matches!(language, Language::Script | Language::Rust);
    let hash_comments = language == Language::Python;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        if c == '\n' {
            line += 1;
        }

        match state {
            State::Code => {
                if slash_comments && c == '/' && next == Some('/') {
                    state = State::LineComment;
                    i += 2;
                    continue;
                }
                if slash_comments && c == '/' && next == Some('*') {
                    state = State::BlockComment;
                    i += 2;
                    continue;
                }
                if hash_comments && c == '#' {
                    state = State::LineComment;
                } else if language == Language::Script && c == '/' && regex_allowed(&chars, i) {
                    state = State::Regex { in_class: false };
                } else if let Some((new_state, skip)) = string_start(language, &chars, i) {
                    state = new_state;
                    i += skip;
                    continue;
                } else if let Some(skip) = rust_char_literal(language, &chars, i) {
                    i += skip;
                    continue;
                } else if matches!(c, '(' | '[' | '{') {
                    stack.push(c);
                } else if matches!(c, ')' | ']' | '}') {
                    if stack.last() == Some(&opener_for(c)) {
                        stack.pop();
                    } else if report.unexpected.is_none() {
                        report.unexpected = Some((c, line));
                    }
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if c == '*' && next == Some('/') {
                    state = State::Code;
                    i += 2;
                    continue;
                }
            }
            State::Regex { in_class } => match c {
                '\\' => {
                    i += 2;
                    continue;
                }
                '[' => state = State::Regex { in_class: true },
                ']' => state = State::Regex { in_class: false },
                '/' if !in_class => state = State::Code,
                // Not a regex after all; regex literals never span lines.
                '\n' => state = State::Code,
                _ => {}
            },
            State::Str {
                quote,
                triple,
                raw_hashes,
            } => {
                if c == '\\' && raw_hashes.is_none() {
                    if next == Some('\n') {
                        line += 1;
                    }
                    i += 2;
                    continue;
                }
                if c == '\n' && !triple && quote != '`' && language == Language::Python {
                    // Python single-quoted strings end at the line.
                    report.unterminated_string = true;
                    state = State::Code;
                } else if c == quote {
                    if triple {
                        if next == Some(quote) && chars.get(i + 2) == Some(&quote) {
                            state = State::Code;
                            i += 3;
                            continue;
                        }
                    } else if let Some(hashes) = raw_hashes {
                        let closing = (1..=hashes).all(|k| chars.get(i + k) == Some(&'#'));
                        if closing {
                            state = State::Code;
                            i += 1 + hashes;
                            continue;
                        }
                    } else {
                        state = State::Code;
                    }
                }
            }
        }
        i += 1;
    }

    if matches!(state, State::Str { .. }) {
        report.unterminated_string = true;
    }
    report.missing = stack.iter().rev().map(|&open| closer_for(open)).collect();
    report
}

/// Recognize the start of a string literal at `i`; returns the new state and
/// how many characters the opening delimiter spans.
fn string_start(language: Language, chars: &[char], i: usize) -> Option<(State, usize)> {
    let c = chars[i];
    match language {
        Language::Script if matches!(c, '"' | '\'' | '`') => Some((
            State::Str {
                quote: c,
                triple: false,
                raw_hashes: None,
            },
            1,
        )),
        Language::Python if matches!(c, '"' | '\'') => {
            let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
            Some((
                State::Str {
                    quote: c,
                    triple,
                    raw_hashes: None,
                },
                if triple { 3 } else { 1 },
            ))
        }
        Language::Rust if c == 'r' && !prev_is_ident(chars, i) => {
            let hashes = chars[i + 1..].iter().take_while(|&&ch| ch == '#').count();
            if chars.get(i + 1 + hashes) == Some(&'"') {
                Some((
                    State::Str {
                        quote: '"',
                        triple: false,
                        raw_hashes: Some(hashes),
                    },
                    2 + hashes,
                ))
            } else {
                None
            }
        }
        Language::Rust | Language::Json if c == '"' => Some((
            State::Str {
                quote: '"',
                triple: false,
                raw_hashes: None,
            },
            1,
        )),
        _ => None,
    }
}

/// Whether a `/` at `i` opens a regex literal: at the start of the input, after
/// an operator or opening punctuation, or after a keyword like `return`.
///
/// JSX closing tags (`</a>`) and self-closing `/>` are not regexes.
fn regex_allowed(chars: &[char], i: usize) -> bool {
    if chars.get(i + 1) == Some(&'>') {
        return false;
    }
    let mut j = i;
    while j > 0 && chars[j - 1].is_whitespace() {
        j -= 1;
    }
    if j == 0 {
        return true;
    }
    let prev = chars[j - 1];
    if prev.is_alphanumeric() || prev == '_' || prev == '$' {
        let start = chars[..j]
            .iter()
            .rposition(|ch| !(ch.is_alphanumeric() || *ch == '_' || *ch == '$'))
            .map_or(0, |p| p + 1);
        let word: String = chars[start..j].iter().collect();
        return REGEX_KEYWORDS.contains(&word.as_str());
    }
    !matches!(prev, ')' | ']' | '"' | '\'' | '`' | '.' | '<')
}

fn prev_is_ident(chars: &[char], i: usize) -> bool {
    i > 0 && (chars[i - 1].is_alphanumeric() || chars[i - 1] == '_')
}

/// Length of a Rust char literal (`'x'`, `'\n'`, `'\u{1F600}'`) at `i`.
/// Lifetimes are not char literals.
fn rust_char_literal(language: Language, chars: &[char], i: usize) -> Option<usize> {
    if language != Language::Rust || chars[i] != '\'' {
        return None;
    }
    if chars.get(i + 1) == Some(&'\\') {
        let close = chars[i + 2..]
            .iter()
            .take(10)
            .position(|&ch| ch == '\'')?;
        return Some(close + 3);
    }
    if chars.get(i + 2) == Some(&'\'') {
        return Some(3);
    }
    None
}

/// Close missing brackets at the end of the file and drop stray trailing closers.
///
/// Returns `None` when the imbalance is not at the end of the content (or a
/// string is unterminated) and a deterministic fix would be a guess.
pub(super) fn repair_brackets(language: Language, content: &str) -> Option<String> {
    let mut current = content.to_string();
    let mut report = scan_brackets(language, &current);
    if report.unterminated_string {
        return None;
    }

    while report.unexpected.is_some() {
        let trimmed = current.trim_end();
        let last = trimmed.chars().next_back()?;
        if !matches!(last, ')' | ']' | '}') {
            return None;
        }
        let cut = trimmed.len() - last.len_utf8();
        let candidate = trimmed[..cut].to_string();
        let next_report = scan_brackets(language, &candidate);
        if next_report.unexpected == report.unexpected {
            return None;
        }
        current = candidate;
        report = next_report;
    }

    if !report.missing.is_empty() {
        let mut out = current.trim_end().to_string();
        out.push('\n');
        out.push_str(&report.missing);
        current = out;
    }

    if content.ends_with('\n') && !current.ends_with('\n') {
        current.push('\n');
    }
    (current != content).then_some(current)
}

/// Lines whose statements need a terminator the file style calls for.
///
/// Rust `use` declarations always end in `;`. Script imports need one when
/// other statements in the file are `;`-terminated.
pub(super) fn missing_terminator_lines(language: Language, lines: &[&str]) -> Vec<usize> {
    let candidates = lines.iter().enumerate().filter(|(_, line)| {
        let t = line.trim_end();
        is_import_line(language, t)
            && !t.ends_with(';')
            && !t.ends_with('{')
            && !t.ends_with(',')
            && (!t.contains('{') || t.contains('}'))
    });

    match language {
        Language::Rust => candidates.map(|(i, _)| i).collect(),
        Language::Script => {
            let uses_semicolons = lines.iter().any(|line| line.trim_end().ends_with(';'));
            if !uses_semicolons {
                return Vec::new();
            }
            candidates.map(|(i, _)| i).collect()
        }
        Language::Python | Language::Json | Language::Other => Vec::new(),
    }
}

pub(super) fn add_terminators(content: &str, indices: &[usize]) -> String {
    let lines: Vec<String> = content
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if indices.contains(&i) {
                format!("{};", line.trim_end())
            } else {
                line.to_string()
            }
        })
        .collect();
    super::imports::rejoin(content, &lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_code_with_brackets_in_strings_and_comments() {
        let ts = "const s = \"({[\";\n// )\n/* ] */\nconst t = `}`;\nfunction f() { return [1, (2)]; }\n";
        assert!(scan_brackets(Language::Script, ts).is_balanced());

        let py = "s = '('\n# )\nd = \"\"\"\n{ unbalanced in docstring\n\"\"\"\nx = [1, 2]\n";
        assert!(scan_brackets(Language::Python, py).is_balanced());

        let rs = "fn f<'a>(s: &'a str) -> char { let c = '{'; let r = r#\"}\"#; '\\n' }\n";
        assert!(scan_brackets(Language::Rust, rs).is_balanced());
    }

    #[test]
    fn brackets_inside_regex_literals_are_ignored() {
        let ts = "export const paren = /\\(/;\nconst word = /[a-z{]+/g;\nfunction f(s) {\n  return /\\[(\\d+)/.test(s) ? s.split(/[,(]/) : [];\n}\n";
        assert!(scan_brackets(Language::Script, ts).is_balanced());
        assert_eq!(repair_brackets(Language::Script, ts), None);
    }

    #[test]
    fn division_and_jsx_are_not_regexes() {
        let ts = "const half = (a + b) / 2 / n;\nconst x = arr[0] / (2);\n";
        assert!(scan_brackets(Language::Script, ts).is_balanced());

        let tsx = "export const A = () => (<p>{x}</p>);\nexport const B = () => (<Img src={s} />);\n";
        assert!(scan_brackets(Language::Script, tsx).is_balanced());

        let report = scan_brackets(Language::Script, "const q = a / (b;\n");
        assert_eq!(report.missing, ")");
    }

    #[test]
    fn reports_missing_closers_innermost_first() {
        let report = scan_brackets(Language::Script, "function f() {\n  call(a, [1, 2\n");
        assert_eq!(report.missing, "])}");
        assert_eq!(report.unexpected, None);
    }

    #[test]
    fn reports_first_unexpected_closer_with_line() {
        let report = scan_brackets(Language::Json, "{\n  \"a\": 1\n}}\n");
        assert_eq!(report.unexpected, Some(('}', 3)));
    }

    #[test]
    fn reports_unterminated_strings() {
        assert!(scan_brackets(Language::Script, "const s = \"abc").unterminated_string);
        assert!(scan_brackets(Language::Python, "s = 'abc\nx = 1\n").unterminated_string);
    }

    #[test]
    fn repair_appends_missing_closers() {
        let fixed = repair_brackets(Language::Script, "function f() {\n  return g(1;\n")
            .expect("repair");
        assert_eq!(fixed, "function f() {\n  return g(1;\n)}\n");

        let fixed = repair_brackets(Language::Json, "{\"a\": [1, 2").expect("repair");
        assert_eq!(fixed, "{\"a\": [1, 2\n]}");
    }

    #[test]
    fn repair_drops_trailing_extra_closers() {
        let fixed = repair_brackets(Language::Script, "function f() {\n}\n}\n").expect("repair");
        assert_eq!(fixed, "function f() {\n}\n");
    }

    #[test]
    fn repair_refuses_mid_file_imbalance() {
        assert_eq!(repair_brackets(Language::Script, "a);\nconst b = 1;\n"), None);
        assert_eq!(repair_brackets(Language::Script, "const s = \"abc"), None);
        assert_eq!(repair_brackets(Language::Script, "const a = (1);\n"), None);
    }

    #[test]
    fn terminators_follow_file_style() {
        let ts = ["import a from 'a'", "const b = 1;"];
        assert_eq!(missing_terminator_lines(Language::Script, &ts), vec![0]);

        let no_semis = ["import a from 'a'", "const b = 1"];
        assert!(missing_terminator_lines(Language::Script, &no_semis).is_empty());

        let rs = ["use std::fmt", "use std::{", "    io,", "};"];
        assert_eq!(missing_terminator_lines(Language::Rust, &rs), vec![0]);

        assert_eq!(
            add_terminators("use std::fmt\nfn main() {}\n", &[0]),
            "use std::fmt;\nfn main() {}\n"
        );
    }
}
