//! Liberal normalization of generator-produced paths and commands.
//!
//! Both transforms are pure and idempotent: each pass only removes characters
//! (or swaps `\` for `/`), and the result is iterated to a fixed point.

use std::sync::LazyLock;

use regex::Regex;

const WRAPPERS: &[char] = &['`', '"', '\'', '*'];
const TRAILING_PUNCT: &[char] = &['.', ',', ';', ':', '!', '?'];

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:/?(?:absolute/)?path/to/(?:(?:your[-_]?)?(?:project|repo|repository|app|workspace)/)?|/?your[-_]?(?:project|repo|repository|app|workspace)/|<[^<>/]+>/)",
    )
    .expect("placeholder regex is valid")
});

static ANNOTATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\([^()]*\)$").expect("annotation regex is valid"));

/// `.`, `./`, `./.`, `.\` and friends: the workspace root.
static ROOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\.(?:[/\\]\.?)*$").expect("root regex is valid"));

static SLASHES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/{2,}").expect("slashes regex is valid"));

/// Strip the artifacts a text generator leaves around file paths.
///
/// Handles surrounding backticks/quotes, trailing ellipses and punctuation,
/// trailing `(new file)`-style annotations, Windows separators, `./` prefixes,
/// and `/path/to/`-style placeholders. Spellings of the workspace root come
/// back as `.`. The result may be empty; emptiness is a validation concern,
/// not a sanitizing one.
pub fn sanitize_path(raw: &str) -> String {
    fixed_point(raw, path_pass)
}

/// Strip wrappers and prompt markers (`$ `) from a generator-produced command.
pub fn sanitize_command(raw: &str) -> String {
    fixed_point(raw, command_pass)
}

fn fixed_point(raw: &str, pass: fn(&str) -> String) -> String {
    let mut current = raw.to_string();
    loop {
        let next = pass(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn path_pass(input: &str) -> String {
    let mut s = input.trim().trim_matches(WRAPPERS).trim();
    if ROOT_RE.is_match(s) {
        return ".".to_string();
    }
    s = strip_ellipsis(s);
    s = s.trim_end_matches(TRAILING_PUNCT).trim_end();

    let s = ANNOTATION_RE.replace(s, "");
    let s = s.replace('\\', "/");
    let s = SLASHES_RE.replace_all(&s, "/");
    let s = PLACEHOLDER_RE.replace(&s, "");

    let mut s = s.as_ref();
    while let Some(rest) = s.strip_prefix("./") {
        s = rest;
    }
    s.trim().to_string()
}

fn command_pass(input: &str) -> String {
    let s = input.trim().trim_matches('`').trim();
    let s = s.strip_prefix("$ ").unwrap_or(s);
    s.trim().to_string()
}

fn strip_ellipsis(mut s: &str) -> &str {
    loop {
        let trimmed = s
            .strip_suffix("...")
            .or_else(|| s.strip_suffix('\u{2026}'))
            .map(str::trim_end);
        match trimmed {
            Some(rest) => s = rest,
            None => return s,
        }
    }
}
