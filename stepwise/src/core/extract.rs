//! Normalization of raw generator responses into a list of step objects.
//!
//! The response is untrusted text. Extraction strips prose, unwraps a single
//! fenced code block, and locates the one array of objects in what remains.
//! Two or more candidate arrays are ambiguous and rejected.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

const REASONING_LIMIT: usize = 500;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").expect("fence regex is valid")
});

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[\]}])").expect("trailing comma regex is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("response is empty")]
    Empty,
    #[error("no JSON array of step objects found in response")]
    NoArray,
    #[error("response contains {0} candidate step arrays; refusing to guess")]
    Ambiguous(usize),
}

/// Raw step objects plus any rationale found around them.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSteps {
    pub items: Vec<Value>,
    pub reasoning: Option<String>,
}

/// Extract the step array from a generator response.
///
/// Accepts a bare array, an object with a `steps` array (and optional
/// `reasoning`), or either of those wrapped in prose and/or one fenced block.
pub fn extract_steps(raw: &str) -> Result<ExtractedSteps, ExtractError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::Empty);
    }

    let (body, outside) = unwrap_single_fence(trimmed);

    if let Some(found) = from_whole_document(body) {
        let reasoning = found.reasoning.or_else(|| prose_reasoning(&outside));
        return Ok(ExtractedSteps {
            items: found.items,
            reasoning,
        });
    }

    let found = match scan_for_step_array(body) {
        Err(ExtractError::NoArray) => {
            let repaired = TRAILING_COMMA_RE.replace_all(body, "$1");
            scan_for_step_array(&repaired)?
        }
        other => other?,
    };
    let prose = format!("{outside}\n{}", found.outside);
    Ok(ExtractedSteps {
        items: found.items,
        reasoning: prose_reasoning(&prose),
    })
}

/// Body of a response that is nothing but one fenced code block.
///
/// Anything else (prose around the fence, several fences, no fence) comes
/// back unchanged, so documents that merely contain a code block survive.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !(trimmed.starts_with("```") && trimmed.ends_with("```")) {
        return text;
    }
    match unwrap_single_fence(trimmed) {
        (body, outside) if outside.trim().is_empty() => body,
        _ => text,
    }
}

/// Strip the outermost fence when exactly one fenced block is present.
///
/// Returns the block body and the prose around it.
fn unwrap_single_fence(text: &str) -> (&str, String) {
    let mut matches = FENCE_RE.captures_iter(text);
    let (Some(only), None) = (matches.next(), matches.next()) else {
        return (text, String::new());
    };
    let whole = only.get(0).map_or(0..0, |m| m.range());
    let body = only.get(1).map_or("", |m| m.as_str()).trim();
    let outside = format!("{}\n{}", &text[..whole.start], &text[whole.end..]);
    (body, outside)
}

fn from_whole_document(text: &str) -> Option<ExtractedSteps> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Array(items) if is_step_array(&items) => Some(ExtractedSteps {
            items,
            reasoning: None,
        }),
        Value::Object(mut map) => {
            let items = ["steps", "plan", "tasks"]
                .iter()
                .find_map(|key| match map.remove(*key) {
                    Some(Value::Array(items)) if is_step_array(&items) => Some(items),
                    _ => None,
                })?;
            let reasoning = ["reasoning", "rationale", "explanation", "summary"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(clean_reasoning)
                .filter(|r| !r.is_empty());
            Some(ExtractedSteps { items, reasoning })
        }
        _ => None,
    }
}

struct ScanHit {
    items: Vec<Value>,
    outside: String,
}

fn scan_for_step_array(text: &str) -> Result<ScanHit, ExtractError> {
    let mut hits: Vec<(usize, usize, Vec<Value>)> = Vec::new();
    let mut pos = 0;

    while let Some(offset) = text[pos..].find('[') {
        let start = pos + offset;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Array(items))) => {
                let end = start + stream.byte_offset();
                if is_step_array(&items) {
                    hits.push((start, end, items));
                }
                pos = end;
            }
            _ => pos = start + 1,
        }
    }

    match hits.len() {
        0 => Err(ExtractError::NoArray),
        1 => {
            let (start, end, items) = hits.remove(0);
            Ok(ScanHit {
                items,
                outside: format!("{}\n{}", &text[..start], &text[end..]),
            })
        }
        n => Err(ExtractError::Ambiguous(n)),
    }
}

/// A plausible step array is non-empty and holds only objects.
fn is_step_array(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(Value::is_object)
}

fn prose_reasoning(prose: &str) -> Option<String> {
    let cleaned = clean_reasoning(&prose.replace("```", " "));
    (!cleaned.is_empty()).then_some(cleaned)
}

fn clean_reasoning(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let collapsed = collapsed.trim_end_matches(':').trim();
    if collapsed.chars().count() <= REASONING_LIMIT {
        return collapsed.to_string();
    }
    let mut cut: String = collapsed.chars().take(REASONING_LIMIT).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actions(found: &ExtractedSteps) -> Vec<&str> {
        found
            .items
            .iter()
            .map(|item| item["action"].as_str().unwrap_or_default())
            .collect()
    }

    #[test]
    fn strip_code_fence_only_unwraps_whole_fences() {
        assert_eq!(strip_code_fence("```ts\nexport const a = 1;\n```"), "export const a = 1;");
        let doc = "# Title\n\n```sh\nmake\n```\n";
        assert_eq!(strip_code_fence(doc), doc);
        assert_eq!(strip_code_fence("plain text"), "plain text");
    }

    #[test]
    fn bare_array_is_accepted() {
        let found = extract_steps(r#"[{"action":"read","path":"a"}]"#).expect("extract");
        assert_eq!(actions(&found), vec!["read"]);
        assert_eq!(found.reasoning, None);
    }

    #[test]
    fn fenced_array_is_unwrapped() {
        let raw = "```json\n[{\"action\":\"write\",\"path\":\"x.ts...\",\"description\":\"d\"}]\n```";
        let found = extract_steps(raw).expect("extract");
        assert_eq!(actions(&found), vec!["write"]);
        assert_eq!(found.items[0]["path"], "x.ts...");
    }

    #[test]
    fn prose_around_fence_becomes_reasoning() {
        let raw = "I will read the config first.\n```json\n[{\"action\":\"read\",\"path\":\"c.json\"}]\n```\nThen done.";
        let found = extract_steps(raw).expect("extract");
        assert_eq!(
            found.reasoning.as_deref(),
            Some("I will read the config first. Then done.")
        );
    }

    #[test]
    fn array_inside_prose_is_located() {
        let raw = "Plan:\n[{\"action\":\"run\",\"command\":\"ls\"}]\nThat is all.";
        let found = extract_steps(raw).expect("extract");
        assert_eq!(actions(&found), vec!["run"]);
        assert_eq!(found.reasoning.as_deref(), Some("Plan: That is all."));
    }

    #[test]
    fn object_with_steps_and_reasoning() {
        let raw = r#"{"reasoning":"Small change.","steps":[{"action":"delete","path":"old.txt"}]}"#;
        let found = extract_steps(raw).expect("extract");
        assert_eq!(actions(&found), vec!["delete"]);
        assert_eq!(found.reasoning.as_deref(), Some("Small change."));
    }

    #[test]
    fn two_candidate_arrays_are_ambiguous() {
        let raw = "Option A: [{\"action\":\"read\",\"path\":\"a\"}]\nOption B: [{\"action\":\"read\",\"path\":\"b\"}]";
        assert_eq!(extract_steps(raw), Err(ExtractError::Ambiguous(2)));
    }

    #[test]
    fn non_object_arrays_are_ignored() {
        let raw = "See [1] and [\"x\"]. Steps: [{\"action\":\"read\",\"path\":\"a\",\"dependsOn\":[\"step_0\"]}]";
        let found = extract_steps(raw).expect("extract");
        assert_eq!(found.items.len(), 1);
    }

    #[test]
    fn markdown_links_do_not_confuse_the_scan() {
        let raw = "Per [the docs](https://example.com):\n[{\"action\":\"read\",\"path\":\"a\"}]";
        assert_eq!(extract_steps(raw).expect("extract").items.len(), 1);
    }

    #[test]
    fn trailing_commas_are_repaired() {
        let raw = "[{\"action\":\"read\",\"path\":\"a\",},]";
        let found = extract_steps(raw).expect("extract");
        assert_eq!(actions(&found), vec!["read"]);
    }

    #[test]
    fn missing_array_is_an_error() {
        assert_eq!(
            extract_steps("I cannot help with that."),
            Err(ExtractError::NoArray)
        );
        assert_eq!(extract_steps("[]"), Err(ExtractError::NoArray));
        assert_eq!(extract_steps("   "), Err(ExtractError::Empty));
    }

    #[test]
    fn multiple_fences_are_scanned_as_text() {
        let raw = "```bash\nls\n```\n```json\n[{\"action\":\"run\",\"command\":\"ls\"}]\n```";
        let found = extract_steps(raw).expect("extract");
        assert_eq!(actions(&found), vec!["run"]);
    }
}
