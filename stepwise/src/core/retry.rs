//! Bounded per-step retry bookkeeping.
//!
//! A [`RetryContext`] lives for one step execution. It records failed attempts,
//! reports a decaying confidence score for logging, and renders a history
//! section that steers the generator away from approaches that already failed.

use serde::Serialize;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Confidence once `max_retries` attempts have failed.
pub const CONFIDENCE_FLOOR: f64 = 0.3;

const HISTORY_OUTPUT_LIMIT: usize = 1_500;

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub attempt_number: u32,
    pub generated_output: Option<String>,
    pub error: String,
    pub approach_description: String,
}

#[derive(Debug, Clone)]
pub struct RetryContext {
    original_code: Option<String>,
    original_error: Option<String>,
    max_retries: u32,
    attempts: Vec<Attempt>,
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryContext {
    pub fn new(max_retries: u32) -> Self {
        Self {
            original_code: None,
            original_error: None,
            max_retries,
            attempts: Vec::new(),
        }
    }

    pub fn original_code(&self) -> Option<&str> {
        self.original_code.as_deref()
    }

    pub fn original_error(&self) -> Option<&str> {
        self.original_error.as_deref()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn last_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    /// Record a failed attempt and return it.
    pub fn record_attempt(
        &mut self,
        generated_output: Option<&str>,
        error: impl Into<String>,
        approach_description: impl Into<String>,
    ) -> &Attempt {
        let attempt = Attempt {
            attempt_number: self.attempts.len() as u32 + 1,
            generated_output: generated_output.map(str::to_string),
            error: error.into(),
            approach_description: approach_description.into(),
        };
        if self.original_error.is_none() {
            self.original_code = attempt.generated_output.clone();
            self.original_error = Some(attempt.error.clone());
        }
        self.attempts.push(attempt);
        &self.attempts[self.attempts.len() - 1]
    }

    /// True once the first attempt and all `max_retries` retries have failed.
    pub fn is_exhausted(&self) -> bool {
        self.attempts.len() > self.max_retries as usize
    }

    /// Retries still available after the recorded failures.
    pub fn remaining(&self) -> u32 {
        (self.max_retries as usize + 1).saturating_sub(self.attempts.len()) as u32
    }

    /// Starts at 1.0, drops linearly with each failure, and sits at
    /// [`CONFIDENCE_FLOOR`] from the `max_retries`-th failure on.
    ///
    /// Reporting only; it never changes how many retries run.
    pub fn confidence(&self) -> f64 {
        let failed = self.attempts.len();
        if failed == 0 {
            return 1.0;
        }
        let max = self.max_retries as usize;
        if failed >= max {
            return CONFIDENCE_FLOOR;
        }
        1.0 - (1.0 - CONFIDENCE_FLOOR) * failed as f64 / max as f64
    }

    /// History section for a regeneration prompt. Empty when nothing failed.
    pub fn format_history(&self) -> String {
        let mut buf = String::new();
        for attempt in &self.attempts {
            buf.push_str(&format!(
                "Attempt {} failed with: {}\n",
                attempt.attempt_number,
                attempt.error.trim()
            ));
            if !attempt.approach_description.trim().is_empty() {
                buf.push_str(&format!(
                    "Approach: {}\n",
                    attempt.approach_description.trim()
                ));
            }
            buf.push_str("Do not repeat this approach.\n\n");
        }
        if let Some(output) = self
            .last_attempt()
            .and_then(|attempt| attempt.generated_output.as_deref())
            .filter(|output| !output.trim().is_empty())
        {
            buf.push_str("Previous output:\n");
            buf.push_str(truncate_on_char_boundary(output, HISTORY_OUTPUT_LIMIT));
            if output.len() > HISTORY_OUTPUT_LIMIT {
                buf.push_str("\n[truncated]");
            }
            buf.push('\n');
        }
        buf.trim_end().to_string()
    }
}

pub(crate) fn truncate_on_char_boundary(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_three_retries() {
        let ctx = RetryContext::default();
        assert_eq!(ctx.max_retries(), 3);
        assert!(!ctx.is_exhausted());
        assert_eq!(ctx.remaining(), 4);
    }

    #[test]
    fn exhausted_only_after_more_than_max_attempts() {
        let mut ctx = RetryContext::new(2);
        ctx.record_attempt(None, "e1", "first");
        ctx.record_attempt(None, "e2", "second");
        assert!(!ctx.is_exhausted());
        ctx.record_attempt(None, "e3", "third");
        assert!(ctx.is_exhausted());
        assert_eq!(ctx.remaining(), 0);
    }

    #[test]
    fn confidence_is_non_increasing_and_floors_at_max_retries() {
        let mut ctx = RetryContext::new(3);
        let mut previous = ctx.confidence();
        assert_eq!(previous, 1.0);

        for n in 1..=5 {
            ctx.record_attempt(None, format!("error {n}"), "approach");
            let current = ctx.confidence();
            assert!(current <= previous, "confidence rose at attempt {n}");
            if n < 3 {
                assert!(current < previous, "confidence must drop before the floor");
                assert!(current > CONFIDENCE_FLOOR);
            } else {
                assert_eq!(current, CONFIDENCE_FLOOR);
            }
            previous = current;
        }
    }

    #[test]
    fn zero_retries_floors_after_first_failure() {
        let mut ctx = RetryContext::new(0);
        assert_eq!(ctx.confidence(), 1.0);
        ctx.record_attempt(None, "boom", "only");
        assert_eq!(ctx.confidence(), CONFIDENCE_FLOOR);
        assert!(ctx.is_exhausted());
    }

    #[test]
    fn first_attempt_becomes_original() {
        let mut ctx = RetryContext::new(2);
        ctx.record_attempt(Some("code v1"), "missing import", "generate");
        ctx.record_attempt(Some("code v2"), "unbalanced braces", "regenerate");
        assert_eq!(ctx.original_code(), Some("code v1"));
        assert_eq!(ctx.original_error(), Some("missing import"));
        assert_eq!(ctx.last_attempt().map(|a| a.attempt_number), Some(2));
    }

    #[test]
    fn history_names_each_failure_and_last_output() {
        let mut ctx = RetryContext::new(2);
        ctx.record_attempt(Some("old"), "missing import", "generate file");
        ctx.record_attempt(Some("newer"), "unbalanced braces", "regenerate");
        let history = ctx.format_history();
        assert!(history.contains("Attempt 1 failed with: missing import"));
        assert!(history.contains("Attempt 2 failed with: unbalanced braces"));
        assert!(history.contains("Do not repeat this approach."));
        assert!(history.contains("Previous output:\nnewer"));
        assert!(!history.contains("old"));
    }

    #[test]
    fn history_is_empty_without_attempts() {
        assert_eq!(RetryContext::new(1).format_history(), "");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "aé";
        assert_eq!(truncate_on_char_boundary(s, 2), "a");
        assert_eq!(truncate_on_char_boundary(s, 10), "aé");
    }
}
