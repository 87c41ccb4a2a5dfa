//! Intelligent text replacement.
//!
//! An ordered cascade of match strategies applied to line-ending-normalized
//! content, stopping at the first that yields a usable result:
//!
//! 1. Exact whole-content match (high confidence)
//! 2. Line-aware match with trimmed comparison and re-indentation (medium)
//! 3. Multiline substring fallback (medium)
//! 4. Flexible whitespace-tolerant pattern (low)
//!
//! The cascade order is the tie-break: an earlier strategy that produces a
//! result shadows everything after it. Persistence is the caller's job.

use std::borrow::Cow;

use regex::Regex;
use serde::Serialize;

use crate::error::{EngineError, Result};

/// Largest file the edit engine will touch (10 MiB).
pub const MAX_EDIT_BYTES: u64 = 10 * 1024 * 1024;

/// How certain the applied match was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
    None,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::None => "none",
        }
    }
}

/// Outcome of a successful edit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditResult {
    /// Full replacement buffer.
    pub content: String,
    pub replacements: usize,
    pub confidence: Confidence,
    pub lines_affected: usize,
}

/// The ordered strategy list. Tried in sequence; first usable result wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Exact,
    LineAware,
    MultilineSubstring,
    FlexiblePattern,
}

const STRATEGIES: [Strategy; 4] = [
    Strategy::Exact,
    Strategy::LineAware,
    Strategy::MultilineSubstring,
    Strategy::FlexiblePattern,
];

impl Strategy {
    fn apply(self, content: &str, old: &str, new: &str) -> Option<EditResult> {
        match self {
            Self::Exact => exact(content, old, new),
            Self::LineAware => line_aware(content, old, new),
            Self::MultilineSubstring => multiline_substring(content, old, new),
            Self::FlexiblePattern => flexible_pattern(content, old, new),
        }
    }
}

/// Applies the replacement cascade to `content`.
///
/// Fails with `NoMatch` when no strategy finds anything to change; the
/// input is never modified in that case.
pub fn apply(content: &str, old_text: &str, new_text: &str) -> Result<EditResult> {
    if old_text.is_empty() {
        return Err(EngineError::NoMatch);
    }

    let content = normalize_line_endings(content);
    let old = normalize_line_endings(old_text);

    for strategy in STRATEGIES {
        if let Some(result) = strategy.apply(&content, &old, new_text) {
            log::debug!(
                "edit matched via {:?} ({} replacement(s), confidence {})",
                strategy,
                result.replacements,
                result.confidence.as_str()
            );
            return Ok(result);
        }
    }

    Err(EngineError::NoMatch)
}

fn normalize_line_endings(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Tier 1: the literal old text occurs somewhere in the content. Every
/// non-overlapping occurrence is replaced.
fn exact(content: &str, old: &str, new: &str) -> Option<EditResult> {
    if !content.contains(old) {
        return None;
    }
    let replacements = content.matches(old).count();
    let lines_affected = if old.contains('\n') {
        replacements * (old.matches('\n').count() + 1)
    } else {
        content.lines().filter(|line| line.contains(old)).count()
    };
    Some(EditResult {
        content: content.replace(old, new),
        replacements,
        confidence: Confidence::High,
        lines_affected,
    })
}

/// Tier 2: per-line matching. A line matches when it contains the old text
/// verbatim, when its trimmed form equals the trimmed old text (the
/// replacement is re-indented with the line's leading whitespace), or when
/// its trimmed form contains the trimmed old text.
fn line_aware(content: &str, old: &str, new: &str) -> Option<EditResult> {
    let trimmed_old = old.trim();
    let mut out: Vec<String> = Vec::with_capacity(content.lines().count());
    let mut replacements = 0usize;
    let mut affected = 0usize;

    for line in content.lines() {
        if line.contains(old) {
            replacements += line.matches(old).count();
            affected += 1;
            out.push(line.replace(old, new));
        } else if !trimmed_old.is_empty() && line.trim() == trimmed_old {
            let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
            replacements += 1;
            affected += 1;
            out.push(format!("{indent}{new}"));
        } else if !trimmed_old.is_empty() && line.trim().contains(trimmed_old) {
            replacements += line.matches(trimmed_old).count();
            affected += 1;
            out.push(line.replace(trimmed_old, new));
        } else {
            out.push(line.to_string());
        }
    }

    if replacements == 0 {
        return None;
    }

    let mut result = out.join("\n");
    if content.ends_with('\n') {
        result.push('\n');
    }
    Some(EditResult {
        content: result,
        replacements,
        confidence: Confidence::Medium,
        lines_affected: affected,
    })
}

/// Tier 3: the (possibly multi-line) old text is a substring of the whole
/// content even though no single line matched. Replaced once.
fn multiline_substring(content: &str, old: &str, new: &str) -> Option<EditResult> {
    if !content.contains(old) {
        return None;
    }
    Some(EditResult {
        content: content.replacen(old, new, 1),
        replacements: 1,
        confidence: Confidence::Medium,
        lines_affected: old.matches('\n').count() + 1,
    })
}

/// Tier 4: a whitespace-tolerant pattern built from the old text. Literal
/// spaces match any run of whitespace, literal newlines tolerate
/// surrounding indentation. The first match is replaced.
fn flexible_pattern(content: &str, old: &str, new: &str) -> Option<EditResult> {
    let pattern = build_flexible_pattern(old);
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(error) => {
            log::debug!("flexible pattern did not compile: {error}");
            return None;
        }
    };

    let matched = re.find(content)?;
    let lines_affected = content[matched.start()..matched.end()]
        .matches('\n')
        .count()
        + 1;

    let matched_len = matched.end() - matched.start();
    let mut result = String::with_capacity(content.len() - matched_len + new.len());
    result.push_str(&content[..matched.start()]);
    result.push_str(new);
    result.push_str(&content[matched.end()..]);

    Some(EditResult {
        content: result,
        replacements: 1,
        confidence: Confidence::Low,
        lines_affected,
    })
}

fn build_flexible_pattern(old: &str) -> String {
    let mut pattern = String::with_capacity(old.len() * 2);
    let mut buf = [0u8; 4];
    for ch in old.chars() {
        match ch {
            ' ' => pattern.push_str(r"\s+"),
            '\n' => pattern.push_str(r"\s*\n\s*"),
            other => pattern.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_replaces_every_occurrence() {
        let result = apply("foo foo baz", "foo", "bar").unwrap();
        assert_eq!(result.content, "bar bar baz");
        assert_eq!(result.replacements, 2);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.lines_affected, 1);
    }

    #[test]
    fn exact_counts_affected_lines() {
        let result = apply("foo\nbar\nfoo baz\n", "foo", "qux").unwrap();
        assert_eq!(result.content, "qux\nbar\nqux baz\n");
        assert_eq!(result.replacements, 2);
        assert_eq!(result.lines_affected, 2);
    }

    #[test]
    fn exact_is_non_overlapping() {
        let result = apply("aaaa", "aa", "b").unwrap();
        assert_eq!(result.replacements, 2);
        assert_eq!(result.content, "bb");
    }

    #[test]
    fn exact_handles_multiline_old_text() {
        let result = apply("one\ntwo\nthree\n", "one\ntwo", "uno\ndos").unwrap();
        assert_eq!(result.content, "uno\ndos\nthree\n");
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.lines_affected, 2);
    }

    #[test]
    fn crlf_content_is_normalized_before_matching() {
        let result = apply("foo\r\nbar\r\n", "foo\nbar", "x").unwrap();
        assert_eq!(result.content, "x\n");
    }

    #[test]
    fn no_match_fails_and_changes_nothing() {
        assert!(matches!(
            apply("foo foo baz", "zzz", "yyy"),
            Err(EngineError::NoMatch)
        ));
    }

    #[test]
    fn empty_old_text_is_no_match() {
        assert!(matches!(apply("abc", "", "x"), Err(EngineError::NoMatch)));
    }

    #[test]
    fn line_aware_reindents_trimmed_equality() {
        // The old text carries different surrounding whitespace than the
        // file, so the exact tier misses and the line tier re-indents.
        let content = "\tlet x = 1;\nother\n";
        let result = apply(content, "  let x = 1;  ", "let x = 2;").unwrap();
        assert_eq!(result.content, "\tlet x = 2;\nother\n");
        assert_eq!(result.replacements, 1);
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(result.lines_affected, 1);
    }

    #[test]
    fn line_aware_trimmed_containment() {
        let content = "let value = 1;\n";
        let result = apply(content, "value = 1 ", "value = 2").unwrap();
        assert_eq!(result.content, "let value = 2;\n");
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[test]
    fn line_aware_preserves_missing_trailing_newline() {
        let result = apply("\tstop", " stop ", "go").unwrap();
        assert_eq!(result.content, "\tgo");
    }

    #[test]
    fn multiline_substring_replaces_once() {
        let result = multiline_substring("a\nb\nc\n", "a\nb", "X").unwrap();
        assert_eq!(result.content, "X\nc\n");
        assert_eq!(result.replacements, 1);
        assert_eq!(result.lines_affected, 2);
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[test]
    fn flexible_pattern_tolerates_whitespace_runs() {
        let result = apply("foo   bar baz", "foo bar", "qux").unwrap();
        assert_eq!(result.content, "qux baz");
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.replacements, 1);
    }

    #[test]
    fn flexible_pattern_tolerates_indented_newlines() {
        let content = "start\n    middle\nend";
        let result = apply(content, "start\nmiddle", "X").unwrap();
        assert_eq!(result.content, "X\nend");
        assert_eq!(result.lines_affected, 2);
    }

    #[test]
    fn flexible_pattern_escapes_regex_metacharacters() {
        let result = apply("call(a.b)   now", "call(a.b) now", "done").unwrap();
        assert_eq!(result.content, "done");
        // A literal dot must not act as a wildcard.
        assert!(matches!(
            apply("call(aXb) now", "call(a.b) now", "done"),
            Err(EngineError::NoMatch)
        ));
    }

    #[test]
    fn earlier_strategies_shadow_later_ones() {
        // Exact applies, so the flexible tier never runs even though it
        // would also match.
        let result = apply("foo bar", "foo bar", "x").unwrap();
        assert_eq!(result.confidence, Confidence::High);
    }
}
