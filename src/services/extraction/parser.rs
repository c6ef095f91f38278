//! Structured-output parsing for generator responses.
//!
//! A generator response is untrusted text that ought to contain a JSON
//! array. Parsing is a total function over that text: it never panics and
//! never raises past the extractor; callers switch on the returned
//! discriminant.

// Allow expect() on static regex patterns - these are guaranteed to compile
#![allow(clippy::expect_used)]

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Result of parsing a generator response.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// A non-empty JSON array was decoded.
    Parsed(Vec<Value>),
    /// A JSON array was decoded but it was empty.
    Empty,
    /// No well-formed JSON array could be recovered.
    Failed,
}

static FENCED_JSON_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```json\s*(\[.*?\])\s*```").expect("static regex: fenced json block")
});

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```\s*(\[.*?\])\s*```").expect("static regex: fenced block")
});

/// Locates the most plausible JSON-array substring in a response.
///
/// Tried in order: a fenced `json` code block, any fenced code block, the
/// substring from the first `[` to the last `]`, and finally the whole
/// trimmed response when it is bracket-delimited.
fn locate_json_array(response: &str) -> Option<&str> {
    if let Some(captures) = FENCED_JSON_BLOCK.captures(response) {
        return captures.get(1).map(|m| m.as_str());
    }
    if let Some(captures) = FENCED_BLOCK.captures(response) {
        return captures.get(1).map(|m| m.as_str());
    }

    let start = response.find('[')?;
    let end = response.rfind(']')?;
    if end > start {
        return Some(&response[start..=end]);
    }

    let trimmed = response.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        return Some(trimmed);
    }
    None
}

/// Parses a generator response into a JSON array.
///
/// Before decoding, the counts of `[` and `]` in the candidate must match;
/// an imbalance marks a truncated response and fails the parse. Decode
/// errors and non-array top-level values fail the parse as well.
#[must_use]
pub fn parse_json_array(response: &str) -> ParseOutcome {
    let Some(candidate) = locate_json_array(response) else {
        tracing::debug!("no JSON array found in generator response");
        return ParseOutcome::Failed;
    };
    let candidate = candidate.trim();

    let open = candidate.matches('[').count();
    let close = candidate.matches(']').count();
    if open != close {
        tracing::warn!(
            open_brackets = open,
            close_brackets = close,
            "generator response JSON appears truncated"
        );
        return ParseOutcome::Failed;
    }

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Array(items)) if items.is_empty() => ParseOutcome::Empty,
        Ok(Value::Array(items)) => ParseOutcome::Parsed(items),
        Ok(_) => {
            tracing::debug!("generator response top-level value is not an array");
            ParseOutcome::Failed
        },
        Err(e) => {
            tracing::debug!(error = %e, "failed to decode generator response as JSON");
            ParseOutcome::Failed
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_json_block() {
        let response = "```json\n[{\"name\":\"x\",\"type\":\"Concept\",\"properties\":{}}]\n```";
        let ParseOutcome::Parsed(items) = parse_json_array(response) else {
            unreachable!("expected parsed outcome");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["name"], json!("x"));
    }

    #[test]
    fn test_fenced_block_without_marker() {
        let response = "here you go:\n```\n[{\"name\":\"y\"}]\n```\ndone";
        assert!(matches!(parse_json_array(response), ParseOutcome::Parsed(_)));
    }

    #[test]
    fn test_bracket_substring() {
        let response = "Sure! The entities are [{\"name\":\"z\"}] as requested.";
        let ParseOutcome::Parsed(items) = parse_json_array(response) else {
            unreachable!("expected parsed outcome");
        };
        assert_eq!(items[0]["name"], json!("z"));
    }

    #[test]
    fn test_bare_array() {
        assert!(matches!(
            parse_json_array("  [{\"name\":\"a\"}]  "),
            ParseOutcome::Parsed(_)
        ));
    }

    #[test]
    fn test_empty_array_is_empty_not_failed() {
        assert_eq!(parse_json_array("[]"), ParseOutcome::Empty);
        assert_eq!(parse_json_array("```json\n[]\n```"), ParseOutcome::Empty);
    }

    #[test]
    fn test_garbage_fails() {
        assert_eq!(parse_json_array("garbage [not json"), ParseOutcome::Failed);
        assert_eq!(parse_json_array("no brackets at all"), ParseOutcome::Failed);
        assert_eq!(parse_json_array(""), ParseOutcome::Failed);
    }

    #[test]
    fn test_bracket_imbalance_fails() {
        assert_eq!(parse_json_array("[[1, 2]"), ParseOutcome::Failed);
    }

    #[test]
    fn test_balanced_but_invalid_json_fails() {
        assert_eq!(parse_json_array("[{broken}]"), ParseOutcome::Failed);
    }

    #[test]
    fn test_nested_arrays_decode() {
        let ParseOutcome::Parsed(items) = parse_json_array("[[1,2],[3]]") else {
            unreachable!("expected parsed outcome");
        };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_multiline_fenced_block() {
        let response = "```json\n[\n  {\"name\": \"甲\"},\n  {\"name\": \"乙\"}\n]\n```";
        let ParseOutcome::Parsed(items) = parse_json_array(response) else {
            unreachable!("expected parsed outcome");
        };
        assert_eq!(items.len(), 2);
    }
}
