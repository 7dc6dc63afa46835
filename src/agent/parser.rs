//! Structured-line parsing of the agent's JSON-lines output, plus extraction
//! of the byte-exact completion and blocker markers from accumulated text.

use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

pub const COMPLETE_MARKER: &str = "<promise>COMPLETE</promise>";
const BLOCKER_OPEN: &str = "<blocker>";
const BLOCKER_CLOSE: &str = "</blocker>";

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    TextContent(String),
    Result {
        output: Option<String>,
        cost: Option<f64>,
        is_error: bool,
    },
}

/// True when `line` parses as a JSON object with a `type` field — used to
/// exclude structured lines from transient-error string matching (matching
/// on the agent's own prose about an error string produces false positives).
pub fn is_structured_line(line: &str) -> bool {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|v| v.get("type").cloned())
        .is_some()
}

/// Parses one line of the agent's structured output. Malformed lines yield no
/// events rather than aborting the stream.
pub fn parse_json_line(line: &str) -> Vec<ParsedEvent> {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return Vec::new();
    };
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Vec::new();
    };

    match kind {
        "assistant" | "user" => parse_content_array(&value),
        "content_block_delta" => value
            .get("delta")
            .and_then(|d| d.get("text"))
            .and_then(Value::as_str)
            .map(|t| vec![ParsedEvent::TextContent(t.to_string())])
            .unwrap_or_default(),
        "result" => vec![ParsedEvent::Result {
            output: value.get("result").and_then(Value::as_str).map(str::to_string),
            cost: value.get("total_cost_usd").and_then(Value::as_f64),
            is_error: value.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        }],
        _ => Vec::new(),
    }
}

fn parse_content_array(value: &Value) -> Vec<ParsedEvent> {
    let Some(content) = value.get("message").and_then(|m| m.get("content")).and_then(Value::as_array) else {
        return Vec::new();
    };

    content
        .iter()
        .filter_map(|block| {
            if block.get("type").and_then(Value::as_str) == Some("text") {
                block
                    .get("text")
                    .and_then(Value::as_str)
                    .map(|t| ParsedEvent::TextContent(t.to_string()))
            } else {
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocker {
    pub description: String,
    pub action_hint: Option<String>,
    pub resume_hint: Option<String>,
    pub hash: String,
}

fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.trim().as_bytes());
    format!("{:x}", digest)[..8].to_string()
}

fn action_hint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*Action:\s*(?P<value>.+)$").unwrap())
}

fn resume_hint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*Resume:\s*(?P<value>.+)$").unwrap())
}

/// Scans accumulated non-structured text for the byte-exact completion
/// marker. This is a plain substring search, not markdown-aware — a marker
/// inside a fenced code block still counts.
pub fn contains_completion_marker(text: &str) -> bool {
    text.contains(COMPLETE_MARKER)
}

/// Extracts the first `<blocker>...</blocker>` region, if any. Within the
/// region, an `Action:` or `Resume:` line (in any position, any case) is
/// pulled out as the optional action/resume hint rather than left in the
/// description text.
pub fn extract_blocker(text: &str) -> Option<Blocker> {
    let start = text.find(BLOCKER_OPEN)? + BLOCKER_OPEN.len();
    let end = text[start..].find(BLOCKER_CLOSE)? + start;
    let body = text[start..end].trim();

    let mut description_lines = Vec::new();
    let mut action_hint = None;
    let mut resume_hint = None;

    for line in body.lines() {
        if let Some(caps) = action_hint_re().captures(line) {
            action_hint = Some(caps["value"].trim().to_string());
        } else if let Some(caps) = resume_hint_re().captures(line) {
            resume_hint = Some(caps["value"].trim().to_string());
        } else {
            description_lines.push(line);
        }
    }

    let description = description_lines.join("\n").trim().to_string();
    let hash = content_hash(body);
    Some(Blocker {
        description,
        action_hint,
        resume_hint,
        hash,
    })
}

/// Transient-failure substrings recognized in non-structured output lines.
const TRANSIENT_MARKERS: &[&str] = &[
    "no messages returned",
    "promise rejected",
    "econnreset",
    "etimedout",
    "rate limit",
    "overloaded",
];

pub fn is_transient_failure_line(line: &str) -> bool {
    if is_structured_line(line) {
        return false;
    }
    let lower = line.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assistant_text_content() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello"}]}}"#;
        let events = parse_json_line(line);
        assert_eq!(events, vec![ParsedEvent::TextContent("hello".to_string())]);
    }

    #[test]
    fn parses_result_event() {
        let line = r#"{"type":"result","result":"done","total_cost_usd":0.25,"is_error":false}"#;
        let events = parse_json_line(line);
        assert_eq!(
            events,
            vec![ParsedEvent::Result {
                output: Some("done".to_string()),
                cost: Some(0.25),
                is_error: false
            }]
        );
    }

    #[test]
    fn malformed_line_yields_no_events() {
        assert!(parse_json_line("not json").is_empty());
        assert!(parse_json_line(r#"{"no_type_field":true}"#).is_empty());
    }

    #[test]
    fn detects_completion_marker_inside_fenced_code_block() {
        let text = "Here's what I did:\n```\n<promise>COMPLETE</promise>\n```\n";
        assert!(contains_completion_marker(text));
    }

    #[test]
    fn extracts_blocker_and_hashes_consistently() {
        let text = "I'm stuck.\n<blocker>need API credentials</blocker>\nwaiting.";
        let blocker = extract_blocker(text).unwrap();
        assert_eq!(blocker.description, "need API credentials");
        assert_eq!(blocker.action_hint, None);
        assert_eq!(blocker.resume_hint, None);

        let again = extract_blocker(text).unwrap();
        assert_eq!(blocker.hash, again.hash);
    }

    #[test]
    fn extracts_blocker_action_and_resume_hints() {
        let text = "<blocker>\nneed API credentials\nAction: ask the operator for a token\nResume: retry once the token is in .env\n</blocker>";
        let blocker = extract_blocker(text).unwrap();
        assert_eq!(blocker.description, "need API credentials");
        assert_eq!(blocker.action_hint.as_deref(), Some("ask the operator for a token"));
        assert_eq!(blocker.resume_hint.as_deref(), Some("retry once the token is in .env"));
    }

    #[test]
    fn transient_detection_ignores_structured_lines() {
        let structured = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"we hit a rate limit earlier"}]}}"#;
        assert!(!is_transient_failure_line(structured));
        assert!(is_transient_failure_line("Error: rate limit exceeded, retry later"));
    }
}
