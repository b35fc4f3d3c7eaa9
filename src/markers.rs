//! Extraction of machine-readable markers from free-form model text.
//!
//! Participants embed two kinds of markers in otherwise unstructured
//! responses:
//!
//! - `VOTE:{...}` - a structured vote on the question under debate
//! - `TOOL_REQUEST:{...}` - a request to run one of the sandboxed
//!   evidence tools
//!
//! Parsing never fails the round: malformed markers are skipped with a
//! structured warning and the caller sees `None` / an empty list.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::warn;

use crate::tools::ToolRequest;

/// Marks the position of a vote marker. The JSON object itself is
/// extracted with a brace-balanced scan so nested objects and braces
/// inside string fields do not truncate the match.
static VOTE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"VOTE:\s*").expect("Invalid regex"));

/// Marks the position of a tool request marker.
static TOOL_REQUEST_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"TOOL_REQUEST:\s*").expect("Invalid regex"));

/// A structured vote parsed from a `VOTE:` marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// The option being voted for. Non-empty after trimming.
    pub option: String,
    /// Confidence in [0,1]; out-of-range input is clamped.
    pub confidence: f64,
    /// Free-text justification.
    pub rationale: String,
    /// Whether the participant wants the debate to continue.
    #[serde(default = "default_continue")]
    pub continue_debate: bool,
}

fn default_continue() -> bool {
    true
}

/// Raw wire shape before validation.
#[derive(Debug, Deserialize)]
struct RawVote {
    option: String,
    confidence: f64,
    rationale: String,
    #[serde(default = "default_continue")]
    continue_debate: bool,
}

/// Extract the last well-formed vote from model response text.
///
/// Scans for every `VOTE:` marker, parses the JSON object that follows,
/// and returns the last one that validates. Returns `None` when no
/// marker yields a well-formed vote.
pub fn parse_votes(text: &str) -> Option<Vote> {
    let mut last = None;

    for m in VOTE_PATTERN.find_iter(text) {
        let Some(object) = extract_json_object(&text[m.end()..]) else {
            warn!(marker = "VOTE", "marker not followed by a JSON object");
            continue;
        };

        match serde_json::from_str::<RawVote>(object) {
            Ok(raw) => {
                if raw.option.trim().is_empty() {
                    warn!(marker = "VOTE", "vote rejected: empty option");
                    continue;
                }
                last = Some(Vote {
                    option: raw.option,
                    confidence: raw.confidence.clamp(0.0, 1.0),
                    rationale: raw.rationale,
                    continue_debate: raw.continue_debate,
                });
            }
            Err(error) => {
                warn!(marker = "VOTE", %error, "malformed vote skipped");
            }
        }
    }

    last
}

/// Extract every well-formed tool request from model response text,
/// preserving document order. Malformed entries are skipped with a
/// warning, never an error.
pub fn parse_tool_requests(text: &str) -> Vec<ToolRequest> {
    let mut requests = Vec::new();

    for m in TOOL_REQUEST_PATTERN.find_iter(text) {
        let Some(object) = extract_json_object(&text[m.end()..]) else {
            warn!(
                marker = "TOOL_REQUEST",
                "marker not followed by a JSON object"
            );
            continue;
        };

        match serde_json::from_str::<ToolRequest>(object) {
            Ok(request) => requests.push(request),
            Err(error) => {
                warn!(marker = "TOOL_REQUEST", %error, "malformed tool request skipped");
            }
        }
    }

    requests
}

/// Find the balanced `{...}` object at the start of `text`, tolerating
/// lightweight fencing characters (backticks) and whitespace before the
/// opening brace. Returns the object slice, or `None` when the text does
/// not start with a balanced object.
fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed_start = text
        .char_indices()
        .find(|(_, c)| !c.is_whitespace() && *c != '`')
        .map(|(i, _)| i)?;

    let rest = &text[trimmed_start..];
    if !rest.starts_with('{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in rest.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&rest[..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_vote_basic() {
        let text = r#"I think option A is best.
VOTE:{"option": "A", "confidence": 0.9, "rationale": "simplest"}"#;

        let vote = parse_votes(text).unwrap();
        assert_eq!(vote.option, "A");
        assert_eq!(vote.confidence, 0.9);
        assert_eq!(vote.rationale, "simplest");
        assert!(vote.continue_debate);
    }

    #[test]
    fn test_parse_vote_takes_last_marker() {
        let text = r#"
VOTE:{"option": "A", "confidence": 0.5, "rationale": "first thoughts"}
After reconsidering:
VOTE:{"option": "B", "confidence": 0.8, "rationale": "changed my mind", "continue_debate": false}
"#;

        let vote = parse_votes(text).unwrap();
        assert_eq!(vote.option, "B");
        assert!(!vote.continue_debate);
    }

    #[test]
    fn test_parse_vote_clamps_confidence() {
        let high = parse_votes(r#"VOTE:{"option":"A","confidence":1.7,"rationale":"r"}"#).unwrap();
        assert_eq!(high.confidence, 1.0);

        let low = parse_votes(r#"VOTE:{"option":"A","confidence":-0.3,"rationale":"r"}"#).unwrap();
        assert_eq!(low.confidence, 0.0);
    }

    #[test]
    fn test_parse_vote_rejects_empty_option() {
        assert!(parse_votes(r#"VOTE:{"option":"   ","confidence":0.9,"rationale":"r"}"#).is_none());
        assert!(parse_votes(r#"VOTE:{"option":"","confidence":0.9,"rationale":"r"}"#).is_none());
    }

    #[test]
    fn test_parse_vote_falls_back_past_malformed_last() {
        let text = r#"
VOTE:{"option": "A", "confidence": 0.5, "rationale": "ok"}
VOTE:{"option": , broken}
"#;
        // The malformed trailing marker is skipped; the earlier valid one wins.
        let vote = parse_votes(text).unwrap();
        assert_eq!(vote.option, "A");
    }

    #[test]
    fn test_parse_vote_tolerates_backtick_fencing() {
        let text = "VOTE: `{\"option\":\"A\",\"confidence\":0.9,\"rationale\":\"r\"}`";
        let vote = parse_votes(text).unwrap();
        assert_eq!(vote.option, "A");
    }

    #[test]
    fn test_parse_vote_none_without_marker() {
        assert!(parse_votes("no structured content here").is_none());
        assert!(parse_votes("VOTE: not json").is_none());
    }

    #[test]
    fn test_parse_vote_rationale_with_braces() {
        let text = r#"VOTE:{"option":"A","confidence":0.9,"rationale":"use {} literals"}"#;
        let vote = parse_votes(text).unwrap();
        assert_eq!(vote.rationale, "use {} literals");
    }

    #[test]
    fn test_parse_tool_requests_nested_arguments() {
        let text = r#"Let me check the config first.
TOOL_REQUEST:{"name":"read_file","arguments":{"path":"/cfg.yaml"}}"#;

        let requests = parse_tool_requests(text);
        assert_eq!(requests.len(), 1);
        match &requests[0] {
            ToolRequest::ReadFile { path } => assert_eq!(path, "/cfg.yaml"),
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_parse_tool_requests_preserves_order_and_skips_malformed() {
        let text = r#"
TOOL_REQUEST:{"name":"list_files","arguments":{"pattern":"*.rs"}}
TOOL_REQUEST:{"name":"no_such_tool","arguments":{}}
TOOL_REQUEST:{"name":"search_code","arguments":{"pattern":"fn main","path":"src"}}
"#;

        let requests = parse_tool_requests(text);
        assert_eq!(requests.len(), 2);
        assert!(matches!(requests[0], ToolRequest::ListFiles { .. }));
        assert!(matches!(requests[1], ToolRequest::SearchCode { .. }));
    }

    #[test]
    fn test_parse_tool_requests_empty_without_markers() {
        assert!(parse_tool_requests("just prose").is_empty());
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let text = r#"
VOTE:{"option":"A","confidence":0.9,"rationale":"r"}
TOOL_REQUEST:{"name":"read_file","arguments":{"path":"x"}}
TOOL_REQUEST:{"name":"list_files","arguments":{"pattern":"*"}}
"#;

        assert_eq!(parse_votes(text), parse_votes(text));
        assert_eq!(parse_tool_requests(text), parse_tool_requests(text));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parsed_confidence_always_in_unit_interval(confidence in -10.0f64..10.0) {
                let text = format!(
                    r#"VOTE:{{"option":"A","confidence":{},"rationale":"r"}}"#,
                    confidence
                );
                let vote = parse_votes(&text).unwrap();
                prop_assert!((0.0..=1.0).contains(&vote.confidence));
            }

            #[test]
            fn parser_never_panics_on_arbitrary_text(text in ".{0,400}") {
                let _ = parse_votes(&text);
                let _ = parse_tool_requests(&text);
            }
        }
    }
}
