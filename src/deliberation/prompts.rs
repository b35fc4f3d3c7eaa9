//! Prompt assembly for deliberation rounds.
//!
//! Round 1 carries the question, any caller context, the decision graph
//! context block, and the instruction preambles. Later rounds replay the
//! debate so far plus the shared tool-result preamble from the previous
//! round. Instruction preambles are identical across participants;
//! stance lines are the only per-participant variation.

use crate::deliberation::types::{RoundResponse, Stance};
use crate::tools::{ToolExecutionRecord, COMMAND_WHITELIST};

/// Instruction preamble teaching the vote marker.
pub fn voting_instructions() -> String {
    concat!(
        "When you have formed a position, end your response with a vote marker:\n",
        "VOTE:{\"option\": \"<your option>\", \"confidence\": <0.0-1.0>, ",
        "\"rationale\": \"<one sentence>\", \"continue_debate\": <true|false>}\n",
        "Set continue_debate to false when further rounds would not change your position.\n",
    )
    .to_string()
}

/// Instruction preamble teaching the tool marker.
pub fn tool_instructions() -> String {
    format!(
        concat!(
            "You may request read-only evidence with tool markers:\n",
            "TOOL_REQUEST:{{\"name\": \"<tool>\", \"arguments\": {{...}}}}\n",
            "Tools: read_file {{path}}, search_code {{pattern, path}}, ",
            "list_files {{pattern, path?}}, run_command {{command, args}} ",
            "(commands limited to {}).\n",
            "Results are shared with every participant in the next round.\n",
        ),
        COMMAND_WHITELIST.join(", ")
    )
}

fn stance_line(stance: Stance) -> String {
    match stance {
        Stance::Neutral => {
            "Your stance is neutral: weigh the options on their merits.".to_string()
        }
        other => format!(
            "Your assigned stance is '{}': argue that side while staying honest about weaknesses.",
            other
        ),
    }
}

/// Build the round-1 prompt for one participant.
pub fn round_one_prompt(
    question: &str,
    caller_context: Option<&str>,
    graph_context: Option<&str>,
    stance: Stance,
) -> String {
    let mut prompt = String::new();
    if let Some(context) = graph_context {
        prompt.push_str(context);
        prompt.push('\n');
    }
    if let Some(context) = caller_context {
        prompt.push_str("## Background from the requester\n");
        prompt.push_str(context);
        prompt.push_str("\n\n");
    }
    prompt.push_str("## Question under deliberation\n");
    prompt.push_str(question);
    prompt.push_str("\n\n");
    prompt.push_str(&stance_line(stance));
    prompt.push_str("\n\n");
    prompt.push_str(&voting_instructions());
    prompt.push('\n');
    prompt.push_str(&tool_instructions());
    prompt
}

/// Build the prompt for round `round_num` (> 1) for one participant:
/// the whole debate so far, the shared tool preamble from the previous
/// round, and the instruction preambles.
pub fn later_round_prompt(
    question: &str,
    round_num: u32,
    debate: &[RoundResponse],
    tool_preamble: Option<&str>,
    stance: Stance,
) -> String {
    let mut prompt = String::new();
    if let Some(preamble) = tool_preamble {
        prompt.push_str(preamble);
        prompt.push('\n');
    }

    prompt.push_str("## Question under deliberation\n");
    prompt.push_str(question);
    prompt.push_str("\n\n## Debate so far\n");
    for response in debate {
        prompt.push_str(&format!(
            "### Round {} - {}\n{}\n\n",
            response.round_num, response.participant_id, response.response_text
        ));
    }

    prompt.push_str(&format!(
        "This is round {}. Respond to the other participants' strongest points.\n",
        round_num
    ));
    prompt.push_str(&stance_line(stance));
    prompt.push_str("\n\n");
    prompt.push_str(&voting_instructions());
    prompt
}

/// Shared preamble listing the previous round's tool executions, each
/// result truncated to `result_cap_bytes`.
pub fn tool_results_preamble(records: &[ToolExecutionRecord], result_cap_bytes: usize) -> String {
    if records.is_empty() {
        return String::new();
    }

    let mut preamble = String::from("## Evidence gathered last round\n");
    for record in records {
        preamble.push_str(&format!(
            "### {} ran {} with {}\n",
            record.requesting_participant_id, record.tool_name, record.arguments
        ));
        if record.success {
            preamble.push_str(&truncate_bytes(&record.output, result_cap_bytes));
        } else {
            preamble.push_str(&format!(
                "(failed: {})",
                record.error.as_deref().unwrap_or("unknown error")
            ));
        }
        preamble.push_str("\n\n");
    }
    preamble
}

fn truncate_bytes(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... (truncated)", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRequest;
    use chrono::Utc;

    fn record(output: &str) -> ToolExecutionRecord {
        ToolExecutionRecord::success(
            "a@cli",
            &ToolRequest::ReadFile {
                path: "cfg.yaml".to_string(),
            },
            output.to_string(),
            3,
            1,
        )
    }

    #[test]
    fn test_round_one_prompt_sections() {
        let prompt = round_one_prompt(
            "Is 2+2=4?",
            Some("arithmetic sanity check"),
            Some("## Relevant past decisions (1 strong, 0 moderate, 0 brief)\n..."),
            Stance::For,
        );

        assert!(prompt.contains("Relevant past decisions"));
        assert!(prompt.contains("arithmetic sanity check"));
        assert!(prompt.contains("Is 2+2=4?"));
        assert!(prompt.contains("'for'"));
        assert!(prompt.contains("VOTE:"));
        assert!(prompt.contains("TOOL_REQUEST:"));
    }

    #[test]
    fn test_round_one_prompt_identical_without_stance_difference() {
        let a = round_one_prompt("q", None, None, Stance::Neutral);
        let b = round_one_prompt("q", None, None, Stance::Neutral);
        assert_eq!(a, b);
    }

    #[test]
    fn test_later_round_prompt_replays_debate_in_order() {
        let debate = vec![
            RoundResponse {
                round_num: 1,
                participant_id: "a@cli".to_string(),
                response_text: "first point".to_string(),
                stance: Stance::Neutral,
                timestamp: Utc::now(),
            },
            RoundResponse {
                round_num: 1,
                participant_id: "b@cli".to_string(),
                response_text: "second point".to_string(),
                stance: Stance::Neutral,
                timestamp: Utc::now(),
            },
        ];

        let prompt = later_round_prompt("q", 2, &debate, None, Stance::Neutral);
        let first = prompt.find("first point").unwrap();
        let second = prompt.find("second point").unwrap();
        assert!(first < second);
        assert!(prompt.contains("This is round 2"));
    }

    #[test]
    fn test_tool_preamble_included_when_present() {
        let preamble = tool_results_preamble(&[record("retries: 3")], 4096);
        let prompt = later_round_prompt("q", 2, &[], Some(&preamble), Stance::Neutral);
        assert!(prompt.contains("retries: 3"));
        assert!(prompt.contains("Evidence gathered last round"));
    }

    #[test]
    fn test_tool_preamble_empty_without_records() {
        assert!(tool_results_preamble(&[], 4096).is_empty());
    }

    #[test]
    fn test_tool_preamble_truncates_large_output() {
        let big = "x".repeat(10_000);
        let preamble = tool_results_preamble(&[record(&big)], 4096);
        assert!(preamble.contains("... (truncated)"));
        assert!(preamble.len() < big.len());
    }

    #[test]
    fn test_tool_preamble_reports_failures() {
        let failed = ToolExecutionRecord::failure(
            "a@cli",
            &ToolRequest::ReadFile {
                path: "/etc/shadow".to_string(),
            },
            "path outside permitted roots",
            1,
            1,
        );
        let preamble = tool_results_preamble(&[failed], 4096);
        assert!(preamble.contains("failed: path outside permitted roots"));
    }
}
