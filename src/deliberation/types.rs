//! Request and result types for a deliberation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consensus::{ConvergenceInfo, VotingResult};
use crate::error::{Error, Result};
use crate::tools::ToolExecutionRecord;

/// A participant's assigned disposition, embedded in their prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    For,
    Against,
    #[default]
    Neutral,
}

impl std::fmt::Display for Stance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::For => write!(f, "for"),
            Self::Against => write!(f, "against"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// One model taking part in a deliberation. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub adapter_name: String,
    pub model_id: String,
    #[serde(default)]
    pub stance: Stance,
}

impl Participant {
    pub fn new(adapter_name: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            model_id: model_id.into(),
            stance: Stance::Neutral,
        }
    }

    pub fn with_stance(mut self, stance: Stance) -> Self {
        self.stance = stance;
        self
    }

    /// Identity string: `model_id@adapter_name`.
    pub fn identity(&self) -> String {
        format!("{}@{}", self.model_id, self.adapter_name)
    }
}

/// Deliberation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Exactly one round; no convergence detection, no tool context.
    Quick,
    /// Multi-round debate with early termination.
    Conference,
}

/// A deliberation request, validated at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberateRequest {
    pub question: String,
    pub participants: Vec<Participant>,
    pub mode: Mode,
    /// Requested rounds (1..=max_rounds); quick mode forces 1.
    pub rounds: u32,
    /// Caller-supplied context prepended to the round-1 prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Root for evidence tool execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

impl DeliberateRequest {
    /// Boundary validation: shape only; adapter/model resolution happens
    /// against the factory and registry.
    pub fn validate(&self, max_rounds: u32) -> Result<()> {
        if self.question.trim().is_empty() {
            return Err(Error::validation("question must not be empty"));
        }
        if self.participants.len() < 2 {
            return Err(Error::validation(
                "a deliberation needs at least 2 participants",
            ));
        }
        if self.rounds < 1 || self.rounds > max_rounds {
            return Err(Error::validation(format!(
                "rounds must be in 1..={}, got {}",
                max_rounds, self.rounds
            )));
        }
        let mut identities: Vec<String> =
            self.participants.iter().map(|p| p.identity()).collect();
        identities.sort();
        identities.dedup();
        if identities.len() != self.participants.len() {
            return Err(Error::validation("participants must be distinct"));
        }
        Ok(())
    }
}

/// One successful adapter response within a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResponse {
    pub round_num: u32,
    pub participant_id: String,
    pub response_text: String,
    pub stance: Stance,
    pub timestamp: DateTime<Utc>,
}

/// Terminal state of a deliberation.
///
/// `Failed` means zero successful responses were produced across all
/// rounds (or the request was invalid at the boundary); failed
/// deliberations are not persisted into the decision graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliberationStatus {
    Complete,
    Failed,
}

/// The full outcome of a deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliberationResult {
    pub question: String,
    pub participants: Vec<Participant>,
    /// Responses ordered by (round asc, participant lexicographic).
    pub full_debate: Vec<RoundResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voting_result: Option<VotingResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convergence_info: Option<ConvergenceInfo>,
    /// Records sorted by (round, requester, tool name).
    pub tool_executions: Vec<ToolExecutionRecord>,
    pub rounds_completed: u32,
    pub status: DeliberationStatus,
    /// Opaque host-facing summary; populated by renderers outside this
    /// crate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
    /// Artifact name carrying the untruncated debate.
    pub transcript_ref: String,
    /// Set when `full_debate` was cut down for transport.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub full_debate_truncated: bool,
    /// Original round count; present only alongside truncation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rounds: Option<u32>,
}

impl DeliberationResult {
    /// Apply the transport truncation rule: keep only the last
    /// `max_rounds_in_response` rounds of `full_debate`, marking the
    /// result so the host knows the transcript artifact has the rest.
    pub fn for_transport(mut self, max_rounds_in_response: usize) -> Self {
        let total = self.rounds_completed;
        if (total as usize) <= max_rounds_in_response {
            return self;
        }

        let cutoff = total - max_rounds_in_response as u32;
        self.full_debate.retain(|r| r.round_num > cutoff);
        self.full_debate_truncated = true;
        self.total_rounds = Some(total);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(participants: usize, rounds: u32) -> DeliberateRequest {
        DeliberateRequest {
            question: "Is 2+2=4?".to_string(),
            participants: (0..participants)
                .map(|i| Participant::new("cli", format!("model-{}", i)))
                .collect(),
            mode: Mode::Conference,
            rounds,
            context: None,
            working_directory: None,
        }
    }

    #[test]
    fn test_identity_format() {
        let participant = Participant::new("claude", "sonnet");
        assert_eq!(participant.identity(), "sonnet@claude");
    }

    #[test]
    fn test_validation_rules() {
        assert!(request(2, 3).validate(5).is_ok());
        assert!(request(1, 3).validate(5).is_err());
        assert!(request(2, 0).validate(5).is_err());
        assert!(request(2, 6).validate(5).is_err());

        let mut blank = request(2, 3);
        blank.question = "   ".to_string();
        assert!(blank.validate(5).is_err());

        let mut duplicated = request(2, 3);
        duplicated.participants[1] = duplicated.participants[0].clone();
        assert!(duplicated.validate(5).is_err());
    }

    fn result_with_rounds(rounds: u32) -> DeliberationResult {
        let full_debate = (1..=rounds)
            .flat_map(|round| {
                ["a@cli", "b@cli"].iter().map(move |id| RoundResponse {
                    round_num: round,
                    participant_id: id.to_string(),
                    response_text: format!("round {} from {}", round, id),
                    stance: Stance::Neutral,
                    timestamp: Utc::now(),
                })
            })
            .collect();

        DeliberationResult {
            question: "q".to_string(),
            participants: vec![
                Participant::new("cli", "a"),
                Participant::new("cli", "b"),
            ],
            full_debate,
            voting_result: None,
            convergence_info: None,
            tool_executions: Vec::new(),
            rounds_completed: rounds,
            status: DeliberationStatus::Complete,
            summary: None,
            transcript_ref: "transcript-test.json".to_string(),
            full_debate_truncated: false,
            total_rounds: None,
        }
    }

    #[test]
    fn test_transport_truncation_keeps_last_rounds() {
        let truncated = result_with_rounds(5).for_transport(3);

        assert!(truncated.full_debate_truncated);
        assert_eq!(truncated.total_rounds, Some(5));
        let rounds: Vec<u32> = truncated
            .full_debate
            .iter()
            .map(|r| r.round_num)
            .collect();
        assert_eq!(rounds, vec![3, 3, 4, 4, 5, 5]);
    }

    #[test]
    fn test_transport_truncation_noop_when_under_limit() {
        let untouched = result_with_rounds(2).for_transport(3);
        assert!(!untouched.full_debate_truncated);
        assert_eq!(untouched.total_rounds, None);
        assert_eq!(untouched.full_debate.len(), 4);
    }
}
