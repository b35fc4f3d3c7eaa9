//! Decision graph data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque identifier for a persisted decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionId(pub String);

impl DecisionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for DecisionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DecisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lowercase, whitespace-collapsed form of a question, used for hashing
/// and duplicate detection.
pub fn normalize_question(question: &str) -> String {
    question
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A completed deliberation persisted in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionNode {
    pub id: DecisionId,
    pub question: String,
    pub question_normalized: String,
    /// Consensus class the debate ended with (wire form, snake_case).
    pub consensus_status: String,
    pub winning_option: Option<String>,
    /// Participant identities (`model@adapter`), lexicographic.
    pub participants: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Free-form extras (rounds completed, convergence details, ...).
    pub metadata_blob: Value,
}

impl DecisionNode {
    pub fn new(question: impl Into<String>, consensus_status: impl Into<String>) -> Self {
        let question = question.into();
        Self {
            id: DecisionId::new(),
            question_normalized: normalize_question(&question),
            question,
            consensus_status: consensus_status.into(),
            winning_option: None,
            participants: Vec::new(),
            timestamp: Utc::now(),
            metadata_blob: Value::Null,
        }
    }

    pub fn with_winning_option(mut self, option: impl Into<String>) -> Self {
        self.winning_option = Some(option.into());
        self
    }

    pub fn with_participants(mut self, mut participants: Vec<String>) -> Self {
        participants.sort();
        self.participants = participants;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata_blob = metadata;
        self
    }
}

/// One participant's final position inside a persisted decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantStance {
    pub decision_id: DecisionId,
    pub participant_id: String,
    pub vote_option: Option<String>,
    pub confidence: Option<f64>,
    pub rationale: Option<String>,
}

/// A similarity edge from one decision to another. Directional, owned by
/// the source's adjacency; `score` is clamped into [0,1] before it gets
/// here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSimilarity {
    pub source_id: DecisionId,
    pub target_id: DecisionId,
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_question() {
        assert_eq!(
            normalize_question("  Should we   USE\tRust? "),
            "should we use rust?"
        );
        assert_eq!(normalize_question(""), "");
    }

    #[test]
    fn test_node_builder_sorts_participants() {
        let node = DecisionNode::new("q", "majority_decision")
            .with_participants(vec!["z@cli".to_string(), "a@cli".to_string()]);
        assert_eq!(node.participants, vec!["a@cli", "z@cli"]);
    }

    #[test]
    fn test_ids_unique() {
        assert_ne!(DecisionId::new(), DecisionId::new());
    }
}
