//! Query operations over the decision store.
//!
//! The host's query surface: similarity search, contradiction hunting,
//! evolution tracing, and pattern analysis, all returning scored
//! projections of persisted decisions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::store::DecisionStore;
use super::types::DecisionNode;
use crate::error::Result;
use crate::similarity::{clamp_unit, SimilarityBackend};

/// Questions at or above this similarity count as "the same topic" for
/// contradiction and evolution queries.
const TOPIC_THRESHOLD: f64 = 0.70;

/// Window of recent decisions queries operate over.
const QUERY_WINDOW: usize = 1000;

/// Two decisions about the same topic that ended differently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub first: DecisionNode,
    pub second: DecisionNode,
    pub question_similarity: f64,
}

/// Aggregate shape of the stored decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternReport {
    pub total_decisions: usize,
    /// consensus_status -> count
    pub by_status: HashMap<String, usize>,
    /// winning option -> times it won
    pub winning_options: HashMap<String, usize>,
    /// participant id -> deliberations joined
    pub participant_activity: HashMap<String, usize>,
}

/// Read-only query operations.
pub struct DecisionQuery {
    store: Arc<DecisionStore>,
    backend: Arc<dyn SimilarityBackend>,
}

impl DecisionQuery {
    pub fn new(store: Arc<DecisionStore>, backend: Arc<dyn SimilarityBackend>) -> Self {
        Self { store, backend }
    }

    /// Decisions most similar to `question`, score desc.
    pub fn search_similar(
        &self,
        question: &str,
        limit: usize,
    ) -> Result<Vec<(DecisionNode, f64)>> {
        let mut scored = Vec::new();
        for node in self.store.get_recent(QUERY_WINDOW)? {
            let score = clamp_unit(self.backend.similarity(question, &node.question)?);
            scored.push((node, score));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Pairs of same-topic decisions whose winning options differ.
    pub fn find_contradictions(&self, limit: usize) -> Result<Vec<Contradiction>> {
        let nodes = self.store.get_recent(QUERY_WINDOW)?;
        let mut contradictions = Vec::new();

        for (i, first) in nodes.iter().enumerate() {
            let Some(first_option) = &first.winning_option else {
                continue;
            };
            for second in nodes.iter().skip(i + 1) {
                let Some(second_option) = &second.winning_option else {
                    continue;
                };
                if first_option == second_option {
                    continue;
                }
                let score =
                    clamp_unit(self.backend.similarity(&first.question, &second.question)?);
                if score >= TOPIC_THRESHOLD {
                    contradictions.push(Contradiction {
                        first: first.clone(),
                        second: second.clone(),
                        question_similarity: score,
                    });
                    if contradictions.len() >= limit {
                        return Ok(contradictions);
                    }
                }
            }
        }
        Ok(contradictions)
    }

    /// Same-topic decisions in chronological order: how the answer to a
    /// question evolved.
    pub fn trace_evolution(&self, question: &str) -> Result<Vec<(DecisionNode, f64)>> {
        let mut matching = Vec::new();
        for node in self.store.get_recent(QUERY_WINDOW)? {
            let score = clamp_unit(self.backend.similarity(question, &node.question)?);
            if score >= TOPIC_THRESHOLD {
                matching.push((node, score));
            }
        }
        matching.sort_by_key(|(node, _)| node.timestamp);
        Ok(matching)
    }

    /// Aggregate counts over statuses, winners, and participants.
    pub fn analyze_patterns(&self) -> Result<PatternReport> {
        let nodes = self.store.get_recent(QUERY_WINDOW)?;

        let mut by_status: HashMap<String, usize> = HashMap::new();
        let mut winning_options: HashMap<String, usize> = HashMap::new();
        let mut participant_activity: HashMap<String, usize> = HashMap::new();

        for node in &nodes {
            *by_status.entry(node.consensus_status.clone()).or_insert(0) += 1;
            if let Some(option) = &node.winning_option {
                *winning_options.entry(option.clone()).or_insert(0) += 1;
            }
            for participant in &node.participants {
                *participant_activity.entry(participant.clone()).or_insert(0) += 1;
            }
        }

        Ok(PatternReport {
            total_decisions: nodes.len(),
            by_status,
            winning_options,
            participant_activity,
        })
    }
}
