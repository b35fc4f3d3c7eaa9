//! Glue between the deliberation engine and the decision graph.
//!
//! Two never-raising operations: read context before a debate starts,
//! persist the outcome after it ends. Storage failures are logged and
//! swallowed; a deliberation never aborts because the graph is
//! unavailable.

use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::cache::SimilarityCache;
use super::retrieval::Retriever;
use super::store::DecisionStore;
use super::types::{normalize_question, DecisionId, DecisionNode, ParticipantStance};
use super::worker::{compute_edges, SimilarityWorker};
use crate::config::{DecisionGraphConfig, WorkerConfig};
use crate::deliberation::{DeliberationResult, DeliberationStatus};
use crate::similarity::SimilarityBackend;

/// Short stable hash of a normalized question, for log correlation.
pub fn question_hash(question: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_question(question).as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Read-before / write-after integration point.
pub struct GraphIntegration {
    store: Arc<DecisionStore>,
    cache: Arc<SimilarityCache>,
    backend: Arc<dyn SimilarityBackend>,
    retriever: Retriever,
    worker: Option<Arc<SimilarityWorker>>,
    graph_config: DecisionGraphConfig,
    worker_config: WorkerConfig,
}

impl GraphIntegration {
    pub fn new(
        store: Arc<DecisionStore>,
        cache: Arc<SimilarityCache>,
        backend: Arc<dyn SimilarityBackend>,
        worker: Option<Arc<SimilarityWorker>>,
        graph_config: DecisionGraphConfig,
        worker_config: WorkerConfig,
    ) -> Self {
        let retriever = Retriever::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&backend),
            graph_config.clone(),
        );
        Self {
            store,
            cache,
            backend,
            retriever,
            worker,
            graph_config,
            worker_config,
        }
    }

    /// Formatted context for a new question, or `None` when the graph is
    /// disabled, empty, irrelevant, or failing. Emits the per-request
    /// measurement record.
    pub fn get_context_for_deliberation(&self, question: &str) -> Option<String> {
        if !self.graph_config.enabled {
            return None;
        }

        let started = Instant::now();
        let outcome = match self.retriever.retrieve(question) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(%error, "graph context retrieval failed; proceeding without");
                return None;
            }
        };
        let store_size = self.store.count().unwrap_or(0);

        info!(
            question_hash = %question_hash(question),
            strong = outcome.strong_count,
            moderate = outcome.moderate_count,
            brief = outcome.brief_count,
            tokens_used = outcome.estimated_tokens,
            token_budget = self.graph_config.context_token_budget,
            store_size,
            backend = self.backend.name(),
            wall_ms = started.elapsed().as_millis() as u64,
            "decision graph context"
        );

        if outcome.context_block.is_empty() {
            None
        } else {
            Some(outcome.context_block)
        }
    }

    /// Persist a completed deliberation, hand edge computation to the
    /// worker (or compute a bounded set synchronously), and invalidate
    /// L1. Returns the decision id, or `None` when persistence was
    /// skipped or failed.
    pub fn store_deliberation(&self, result: &DeliberationResult) -> Option<DecisionId> {
        if !self.graph_config.enabled {
            return None;
        }
        // Failed deliberations are not persisted.
        if result.status == DeliberationStatus::Failed {
            return None;
        }

        let (node, stances) = build_decision(result);
        let id = match self.store.save_decision(&node, &stances) {
            Ok(id) => id,
            Err(error) => {
                warn!(%error, "failed to persist deliberation; result still returned");
                return None;
            }
        };

        match &self.worker {
            Some(worker) => {
                if !worker.enqueue(id.clone(), 1) {
                    warn!(decision = %id, "similarity queue closed; edges deferred");
                }
            }
            None => {
                // Bounded synchronous fallback so retrieval still sees
                // edges when the worker is disabled.
                let cap = Duration::from_millis(self.worker_config.sync_fallback_cap_ms);
                match compute_edges(
                    &self.store,
                    self.backend.as_ref(),
                    &id,
                    self.worker_config.sync_fallback_candidates,
                    Some(cap),
                ) {
                    Ok(edges) => {
                        if let Err(error) = self.store.replace_similarities(
                            &id,
                            &edges,
                            self.worker_config.edges_per_decision,
                        ) {
                            warn!(%error, "failed to persist similarity edges");
                        }
                    }
                    Err(error) => warn!(%error, "synchronous edge computation failed"),
                }
            }
        }

        self.cache.invalidate_queries();
        Some(id)
    }
}

/// Project a deliberation result onto the persisted schema.
fn build_decision(result: &DeliberationResult) -> (DecisionNode, Vec<ParticipantStance>) {
    let consensus_status = result
        .voting_result
        .as_ref()
        .map(|voting| {
            serde_json::to_value(voting.consensus)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "no_votes".to_string())
        })
        .unwrap_or_else(|| "no_votes".to_string());

    let mut node = DecisionNode::new(result.question.clone(), consensus_status)
        .with_participants(result.participants.iter().map(|p| p.identity()).collect())
        .with_metadata(json!({
            "rounds_completed": result.rounds_completed,
            "transcript_ref": result.transcript_ref,
            "convergence_status": result
                .convergence_info
                .as_ref()
                .map(|info| serde_json::to_value(info.status).ok())
                .flatten(),
            "final_similarity": result
                .convergence_info
                .as_ref()
                .map(|info| info.final_similarity),
        }));
    if let Some(option) = result
        .voting_result
        .as_ref()
        .and_then(|voting| voting.winning_option.clone())
    {
        node = node.with_winning_option(option);
    }

    // One stance per participant, taken from their latest vote.
    let stances = result
        .participants
        .iter()
        .map(|participant| {
            let identity = participant.identity();
            let last_vote = result
                .voting_result
                .as_ref()
                .and_then(|voting| {
                    voting
                        .votes_by_round
                        .iter()
                        .flatten()
                        .filter(|round_vote| round_vote.participant_id == identity)
                        .last()
                })
                .map(|round_vote| &round_vote.vote);

            ParticipantStance {
                decision_id: node.id.clone(),
                participant_id: identity,
                vote_option: last_vote.map(|vote| vote.option.clone()),
                confidence: last_vote.map(|vote| vote.confidence),
                rationale: last_vote.map(|vote| vote.rationale.clone()),
            }
        })
        .collect();

    (node, stances)
}
