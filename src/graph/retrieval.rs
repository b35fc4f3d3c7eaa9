//! Token-budgeted retrieval of relevant past decisions.
//!
//! For a new question: pick an adaptive number of candidates from the
//! recent window, score them against the question, drop everything under
//! the noise floor, tier the survivors by confidence, and render a
//! markdown context block that stays inside the token budget.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::cache::SimilarityCache;
use super::store::DecisionStore;
use super::types::{normalize_question, DecisionNode};
use crate::config::DecisionGraphConfig;
use crate::error::Result;
use crate::similarity::{clamp_unit, cosine, SimilarityBackend};

/// Nominal rendering cost per tier, in estimated tokens.
const TOKENS_STRONG: usize = 500;
const TOKENS_MODERATE: usize = 200;
const TOKENS_BRIEF: usize = 50;

/// Recent-window ceiling for candidate scoring.
const CANDIDATE_WINDOW_MAX: usize = 1000;

/// Confidence band controlling per-item rendering size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Strong,
    Moderate,
    Brief,
}

impl Tier {
    fn estimated_tokens(self) -> usize {
        match self {
            Self::Strong => TOKENS_STRONG,
            Self::Moderate => TOKENS_MODERATE,
            Self::Brief => TOKENS_BRIEF,
        }
    }

    fn precedence(self) -> u8 {
        match self {
            Self::Strong => 0,
            Self::Moderate => 1,
            Self::Brief => 2,
        }
    }
}

/// The cached unit of retrieval work: the rendered block plus the scored
/// list callers unpack.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    /// Markdown context block; empty when nothing was included.
    pub context_block: String,
    /// (decision, score) pairs above the noise floor, score desc.
    pub decisions: Vec<(DecisionNode, f64)>,
    pub strong_count: usize,
    pub moderate_count: usize,
    pub brief_count: usize,
    /// Sum of nominal tier costs for the included items.
    pub estimated_tokens: usize,
}

impl RetrievalOutcome {
    fn empty() -> Self {
        Self {
            context_block: String::new(),
            decisions: Vec::new(),
            strong_count: 0,
            moderate_count: 0,
            brief_count: 0,
            estimated_tokens: 0,
        }
    }
}

/// Adaptive candidate count from current store size.
pub fn adaptive_k(store_size: usize) -> usize {
    if store_size < 100 {
        5
    } else if store_size < 1000 {
        3
    } else {
        2
    }
}

/// Scores past decisions against new questions and renders context.
pub struct Retriever {
    store: Arc<DecisionStore>,
    cache: Arc<SimilarityCache>,
    backend: Arc<dyn SimilarityBackend>,
    config: DecisionGraphConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<DecisionStore>,
        cache: Arc<SimilarityCache>,
        backend: Arc<dyn SimilarityBackend>,
        config: DecisionGraphConfig,
    ) -> Self {
        Self {
            store,
            cache,
            backend,
            config,
        }
    }

    /// Scored decisions relevant to `question`, score desc. The pairing
    /// is contractual; callers unpack it.
    pub fn find_relevant_decisions(&self, question: &str) -> Result<Vec<(DecisionNode, f64)>> {
        Ok(self.retrieve(question)?.decisions)
    }

    /// Full retrieval: consult L1, otherwise score, tier, budget, render.
    pub fn retrieve(&self, question: &str) -> Result<RetrievalOutcome> {
        let store_size = self.store.count()?;
        if store_size == 0 {
            return Ok(RetrievalOutcome::empty());
        }

        let top_k = adaptive_k(store_size);
        let normalized = normalize_question(question);
        let key = SimilarityCache::query_key(
            &normalized,
            self.config.similarity_threshold,
            top_k,
            self.config.context_token_budget,
        );
        if let Some(cached) = self.cache.get_query(&key) {
            return Ok(cached);
        }

        let window = store_size.min(CANDIDATE_WINDOW_MAX);
        let candidates = self.store.get_recent(window)?;

        let mut scored: Vec<(DecisionNode, f64)> = Vec::new();
        for candidate in candidates {
            let score = self.score(question, &normalized, &candidate)?;
            if score >= self.config.similarity_threshold {
                scored.push((candidate, score));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        let outcome = self.render(&scored);
        debug!(
            store_size,
            top_k,
            included = outcome.strong_count + outcome.moderate_count + outcome.brief_count,
            tokens = outcome.estimated_tokens,
            "retrieval complete"
        );

        self.cache.put_query(key, outcome.clone());
        Ok(outcome)
    }

    /// Score one candidate, going through the L2 embedding cache when the
    /// backend has a vector space.
    fn score(
        &self,
        question: &str,
        question_normalized: &str,
        candidate: &DecisionNode,
    ) -> Result<f64> {
        if let Some(version) = self.backend.embedding_version() {
            let query_vec = self.embedding_for(question, question_normalized, version)?;
            let candidate_vec = self.embedding_for(
                &candidate.question,
                &candidate.question_normalized,
                version,
            )?;
            if let (Some(query_vec), Some(candidate_vec)) = (query_vec, candidate_vec) {
                return Ok(clamp_unit(cosine(&query_vec, &candidate_vec)));
            }
        }
        Ok(clamp_unit(
            self.backend.similarity(question, &candidate.question)?,
        ))
    }

    fn embedding_for(
        &self,
        text: &str,
        normalized: &str,
        version: &str,
    ) -> Result<Option<Vec<f32>>> {
        let key = SimilarityCache::embedding_key(normalized, version);
        if let Some(vector) = self.cache.get_embedding(&key) {
            return Ok(Some(vector));
        }
        let Some(vector) = self.backend.embed(text)? else {
            return Ok(None);
        };
        self.cache.put_embedding(key, vector.clone());
        Ok(Some(vector))
    }

    /// Tier the scored candidates and render under the token budget.
    fn render(&self, scored: &[(DecisionNode, f64)]) -> RetrievalOutcome {
        let boundaries = self.config.tier_boundaries;
        let tier_of = |score: f64| {
            if score >= boundaries.strong {
                Tier::Strong
            } else if score >= boundaries.moderate {
                Tier::Moderate
            } else {
                Tier::Brief
            }
        };

        // (tier precedence, score desc) inclusion order
        let mut tiered: Vec<(Tier, &DecisionNode, f64)> = scored
            .iter()
            .map(|(node, score)| (tier_of(*score), node, *score))
            .collect();
        tiered.sort_by(|a, b| {
            a.0.precedence().cmp(&b.0.precedence()).then(
                b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal),
            )
        });

        let mut included: Vec<(Tier, &DecisionNode, f64)> = Vec::new();
        let mut tokens = 0usize;
        for (tier, node, score) in tiered {
            let cost = tier.estimated_tokens();
            if tokens + cost > self.config.context_token_budget {
                break;
            }
            tokens += cost;
            included.push((tier, node, score));
        }

        if included.is_empty() {
            return RetrievalOutcome {
                decisions: scored.to_vec(),
                ..RetrievalOutcome::empty()
            };
        }

        let strong_count = included.iter().filter(|(t, _, _)| *t == Tier::Strong).count();
        let moderate_count = included
            .iter()
            .filter(|(t, _, _)| *t == Tier::Moderate)
            .count();
        let brief_count = included.iter().filter(|(t, _, _)| *t == Tier::Brief).count();

        let mut block = format!(
            "## Relevant past decisions ({} strong, {} moderate, {} brief)\n",
            strong_count, moderate_count, brief_count
        );
        for (tier, node, score) in &included {
            match tier {
                Tier::Strong => {
                    block.push_str(&format!(
                        "\n### {} (similarity {:.2})\n- Outcome: {}\n- Winning option: {}\n- Participants: {}\n- Decided: {}\n",
                        node.question,
                        score,
                        node.consensus_status,
                        node.winning_option.as_deref().unwrap_or("none"),
                        node.participants.join(", "),
                        node.timestamp.format("%Y-%m-%d"),
                    ));
                }
                Tier::Moderate => {
                    block.push_str(&format!(
                        "\n### {} (similarity {:.2})\n- {} -> {}\n",
                        node.question,
                        score,
                        node.consensus_status,
                        node.winning_option.as_deref().unwrap_or("none"),
                    ));
                }
                Tier::Brief => {
                    block.push_str(&format!(
                        "- {} ({}, similarity {:.2})\n",
                        node.question, node.consensus_status, score,
                    ));
                }
            }
        }

        RetrievalOutcome {
            context_block: block,
            decisions: scored.to_vec(),
            strong_count,
            moderate_count,
            brief_count,
            estimated_tokens: tokens,
        }
    }
}
