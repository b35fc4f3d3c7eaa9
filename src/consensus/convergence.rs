//! Round-over-round convergence classification.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::votes::{ConsensusClass, VotingResult};
use crate::config::ConvergenceConfig;
use crate::similarity::{clamp_unit, SimilarityBackend};

/// Rounds whose average similarity moved less than this are "stable"
/// for impasse tracking.
const STABILITY_DELTA: f64 = 0.05;

/// Classification of a round relative to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// Average similarity at or above the semantic threshold.
    Converged,
    /// Between the divergence and semantic thresholds.
    Refining,
    /// Below the divergence threshold.
    Diverging,
    /// Stable but not converged for the configured number of rounds.
    Impasse,
    /// Voting override: every last-round voter landed in one group.
    UnanimousConsensus,
    /// Voting override: a decisive majority emerged.
    MajorityDecision,
    /// Voting override: votes exist but no group is ahead.
    Tie,
}

/// Outcome of one convergence check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceInfo {
    /// Whether the debate should stop on this signal.
    pub detected: bool,
    /// Round at which detection fired, when it did.
    pub detection_round: Option<u32>,
    /// Average per-participant similarity for this round.
    pub final_similarity: f64,
    pub status: ConvergenceStatus,
    pub per_participant_similarity: HashMap<String, f64>,
}

/// Stateful detector; one per deliberation. Accumulates the stability
/// history that impasse classification needs.
pub struct ConvergenceDetector {
    backend: Arc<dyn SimilarityBackend>,
    config: ConvergenceConfig,
    previous_avg: Option<f64>,
    stable_rounds: u32,
}

impl ConvergenceDetector {
    pub fn new(backend: Arc<dyn SimilarityBackend>, config: ConvergenceConfig) -> Self {
        Self {
            backend,
            config,
            previous_avg: None,
            stable_rounds: 0,
        }
    }

    /// Whether checking is allowed at `round_num`. Checks start at round
    /// `min_rounds_before_check + 1` and always need a previous round.
    pub fn check_allowed(&self, round_num: u32) -> bool {
        self.config.enabled
            && round_num >= 2
            && round_num >= self.config.min_rounds_before_check + 1
    }

    /// Classify `round_num` against the previous round.
    ///
    /// `previous` and `current` are (participant id, response text)
    /// pairs; only participants present in both rounds contribute. A
    /// decisive `voting` result overrides the semantic status. Returns
    /// `None` when checking is gated off or no participant appears in
    /// both rounds.
    pub fn check_round(
        &mut self,
        round_num: u32,
        previous: &[(String, String)],
        current: &[(String, String)],
        voting: Option<&VotingResult>,
    ) -> Option<ConvergenceInfo> {
        if !self.check_allowed(round_num) {
            return None;
        }

        let previous_by_id: HashMap<&str, &str> = previous
            .iter()
            .map(|(id, text)| (id.as_str(), text.as_str()))
            .collect();

        let mut per_participant = HashMap::new();
        for (id, text) in current {
            let Some(previous_text) = previous_by_id.get(id.as_str()) else {
                continue;
            };
            match self.backend.similarity(previous_text, text) {
                Ok(score) => {
                    per_participant.insert(id.clone(), clamp_unit(score));
                }
                Err(error) => {
                    warn!(participant = %id, %error, "similarity backend failed; degrading");
                    return None;
                }
            }
        }

        if per_participant.is_empty() {
            return None;
        }

        let avg: f64 = per_participant.values().sum::<f64>() / per_participant.len() as f64;
        let min = per_participant
            .values()
            .copied()
            .fold(f64::INFINITY, f64::min);

        let raw = if avg >= self.config.semantic_similarity_threshold {
            ConvergenceStatus::Converged
        } else if avg < self.config.divergence_threshold {
            ConvergenceStatus::Diverging
        } else {
            ConvergenceStatus::Refining
        };

        // Impasse tracking: count consecutive stable deltas while the raw
        // classification stays short of converged.
        if let Some(previous_avg) = self.previous_avg {
            if (avg - previous_avg).abs() < STABILITY_DELTA {
                self.stable_rounds += 1;
            } else {
                self.stable_rounds = 0;
            }
        }
        self.previous_avg = Some(avg);

        let raw = if raw != ConvergenceStatus::Converged
            && self.stable_rounds >= self.config.consecutive_stable_rounds
        {
            ConvergenceStatus::Impasse
        } else {
            raw
        };

        // Voting precedence: a tally with actual votes replaces the
        // semantic classification.
        let vote_class = voting
            .map(|v| v.consensus)
            .filter(|class| *class != ConsensusClass::NoVotes);
        let status = match vote_class {
            Some(ConsensusClass::UnanimousConsensus) => ConvergenceStatus::UnanimousConsensus,
            Some(ConsensusClass::MajorityDecision) => ConvergenceStatus::MajorityDecision,
            Some(ConsensusClass::Tie) => ConvergenceStatus::Tie,
            _ => raw,
        };

        let detected = matches!(raw, ConvergenceStatus::Converged | ConvergenceStatus::Impasse)
            || matches!(
                vote_class,
                Some(ConsensusClass::UnanimousConsensus) | Some(ConsensusClass::MajorityDecision)
            );

        debug!(
            round = round_num,
            avg_similarity = avg,
            min_similarity = min,
            ?status,
            detected,
            "convergence check"
        );

        Some(ConvergenceInfo {
            detected,
            detection_round: detected.then_some(round_num),
            final_similarity: avg,
            status,
            per_participant_similarity: per_participant,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::votes::{RoundVote, VoteAggregator};
    use crate::error::Result;
    use crate::markers::Vote;
    use crate::similarity::TokenOverlapBackend;

    /// Returns a fixed score for every pair.
    struct FixedBackend(f64);
    impl SimilarityBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn similarity(&self, _: &str, _: &str) -> Result<f64> {
            Ok(self.0)
        }
    }

    fn rounds(texts: &[(&str, &str)]) -> Vec<(String, String)> {
        texts
            .iter()
            .map(|(id, text)| (id.to_string(), text.to_string()))
            .collect()
    }

    fn detector(score: f64) -> ConvergenceDetector {
        ConvergenceDetector::new(Arc::new(FixedBackend(score)), ConvergenceConfig::default())
    }

    #[test]
    fn test_gated_before_min_rounds() {
        let config = ConvergenceConfig {
            min_rounds_before_check: 2,
            ..ConvergenceConfig::default()
        };
        let mut det = ConvergenceDetector::new(Arc::new(FixedBackend(0.9)), config);

        let prev = rounds(&[("a", "x")]);
        let cur = rounds(&[("a", "y")]);
        assert!(det.check_round(2, &prev, &cur, None).is_none());
        assert!(det.check_round(3, &prev, &cur, None).is_some());
    }

    #[test]
    fn test_semantic_threshold_boundary() {
        let prev = rounds(&[("a", "x")]);
        let cur = rounds(&[("a", "y")]);

        let info = detector(0.85).check_round(2, &prev, &cur, None).unwrap();
        assert_eq!(info.status, ConvergenceStatus::Converged);
        assert!(info.detected);

        let info = detector(0.84999).check_round(2, &prev, &cur, None).unwrap();
        assert_eq!(info.status, ConvergenceStatus::Refining);
        assert!(!info.detected);
    }

    #[test]
    fn test_divergence_threshold_boundary() {
        let prev = rounds(&[("a", "x")]);
        let cur = rounds(&[("a", "y")]);

        let info = detector(0.40).check_round(2, &prev, &cur, None).unwrap();
        assert_eq!(info.status, ConvergenceStatus::Refining);

        let info = detector(0.39999).check_round(2, &prev, &cur, None).unwrap();
        assert_eq!(info.status, ConvergenceStatus::Diverging);
    }

    #[test]
    fn test_impasse_after_stable_rounds() {
        // Refining scores that never move: two stable deltas at the
        // default config, so round 4 classifies as impasse.
        let mut det = detector(0.60);
        let prev = rounds(&[("a", "x")]);
        let cur = rounds(&[("a", "y")]);

        let info = det.check_round(2, &prev, &cur, None).unwrap();
        assert_eq!(info.status, ConvergenceStatus::Refining);
        let info = det.check_round(3, &prev, &cur, None).unwrap();
        assert_eq!(info.status, ConvergenceStatus::Refining);
        let info = det.check_round(4, &prev, &cur, None).unwrap();
        assert_eq!(info.status, ConvergenceStatus::Impasse);
        assert!(info.detected);
    }

    #[test]
    fn test_average_across_participants() {
        let backend = Arc::new(TokenOverlapBackend::new());
        let mut det = ConvergenceDetector::new(backend, ConvergenceConfig::default());

        let prev = rounds(&[("a", "alpha beta gamma"), ("b", "one two three")]);
        let cur = rounds(&[("a", "alpha beta gamma"), ("b", "four five six")]);

        let info = det.check_round(2, &prev, &cur, None).unwrap();
        // a scores 1.0, b scores 0.0
        assert!((info.final_similarity - 0.5).abs() < 1e-9);
        assert_eq!(info.per_participant_similarity.len(), 2);
        assert_eq!(info.per_participant_similarity["a"], 1.0);
    }

    #[test]
    fn test_participant_missing_from_either_round_skipped() {
        let mut det = detector(0.9);
        let prev = rounds(&[("a", "x"), ("b", "y")]);
        let cur = rounds(&[("a", "x2"), ("c", "z")]);

        let info = det.check_round(2, &prev, &cur, None).unwrap();
        assert_eq!(info.per_participant_similarity.len(), 1);
        assert!(info.per_participant_similarity.contains_key("a"));
    }

    #[test]
    fn test_voting_overrides_refining() {
        let mut det = detector(0.60);
        let prev = rounds(&[("a", "x"), ("b", "y"), ("c", "z")]);
        let cur = rounds(&[("a", "x2"), ("b", "y2"), ("c", "z2")]);

        let aggregator = VoteAggregator::new(Arc::new(TokenOverlapBackend::new()));
        let vote = |option: &str| Vote {
            option: option.to_string(),
            confidence: 0.9,
            rationale: String::new(),
            continue_debate: true,
        };
        let voting = aggregator.aggregate(&[
            RoundVote::new(2, "a@cli", vote("Option X")),
            RoundVote::new(2, "b@cli", vote("Option X")),
            RoundVote::new(2, "c@cli", vote("Option Y")),
        ]);

        let info = det.check_round(2, &prev, &cur, Some(&voting)).unwrap();
        assert_eq!(info.status, ConvergenceStatus::MajorityDecision);
        assert!(info.detected);
    }

    #[test]
    fn test_vote_tie_overrides_status_but_not_detection() {
        let mut det = detector(0.60);
        let prev = rounds(&[("a", "x"), ("b", "y")]);
        let cur = rounds(&[("a", "x2"), ("b", "y2")]);

        let aggregator = VoteAggregator::new(Arc::new(TokenOverlapBackend::new()));
        let vote = |option: &str| Vote {
            option: option.to_string(),
            confidence: 0.5,
            rationale: String::new(),
            continue_debate: true,
        };
        let voting = aggregator.aggregate(&[
            RoundVote::new(2, "a@cli", vote("Alpha route")),
            RoundVote::new(2, "b@cli", vote("Beta route")),
        ]);

        let info = det.check_round(2, &prev, &cur, Some(&voting)).unwrap();
        assert_eq!(info.status, ConvergenceStatus::Tie);
        assert!(!info.detected);
    }

    #[test]
    fn test_no_votes_leaves_semantic_status() {
        let mut det = detector(0.92);
        let prev = rounds(&[("a", "x")]);
        let cur = rounds(&[("a", "y")]);

        let voting = VotingResult::no_votes();
        let info = det.check_round(2, &prev, &cur, Some(&voting)).unwrap();
        assert_eq!(info.status, ConvergenceStatus::Converged);
    }

    #[test]
    fn test_disabled_config_never_checks() {
        let config = ConvergenceConfig {
            enabled: false,
            ..ConvergenceConfig::default()
        };
        let mut det = ConvergenceDetector::new(Arc::new(FixedBackend(0.99)), config);
        let prev = rounds(&[("a", "x")]);
        let cur = rounds(&[("a", "y")]);
        assert!(det.check_round(5, &prev, &cur, None).is_none());
    }
}
