//! Vote tallying with semantic grouping of near-duplicate options.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::markers::Vote;
use crate::similarity::{clamp_unit, SimilarityBackend};

/// Options whose representatives score at or above this merge into one
/// group.
pub const GROUPING_THRESHOLD: f64 = 0.70;

/// One participant's vote in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundVote {
    pub round_num: u32,
    pub participant_id: String,
    pub vote: Vote,
    pub timestamp: DateTime<Utc>,
}

impl RoundVote {
    pub fn new(round_num: u32, participant_id: impl Into<String>, vote: Vote) -> Self {
        Self {
            round_num,
            participant_id: participant_id.into(),
            vote,
            timestamp: Utc::now(),
        }
    }
}

/// How decisively the voters agreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusClass {
    /// A single group holds every vote cast in the last round.
    UnanimousConsensus,
    /// The top group strictly exceeds every other and strictly exceeds
    /// half of last-round voters.
    MajorityDecision,
    /// Votes exist but no group is decisively ahead.
    Tie,
    /// No votes were cast in any round.
    NoVotes,
}

impl ConsensusClass {
    /// Whether this class counts as consensus.
    pub fn is_consensus(self) -> bool {
        matches!(self, Self::UnanimousConsensus | Self::MajorityDecision)
    }
}

/// Aggregated voting outcome across all rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingResult {
    /// (group representative, vote count), count desc then first-seen.
    pub final_tally: Vec<(String, usize)>,
    /// All votes, grouped by round ascending, participants lexicographic.
    pub votes_by_round: Vec<Vec<RoundVote>>,
    pub consensus_reached: bool,
    pub winning_option: Option<String>,
    pub consensus: ConsensusClass,
}

impl VotingResult {
    /// A result representing a debate where nobody voted.
    pub fn no_votes() -> Self {
        Self {
            final_tally: Vec::new(),
            votes_by_round: Vec::new(),
            consensus_reached: false,
            winning_option: None,
            consensus: ConsensusClass::NoVotes,
        }
    }
}

/// Builds a `VotingResult` from the full sequence of round votes.
pub struct VoteAggregator {
    backend: Arc<dyn SimilarityBackend>,
    grouping_threshold: f64,
}

impl VoteAggregator {
    pub fn new(backend: Arc<dyn SimilarityBackend>) -> Self {
        Self {
            backend,
            grouping_threshold: GROUPING_THRESHOLD,
        }
    }

    /// Override the grouping threshold (tests and tuning).
    pub fn with_grouping_threshold(mut self, threshold: f64) -> Self {
        self.grouping_threshold = threshold;
        self
    }

    /// Tally all votes. When a participant cast several votes within one
    /// round, the last one counts.
    pub fn aggregate(&self, votes: &[RoundVote]) -> VotingResult {
        if votes.is_empty() {
            return VotingResult::no_votes();
        }

        // Last vote per (round, participant) wins.
        let mut deduped: HashMap<(u32, &str), &RoundVote> = HashMap::new();
        for vote in votes {
            deduped.insert((vote.round_num, vote.participant_id.as_str()), vote);
        }
        let mut effective: Vec<&RoundVote> = deduped.into_values().collect();
        effective.sort_by(|a, b| {
            (a.round_num, a.participant_id.as_str()).cmp(&(b.round_num, b.participant_id.as_str()))
        });

        // Greedy grouping over distinct options in first-seen order; the
        // representative is the first member.
        let mut groups: Vec<String> = Vec::new();
        let mut group_of: HashMap<String, usize> = HashMap::new();
        for vote in &effective {
            let option = vote.vote.option.as_str();
            if group_of.contains_key(option) {
                continue;
            }
            let joined = groups.iter().position(|representative| {
                match self.backend.similarity(representative, option) {
                    Ok(score) => clamp_unit(score) >= self.grouping_threshold,
                    Err(error) => {
                        warn!(%error, "similarity failed during vote grouping");
                        false
                    }
                }
            });
            let index = match joined {
                Some(index) => index,
                None => {
                    groups.push(option.to_string());
                    groups.len() - 1
                }
            };
            group_of.insert(option.to_string(), index);
        }

        // Vote counts sum within a group.
        let mut counts = vec![0usize; groups.len()];
        for vote in &effective {
            counts[group_of[&vote.vote.option]] += 1;
        }

        let mut order: Vec<usize> = (0..groups.len()).collect();
        order.sort_by(|&a, &b| counts[b].cmp(&counts[a]).then(a.cmp(&b)));
        let final_tally: Vec<(String, usize)> = order
            .iter()
            .map(|&i| (groups[i].clone(), counts[i]))
            .collect();

        // Classification over the final tally; the unanimity test and the
        // half-threshold denominator look only at last-round voters.
        let last_round = effective.iter().map(|v| v.round_num).max().unwrap_or(0);
        let last_round_votes: Vec<&&RoundVote> = effective
            .iter()
            .filter(|v| v.round_num == last_round)
            .collect();
        let last_round_voters = last_round_votes.len();

        let mut last_round_groups: Vec<usize> = last_round_votes
            .iter()
            .map(|v| group_of[&v.vote.option])
            .collect();
        last_round_groups.sort_unstable();
        last_round_groups.dedup();

        let consensus = if !last_round_votes.is_empty() && last_round_groups.len() == 1 {
            ConsensusClass::UnanimousConsensus
        } else {
            let top = final_tally.first().map(|(_, count)| *count).unwrap_or(0);
            let strictly_ahead = final_tally.iter().skip(1).all(|(_, count)| top > *count);
            if strictly_ahead && (top as f64) > (last_round_voters as f64) / 2.0 {
                ConsensusClass::MajorityDecision
            } else {
                ConsensusClass::Tie
            }
        };

        let winning_option = match consensus {
            ConsensusClass::UnanimousConsensus => {
                Some(groups[last_round_groups[0]].clone())
            }
            ConsensusClass::MajorityDecision => {
                final_tally.first().map(|(option, _)| option.clone())
            }
            _ => None,
        };

        let mut votes_by_round: Vec<Vec<RoundVote>> = Vec::new();
        for vote in &effective {
            match votes_by_round.last_mut() {
                Some(bucket) if bucket[0].round_num == vote.round_num => {
                    bucket.push((*vote).clone())
                }
                _ => votes_by_round.push(vec![(*vote).clone()]),
            }
        }

        VotingResult {
            final_tally,
            votes_by_round,
            consensus_reached: consensus.is_consensus(),
            winning_option,
            consensus,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::TokenOverlapBackend;
    use pretty_assertions::assert_eq;

    fn aggregator() -> VoteAggregator {
        VoteAggregator::new(Arc::new(TokenOverlapBackend::new()))
    }

    fn vote(option: &str) -> Vote {
        Vote {
            option: option.to_string(),
            confidence: 0.9,
            rationale: "because".to_string(),
            continue_debate: true,
        }
    }

    #[test]
    fn test_no_votes_anywhere() {
        let result = aggregator().aggregate(&[]);
        assert_eq!(result.consensus, ConsensusClass::NoVotes);
        assert!(!result.consensus_reached);
        assert!(result.winning_option.is_none());
        assert!(result.final_tally.is_empty());
    }

    #[test]
    fn test_unanimous_single_round() {
        let votes = vec![
            RoundVote::new(1, "a@cli", vote("Option A")),
            RoundVote::new(1, "b@cli", vote("Option A")),
            RoundVote::new(1, "c@cli", vote("Option A")),
        ];
        let result = aggregator().aggregate(&votes);
        assert_eq!(result.consensus, ConsensusClass::UnanimousConsensus);
        assert!(result.consensus_reached);
        assert_eq!(result.winning_option.as_deref(), Some("Option A"));
        assert_eq!(result.final_tally, vec![("Option A".to_string(), 3)]);
    }

    #[test]
    fn test_majority_decision() {
        let votes = vec![
            RoundVote::new(2, "a@cli", vote("Option X")),
            RoundVote::new(2, "b@cli", vote("Option X")),
            RoundVote::new(2, "c@cli", vote("Option Y")),
        ];
        let result = aggregator().aggregate(&votes);
        assert_eq!(result.consensus, ConsensusClass::MajorityDecision);
        assert!(result.consensus_reached);
        assert_eq!(result.winning_option.as_deref(), Some("Option X"));
    }

    #[test]
    fn test_tie_no_winner() {
        let votes = vec![
            RoundVote::new(1, "a@cli", vote("Alpha route")),
            RoundVote::new(1, "b@cli", vote("Beta route")),
        ];
        // "Alpha route" vs "Beta route" share one of three tokens (0.33),
        // below the 0.70 grouping threshold.
        let result = aggregator().aggregate(&votes);
        assert_eq!(result.consensus, ConsensusClass::Tie);
        assert!(!result.consensus_reached);
        assert!(result.winning_option.is_none());
    }

    #[test]
    fn test_semantic_grouping_merges_similar_options() {
        let votes = vec![
            RoundVote::new(1, "a@cli", vote("Self-documenting code")),
            RoundVote::new(1, "b@cli", vote("Prioritize self-documenting code")),
            RoundVote::new(1, "c@cli", vote("Unit tests")),
        ];
        // Jaccard("self documenting code", "prioritize self documenting code")
        // = 3/4 >= 0.70, so the first two merge under the first-seen name.
        let result = aggregator().aggregate(&votes);
        assert_eq!(
            result.final_tally,
            vec![
                ("Self-documenting code".to_string(), 2),
                ("Unit tests".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_grouping_idempotent_on_canonical_names() {
        let votes = vec![
            RoundVote::new(1, "a@cli", vote("Self-documenting code")),
            RoundVote::new(1, "b@cli", vote("Unit tests")),
        ];
        let result = aggregator().aggregate(&votes);
        let names: Vec<String> = result
            .final_tally
            .iter()
            .map(|(option, _)| option.clone())
            .collect();

        // Re-vote using the canonical names: no further merging.
        let votes_again = vec![
            RoundVote::new(1, "a@cli", vote(&names[0])),
            RoundVote::new(1, "b@cli", vote(&names[1])),
        ];
        let again = aggregator().aggregate(&votes_again);
        assert_eq!(again.final_tally.len(), result.final_tally.len());
    }

    #[test]
    fn test_boundary_exactly_at_grouping_threshold() {
        struct FixedBackend(f64);
        impl SimilarityBackend for FixedBackend {
            fn name(&self) -> &'static str {
                "fixed"
            }
            fn similarity(&self, _: &str, _: &str) -> crate::error::Result<f64> {
                Ok(self.0)
            }
        }

        let at = VoteAggregator::new(Arc::new(FixedBackend(0.70)));
        let votes = vec![
            RoundVote::new(1, "a@cli", vote("one")),
            RoundVote::new(1, "b@cli", vote("two")),
        ];
        assert_eq!(at.aggregate(&votes).final_tally.len(), 1);

        let below = VoteAggregator::new(Arc::new(FixedBackend(0.69999)));
        assert_eq!(below.aggregate(&votes).final_tally.len(), 2);
    }

    #[test]
    fn test_last_vote_per_round_participant_wins() {
        let votes = vec![
            RoundVote::new(1, "a@cli", vote("First thought")),
            RoundVote::new(1, "a@cli", vote("Final answer")),
            RoundVote::new(1, "b@cli", vote("Final answer")),
        ];
        let result = aggregator().aggregate(&votes);
        assert_eq!(result.final_tally, vec![("Final answer".to_string(), 2)]);
        assert_eq!(result.consensus, ConsensusClass::UnanimousConsensus);
    }

    #[test]
    fn test_missing_last_round_participant_not_counted_against() {
        // Two voters in round 2 agree; a third participant only voted in
        // round 1 and does not block unanimity.
        let votes = vec![
            RoundVote::new(1, "c@cli", vote("Old idea")),
            RoundVote::new(2, "a@cli", vote("New idea")),
            RoundVote::new(2, "b@cli", vote("New idea")),
        ];
        let result = aggregator().aggregate(&votes);
        assert_eq!(result.consensus, ConsensusClass::UnanimousConsensus);
        assert_eq!(result.winning_option.as_deref(), Some("New idea"));
    }

    #[test]
    fn test_tally_ordering_count_desc_then_first_seen() {
        let votes = vec![
            RoundVote::new(1, "a@cli", vote("Zebra plan")),
            RoundVote::new(1, "b@cli", vote("Apple plan")),
            RoundVote::new(2, "a@cli", vote("Zebra plan")),
            RoundVote::new(2, "b@cli", vote("Apple plan")),
        ];
        // Equal counts: first-seen order breaks the tie, not lexicographic.
        let result = aggregator().aggregate(&votes);
        assert_eq!(
            result.final_tally,
            vec![
                ("Zebra plan".to_string(), 2),
                ("Apple plan".to_string(), 2),
            ]
        );
    }

    #[test]
    fn test_votes_by_round_structure() {
        let votes = vec![
            RoundVote::new(2, "b@cli", vote("B")),
            RoundVote::new(1, "a@cli", vote("A")),
            RoundVote::new(2, "a@cli", vote("B")),
        ];
        let result = aggregator().aggregate(&votes);
        assert_eq!(result.votes_by_round.len(), 2);
        assert_eq!(result.votes_by_round[0][0].round_num, 1);
        assert_eq!(result.votes_by_round[1].len(), 2);
        assert_eq!(result.votes_by_round[1][0].participant_id, "a@cli");
    }

    #[test]
    fn test_tally_sum_never_exceeds_votes_cast() {
        let votes = vec![
            RoundVote::new(1, "a@cli", vote("X")),
            RoundVote::new(1, "b@cli", vote("Y")),
            RoundVote::new(2, "a@cli", vote("X")),
        ];
        let result = aggregator().aggregate(&votes);
        let total: usize = result.final_tally.iter().map(|(_, count)| count).sum();
        assert!(total <= votes.len());
        assert_eq!(total, 3);
    }
}
