//! Consensus and convergence detection.
//!
//! Two complementary signals decide when a debate can stop:
//!
//! - **Voting**: structured `VOTE:` markers tallied across rounds with
//!   semantic grouping of near-duplicate options
//! - **Convergence**: round-over-round semantic similarity of each
//!   participant's responses
//!
//! When both are available, voting wins: a decisive tally overrides
//! whatever the similarity classification says.

mod convergence;
mod votes;

pub use convergence::{ConvergenceDetector, ConvergenceInfo, ConvergenceStatus};
pub use votes::{ConsensusClass, RoundVote, VoteAggregator, VotingResult};
