//! Per-round records.

use crate::VoteSet;
use alioth_messages::ProposalMsg;
use alioth_types::Block;
use std::sync::Arc;

/// The phases of one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RoundStep {
    /// Round entered, nothing done yet.
    NewRound,
    /// Waiting for (or holding) a proposal.
    Propose,
    /// Pre-vote sent, collecting pre-votes.
    PreVote,
    /// Commit vote sent, collecting votes.
    PreCommit,
    /// Commit emitted for this round.
    Commit,
}

/// Everything the machine tracks for one (height, round).
///
/// Records exist for the current round and for future rounds whose
/// messages arrived early; entering a round evaluates whatever its record
/// already holds.
#[derive(Debug)]
pub struct RoundRecord {
    /// The round number.
    pub round: u64,
    /// Current phase.
    pub step: RoundStep,
    /// The accepted proposal, at most one.
    pub proposal: Option<ProposalMsg>,
    /// The proposed block, once available.
    pub proposal_block: Option<Arc<Block>>,
    /// A validated proposal whose block is still being fetched.
    pub pending_proposal: Option<ProposalMsg>,
    /// Pre-vote tally.
    pub prevotes: VoteSet,
    /// Commit-vote tally.
    pub votes: VoteSet,
    /// Whether our pre-vote went out this round.
    pub prevote_sent: bool,
    /// Whether our commit vote went out this round.
    pub vote_sent: bool,
    /// Whether this round already emitted a commit.
    pub commit_emitted: bool,
}

impl RoundRecord {
    /// Create an empty record for a round.
    pub fn new(round: u64) -> Self {
        Self {
            round,
            step: RoundStep::NewRound,
            proposal: None,
            proposal_block: None,
            pending_proposal: None,
            prevotes: VoteSet::new(),
            votes: VoteSet::new(),
            prevote_sent: false,
            vote_sent: false,
            commit_emitted: false,
        }
    }
}
