//! Per-phase vote tallies.

use alioth_types::{Address, Hash, Verification};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Result of offering a vote to a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Counted.
    Added,
    /// Same voter, same target: first message wins, this one is discarded.
    Duplicate,
    /// Same voter, different target: Byzantine. The voter is removed from
    /// the tally and both messages are retained as evidence.
    Equivocation,
}

/// Votes for one (height, round, phase), keyed by voter.
///
/// A voter contributes at most one target; equivocators contribute nothing.
#[derive(Debug, Default)]
pub struct VoteSet {
    votes: HashMap<Address, Verification>,
    equivocators: HashSet<Address>,
    evidence: Vec<(Verification, Verification)>,
}

impl VoteSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a vote. The caller has already checked signature, committee
    /// membership and (height, round, phase) addressing.
    pub fn add(&mut self, vote: Verification) -> VoteOutcome {
        let voter = vote.voter();

        if self.equivocators.contains(&voter) {
            return VoteOutcome::Equivocation;
        }

        match self.votes.get(&voter) {
            None => {
                self.votes.insert(voter, vote);
                VoteOutcome::Added
            }
            Some(existing) if existing.block_id == vote.block_id => VoteOutcome::Duplicate,
            Some(existing) => {
                warn!(
                    voter = %voter,
                    first = ?existing.block_id,
                    second = ?vote.block_id,
                    height = existing.height.0,
                    round = existing.round,
                    "equivocation detected, voter removed from tally"
                );
                let existing = existing.clone();
                self.votes.remove(&voter);
                self.equivocators.insert(voter);
                self.evidence.push((existing, vote));
                VoteOutcome::Equivocation
            }
        }
    }

    /// Number of counted voters.
    pub fn total(&self) -> usize {
        self.votes.len()
    }

    /// Votes for one target (`None` counts nil votes).
    pub fn count_for(&self, target: Option<&Hash>) -> usize {
        self.votes
            .values()
            .filter(|v| v.block_id.as_ref() == target)
            .count()
    }

    /// The target holding at least `quorum` votes, if any.
    ///
    /// `Some(Some(hash))` is a block quorum, `Some(None)` a nil quorum.
    pub fn quorum_target(&self, quorum: usize) -> Option<Option<Hash>> {
        let mut tallies: HashMap<Option<Hash>, usize> = HashMap::new();
        for vote in self.votes.values() {
            *tallies.entry(vote.block_id).or_insert(0) += 1;
        }
        tallies
            .into_iter()
            .find(|(_, count)| *count >= quorum)
            .map(|(target, _)| target)
    }

    /// All counted votes for a target, e.g. to assemble a commit certificate.
    pub fn votes_for(&self, target: Option<&Hash>) -> Vec<Verification> {
        self.votes
            .values()
            .filter(|v| v.block_id.as_ref() == target)
            .cloned()
            .collect()
    }

    /// Whether a voter is already counted or marked equivocating.
    pub fn has_voted(&self, voter: &Address) -> bool {
        self.votes.contains_key(voter) || self.equivocators.contains(voter)
    }

    /// Retained equivocation evidence, as (first, conflicting) pairs.
    pub fn evidence(&self) -> &[(Verification, Verification)] {
        &self.evidence
    }
}
