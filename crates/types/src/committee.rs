//! Verifier committees.

use crate::Address;

/// An ordered verifier committee.
///
/// Quorum is `2N/3 + 1` members; with `N = 3f + 1` that is the classical
/// `2f + 1`. Proposer rotation walks the member list by `height + round`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Committee {
    members: Vec<Address>,
}

impl Committee {
    /// Create a committee from an ordered member list.
    pub fn new(members: Vec<Address>) -> Self {
        Self { members }
    }

    /// The ordered members.
    pub fn members(&self) -> &[Address] {
        &self.members
    }

    /// Committee size N.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the committee is empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Minimum number of members whose agreement commits a decision.
    pub fn quorum(&self) -> usize {
        self.members.len() * 2 / 3 + 1
    }

    /// Maximum number of tolerated faulty members, f = (N - 1) / 3.
    pub fn max_faulty(&self) -> usize {
        self.members.len().saturating_sub(1) / 3
    }

    /// Whether an address is a member.
    pub fn contains(&self, address: &Address) -> bool {
        self.members.contains(address)
    }

    /// Position of a member in the committee order.
    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.members.iter().position(|m| m == address)
    }

    /// The proposer slot for a height and round.
    pub fn proposer_for(&self, height: u64, round: u64) -> Option<Address> {
        if self.members.is_empty() {
            return None;
        }
        let index = (height.wrapping_add(round)) as usize % self.members.len();
        Some(self.members[index])
    }
}
