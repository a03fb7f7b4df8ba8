//! Vote attestations.
//!
//! A `Verification` is a committee member's signed statement that a given
//! (height, round, block id) reached a phase of agreement. PreVote and Vote
//! wire messages carry one, and the 2f+1 commit votes stored with a block
//! form its commit certificate. The phase is part of the signed message so
//! a pre-vote can never be replayed as a commit vote.

use crate::{Address, BlockHeight, Hash, KeyPair, PublicKey, Signature};
use sbor::prelude::BasicSbor;
use std::fmt;

/// The voting phase an attestation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub enum VotePhase {
    /// First voting round: pre-vote.
    PreVote,
    /// Second voting round: the commit vote.
    Commit,
}

impl VotePhase {
    fn domain_tag(&self) -> &'static [u8] {
        match self {
            VotePhase::PreVote => b"prevote:",
            VotePhase::Commit => b"vote:",
        }
    }
}

/// A signed vote attestation.
#[derive(Clone, PartialEq, Eq, BasicSbor)]
pub struct Verification {
    /// Height being voted at.
    pub height: BlockHeight,
    /// Round being voted at.
    pub round: u64,
    /// Phase of the vote.
    pub phase: VotePhase,
    /// Target block, `None` for a nil vote.
    pub block_id: Option<Hash>,
    /// Voter public key; the voter address derives from it.
    pub public_key: PublicKey,
    /// Signature over the domain-separated vote message.
    pub signature: Signature,
}

impl Verification {
    /// Create and sign a vote.
    pub fn sign(
        height: u64,
        round: u64,
        phase: VotePhase,
        block_id: Option<Hash>,
        keypair: &KeyPair,
    ) -> Self {
        let message = Self::vote_message(height, round, phase, block_id.as_ref());
        Self {
            height: BlockHeight(height),
            round,
            phase,
            block_id,
            public_key: keypair.public_key(),
            signature: keypair.sign(&message),
        }
    }

    /// The canonical bytes a voter signs.
    ///
    /// Domain tag, height, round and target are all bound into the message
    /// so votes cannot be replayed across phases, rounds or targets.
    pub fn vote_message(
        height: u64,
        round: u64,
        phase: VotePhase,
        block_id: Option<&Hash>,
    ) -> Vec<u8> {
        let mut message = Vec::with_capacity(64);
        message.extend_from_slice(phase.domain_tag());
        message.extend_from_slice(&height.to_le_bytes());
        message.extend_from_slice(&round.to_le_bytes());
        match block_id {
            Some(hash) => message.extend_from_slice(hash.as_bytes()),
            None => message.extend_from_slice(Hash::ZERO.as_bytes()),
        }
        message
    }

    /// The voter's address.
    pub fn voter(&self) -> Address {
        self.public_key.address()
    }

    /// Verify the signature.
    pub fn verify(&self) -> bool {
        let message =
            Self::vote_message(self.height.0, self.round, self.phase, self.block_id.as_ref());
        self.public_key.verify(&message, &self.signature)
    }
}

impl fmt::Debug for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verification")
            .field("height", &self.height)
            .field("round", &self.round)
            .field("phase", &self.phase)
            .field("block_id", &self.block_id)
            .field("voter", &self.voter())
            .finish()
    }
}
