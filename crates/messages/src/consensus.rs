//! Round and proposal announcements.

use alioth_types::{Address, BlockHeight, Hash, KeyPair, PublicKey, Signature};
use sbor::prelude::BasicSbor;

/// Announcement that the sender entered a round.
///
/// Broadcast on every round advance past round 0 and returned in response
/// to [`crate::ReqNewRound`] so lagging peers can re-enter the round.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct NewRoundMsg {
    /// Height the sender is at.
    pub height: BlockHeight,
    /// Round the sender entered.
    pub round: u64,
    /// Sender public key.
    pub public_key: PublicKey,
    /// Signature over the announcement.
    pub signature: Signature,
}

impl NewRoundMsg {
    /// Create and sign an announcement.
    pub fn sign(height: u64, round: u64, keypair: &KeyPair) -> Self {
        let message = Self::signing_message(height, round);
        Self {
            height: BlockHeight(height),
            round,
            public_key: keypair.public_key(),
            signature: keypair.sign(&message),
        }
    }

    fn signing_message(height: u64, round: u64) -> Vec<u8> {
        let mut message = Vec::with_capacity(26);
        message.extend_from_slice(b"newround:");
        message.extend_from_slice(&height.to_le_bytes());
        message.extend_from_slice(&round.to_le_bytes());
        message
    }

    /// The announcing verifier's address.
    pub fn sender(&self) -> Address {
        self.public_key.address()
    }

    /// Verify the signature.
    pub fn verify(&self) -> bool {
        let message = Self::signing_message(self.height.0, self.round);
        self.public_key.verify(&message, &self.signature)
    }
}

/// A block proposal for one (height, round).
///
/// Carries only the block id; the block body moves through the pool and the
/// fetcher.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ProposalMsg {
    /// Proposal height.
    pub height: BlockHeight,
    /// Proposal round.
    pub round: u64,
    /// Identity of the proposed block.
    pub block_id: Hash,
    /// Proposer public key; must match the rotation slot.
    pub public_key: PublicKey,
    /// Proposer signature.
    pub signature: Signature,
}

impl ProposalMsg {
    /// Create and sign a proposal.
    pub fn sign(height: u64, round: u64, block_id: Hash, keypair: &KeyPair) -> Self {
        let message = Self::signing_message(height, round, &block_id);
        Self {
            height: BlockHeight(height),
            round,
            block_id,
            public_key: keypair.public_key(),
            signature: keypair.sign(&message),
        }
    }

    fn signing_message(height: u64, round: u64, block_id: &Hash) -> Vec<u8> {
        let mut message = Vec::with_capacity(57);
        message.extend_from_slice(b"proposal:");
        message.extend_from_slice(&height.to_le_bytes());
        message.extend_from_slice(&round.to_le_bytes());
        message.extend_from_slice(block_id.as_bytes());
        message
    }

    /// The proposer's address.
    pub fn proposer(&self) -> Address {
        self.public_key.address()
    }

    /// Verify the signature.
    pub fn verify(&self) -> bool {
        let message = Self::signing_message(self.height.0, self.round, &self.block_id);
        self.public_key.verify(&message, &self.signature)
    }
}
