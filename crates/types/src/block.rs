//! Blocks and headers.

use crate::{
    Address, BlockHeight, Difficulty, Hash, PublicKey, Signature, Transaction, Verification,
};
use sbor::prelude::{basic_encode, BasicSbor};
use std::fmt;

/// Current header version.
pub const BLOCK_VERSION: u32 = 0;

/// Block header. The block hash is the digest of the canonical header
/// encoding, so every field below is commitment-bearing.
#[derive(Clone, PartialEq, Eq, BasicSbor)]
pub struct Header {
    /// Header format version.
    pub version: u32,
    /// Height, strictly parent height + 1.
    pub height: BlockHeight,
    /// VRF output over the parent seed.
    pub seed: Hash,
    /// VRF proof: the proposer's signature over the parent seed.
    pub proof: Signature,
    /// Proposer public key.
    pub proposer: PublicKey,
    /// Hash of the parent block.
    pub parent_hash: Hash,
    /// Compact difficulty bits.
    pub difficulty: Difficulty,
    /// Creation time, unix nanoseconds.
    pub timestamp: u64,
    /// Fee recipient.
    pub coinbase: Address,
    /// Digest of the transaction bloom filter (filter internals live
    /// outside the consensus core).
    pub bloom: Hash,
    /// State trie root after applying this block.
    pub state_root: Hash,
    /// Register trie root after applying this block.
    pub register_root: Hash,
    /// Merkle root of the interlink list.
    pub interlink_root: Hash,
    /// Nonce satisfying the difficulty target.
    pub nonce: u64,
}

impl Header {
    /// The header digest; doubles as the block identity.
    pub fn hash(&self) -> Hash {
        let encoded = basic_encode(self).expect("header encoding is infallible");
        Hash::from_bytes(&encoded)
    }

    /// Whether this is the genesis header.
    pub fn is_genesis(&self) -> bool {
        self.height.0 == 0
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("height", &self.height)
            .field("hash", &self.hash())
            .field("parent", &self.parent_hash)
            .field("proposer", &self.proposer)
            .finish()
    }
}

/// A full block: header, payload, and the commit certificate of the parent.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Block {
    /// Block header.
    pub header: Header,
    /// Ordered transactions.
    pub transactions: Vec<Transaction>,
    /// Commit votes for the parent block. At least quorum-many are required
    /// for every block past genesis.
    pub verifications: Vec<Verification>,
    /// Interlink list: skiplist commitments over ancestor hashes.
    pub interlinks: Vec<Hash>,
}

impl Block {
    /// The block identity (header digest).
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Block height.
    pub fn height(&self) -> u64 {
        self.header.height.0
    }

    /// Parent block hash.
    pub fn parent_hash(&self) -> Hash {
        self.header.parent_hash
    }

    /// VRF seed of this block.
    pub fn seed(&self) -> Hash {
        self.header.seed
    }

    /// Difficulty carried by this block.
    pub fn difficulty(&self) -> Difficulty {
        self.header.difficulty
    }

    /// Whether this is the genesis block.
    pub fn is_genesis(&self) -> bool {
        self.header.is_genesis()
    }
}
