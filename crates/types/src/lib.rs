//! Core types for Alioth consensus.
//!
//! This crate provides the foundational types used throughout the consensus
//! implementation:
//!
//! - **Primitives**: Hash, cryptographic keys and signatures, VRF evaluation
//! - **Identifiers**: Address, BlockHeight
//! - **Consensus types**: Block, Header, Transaction, Verification, Committee
//! - **Capability traits**: ChainReader, ChainWriter, StateProcessor,
//!   RegisterProcessor — the seams the consensus core consumes
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod block;
mod chain;
mod committee;
mod config;
mod crypto;
mod difficulty;
mod hash;
mod identifiers;
mod interlink;
mod transaction;
mod verification;

pub use block::{Block, Header, BLOCK_VERSION};
pub use chain::{
    ChainError, ChainReader, ChainWriter, ProcessorError, RegisterProcessor, StateProcessor,
};
pub use committee::Committee;
pub use config::{BftTimeouts, ChainConfig};
pub use crypto::{vrf_evaluate, vrf_verify, KeyPair, PublicKey, Signature};
pub use difficulty::Difficulty;
pub use hash::{derive_root, Hash};
pub use identifiers::{Address, BlockHeight};
pub use interlink::{interlink_level, next_interlinks};
pub use transaction::{
    group_by_sender, sign_transaction, Transaction, TransactionError, TxBody, Witness,
};
pub use verification::{Verification, VotePhase};

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Create a deterministic keypair from a seed byte.
    pub fn test_keypair(seed: u8) -> KeyPair {
        KeyPair::from_seed(&[seed; 32])
    }

    /// Create a bare block at a height. Roots and signatures are left empty;
    /// suitable wherever only identity and height matter.
    pub fn test_block(height: u64, parent_hash: Hash) -> Block {
        Block {
            header: Header {
                version: BLOCK_VERSION,
                height: BlockHeight(height),
                seed: Hash::from_bytes(&height.to_le_bytes()),
                proof: Signature::EMPTY,
                proposer: PublicKey::EMPTY,
                parent_hash,
                difficulty: Difficulty::BOOTSTRAP,
                timestamp: 0,
                coinbase: Address([0x11; 20]),
                bloom: Hash::ZERO,
                state_root: Hash::ZERO,
                register_root: Hash::ZERO,
                interlink_root: Hash::ZERO,
                nonce: 0,
            },
            transactions: Vec::new(),
            verifications: Vec::new(),
            interlinks: Vec::new(),
        }
    }

    /// Create a signed transfer transaction.
    pub fn test_transaction(signer: &KeyPair, nonce: u64, amount: i128, fee: u128) -> Transaction {
        let body = TxBody {
            nonce,
            recipient: Some(Address([0x22; 20])),
            hash_lock: None,
            time_lock: 0,
            amount,
            fee,
            extra: Vec::new(),
        };
        sign_transaction(body, signer)
    }
}
