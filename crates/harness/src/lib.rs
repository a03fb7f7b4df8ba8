//! In-memory chain and state backends.
//!
//! Deterministic implementations of the chain capability traits, used by
//! the integration tests across the workspace. No persistence, no
//! networking; a `MemoryChain` holds the block list, per-root account
//! snapshots, and a slot-based committee rotation.

mod chain;
mod state;

pub use chain::MemoryChain;
pub use state::{AccountState, MemoryRegisterProcessor, MemoryStateProcessor, BLOCK_REWARD};

use alioth_types::{Address, KeyPair};

/// A committee with its signing keys, for tests that need both sides.
#[derive(Clone)]
pub struct TestCommittee {
    keypairs: Vec<KeyPair>,
}

impl TestCommittee {
    /// Create `n` deterministic members seeded from `base_seed`.
    pub fn new(n: usize, base_seed: u8) -> Self {
        let keypairs = (0..n)
            .map(|i| KeyPair::from_seed(&[base_seed.wrapping_add(i as u8); 32]))
            .collect();
        Self { keypairs }
    }

    /// The signing key of a member.
    pub fn keypair(&self, index: usize) -> &KeyPair {
        &self.keypairs[index]
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.keypairs.len()
    }

    /// Whether the committee has no members.
    pub fn is_empty(&self) -> bool {
        self.keypairs.is_empty()
    }

    /// The ordered member addresses.
    pub fn addresses(&self) -> Vec<Address> {
        self.keypairs.iter().map(|k| k.address()).collect()
    }
}
