//! Keys, signatures and the leader-election VRF.
//!
//! Committee members sign consensus messages with ed25519. The VRF used to
//! seed leader election is the sign-then-hash construction: the proof is the
//! proposer's deterministic signature over the parent seed, and the new seed
//! is the blake3 digest of that proof. Anyone holding the proposer's public
//! key can verify both.

use crate::{Address, Hash};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use sbor::prelude::BasicSbor;
use std::fmt;

/// An ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// The all-zero key, used as a sentinel for "unset".
    pub const EMPTY: PublicKey = PublicKey([0u8; 32]);

    /// Check whether this is the zero sentinel.
    pub fn is_empty(&self) -> bool {
        *self == PublicKey::EMPTY
    }

    /// Derive the account address: last 20 bytes of blake3(key).
    pub fn address(&self) -> Address {
        let digest = blake3::hash(&self.0);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.as_bytes()[12..]);
        Address(out)
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(message, &sig).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}..", hex::encode(&self.0[..4]))
    }
}

/// A 64-byte ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    /// The all-zero signature, used as a placeholder in unsigned headers.
    pub const EMPTY: Signature = Signature([0u8; 64]);

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sig(0x{}..)", hex::encode(&self.0[..4]))
    }
}

impl std::hash::Hash for Signature {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// A signing keypair.
///
/// Ed25519 signing is deterministic, which the block builder relies on:
/// identical inputs produce byte-identical blocks.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Derive a keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing.sign(message).to_bytes())
    }

    /// The corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key().to_bytes())
    }

    /// The account address of this keypair.
    pub fn address(&self) -> Address {
        self.public_key().address()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .finish()
    }
}

/// Evaluate the VRF over the parent seed.
///
/// Returns `(seed, proof)` for the next header.
pub fn vrf_evaluate(keypair: &KeyPair, parent_seed: &Hash) -> (Hash, Signature) {
    let proof = keypair.sign(parent_seed.as_bytes());
    let seed = Hash::from_bytes(&proof.0);
    (seed, proof)
}

/// Verify a VRF output against the claimed proposer key.
pub fn vrf_verify(key: &PublicKey, parent_seed: &Hash, seed: &Hash, proof: &Signature) -> bool {
    key.verify(parent_seed.as_bytes(), proof) && *seed == Hash::from_bytes(&proof.0)
}
