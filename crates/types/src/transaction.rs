//! Transactions.
//!
//! A transaction is a sender-signed body plus a witness. Identity is the
//! blake3 digest of the canonical body encoding; the witness signs that
//! digest. The sender is derived from the witness public key after the
//! signature checks out.

use crate::{Address, Hash, KeyPair, PublicKey, Signature};
use sbor::prelude::{basic_encode, BasicSbor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while validating a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// The witness signature does not verify against the body.
    #[error("invalid transaction signature")]
    InvalidSignature,
    /// The amount is negative.
    #[error("negative amount: {0}")]
    NegativeAmount(i128),
}

/// The signed content of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor, Serialize, Deserialize)]
pub struct TxBody {
    /// Sender account nonce.
    pub nonce: u64,
    /// Recipient; `None` for contract-creation style payloads.
    #[serde(rename = "to")]
    pub recipient: Option<Address>,
    /// Optional hash lock for atomic-swap style transfers.
    #[serde(rename = "hashlock")]
    pub hash_lock: Option<Hash>,
    /// Optional time lock (unix seconds, 0 = none).
    #[serde(rename = "timelock")]
    pub time_lock: u64,
    /// Transferred amount. Negative values are rejected at assembly.
    #[serde(rename = "value")]
    pub amount: i128,
    /// Fee paid to the proposer.
    pub fee: u128,
    /// Opaque extra data.
    #[serde(rename = "extradata", with = "hex::serde")]
    pub extra: Vec<u8>,
}

/// The signature side of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Witness {
    /// Signature over the body digest.
    pub signature: Signature,
    /// Signer public key, from which the sender address is derived.
    pub public_key: PublicKey,
}

/// A signed transaction.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Transaction {
    /// Signed content.
    pub body: TxBody,
    /// Signature and signer key.
    pub witness: Witness,
}

impl Transaction {
    /// Content identity: digest of the canonical body encoding.
    pub fn hash(&self) -> Hash {
        let encoded = basic_encode(&self.body).expect("transaction body encoding is infallible");
        Hash::from_bytes(&encoded)
    }

    /// Recover the sender address.
    ///
    /// Verifies the witness signature over the body digest, then derives the
    /// address from the witness key.
    pub fn sender(&self) -> Result<Address, TransactionError> {
        let digest = self.hash();
        if !self
            .witness
            .public_key
            .verify(digest.as_bytes(), &self.witness.signature)
        {
            return Err(TransactionError::InvalidSignature);
        }
        Ok(self.witness.public_key.address())
    }

    /// The fee offered by this transaction.
    pub fn fee(&self) -> u128 {
        self.body.fee
    }

    /// The sender nonce.
    pub fn nonce(&self) -> u64 {
        self.body.nonce
    }
}

/// Sign a transaction body.
pub fn sign_transaction(body: TxBody, keypair: &KeyPair) -> Transaction {
    let encoded = basic_encode(&body).expect("transaction body encoding is infallible");
    let digest = Hash::from_bytes(&encoded);
    let signature = keypair.sign(digest.as_bytes());
    Transaction {
        body,
        witness: Witness {
            signature,
            public_key: keypair.public_key(),
        },
    }
}

/// Group transactions by sender, rejecting those whose signature fails or
/// whose amount is negative.
///
/// Returns the grouped valid transactions and the rejected ones.
pub fn group_by_sender(
    txs: Vec<Transaction>,
) -> (BTreeMap<Address, Vec<Transaction>>, Vec<Transaction>) {
    let mut grouped: BTreeMap<Address, Vec<Transaction>> = BTreeMap::new();
    let mut invalid = Vec::new();
    for tx in txs {
        if tx.body.amount < 0 {
            invalid.push(tx);
            continue;
        }
        match tx.sender() {
            Ok(sender) => grouped.entry(sender).or_default().push(tx),
            Err(_) => invalid.push(tx),
        }
    }
    (grouped, invalid)
}
