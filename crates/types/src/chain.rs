//! Chain capability traits.
//!
//! The consensus core does not care how the chain is implemented; it
//! consumes a small set of capability records. `ChainReader` is the
//! read-only view shared by the state machine and the builder,
//! `ChainWriter` is the single commit path, and the two processor traits
//! wrap state application behind snapshot/revert semantics.

use crate::{Block, ChainConfig, Committee, Hash, Header, Transaction, Verification};
use std::sync::Arc;
use thiserror::Error;

/// Errors from the state and register processors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessorError {
    /// No state exists for the requested root.
    #[error("unknown state root {0}")]
    UnknownRoot(Hash),
    /// Nonce does not match the sender account.
    #[error("invalid nonce for {sender}: expected {expected}, got {got}")]
    InvalidNonce {
        /// Sender whose nonce mismatched.
        sender: crate::Address,
        /// Expected account nonce.
        expected: u64,
        /// Nonce carried by the transaction.
        got: u64,
    },
    /// Sender balance cannot cover amount + fee.
    #[error("insufficient balance for {sender}: need {need}, have {have}")]
    InsufficientBalance {
        /// Sender whose balance fell short.
        sender: crate::Address,
        /// Required amount.
        need: i128,
        /// Available balance.
        have: i128,
    },
    /// Witness signature failed.
    #[error("invalid transaction signature")]
    InvalidSignature,
    /// Amount is negative.
    #[error("negative amount")]
    NegativeAmount,
    /// Backend failure.
    #[error("state storage: {0}")]
    Storage(String),
}

/// Errors from the chain writer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The block does not extend the current head.
    #[error("block at height {got} does not extend head at height {head}")]
    NotOnHead {
        /// Height of the offered block.
        got: u64,
        /// Current head height.
        head: u64,
    },
    /// The commit certificate is short of quorum.
    #[error("commit certificate has {got} votes, quorum is {quorum}")]
    ShortCertificate {
        /// Votes present.
        got: usize,
        /// Required quorum.
        quorum: usize,
    },
    /// Backend failure.
    #[error("chain storage: {0}")]
    Storage(String),
}

/// Applies transactions to a state snapshot.
///
/// A processor is built on a state root, mutated through `process_tx` and
/// `process_except_txs`, and finalized into a new root. Snapshots form a
/// stack: `snapshot` pushes, `revert_to_snapshot` pops back to a handle.
/// Both are O(1) so the builder can roll back each rejected transaction.
pub trait StateProcessor: Send {
    /// Take a snapshot and return its handle.
    fn snapshot(&mut self) -> u64;

    /// Revert to a previously taken snapshot.
    fn revert_to_snapshot(&mut self, snapshot: u64);

    /// Apply one transaction at the given height.
    fn process_tx(&mut self, tx: &Transaction, height: u64) -> Result<(), ProcessorError>;

    /// Apply everything but the transactions: proposer reward, register
    /// and economy effects derived from the block.
    fn process_except_txs(&mut self, block: &Block) -> Result<(), ProcessorError>;

    /// Finalize into the resulting state root.
    fn finalise(&mut self) -> Result<Hash, ProcessorError>;
}

/// Applies a block's register (stake bookkeeping) changes.
pub trait RegisterProcessor: Send {
    /// Apply the block's register changes.
    fn process(&mut self, block: &Block) -> Result<(), ProcessorError>;

    /// Finalize into the resulting register root.
    fn finalise(&mut self) -> Result<Hash, ProcessorError>;
}

/// Read-only view of the chain.
pub trait ChainReader: Send + Sync {
    /// The genesis block.
    fn genesis(&self) -> Arc<Block>;

    /// The current head block.
    fn current_block(&self) -> Arc<Block>;

    /// The current head header.
    fn current_header(&self) -> Header {
        self.current_block().header.clone()
    }

    /// Look up an ancestor by hash.
    fn get_block_by_hash(&self, hash: &Hash) -> Option<Arc<Block>>;

    /// Look up an ancestor by height.
    fn get_block_by_number(&self, number: u64) -> Option<Arc<Block>>;

    /// The commit votes stored with the block at a height.
    fn seen_commits(&self, height: u64) -> Vec<Verification>;

    /// Whether the given block is the last of its committee epoch.
    fn is_change_point(&self, block: &Block) -> bool;

    /// The committee active for the current epoch.
    fn current_verifiers(&self) -> Committee;

    /// The committee that takes over at the next change point.
    fn next_verifiers(&self) -> Committee;

    /// The committee that votes at the given height.
    fn verifiers_for(&self, height: u64) -> Committee;

    /// Build a state processor on a state root.
    fn build_state_processor(&self, state_root: &Hash)
        -> Result<Box<dyn StateProcessor>, ProcessorError>;

    /// Build a register processor on a register root.
    fn build_register_processor(
        &self,
        register_root: &Hash,
    ) -> Result<Box<dyn RegisterProcessor>, ProcessorError>;

    /// The chain configuration.
    fn chain_config(&self) -> ChainConfig;
}

/// The single commit path.
pub trait ChainWriter: Send + Sync {
    /// Persist a block together with its commit certificate.
    ///
    /// Atomic: on success `current_block` reflects the new head and its
    /// certificate; on failure nothing is visible.
    fn save_bft_block(&self, block: &Block, commits: &[Verification]) -> Result<(), ChainError>;
}
