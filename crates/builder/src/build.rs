//! The block builder.

use crate::ProposalOrder;
use alioth_types::{
    derive_root, group_by_sender, next_interlinks, vrf_evaluate, Block, BlockHeight, ChainReader,
    Difficulty, Hash, Header, KeyPair, ProcessorError, Transaction, Verification,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Timestamp offset for blocks built for immediate proposal.
pub const BUILD_NOW_OFFSET: Duration = Duration::from_secs(3);

/// Timestamp offset for blocks built ahead of time.
pub const BUILD_FUTURE_OFFSET: Duration = Duration::from_secs(41);

/// Fatal builder failures.
///
/// Configuration faults abort the whole invocation; individual transaction
/// rejects are recovered by snapshot revert and land on the invalid list
/// instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The proposer key derives the empty address.
    #[error("coinbase address is empty")]
    EmptyCoinbase,
    /// No verifications of the parent were supplied past genesis.
    #[error("no verifications for height {0}")]
    MissingVerifications(u64),
    /// The state or register processor failed outside the per-tx loop.
    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

/// Assembles the next block for a given parent.
pub struct BlockBuilder {
    chain: Arc<dyn ChainReader>,
    parent: Arc<Block>,
    signer: KeyPair,
    pending: Vec<Transaction>,
    verifications: Vec<Verification>,
    invalid: Vec<Transaction>,
}

impl BlockBuilder {
    /// Create a builder over a parent block.
    pub fn new(
        chain: Arc<dyn ChainReader>,
        parent: Arc<Block>,
        signer: KeyPair,
        pending: Vec<Transaction>,
        verifications: Vec<Verification>,
    ) -> Self {
        Self {
            chain,
            parent,
            signer,
            pending,
            verifications,
            invalid: Vec::new(),
        }
    }

    /// Replace the parent block.
    pub fn set_parent(&mut self, parent: Arc<Block>) {
        self.parent = parent;
    }

    /// Replace the pending transaction set.
    pub fn set_pending(&mut self, pending: Vec<Transaction>) {
        self.pending = pending;
    }

    /// Replace the verifications of the parent.
    pub fn set_verifications(&mut self, verifications: Vec<Verification>) {
        self.verifications = verifications;
    }

    /// Transactions rejected by previous invocations.
    pub fn invalid_txs(&self) -> &[Transaction] {
        &self.invalid
    }

    /// Forget accumulated rejects.
    pub fn clear_invalid(&mut self) {
        self.invalid.clear();
    }

    /// Build a block stamped a few seconds ahead of now.
    pub fn build(&mut self) -> Result<Block, BuildError> {
        self.build_at(wall_clock_nanos(BUILD_NOW_OFFSET))
    }

    /// Build a block stamped well into the future.
    pub fn build_future(&mut self) -> Result<Block, BuildError> {
        self.build_at(wall_clock_nanos(BUILD_FUTURE_OFFSET))
    }

    /// Build a block with an explicit header timestamp.
    ///
    /// Everything else being equal, two invocations with the same timestamp
    /// produce byte-identical blocks.
    pub fn build_at(&mut self, timestamp: u64) -> Result<Block, BuildError> {
        let coinbase = self.signer.address();
        if coinbase.is_empty() {
            return Err(BuildError::EmptyCoinbase);
        }

        let parent = Arc::clone(&self.parent);
        let height = parent.height() + 1;

        if self.verifications.is_empty() && parent.height() > 0 {
            return Err(BuildError::MissingVerifications(height));
        }

        let (seed, proof) = vrf_evaluate(&self.signer, &parent.seed());

        let mut header = Header {
            version: parent.header.version,
            height: BlockHeight(height),
            seed,
            proof,
            proposer: self.signer.public_key(),
            parent_hash: parent.hash(),
            difficulty: self.difficulty_for_child(),
            timestamp,
            coinbase,
            bloom: Hash::ZERO,
            state_root: Hash::ZERO,
            register_root: Hash::ZERO,
            interlink_root: Hash::ZERO,
            nonce: 0,
        };

        // Partition the pending set; signature and amount rejects go
        // straight to the invalid list.
        let (grouped, rejected) = group_by_sender(self.pending.clone());
        if !rejected.is_empty() {
            debug!(count = rejected.len(), "rejected transactions before ordering");
            self.invalid.extend(rejected);
        }

        let mut processor = self.chain.build_state_processor(&parent.header.state_root)?;

        // Fee-ordered apply loop. A reject reverts to the pre-tx snapshot
        // and drops the sender's remaining nonces.
        let mut accepted = Vec::new();
        let mut order = ProposalOrder::new(grouped);
        while let Some(tx) = order.peek() {
            let tx = tx.clone();
            let snapshot = processor.snapshot();
            match processor.process_tx(&tx, height) {
                Ok(()) => {
                    accepted.push(tx);
                    order.shift();
                }
                Err(err) => {
                    processor.revert_to_snapshot(snapshot);
                    debug!(tx = ?tx.hash(), %err, "transaction not processable");
                    self.invalid.push(tx);
                    order.pop();
                }
            }
        }

        header.bloom = derive_root(&accepted.iter().map(|tx| tx.hash()).collect::<Vec<_>>());

        let interlinks = next_interlinks(
            self.chain.genesis().hash(),
            parent.hash(),
            &parent.interlinks,
        );
        header.interlink_root = derive_root(&interlinks);

        let mut block = Block {
            header,
            transactions: accepted,
            verifications: self.verifications.clone(),
            interlinks,
        };

        // Reward, register and economy effects, then the state root.
        if let Err(err) = processor.process_except_txs(&block) {
            warn!(%err, "process state except txs failed");
            return Err(err.into());
        }
        block.header.state_root = processor.finalise()?;

        let mut register = self
            .chain
            .build_register_processor(&parent.header.register_root)?;
        if let Err(err) = register.process(&block) {
            warn!(%err, "process register failed");
            return Err(err.into());
        }
        block.header.register_root = register.finalise()?;

        Self::seal_nonce(&mut block);

        info!(
            height,
            block = ?block.hash(),
            transactions = block.transactions.len(),
            invalid = self.invalid.len(),
            "built block"
        );
        Ok(block)
    }

    /// Parent difficulty, or the bootstrap value when the parent carries none.
    fn difficulty_for_child(&self) -> Difficulty {
        if self.parent.difficulty().is_zero() {
            Difficulty::BOOTSTRAP
        } else {
            self.parent.difficulty()
        }
    }

    /// Find the smallest nonce whose header hash meets the difficulty.
    fn seal_nonce(block: &mut Block) {
        let difficulty = block.header.difficulty;
        let mut nonce = 0u64;
        loop {
            block.header.nonce = nonce;
            if difficulty.is_met_by(&block.header.hash()) {
                return;
            }
            nonce += 1;
        }
    }
}

fn wall_clock_nanos(offset: Duration) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    (now + offset).as_nanos() as u64
}
