//! In-memory chain.

use crate::state::{state_root_of, AccountState, Accounts, StateRegistry};
use crate::{MemoryRegisterProcessor, MemoryStateProcessor, TestCommittee};
use alioth_types::{
    Address, Block, BlockHeight, ChainConfig, ChainError, ChainReader, ChainWriter, Committee,
    Difficulty, Hash, Header, ProcessorError, PublicKey, RegisterProcessor, Signature,
    StateProcessor, Verification, BLOCK_VERSION,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

struct ChainInner {
    blocks: Vec<Arc<Block>>,
    by_hash: HashMap<Hash, Arc<Block>>,
    commits: HashMap<u64, Vec<Verification>>,
    fail_next_save: bool,
}

/// In-memory implementation of the chain capability bundle.
///
/// Committees rotate per epoch slot: the committee for slot `s` is
/// `committees[s % committees.len()]`. With a single committee the chain
/// never hands off; with two, every slot boundary is a handoff between
/// them.
pub struct MemoryChain {
    config: ChainConfig,
    committees: Vec<Committee>,
    inner: Mutex<ChainInner>,
    states: StateRegistry,
}

impl MemoryChain {
    /// Create a chain with a genesis block and the given committee rotation.
    ///
    /// `funded` seeds the genesis state with balances.
    pub fn new(
        config: ChainConfig,
        committees: Vec<Committee>,
        funded: &[(Address, i128)],
    ) -> Arc<Self> {
        assert!(!committees.is_empty(), "at least one committee required");

        let mut accounts = Accounts::new();
        for (address, balance) in funded {
            accounts.insert(
                *address,
                AccountState {
                    balance: *balance,
                    nonce: 0,
                },
            );
        }
        let genesis_state_root = state_root_of(&accounts);

        let genesis = Arc::new(Block {
            header: Header {
                version: BLOCK_VERSION,
                height: BlockHeight(0),
                seed: Hash::from_bytes(b"genesis-seed"),
                proof: Signature::EMPTY,
                proposer: PublicKey::EMPTY,
                parent_hash: Hash::ZERO,
                difficulty: Difficulty::BOOTSTRAP,
                timestamp: 0,
                coinbase: Address::EMPTY,
                bloom: Hash::ZERO,
                state_root: genesis_state_root,
                register_root: Hash::from_bytes(b"genesis-register"),
                interlink_root: Hash::ZERO,
                nonce: 0,
            },
            transactions: Vec::new(),
            verifications: Vec::new(),
            interlinks: Vec::new(),
        });

        let states: StateRegistry = Arc::new(Mutex::new(BTreeMap::new()));
        states.lock().insert(genesis_state_root, accounts);

        let mut by_hash = HashMap::new();
        by_hash.insert(genesis.hash(), Arc::clone(&genesis));

        Arc::new(Self {
            config,
            committees,
            inner: Mutex::new(ChainInner {
                blocks: vec![genesis],
                by_hash,
                commits: HashMap::new(),
                fail_next_save: false,
            }),
            states,
        })
    }

    /// Convenience: single committee from a [`TestCommittee`], one funded
    /// account per member.
    pub fn with_committee(config: ChainConfig, committee: &TestCommittee) -> Arc<Self> {
        let funded: Vec<(Address, i128)> = committee
            .addresses()
            .into_iter()
            .map(|a| (a, 1_000_000))
            .collect();
        Self::new(
            config,
            vec![Committee::new(committee.addresses())],
            &funded,
        )
    }

    /// Make the next `save_bft_block` fail, to exercise the retry path.
    pub fn set_fail_next_save(&self) {
        self.inner.lock().fail_next_save = true;
    }

    /// Height of the head block.
    pub fn head_height(&self) -> u64 {
        self.current_block().height()
    }

    fn committee_for_slot(&self, slot: u64) -> Committee {
        self.committees[slot as usize % self.committees.len()].clone()
    }
}

impl ChainReader for MemoryChain {
    fn genesis(&self) -> Arc<Block> {
        Arc::clone(&self.inner.lock().blocks[0])
    }

    fn current_block(&self) -> Arc<Block> {
        let inner = self.inner.lock();
        Arc::clone(inner.blocks.last().expect("chain always has genesis"))
    }

    fn get_block_by_hash(&self, hash: &Hash) -> Option<Arc<Block>> {
        self.inner.lock().by_hash.get(hash).cloned()
    }

    fn get_block_by_number(&self, number: u64) -> Option<Arc<Block>> {
        self.inner.lock().blocks.get(number as usize).cloned()
    }

    fn seen_commits(&self, height: u64) -> Vec<Verification> {
        self.inner
            .lock()
            .commits
            .get(&height)
            .cloned()
            .unwrap_or_default()
    }

    fn is_change_point(&self, block: &Block) -> bool {
        self.config.is_slot_boundary(block.height())
    }

    fn current_verifiers(&self) -> Committee {
        let slot = self.config.slot_of(self.current_block().height());
        self.committee_for_slot(slot)
    }

    fn next_verifiers(&self) -> Committee {
        let slot = self.config.slot_of(self.current_block().height());
        self.committee_for_slot(slot + 1)
    }

    fn verifiers_for(&self, height: u64) -> Committee {
        self.committee_for_slot(self.config.slot_of(height))
    }

    fn build_state_processor(
        &self,
        state_root: &Hash,
    ) -> Result<Box<dyn StateProcessor>, ProcessorError> {
        let accounts = self
            .states
            .lock()
            .get(state_root)
            .cloned()
            .ok_or(ProcessorError::UnknownRoot(*state_root))?;
        Ok(Box::new(MemoryStateProcessor::new(
            accounts,
            Arc::clone(&self.states),
        )))
    }

    fn build_register_processor(
        &self,
        register_root: &Hash,
    ) -> Result<Box<dyn RegisterProcessor>, ProcessorError> {
        Ok(Box::new(MemoryRegisterProcessor::new(*register_root)))
    }

    fn chain_config(&self) -> ChainConfig {
        self.config.clone()
    }
}

impl ChainWriter for MemoryChain {
    fn save_bft_block(&self, block: &Block, commits: &[Verification]) -> Result<(), ChainError> {
        let quorum = self.verifiers_for(block.height()).quorum();
        let mut inner = self.inner.lock();

        if inner.fail_next_save {
            inner.fail_next_save = false;
            return Err(ChainError::Storage("injected failure".into()));
        }

        let head = inner.blocks.last().expect("chain always has genesis");
        if block.height() != head.height() + 1 || block.parent_hash() != head.hash() {
            return Err(ChainError::NotOnHead {
                got: block.height(),
                head: head.height(),
            });
        }
        if commits.len() < quorum {
            return Err(ChainError::ShortCertificate {
                got: commits.len(),
                quorum,
            });
        }

        let block = Arc::new(block.clone());
        inner.by_hash.insert(block.hash(), Arc::clone(&block));
        inner.commits.insert(block.height(), commits.to_vec());
        inner.blocks.push(block);
        Ok(())
    }
}
