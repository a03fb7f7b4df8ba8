//! In-memory account state with a snapshot stack.

use alioth_types::{
    Address, Block, Hash, ProcessorError, RegisterProcessor, StateProcessor, Transaction,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Flat block reward credited to the coinbase.
pub const BLOCK_REWARD: i128 = 20;

/// Balance and nonce of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountState {
    /// Spendable balance.
    pub balance: i128,
    /// Next expected nonce.
    pub nonce: u64,
}

pub(crate) type Accounts = BTreeMap<Address, AccountState>;

/// Shared root -> accounts registry, so processors built later can start
/// from any finalized root.
pub(crate) type StateRegistry = Arc<Mutex<BTreeMap<Hash, Accounts>>>;

/// Deterministic digest of an account map.
pub(crate) fn state_root_of(accounts: &Accounts) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for (address, account) in accounts {
        hasher.update(address.as_bytes());
        hasher.update(&account.balance.to_le_bytes());
        hasher.update(&account.nonce.to_le_bytes());
    }
    Hash::new(*hasher.finalize().as_bytes())
}

/// In-memory [`StateProcessor`] with a clone-based snapshot stack.
pub struct MemoryStateProcessor {
    accounts: Accounts,
    snapshots: Vec<Accounts>,
    registry: StateRegistry,
}

impl MemoryStateProcessor {
    pub(crate) fn new(accounts: Accounts, registry: StateRegistry) -> Self {
        Self {
            accounts,
            snapshots: Vec::new(),
            registry,
        }
    }

    /// Read an account, for assertions.
    pub fn account(&self, address: &Address) -> AccountState {
        self.accounts.get(address).copied().unwrap_or_default()
    }
}

impl StateProcessor for MemoryStateProcessor {
    fn snapshot(&mut self) -> u64 {
        self.snapshots.push(self.accounts.clone());
        self.snapshots.len() as u64 - 1
    }

    fn revert_to_snapshot(&mut self, snapshot: u64) {
        let index = snapshot as usize;
        if index < self.snapshots.len() {
            self.accounts = self.snapshots[index].clone();
            self.snapshots.truncate(index);
        }
    }

    fn process_tx(&mut self, tx: &Transaction, _height: u64) -> Result<(), ProcessorError> {
        if tx.body.amount < 0 {
            return Err(ProcessorError::NegativeAmount);
        }
        let sender = tx.sender().map_err(|_| ProcessorError::InvalidSignature)?;

        let account = self.accounts.entry(sender).or_default();
        if account.nonce != tx.body.nonce {
            return Err(ProcessorError::InvalidNonce {
                sender,
                expected: account.nonce,
                got: tx.body.nonce,
            });
        }
        let need = tx.body.amount + tx.body.fee as i128;
        if account.balance < need {
            return Err(ProcessorError::InsufficientBalance {
                sender,
                need,
                have: account.balance,
            });
        }

        account.balance -= need;
        account.nonce += 1;

        if let Some(recipient) = tx.body.recipient {
            self.accounts.entry(recipient).or_default().balance += tx.body.amount;
        }
        Ok(())
    }

    fn process_except_txs(&mut self, block: &Block) -> Result<(), ProcessorError> {
        // Proposer reward: flat emission plus the fees of the included txs.
        let fees: u128 = block.transactions.iter().map(|tx| tx.body.fee).sum();
        let coinbase = self.accounts.entry(block.header.coinbase).or_default();
        coinbase.balance += BLOCK_REWARD + fees as i128;
        Ok(())
    }

    fn finalise(&mut self) -> Result<Hash, ProcessorError> {
        let root = state_root_of(&self.accounts);
        self.registry.lock().insert(root, self.accounts.clone());
        self.snapshots.clear();
        Ok(root)
    }
}

/// In-memory [`RegisterProcessor`].
///
/// The register root chains the previous root with the processed block's
/// identity-bearing header fields (excluding the register root itself).
pub struct MemoryRegisterProcessor {
    base: Hash,
    pending: Option<Hash>,
}

impl MemoryRegisterProcessor {
    pub(crate) fn new(base: Hash) -> Self {
        Self {
            base,
            pending: None,
        }
    }
}

impl RegisterProcessor for MemoryRegisterProcessor {
    fn process(&mut self, block: &Block) -> Result<(), ProcessorError> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.base.as_bytes());
        hasher.update(block.header.parent_hash.as_bytes());
        hasher.update(&block.header.height.0.to_le_bytes());
        hasher.update(block.header.state_root.as_bytes());
        self.pending = Some(Hash::new(*hasher.finalize().as_bytes()));
        Ok(())
    }

    fn finalise(&mut self) -> Result<Hash, ProcessorError> {
        Ok(self.pending.take().unwrap_or(self.base))
    }
}
