//! Proposal ordering over pending transactions.
//!
//! Transactions are grouped by sender and consumed nonce-ascending within a
//! sender; across senders the head with the highest fee goes first. When a
//! head transaction is rejected the whole sender is dropped, since its later
//! nonces can no longer apply.

use alioth_types::{Address, Transaction};
use std::collections::{BTreeMap, VecDeque};

/// Fee-and-nonce ordered view of the pending set.
pub struct ProposalOrder {
    by_sender: BTreeMap<Address, VecDeque<Transaction>>,
}

impl ProposalOrder {
    /// Build the order from sender-grouped transactions.
    pub fn new(grouped: BTreeMap<Address, Vec<Transaction>>) -> Self {
        let by_sender = grouped
            .into_iter()
            .filter(|(_, txs)| !txs.is_empty())
            .map(|(sender, mut txs)| {
                txs.sort_by_key(|tx| tx.nonce());
                (sender, txs.into())
            })
            .collect();
        Self { by_sender }
    }

    fn best_sender(&self) -> Option<Address> {
        self.by_sender
            .iter()
            .filter_map(|(sender, queue)| queue.front().map(|tx| (tx.fee(), *sender)))
            // BTreeMap iteration makes the tie-break by sender deterministic.
            .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
            .map(|(_, sender)| sender)
    }

    /// The next transaction to try, highest head fee first.
    pub fn peek(&self) -> Option<&Transaction> {
        let sender = self.best_sender()?;
        self.by_sender.get(&sender).and_then(|queue| queue.front())
    }

    /// Accept the peeked transaction and move to the sender's next nonce.
    pub fn shift(&mut self) {
        if let Some(sender) = self.best_sender() {
            if let Some(queue) = self.by_sender.get_mut(&sender) {
                queue.pop_front();
                if queue.is_empty() {
                    self.by_sender.remove(&sender);
                }
            }
        }
    }

    /// Reject the peeked transaction and drop its sender entirely.
    pub fn pop(&mut self) {
        if let Some(sender) = self.best_sender() {
            self.by_sender.remove(&sender);
        }
    }

    /// Whether any transactions remain.
    pub fn is_empty(&self) -> bool {
        self.by_sender.is_empty()
    }
}
