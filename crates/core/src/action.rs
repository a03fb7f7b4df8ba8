//! Action types for the consensus state machine.

use crate::{OutboundMessage, TimeoutKind};
use alioth_types::{Address, Block, Hash, Verification};
use std::sync::Arc;
use std::time::Duration;

/// Actions the state machine wants performed.
///
/// Actions are **commands** - they describe something to do. The node
/// runtime executes them and feeds results back as events.
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Broadcast a message to the committee.
    Broadcast {
        /// The message to send.
        message: OutboundMessage,
    },

    /// Send a message to a single peer.
    SendTo {
        /// The destination verifier.
        peer: Address,
        /// The message to send.
        message: OutboundMessage,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Arm a phase timer. Replaces any pending timer of the same kind.
    SetTimer {
        /// Phase to time out.
        kind: TimeoutKind,
        /// Height the timer is armed at.
        height: u64,
        /// Round the timer is armed at.
        round: u64,
        /// Expiry delay.
        duration: Duration,
    },

    /// Cancel a pending phase timer, if any.
    CancelTimer {
        /// Phase whose timer to cancel.
        kind: TimeoutKind,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Block retrieval
    // ═══════════════════════════════════════════════════════════════════════
    /// Pull an unseen block from a peer.
    ///
    /// The runtime drives the fetcher; a successful fetch lands the block
    /// in the pool, which re-enters the machine as `Event::BlockArrived`.
    FetchBlock {
        /// Peer expected to hold the block (the proposal sender).
        peer: Address,
        /// Hash of the wanted block.
        block_hash: Hash,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Persistence
    // ═══════════════════════════════════════════════════════════════════════
    /// Commit: persist a block with its 2f+1 commit votes.
    ///
    /// The runtime calls the chain writer. On success it feeds
    /// `Event::NewHeight(height + 1)`; on failure it logs and lets the
    /// round time out, which retries the commit.
    PersistBlock {
        /// The decided block.
        block: Arc<Block>,
        /// The commit certificate.
        commits: Vec<Verification>,
    },
}

impl Action {
    /// Get the action type name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Broadcast { .. } => "Broadcast",
            Action::SendTo { .. } => "SendTo",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::FetchBlock { .. } => "FetchBlock",
            Action::PersistBlock { .. } => "PersistBlock",
        }
    }

    /// Check if this action requires async I/O.
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            Action::Broadcast { .. }
                | Action::SendTo { .. }
                | Action::FetchBlock { .. }
                | Action::PersistBlock { .. }
        )
    }
}
