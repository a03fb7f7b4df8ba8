//! Event types for the consensus state machine.

use crate::TimeoutKind;
use alioth_messages::{NewRoundMsg, ProposalMsg};
use alioth_types::{Address, Block, Hash, Verification};
use std::sync::Arc;

/// All possible inputs to the state machine.
///
/// Events are **passive data** - they describe something that happened.
/// The state machine processes events and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Height progression
    // ═══════════════════════════════════════════════════════════════════════
    /// The chain advanced: enter consensus for this height.
    ///
    /// Fed by the node when a block lands on the chain (our own commit or
    /// an externally synced block).
    NewHeight {
        /// The height to enter.
        height: u64,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Network messages
    // ═══════════════════════════════════════════════════════════════════════
    /// A peer announced it entered a round.
    NewRound {
        /// The signed announcement.
        msg: NewRoundMsg,
    },

    /// A proposal arrived for some (height, round).
    Proposal {
        /// The signed proposal.
        msg: ProposalMsg,
    },

    /// A pre-vote arrived. Voter identity comes from the signed attestation.
    PreVote {
        /// The attestation.
        vote: Verification,
    },

    /// A commit vote arrived. Voter identity comes from the signed attestation.
    Vote {
        /// The attestation.
        vote: Verification,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// A phase timer fired.
    ///
    /// Carries the (height, round) it was armed for so the machine can
    /// discard stale expirations after a transition.
    Timeout {
        /// Which phase timed out.
        kind: TimeoutKind,
        /// Height the timer was armed at.
        height: u64,
        /// Round the timer was armed at.
        round: u64,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Block availability
    // ═══════════════════════════════════════════════════════════════════════
    /// The block pool accepted a block for the current height.
    ///
    /// Fired for locally built candidates, gossiped candidates, and fetch
    /// results alike; the machine re-examines any pending proposal.
    BlockArrived {
        /// The block now available.
        block: Arc<Block>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Peer queries (answered via SendTo actions)
    // ═══════════════════════════════════════════════════════════════════════
    /// A peer asked for our round record at (height, round).
    RoundMsgRequested {
        /// The asking peer.
        peer: Address,
        /// Height of interest.
        height: u64,
        /// Round of interest.
        round: u64,
    },

    /// A peer asked for a block we proposed or voted on.
    ///
    /// Only reaches the machine when the block pool missed; the machine
    /// answers from its round records, then from the chain.
    ProposalBlockRequested {
        /// The asking peer.
        peer: Address,
        /// Correlation id of the fetch request.
        msg_id: u64,
        /// Hash of the wanted block.
        block_hash: Hash,
    },
}

impl Event {
    /// Get the event type name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::NewHeight { .. } => "NewHeight",
            Event::NewRound { .. } => "NewRound",
            Event::Proposal { .. } => "Proposal",
            Event::PreVote { .. } => "PreVote",
            Event::Vote { .. } => "Vote",
            Event::Timeout { .. } => "Timeout",
            Event::BlockArrived { .. } => "BlockArrived",
            Event::RoundMsgRequested { .. } => "RoundMsgRequested",
            Event::ProposalBlockRequested { .. } => "ProposalBlockRequested",
        }
    }
}
