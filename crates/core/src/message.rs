//! Outbound message types.

use alioth_messages::{ConsensusMsg, FetchBlockResp, NewRoundMsg, ProposalMsg};
use alioth_types::Verification;

/// The messages the state machine can emit.
///
/// A subset of the full wire set: fetch requests belong to the fetcher and
/// sync announcements to the node, so neither appears here.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Round announcement.
    NewRound(NewRoundMsg),
    /// Block proposal.
    Proposal(ProposalMsg),
    /// Pre-vote.
    PreVote(Verification),
    /// Commit vote.
    Vote(Verification),
    /// Answer to a block fetch that reached the machine.
    FetchBlockResp(Box<FetchBlockResp>),
}

impl OutboundMessage {
    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::NewRound(_) => "NewRound",
            OutboundMessage::Proposal(_) => "Proposal",
            OutboundMessage::PreVote(_) => "PreVote",
            OutboundMessage::Vote(_) => "Vote",
            OutboundMessage::FetchBlockResp(_) => "FetchBlockResp",
        }
    }

    /// Convert into the wire-level tagged message.
    pub fn into_wire(self) -> ConsensusMsg {
        match self {
            OutboundMessage::NewRound(m) => ConsensusMsg::NewRound(m),
            OutboundMessage::Proposal(m) => ConsensusMsg::Proposal(m),
            OutboundMessage::PreVote(m) => ConsensusMsg::PreVote(m),
            OutboundMessage::Vote(m) => ConsensusMsg::Vote(m),
            OutboundMessage::FetchBlockResp(m) => ConsensusMsg::FetchBlockResp(m),
        }
    }
}
