//! Tagged wire envelope.

use crate::{FetchBlockReq, FetchBlockResp, NewRoundMsg, ProposalMsg, ReqNewRound, SyncBlock};
use alioth_types::Verification;
use sbor::prelude::{basic_decode, basic_encode, BasicSbor};
use thiserror::Error;

/// Wire codes for the closed consensus message set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MsgCode {
    /// Round announcement.
    NewRound = 1,
    /// Block proposal.
    Proposal = 2,
    /// Pre-vote.
    PreVote = 3,
    /// Commit vote.
    Vote = 4,
    /// Block fetch request.
    FetchBlockReq = 5,
    /// Block fetch response.
    FetchBlockResp = 6,
    /// Candidate block announcement.
    SyncBlock = 7,
    /// Round record request.
    ReqNewRound = 8,
}

impl MsgCode {
    /// Decode a wire code.
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1 => Some(MsgCode::NewRound),
            2 => Some(MsgCode::Proposal),
            3 => Some(MsgCode::PreVote),
            4 => Some(MsgCode::Vote),
            5 => Some(MsgCode::FetchBlockReq),
            6 => Some(MsgCode::FetchBlockResp),
            7 => Some(MsgCode::SyncBlock),
            8 => Some(MsgCode::ReqNewRound),
            _ => None,
        }
    }
}

/// Errors crossing the wire boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Code outside the closed set. Fatal: the connection is closed.
    #[error("unknown message code {0}")]
    UnknownCode(u16),
    /// Payload failed to decode for its code.
    #[error("malformed {code:?} payload: {detail}")]
    Malformed {
        /// Code whose payload failed.
        code: MsgCode,
        /// Decoder detail.
        detail: String,
    },
    /// Payload failed to encode.
    #[error("encoding failed: {0}")]
    Encode(String),
}

/// A tagged wire frame: code plus SBOR payload.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Envelope {
    /// Message code.
    pub code: u16,
    /// SBOR-encoded payload for that code.
    pub payload: Vec<u8>,
}

/// A decoded consensus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusMsg {
    /// Code 1.
    NewRound(NewRoundMsg),
    /// Code 2.
    Proposal(ProposalMsg),
    /// Code 3.
    PreVote(Verification),
    /// Code 4.
    Vote(Verification),
    /// Code 5.
    FetchBlockReq(FetchBlockReq),
    /// Code 6.
    FetchBlockResp(Box<FetchBlockResp>),
    /// Code 7.
    SyncBlock(SyncBlock),
    /// Code 8.
    ReqNewRound(ReqNewRound),
}

fn encode_payload<T: sbor::prelude::BasicEncode>(value: &T) -> Result<Vec<u8>, WireError> {
    basic_encode(value).map_err(|e| WireError::Encode(format!("{e:?}")))
}

fn decode_payload<T: sbor::prelude::BasicDecode>(
    code: MsgCode,
    payload: &[u8],
) -> Result<T, WireError> {
    basic_decode(payload).map_err(|e| WireError::Malformed {
        code,
        detail: format!("{e:?}"),
    })
}

impl ConsensusMsg {
    /// The wire code of this message.
    pub fn code(&self) -> MsgCode {
        match self {
            ConsensusMsg::NewRound(_) => MsgCode::NewRound,
            ConsensusMsg::Proposal(_) => MsgCode::Proposal,
            ConsensusMsg::PreVote(_) => MsgCode::PreVote,
            ConsensusMsg::Vote(_) => MsgCode::Vote,
            ConsensusMsg::FetchBlockReq(_) => MsgCode::FetchBlockReq,
            ConsensusMsg::FetchBlockResp(_) => MsgCode::FetchBlockResp,
            ConsensusMsg::SyncBlock(_) => MsgCode::SyncBlock,
            ConsensusMsg::ReqNewRound(_) => MsgCode::ReqNewRound,
        }
    }

    /// Frame this message into an envelope.
    pub fn encode(&self) -> Result<Envelope, WireError> {
        let payload = match self {
            ConsensusMsg::NewRound(m) => encode_payload(m)?,
            ConsensusMsg::Proposal(m) => encode_payload(m)?,
            ConsensusMsg::PreVote(m) => encode_payload(m)?,
            ConsensusMsg::Vote(m) => encode_payload(m)?,
            ConsensusMsg::FetchBlockReq(m) => encode_payload(m)?,
            ConsensusMsg::FetchBlockResp(m) => encode_payload(m.as_ref())?,
            ConsensusMsg::SyncBlock(m) => encode_payload(m)?,
            ConsensusMsg::ReqNewRound(m) => encode_payload(m)?,
        };
        Ok(Envelope {
            code: self.code() as u16,
            payload,
        })
    }

    /// Decode an envelope.
    ///
    /// `Err(WireError::UnknownCode)` is fatal to the connection.
    pub fn decode(envelope: &Envelope) -> Result<Self, WireError> {
        let code =
            MsgCode::from_u16(envelope.code).ok_or(WireError::UnknownCode(envelope.code))?;
        let payload = &envelope.payload;
        Ok(match code {
            MsgCode::NewRound => ConsensusMsg::NewRound(decode_payload(code, payload)?),
            MsgCode::Proposal => ConsensusMsg::Proposal(decode_payload(code, payload)?),
            MsgCode::PreVote => ConsensusMsg::PreVote(decode_payload(code, payload)?),
            MsgCode::Vote => ConsensusMsg::Vote(decode_payload(code, payload)?),
            MsgCode::FetchBlockReq => ConsensusMsg::FetchBlockReq(decode_payload(code, payload)?),
            MsgCode::FetchBlockResp => {
                ConsensusMsg::FetchBlockResp(Box::new(decode_payload(code, payload)?))
            }
            MsgCode::SyncBlock => ConsensusMsg::SyncBlock(decode_payload(code, payload)?),
            MsgCode::ReqNewRound => ConsensusMsg::ReqNewRound(decode_payload(code, payload)?),
        })
    }
}
