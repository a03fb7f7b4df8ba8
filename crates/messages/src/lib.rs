//! Network messages for the consensus protocol.
//!
//! Every message travels as a tagged [`Envelope`]: a `u16` code plus an
//! SBOR-encoded payload. The eight codes form a closed set; an unknown code
//! is a fatal decode error and the node drops the connection.

mod consensus;
mod envelope;
mod fetch;

pub use consensus::{NewRoundMsg, ProposalMsg};
pub use envelope::{ConsensusMsg, Envelope, MsgCode, WireError};
pub use fetch::{FetchBlockReq, FetchBlockResp, ReqNewRound, SyncBlock};

// Pre-vote and vote payloads are plain signed attestations.
pub use alioth_types::Verification;
