//! Block retrieval and sync messages.

use alioth_types::{Block, BlockHeight, Hash};
use sbor::prelude::BasicSbor;

/// Request for a block by hash, correlated by `msg_id`.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct FetchBlockReq {
    /// Monotonic request id; the response echoes it back.
    pub msg_id: u64,
    /// Hash of the wanted block.
    pub block_hash: Hash,
}

/// Response to a [`FetchBlockReq`].
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct FetchBlockResp {
    /// Echoed request id.
    pub msg_id: u64,
    /// The requested block, if the responder had it.
    pub block: Option<Block>,
}

/// Announcement that the sender holds a candidate block.
///
/// Receivers missing the block fetch it from the announcer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct SyncBlock {
    /// Hash of the announced block.
    pub block_hash: Hash,
}

/// Request for a peer's round record at (height, round).
///
/// Answered with a `NewRound` message when the peer holds one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct ReqNewRound {
    /// Height of interest.
    pub height: BlockHeight,
    /// Round of interest.
    pub round: u64,
}
