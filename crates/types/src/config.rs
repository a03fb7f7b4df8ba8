//! Chain and consensus configuration.

use crate::Difficulty;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chain-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Header format version.
    pub version: u32,
    /// Blocks per committee epoch.
    pub slot_size: u64,
    /// Committee size N.
    pub verifier_number: usize,
    /// Epochs a verifier stake remains locked after deregistration.
    pub stake_lock_slot: u64,
    /// Epochs between a committee's election and its activation.
    pub slot_margin: u64,
    /// Maximum clock skew accepted in a header timestamp.
    pub block_time_restriction: Duration,
    /// Difficulty ceiling.
    pub main_pow_limit: Difficulty,
    /// Target inter-block time.
    pub block_generate: Duration,
    /// Blocks per difficulty adjustment window.
    pub block_count_of_period: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            version: 0,
            slot_size: 110,
            verifier_number: 22,
            stake_lock_slot: 4,
            slot_margin: 2,
            block_time_restriction: Duration::from_secs(15),
            main_pow_limit: Difficulty::POW_LIMIT,
            block_generate: Duration::from_secs(13),
            block_count_of_period: 4096,
        }
    }
}

impl ChainConfig {
    /// The epoch slot a height belongs to.
    pub fn slot_of(&self, height: u64) -> u64 {
        height / self.slot_size
    }

    /// Whether a height is the last of its epoch.
    pub fn is_slot_boundary(&self, height: u64) -> bool {
        height % self.slot_size == self.slot_size - 1
    }
}

/// Per-phase round timeouts.
///
/// Each timeout grows linearly with the round number so that slow rounds
/// eventually give every honest proposer enough time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BftTimeouts {
    /// Base wait for a proposal before pre-voting nil.
    pub propose: Duration,
    /// Base wait for pre-vote quorum before voting nil.
    pub prevote: Duration,
    /// Base wait for vote quorum before advancing the round.
    pub precommit: Duration,
    /// Added to each base per elapsed round.
    pub round_delta: Duration,
}

impl Default for BftTimeouts {
    fn default() -> Self {
        Self {
            propose: Duration::from_secs(3),
            prevote: Duration::from_secs(2),
            precommit: Duration::from_secs(2),
            round_delta: Duration::from_millis(500),
        }
    }
}

impl BftTimeouts {
    /// Propose timeout for a round.
    pub fn propose_for(&self, round: u64) -> Duration {
        self.propose + self.round_delta * round.min(u32::MAX as u64) as u32
    }

    /// Pre-vote timeout for a round.
    pub fn prevote_for(&self, round: u64) -> Duration {
        self.prevote + self.round_delta * round.min(u32::MAX as u64) as u32
    }

    /// Pre-commit timeout for a round.
    pub fn precommit_for(&self, round: u64) -> Duration {
        self.precommit + self.round_delta * round.min(u32::MAX as u64) as u32
    }
}
