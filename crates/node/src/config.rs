//! Node runtime configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime knobs for the node wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// How long a block fetch waits for its response.
    pub fetch_timeout: Duration,
    /// Pause between accepting a candidate block and announcing it.
    ///
    /// Heuristic: gives direct gossip of the block a head start so most
    /// peers already hold it when the announcement lands.
    pub sync_block_announce_delay: Duration,
    /// Maximum concurrent sync-block handlers. Excess announcements are
    /// dropped rather than blocking the message reader.
    pub max_sync_workers: usize,
    /// Candidate block pool capacity.
    pub pool_capacity: usize,
    /// Depth of the state machine event queue.
    pub event_queue_depth: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(3),
            sync_block_announce_delay: Duration::from_millis(500),
            max_sync_workers: 8,
            pool_capacity: 32,
            event_queue_depth: 256,
        }
    }
}
