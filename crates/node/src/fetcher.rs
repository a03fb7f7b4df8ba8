//! Correlated one-shot block retrieval.
//!
//! `fetch_block` sends a `FetchBlockReq` carrying a monotonic `msg_id` and
//! parks the caller on a oneshot waiter until the matching response
//! arrives or the timeout expires. The fetcher is the single ingress for
//! `FetchBlockResp` messages; duplicate, mismatched or late responses are
//! dropped.

use crate::NetworkSender;
use alioth_messages::{ConsensusMsg, FetchBlockReq, FetchBlockResp};
use alioth_types::{Address, Block, Hash};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

struct PendingFetch {
    block_hash: Hash,
    waiter: oneshot::Sender<Option<Block>>,
}

/// Pulls unseen blocks from peers on demand.
pub struct Fetcher {
    network: Arc<dyn NetworkSender>,
    timeout: Duration,
    next_msg_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingFetch>>,
    running: AtomicBool,
}

impl Fetcher {
    /// Create a fetcher sending over the given transport.
    pub fn new(network: Arc<dyn NetworkSender>, timeout: Duration) -> Self {
        Self {
            network,
            timeout,
            next_msg_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Start serving fetches.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Stop serving fetches. In-flight waiters are released by `reset`.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the fetcher serves requests.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of in-flight requests.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Retrieve a block by hash from a peer.
    ///
    /// Blocks the caller until the correlated response arrives or the
    /// timeout expires. The returned block always carries the requested
    /// hash; anything else resolves to `None`.
    pub async fn fetch_block(&self, peer: Address, block_hash: Hash) -> Option<Block> {
        if !self.is_running() {
            return None;
        }

        let msg_id = self.next_msg_id.fetch_add(1, Ordering::SeqCst);
        let (waiter, rx) = oneshot::channel();
        self.pending.lock().insert(
            msg_id,
            PendingFetch {
                block_hash,
                waiter,
            },
        );

        let request = ConsensusMsg::FetchBlockReq(FetchBlockReq { msg_id, block_hash });
        match request.encode() {
            Ok(envelope) => self.network.send_to(peer, envelope),
            Err(err) => {
                warn!(%err, "failed to encode fetch request");
                self.pending.lock().remove(&msg_id);
                return None;
            }
        }

        debug!(msg_id, block = ?block_hash, %peer, "fetch request sent");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(block)) => block,
            // Waiter dropped by reset, or timeout: clean up and give up.
            Ok(Err(_)) => None,
            Err(_) => {
                self.pending.lock().remove(&msg_id);
                trace!(msg_id, block = ?block_hash, "fetch timed out");
                None
            }
        }
    }

    /// Ingress for fetch responses.
    ///
    /// Unknown correlation ids (late or duplicate responses) are dropped.
    /// A present block whose hash does not match the request resolves the
    /// waiter with `None`; the peer could not be serving the right block.
    pub fn on_response(&self, resp: FetchBlockResp) {
        let Some(pending) = self.pending.lock().remove(&resp.msg_id) else {
            trace!(msg_id = resp.msg_id, "uncorrelated fetch response dropped");
            return;
        };

        let block = match resp.block {
            Some(block) if block.hash() == pending.block_hash => Some(block),
            Some(block) => {
                warn!(
                    msg_id = resp.msg_id,
                    wanted = ?pending.block_hash,
                    got = ?block.hash(),
                    "fetch response carries the wrong block"
                );
                None
            }
            // Peer had nothing to serve; the waiter gets a miss.
            None => None,
        };

        let _ = pending.waiter.send(block);
    }

    /// Cancel every pending request; their waiters observe `None`.
    pub fn reset(&self) {
        let drained: Vec<PendingFetch> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, p)| p).collect()
        };
        let count = drained.len();
        for fetch in drained {
            let _ = fetch.waiter.send(None);
        }
        if count > 0 {
            debug!(count, "fetcher reset, waiters released");
        }
    }
}
