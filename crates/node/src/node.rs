//! Node lifecycle and peer message dispatch.

use crate::service::PoolBridge;
use crate::{ConsensusService, Fetcher, NetworkSender, NodeConfig};
use alioth_bft::ConsensusState;
use alioth_core::Event;
use alioth_messages::{ConsensusMsg, Envelope, FetchBlockResp, WireError};
use alioth_pool::BlockPool;
use alioth_types::{Address, BftTimeouts, Block, ChainReader, ChainWriter, Hash, KeyPair};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Node-level failures.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A subcomponent did not come up.
    #[error("{0} failed to start")]
    SubsystemDown(&'static str),
    /// A peer message failed to decode.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// The consensus node: state machine service, block pool and fetcher,
/// plus the committee membership gate that starts and stops them.
pub struct BftNode {
    chain: Arc<dyn ChainReader>,
    writer: Arc<dyn ChainWriter>,
    signer: KeyPair,
    timeouts: BftTimeouts,
    pool: Arc<BlockPool>,
    fetcher: Arc<Fetcher>,
    service: Mutex<Arc<ConsensusService>>,
    bridge: Arc<PoolBridge>,
    network: Arc<dyn NetworkSender>,
    config: NodeConfig,
    sync_workers: Arc<Semaphore>,
}

impl BftNode {
    /// Wire a node together. Nothing runs until [`BftNode::start`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        chain: Arc<dyn ChainReader>,
        writer: Arc<dyn ChainWriter>,
        signer: KeyPair,
        network: Arc<dyn NetworkSender>,
        timeouts: BftTimeouts,
        config: NodeConfig,
    ) -> Arc<Self> {
        let pool = Arc::new(BlockPool::with_capacity(
            chain.current_block().height() + 1,
            config.pool_capacity,
        ));
        pool.restrict_timestamps(chain.chain_config().block_time_restriction);
        let fetcher = Arc::new(Fetcher::new(Arc::clone(&network), config.fetch_timeout));

        let bridge = PoolBridge::new();
        pool.set_observer(bridge.clone());

        let service = Self::spawn_service(
            &chain, &writer, &signer, &timeouts, &pool, &fetcher, &network, &config,
        );
        bridge.attach(Arc::clone(&service));

        Arc::new(Self {
            chain,
            writer,
            signer,
            timeouts,
            pool,
            fetcher,
            service: Mutex::new(service),
            bridge,
            network,
            sync_workers: Arc::new(Semaphore::new(config.max_sync_workers.max(1))),
            config,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_service(
        chain: &Arc<dyn ChainReader>,
        writer: &Arc<dyn ChainWriter>,
        signer: &KeyPair,
        timeouts: &BftTimeouts,
        pool: &Arc<BlockPool>,
        fetcher: &Arc<Fetcher>,
        network: &Arc<dyn NetworkSender>,
        config: &NodeConfig,
    ) -> Arc<ConsensusService> {
        let state = ConsensusState::new(
            Arc::clone(chain),
            Arc::clone(pool),
            signer.clone(),
            timeouts.clone(),
        );
        ConsensusService::spawn(
            state,
            Arc::clone(network),
            Arc::clone(fetcher),
            Arc::clone(pool),
            Arc::clone(writer),
            config.event_queue_depth,
        )
    }

    fn service(&self) -> Arc<ConsensusService> {
        Arc::clone(&self.service.lock())
    }

    /// Whether this node may run consensus right now.
    ///
    /// At a change point the next committee is the one that counts,
    /// otherwise the current one.
    pub fn can_start(&self) -> bool {
        let current = self.chain.current_block();
        let committee = if self.chain.is_change_point(&current) {
            self.chain.next_verifiers()
        } else {
            self.chain.current_verifiers()
        };
        committee.contains(&self.signer.address())
    }

    /// Start the node.
    ///
    /// A node outside the active committee stays stopped and returns `Ok`;
    /// that is the normal state of a non-verifier. A subcomponent that
    /// fails to come up is a real error and is surfaced immediately.
    pub fn start(&self) -> Result<(), NodeError> {
        let head = self.chain.current_block().height();
        if !self.can_start() {
            info!(head, "not an active verifier, consensus stays stopped");
            return Ok(());
        }
        if self.is_running() {
            return Ok(());
        }

        info!(head, address = %self.signer.address(), "starting consensus node");

        // A machine stopped at an earlier handoff is gone; spawn a fresh
        // one, which re-enters at the current head.
        {
            let mut service = self.service.lock();
            if !service.is_running() {
                *service = Self::spawn_service(
                    &self.chain,
                    &self.writer,
                    &self.signer,
                    &self.timeouts,
                    &self.pool,
                    &self.fetcher,
                    &self.network,
                    &self.config,
                );
                self.bridge.attach(Arc::clone(&*service));
            }
        }

        // Pool and fetcher starts are plain flag flips; the service task
        // is the one subsystem that can actually fail to come up.
        self.pool.start();
        self.fetcher.start();

        let service = self.service();
        if !service.is_running() {
            return Err(NodeError::SubsystemDown("consensus service"));
        }

        service.try_send(Event::NewHeight { height: head + 1 });
        Ok(())
    }

    /// Stop the node, release fetch waiters and discard buffered state.
    pub fn stop(&self) {
        let head = self.chain.current_block().height();
        info!(head, "stopping consensus node");
        self.pool.stop();
        self.fetcher.stop();
        self.fetcher.reset();
        self.service().stop();
    }

    /// Whether the subsystems are running.
    pub fn is_running(&self) -> bool {
        self.pool.is_running() && self.fetcher.is_running() && self.service().is_running()
    }

    /// Re-evaluate committee membership after a committee change and start
    /// or stop accordingly.
    pub fn change_primary(&self) -> Result<(), NodeError> {
        if self.can_start() {
            debug!("still / newly a verifier, (re)starting");
            self.start()?;
            let next = self.chain.current_block().height() + 1;
            self.service().try_send(Event::NewHeight { height: next });
            return Ok(());
        }
        debug!("no longer a verifier, stopping");
        self.stop();
        Ok(())
    }

    /// Notification that a block landed on the chain.
    pub fn on_enter_new_height(&self, height: u64) {
        self.service().try_send(Event::NewHeight { height });
    }

    /// A freshly built candidate block awaits verification.
    ///
    /// Pools it and, after a short delay, announces it so verifiers that
    /// missed the gossip can fetch it.
    pub fn on_new_candidate_block(self: &Arc<Self>, block: Arc<Block>) {
        if !self.is_running() {
            debug!("candidate ignored, node not running");
            return;
        }

        let hash = block.hash();
        if let Err(err) = self.pool.add_block(block) {
            info!(%err, "pool rejected candidate");
            return;
        }

        let node = Arc::clone(self);
        tokio::spawn(async move {
            // Give direct gossip a head start before announcing.
            tokio::time::sleep(node.config.sync_block_announce_delay).await;
            match ConsensusMsg::SyncBlock(alioth_messages::SyncBlock { block_hash: hash })
                .encode()
            {
                Ok(envelope) => {
                    debug!(block = ?hash, "announcing candidate block");
                    node.network.broadcast(envelope);
                }
                Err(err) => warn!(%err, "failed to encode announcement"),
            }
        });
    }

    /// Dispatch one inbound peer message.
    ///
    /// Cheap work happens inline; sync-block handling is pushed onto a
    /// bounded worker so the reader never blocks. An unknown message code
    /// is fatal: the caller must close the connection.
    pub async fn on_peer_message(
        self: &Arc<Self>,
        peer: Address,
        envelope: Envelope,
    ) -> Result<(), NodeError> {
        if !self.is_running() {
            debug!("peer message ignored, consensus not running");
            // Still decode so protocol violations close the connection.
            ConsensusMsg::decode(&envelope)?;
            return Ok(());
        }

        let service = self.service();
        match ConsensusMsg::decode(&envelope)? {
            ConsensusMsg::NewRound(msg) => {
                service.send(Event::NewRound { msg }).await;
            }
            ConsensusMsg::Proposal(msg) => {
                service.send(Event::Proposal { msg }).await;
            }
            ConsensusMsg::PreVote(vote) => {
                service.send(Event::PreVote { vote }).await;
            }
            ConsensusMsg::Vote(vote) => {
                service.send(Event::Vote { vote }).await;
            }
            ConsensusMsg::FetchBlockReq(req) => {
                self.serve_fetch_request(peer, req.msg_id, req.block_hash)
                    .await;
            }
            ConsensusMsg::FetchBlockResp(resp) => {
                self.fetcher.on_response(*resp);
            }
            ConsensusMsg::SyncBlock(msg) => {
                self.handle_sync_block(peer, msg.block_hash);
            }
            ConsensusMsg::ReqNewRound(req) => {
                service
                    .send(Event::RoundMsgRequested {
                        peer,
                        height: req.height.0,
                        round: req.round,
                    })
                    .await;
            }
        }
        Ok(())
    }

    /// Answer a fetch request: pool first, then the machine's proposal
    /// records, then the chain. A miss sends nothing; the requester's
    /// fetch times out.
    async fn serve_fetch_request(self: &Arc<Self>, peer: Address, msg_id: u64, block_hash: Hash) {
        match self.pool.get_block_by_hash(&block_hash) {
            Some(block) => {
                let resp = ConsensusMsg::FetchBlockResp(Box::new(FetchBlockResp {
                    msg_id,
                    block: Some((*block).clone()),
                }));
                match resp.encode() {
                    Ok(envelope) => self.network.send_to(peer, envelope),
                    Err(err) => warn!(%err, "failed to encode fetch response"),
                }
            }
            None => {
                // The machine answers from its round records, falling back
                // to the chain for blocks that already committed.
                self.service()
                    .send(Event::ProposalBlockRequested {
                        peer,
                        msg_id,
                        block_hash,
                    })
                    .await;
            }
        }
    }

    /// Handle a candidate announcement on a bounded worker.
    fn handle_sync_block(self: &Arc<Self>, peer: Address, block_hash: Hash) {
        if peer.is_empty() || block_hash.is_zero() {
            warn!("sync announcement with empty fields, ignoring");
            return;
        }

        let Ok(permit) = Arc::clone(&self.sync_workers).try_acquire_owned() else {
            warn!("sync workers saturated, announcement dropped");
            return;
        };

        let node = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;

            // A busy pool means consensus already has candidates; the
            // announcement adds nothing.
            if !node.pool.is_empty() {
                return;
            }
            if node.chain.get_block_by_hash(&block_hash).is_some() {
                return;
            }

            match node.fetcher.fetch_block(peer, block_hash).await {
                Some(block) => {
                    if let Err(err) = node.pool.add_block(Arc::new(block)) {
                        warn!(%err, "announced block not pooled");
                    }
                }
                None => debug!(block = ?block_hash, "announced block fetch failed"),
            }
        });
    }
}
