//! The state machine task.
//!
//! One tokio task owns the [`ConsensusState`] and drains its event queue
//! in FIFO order. Every public method enqueues; round logic runs only on
//! the task. Actions are executed right after each `handle` call:
//! broadcasts and timer operations inline, fetches on spawned tasks so
//! the loop never parks on a peer.

use crate::{Fetcher, NetworkSender, TimerManager};
use alioth_bft::ConsensusState;
use alioth_core::{Action, Event};
use alioth_pool::{BlockPool, PoolObserver};
use alioth_types::{Block, ChainWriter};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to the running state machine task.
pub struct ConsensusService {
    event_tx: mpsc::Sender<Event>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConsensusService {
    /// Spawn the service around a state machine.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        state: ConsensusState,
        network: Arc<dyn NetworkSender>,
        fetcher: Arc<Fetcher>,
        pool: Arc<BlockPool>,
        writer: Arc<dyn ChainWriter>,
        queue_depth: usize,
    ) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel(queue_depth.max(1));
        let running = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(run_loop(
            state,
            event_rx,
            event_tx.clone(),
            network,
            fetcher,
            pool,
            writer,
        ));

        Arc::new(Self {
            event_tx,
            running,
            task: Mutex::new(Some(task)),
        })
    }

    /// Enqueue an event, waiting for queue space.
    pub async fn send(&self, event: Event) {
        if !self.is_running() {
            return;
        }
        if self.event_tx.send(event).await.is_err() {
            warn!("consensus service queue closed");
        }
    }

    /// Enqueue an event from a synchronous context.
    ///
    /// Drops the event with a warning when the queue is full; consensus
    /// recovers through round timeouts.
    pub fn try_send(&self, event: Event) {
        if !self.is_running() {
            return;
        }
        if let Err(err) = self.event_tx.try_send(event) {
            warn!(%err, "consensus event dropped");
        }
    }

    /// Whether the task is alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the task. Buffered events are discarded.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
            info!("consensus service stopped");
        }
    }
}

impl Drop for ConsensusService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bridges pool insertions into the event queue.
pub(crate) struct PoolBridge {
    service: Mutex<Option<Arc<ConsensusService>>>,
}

impl PoolBridge {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            service: Mutex::new(None),
        })
    }

    pub(crate) fn attach(&self, service: Arc<ConsensusService>) {
        *self.service.lock() = Some(service);
    }
}

impl PoolObserver for PoolBridge {
    fn block_added(&self, block: Arc<Block>) {
        let service = self.service.lock().clone();
        if let Some(service) = service {
            service.try_send(Event::BlockArrived { block });
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    mut state: ConsensusState,
    mut event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    network: Arc<dyn NetworkSender>,
    fetcher: Arc<Fetcher>,
    pool: Arc<BlockPool>,
    writer: Arc<dyn ChainWriter>,
) {
    let mut timers = TimerManager::new(event_tx.clone());

    while let Some(event) = event_rx.recv().await {
        let actions = state.handle(event);
        for action in actions {
            execute(
                action, &mut timers, &event_tx, &network, &fetcher, &pool, &writer,
            );
        }
    }
    debug!("consensus service loop ended");
}

fn execute(
    action: Action,
    timers: &mut TimerManager,
    event_tx: &mpsc::Sender<Event>,
    network: &Arc<dyn NetworkSender>,
    fetcher: &Arc<Fetcher>,
    pool: &Arc<BlockPool>,
    writer: &Arc<dyn ChainWriter>,
) {
    match action {
        Action::Broadcast { message } => match message.into_wire().encode() {
            Ok(envelope) => network.broadcast(envelope),
            Err(err) => warn!(%err, "failed to encode broadcast"),
        },
        Action::SendTo { peer, message } => match message.into_wire().encode() {
            Ok(envelope) => network.send_to(peer, envelope),
            Err(err) => warn!(%err, "failed to encode reply"),
        },
        Action::SetTimer {
            kind,
            height,
            round,
            duration,
        } => timers.set_timer(kind, height, round, duration),
        Action::CancelTimer { kind } => timers.cancel_timer(kind),
        Action::FetchBlock { peer, block_hash } => {
            // Off the loop: the fetch parks on its waiter. The pool insert
            // re-enters the machine as BlockArrived via the pool observer.
            let fetcher = Arc::clone(fetcher);
            let pool = Arc::clone(pool);
            tokio::spawn(async move {
                match fetcher.fetch_block(peer, block_hash).await {
                    Some(block) => {
                        if let Err(err) = pool.add_block(Arc::new(block)) {
                            debug!(%err, "fetched block not pooled");
                        }
                    }
                    None => debug!(block = ?block_hash, "fetch returned nothing"),
                }
            });
        }
        Action::PersistBlock { block, commits } => {
            let height = block.height();
            match writer.save_bft_block(&block, &commits) {
                Ok(()) => {
                    info!(height, block = ?block.hash(), "block persisted");
                    if event_tx
                        .try_send(Event::NewHeight { height: height + 1 })
                        .is_err()
                    {
                        warn!("failed to enqueue next height");
                    }
                }
                // The round times out and retries; nothing else to do here.
                Err(err) => warn!(height, %err, "persisting block failed"),
            }
        }
    }
}
