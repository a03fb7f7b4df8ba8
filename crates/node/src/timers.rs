//! Timer management for the node runtime.
//!
//! Each phase timer is a tokio task that sleeps and then feeds a
//! `Timeout` event back into the state machine queue. Timers are keyed by
//! phase kind; setting one replaces any pending timer of the same kind.

use alioth_core::{Event, TimeoutKind};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Manages the three phase timers.
pub struct TimerManager {
    timers: HashMap<TimeoutKind, JoinHandle<()>>,
    event_tx: mpsc::Sender<Event>,
}

impl TimerManager {
    /// Create a manager feeding the given event queue.
    pub fn new(event_tx: mpsc::Sender<Event>) -> Self {
        Self {
            timers: HashMap::new(),
            event_tx,
        }
    }

    /// Arm a timer for (kind, height, round).
    ///
    /// An existing timer of the same kind is cancelled first.
    pub fn set_timer(&mut self, kind: TimeoutKind, height: u64, round: u64, duration: Duration) {
        self.cancel_timer(kind);

        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(?kind, height, round, "timer fired");
            let _ = event_tx
                .send(Event::Timeout {
                    kind,
                    height,
                    round,
                })
                .await;
        });

        self.timers.insert(kind, handle);
        debug!(?kind, height, round, ?duration, "timer set");
    }

    /// Cancel a timer. No-op if it does not exist or already fired.
    pub fn cancel_timer(&mut self, kind: TimeoutKind) {
        if let Some(handle) = self.timers.remove(&kind) {
            handle.abort();
            trace!(?kind, "timer cancelled");
        }
    }

    /// Cancel everything. Called during shutdown.
    pub fn cancel_all(&mut self) {
        for (kind, handle) in self.timers.drain() {
            handle.abort();
            trace!(?kind, "timer cancelled (shutdown)");
        }
    }

    /// Number of armed timers.
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
