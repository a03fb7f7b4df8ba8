//! Node runtime for the Alioth consensus core.
//!
//! Wires the synchronous state machine to the world: a single task owns
//! the machine and drains its event queue in FIFO order, executing the
//! returned actions against the network, the timer manager, the fetcher
//! and the chain writer. Public node methods never run round logic
//! themselves; they enqueue events.

mod config;
mod fetcher;
mod network;
mod node;
mod service;
pub mod telemetry;
mod timers;

pub use config::NodeConfig;
pub use fetcher::Fetcher;
pub use network::NetworkSender;
pub use node::{BftNode, NodeError};
pub use service::ConsensusService;
pub use timers::TimerManager;
