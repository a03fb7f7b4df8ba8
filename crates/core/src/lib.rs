//! Core contract for the Alioth consensus architecture.
//!
//! - [`Event`]: all possible inputs to the state machine
//! - [`Action`]: all possible outputs from the state machine
//! - [`OutboundMessage`]: the messages the state machine can emit
//!
//! # Architecture
//!
//! The consensus core is built on a simple event-driven model:
//!
//! ```text
//! Events → ConsensusState::handle() → Actions
//! ```
//!
//! The state machine is:
//! - **Synchronous**: no async, no .await
//! - **Deterministic**: same state + event = same actions
//! - **Pure-ish**: mutates self, but performs no I/O
//!
//! All I/O is handled by the node runtime, which delivers events in FIFO
//! order, executes the returned actions, and converts action results back
//! into events.

mod action;
mod event;
mod message;

pub use action::Action;
pub use event::Event;
pub use message::OutboundMessage;

/// The round phases that run on a timer.
///
/// Doubles as the timer identifier: setting a timer for a kind replaces
/// any pending timer of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutKind {
    /// Waiting for a proposal.
    Propose,
    /// Waiting for pre-vote quorum.
    PreVote,
    /// Waiting for vote quorum.
    PreCommit,
}
