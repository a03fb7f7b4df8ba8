//! BFT consensus state machine.
//!
//! This crate implements the per-height round state machine as a
//! synchronous, event-driven model: events in, actions out, no I/O.
//!
//! # Protocol
//!
//! Each height runs rounds of `Propose → PreVote → PreCommit → Commit`:
//!
//! - The proposer slot for (height, round) rotates through the committee.
//! - A valid proposal draws pre-votes; 2f+1 pre-votes for one block lock
//!   it and draw commit votes; 2f+1 commit votes for one block commit it
//!   together with those votes as its certificate.
//! - Any phase timing out without quorum advances the round; timeouts grow
//!   with the round number.
//!
//! # Safety
//!
//! - **Voting discipline**: one pre-vote and one commit vote per round, and
//!   a locked validator pre-votes only its locked block until a later lock
//!   replaces it.
//! - **First message wins**: a voter's second message in the same phase is
//!   discarded; a conflicting one marks the voter as equivocating, removes
//!   it from every tally, and retains both messages as evidence.
//! - **Quorum intersection**: two 2f+1 quorums overlap in an honest
//!   validator, so conflicting blocks cannot both commit at one height.

mod round;
mod state;
mod vote_set;

pub use round::{RoundRecord, RoundStep};
pub use state::ConsensusState;
pub use vote_set::{VoteOutcome, VoteSet};
