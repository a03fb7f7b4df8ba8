//! Block assembly.
//!
//! The builder produces the next block for a given parent: it orders the
//! pending transactions, applies them through a state processor with
//! snapshot/revert rollback for rejects, carries the parent's commit
//! certificate, and finalizes the state, register and interlink
//! commitments before searching a nonce for the difficulty target.

mod build;
mod order;

pub use build::{BlockBuilder, BuildError, BUILD_FUTURE_OFFSET, BUILD_NOW_OFFSET};
pub use order::ProposalOrder;
