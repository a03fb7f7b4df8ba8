//! Network seam.

use alioth_messages::Envelope;
use alioth_types::Address;

/// Outbound side of the peer transport.
///
/// The transport itself lives outside the consensus core; the runtime only
/// needs these two operations. Implementations must not block: enqueue and
/// return.
pub trait NetworkSender: Send + Sync {
    /// Send an envelope to every committee peer.
    fn broadcast(&self, envelope: Envelope);

    /// Send an envelope to one peer.
    fn send_to(&self, peer: Address, envelope: Envelope);
}
