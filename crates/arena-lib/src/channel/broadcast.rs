//! Off-chain distribution of fresh state proofs to the channel peer.
//!
//! The transport itself (websocket hub, direct connection, ...) is not
//! part of the engine; it plugs in behind this trait and feeds received
//! proofs back through `ChannelManager::process_off_chain`.

use arena_types::{ChannelMetadata, StateProof};
use tracing::debug;

pub trait OffChainBroadcast: Send + Sync {
    /// Distributes a proof that advanced the channel state for the given
    /// reinitialisation.
    fn send_new_state(&self, reinit_id: &[u8], proof: &StateProof);

    /// Updates the set of channel participants the transport should talk
    /// to. Called with empty metadata when the channel leaves the chain.
    fn set_participants(&self, meta: &ChannelMetadata);
}

/// Broadcast sink for daemons running without a peer transport.
#[derive(Default)]
pub struct NullBroadcast;

impl OffChainBroadcast for NullBroadcast {
    fn send_new_state(&self, _reinit_id: &[u8], _proof: &StateProof) {
        debug!("no off-chain transport configured, dropping state broadcast");
    }

    fn set_participants(&self, _meta: &ChannelMetadata) {}
}
