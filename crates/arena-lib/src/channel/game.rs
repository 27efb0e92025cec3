//! The game-side integration hooks of a channel daemon.

use crate::channel::rules::{BoardMove, ParsedBoardState};
use crate::channel::sender::MoveSender;
use arena_types::{proof_to_base64, Hash256, StateProof};
use serde_json::json;

/// Hooks through which the channel manager involves the game in decisions
/// that go beyond pure board rules. Implementations are injected into the
/// manager and must never call back into it; anything they want to happen
/// on chain goes through the provided [`MoveSender`].
pub trait ChannelGame: Send + Sync {
    /// If the game dictates a deterministic move for the current state
    /// (which is known to be our turn), returns it. The manager applies it
    /// like a local move and asks again until this returns `None`.
    fn maybe_auto_move(&self, state: &dyn ParsedBoardState) -> Option<BoardMove>;

    /// Called after every state update with the latest state. Games use
    /// this to send on-chain moves outside the dispute flow, e.g. the loss
    /// declaration once the game is decided against us.
    fn maybe_on_chain_move(&self, state: &dyn ParsedBoardState, sender: &MoveSender);

    /// The move JSON filing a dispute with the given proof.
    fn dispute_move(&self, channel_id: &Hash256, proof: &StateProof) -> serde_json::Value {
        json!({ "d": { "id": channel_id.to_hex(), "state": proof_to_base64(proof) } })
    }

    /// The move JSON resolving a dispute with the given proof.
    fn resolution_move(&self, channel_id: &Hash256, proof: &StateProof) -> serde_json::Value {
        json!({ "r": { "id": channel_id.to_hex(), "state": proof_to_base64(proof) } })
    }
}
