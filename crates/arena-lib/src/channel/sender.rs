//! Sending of on-chain moves for a channel.

use crate::channel::game::ChannelGame;
use arena_types::{Hash256, StateProof};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Low-level submission of raw moves for a named player. Implementations
/// talk to a wallet; tests record.
pub trait TransactionSender: Send + Sync {
    /// Submits the given move value for the name and returns the txid.
    fn send_raw_move(&self, name: &str, value: &str) -> anyhow::Result<Hash256>;

    /// Whether a previously submitted transaction is still waiting to be
    /// confirmed.
    fn is_pending(&self, txid: &Hash256) -> bool;
}

/// Wraps game moves into the on-chain move envelope and submits them.
pub struct MoveSender {
    game_id: String,
    channel_id: Hash256,
    player_name: String,
    sender: Arc<dyn TransactionSender>,
    game: Arc<dyn ChannelGame>,
}

impl MoveSender {
    pub fn new(
        game_id: String,
        channel_id: Hash256,
        player_name: String,
        sender: Arc<dyn TransactionSender>,
        game: Arc<dyn ChannelGame>,
    ) -> Self {
        Self {
            game_id,
            channel_id,
            player_name,
            sender,
            game,
        }
    }

    /// Sends a game move, wrapped into the per-game namespace. Returns the
    /// txid, or `None` if submission failed (in which case the error has
    /// been logged and the caller may retry later).
    pub fn send_move(&self, mv: &serde_json::Value) -> Option<Hash256> {
        let full_value = json!({ "g": { &self.game_id: mv } });
        let encoded = full_value.to_string();
        info!(player = %self.player_name, value = %encoded, "sending move");

        match self.sender.send_raw_move(&self.player_name, &encoded) {
            Ok(txid) => Some(txid),
            Err(err) => {
                error!(%err, "sending move to the blockchain failed");
                None
            }
        }
    }

    pub fn send_dispute(&self, proof: &StateProof) -> Option<Hash256> {
        self.send_move(&self.game.dispute_move(&self.channel_id, proof))
    }

    pub fn send_resolution(&self, proof: &StateProof) -> Option<Hash256> {
        self.send_move(&self.game.resolution_move(&self.channel_id, proof))
    }

    pub fn is_pending(&self, txid: &Hash256) -> bool {
        self.sender.is_pending(txid)
    }
}
