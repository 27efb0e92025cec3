//! The mempool-side mirror of the arbiter.
//!
//! Tracks pending channel moves without mutating any persisted state, so
//! frontends can show what is about to happen. Rebuilt from the mempool
//! after every block attach or detach.

use crate::arbiter::{
    channel_from_move, parse_abort_move, parse_create_move, parse_dispute_resolution_move,
    parse_join_move, ChannelArbiter, MoveEntry,
};
use crate::arbiter::store::ArbiterStoreRead;
use crate::store::Store;
use arena_types::{proof_to_base64, Hash256, StateProof};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// The best pending state proof seen for one channel.
struct PendingChannelData {
    proof: StateProof,
    turn_count: u64,
}

/// Collected pending moves, in mempool arrival order.
#[derive(Default)]
pub struct PendingMoves {
    create: Vec<Value>,
    join: Vec<Value>,
    abort: BTreeSet<Hash256>,
    channels: BTreeMap<Hash256, PendingChannelData>,
    seen: HashSet<Hash256>,
}

impl PendingMoves {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all tracked state. Called on every block attach and detach,
    /// after which the mempool is fed in again.
    pub fn clear(&mut self) {
        self.create.clear();
        self.join.clear();
        self.abort.clear();
        self.channels.clear();
        self.seen.clear();
    }

    /// Processes one pending move against the confirmed state. Only sanity
    /// validation happens here; even if a move would be invalid on-chain,
    /// a valid state proof inside it is still worth reporting.
    pub fn add_pending_move(&mut self, arbiter: &ChannelArbiter, store: &Store, mv: &MoveEntry) {
        if !self.seen.insert(mv.txid) {
            debug!(txid = %mv.txid, "already tracked pending move");
            return;
        }

        let data = match mv.data.as_object() {
            Some(data) => data,
            None => {
                warn!(name = %mv.name, "pending move is not an object");
                return;
            }
        };
        if data.len() > 1 {
            warn!(name = %mv.name, "pending move has more than one action");
            return;
        }

        if let Some(addr) = data.get("c").and_then(parse_create_move) {
            info!(name = %mv.name, txid = %mv.txid, "new pending create-channel move");
            self.create.push(json!({
                "name": mv.name,
                "address": addr,
                "id": mv.txid.to_hex(),
            }));
        }

        if let Some((row, addr)) = data
            .get("j")
            .and_then(|o| parse_join_move(store, o, &mv.name))
        {
            info!(name = %mv.name, id = %row.id, "new pending join-channel move");
            self.join.push(json!({
                "name": mv.name,
                "address": addr,
                "id": row.id.to_hex(),
            }));
        }

        if let Some(id) = data
            .get("a")
            .and_then(|o| parse_abort_move(store, o, &mv.name))
        {
            info!(name = %mv.name, %id, "new pending abort-channel move");
            self.abort.insert(id);
        }

        for key in ["d", "r"] {
            if let Some((row, proof)) = data
                .get(key)
                .and_then(|o| parse_dispute_resolution_move(store, o))
            {
                info!(id = %row.id, "obtained state proof from pending move");
                self.add_pending_state_proof(arbiter, store, &row.id, proof);
            }
        }
    }

    /// Records a pending state proof for a channel if it verifies and is
    /// ahead of both the confirmed state and any previously seen pending
    /// proof.
    fn add_pending_state_proof(
        &mut self,
        arbiter: &ChannelArbiter,
        store: &Store,
        id: &Hash256,
        proof: StateProof,
    ) {
        let row = match store.get_channel(id) {
            Some(row) => row,
            None => return,
        };

        let proven_state = match arbiter.verify_channel_proof(&row, &proof) {
            Some(state) => state,
            None => {
                warn!(%id, "state proof of pending move is invalid");
                return;
            }
        };

        let proven_parsed = arbiter
            .rules()
            .parse_state(id, &row.metadata, &proven_state)
            .expect("verified proof end state must parse");
        let proven_count = proven_parsed.turn_count();
        debug!(%id, proven_count, "found valid pending state proof");

        match self.channels.get_mut(id) {
            None => {
                let on_chain_parsed = arbiter
                    .rules()
                    .parse_state(id, &row.metadata, row.latest_state())
                    .expect("stored on-chain state must parse");
                if proven_count > on_chain_parsed.turn_count() {
                    info!(%id, proven_count, "new latest pending state for channel");
                    self.channels.insert(
                        *id,
                        PendingChannelData {
                            proof,
                            turn_count: proven_count,
                        },
                    );
                }
            }
            Some(pending) => {
                if proven_count > pending.turn_count {
                    info!(%id, proven_count, "fresher pending state for channel");
                    pending.proof = proof;
                    pending.turn_count = proven_count;
                }
            }
        }
    }

    pub fn to_json(&self) -> Value {
        let mut channels = json!({});
        for (id, pending) in &self.channels {
            channels[id.to_hex()] = json!({
                "id": id.to_hex(),
                "proof": proof_to_base64(&pending.proof),
                "turncount": pending.turn_count,
            });
        }

        json!({
            "create": self.create,
            "join": self.join,
            "abort": self.abort.iter().map(|id| id.to_hex()).collect::<Vec<_>>(),
            "channels": channels,
        })
    }
}
