//! The on-chain side of the channel protocol: interpretation of channel
//! moves inside block processing, dispute expiry, channel timeouts and the
//! per-name win/loss statistics.
//!
//! The arbiter is a pure function of the block stream. It never looks at
//! the clock and derives everything from block data and the persisted
//! channel table, so replaying the same blocks always yields the same
//! store contents.

pub mod actor;
pub mod pending;
pub mod store;
pub mod sync;

pub use actor::{ArbiterActor, ArbiterActorArgs, ArbiterMessage};
pub use pending::PendingMoves;
pub use store::{ArbiterStoreRead, ChannelRow, StatsRow, TipRow, UndoRow};

#[cfg(test)]
mod tests;

use crate::channel::proof::verify_state_proof;
use crate::channel::rules::{check_versioned_proof, BoardRules};
use crate::store::{BlockTransaction, Store, UndoRecord};
use arena_types::{
    proof_from_base64, ChannelMetadata, Hash256, Participant, SignatureVerifier, StateProof,
};
use base64::prelude::{Engine, BASE64_STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Blocks a dispute may sit unanswered before the channel is closed
/// against the disputed player.
pub const DISPUTE_BLOCKS: u64 = 10;

/// Blocks after which a channel nobody joined is swept.
pub const CHANNEL_TIMEOUT_BLOCKS: u64 = 12;

/// One move of an attached block or the mempool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MoveEntry {
    pub name: String,
    pub txid: Hash256,
    #[serde(rename = "move")]
    pub data: Value,
}

/// The per-block data handed to the arbiter by the indexer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockData {
    pub hash: Hash256,
    pub parent: Hash256,
    pub height: u64,
    #[serde(default)]
    pub moves: Vec<MoveEntry>,
}

/// The view of the processed chain published to the RPC surface.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TipInfo {
    pub hash: Option<Hash256>,
    pub height: u64,
    pub synced: bool,
}

pub struct ChannelArbiter {
    game_id: String,
    rules: Arc<dyn BoardRules>,
    verifier: Arc<dyn SignatureVerifier>,
    dispute_blocks: u64,
    timeout_blocks: u64,
}

impl ChannelArbiter {
    pub fn new(
        game_id: String,
        rules: Arc<dyn BoardRules>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        Self {
            game_id,
            rules,
            verifier,
            dispute_blocks: DISPUTE_BLOCKS,
            timeout_blocks: CHANNEL_TIMEOUT_BLOCKS,
        }
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    /// Applies one attached block to the store and returns the undo data
    /// that reverts it.
    pub fn process_block(&self, store: &Store, block: &BlockData) -> UndoRecord {
        let mut txn = BlockTransaction::new(store);
        info!(
            height = block.height,
            moves = block.moves.len(),
            "processing moves"
        );
        for mv in &block.moves {
            self.process_move(&mut txn, block.height, mv);
        }
        self.expire_disputes(&mut txn, block.height);
        self.time_out_channels(&mut txn, block.height);
        txn.into_undo()
    }

    fn process_move(&self, txn: &mut BlockTransaction<'_>, height: u64, mv: &MoveEntry) {
        let data = match mv.data.as_object() {
            Some(data) => data,
            None => {
                warn!(name = %mv.name, "move is not an object");
                return;
            }
        };

        // Moves combining multiple actions could interact in surprising
        // ways (e.g. join and dispute at once); they are simply invalid.
        if data.len() > 1 {
            warn!(name = %mv.name, "move has more than one action");
            return;
        }

        self.handle_create(txn, data.get("c"), height, &mv.name, &mv.txid);
        self.handle_join(txn, data.get("j"), &mv.name, &mv.txid);
        self.handle_abort(txn, data.get("a"), &mv.name);
        self.handle_declare_loss(txn, data.get("l"), &mv.name);
        self.handle_dispute_resolution(txn, data.get("d"), height, true);
        self.handle_dispute_resolution(txn, data.get("r"), height, false);
    }

    fn handle_create(
        &self,
        txn: &mut BlockTransaction<'_>,
        obj: Option<&Value>,
        height: u64,
        name: &str,
        txid: &Hash256,
    ) {
        let addr = match obj.and_then(parse_create_move) {
            Some(addr) => addr,
            None => return,
        };

        if txn.get_channel(txid).is_some() {
            warn!(%txid, "channel id already exists, dropping create");
            return;
        }

        info!(id = %txid, name, %addr, "creating channel");
        let row = ChannelRow {
            id: *txid,
            metadata: ChannelMetadata {
                participants: vec![Participant {
                    name: name.to_string(),
                    address: addr,
                }],
                reinit: Vec::new(),
            },
            reinit_state: Vec::new(),
            state_proof: None,
            dispute_height: None,
            created_height: height,
        };
        store::put_channel(txn, &row);
    }

    fn handle_join(
        &self,
        txn: &mut BlockTransaction<'_>,
        obj: Option<&Value>,
        name: &str,
        txid: &Hash256,
    ) {
        let (mut row, addr) = match obj.and_then(|o| parse_join_move(txn, o, name)) {
            Some(parsed) => parsed,
            None => return,
        };

        info!(id = %row.id, name, %addr, "adding second participant to channel");

        let mut new_meta = row.metadata.clone();
        update_metadata_reinit(txid, &mut new_meta);
        new_meta.participants.push(Participant {
            name: name.to_string(),
            address: addr,
        });
        assert_eq!(new_meta.participants.len(), 2);

        row.reinitialise(new_meta, self.rules.initial_board_state());
        store::put_channel(txn, &row);
    }

    fn handle_abort(&self, txn: &mut BlockTransaction<'_>, obj: Option<&Value>, name: &str) {
        let id = match obj.and_then(|o| parse_abort_move(txn, o, name)) {
            Some(id) => id,
            None => return,
        };

        info!(%id, "aborting channel");
        store::delete_channel(txn, &id);
    }

    fn handle_declare_loss(&self, txn: &mut BlockTransaction<'_>, obj: Option<&Value>, name: &str) {
        let obj = match obj.and_then(Value::as_object) {
            Some(obj) => obj,
            None => return,
        };
        if obj.len() != 2 {
            warn!(name, "invalid declare loss move");
            return;
        }

        let row = match channel_from_move(txn, obj) {
            Some(row) => row,
            None => return,
        };
        if row.metadata.participants.len() != 2 {
            warn!(id = %row.id, "cannot declare loss in channel without two participants");
            return;
        }

        let reinit = match obj
            .get("r")
            .and_then(Value::as_str)
            .and_then(|s| BASE64_STANDARD.decode(s).ok())
        {
            Some(reinit) => reinit,
            None => {
                warn!(name, "invalid reinit value on declare loss");
                return;
            }
        };
        if reinit != row.metadata.reinit {
            warn!(name, "loss declaration is for a different reinit than the channel");
            return;
        }

        let loser = match row.metadata.participant_index(name) {
            Some(index) => index,
            None => {
                warn!(name, id = %row.id, "cannot declare loss as non-participant");
                return;
            }
        };
        let winner = 1 - loser;

        info!(
            name,
            id = %row.id,
            winner = %row.metadata.participants[winner].name,
            "loss declared on channel"
        );
        self.credit_winner(txn, &row.metadata, winner);
        store::delete_channel(txn, &row.id);
    }

    fn handle_dispute_resolution(
        &self,
        txn: &mut BlockTransaction<'_>,
        obj: Option<&Value>,
        height: u64,
        is_dispute: bool,
    ) {
        let (mut row, proof) = match obj.and_then(|o| parse_dispute_resolution_move(txn, o)) {
            Some(parsed) => parsed,
            None => return,
        };

        if row.metadata.participants.len() != 2 {
            warn!(id = %row.id, "cannot file dispute/resolution for channel without two participants");
            return;
        }

        info!(
            id = %row.id,
            height,
            kind = if is_dispute { "dispute" } else { "resolution" },
            "processing on-chain state claim"
        );

        let accepted = if is_dispute {
            self.process_dispute(&mut row, height, &proof)
        } else {
            self.process_resolution(&mut row, &proof)
        };
        if !accepted {
            warn!(id = %row.id, "dispute/resolution is invalid");
            return;
        }
        store::put_channel(txn, &row);

        // If the accepted state already decides the game, close the
        // channel right away. This lets the winner force-close even if
        // the loser never declares their loss.
        let parsed = self
            .rules
            .parse_state(&row.id, &row.metadata, row.latest_state())
            .expect("accepted on-chain state must parse");
        if let Some(winner) = parsed.winner() {
            info!(
                id = %row.id,
                winner = %row.metadata.participants[winner].name,
                "on-chain state has a winner, closing channel"
            );
            self.credit_winner(txn, &row.metadata, winner);
            store::delete_channel(txn, &row.id);
        }
    }

    /// Applies a dispute claim to a channel row. Accepts proofs strictly
    /// ahead of the on-chain state, and (once) a proof of exactly the
    /// on-chain state to dispute it in place.
    fn process_dispute(&self, ch: &mut ChannelRow, height: u64, proof: &StateProof) -> bool {
        if let Some(existing) = ch.dispute_height {
            // An existing dispute can only have come from an earlier (or
            // in edge cases the same) block.
            assert!(height >= existing);
        }

        let proven_state = match self.verify_channel_proof(ch, proof) {
            Some(state) => state,
            None => {
                warn!("dispute has invalid state proof");
                return false;
            }
        };

        let on_chain_parsed = self
            .rules
            .parse_state(&ch.id, &ch.metadata, ch.latest_state())
            .expect("stored on-chain state must parse");
        let proven_parsed = self
            .rules
            .parse_state(&ch.id, &ch.metadata, &proven_state)
            .expect("verified proof end state must parse");

        if proven_parsed.whose_turn().is_none() {
            warn!("cannot file dispute for a no-turn situation");
            return false;
        }

        let on_chain_count = on_chain_parsed.turn_count();
        let proven_count = proven_parsed.turn_count();

        if proven_count > on_chain_count {
            debug!(
                on_chain_count,
                proven_count, "disputing with a fresher state"
            );
            ch.set_state_proof(proof.clone());
            ch.dispute_height = Some(height);
            return true;
        }

        if proven_count < on_chain_count {
            warn!(
                proven_count,
                on_chain_count, "dispute is behind the on-chain state"
            );
            return false;
        }

        if ch.dispute_height.is_some() {
            warn!(
                proven_count,
                "dispute has the same turn count as the already disputed on-chain state"
            );
            return false;
        }

        if !proven_parsed.equals(ch.latest_state()) {
            warn!(
                proven_count,
                "dispute has the same turn count as the on-chain state but differs"
            );
            return false;
        }

        debug!(proven_count, "disputing the existing on-chain state");
        ch.dispute_height = Some(height);
        true
    }

    /// Applies a resolution claim: accepted iff the proof advances past
    /// the on-chain state, which also clears any dispute.
    fn process_resolution(&self, ch: &mut ChannelRow, proof: &StateProof) -> bool {
        let proven_state = match self.verify_channel_proof(ch, proof) {
            Some(state) => state,
            None => {
                warn!("resolution has invalid state proof");
                return false;
            }
        };

        let on_chain_parsed = self
            .rules
            .parse_state(&ch.id, &ch.metadata, ch.latest_state())
            .expect("stored on-chain state must parse");
        let proven_parsed = self
            .rules
            .parse_state(&ch.id, &ch.metadata, &proven_state)
            .expect("verified proof end state must parse");

        let on_chain_count = on_chain_parsed.turn_count();
        let proven_count = proven_parsed.turn_count();
        if proven_count <= on_chain_count {
            warn!(
                proven_count,
                on_chain_count, "resolution does not advance the on-chain state"
            );
            return false;
        }

        debug!("resolution is valid, updating state");
        ch.set_state_proof(proof.clone());
        ch.dispute_height = None;
        true
    }

    pub(crate) fn rules(&self) -> &dyn BoardRules {
        self.rules.as_ref()
    }

    /// Verifies a proof against a channel row, returning the proven end
    /// state.
    pub(crate) fn verify_channel_proof(&self, ch: &ChannelRow, proof: &StateProof) -> Option<Vec<u8>> {
        if !check_versioned_proof(self.rules.as_ref(), &ch.metadata, proof) {
            return None;
        }
        verify_state_proof(
            self.verifier.as_ref(),
            self.rules.as_ref(),
            &self.game_id,
            &ch.id,
            &ch.metadata,
            &ch.reinit_state,
            proof,
        )
        .ok()
    }

    /// Closes every channel whose dispute has sat unanswered for the
    /// configured number of blocks, crediting the loss to the player whose
    /// turn was pending at the dispute.
    fn expire_disputes(&self, txn: &mut BlockTransaction<'_>, height: u64) {
        if height <= self.dispute_blocks {
            return;
        }
        let cutoff = height - self.dispute_blocks;
        debug!(height, cutoff, "processing expired disputes");

        for row in txn.list_channels() {
            match row.dispute_height {
                Some(dispute_height) if dispute_height <= cutoff => (),
                _ => continue,
            }

            // A filed dispute implies two participants and a state with a
            // pending turn.
            assert_eq!(row.metadata.participants.len(), 2);
            let parsed = self
                .rules
                .parse_state(&row.id, &row.metadata, row.latest_state())
                .expect("stored on-chain state must parse");
            let loser = parsed
                .whose_turn()
                .expect("disputed state must have a turn");
            let winner = 1 - loser;

            info!(
                id = %row.id,
                winner = %row.metadata.participants[winner].name,
                loser = %row.metadata.participants[loser].name,
                "dispute expired, force-closing channel"
            );
            self.credit_winner(txn, &row.metadata, winner);
            store::delete_channel(txn, &row.id);
        }
    }

    /// Sweeps channels that never got a second participant.
    fn time_out_channels(&self, txn: &mut BlockTransaction<'_>, height: u64) {
        if height < self.timeout_blocks {
            return;
        }
        let cutoff = height - self.timeout_blocks;

        let mut num = 0;
        for row in txn.list_channels() {
            if row.metadata.participants.len() < 2 && row.created_height <= cutoff {
                store::delete_channel(txn, &row.id);
                num += 1;
            }
        }
        if num > 0 {
            info!(num, height, "timed out unjoined channels");
        }
    }

    fn credit_winner(&self, txn: &mut BlockTransaction<'_>, meta: &ChannelMetadata, winner: usize) {
        assert!(winner <= 1);
        assert_eq!(meta.participants.len(), 2);
        let loser = 1 - winner;
        store::update_stats(
            txn,
            &meta.participants[winner].name,
            &meta.participants[loser].name,
        );
    }
}

/// Derives the next reinitialisation marker when a channel is re-seeded by
/// an on-chain move: the hash of the previous marker and the txid.
pub fn update_metadata_reinit(txid: &Hash256, meta: &mut ChannelMetadata) {
    let mut data = meta.reinit.clone();
    data.extend_from_slice(txid.as_ref());
    meta.reinit = Hash256::digest(&data).as_ref().to_vec();
}

/// Parses a create move: an object holding exactly a signing address.
pub(crate) fn parse_create_move(obj: &Value) -> Option<String> {
    let map = obj.as_object()?;
    let addr = map.get("addr").and_then(Value::as_str);
    match addr {
        Some(addr) if map.len() == 1 => Some(addr.to_string()),
        _ => {
            warn!("invalid create channel move");
            None
        }
    }
}

/// Extracts the channel id of a move object and looks the channel up.
pub(crate) fn channel_from_move<S: ArbiterStoreRead>(
    store: &S,
    obj: &serde_json::Map<String, Value>,
) -> Option<ChannelRow> {
    let id_str = match obj.get("id").and_then(Value::as_str) {
        Some(id) => id,
        None => {
            warn!("no channel id given in move");
            return None;
        }
    };
    let id: Hash256 = match id_str.parse() {
        Ok(id) => id,
        Err(_) => {
            warn!(id = id_str, "invalid channel id in move");
            return None;
        }
    };

    let row = store.get_channel(&id);
    if row.is_none() {
        warn!(%id, "action for non-existant channel");
    }
    row
}

/// Parses and validates a join move, returning the channel row and the
/// joiner's signing address.
pub(crate) fn parse_join_move<S: ArbiterStoreRead>(
    store: &S,
    obj: &Value,
    name: &str,
) -> Option<(ChannelRow, String)> {
    let map = obj.as_object()?;
    let addr = match map.get("addr").and_then(Value::as_str) {
        Some(addr) if map.len() == 2 => addr.to_string(),
        _ => {
            warn!("invalid join channel move");
            return None;
        }
    };

    let row = channel_from_move(store, map)?;
    if row.metadata.participants.len() != 1 {
        warn!(id = %row.id, "cannot join channel that is not waiting for a second participant");
        return None;
    }
    if row.metadata.participants[0].name == name {
        warn!(name, id = %row.id, "cannot join own channel a second time");
        return None;
    }

    Some((row, addr))
}

/// Parses and validates an abort move, returning the channel id to drop.
pub(crate) fn parse_abort_move<S: ArbiterStoreRead>(
    store: &S,
    obj: &Value,
    name: &str,
) -> Option<Hash256> {
    let map = obj.as_object()?;
    if map.len() != 1 {
        warn!("invalid abort channel move");
        return None;
    }

    let row = channel_from_move(store, map)?;
    if row.metadata.participants.len() != 1 {
        warn!(id = %row.id, "cannot abort channel with two participants");
        return None;
    }
    if row.metadata.participants[0].name != name {
        warn!(name, id = %row.id, "only the creator can abort a channel");
        return None;
    }

    Some(row.id)
}

/// Parses a dispute or resolution move, returning the channel row and the
/// embedded state proof.
pub(crate) fn parse_dispute_resolution_move<S: ArbiterStoreRead>(
    store: &S,
    obj: &Value,
) -> Option<(ChannelRow, StateProof)> {
    let map = obj.as_object()?;
    if map.len() != 2 {
        warn!("invalid dispute/resolution move");
        return None;
    }

    let proof = match map
        .get("state")
        .and_then(Value::as_str)
        .and_then(|s| proof_from_base64(s).ok())
    {
        Some(proof) => proof,
        None => {
            warn!("failed to extract state proof from move");
            return None;
        }
    };

    let row = channel_from_move(store, map)?;
    Some((row, proof))
}
