//! Typed access to the arbiter's persisted channel table, stats and undo
//! log.

use crate::store::schema::{channel_key, stats_key, tip_key, undo_key, CHANNEL_PREFIX};
use crate::store::{deserialize_from, serialize_to_vec, BlockTransaction, Store, UndoRecord};
use arena_types::{ChannelMetadata, Hash256, StateProof};
use serde::{Deserialize, Serialize};

/// How many block undo records are kept around for detaches.
const UNDO_DEPTH: u64 = 128;

/// One open channel as the arbiter persists it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelRow {
    pub id: Hash256,
    pub metadata: ChannelMetadata,
    pub reinit_state: Vec<u8>,
    /// The best proof seen on-chain. `None` while it would just prove the
    /// reinit state itself.
    pub state_proof: Option<StateProof>,
    pub dispute_height: Option<u64>,
    /// Height of the block that created the channel, for the
    /// single-participant timeout sweep.
    pub created_height: u64,
}

impl ChannelRow {
    /// The latest state the chain knows for this channel.
    pub fn latest_state(&self) -> &[u8] {
        match &self.state_proof {
            Some(proof) => proof.end_state(),
            None => &self.reinit_state,
        }
    }

    /// The proof backing the latest state, materialising the trivial one
    /// if none is stored.
    pub fn state_proof_or_trivial(&self) -> StateProof {
        match &self.state_proof {
            Some(proof) => proof.clone(),
            None => StateProof::from_reinit(&self.reinit_state),
        }
    }

    /// Stores a proof, normalising the trivial case back to `None`.
    pub fn set_state_proof(&mut self, proof: StateProof) {
        if proof.is_trivial_for(&self.reinit_state) {
            self.state_proof = None;
        } else {
            self.state_proof = Some(proof);
        }
    }

    /// Resets the channel to a fresh reinitialisation: new metadata, new
    /// anchor state, no proof, no dispute.
    pub fn reinitialise(&mut self, metadata: ChannelMetadata, reinit_state: Vec<u8>) {
        self.metadata = metadata;
        self.reinit_state = reinit_state;
        self.state_proof = None;
        self.dispute_height = None;
    }
}

/// Win/loss counters of one on-chain name.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsRow {
    pub won: u64,
    pub lost: u64,
}

/// The processed chain tip, as recovered after a restart.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TipRow {
    pub hash: Hash256,
    pub height: u64,
}

/// Per-height undo data, together with enough block identity to validate
/// detaches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UndoRow {
    pub block_hash: Hash256,
    pub parent_hash: Hash256,
    pub undo: UndoRecord,
}

/// Read access shared between live block processing (through the journaled
/// transaction) and the RPC surface (directly on the store).
pub trait ArbiterStoreRead {
    fn raw_get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn raw_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    fn get_channel(&self, id: &Hash256) -> Option<ChannelRow> {
        self.raw_get(&channel_key(id))
            .map(|bytes| deserialize_from(&bytes, "ChannelRow"))
    }

    fn list_channels(&self) -> Vec<ChannelRow> {
        self.raw_prefix(&[CHANNEL_PREFIX])
            .into_iter()
            .map(|(_, bytes)| deserialize_from(&bytes, "ChannelRow"))
            .collect()
    }

    fn get_stats(&self, name: &str) -> Option<StatsRow> {
        self.raw_get(&stats_key(name))
            .map(|bytes| deserialize_from(&bytes, "StatsRow"))
    }

    fn get_tip(&self) -> Option<TipRow> {
        self.raw_get(&tip_key())
            .map(|bytes| deserialize_from(&bytes, "TipRow"))
    }

    fn get_undo(&self, height: u64) -> Option<UndoRow> {
        self.raw_get(&undo_key(height))
            .map(|bytes| deserialize_from(&bytes, "UndoRow"))
    }
}

impl ArbiterStoreRead for Store {
    fn raw_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.get(key)
    }

    fn raw_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.prefix_iterator(prefix)
            .map(|(k, v)| (k.into_vec(), v.into_vec()))
            .collect()
    }
}

impl ArbiterStoreRead for BlockTransaction<'_> {
    fn raw_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.get(key)
    }

    fn raw_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.prefix_iterator(prefix)
            .map(|(k, v)| (k.into_vec(), v.into_vec()))
            .collect()
    }
}

pub fn put_channel(txn: &mut BlockTransaction<'_>, row: &ChannelRow) {
    txn.put(&channel_key(&row.id), &serialize_to_vec(row, "ChannelRow"));
}

pub fn delete_channel(txn: &mut BlockTransaction<'_>, id: &Hash256) {
    txn.delete(&channel_key(id));
}

/// Credits a win and a loss to the two names of a decided channel.
pub fn update_stats(txn: &mut BlockTransaction<'_>, winner_name: &str, loser_name: &str) {
    let mut winner = txn.get_stats(winner_name).unwrap_or_default();
    winner.won += 1;
    txn.put(
        &stats_key(winner_name),
        &serialize_to_vec(&winner, "StatsRow"),
    );

    let mut loser = txn.get_stats(loser_name).unwrap_or_default();
    loser.lost += 1;
    txn.put(&stats_key(loser_name), &serialize_to_vec(&loser, "StatsRow"));
}

/// Tip and undo maintenance happens outside block transactions: the undo
/// data must describe exactly the game-state changes of the block.
pub fn set_tip(store: &Store, tip: &TipRow) {
    store.put(tip_key(), serialize_to_vec(tip, "TipRow"));
}

pub fn put_undo(store: &Store, height: u64, row: &UndoRow) {
    store.put(undo_key(height), serialize_to_vec(row, "UndoRow"));
    if height > UNDO_DEPTH {
        store.delete(undo_key(height - UNDO_DEPTH));
    }
}

pub fn delete_undo(store: &Store, height: u64) {
    store.delete(undo_key(height));
}
