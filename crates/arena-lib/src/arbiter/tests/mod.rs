mod actor;
mod pending;
mod undo;

use crate::arbiter::{BlockData, ChannelArbiter, MoveEntry};
use crate::games::tally::TallyRules;
use crate::store::Store;
use crate::tests::test_utils::GAME_ID;
use arena_types::{Hash256, Secp256k1Verifier};
use std::sync::Arc;

pub(crate) fn test_arbiter() -> ChannelArbiter {
    ChannelArbiter::new(
        GAME_ID.to_string(),
        Arc::new(TallyRules),
        Arc::new(Secp256k1Verifier),
    )
}

pub(crate) fn temp_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::new(dir.path()).expect("open store");
    (dir, store)
}

pub(crate) fn block_hash(height: u64) -> Hash256 {
    Hash256::digest(format!("block {height}").as_bytes())
}

pub(crate) fn block(height: u64, moves: Vec<MoveEntry>) -> BlockData {
    BlockData {
        hash: block_hash(height),
        parent: block_hash(height - 1),
        height,
        moves,
    }
}

pub(crate) fn mv(name: &str, txid_seed: &str, data: serde_json::Value) -> MoveEntry {
    MoveEntry {
        name: name.to_string(),
        txid: Hash256::digest(txid_seed.as_bytes()),
        data,
    }
}
