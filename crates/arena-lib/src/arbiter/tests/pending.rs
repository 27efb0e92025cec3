use super::*;
use crate::arbiter::store::ArbiterStoreRead;
use crate::arbiter::PendingMoves;
use crate::tests::test_utils::*;
use arena_types::{proof_to_base64, SignatureSigner};
use serde_json::json;

struct Fixture {
    arbiter: crate::arbiter::ChannelArbiter,
    store: Store,
    _dir: tempfile::TempDir,
    pending: PendingMoves,
    alice: std::sync::Arc<arena_types::Secp256k1Signer>,
    bob: std::sync::Arc<arena_types::Secp256k1Signer>,
}

impl Fixture {
    fn new() -> Self {
        let (dir, store) = temp_store();
        Self {
            arbiter: test_arbiter(),
            store,
            _dir: dir,
            pending: PendingMoves::new(),
            alice: test_signer(b"alice key"),
            bob: test_signer(b"bob key"),
        }
    }

    fn add(&mut self, mv: &crate::arbiter::MoveEntry) {
        self.pending.add_pending_move(&self.arbiter, &self.store, mv);
    }
}

#[test]
fn pending_creates_joins_and_aborts_are_reported() {
    let mut fx = Fixture::new();

    // A confirmed single-participant channel for join/abort targets.
    let create = mv("alice", "create", json!({ "c": { "addr": fx.alice.address() } }));
    let id = create.txid;
    fx.arbiter.process_block(&fx.store, &block(100, vec![create]));

    fx.add(&mv(
        "carol",
        "pending create",
        json!({ "c": { "addr": "carol addr" } }),
    ));
    fx.add(&mv(
        "bob",
        "pending join",
        json!({ "j": { "id": id.to_hex(), "addr": fx.bob.address() } }),
    ));
    fx.add(&mv(
        "alice",
        "pending abort",
        json!({ "a": { "id": id.to_hex() } }),
    ));

    let report = fx.pending.to_json();
    assert_eq!(report["create"].as_array().expect("create list").len(), 1);
    assert_eq!(report["create"][0]["name"], "carol");
    assert_eq!(report["join"][0]["id"], id.to_hex());
    assert_eq!(report["abort"][0], id.to_hex());
}

#[test]
fn pending_state_proofs_track_the_best_turn_count() {
    let mut fx = Fixture::new();

    let create = mv("alice", "create", json!({ "c": { "addr": fx.alice.address() } }));
    let id = create.txid;
    fx.arbiter.process_block(&fx.store, &block(100, vec![create]));
    fx.arbiter.process_block(
        &fx.store,
        &block(
            101,
            vec![mv(
                "bob",
                "join",
                json!({ "j": { "id": id.to_hex(), "addr": fx.bob.address() } }),
            )],
        ),
    );

    let row = fx.store.get_channel(&id).expect("channel");
    let one = build_played_proof(&id, &row.metadata, &row.reinit_state, &[(&fx.alice, 1)]);
    let two = build_played_proof(
        &id,
        &row.metadata,
        &row.reinit_state,
        &[(&fx.alice, 1), (&fx.bob, 1)],
    );

    fx.add(&mv(
        "alice",
        "pending dispute",
        json!({ "d": { "id": id.to_hex(), "state": proof_to_base64(&one) } }),
    ));
    let report = fx.pending.to_json();
    assert_eq!(report["channels"][id.to_hex()]["turncount"], 1);

    // A fresher resolution replaces it; a stale one is ignored.
    fx.add(&mv(
        "bob",
        "pending resolution",
        json!({ "r": { "id": id.to_hex(), "state": proof_to_base64(&two) } }),
    ));
    fx.add(&mv(
        "alice",
        "pending stale",
        json!({ "d": { "id": id.to_hex(), "state": proof_to_base64(&one) } }),
    ));
    let report = fx.pending.to_json();
    assert_eq!(report["channels"][id.to_hex()]["turncount"], 2);
    assert_eq!(
        report["channels"][id.to_hex()]["proof"],
        proof_to_base64(&two)
    );
}

#[test]
fn seen_txids_and_invalid_moves_are_ignored() {
    let mut fx = Fixture::new();

    let pending_create = mv("carol", "pending create", json!({ "c": { "addr": "x" } }));
    fx.add(&pending_create);
    fx.add(&pending_create);
    assert_eq!(
        fx.pending.to_json()["create"]
            .as_array()
            .expect("create list")
            .len(),
        1
    );

    fx.add(&mv("mallory", "garbage", json!("garbage")));
    fx.add(&mv(
        "mallory",
        "double",
        json!({ "c": { "addr": "x" }, "a": { "id": "00" } }),
    ));
    let report = fx.pending.to_json();
    assert_eq!(report["create"].as_array().expect("create list").len(), 1);
    assert!(report["abort"].as_array().expect("abort list").is_empty());
}

#[test]
fn clear_drops_everything_and_allows_reporting_again() {
    let mut fx = Fixture::new();

    let pending_create = mv("carol", "pending create", json!({ "c": { "addr": "x" } }));
    fx.add(&pending_create);
    fx.pending.clear();
    assert!(fx.pending.to_json()["create"]
        .as_array()
        .expect("create list")
        .is_empty());

    // After a clear the same txid may be reported again (it is still in
    // the mempool).
    fx.add(&pending_create);
    assert_eq!(
        fx.pending.to_json()["create"]
            .as_array()
            .expect("create list")
            .len(),
        1
    );
}
