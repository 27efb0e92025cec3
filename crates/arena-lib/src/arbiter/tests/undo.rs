use super::*;
use crate::arbiter::store::ArbiterStoreRead;
use crate::store::apply_undo;
use crate::tests::test_utils::*;
use arena_types::SignatureSigner;
use serde_json::json;
use std::collections::BTreeMap;

/// Full dump of the store's key space.
fn dump(store: &Store) -> BTreeMap<Vec<u8>, Vec<u8>> {
    store
        .prefix_iterator(&[])
        .map(|(k, v)| (k.into_vec(), v.into_vec()))
        .collect()
}

#[test]
fn forward_then_reverse_is_bit_identical() {
    let (_dir, store) = temp_store();
    let arbiter = test_arbiter();
    let alice = test_signer(b"alice key");
    let bob = test_signer(b"bob key");

    // Some pre-existing state: one joined channel.
    let create = mv("alice", "create", json!({ "c": { "addr": alice.address() } }));
    let id = create.txid;
    arbiter.process_block(&store, &block(100, vec![create]));
    arbiter.process_block(
        &store,
        &block(
            101,
            vec![mv(
                "bob",
                "join",
                json!({ "j": { "id": id.to_hex(), "addr": bob.address() } }),
            )],
        ),
    );

    let before = dump(&store);

    // A block that creates another channel, resolves the first to a
    // winner and thereby touches stats.
    let row = store.get_channel(&id).expect("channel");
    let proof = build_played_proof(
        &id,
        &row.metadata,
        &row.reinit_state,
        &[(&alice, 1), (&bob, 1), (&alice, 1), (&bob, 97)],
    );
    let create2 = mv("carol", "create 2", json!({ "c": { "addr": "carol addr" } }));
    let undo = arbiter.process_block(
        &store,
        &block(
            102,
            vec![
                create2,
                mv(
                    "alice",
                    "resolve",
                    json!({ "r": {
                        "id": id.to_hex(),
                        "state": arena_types::proof_to_base64(&proof),
                    } }),
                ),
            ],
        ),
    );

    assert_ne!(dump(&store), before);

    apply_undo(&store, &undo);
    assert_eq!(dump(&store), before);
}
