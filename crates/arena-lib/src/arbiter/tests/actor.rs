use super::*;
use crate::arbiter::actor::{ArbiterActor, ArbiterActorArgs, ArbiterMessage};
use crate::arbiter::store::ArbiterStoreRead;
use crate::arbiter::TipInfo;
use arena_types::SignatureSigner;
use ractor::{call_t, Actor};
use serde_json::json;
use tokio::sync::watch;

const TIMEOUT_MS: u64 = 5_000;

#[tokio::test]
async fn attach_updates_tip_and_detach_rolls_back() {
    let (_dir, store) = temp_store();
    let alice = crate::tests::test_utils::test_signer(b"alice key");

    let (tip_tx, tip_rx) = watch::channel(TipInfo::default());
    let (actor, handle) = Actor::spawn(
        None,
        ArbiterActor,
        ArbiterActorArgs {
            arbiter: test_arbiter(),
            store: store.clone(),
            tip_tx,
        },
    )
    .await
    .expect("spawn arbiter actor");

    let create = mv("alice", "create", json!({ "c": { "addr": alice.address() } }));
    let id = create.txid;

    call_t!(actor, ArbiterMessage::AttachBlock, TIMEOUT_MS, block(1, vec![]))
        .expect("attach block 1");
    call_t!(
        actor,
        ArbiterMessage::AttachBlock,
        TIMEOUT_MS,
        block(2, vec![create])
    )
    .expect("attach block 2");

    let tip = tip_rx.borrow().clone();
    assert_eq!(tip.height, 2);
    assert_eq!(tip.hash, Some(block_hash(2)));
    assert!(store.get_channel(&id).is_some());

    // A block that does not extend the tip is ignored.
    call_t!(
        actor,
        ArbiterMessage::AttachBlock,
        TIMEOUT_MS,
        block(5, vec![])
    )
    .expect("attach bogus block");
    assert_eq!(tip_rx.borrow().height, 2);

    // Detaching undoes the channel creation and moves the tip back.
    call_t!(actor, ArbiterMessage::DetachTip, TIMEOUT_MS).expect("detach");
    let tip = tip_rx.borrow().clone();
    assert_eq!(tip.height, 1);
    assert_eq!(tip.hash, Some(block_hash(1)));
    assert!(store.get_channel(&id).is_none());

    actor.stop(None);
    handle.await.expect("actor terminates");
}

#[tokio::test]
async fn pending_moves_are_tracked_until_the_next_attach() {
    let (_dir, store) = temp_store();

    let (tip_tx, _tip_rx) = watch::channel(TipInfo::default());
    let (actor, handle) = Actor::spawn(
        None,
        ArbiterActor,
        ArbiterActorArgs {
            arbiter: test_arbiter(),
            store: store.clone(),
            tip_tx,
        },
    )
    .await
    .expect("spawn arbiter actor");

    call_t!(actor, ArbiterMessage::AttachBlock, TIMEOUT_MS, block(1, vec![]))
        .expect("attach block 1");

    actor
        .cast(ArbiterMessage::PendingMove(mv(
            "carol",
            "pending create",
            json!({ "c": { "addr": "carol addr" } }),
        )))
        .expect("cast pending move");

    let report: serde_json::Value =
        call_t!(actor, ArbiterMessage::GetPending, TIMEOUT_MS).expect("get pending");
    assert_eq!(report["create"].as_array().expect("create list").len(), 1);

    // An attach clears the tracker; the mempool gets re-fed by the sync
    // loop afterwards.
    call_t!(actor, ArbiterMessage::AttachBlock, TIMEOUT_MS, block(2, vec![]))
        .expect("attach block 2");
    let report: serde_json::Value =
        call_t!(actor, ArbiterMessage::GetPending, TIMEOUT_MS).expect("get pending");
    assert!(report["create"].as_array().expect("create list").is_empty());

    actor.stop(None);
    handle.await.expect("actor terminates");
}
