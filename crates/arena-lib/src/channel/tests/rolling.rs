use crate::channel::rolling::RollingState;
use crate::games::tally::TallyRules;
use crate::tests::test_utils::*;
use arena_types::{ChannelMetadata, Secp256k1Verifier, StateProof};
use std::sync::Arc;

fn rolling() -> RollingState {
    RollingState::new(
        Arc::new(TallyRules),
        Arc::new(Secp256k1Verifier),
        GAME_ID.to_string(),
        test_channel_id(),
    )
}

struct Reinit {
    meta: ChannelMetadata,
    state: Vec<u8>,
}

fn reinit(alice: &arena_types::Secp256k1Signer, bob: &arena_types::Secp256k1Signer, id: &[u8]) -> Reinit {
    Reinit {
        meta: two_party_meta(alice, bob, id),
        state: tally_state(0, 0, None),
    }
}

#[test]
fn first_on_chain_update_initialises() {
    let alice = test_signer(b"a");
    let bob = test_signer(b"b");
    let r1 = reinit(&alice, &bob, b"r1");
    let mut rolling = rolling();

    assert!(!rolling.is_initialised());
    let proof = StateProof::from_reinit(&r1.state);
    assert!(rolling.update_on_chain(&r1.meta, &r1.state, &proof));

    assert!(rolling.is_initialised());
    assert_eq!(rolling.reinit_id(), b"r1");
    assert_eq!(rolling.latest_state().turn_count(), 0);
    assert_eq!(rolling.on_chain_turn_count(), 0);
    assert_eq!(rolling.metadata(), &r1.meta);
}

#[test]
fn on_chain_update_keeps_fresher_cached_state() {
    let alice = test_signer(b"a");
    let bob = test_signer(b"b");
    let r1 = reinit(&alice, &bob, b"r1");
    let mut rolling = rolling();

    let anchor = StateProof::from_reinit(&r1.state);
    assert!(rolling.update_on_chain(&r1.meta, &r1.state, &anchor));

    // Off-chain we already know turn 2.
    let fresh = build_played_proof(
        &test_channel_id(),
        &r1.meta,
        &r1.state,
        &[(&alice, 1), (&bob, 1)],
    );
    assert!(rolling.update_with_move(b"r1", &fresh));
    assert_eq!(rolling.latest_state().turn_count(), 2);

    // The chain is still at the anchor; the re-delivered on-chain proof
    // must not regress the cached state, and is no observable change.
    assert!(!rolling.update_on_chain(&r1.meta, &r1.state, &anchor));
    assert_eq!(rolling.latest_state().turn_count(), 2);
    assert_eq!(rolling.on_chain_turn_count(), 0);
}

#[test]
fn off_chain_updates_are_strictly_monotone() {
    let alice = test_signer(b"a");
    let bob = test_signer(b"b");
    let r1 = reinit(&alice, &bob, b"r1");
    let mut rolling = rolling();

    assert!(rolling.update_on_chain(&r1.meta, &r1.state, &StateProof::from_reinit(&r1.state)));

    let two = build_played_proof(
        &test_channel_id(),
        &r1.meta,
        &r1.state,
        &[(&alice, 1), (&bob, 1)],
    );
    assert!(rolling.update_with_move(b"r1", &two));

    // The same turn count again is stale.
    assert!(!rolling.update_with_move(b"r1", &two));

    let one = build_played_proof(&test_channel_id(), &r1.meta, &r1.state, &[(&alice, 1)]);
    assert!(!rolling.update_with_move(b"r1", &one));
    assert_eq!(rolling.latest_state().turn_count(), 2);
}

#[test]
fn off_chain_update_for_unknown_reinit_is_dropped() {
    let alice = test_signer(b"a");
    let bob = test_signer(b"b");
    let r1 = reinit(&alice, &bob, b"r1");
    let mut rolling = rolling();

    assert!(rolling.update_on_chain(&r1.meta, &r1.state, &StateProof::from_reinit(&r1.state)));

    let proof = build_played_proof(&test_channel_id(), &r1.meta, &r1.state, &[(&alice, 1)]);
    assert!(!rolling.update_with_move(b"unknown", &proof));
}

#[test]
fn invalid_off_chain_proof_is_dropped() {
    let alice = test_signer(b"a");
    let bob = test_signer(b"b");
    let stranger = test_signer(b"stranger");
    let r1 = reinit(&alice, &bob, b"r1");
    let mut rolling = rolling();

    assert!(rolling.update_on_chain(&r1.meta, &r1.state, &StateProof::from_reinit(&r1.state)));

    // A state signed only by a non-participant proves nothing.
    let forged = StateProof {
        initial_state: arena_types::SignedData {
            data: tally_state(5, 3, None),
            signatures: vec![stranger.sign_message("unrelated")],
        },
        transitions: Vec::new(),
    };
    assert!(!rolling.update_with_move(b"r1", &forged));
    assert_eq!(rolling.latest_state().turn_count(), 0);
}

#[test]
fn reorg_reinstating_a_prior_reinit_keeps_both_caches() {
    let alice = test_signer(b"a");
    let bob = test_signer(b"b");
    let r1 = reinit(&alice, &bob, b"r1");
    let r2 = reinit(&alice, &bob, b"r2");
    let mut rolling = rolling();

    assert!(rolling.update_on_chain(&r1.meta, &r1.state, &StateProof::from_reinit(&r1.state)));
    assert!(rolling.update_on_chain(&r2.meta, &r2.state, &StateProof::from_reinit(&r2.state)));
    assert_eq!(rolling.reinit_id(), b"r2");

    // R2 advances to turn count 7 off-chain.
    let seven = build_played_proof(
        &test_channel_id(),
        &r2.meta,
        &r2.state,
        &[
            (&alice, 1),
            (&bob, 1),
            (&alice, 1),
            (&bob, 1),
            (&alice, 1),
            (&bob, 1),
            (&alice, 1),
        ],
    );
    assert!(rolling.update_with_move(b"r2", &seven));
    assert_eq!(rolling.latest_state().turn_count(), 7);

    // A reorg drops the join: the chain reports R1 again. The switch is
    // an observable change even though R1's state is not fresher.
    assert!(rolling.update_on_chain(&r1.meta, &r1.state, &StateProof::from_reinit(&r1.state)));
    assert_eq!(rolling.reinit_id(), b"r1");
    assert_eq!(rolling.latest_state().turn_count(), 0);

    // Off-chain progress on the currently parked R2 is cached silently.
    let eight = build_played_proof(
        &test_channel_id(),
        &r2.meta,
        &r2.state,
        &[
            (&alice, 1),
            (&bob, 1),
            (&alice, 1),
            (&bob, 1),
            (&alice, 1),
            (&bob, 1),
            (&alice, 1),
            (&bob, 1),
        ],
    );
    assert!(!rolling.update_with_move(b"r2", &eight));

    // When R2 returns, the cached turn count 8 is still there.
    assert!(rolling.update_on_chain(&r2.meta, &r2.state, &StateProof::from_reinit(&r2.state)));
    assert_eq!(rolling.reinit_id(), b"r2");
    assert_eq!(rolling.latest_state().turn_count(), 8);
}

#[test]
#[should_panic(expected = "not been initialised")]
fn querying_before_initialisation_is_a_bug() {
    let rolling = rolling();
    let _ = rolling.latest_state();
}
