//! Shared helpers and mock collaborators for the engine tests.

use crate::channel::broadcast::OffChainBroadcast;
use crate::channel::game::ChannelGame;
use crate::channel::manager::ChannelManager;
use crate::channel::proof::extend_state_proof;
use crate::channel::sender::{MoveSender, TransactionSender};
use crate::games::tally::{TallyChannel, TallyRules, TALLY_GAME_ID};
use arena_types::{
    ChannelMetadata, Hash256, Participant, Privkey, Secp256k1Signer, Secp256k1Verifier,
    SignatureSigner, SignedData, StateProof,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const GAME_ID: &str = TALLY_GAME_ID;

pub fn test_signer(seed: &[u8]) -> Arc<Secp256k1Signer> {
    Arc::new(Secp256k1Signer::new(Privkey::from(Hash256::digest(seed))))
}

pub fn test_channel_id() -> Hash256 {
    Hash256::digest(b"test channel")
}

/// Metadata for the channel of alice (index 0) and bob (index 1).
pub fn two_party_meta(
    alice: &Secp256k1Signer,
    bob: &Secp256k1Signer,
    reinit: &[u8],
) -> ChannelMetadata {
    ChannelMetadata {
        participants: vec![
            Participant {
                name: "alice".to_string(),
                address: alice.address().to_string(),
            },
            Participant {
                name: "bob".to_string(),
                address: bob.address().to_string(),
            },
        ],
        reinit: reinit.to_vec(),
    }
}

pub fn tally_state(number: u64, count: u64, winner: Option<usize>) -> Vec<u8> {
    let mut value = json!({ "number": number, "count": count });
    if let Some(winner) = winner {
        value["winner"] = json!(winner);
    }
    serde_json::to_vec(&value).expect("state serializes")
}

pub fn tally_move(add: u64) -> Vec<u8> {
    serde_json::to_vec(&json!({ "add": add })).expect("move serializes")
}

/// Builds a proof by playing the given moves from the reinit state, each
/// signed by the signer whose turn it is.
pub fn build_played_proof(
    channel_id: &Hash256,
    meta: &ChannelMetadata,
    reinit_state: &[u8],
    moves: &[(&Secp256k1Signer, u64)],
) -> StateProof {
    let mut proof = StateProof::from_reinit(reinit_state);
    for (signer, add) in moves {
        proof = extend_state_proof(
            &Secp256k1Verifier,
            *signer,
            &TallyRules,
            GAME_ID,
            channel_id,
            meta,
            &proof,
            &tally_move(*add),
        )
        .expect("extending proof with test move");
    }
    proof
}

/// Signs arbitrary state bytes for the participant owning the signer.
pub fn signed_state(
    channel_id: &Hash256,
    meta: &ChannelMetadata,
    state: &[u8],
    signers: &[&Secp256k1Signer],
) -> SignedData {
    let mut data = SignedData::unsigned(state.to_vec());
    for signer in signers {
        let index = meta
            .participants
            .iter()
            .position(|p| p.address == signer.address())
            .expect("signer is a participant");
        assert!(arena_types::sign_data_for_participant(
            *signer, GAME_ID, channel_id, meta, "state", index, &mut data,
        ));
    }
    data
}

/// Records sent moves and simulates mempool pendingness: every sent txid
/// is pending until explicitly mined.
#[derive(Default)]
pub struct MockSender {
    sent: Mutex<Vec<serde_json::Value>>,
    pending: Mutex<HashSet<Hash256>>,
    counter: AtomicU64,
}

impl MockSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent_moves(&self) -> Vec<serde_json::Value> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Marks a txid as mined, i.e. no longer pending.
    pub fn mine(&self, txid: &Hash256) {
        self.pending.lock().unwrap().remove(txid);
    }
}

impl TransactionSender for MockSender {
    fn send_raw_move(&self, name: &str, value: &str) -> anyhow::Result<Hash256> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let txid = Hash256::digest(format!("{name}:{n}:{value}").as_bytes());
        self.sent
            .lock()
            .unwrap()
            .push(serde_json::from_str(value).expect("sent move is JSON"));
        self.pending.lock().unwrap().insert(txid);
        Ok(txid)
    }

    fn is_pending(&self, txid: &Hash256) -> bool {
        self.pending.lock().unwrap().contains(txid)
    }
}

/// Records state broadcasts and participant updates.
#[derive(Default)]
pub struct MockBroadcast {
    sent: Mutex<Vec<(Vec<u8>, StateProof)>>,
    participants: Mutex<Vec<String>>,
}

impl MockBroadcast {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent_states(&self) -> Vec<(Vec<u8>, StateProof)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn participants(&self) -> Vec<String> {
        self.participants.lock().unwrap().clone()
    }
}

impl OffChainBroadcast for MockBroadcast {
    fn send_new_state(&self, reinit_id: &[u8], proof: &StateProof) {
        self.sent
            .lock()
            .unwrap()
            .push((reinit_id.to_vec(), proof.clone()));
    }

    fn set_participants(&self, meta: &ChannelMetadata) {
        *self.participants.lock().unwrap() =
            meta.participants.iter().map(|p| p.name.clone()).collect();
    }
}

/// A fully wired channel manager over the tally game with mocked on-chain
/// and off-chain sides.
pub struct ManagerFixture {
    pub manager: Arc<ChannelManager>,
    pub sender: Arc<MockSender>,
    pub broadcast: Arc<MockBroadcast>,
    pub alice: Arc<Secp256k1Signer>,
    pub bob: Arc<Secp256k1Signer>,
    pub meta: ChannelMetadata,
    pub channel_id: Hash256,
    pub reinit_state: Vec<u8>,
}

impl ManagerFixture {
    /// Builds the fixture for the given local player ("alice" or "bob").
    pub fn new(player: &str) -> Self {
        let alice = test_signer(b"alice key");
        let bob = test_signer(b"bob key");
        let meta = two_party_meta(&alice, &bob, b"reinit-1");
        let channel_id = test_channel_id();
        let reinit_state = tally_state(0, 0, None);

        let sender = MockSender::new();
        let broadcast = MockBroadcast::new();
        let game: Arc<dyn ChannelGame> = Arc::new(TallyChannel::new(player.to_string()));
        let signer = match player {
            "alice" => alice.clone(),
            "bob" => bob.clone(),
            other => panic!("unknown test player {other}"),
        };

        let move_sender = MoveSender::new(
            GAME_ID.to_string(),
            channel_id,
            player.to_string(),
            sender.clone(),
            game.clone(),
        );
        let manager = Arc::new(ChannelManager::new(
            Arc::new(TallyRules),
            game,
            Arc::new(Secp256k1Verifier),
            signer,
            GAME_ID.to_string(),
            channel_id,
            player.to_string(),
            broadcast.clone(),
            move_sender,
        ));

        Self {
            manager,
            sender,
            broadcast,
            alice,
            bob,
            meta,
            channel_id,
            reinit_state,
        }
    }

    /// Feeds an on-chain update carrying the given proof without dispute.
    pub fn on_chain(&self, height: u64, proof: &StateProof) {
        self.manager.process_on_chain(
            Hash256::digest(&height.to_be_bytes()),
            height,
            &self.meta,
            &self.reinit_state,
            proof,
            0,
        );
    }

    /// Same, but with a dispute reported at the given height.
    pub fn on_chain_disputed(&self, height: u64, proof: &StateProof, dispute_height: u64) {
        self.manager.process_on_chain(
            Hash256::digest(&height.to_be_bytes()),
            height,
            &self.meta,
            &self.reinit_state,
            proof,
            dispute_height,
        );
    }

    pub fn version(&self) -> u64 {
        self.manager.to_json()["version"].as_u64().expect("version")
    }

    pub fn latest_turn_count(&self) -> u64 {
        self.manager
            .read_latest_state(|state| state.map(|s| s.turn_count()))
            .expect("channel state available")
    }
}
