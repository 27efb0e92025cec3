//! The rolling per-reinitialisation state cache.
//!
//! All reinitialisations ever observed are kept, each with the freshest
//! known proof for it. A chain reorg that temporarily reinstates an older
//! reinitialisation therefore only moves the "current" pointer; the best
//! state of the superseded reinitialisation survives and is picked up
//! again should it return.

use crate::channel::proof::verify_state_proof;
use crate::channel::rules::{check_versioned_proof, BoardRules, BoardState, ParsedBoardState};
use arena_types::{ChannelMetadata, Hash256, SignatureVerifier, StateProof};
use base64::prelude::{Engine, BASE64_STANDARD};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct ReinitEntry {
    meta: ChannelMetadata,
    reinit_state: BoardState,
    /// The highest turn count ever reported on-chain for this reinit.
    on_chain_turn: u64,
    proof: StateProof,
    latest: Box<dyn ParsedBoardState>,
}

pub struct RollingState {
    rules: Arc<dyn BoardRules>,
    verifier: Arc<dyn SignatureVerifier>,
    game_id: String,
    channel_id: Hash256,
    reinits: HashMap<Vec<u8>, ReinitEntry>,
    current: Vec<u8>,
}

impl RollingState {
    pub fn new(
        rules: Arc<dyn BoardRules>,
        verifier: Arc<dyn SignatureVerifier>,
        game_id: String,
        channel_id: Hash256,
    ) -> Self {
        Self {
            rules,
            verifier,
            game_id,
            channel_id,
            reinits: HashMap::new(),
            current: Vec::new(),
        }
    }

    pub fn is_initialised(&self) -> bool {
        !self.reinits.is_empty()
    }

    fn current_entry(&self) -> &ReinitEntry {
        assert!(
            self.is_initialised(),
            "RollingState has not been initialised yet"
        );
        self.reinits
            .get(&self.current)
            .expect("current reinit id has an entry")
    }

    pub fn latest_state(&self) -> &dyn ParsedBoardState {
        self.current_entry().latest.as_ref()
    }

    pub fn state_proof(&self) -> &StateProof {
        &self.current_entry().proof
    }

    pub fn on_chain_turn_count(&self) -> u64 {
        self.current_entry().on_chain_turn
    }

    pub fn reinit_id(&self) -> &[u8] {
        assert!(
            self.is_initialised(),
            "RollingState has not been initialised yet"
        );
        &self.current
    }

    pub fn metadata(&self) -> &ChannelMetadata {
        &self.current_entry().meta
    }

    /// Feeds an on-chain update into the cache. The update's reinit always
    /// becomes the current one; within its entry the proof is only taken
    /// over if it is fresher. Returns whether anything observable changed.
    pub fn update_on_chain(
        &mut self,
        meta: &ChannelMetadata,
        reinit_state: &[u8],
        proof: &StateProof,
    ) -> bool {
        if !check_versioned_proof(self.rules.as_ref(), meta, proof) {
            warn!("on-chain update has a proof of unexpected version");
            return false;
        }

        let proven_state = match verify_state_proof(
            self.verifier.as_ref(),
            self.rules.as_ref(),
            &self.game_id,
            &self.channel_id,
            meta,
            reinit_state,
            proof,
        ) {
            Ok(state) => state,
            Err(err) => {
                warn!(%err, "state proof provided on-chain is not valid");
                return false;
            }
        };

        // Track whether the current reinit id flips, which decides the
        // return value when the incoming state is not fresher than the
        // cached one.
        let reinit_change = self.current != meta.reinit;
        self.current = meta.reinit.clone();
        info!(
            channel = %self.channel_id,
            reinit = BASE64_STANDARD.encode(&meta.reinit),
            "performing on-chain update"
        );

        let parsed = self
            .rules
            .parse_state(&self.channel_id, meta, &proven_state)
            .expect("verified proof end state must parse");
        let parsed_count = parsed.turn_count();

        if !self.reinits.contains_key(&self.current) {
            info!(
                turn_count = parsed_count,
                "added previously unknown reinitialisation"
            );
            self.reinits.insert(
                self.current.clone(),
                ReinitEntry {
                    meta: meta.clone(),
                    reinit_state: reinit_state.to_vec(),
                    on_chain_turn: parsed_count,
                    proof: proof.clone(),
                    latest: parsed,
                },
            );
            return true;
        }
        let entry = self
            .reinits
            .get_mut(&self.current)
            .expect("entry just checked");

        // The chain must report the same metadata and anchor for one
        // reinit id across its lifetime.
        assert_eq!(meta, &entry.meta, "metadata changed for known reinit");
        assert_eq!(
            reinit_state, entry.reinit_state,
            "reinit state changed for known reinit"
        );

        debug!(turn_count = parsed_count, "turn count provided in the update");
        if parsed_count > entry.on_chain_turn {
            info!(turn_count = parsed_count, "updating on-chain turn count");
            entry.on_chain_turn = parsed_count;
        }

        let current_count = entry.latest.turn_count();
        if current_count >= parsed_count {
            debug!(
                current_count,
                "the new state is not fresher than the known one"
            );
            return reinit_change;
        }

        info!("the new state is fresher, updating");
        entry.proof = proof.clone();
        entry.latest = parsed;
        true
    }

    /// Feeds an off-chain proof into the cache. The update applies to the
    /// entry of the given reinit id whether or not it is current, so that
    /// a reorg back to it still finds the best known state. Returns true
    /// only when the *current* entry advanced.
    pub fn update_with_move(&mut self, reinit_id: &[u8], proof: &StateProof) -> bool {
        let entry = match self.reinits.get_mut(reinit_id) {
            Some(entry) => entry,
            None => {
                warn!(
                    channel = %self.channel_id,
                    reinit = BASE64_STANDARD.encode(reinit_id),
                    "off-chain update has unknown reinitialisation id"
                );
                return false;
            }
        };

        if !check_versioned_proof(self.rules.as_ref(), &entry.meta, proof) {
            warn!("off-chain update has invalid versioned state proof");
            return false;
        }

        // Unlike on-chain updates (which the GSP filters), this data comes
        // straight from the other player and may be complete garbage.
        let proven_state = match verify_state_proof(
            self.verifier.as_ref(),
            self.rules.as_ref(),
            &self.game_id,
            &self.channel_id,
            &entry.meta,
            &entry.reinit_state,
            proof,
        ) {
            Ok(state) => state,
            Err(err) => {
                warn!(channel = %self.channel_id, %err, "off-chain update has an invalid state proof");
                return false;
            }
        };

        let parsed = self
            .rules
            .parse_state(&self.channel_id, &entry.meta, &proven_state)
            .expect("verified proof end state must parse");
        let parsed_count = parsed.turn_count();
        info!(
            channel = %self.channel_id,
            turn_count = parsed_count,
            "received off-chain update"
        );

        let current_count = entry.latest.turn_count();
        if current_count >= parsed_count {
            debug!(
                current_count,
                "the new state is not fresher than the known one"
            );
            return false;
        }

        info!("the new state is fresher, updating");
        entry.proof = proof.clone();
        entry.latest = parsed;

        // Only an update to the current reinit is an observable change;
        // updates to superseded reinits become visible if and when an
        // on-chain update switches back to them.
        reinit_id == self.current
    }
}
