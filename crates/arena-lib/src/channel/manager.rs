//! The thread-safe controller of a single channel.
//!
//! One long-lived instance per channel daemon. All mutation happens under
//! one mutex, which also guards the state-version counter and the
//! condition variable behind `wait_for_change`. The manager merges
//! on-chain updates (from the chain feeder), off-chain broadcasts, local
//! moves and automoves, detects disputes filed against us and answers them
//! with resolutions.

use crate::channel::broadcast::OffChainBroadcast;
use crate::channel::game::ChannelGame;
use crate::channel::proof::extend_state_proof;
use crate::channel::rolling::RollingState;
use crate::channel::rules::{BoardMove, BoardRules};
use crate::channel::sender::MoveSender;
use arena_types::{ChannelMetadata, Hash256, SignatureSigner, SignatureVerifier, StateProof};
use base64::prelude::{Engine, BASE64_STANDARD};
use serde_json::json;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Version argument to `wait_for_change` that always blocks.
pub const WAITFORCHANGE_ALWAYS_BLOCK: u64 = 0;

/// Return after this time even if nothing changed, so that waiting threads
/// do not pile up behind a quiet channel and shutdown stays prompt.
const WAITFORCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Hard cap on automoves applied in one update. The automove loop must
/// terminate on its own; running into this cap is a bug in the game rules.
const MAX_AUTOMOVES_PER_UPDATE: usize = 1_000;

/// The dispute state the channel currently has on-chain, as far as the
/// daemon knows.
#[derive(Clone, Debug)]
pub struct DisputeData {
    /// Block height at which the dispute was filed.
    pub height: u64,
    /// Whose turn it is in the disputed state.
    pub turn: Option<usize>,
    /// Turn count of the disputed state.
    pub count: u64,
    /// Txid of a resolution we sent and that is not yet confirmed.
    pub pending_resolution: Option<Hash256>,
}

struct ManagerState {
    board_states: RollingState,
    /// Whether the channel currently exists on-chain at all.
    exists: bool,
    block_hash: Option<Hash256>,
    on_chain_height: u64,
    dispute: Option<DisputeData>,
    /// Txid of an unrequested resolution (`put_state_on_chain`) that may
    /// still be pending.
    pending_put_state_on_chain: Option<Hash256>,
    /// Txid of a dispute we filed that may still be pending.
    pending_dispute: Option<Hash256>,
    version: u64,
    stopped: bool,
}

pub struct ChannelManager {
    rules: Arc<dyn BoardRules>,
    game: Arc<dyn ChannelGame>,
    signer: Arc<dyn SignatureSigner>,
    verifier: Arc<dyn SignatureVerifier>,
    game_id: String,
    channel_id: Hash256,
    player_name: String,
    off_chain: Arc<dyn OffChainBroadcast>,
    on_chain: MoveSender,
    state: Mutex<ManagerState>,
    cv_state_changed: Condvar,
}

impl ChannelManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rules: Arc<dyn BoardRules>,
        game: Arc<dyn ChannelGame>,
        verifier: Arc<dyn SignatureVerifier>,
        signer: Arc<dyn SignatureSigner>,
        game_id: String,
        channel_id: Hash256,
        player_name: String,
        off_chain: Arc<dyn OffChainBroadcast>,
        on_chain: MoveSender,
    ) -> Self {
        let board_states = RollingState::new(
            rules.clone(),
            verifier.clone(),
            game_id.clone(),
            channel_id,
        );
        Self {
            rules,
            game,
            signer,
            verifier,
            game_id,
            channel_id,
            player_name,
            off_chain,
            on_chain,
            state: Mutex::new(ManagerState {
                board_states,
                exists: false,
                block_hash: None,
                on_chain_height: 0,
                dispute: None,
                pending_put_state_on_chain: None,
                pending_dispute: None,
                version: 1,
                stopped: false,
            }),
            cv_state_changed: Condvar::new(),
        }
    }

    pub fn channel_id(&self) -> &Hash256 {
        &self.channel_id
    }

    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    /// If the txid of an earlier transaction is set but no longer pending,
    /// clears it. Applied to disputes and resolutions whenever a new block
    /// comes in.
    fn reset_mined_txid(sender: &MoveSender, txid: &mut Option<Hash256>) {
        if let Some(id) = txid {
            if sender.is_pending(id) {
                debug!(txid = %id, "transaction is still pending");
            } else {
                info!(txid = %id, "transaction is no longer pending");
                *txid = None;
            }
        }
    }

    /// If there is a dispute filed for our turn and we know a fresher
    /// state, sends a resolution, unless one is already on its way.
    fn try_resolve_dispute(&self, state: &mut ManagerState) {
        debug!(channel = %self.channel_id, "trying to resolve a potential dispute");

        if !state.exists {
            debug!("this channel does not exist on-chain");
            return;
        }
        let dispute = match state.dispute.as_mut() {
            Some(dispute) => dispute,
            None => {
                debug!("there is no dispute for the channel");
                return;
            }
        };
        if dispute.pending_resolution.is_some() {
            debug!("there may be a pending resolution already");
            return;
        }

        let turn = dispute.turn.expect("disputed states always have a turn");
        let meta = state.board_states.metadata();
        let disputed_player = &meta.participants[turn].name;
        if *disputed_player != self.player_name {
            debug!(%disputed_player, us = %self.player_name, "dispute is not against us");
            return;
        }

        let latest_count = state.board_states.latest_state().turn_count();
        if latest_count <= dispute.count {
            debug!(
                dispute_count = dispute.count,
                "we have no better state than the disputed turn count"
            );
            return;
        }

        info!(
            channel = %self.channel_id,
            latest_count,
            dispute_count = dispute.count,
            "dispute for our turn, we have a better state"
        );
        dispute.pending_resolution = self.on_chain.send_resolution(state.board_states.state_proof());
    }

    /// Extends the current proof by a local move and feeds it back into
    /// the rolling state. Returns false if the move is invalid.
    fn apply_local_move(&self, state: &mut ManagerState, mv: &[u8]) -> bool {
        assert!(!state.stopped && state.exists);

        let new_proof = match extend_state_proof(
            self.verifier.as_ref(),
            self.signer.as_ref(),
            self.rules.as_ref(),
            &self.game_id,
            &self.channel_id,
            state.board_states.metadata(),
            state.board_states.state_proof(),
            mv,
        ) {
            Some(proof) => proof,
            None => {
                error!("failed to extend state with local move");
                return false;
            }
        };

        // The extension is guaranteed to advance at this point, since
        // otherwise extend_state_proof would already have failed.
        let reinit_id = state.board_states.reinit_id().to_vec();
        assert!(state.board_states.update_with_move(&reinit_id, &new_proof));
        true
    }

    /// Plays automoves for as long as the game dictates them. Returns
    /// whether at least one was made.
    fn process_auto_moves(&self, state: &mut ManagerState) -> bool {
        debug!("processing potential auto moves...");
        let mut found = false;
        for _ in 0..MAX_AUTOMOVES_PER_UPDATE {
            let mv = {
                let latest = state.board_states.latest_state();
                let turn = match latest.whose_turn() {
                    Some(turn) => turn,
                    None => {
                        debug!("we are in a no-turn state");
                        return found;
                    }
                };
                let meta = state.board_states.metadata();
                if meta.participants[turn].name != self.player_name {
                    debug!("it is not our turn");
                    return found;
                }
                match self.game.maybe_auto_move(latest) {
                    Some(mv) => mv,
                    None => {
                        debug!("no automove found");
                        return found;
                    }
                }
            };

            info!("found automove");
            assert!(self.apply_local_move(state, &mv));
            found = true;
        }
        panic!("automove loop did not terminate, the game rules are buggy");
    }

    /// Common tail of every state update: run automoves, broadcast if the
    /// proof advanced, answer disputes, give the game a chance to send an
    /// on-chain move, and wake the waiters.
    fn process_state_update(&self, state: &mut ManagerState, mut broadcast: bool) {
        // A rejected very first on-chain update leaves no state to work
        // with; there is nothing to do but wake the waiters.
        if !state.board_states.is_initialised() {
            self.notify_state_change(state);
            return;
        }

        if self.process_auto_moves(state) {
            broadcast = true;
        }

        if broadcast {
            self.off_chain.send_new_state(
                state.board_states.reinit_id(),
                state.board_states.state_proof(),
            );
        }

        self.try_resolve_dispute(state);

        self.game
            .maybe_on_chain_move(state.board_states.latest_state(), &self.on_chain);

        self.notify_state_change(state);
    }

    /// Feeds an off-chain state proof for the given reinitialisation.
    pub fn process_off_chain(&self, reinit_id: &[u8], proof: &StateProof) {
        let mut state = self.state.lock().expect("manager lock");

        if state.stopped {
            info!("channel manager is stopped, ignoring update");
            return;
        }

        if !state.board_states.update_with_move(reinit_id, proof) {
            return;
        }

        self.process_state_update(&mut state, false);
    }

    /// Records that the channel does not exist on-chain at the given
    /// block (either not yet created or already closed).
    pub fn process_on_chain_nonexistent(&self, block_hash: Hash256, height: u64) {
        let mut state = self.state.lock().expect("manager lock");

        if state.stopped {
            info!("channel manager is stopped, ignoring update");
            return;
        }
        if state.exists {
            info!(channel = %self.channel_id, "channel no longer exists on-chain");
        }

        state.block_hash = Some(block_hash);
        state.on_chain_height = height;
        state.exists = false;

        // Noone to talk to off-chain while the channel is off the chain.
        self.off_chain.set_participants(&ChannelMetadata::default());

        self.notify_state_change(&mut state);
    }

    /// Feeds a full on-chain update for the channel.
    pub fn process_on_chain(
        &self,
        block_hash: Hash256,
        height: u64,
        meta: &ChannelMetadata,
        reinit_state: &[u8],
        proof: &StateProof,
        dispute_height: u64,
    ) {
        let mut state = self.state.lock().expect("manager lock");

        if state.stopped {
            info!("channel manager is stopped, ignoring update");
            return;
        }
        if !state.exists {
            info!(channel = %self.channel_id, "channel is now found on-chain");
        }

        state.block_hash = Some(block_hash);
        state.on_chain_height = height;

        Self::reset_mined_txid(&self.on_chain, &mut state.pending_put_state_on_chain);
        Self::reset_mined_txid(&self.on_chain, &mut state.pending_dispute);
        state.exists = true;
        state.board_states.update_on_chain(meta, reinit_state, proof);

        if dispute_height == 0 {
            if state.dispute.is_some() {
                info!(channel = %self.channel_id, "dispute is resolved");
            }
            state.dispute = None;
        } else {
            if state.dispute.is_none() {
                info!(channel = %self.channel_id, dispute_height, "channel has now a dispute");
                state.dispute = Some(DisputeData {
                    height: dispute_height,
                    turn: None,
                    count: 0,
                    pending_resolution: None,
                });
            }

            let parsed = self
                .rules
                .parse_state(&self.channel_id, meta, proof.end_state())
                .expect("on-chain state must parse");
            let dispute = state.dispute.as_mut().expect("dispute just ensured");
            dispute.height = dispute_height;
            dispute.turn = parsed.whose_turn();
            dispute.count = parsed.turn_count();
            Self::reset_mined_txid(&self.on_chain, &mut dispute.pending_resolution);
        }

        // Keep the off-chain transport's participant list at the latest
        // known version.
        self.off_chain.set_participants(meta);

        self.process_state_update(&mut state, false);
    }

    /// Applies a move made locally by the player.
    pub fn process_local_move(&self, mv: BoardMove) {
        info!("local move");
        let mut state = self.state.lock().expect("manager lock");

        if state.stopped {
            info!("channel manager is stopped, ignoring update");
            return;
        }
        if !state.exists {
            error!("channel does not exist on chain, ignoring local move");
            return;
        }

        if !self.apply_local_move(&mut state, &mv) {
            return;
        }

        self.process_state_update(&mut state, true);
    }

    /// Explicitly runs the automove loop, broadcasting if anything came of
    /// it. Used when game-side state outside the board (e.g. revealed
    /// secrets) newly enables automoves.
    pub fn trigger_automoves(&self) {
        let mut state = self.state.lock().expect("manager lock");

        if state.stopped {
            info!("channel manager is stopped, not triggering automoves");
            return;
        }
        if !state.exists {
            info!("channel does not exist on chain, not triggering automoves");
            return;
        }

        if !self.process_auto_moves(&mut state) {
            info!("automoves triggered explicitly, but none found");
            return;
        }

        self.process_state_update(&mut state, true);
    }

    /// Unconditionally sends the current best state in a resolution move,
    /// e.g. to clear a dispute against the opponent or to close a decided
    /// channel. Returns the txid if one was sent.
    pub fn put_state_on_chain(&self) -> Option<Hash256> {
        info!(channel = %self.channel_id, "trying to put the latest state on chain");
        let mut state = self.state.lock().expect("manager lock");

        if !state.exists || !state.board_states.is_initialised() {
            warn!("the channel does not exist on chain");
            return None;
        }

        let latest_count = state.board_states.latest_state().turn_count();
        let on_chain_count = state.board_states.on_chain_turn_count();
        if latest_count <= on_chain_count {
            // The latest state is refreshed from every on-chain update, so
            // it can never lag behind the chain.
            assert_eq!(latest_count, on_chain_count);
            warn!(
                on_chain_count,
                "latest state matches the best known state already, not sending"
            );
            return None;
        }

        state.pending_put_state_on_chain =
            self.on_chain.send_resolution(state.board_states.state_proof());
        state.pending_put_state_on_chain
    }

    /// Files a dispute with the current best state. Returns the txid if
    /// one was sent.
    pub fn file_dispute(&self) -> Option<Hash256> {
        info!(channel = %self.channel_id, "trying to file a dispute");
        let mut state = self.state.lock().expect("manager lock");

        if !state.exists || !state.board_states.is_initialised() {
            warn!("the channel does not exist on chain");
            return None;
        }
        if state.dispute.is_some() {
            warn!("there is already a dispute for the channel");
            return None;
        }
        if state.pending_dispute.is_some() {
            warn!("there may already be a pending dispute");
            return None;
        }

        state.pending_dispute = self.on_chain.send_dispute(state.board_states.state_proof());
        state.pending_dispute
    }

    /// Runs the callback on the latest parsed state (or `None` when the
    /// channel is not on-chain), holding the manager lock throughout.
    pub fn read_latest_state<R>(
        &self,
        f: impl FnOnce(Option<&dyn crate::channel::rules::ParsedBoardState>) -> R,
    ) -> R {
        let state = self.state.lock().expect("manager lock");
        if state.exists && state.board_states.is_initialised() {
            f(Some(state.board_states.latest_state()))
        } else {
            f(None)
        }
    }

    /// Gates all future mutating calls and wakes up all waiters. Must be
    /// called before the daemon shuts down.
    pub fn stop_updates(&self) {
        let mut state = self.state.lock().expect("manager lock");
        state.stopped = true;
        self.notify_state_change(&mut state);
    }

    fn notify_state_change(&self, state: &mut ManagerState) {
        state.version += 1;
        debug!(version = state.version, "notifying waiters about state change");
        self.cv_state_changed.notify_all();
    }

    fn unlocked_to_json(&self, state: &ManagerState) -> serde_json::Value {
        let mut res = json!({
            "id": self.channel_id.to_hex(),
            "playername": self.player_name,
            "existsonchain": state.exists,
            "version": state.version,
        });

        if let Some(hash) = &state.block_hash {
            res["blockhash"] = json!(hash.to_hex());
            res["height"] = json!(state.on_chain_height);
        }

        if !state.exists || !state.board_states.is_initialised() {
            return res;
        }

        let meta = state.board_states.metadata();
        let proof = state.board_states.state_proof();
        let latest = state.board_states.latest_state();
        res["current"] = json!({
            "meta": {
                "participants": meta.participants.iter().map(|p| json!({
                    "name": p.name,
                    "address": p.address,
                })).collect::<Vec<_>>(),
                "reinit": BASE64_STANDARD.encode(&meta.reinit),
            },
            "state": {
                "base64": BASE64_STANDARD.encode(proof.end_state()),
                "parsed": latest.to_json(),
                "whoseturn": latest.whose_turn(),
                "turncount": latest.turn_count(),
            },
        });

        if let Some(dispute) = &state.dispute {
            res["dispute"] = json!({
                "height": dispute.height,
                "whoseturn": dispute.turn,
                "canresolve": latest.turn_count() > dispute.count,
            });
        }

        let mut pending = json!({});
        if let Some(txid) = &state.pending_put_state_on_chain {
            pending["putstateonchain"] = json!(txid.to_hex());
        }
        if let Some(txid) = &state.pending_dispute {
            pending["dispute"] = json!(txid.to_hex());
        }
        if let Some(txid) = state.dispute.as_ref().and_then(|d| d.pending_resolution) {
            pending["resolution"] = json!(txid.to_hex());
        }
        res["pending"] = pending;

        res
    }

    /// A JSON snapshot of the channel for frontends.
    pub fn to_json(&self) -> serde_json::Value {
        let state = self.state.lock().expect("manager lock");
        self.unlocked_to_json(&state)
    }

    /// Blocks until the state version differs from the known one (or the
    /// wait times out, or the manager is stopped) and returns the current
    /// snapshot. Spurious wakes are fine; callers loop with the version
    /// from the returned snapshot.
    pub fn wait_for_change(&self, known_version: u64) -> serde_json::Value {
        let state = self.state.lock().expect("manager lock");

        if known_version != WAITFORCHANGE_ALWAYS_BLOCK && known_version != state.version {
            debug!(
                known_version,
                current = state.version,
                "known version differs, returning immediately"
            );
            return self.unlocked_to_json(&state);
        }

        if state.stopped {
            debug!("channel manager is stopped, not waiting for changes");
            self.unlocked_to_json(&state)
        } else {
            debug!("waiting for state change on condition variable...");
            let (state, _timeout) = self
                .cv_state_changed
                .wait_timeout(state, WAITFORCHANGE_TIMEOUT)
                .expect("manager lock");
            debug!("potential state change detected in wait_for_change");
            self.unlocked_to_json(&state)
        }
    }
}

/// Helper to share a manager between the feeder, RPC server and broadcast
/// receiver threads.
pub type SharedChannelManager = Arc<ChannelManager>;
