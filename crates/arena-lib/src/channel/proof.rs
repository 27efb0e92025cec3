//! Verification and extension of state proofs.
//!
//! A state proof is a chain of signed transitions from an initial state to
//! the claimed current state. Each transition must be endorsed by the
//! participant who made the move. The proof as a whole is authoritative if
//! its initial state is the reinitialisation anchor (which is known from
//! the chain), or if the signatures accumulated across all states cover
//! every participant.

use crate::channel::rules::{BoardRules, BoardState, ParsedBoardState};
use arena_types::{
    sign_data_for_participant, verify_participant_signatures, ChannelMetadata, Hash256, SignedData,
    SignatureSigner, SignatureVerifier, StateProof, StateTransition,
};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Topic under which board states are signed.
const STATE_TOPIC: &str = "state";

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofError {
    #[error("invalid initial or prior state")]
    BadInitial,
    #[error("transition does not lead to the claimed state")]
    BadTransition,
    #[error("missing required participant signatures")]
    InsufficientSignatures,
    #[error("game rules rejected the move")]
    GameRuleRejected,
}

/// Verifies a single transition on top of a parsed state and returns the
/// signer set of the new state together with its parsed form.
fn extra_verify_state_transition(
    verifier: &dyn SignatureVerifier,
    rules: &dyn BoardRules,
    game_id: &str,
    channel_id: &Hash256,
    meta: &ChannelMetadata,
    old_state: &dyn ParsedBoardState,
    transition: &StateTransition,
) -> Result<(BTreeSet<usize>, Box<dyn ParsedBoardState>), ProofError> {
    let turn = match old_state.whose_turn() {
        Some(turn) => turn,
        None => {
            warn!("state transition applied to a no-turn state");
            return Err(ProofError::BadTransition);
        }
    };

    let new_state = match old_state.apply_move(&transition.board_move) {
        Some(state) => state,
        None => {
            warn!("failed to apply move of state transition");
            return Err(ProofError::GameRuleRejected);
        }
    };

    // new_state is the output of a successful apply_move, so it must
    // re-parse.
    let parsed_new = rules
        .parse_state(channel_id, meta, &new_state)
        .expect("apply_move produced an unparseable state");

    if !parsed_new.equals(&transition.new_state.data) {
        warn!("wrong new state claimed in state transition");
        return Err(ProofError::BadTransition);
    }

    let signatures = verify_participant_signatures(
        verifier,
        game_id,
        channel_id,
        meta,
        STATE_TOPIC,
        &transition.new_state,
    );
    if !signatures.contains(&turn) {
        warn!(turn, "no valid signature of the moving player on transition");
        return Err(ProofError::InsufficientSignatures);
    }

    Ok((signatures, parsed_new))
}

/// Verifies that a transition is valid on top of the given old state.
pub fn verify_state_transition(
    verifier: &dyn SignatureVerifier,
    rules: &dyn BoardRules,
    game_id: &str,
    channel_id: &Hash256,
    meta: &ChannelMetadata,
    old_state: &[u8],
    transition: &StateTransition,
) -> Result<(), ProofError> {
    let parsed_old = rules
        .parse_state(channel_id, meta, old_state)
        .ok_or_else(|| {
            warn!("invalid old state in state transition");
            ProofError::BadInitial
        })?;

    extra_verify_state_transition(
        verifier,
        rules,
        game_id,
        channel_id,
        meta,
        parsed_old.as_ref(),
        transition,
    )
    .map(|_| ())
}

/// Verifies a full state proof against the channel's reinitialisation
/// anchor and returns the proven end state.
pub fn verify_state_proof(
    verifier: &dyn SignatureVerifier,
    rules: &dyn BoardRules,
    game_id: &str,
    channel_id: &Hash256,
    meta: &ChannelMetadata,
    reinit_state: &[u8],
    proof: &StateProof,
) -> Result<BoardState, ProofError> {
    let mut signatures = verify_participant_signatures(
        verifier,
        game_id,
        channel_id,
        meta,
        STATE_TOPIC,
        &proof.initial_state,
    );

    let mut parsed = rules
        .parse_state(channel_id, meta, &proof.initial_state.data)
        .ok_or_else(|| {
            warn!("invalid initial state for state proof");
            ProofError::BadInitial
        })?;

    let mut end_state = proof.initial_state.data.clone();
    let anchored_on_chain = parsed.equals(reinit_state);

    for transition in &proof.transitions {
        let (new_signatures, parsed_new) = extra_verify_state_transition(
            verifier,
            rules,
            game_id,
            channel_id,
            meta,
            parsed.as_ref(),
            transition,
        )?;
        signatures.extend(new_signatures);
        parsed = parsed_new;
        end_state = transition.new_state.data.clone();
    }

    if anchored_on_chain {
        debug!("state proof starts from the reinit state and is valid");
        return Ok(end_state);
    }

    for index in 0..meta.participants.len() {
        if !signatures.contains(&index) {
            warn!(index, "state proof has no signature of participant");
            return Err(ProofError::InsufficientSignatures);
        }
    }

    debug!("state proof has signatures by all players and is valid");
    Ok(end_state)
}

/// Extends an existing (valid) proof by one local move, signing the new
/// state and minimising the result: only the trailing transitions needed
/// to accumulate signatures of all participants are kept.
pub fn extend_state_proof(
    verifier: &dyn SignatureVerifier,
    signer: &dyn SignatureSigner,
    rules: &dyn BoardRules,
    game_id: &str,
    channel_id: &Hash256,
    meta: &ChannelMetadata,
    old_proof: &StateProof,
    mv: &[u8],
) -> Option<StateProof> {
    let old_state = old_proof.end_state();
    let parsed_old = rules
        .parse_state(channel_id, meta, old_state)
        .expect("invalid end state in stored state proof");

    let turn = match parsed_old.whose_turn() {
        Some(turn) => turn,
        None => {
            error!("cannot extend state proof in a no-turn state");
            return None;
        }
    };

    let new_state = match parsed_old.apply_move(mv) {
        Some(state) => state,
        None => {
            error!("invalid move for extending a state proof");
            return None;
        }
    };

    let mut transition = StateTransition {
        board_move: mv.to_vec(),
        new_state: SignedData::unsigned(new_state),
    };

    debug!(turn, "trying to sign new state for participant");
    if !sign_data_for_participant(
        signer,
        game_id,
        channel_id,
        meta,
        STATE_TOPIC,
        turn,
        &mut transition.new_state,
    ) {
        return None;
    }

    // Normalise the old initial state and all transitions (including the
    // fresh one) into one sequence of states, then find the shortest
    // trailing subsequence whose accumulated signatures cover everyone.
    let mut transitions: Vec<StateTransition> = Vec::new();
    transitions.push(StateTransition {
        board_move: Vec::new(),
        new_state: old_proof.initial_state.clone(),
    });
    transitions.extend(old_proof.transitions.iter().cloned());
    transitions.push(transition);

    let participants = meta.participants.len();
    let mut signatures: BTreeSet<usize> = BTreeSet::new();
    let mut begin = transitions.len() - 1;
    loop {
        let new_signatures = verify_participant_signatures(
            verifier,
            game_id,
            channel_id,
            meta,
            STATE_TOPIC,
            &transitions[begin].new_state,
        );
        signatures.extend(new_signatures);

        if signatures.len() == participants || begin == 0 {
            break;
        }
        begin -= 1;
    }

    let mut tail = transitions.drain(begin..);
    let initial_state = tail.next().expect("suffix is never empty").new_state;
    Some(StateProof {
        initial_state,
        transitions: tail.collect(),
    })
}
