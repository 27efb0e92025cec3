//! Channel metadata and the signed state-proof protocol structures,
//! together with their binary wire encoding.
//!
//! The wire encoding is positional (bincode with varint lengths), so the
//! structural layer cannot carry unknown fields at all, and any surplus
//! bytes make the decode fail. Only the opaque board-state blob inside
//! [`SignedData::data`] is free-form; games parse it with their own,
//! possibly more tolerant, inner format.

use base64::prelude::{Engine, BASE64_STANDARD};
use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on the encoded size of any protocol structure. Proofs beyond
/// this could not be put in an on-chain move anyway.
const MAX_ENCODED_SIZE: u64 = 1024 * 1024;

/// One named party of a channel.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    /// The on-chain name of the participant.
    pub name: String,
    /// The address against which channel signatures are verified.
    pub address: String,
}

/// Metadata of a channel: the ordered participant list (the index is the
/// turn index) and the current reinitialisation marker.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChannelMetadata {
    pub participants: Vec<Participant>,
    /// Opaque marker that changes on every channel reset, so that state
    /// cached for a rolled-back reinitialisation cannot be confused with
    /// the current one.
    pub reinit: Vec<u8>,
}

impl ChannelMetadata {
    /// Looks up the turn index of the given participant name.
    pub fn participant_index(&self, name: &str) -> Option<usize> {
        self.participants.iter().position(|p| p.name == name)
    }
}

/// A payload with any number of signatures over it. The signatures are
/// unordered; recovery yields the set of participant indices that signed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SignedData {
    pub data: Vec<u8>,
    pub signatures: Vec<Vec<u8>>,
}

impl SignedData {
    pub fn unsigned(data: Vec<u8>) -> Self {
        Self {
            data,
            signatures: Vec::new(),
        }
    }
}

/// A single move together with the signed state it leads to.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateTransition {
    #[serde(rename = "move")]
    pub board_move: Vec<u8>,
    pub new_state: SignedData,
}

/// A chain of signed transitions from a reinitialisation anchor to the
/// current board state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateProof {
    pub initial_state: SignedData,
    pub transitions: Vec<StateTransition>,
}

impl StateProof {
    /// The trivial proof whose end state is the reinitialisation state
    /// itself. Needs no signatures to verify.
    pub fn from_reinit(reinit_state: &[u8]) -> Self {
        Self {
            initial_state: SignedData::unsigned(reinit_state.to_vec()),
            transitions: Vec::new(),
        }
    }

    /// The (unverified) final state of the proof chain.
    pub fn end_state(&self) -> &[u8] {
        match self.transitions.last() {
            Some(t) => &t.new_state.data,
            None => &self.initial_state.data,
        }
    }

    /// Whether the proof is just the reinit state with no transitions and
    /// no signatures. Such proofs are not worth persisting.
    pub fn is_trivial_for(&self, reinit_state: &[u8]) -> bool {
        self.transitions.is_empty()
            && self.initial_state.signatures.is_empty()
            && self.initial_state.data == reinit_state
    }
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("binary decode failed: {0}")]
    Decode(#[from] bincode::Error),
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

fn codec() -> impl Options {
    bincode::options().with_limit(MAX_ENCODED_SIZE)
}

/// Encodes a protocol structure into its stable binary form.
pub fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    codec().serialize(value).expect("wire encoding cannot fail")
}

/// Decodes a protocol structure, rejecting trailing bytes and oversized
/// payloads.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(codec().deserialize(bytes)?)
}

/// Encodes a state proof for embedding into on-chain move JSON.
pub fn proof_to_base64(proof: &StateProof) -> String {
    BASE64_STANDARD.encode(encode(proof))
}

/// Decodes a state proof from its on-chain move representation.
pub fn proof_from_base64(value: &str) -> Result<StateProof, CodecError> {
    let bytes = BASE64_STANDARD.decode(value)?;
    decode(&bytes)
}
