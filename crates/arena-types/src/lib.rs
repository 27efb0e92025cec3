//! Protocol types for arena game channels.
//!
//! This crate defines the primitives shared between the channel daemon and
//! the on-chain arbiter: hashes and keys, the channel metadata and signed
//! state-proof structures, their binary wire encoding, and the channel
//! signature scheme.

mod channel;
mod primitives;
mod signatures;

pub mod serde_utils;

pub use channel::{
    decode, encode, proof_from_base64, proof_to_base64, ChannelMetadata, CodecError, Participant,
    SignedData, StateProof, StateTransition,
};
pub use primitives::{Hash256, Privkey, Pubkey};
pub use signatures::{
    channel_signature_message, pubkey_to_address, sign_data_for_participant,
    verify_participant_signatures, Secp256k1Signer, Secp256k1Verifier, SignatureSigner,
    SignatureVerifier, SIGNATURE_SIZE,
};

/// Sentinel for participant indices: the metadata participant list never
/// holds more than two entries.
pub const MAX_PARTICIPANTS: usize = 2;
