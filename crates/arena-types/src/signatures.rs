//! The channel signature scheme.
//!
//! Messages are signed with recoverable ECDSA over the SHA-256 digest of a
//! domain-separated text that binds the game id, channel id, current
//! reinitialisation and a topic string to the payload. Verification
//! recovers an address and matches it against the participants' addresses,
//! yielding the set of participant indices that signed.

use crate::{ChannelMetadata, Hash256, Privkey, Pubkey, SignedData};
use base64::prelude::{Engine, BASE64_STANDARD};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, SECP256K1};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use tracing::{debug, error};

/// Serialized length of a recoverable signature: 64 compact bytes plus the
/// recovery id.
pub const SIGNATURE_SIZE: usize = 65;

/// Recovers signer addresses from channel signature messages.
pub trait SignatureVerifier: Send + Sync {
    /// Returns the address that produced the signature, or `None` if the
    /// signature is malformed.
    fn recover_signer(&self, message: &str, signature: &[u8]) -> Option<String>;
}

/// Produces channel signatures for one particular address.
pub trait SignatureSigner: Send + Sync {
    /// The address the signatures will verify against.
    fn address(&self) -> &str;

    /// Signs the given message.
    fn sign_message(&self, message: &str) -> Vec<u8>;
}

/// Derives the address string for a public key: the hex encoding of the
/// first 20 bytes of the SHA-256 of its compressed serialization.
pub fn pubkey_to_address(pubkey: &Pubkey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pubkey.serialize());
    hex::encode(&hasher.finalize()[..20])
}

/// Constructs the message that gets signed for the given channel, topic and
/// payload. Topics must be alphanumeric; anything else indicates a
/// programming error in the game and aborts.
pub fn channel_signature_message(
    game_id: &str,
    channel_id: &Hash256,
    meta: &ChannelMetadata,
    topic: &str,
    data: &[u8],
) -> String {
    assert!(
        !topic.is_empty() && topic.chars().all(|c| c.is_ascii_alphanumeric()),
        "invalid channel signature topic: {topic:?}"
    );

    format!(
        "Arena Channel Signature\n\
         Game ID: {}\n\
         Channel: {:x}\n\
         Reinit: {}\n\
         Topic: {}\n\
         Data Hash: {:x}",
        game_id,
        channel_id,
        BASE64_STANDARD.encode(&meta.reinit),
        topic,
        Hash256::digest(data),
    )
}

fn message_digest(message: &str) -> Message {
    let digest: [u8; 32] = Hash256::digest(message.as_bytes()).into();
    Message::from_digest_slice(&digest).expect("32-byte digest")
}

/// Verifies all signatures on a [`SignedData`] and returns the set of
/// participant indices whose address was recovered. Invalid signatures are
/// skipped, they do not fail the whole set.
pub fn verify_participant_signatures(
    verifier: &dyn SignatureVerifier,
    game_id: &str,
    channel_id: &Hash256,
    meta: &ChannelMetadata,
    topic: &str,
    data: &SignedData,
) -> BTreeSet<usize> {
    let message = channel_signature_message(game_id, channel_id, meta, topic, &data.data);

    let mut addresses = BTreeSet::new();
    for signature in &data.signatures {
        match verifier.recover_signer(&message, signature) {
            Some(addr) => {
                addresses.insert(addr);
            }
            None => debug!("skipping unrecoverable channel signature"),
        }
    }

    meta.participants
        .iter()
        .enumerate()
        .filter(|(_, p)| addresses.contains(&p.address))
        .map(|(i, _)| i)
        .collect()
}

/// Signs the payload for the participant with the given index and appends
/// the signature. Fails if the signer's address does not belong to that
/// participant.
pub fn sign_data_for_participant(
    signer: &dyn SignatureSigner,
    game_id: &str,
    channel_id: &Hash256,
    meta: &ChannelMetadata,
    topic: &str,
    index: usize,
    data: &mut SignedData,
) -> bool {
    let participant = match meta.participants.get(index) {
        Some(p) => p,
        None => {
            error!(index, "participant index out of range for signing");
            return false;
        }
    };
    if participant.address != signer.address() {
        error!(
            address = signer.address(),
            expected = participant.address,
            "the provided signer is for a different address"
        );
        return false;
    }

    let message = channel_signature_message(game_id, channel_id, meta, topic, &data.data);
    data.signatures.push(signer.sign_message(&message));
    true
}

/// Verifier recovering secp256k1 addresses from recoverable signatures.
#[derive(Clone, Copy, Debug, Default)]
pub struct Secp256k1Verifier;

impl SignatureVerifier for Secp256k1Verifier {
    fn recover_signer(&self, message: &str, signature: &[u8]) -> Option<String> {
        if signature.len() != SIGNATURE_SIZE {
            return None;
        }
        let recovery_id = RecoveryId::from_i32(signature[SIGNATURE_SIZE - 1] as i32).ok()?;
        let signature =
            RecoverableSignature::from_compact(&signature[..SIGNATURE_SIZE - 1], recovery_id)
                .ok()?;
        let pubkey = SECP256K1
            .recover_ecdsa(&message_digest(message), &signature)
            .ok()?;
        Some(pubkey_to_address(&pubkey.into()))
    }
}

/// Signer holding a secp256k1 secret key.
pub struct Secp256k1Signer {
    key: Privkey,
    address: String,
}

impl Secp256k1Signer {
    pub fn new(key: Privkey) -> Self {
        let address = pubkey_to_address(&key.pubkey());
        Self { key, address }
    }
}

impl SignatureSigner for Secp256k1Signer {
    fn address(&self) -> &str {
        &self.address
    }

    fn sign_message(&self, message: &str) -> Vec<u8> {
        let signature = SECP256K1.sign_ecdsa_recoverable(&message_digest(message), &self.key.0);
        let (recovery_id, data) = signature.serialize_compact();
        let mut bytes = [0u8; SIGNATURE_SIZE];
        bytes[..SIGNATURE_SIZE - 1].copy_from_slice(&data);
        bytes[SIGNATURE_SIZE - 1] = recovery_id.to_i32() as u8;
        bytes.to_vec()
    }
}
