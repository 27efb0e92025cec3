//! Basic primitive types: Hash256, Pubkey, Privkey.

use crate::serde_utils::SliceHex;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use sha2::{Digest, Sha256};

// ============================================================
// Hash256
// ============================================================

/// A 256-bit hash, used as channel id, block hash and transaction id.
#[serde_as]
#[derive(Copy, Clone, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct Hash256(#[serde_as(as = "SliceHex")] [u8; 32]);

impl Hash256 {
    /// Hashes the given data with SHA-256.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash256(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl From<Hash256> for [u8; 32] {
    fn from(value: Hash256) -> Self {
        value.0
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Hash256 {
    type Error = anyhow::Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != 32 {
            return Err(anyhow::anyhow!("invalid hash length {}", value.len()));
        }
        let mut data = [0u8; 32];
        data.copy_from_slice(value);
        Ok(Hash256(data))
    }
}

impl ::core::fmt::LowerHex for Hash256 {
    fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
        if f.alternate() {
            write!(f, "0x")?;
        }
        write!(f, "{}", hex::encode(self.0))
    }
}

impl ::core::fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
        write!(f, "Hash256({:#x})", self)
    }
}

impl ::core::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::str::FromStr for Hash256 {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_start_matches("0x");
        let bytes = hex::decode(s)?;
        Hash256::try_from(bytes.as_slice())
    }
}

// ============================================================
// Pubkey
// ============================================================

const PUBKEY_SIZE: usize = 33;

/// A compressed secp256k1 public key, stored in serialized form for fast
/// comparison and hashing.
#[serde_as]
#[derive(Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pubkey(#[serde_as(as = "SliceHex")] pub [u8; PUBKEY_SIZE]);

impl std::fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pubkey({})", hex::encode(self.0))
    }
}

impl std::fmt::Display for Pubkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Pubkey {
    pub fn serialize(&self) -> [u8; PUBKEY_SIZE] {
        self.0
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, secp256k1::Error> {
        let _ = secp256k1::PublicKey::from_slice(slice)?;
        let mut bytes = [0u8; PUBKEY_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Pubkey(bytes))
    }
}

impl From<secp256k1::PublicKey> for Pubkey {
    fn from(pk: secp256k1::PublicKey) -> Pubkey {
        Pubkey(pk.serialize())
    }
}

impl From<Pubkey> for secp256k1::PublicKey {
    fn from(pk: Pubkey) -> Self {
        secp256k1::PublicKey::from_slice(&pk.0)
            .expect("Pubkey should always contain valid serialized public key")
    }
}

impl From<&Pubkey> for secp256k1::PublicKey {
    fn from(pk: &Pubkey) -> Self {
        secp256k1::PublicKey::from_slice(&pk.0)
            .expect("Pubkey should always contain valid serialized public key")
    }
}

// ============================================================
// Privkey
// ============================================================

/// A wrapper for a secp256k1 secret key.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Privkey(pub secp256k1::SecretKey);

impl Privkey {
    pub fn from_slice(key: &[u8]) -> Self {
        secp256k1::SecretKey::from_slice(key)
            .expect("Invalid secret key")
            .into()
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey::from(self.0.public_key(secp256k1::SECP256K1))
    }
}

impl From<[u8; 32]> for Privkey {
    fn from(k: [u8; 32]) -> Self {
        Privkey(secp256k1::SecretKey::from_slice(&k).expect("Invalid secret key"))
    }
}

impl From<&[u8; 32]> for Privkey {
    fn from(k: &[u8; 32]) -> Self {
        Self::from_slice(k)
    }
}

impl From<Hash256> for Privkey {
    fn from(hash: Hash256) -> Self {
        let bytes: [u8; 32] = hash.into();
        Privkey::from_slice(&bytes)
    }
}

impl From<secp256k1::SecretKey> for Privkey {
    fn from(sk: secp256k1::SecretKey) -> Self {
        Self(sk)
    }
}

impl From<Privkey> for secp256k1::SecretKey {
    fn from(pk: Privkey) -> Self {
        pk.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn hash256_hex_round_trip() {
        let hash = Hash256::digest(b"arena");
        let parsed = Hash256::from_str(&hash.to_hex()).expect("hash from hex");
        assert_eq!(parsed, hash);

        let prefixed = format!("{:#x}", hash);
        assert_eq!(Hash256::from_str(&prefixed).expect("0x hash"), hash);
    }

    #[test]
    fn hash256_rejects_bad_length() {
        assert!(Hash256::from_str("abcd").is_err());
        assert!(Hash256::try_from(&b"short"[..]).is_err());
    }

    #[test]
    fn privkey_derives_stable_pubkey() {
        let key = Privkey::from(Hash256::digest(b"seed"));
        assert_eq!(key.pubkey(), key.pubkey());
        let restored = Pubkey::from_slice(&key.pubkey().serialize()).expect("pubkey bytes");
        assert_eq!(restored, key.pubkey());
    }
}
