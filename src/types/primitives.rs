//! Validated primitive types for the notifier's domain model.
//!
//! These newtypes provide type safety and validation at construction time,
//! mirroring the conventions used for entity identifiers elsewhere in this
//! codebase.

use std::fmt;

use bech32::{FromBase32, ToBase32, Variant};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// PUBLIC KEY / ADDRESS
// ═══════════════════════════════════════════════════════════════════════════════

/// Length in bytes of a raw account public key.
pub const PUBKEY_LEN: usize = 32;

/// Shard identifier reserved for the metachain.
pub const METACHAIN_SHARD_ID: u32 = 0xFFFF_FFFF;

const ADDRESS_HRP: &str = "erd";
const METACHAIN_PREFIX: [u8; 10] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 1];

/// Validated 32-byte account public key.
///
/// Use this type for persistence and domain logic. Bech32 is used for
/// human-readable encoding; raw/hex forms are used on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey([u8; PUBKEY_LEN]);

impl PublicKey {
    /// The zero public key.
    pub const ZERO: Self = Self([0u8; PUBKEY_LEN]);

    /// Create from a fixed-size array (infallible).
    #[must_use]
    pub const fn new(bytes: [u8; PUBKEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Try to create from a byte slice.
    ///
    /// # Errors
    /// Returns `InvalidPublicKey::WrongLength` if the slice is not exactly
    /// [`PUBKEY_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, InvalidPublicKey> {
        let bytes: [u8; PUBKEY_LEN] = slice
            .try_into()
            .map_err(|_| InvalidPublicKey::WrongLength(slice.len()))?;
        Ok(Self(bytes))
    }

    /// Parse from a hex string (with or without `0x` prefix).
    ///
    /// # Errors
    /// Returns `InvalidPublicKey` if the string is not valid hex or the
    /// wrong length.
    pub fn from_hex(s: &str) -> Result<Self, InvalidPublicKey> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| InvalidPublicKey::InvalidHex)?;
        Self::from_slice(&bytes)
    }

    /// Parse from a bech32-encoded address.
    ///
    /// # Errors
    /// Returns `InvalidPublicKey::InvalidBech32` if the string is not a
    /// valid bech32 address with the expected human-readable prefix.
    pub fn from_bech32(s: &str) -> Result<Self, InvalidPublicKey> {
        let (hrp, data, variant) =
            bech32::decode(s).map_err(|_| InvalidPublicKey::InvalidBech32)?;
        if hrp != ADDRESS_HRP || variant != Variant::Bech32 {
            return Err(InvalidPublicKey::InvalidBech32);
        }
        let bytes = Vec::<u8>::from_base32(&data).map_err(|_| InvalidPublicKey::InvalidBech32)?;
        Self::from_slice(&bytes)
    }

    /// Get the underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PUBKEY_LEN] {
        &self.0
    }

    /// Get as a byte slice.
    #[must_use]
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Convert to lowercase hex string (no prefix).
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Convert to the bech32 address representation.
    #[must_use]
    pub fn to_bech32(&self) -> String {
        bech32::encode(ADDRESS_HRP, self.0.to_base32(), Variant::Bech32)
            .unwrap_or_else(|_| self.to_hex())
    }

    /// Check if this is the zero public key.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; PUBKEY_LEN]
    }

    /// Check if this key identifies the metachain.
    #[must_use]
    pub fn is_metachain(&self) -> bool {
        self.0[..10] == METACHAIN_PREFIX || self.is_zero()
    }

    /// Derive the shard this key belongs to.
    ///
    /// The metachain sentinel is returned for the metachain prefix or the
    /// all-zero key. Otherwise the shard is derived from the last byte:
    /// take the low two bits, and if that value exceeds 2 (there are only
    /// three regular shards), fall back to the low single bit.
    #[must_use]
    pub fn shard(&self) -> Shard {
        if self.is_metachain() {
            return Shard::Metachain;
        }
        let last = self.0[PUBKEY_LEN - 1];
        let mut s = last & 0b11;
        if s > 2 {
            s = last & 0b01;
        }
        Shard::Numbered(s)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_bech32())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_bech32())
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.to_bech32()
    }
}

impl TryFrom<String> for PublicKey {
    type Error = InvalidPublicKey;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_bech32(&s)
    }
}

impl TryFrom<&str> for PublicKey {
    type Error = InvalidPublicKey;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::from_bech32(s)
    }
}

impl From<[u8; PUBKEY_LEN]> for PublicKey {
    fn from(bytes: [u8; PUBKEY_LEN]) -> Self {
        Self::new(bytes)
    }
}

/// Error for invalid public keys / addresses.
#[derive(Debug, Clone, Error)]
pub enum InvalidPublicKey {
    /// Key has the wrong byte length.
    #[error("wrong length: expected {PUBKEY_LEN} bytes, got {0}")]
    WrongLength(usize),
    /// Key contains invalid hex characters.
    #[error("invalid hex encoding")]
    InvalidHex,
    /// Key is not a valid bech32 address.
    #[error("invalid bech32 address")]
    InvalidBech32,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SHARD
// ═══════════════════════════════════════════════════════════════════════════════

/// A shard identifier, either one of the regular numbered shards or the
/// metachain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shard {
    /// A regular numbered shard.
    Numbered(u8),
    /// The metachain.
    Metachain,
}

impl Shard {
    /// The wire representation used throughout `Event` fields.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::Numbered(n) => n as u32,
            Self::Metachain => METACHAIN_SHARD_ID,
        }
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numbered(n) => write!(f, "{n}"),
            Self::Metachain => write!(f, "metachain"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn shard_from_last_byte_simple_case() {
        let mut bytes = [7u8; PUBKEY_LEN];
        bytes[PUBKEY_LEN - 1] = 0b0000_0001;
        let key = PublicKey::new(bytes);
        assert_eq!(key.shard(), Shard::Numbered(1));
    }

    #[test]
    fn shard_wraps_when_low_bits_exceed_two() {
        let mut bytes = [7u8; PUBKEY_LEN];
        bytes[PUBKEY_LEN - 1] = 0b0000_0011; // 3 -> wraps to 3 & 1 = 1
        let key = PublicKey::new(bytes);
        assert_eq!(key.shard(), Shard::Numbered(1));
    }

    #[test]
    fn metachain_prefix_detected() {
        let mut bytes = [0u8; PUBKEY_LEN];
        bytes[9] = 1;
        let key = PublicKey::new(bytes);
        assert_eq!(key.shard(), Shard::Metachain);
    }

    #[test]
    fn all_zero_key_is_metachain() {
        let key = PublicKey::ZERO;
        assert_eq!(key.shard(), Shard::Metachain);
    }

    #[test]
    fn bech32_round_trip() {
        let bytes = [42u8; PUBKEY_LEN];
        let key = PublicKey::new(bytes);
        let encoded = key.to_bech32();
        let decoded = PublicKey::from_bech32(&encoded).expect("valid bech32");
        assert_eq!(key, decoded);
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        let err = PublicKey::from_slice(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, InvalidPublicKey::WrongLength(10)));
    }

}
