//! Identifiers used throughout REMA.
//!
//! Server-side entities (`AccountId`, system transaction uuids) use UUIDv7 for
//! time-ordered sorting. Client-side identifiers (`TxUuid`, `Nonce`) are
//! opaque strings minted on the phone: the server never interprets them, it
//! only enforces their uniqueness.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::{RemaError, constants};

// ---------------------------------------------------------------------------
// AccountId
// ---------------------------------------------------------------------------

/// Internal account identifier. Uses UUIDv7 so ids sort by creation time,
/// which also gives the ledger a total order for acquiring account locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AccountId(pub Uuid);

impl AccountId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acct:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TxUuid
// ---------------------------------------------------------------------------

/// Client-generated transaction identifier: the idempotency key.
///
/// A wallet may resend the same uuid after a network failure without
/// re-signing, so a known uuid is a no-op rather than an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxUuid(pub String);

impl TxUuid {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fresh uuid for a ledger-originated (SYSTEM) journal entry.
    #[must_use]
    pub fn system() -> Self {
        Self(format!("sys-{}", Uuid::now_v7()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxUuid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Nonce
// ---------------------------------------------------------------------------

/// Random single-use value embedded in a signed payment.
///
/// Distinct from [`TxUuid`]: the uuid makes retries idempotent, the nonce
/// makes the signed payload itself impossible to apply twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(pub String);

impl Nonce {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Nonce {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// Raw ed25519 public key (32 bytes). Travels as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex; this is the form that goes into signed messages.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short prefix for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Decode from hex, accepting either case.
    ///
    /// # Errors
    /// Returns [`RemaError::InvalidEncoding`] on malformed hex or a length
    /// other than 32 bytes.
    pub fn from_hex(field: &str, value: &str) -> crate::Result<Self> {
        let bytes = hex::decode(value.trim()).map_err(|e| RemaError::InvalidEncoding {
            field: field.to_string(),
            reason: e.to_string(),
        })?;
        let bytes: [u8; constants::PUBLIC_KEY_LEN] =
            bytes
                .try_into()
                .map_err(|b: Vec<u8>| RemaError::InvalidEncoding {
                    field: field.to_string(),
                    reason: format!(
                        "expected {} bytes, got {}",
                        constants::PUBLIC_KEY_LEN,
                        b.len()
                    ),
                })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pk:{}", hex::encode(&self.0[..8]))
    }
}

impl FromStr for PublicKey {
    type Err = RemaError;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::from_hex("public_key", s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex("public_key", &raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// JournalSeq
// ---------------------------------------------------------------------------

/// Position of an entry in the append-only journal. Starts at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct JournalSeq(pub u64);

impl JournalSeq {
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for JournalSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_ordering() {
        let a = AccountId::new();
        let b = AccountId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn system_tx_uuids_are_unique_and_tagged() {
        let a = TxUuid::system();
        let b = TxUuid::system();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("sys-"));
    }

    #[test]
    fn public_key_hex_accepts_uppercase() {
        let pk = PublicKey([0xab; 32]);
        let upper = pk.to_hex().to_uppercase();
        assert_eq!(PublicKey::from_hex("pk", &upper).unwrap(), pk);
    }

    #[test]
    fn public_key_rejects_bad_hex() {
        let err = PublicKey::from_hex("sender_public_key", "zz").unwrap_err();
        assert!(
            matches!(err, RemaError::InvalidEncoding { ref field, .. } if field == "sender_public_key"),
            "got {err:?}"
        );
    }

    #[test]
    fn public_key_rejects_wrong_length() {
        let err = PublicKey::from_hex("pk", &"ab".repeat(31)).unwrap_err();
        assert!(matches!(err, RemaError::InvalidEncoding { .. }));
    }

    #[test]
    fn public_key_serializes_as_hex_string() {
        let pk = PublicKey([7u8; 32]);
        let json = serde_json::to_string(&pk).unwrap();
        assert_eq!(json, format!("\"{}\"", "07".repeat(32)));
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pk);
    }

    #[test]
    fn journal_seq_next() {
        assert_eq!(JournalSeq(4).next(), JournalSeq(5));
    }
}
