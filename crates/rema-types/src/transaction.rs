//! # Transactions and the journal entry model
//!
//! An [`OfflinePayment`] is what a wallet signs while disconnected and a
//! merchant device later uploads. Once the ledger has decided its fate it
//! becomes a [`JournalEntry`]: append-only, hash-chained, immutable except for
//! the audit `flagged` annotation.
//!
//! ## Canonical signing message
//!
//! The bytes a wallet signs are a versioned wire contract. A layout is never
//! edited in place; new layouts get a new protocol version.
//!
//! ```text
//! v1: uuid|nonce|sender_pk|amount|timestamp|target
//! v2: rema:tx:v2|uuid|nonce|sender_pk|amount|currency|timestamp|target
//! ```
//!
//! Keys are lowercase hex, numbers are base-10 with no separators, `target`
//! is the receiver key or `SYSTEM`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{AccountId, JournalSeq, Nonce, PublicKey, RemaError, Result, TxUuid, constants};

// ---------------------------------------------------------------------------
// Canonical message layouts
// ---------------------------------------------------------------------------

/// Canonical message layout, selected by the item's `protocol_version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageLayout {
    /// Pipe-delimited, no domain tag, currency not bound.
    V1,
    /// Domain-tagged and binds the currency code.
    V2,
}

impl MessageLayout {
    /// # Errors
    /// Returns [`RemaError::UnsupportedProtocolVersion`] for unknown versions.
    pub fn from_version(version: u8) -> Result<Self> {
        match version {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(RemaError::UnsupportedProtocolVersion(other)),
        }
    }

    #[must_use]
    pub fn version(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// OfflinePayment (wire item)
// ---------------------------------------------------------------------------

/// One signed offline payment as uploaded in a settlement batch.
///
/// Fields are kept in their wire form (hex strings, signed integers) so that
/// malformed input reaches validation instead of failing deserialization of
/// the whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflinePayment {
    pub uuid: TxUuid,
    pub nonce: Nonce,
    pub protocol_version: u8,
    pub sender_public_key: String,
    /// Receiver key hex, or `SYSTEM`.
    pub receiver_public_key: String,
    pub amount_atomic: i64,
    pub currency_code: u16,
    /// Detached ed25519 signature, 64 bytes as hex.
    pub signature: String,
    /// Client clock, milliseconds since UNIX epoch.
    pub timestamp: i64,
    /// Opaque third-party settlement reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

/// Where an offline payment is headed, as it appears in the signed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentTarget {
    System,
    Key(PublicKey),
}

impl PaymentTarget {
    /// Only the exact `SYSTEM` sentinel names the system; any other spelling
    /// must be a key, since the raw field is what the payer signed.
    ///
    /// # Errors
    /// Returns [`RemaError::InvalidEncoding`] if the key is not valid hex.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw == constants::SYSTEM_TARGET {
            return Ok(Self::System);
        }
        PublicKey::from_hex("receiver_public_key", raw).map(Self::Key)
    }

    #[must_use]
    pub fn as_message_field(&self) -> String {
        match self {
            Self::System => constants::SYSTEM_TARGET.to_string(),
            Self::Key(pk) => pk.to_hex(),
        }
    }
}

impl OfflinePayment {
    /// Amount as unsigned atomic units.
    ///
    /// # Errors
    /// Returns [`RemaError::NonPositiveAmount`] for zero or negative amounts.
    pub fn positive_amount(&self) -> Result<u64> {
        u64::try_from(self.amount_atomic)
            .ok()
            .filter(|a| *a > 0)
            .ok_or(RemaError::NonPositiveAmount(self.amount_atomic))
    }

    /// Decoded sender key.
    ///
    /// # Errors
    /// Returns [`RemaError::InvalidEncoding`] on malformed hex.
    pub fn sender_key(&self) -> Result<PublicKey> {
        PublicKey::from_hex("sender_public_key", &self.sender_public_key)
    }

    /// Decoded receiver.
    ///
    /// # Errors
    /// Returns [`RemaError::InvalidEncoding`] on malformed hex.
    pub fn target(&self) -> Result<PaymentTarget> {
        PaymentTarget::parse(&self.receiver_public_key)
    }

    /// Decoded 64-byte signature.
    ///
    /// # Errors
    /// Returns [`RemaError::InvalidEncoding`] on malformed hex or bad length.
    pub fn signature_bytes(&self) -> Result<[u8; constants::SIGNATURE_LEN]> {
        let bytes = hex::decode(self.signature.trim()).map_err(|e| RemaError::InvalidEncoding {
            field: "signature".to_string(),
            reason: e.to_string(),
        })?;
        bytes.try_into().map_err(|b: Vec<u8>| RemaError::InvalidEncoding {
            field: "signature".to_string(),
            reason: format!("expected {} bytes, got {}", constants::SIGNATURE_LEN, b.len()),
        })
    }

    /// Canonical signing payload for ed25519 verification, in the layout
    /// named by `protocol_version`.
    ///
    /// # Errors
    /// - `UnsupportedProtocolVersion` for unknown layouts
    /// - `InvalidEncoding` if sender or receiver keys are not valid hex
    pub fn canonical_message(&self) -> Result<Vec<u8>> {
        let layout = MessageLayout::from_version(self.protocol_version)?;
        let sender = self.sender_key()?.to_hex();
        let target = self.target()?.as_message_field();
        let d = constants::MESSAGE_DELIMITER;

        let message = match layout {
            MessageLayout::V1 => format!(
                "{uuid}{d}{nonce}{d}{sender}{d}{amount}{d}{ts}{d}{target}",
                uuid = self.uuid,
                nonce = self.nonce,
                amount = self.amount_atomic,
                ts = self.timestamp,
            ),
            MessageLayout::V2 => format!(
                "{tag}{d}{uuid}{d}{nonce}{d}{sender}{d}{amount}{d}{currency}{d}{ts}{d}{target}",
                tag = constants::V2_DOMAIN_TAG,
                uuid = self.uuid,
                nonce = self.nonce,
                amount = self.amount_atomic,
                currency = self.currency_code,
                ts = self.timestamp,
            ),
        };
        Ok(message.into_bytes())
    }
}

// ---------------------------------------------------------------------------
// Journal entry model
// ---------------------------------------------------------------------------

/// Economic meaning of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxKind {
    /// SYSTEM → account: `total += amount` (onboarding grant, online top-up).
    Grant,
    /// SYSTEM → account: `reserved += amount`.
    ReserveLock,
    /// account → account: a synced offline spend.
    OfflinePayment,
    /// account → SYSTEM: `reserved = 0` after device loss.
    ReserveRelease,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grant => write!(f, "GRANT"),
            Self::ReserveLock => write!(f, "RESERVE_LOCK"),
            Self::OfflinePayment => write!(f, "OFFLINE_PAYMENT"),
            Self::ReserveRelease => write!(f, "RESERVE_RELEASE"),
        }
    }
}

/// Final status of a journaled transaction. Only `Completed` moves money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Completed,
    RejectedReplay,
    RejectedSignature,
    /// Sender key resolved to no account. Kept for investigation only.
    RejectedUnattributed,
}

impl TxStatus {
    #[must_use]
    pub fn is_completed(self) -> bool {
        self == Self::Completed
    }

    /// Batch-report reason code for a rejected status, `None` if completed.
    #[must_use]
    pub fn rejection_reason(self) -> Option<&'static str> {
        match self {
            Self::Completed => None,
            Self::RejectedReplay => Some("REPLAYED"),
            Self::RejectedSignature => Some("SIGNATURE_INVALID"),
            Self::RejectedUnattributed => Some("UNRESOLVED_PARTY"),
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "COMPLETED"),
            Self::RejectedReplay => write!(f, "REJECTED_REPLAY"),
            Self::RejectedSignature => write!(f, "REJECTED_SIGNATURE"),
            Self::RejectedUnattributed => write!(f, "REJECTED_UNATTRIBUTED"),
        }
    }
}

/// One side of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Counterparty {
    /// The ledger itself.
    System,
    Account { id: AccountId, public_key: PublicKey },
    /// A key that resolved to no account.
    Unattributed { public_key: PublicKey },
}

impl Counterparty {
    #[must_use]
    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            Self::Account { id, .. } => Some(*id),
            Self::System | Self::Unattributed { .. } => None,
        }
    }

    #[must_use]
    pub fn public_key(&self) -> Option<PublicKey> {
        match self {
            Self::Account { public_key, .. } | Self::Unattributed { public_key } => {
                Some(*public_key)
            }
            Self::System => None,
        }
    }

    fn digest_into(&self, hasher: &mut Sha256) {
        match self {
            Self::System => hasher.update(b"S"),
            Self::Account { id, public_key } => {
                hasher.update(b"A");
                hasher.update(id.0.as_bytes());
                hasher.update(public_key.as_bytes());
            }
            Self::Unattributed { public_key } => {
                hasher.update(b"U");
                hasher.update(public_key.as_bytes());
            }
        }
    }
}

/// An entry about to be appended. The journal assigns sequence, time and
/// hash chain links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub uuid: TxUuid,
    pub nonce: Option<Nonce>,
    pub kind: TxKind,
    pub status: TxStatus,
    pub protocol_version: Option<u8>,
    pub sender: Counterparty,
    pub receiver: Counterparty,
    pub amount_atomic: u64,
    pub currency_code: u16,
    pub signature: Option<String>,
    pub client_timestamp: Option<i64>,
    pub metadata: Option<String>,
    pub is_offline_synced: bool,
    pub flagged: bool,
}

impl NewEntry {
    fn system(
        kind: TxKind,
        sender: Counterparty,
        receiver: Counterparty,
        amount_atomic: u64,
        currency_code: u16,
    ) -> Self {
        Self {
            uuid: TxUuid::system(),
            nonce: None,
            kind,
            status: TxStatus::Completed,
            protocol_version: None,
            sender,
            receiver,
            amount_atomic,
            currency_code,
            signature: None,
            client_timestamp: None,
            metadata: None,
            is_offline_synced: false,
            flagged: false,
        }
    }

    /// Money entering the ledger for `receiver`.
    #[must_use]
    pub fn grant(receiver: Counterparty, amount_atomic: u64, currency_code: u16) -> Self {
        Self::system(TxKind::Grant, Counterparty::System, receiver, amount_atomic, currency_code)
    }

    /// Spendable → offline-reserved for `receiver`.
    #[must_use]
    pub fn reserve_lock(receiver: Counterparty, amount_atomic: u64, currency_code: u16) -> Self {
        Self::system(
            TxKind::ReserveLock,
            Counterparty::System,
            receiver,
            amount_atomic,
            currency_code,
        )
    }

    /// Reserve handed back to the system after device loss.
    #[must_use]
    pub fn reserve_release(sender: Counterparty, amount_atomic: u64, currency_code: u16) -> Self {
        Self::system(
            TxKind::ReserveRelease,
            sender,
            Counterparty::System,
            amount_atomic,
            currency_code,
        )
    }

    /// A settled or rejected offline payment.
    #[must_use]
    pub fn offline_payment(
        payment: &OfflinePayment,
        amount_atomic: u64,
        sender: Counterparty,
        receiver: Counterparty,
        status: TxStatus,
    ) -> Self {
        Self {
            uuid: payment.uuid.clone(),
            nonce: Some(payment.nonce.clone()),
            kind: TxKind::OfflinePayment,
            status,
            protocol_version: Some(payment.protocol_version),
            sender,
            receiver,
            amount_atomic,
            currency_code: payment.currency_code,
            signature: Some(payment.signature.to_lowercase()),
            client_timestamp: Some(payment.timestamp),
            metadata: payment.metadata.clone(),
            is_offline_synced: true,
            flagged: false,
        }
    }

    /// Mark the entry as suspicious before it is appended.
    #[must_use]
    pub fn flagged(mut self) -> Self {
        self.flagged = true;
        self
    }
}

/// A journaled transaction. Immutable apart from `flagged`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: JournalSeq,
    pub uuid: TxUuid,
    pub nonce: Option<Nonce>,
    pub kind: TxKind,
    pub status: TxStatus,
    pub protocol_version: Option<u8>,
    pub sender: Counterparty,
    pub receiver: Counterparty,
    pub amount_atomic: u64,
    pub currency_code: u16,
    pub signature: Option<String>,
    pub client_timestamp: Option<i64>,
    pub metadata: Option<String>,
    pub is_offline_synced: bool,
    /// Audit annotation. Excluded from the hash.
    pub flagged: bool,
    pub recorded_at: DateTime<Utc>,
    #[serde(with = "hex32")]
    pub prev_hash: [u8; 32],
    #[serde(with = "hex32")]
    pub hash: [u8; 32],
}

impl JournalEntry {
    /// Seal a [`NewEntry`] at position `seq`, chained to `prev_hash`.
    #[must_use]
    pub fn seal(
        new: NewEntry,
        seq: JournalSeq,
        prev_hash: [u8; 32],
        recorded_at: DateTime<Utc>,
    ) -> Self {
        let mut entry = Self {
            seq,
            uuid: new.uuid,
            nonce: new.nonce,
            kind: new.kind,
            status: new.status,
            protocol_version: new.protocol_version,
            sender: new.sender,
            receiver: new.receiver,
            amount_atomic: new.amount_atomic,
            currency_code: new.currency_code,
            signature: new.signature,
            client_timestamp: new.client_timestamp,
            metadata: new.metadata,
            is_offline_synced: new.is_offline_synced,
            flagged: new.flagged,
            recorded_at,
            prev_hash,
            hash: [0u8; 32],
        };
        entry.hash = entry.compute_hash();
        entry
    }

    /// SHA-256 over every immutable field plus the previous link.
    #[must_use]
    pub fn compute_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"rema:journal:v1:");
        hasher.update(self.prev_hash);
        hasher.update(self.seq.0.to_le_bytes());
        hasher.update((self.uuid.as_str().len() as u64).to_le_bytes());
        hasher.update(self.uuid.as_str().as_bytes());
        match &self.nonce {
            Some(n) => {
                hasher.update([1u8]);
                hasher.update((n.as_str().len() as u64).to_le_bytes());
                hasher.update(n.as_str().as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(self.kind.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.status.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update([self.protocol_version.unwrap_or(0)]);
        self.sender.digest_into(&mut hasher);
        self.receiver.digest_into(&mut hasher);
        hasher.update(self.amount_atomic.to_le_bytes());
        hasher.update(self.currency_code.to_le_bytes());
        if let Some(sig) = &self.signature {
            hasher.update(sig.as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(self.client_timestamp.unwrap_or_default().to_le_bytes());
        if let Some(meta) = &self.metadata {
            hasher.update((meta.len() as u64).to_le_bytes());
            hasher.update(meta.as_bytes());
        }
        hasher.update([u8::from(self.is_offline_synced)]);
        hasher.update(self.recorded_at.timestamp_micros().to_le_bytes());
        hasher.finalize().into()
    }

    /// Whether this entry credits or debits `account` with economic effect.
    #[must_use]
    pub fn touches(&self, account: AccountId) -> bool {
        self.sender.account_id() == Some(account) || self.receiver.account_id() == Some(account)
    }
}

/// Hex (de)serialization for 32-byte digests.
mod hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let raw = String::deserialize(d)?;
        let bytes = hex::decode(raw).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32-byte digest"))
    }
}
