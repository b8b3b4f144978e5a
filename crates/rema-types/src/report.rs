//! Request and response types at the engine boundary.
//!
//! These are the JSON shapes exchanged with the (out-of-scope) transport
//! layer: batch sync, reserve lock, lost-device recovery, audit reports and
//! the revocation feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, AccountRef, JournalSeq, OfflinePayment, PublicKey, TxStatus, TxUuid};

// ---------------------------------------------------------------------------
// Batch settlement
// ---------------------------------------------------------------------------

/// A merchant device uploading the offline payments it collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettlementRequest {
    /// The receiving party; every item must pay this key.
    pub merchant_public_key: String,
    pub batch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub items: Vec<OfflinePayment>,
}

/// Terminal state of one item that reached the settlement engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementOutcome {
    /// Funds moved; the entry is journaled as `COMPLETED`.
    Settled {
        seq: JournalSeq,
        /// Part of the amount drawn from the sender's offline reserve.
        reserve_deducted: u64,
        sender_total: u64,
        sender_reserved: u64,
        receiver_total: u64,
    },
    /// uuid already journaled; nothing changed.
    Duplicate { prior_status: TxStatus },
    /// nonce already journaled under another uuid; nothing changed.
    Replayed,
    /// Signature did not verify; nothing changed.
    SignatureInvalid,
}

impl SettlementOutcome {
    /// Whether the item counts as rejected in the batch report. A duplicate of
    /// a rejected attempt stays rejected.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::Settled { .. } => false,
            Self::Duplicate { prior_status } => !prior_status.is_completed(),
            Self::Replayed | Self::SignatureInvalid => true,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Settled { .. } => "SETTLED",
            Self::Duplicate { .. } => "DUPLICATE",
            Self::Replayed => "REPLAYED",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
        }
    }
}

/// A rejected batch item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub uuid: TxUuid,
    /// Taxonomy code, e.g. `REPLAYED`, `VALIDATION`, `INSUFFICIENT_FUNDS`.
    pub reason: String,
    pub detail: String,
}

/// Per-item line of the batch report, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub uuid: TxUuid,
    pub status: String,
}

/// Aggregate result of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    /// Items that settled in this batch.
    pub processed: usize,
    /// Items rejected for any reason.
    pub rejected: usize,
    /// Items whose uuid was already settled (no-op successes).
    pub duplicates: usize,
    pub errors: Vec<ItemError>,
    pub receiving_party_new_total: u64,
    pub items: Vec<ItemReport>,
}

// ---------------------------------------------------------------------------
// Reserve lock / top-up
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequest {
    pub account: AccountRef,
    pub amount_atomic: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockReceipt {
    pub status: String,
    pub account: AccountId,
    pub new_reserved_atomic: u64,
    pub new_available_atomic: u64,
    pub seq: JournalSeq,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditReceipt {
    pub status: String,
    pub account: AccountId,
    pub new_total_atomic: u64,
    pub seq: JournalSeq,
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

/// Evidence gathered out-of-band (KYC desk, support call) for a recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryProof {
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    pub account: AccountRef,
    pub proof: RecoveryProof,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReceipt {
    pub status: String,
    pub account: AccountId,
    pub revoked_key: PublicKey,
    /// Reserve handed back to the spendable balance.
    pub refunded_amount: u64,
    /// Reserve the journal says should still be outstanding.
    pub theoretical_reserved: i128,
    /// Unchanged by recovery; now fully spendable.
    pub new_total_atomic: u64,
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Reserve reconciliation for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub account: AccountId,
    pub public_key: PublicKey,
    pub recorded_total: u64,
    pub recorded_reserved: u64,
    pub locked_total: u64,
    pub settled_total: u64,
    pub released_total: u64,
    pub theoretical_reserved: i128,
    /// `recorded_reserved - theoretical_reserved`. Non-zero means an offline
    /// spend still in flight, or tampering.
    pub discrepancy: i128,
    pub revoked: bool,
    pub audited_at: DateTime<Utc>,
}

impl AuditReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.discrepancy == 0
    }
}

// ---------------------------------------------------------------------------
// Revocation feed
// ---------------------------------------------------------------------------

/// Snapshot of every permanently revoked key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationFeed {
    pub generated_at: DateTime<Utc>,
    /// Sorted ascending so the digest is stable.
    pub revoked_keys: Vec<PublicKey>,
    /// SHA-256 over the sorted keys, hex.
    pub digest: String,
}

impl RevocationFeed {
    #[must_use]
    pub fn contains(&self, key: &PublicKey) -> bool {
        self.revoked_keys.binary_search(key).is_ok()
    }
}
