//! Error types for the REMA settlement engine.
//!
//! All errors use the `REMA_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Validation errors (rejected before any signature work)
//! - 2xx: Balance errors
//! - 3xx: Replay errors
//! - 4xx: Signature errors
//! - 5xx: Identity errors
//! - 6xx: Audit / reconciliation errors
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::{AccountId, Nonce, PublicKey, TxUuid};

/// Central error enum for all REMA operations.
#[derive(Debug, Error)]
pub enum RemaError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// A hex field failed to decode or had the wrong length.
    #[error("REMA_ERR_100: Invalid encoding for {field}: {reason}")]
    InvalidEncoding { field: String, reason: String },

    /// Amounts must be strictly positive atomic units.
    #[error("REMA_ERR_101: Amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    /// The item was signed under a canonical layout this node does not accept.
    #[error("REMA_ERR_102: Unsupported protocol version {0}")]
    UnsupportedProtocolVersion(u8),

    /// The item names a receiver other than the party submitting the batch.
    #[error("REMA_ERR_103: Receiver mismatch: item pays {item}, batch submitted by {batch}")]
    ReceiverMismatch { item: String, batch: String },

    /// Sender and receiver resolve to the same account.
    #[error("REMA_ERR_104: Sender and receiver are the same account")]
    SelfPayment,

    /// Structurally invalid request (empty ids, oversized batch, ...).
    #[error("REMA_ERR_105: Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The item is denominated in a currency this ledger does not hold.
    #[error("REMA_ERR_106: Currency mismatch: ledger holds {expected}, item uses {actual}")]
    CurrencyMismatch { expected: u16, actual: u16 },

    // =================================================================
    // Balance Errors (2xx)
    // =================================================================
    /// Not enough funds for a lock, or a settlement would drive
    /// `total_atomic` negative.
    #[error("REMA_ERR_200: Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    /// A credit would overflow the 64-bit balance counter.
    #[error("REMA_ERR_201: Balance overflow")]
    BalanceOverflow,

    /// `0 <= reserved <= total` was about to be broken. Never expected.
    #[error("REMA_ERR_202: Reserve invariant violated for {0}")]
    ReserveInvariantViolation(AccountId),

    // =================================================================
    // Replay Errors (3xx)
    // =================================================================
    /// The nonce has already been journaled.
    #[error("REMA_ERR_300: Nonce replay detected: {0}")]
    Replayed(Nonce),

    // =================================================================
    // Signature Errors (4xx)
    // =================================================================
    /// The ed25519 signature did not verify. Treated as a fraud signal.
    #[error("REMA_ERR_400: Signature verification failed for {0}")]
    SignatureInvalid(TxUuid),

    // =================================================================
    // Identity Errors (5xx)
    // =================================================================
    /// No account matches the identifier.
    #[error("REMA_ERR_500: Account not found: {0}")]
    AccountNotFound(String),

    /// The party is known but its key has been permanently revoked.
    #[error("REMA_ERR_501: Account revoked: {0}")]
    AccountRevoked(PublicKey),

    /// Phone or public key already enrolled (or previously revoked).
    #[error("REMA_ERR_502: Already enrolled: {0}")]
    AlreadyEnrolled(String),

    /// The recovery proof was not accepted by the recovery authority.
    #[error("REMA_ERR_503: Recovery proof rejected for {0}")]
    RecoveryProofRejected(AccountId),

    // =================================================================
    // Audit / Reconciliation Errors (6xx)
    // =================================================================
    /// Folding the journal does not reproduce the materialized balances.
    #[error("REMA_ERR_600: Reconciliation mismatch: {reason}")]
    ReconciliationMismatch { reason: String },

    /// Total money on the ledger differs from total money granted.
    #[error("REMA_ERR_601: Conservation violation: {reason}")]
    ConservationViolation { reason: String },

    /// The journal hash chain is broken.
    #[error("REMA_ERR_602: Journal chain broken at entry {seq}")]
    JournalChainBroken { seq: u64 },

    /// No journal entry with this uuid.
    #[error("REMA_ERR_603: Journal entry not found: {0}")]
    EntryNotFound(TxUuid),

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("REMA_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("REMA_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, out-of-range values, etc.).
    #[error("REMA_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (snapshot files).
    #[error("REMA_ERR_903: I/O error: {0}")]
    Io(String),
}

impl RemaError {
    /// Short machine-readable reason used in per-item batch errors.
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidEncoding { .. }
            | Self::NonPositiveAmount(_)
            | Self::UnsupportedProtocolVersion(_)
            | Self::ReceiverMismatch { .. }
            | Self::SelfPayment
            | Self::CurrencyMismatch { .. }
            | Self::InvalidRequest { .. } => "VALIDATION",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::Replayed(_) => "REPLAYED",
            Self::SignatureInvalid(_) => "SIGNATURE_INVALID",
            Self::AccountNotFound(_) => "UNRESOLVED_PARTY",
            Self::AccountRevoked(_) => "REVOKED",
            _ => "INTERNAL",
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, RemaError>;

impl From<std::io::Error> for RemaError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RemaError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
