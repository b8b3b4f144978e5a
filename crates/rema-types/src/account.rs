//! Account model: identity plus the two balance counters.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, BalanceEntry, Counterparty, PublicKey};

/// What kind of party an account is.
///
/// `System` is the ledger itself: grants, reserve locks and recovery
/// releases are journaled with a system sender or receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountKind {
    User,
    Merchant,
    System,
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "USER"),
            Self::Merchant => write!(f, "MERCHANT"),
            Self::System => write!(f, "SYSTEM"),
        }
    }
}

/// A ledger account. Never deleted; revocation is permanent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    /// KYC phone identifier, unique.
    pub phone: String,
    /// Wallet signing key, unique and never reused once revoked.
    pub public_key: PublicKey,
    /// Hardware fingerprint the wallet was bound to at enrollment.
    pub device_fingerprint: Option<String>,
    pub kind: AccountKind,
    pub revoked: bool,
    pub balance: BalanceEntry,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Fresh, unrevoked account with a zero balance.
    #[must_use]
    pub fn new(
        phone: impl Into<String>,
        public_key: PublicKey,
        device_fingerprint: Option<String>,
        kind: AccountKind,
    ) -> Self {
        Self {
            id: AccountId::new(),
            phone: phone.into(),
            public_key,
            device_fingerprint,
            kind,
            revoked: false,
            balance: BalanceEntry::new(),
            created_at: Utc::now(),
        }
    }

    /// This account as one side of a journal entry.
    #[must_use]
    pub fn as_counterparty(&self) -> Counterparty {
        Counterparty::Account {
            id: self.id,
            public_key: self.public_key,
        }
    }
}

/// The ways a caller can name an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum AccountRef {
    Id(AccountId),
    Phone(String),
    PublicKey(PublicKey),
}

impl AccountRef {
    /// Parse a loose CLI/API identifier: 64 hex chars is a public key,
    /// `acct:<uuid>` is an internal id, anything else is a phone.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(id) = raw
            .strip_prefix("acct:")
            .and_then(|s| uuid::Uuid::parse_str(s).ok())
        {
            return Self::Id(AccountId(id));
        }
        if raw.len() == 64 {
            if let Ok(pk) = PublicKey::from_hex("account", raw) {
                return Self::PublicKey(pk);
            }
        }
        Self::Phone(raw.to_string())
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Phone(phone) => write!(f, "phone:{phone}"),
            Self::PublicKey(pk) => write!(f, "{pk}"),
        }
    }
}
