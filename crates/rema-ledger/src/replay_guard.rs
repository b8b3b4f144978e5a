//! Replay guard: transaction uuid and nonce uniqueness.
//!
//! Like the settlement idempotency guard of an exchange, each transaction can
//! be settled once. Two indices are kept:
//!
//! - `uuid → (seq, status)`: every journaled client uuid, settled or
//!   rejected. A re-uploaded item is a duplicate of whatever was recorded.
//! - `nonce → uuid`: nonces of completed settlements only. A known nonce
//!   under a *different* uuid is a replay.
//!
//! Uniqueness is enforced by claims that hold shard slots vacant until the
//! caller commits with the journal sequence: [`Claim`] for a settlement
//! (uuid and nonce), [`UuidClaim`] for a rejected attempt (uuid only). Two
//! concurrent submissions of one uuid or nonce cannot both pass.

use dashmap::DashMap;
use dashmap::mapref::entry::{Entry, VacantEntry};
use rema_types::{JournalSeq, Nonce, PublicKey, TxStatus, TxUuid};

/// Where and how a client uuid was journaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
    pub seq: JournalSeq,
    pub status: TxStatus,
}

/// Why a claim could not be taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimConflict {
    /// The uuid is already journaled.
    Duplicate(Recorded),
    /// The nonce already settled under `original`.
    Replayed(TxUuid),
}

/// Reserved uuid and nonce slots. Dropping without [`Claim::commit`] releases
/// both.
pub struct Claim<'a> {
    uuid: VacantEntry<'a, TxUuid, Recorded>,
    nonce: VacantEntry<'a, Nonce, TxUuid>,
}

impl Claim<'_> {
    /// Record the completed settlement at `seq`.
    pub fn commit(self, seq: JournalSeq) {
        let uuid = self.uuid.key().clone();
        self.nonce.insert(uuid);
        self.uuid.insert(Recorded {
            seq,
            status: TxStatus::Completed,
        });
    }
}

/// A reserved uuid slot for a rejected attempt. Dropping without
/// [`UuidClaim::commit`] releases it.
pub struct UuidClaim<'a> {
    uuid: VacantEntry<'a, TxUuid, Recorded>,
}

impl UuidClaim<'_> {
    pub fn commit(self, seq: JournalSeq, status: TxStatus) {
        self.uuid.insert(Recorded { seq, status });
    }
}

/// Uniqueness indices plus per-sender replay strikes.
pub struct ReplayGuard {
    uuids: DashMap<TxUuid, Recorded>,
    nonces: DashMap<Nonce, TxUuid>,
    strikes: DashMap<PublicKey, u32>,
}

impl ReplayGuard {
    #[must_use]
    pub fn new() -> Self {
        Self {
            uuids: DashMap::new(),
            nonces: DashMap::new(),
            strikes: DashMap::new(),
        }
    }

    /// How `uuid` was journaled, if it was.
    #[must_use]
    pub fn recorded(&self, uuid: &TxUuid) -> Option<Recorded> {
        self.uuids.get(uuid).map(|r| *r.value())
    }

    /// Sequence of the completed entry for `uuid`, if it settled.
    #[must_use]
    pub fn settled_at(&self, uuid: &TxUuid) -> Option<JournalSeq> {
        self.recorded(uuid)
            .filter(|r| r.status.is_completed())
            .map(|r| r.seq)
    }

    /// The uuid that already consumed `nonce`, if any.
    #[must_use]
    pub fn nonce_owner(&self, nonce: &Nonce) -> Option<TxUuid> {
        self.nonces.get(nonce).map(|r| r.value().clone())
    }

    /// Reserve `uuid` and `nonce` for one settlement.
    ///
    /// Slots are taken uuid first, then nonce. The caller must not touch
    /// either index again until the claim is committed or dropped.
    ///
    /// # Errors
    /// Returns the conflicting prior settlement.
    pub fn claim(&self, uuid: &TxUuid, nonce: &Nonce) -> Result<Claim<'_>, ClaimConflict> {
        let uuid_slot = match self.uuids.entry(uuid.clone()) {
            Entry::Occupied(prior) => return Err(ClaimConflict::Duplicate(*prior.get())),
            Entry::Vacant(slot) => slot,
        };
        let nonce_slot = match self.nonces.entry(nonce.clone()) {
            Entry::Occupied(prior) => return Err(ClaimConflict::Replayed(prior.get().clone())),
            Entry::Vacant(slot) => slot,
        };
        Ok(Claim {
            uuid: uuid_slot,
            nonce: nonce_slot,
        })
    }

    /// Reserve `uuid` alone, for journaling a rejected attempt.
    ///
    /// # Errors
    /// Returns how the uuid was already journaled.
    pub fn claim_uuid(&self, uuid: &TxUuid) -> Result<UuidClaim<'_>, Recorded> {
        match self.uuids.entry(uuid.clone()) {
            Entry::Occupied(prior) => Err(*prior.get()),
            Entry::Vacant(slot) => Ok(UuidClaim { uuid: slot }),
        }
    }

    /// Rebuild the index entries of one journaled payment. The nonce is only
    /// indexed for completed settlements.
    pub(crate) fn restore(&self, uuid: TxUuid, nonce: Option<Nonce>, recorded: Recorded) {
        if let Some(nonce) = nonce.filter(|_| recorded.status.is_completed()) {
            self.nonces.insert(nonce, uuid.clone());
        }
        self.uuids.insert(uuid, recorded);
    }

    /// Count a replay attempt by `sender`. Returns the new strike count.
    pub fn record_strike(&self, sender: PublicKey) -> u32 {
        let mut count = self.strikes.entry(sender).or_insert(0);
        *count += 1;
        *count
    }

    #[must_use]
    pub fn strikes(&self, sender: &PublicKey) -> u32 {
        self.strikes.get(sender).map_or(0, |r| *r.value())
    }

    /// Number of client uuids journaled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.uuids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uuids.is_empty()
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}
