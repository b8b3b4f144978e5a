//! Append-only, hash-chained transaction journal and its balance reducer.
//!
//! The journal is the source of truth. Materialized balances in the ledger
//! are a cache that must always equal [`fold`] over the journal:
//!
//! ```text
//! GRANT            receiver.total    += amount
//! RESERVE_LOCK     receiver.reserved += amount
//! OFFLINE_PAYMENT  sender.reserved   -= min(sender.reserved, amount)
//!                  sender.total      -= amount
//!                  receiver.total    += amount
//! RESERVE_RELEASE  sender.reserved   -= amount   (always the full reserve)
//! ```
//!
//! Only `COMPLETED` entries have economic effect.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use rema_types::constants::GENESIS_HASH;
use rema_types::{
    AccountId, BalanceEntry, JournalEntry, JournalSeq, NewEntry, RemaError, Result, TxKind,
    TxUuid,
};

/// Append-only entry log. Appends take the write lock only for the push.
pub struct Journal {
    entries: RwLock<Vec<JournalEntry>>,
}

impl Journal {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Adopt a persisted entry list after checking its hash chain.
    ///
    /// # Errors
    /// Returns [`RemaError::JournalChainBroken`] on any broken link.
    pub fn from_entries(entries: Vec<JournalEntry>) -> Result<Self> {
        verify_links(&entries)?;
        Ok(Self {
            entries: RwLock::new(entries),
        })
    }

    /// Seal and append `new`, returning the stored entry.
    pub fn append(&self, new: NewEntry) -> JournalEntry {
        let mut entries = self.entries.write();
        let (seq, prev_hash) = entries
            .last()
            .map_or((JournalSeq(0), GENESIS_HASH), |last| (last.seq.next(), last.hash));
        let entry = JournalEntry::seal(new, seq, prev_hash, Utc::now());
        entries.push(entry.clone());
        entry
    }

    #[must_use]
    pub fn get(&self, seq: JournalSeq) -> Option<JournalEntry> {
        let idx = usize::try_from(seq.0).ok()?;
        self.entries.read().get(idx).cloned()
    }

    /// Every entry recorded under `uuid`, oldest first. A uuid can carry at
    /// most one completed entry but any number of rejected attempts.
    #[must_use]
    pub fn find(&self, uuid: &TxUuid) -> Vec<JournalEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| &e.uuid == uuid)
            .cloned()
            .collect()
    }

    /// Snapshot of the entries that debit or credit `account`.
    #[must_use]
    pub fn history(&self, account: AccountId) -> Vec<JournalEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.touches(account))
            .cloned()
            .collect()
    }

    /// Snapshot of the whole journal.
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Set the audit flag on entry `seq`. Idempotent.
    ///
    /// # Errors
    /// Returns [`RemaError::Internal`] if `seq` is past the end.
    pub fn flag(&self, seq: JournalSeq) -> Result<()> {
        let mut entries = self.entries.write();
        let entry = usize::try_from(seq.0)
            .ok()
            .and_then(|idx| entries.get_mut(idx))
            .ok_or_else(|| RemaError::Internal(format!("no journal entry at {seq}")))?;
        entry.flagged = true;
        Ok(())
    }

    /// Recompute every hash and link.
    ///
    /// # Errors
    /// Returns [`RemaError::JournalChainBroken`] at the first bad entry.
    pub fn verify_chain(&self) -> Result<()> {
        verify_links(&self.entries.read())
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

fn verify_links(entries: &[JournalEntry]) -> Result<()> {
    let mut prev = GENESIS_HASH;
    for (idx, entry) in entries.iter().enumerate() {
        let expected_seq = idx as u64;
        if entry.seq.0 != expected_seq
            || entry.prev_hash != prev
            || entry.compute_hash() != entry.hash
        {
            return Err(RemaError::JournalChainBroken { seq: expected_seq });
        }
        prev = entry.hash;
    }
    Ok(())
}

/// Replay `entries` into per-account balances.
///
/// # Errors
/// Returns [`RemaError::ReconciliationMismatch`] if any step would drive a
/// counter negative or break `reserved <= total`, and
/// [`RemaError::BalanceOverflow`] on overflow.
pub fn fold<'a>(
    entries: impl IntoIterator<Item = &'a JournalEntry>,
) -> Result<HashMap<AccountId, BalanceEntry>> {
    let mut balances: HashMap<AccountId, BalanceEntry> = HashMap::new();

    for entry in entries.into_iter().filter(|e| e.status.is_completed()) {
        let amount = entry.amount_atomic;
        let broken = |what: &str| RemaError::ReconciliationMismatch {
            reason: format!("{} {} at {}: {what}", entry.kind, entry.uuid, entry.seq),
        };

        match entry.kind {
            TxKind::Grant => {
                let id = entry.receiver.account_id().ok_or_else(|| broken("no receiver"))?;
                let b = balances.entry(id).or_default();
                b.total_atomic = b
                    .total_atomic
                    .checked_add(amount)
                    .ok_or(RemaError::BalanceOverflow)?;
            }
            TxKind::ReserveLock => {
                let id = entry.receiver.account_id().ok_or_else(|| broken("no receiver"))?;
                let b = balances.entry(id).or_default();
                b.reserved_atomic = b
                    .reserved_atomic
                    .checked_add(amount)
                    .filter(|r| *r <= b.total_atomic)
                    .ok_or_else(|| broken("reserve exceeds total"))?;
            }
            TxKind::OfflinePayment => {
                let from = entry.sender.account_id().ok_or_else(|| broken("no sender"))?;
                let to = entry.receiver.account_id().ok_or_else(|| broken("no receiver"))?;
                let s = balances.entry(from).or_default();
                s.total_atomic = s
                    .total_atomic
                    .checked_sub(amount)
                    .ok_or_else(|| broken("sender total negative"))?;
                s.reserved_atomic -= s.reserved_atomic.min(amount);
                if !s.invariant_holds() {
                    return Err(broken("sender reserve exceeds total"));
                }
                let r = balances.entry(to).or_default();
                r.total_atomic = r
                    .total_atomic
                    .checked_add(amount)
                    .ok_or(RemaError::BalanceOverflow)?;
            }
            TxKind::ReserveRelease => {
                let id = entry.sender.account_id().ok_or_else(|| broken("no sender"))?;
                let b = balances.entry(id).or_default();
                b.reserved_atomic = b
                    .reserved_atomic
                    .checked_sub(amount)
                    .ok_or_else(|| broken("release exceeds reserve"))?;
            }
        }
    }

    Ok(balances)
}

/// Replay only `account`'s side of `entries`. Counterparties are ignored, so
/// an account's own history is enough input.
///
/// # Errors
/// Same as [`fold`].
pub fn fold_account<'a>(
    account: AccountId,
    entries: impl IntoIterator<Item = &'a JournalEntry>,
) -> Result<BalanceEntry> {
    let mut b = BalanceEntry::new();

    for entry in entries.into_iter().filter(|e| e.status.is_completed()) {
        let amount = entry.amount_atomic;
        let broken = |what: &str| RemaError::ReconciliationMismatch {
            reason: format!("{account}: {} {} at {}: {what}", entry.kind, entry.uuid, entry.seq),
        };
        let debited = entry.sender.account_id() == Some(account);
        let credited = entry.receiver.account_id() == Some(account);

        match entry.kind {
            TxKind::Grant if credited => {
                b.total_atomic = b
                    .total_atomic
                    .checked_add(amount)
                    .ok_or(RemaError::BalanceOverflow)?;
            }
            TxKind::ReserveLock if credited => {
                b.reserved_atomic = b
                    .reserved_atomic
                    .checked_add(amount)
                    .filter(|r| *r <= b.total_atomic)
                    .ok_or_else(|| broken("reserve exceeds total"))?;
            }
            TxKind::OfflinePayment if debited => {
                b.total_atomic = b
                    .total_atomic
                    .checked_sub(amount)
                    .ok_or_else(|| broken("sender total negative"))?;
                b.reserved_atomic -= b.reserved_atomic.min(amount);
                if !b.invariant_holds() {
                    return Err(broken("sender reserve exceeds total"));
                }
            }
            TxKind::OfflinePayment if credited => {
                b.total_atomic = b
                    .total_atomic
                    .checked_add(amount)
                    .ok_or(RemaError::BalanceOverflow)?;
            }
            TxKind::ReserveRelease if debited => {
                b.reserved_atomic = b
                    .reserved_atomic
                    .checked_sub(amount)
                    .ok_or_else(|| broken("release exceeds reserve"))?;
            }
            _ => {}
        }
    }

    Ok(b)
}
