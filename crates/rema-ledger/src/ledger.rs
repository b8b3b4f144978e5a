//! The ledger: accounts, two-tier balances and the atomic primitives every
//! higher-level operation is built from.
//!
//! Each account lives in its own mutex cell so settlements touching
//! disjoint accounts run in parallel. Lock order, everywhere:
//!
//! ```text
//! account cells (ascending AccountId) → uuid slot → nonce slot → journal
//! ```
//!
//! Every mutation appends its journal entry while still holding the account
//! lock, so an account's materialized balance and its journal history are
//! always consistent under that lock.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rema_types::{
    Account, AccountId, AccountKind, AccountRef, BalanceEntry, CreditReceipt, EngineConfig,
    JournalEntry, JournalSeq, LockReceipt, NewEntry, OfflinePayment, PublicKey, RemaError, Result,
    TxKind, TxStatus, TxUuid,
};
use tracing::{debug, info, warn};

use crate::conservation::SupplyConservation;
use crate::journal::{Journal, fold};
use crate::registry::IdentityRegistry;
use crate::replay_guard::{ClaimConflict, Recorded, ReplayGuard};
use crate::snapshot::LedgerSnapshot;

type Cell = Arc<Mutex<Account>>;

/// Result of [`Ledger::commit_payment`] when no error occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Funds moved and the entry is journaled `COMPLETED`.
    Applied(AppliedPayment),
    /// The uuid is already journaled, settled or rejected.
    Duplicate(Recorded),
    /// The nonce already settled under another uuid.
    Replayed(TxUuid),
}

/// Result of [`Ledger::record_rejection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionOutcome {
    /// The attempt was journaled and its uuid recorded.
    Journaled(JournalEntry),
    /// The uuid was already journaled; nothing was appended.
    Duplicate(Recorded),
}

/// Balances right after an applied payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPayment {
    pub entry: JournalEntry,
    pub reserve_deducted: u64,
    pub sender: BalanceEntry,
    pub receiver: BalanceEntry,
}

/// Result of [`Ledger::release_and_revoke`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    /// Account state after the release.
    pub account: Account,
    pub released: u64,
    pub entry: JournalEntry,
}

/// Accounts, identity, replay indices and the journal of one settlement node.
pub struct Ledger {
    config: EngineConfig,
    registry: IdentityRegistry,
    guard: ReplayGuard,
    journal: Journal,
    accounts: DashMap<AccountId, Cell>,
    supply: Mutex<SupplyConservation>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

impl Ledger {
    /// Empty ledger.
    ///
    /// # Errors
    /// Returns [`RemaError::Configuration`] if `config` is invalid.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_journal(config, Journal::new()))
    }

    fn with_journal(config: EngineConfig, journal: Journal) -> Self {
        Self {
            config,
            registry: IdentityRegistry::new(),
            guard: ReplayGuard::new(),
            journal,
            accounts: DashMap::new(),
            supply: Mutex::new(SupplyConservation::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    #[must_use]
    pub fn replay_guard(&self) -> &ReplayGuard {
        &self.guard
    }

    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    fn cell(&self, id: AccountId) -> Result<Cell> {
        self.accounts
            .get(&id)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| RemaError::AccountNotFound(id.to_string()))
    }

    // -----------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------

    /// Create an account, bind its identity and journal the onboarding grant.
    ///
    /// # Errors
    /// - `InvalidRequest` for an empty phone or a `SYSTEM` kind
    /// - `AlreadyEnrolled` if phone or key is taken or revoked
    pub fn enroll(
        &self,
        phone: &str,
        public_key: PublicKey,
        device_fingerprint: Option<String>,
        kind: AccountKind,
    ) -> Result<Account> {
        let phone = phone.trim();
        if phone.is_empty() {
            return Err(RemaError::InvalidRequest {
                reason: "phone must not be empty".into(),
            });
        }
        if kind == AccountKind::System {
            return Err(RemaError::InvalidRequest {
                reason: "SYSTEM accounts cannot be enrolled".into(),
            });
        }

        let account = Account::new(phone, public_key, device_fingerprint, kind);
        let id = account.id;
        self.accounts
            .insert(id, Arc::new(Mutex::new(account.clone())));
        if let Err(err) = self.registry.register(&account) {
            self.accounts.remove(&id);
            return Err(err);
        }
        info!(account = %id, key = %public_key, kind = %kind, "Account enrolled");

        let grant = self.config.onboarding_grant_atomic;
        if grant > 0 {
            self.credit_atomic(id, grant)?;
        }
        self.account(id)
    }

    /// Point-in-time copy of an account.
    ///
    /// # Errors
    /// Returns [`RemaError::AccountNotFound`] for unknown ids.
    pub fn account(&self, id: AccountId) -> Result<Account> {
        Ok(self.cell(id)?.lock().clone())
    }

    /// Resolve and copy an account.
    ///
    /// # Errors
    /// Returns [`RemaError::AccountNotFound`] if nothing matches.
    pub fn resolve(&self, reference: &AccountRef) -> Result<Account> {
        let id = self.registry.resolve(reference)?;
        self.account(id)
    }

    /// Copy of the account that owns `key`.
    ///
    /// # Errors
    /// Returns [`RemaError::AccountNotFound`] for unknown keys.
    pub fn account_by_key(&self, key: &PublicKey) -> Result<Account> {
        let id = self.registry.resolve_key(key)?;
        self.account(id)
    }

    /// Copy of every account, oldest first.
    #[must_use]
    pub fn accounts(&self) -> Vec<Account> {
        let cells: Vec<Cell> = self
            .accounts
            .iter()
            .map(|c| Arc::clone(c.value()))
            .collect();
        let mut accounts: Vec<Account> = cells.iter().map(|c| c.lock().clone()).collect();
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        accounts
    }

    /// An account and its journal history, read under the account lock.
    ///
    /// # Errors
    /// Returns [`RemaError::AccountNotFound`] for unknown ids.
    pub fn account_with_history(&self, id: AccountId) -> Result<(Account, Vec<JournalEntry>)> {
        let cell = self.cell(id)?;
        let account = cell.lock();
        let history = self.journal.history(id);
        Ok((account.clone(), history))
    }

    // -----------------------------------------------------------------
    // Grants and reserve locks
    // -----------------------------------------------------------------

    /// Online top-up: `total += amount`, journaled as a grant.
    ///
    /// # Errors
    /// - `NonPositiveAmount` if `amount_atomic <= 0`
    /// - `AccountNotFound`, `BalanceOverflow`
    pub fn credit(&self, id: AccountId, amount_atomic: i64) -> Result<CreditReceipt> {
        self.credit_atomic(id, positive(amount_atomic)?)
    }

    fn credit_atomic(&self, id: AccountId, amount: u64) -> Result<CreditReceipt> {
        let currency = self.config.default_currency_code;
        let cell = self.cell(id)?;
        let mut account = cell.lock();

        let new_total = account
            .balance
            .total_atomic
            .checked_add(amount)
            .ok_or(RemaError::BalanceOverflow)?;
        let entry = self
            .journal
            .append(NewEntry::grant(account.as_counterparty(), amount, currency));
        account.balance.total_atomic = new_total;
        self.supply.lock().record_grant(currency, amount);

        info!(account = %id, amount, new_total, seq = %entry.seq, "Grant credited");
        Ok(CreditReceipt {
            status: "CREDITED".into(),
            account: id,
            new_total_atomic: new_total,
            seq: entry.seq,
        })
    }

    /// Move `amount` from spendable to offline-reserved. Locks are additive.
    ///
    /// # Errors
    /// - `NonPositiveAmount` if `amount_atomic <= 0`
    /// - `AccountRevoked` if the account's key is revoked
    /// - `InsufficientFunds` if `available < amount`
    pub fn lock_reserve(&self, id: AccountId, amount_atomic: i64) -> Result<LockReceipt> {
        let amount = positive(amount_atomic)?;
        let currency = self.config.default_currency_code;
        let cell = self.cell(id)?;
        let mut account = cell.lock();

        if account.revoked {
            return Err(RemaError::AccountRevoked(account.public_key));
        }
        let available = account.balance.available();
        if available < amount {
            return Err(RemaError::InsufficientFunds {
                needed: amount,
                available,
            });
        }

        let mut next = account.balance;
        next.reserved_atomic += amount;
        if !next.invariant_holds() {
            return Err(RemaError::ReserveInvariantViolation(id));
        }
        let entry = self.journal.append(NewEntry::reserve_lock(
            account.as_counterparty(),
            amount,
            currency,
        ));
        account.balance = next;

        info!(
            account = %id,
            amount,
            reserved = next.reserved_atomic,
            available = next.available(),
            "Offline reserve locked"
        );
        Ok(LockReceipt {
            status: "LOCKED".into(),
            account: id,
            new_reserved_atomic: next.reserved_atomic,
            new_available_atomic: next.available(),
            seq: entry.seq,
        })
    }

    // -----------------------------------------------------------------
    // Offline payments
    // -----------------------------------------------------------------

    /// Atomically settle one verified payment of `amount` from `sender` to
    /// `receiver`.
    ///
    /// Under both account locks: take the uuid and nonce claim, check funds,
    /// apply the two-tier deduction, journal the `COMPLETED` entry and commit
    /// the claim. Any failure leaves balances, indices and journal untouched.
    ///
    /// # Errors
    /// - `SelfPayment` if sender and receiver are the same account
    /// - `AccountNotFound` / `AccountRevoked` for either party
    /// - `InsufficientFunds` if `sender.total < amount`
    /// - `BalanceOverflow` if the receiver would overflow
    pub fn commit_payment(
        &self,
        payment: &OfflinePayment,
        amount: u64,
        sender_id: AccountId,
        receiver_id: AccountId,
    ) -> Result<CommitOutcome> {
        if sender_id == receiver_id {
            return Err(RemaError::SelfPayment);
        }
        let sender_cell = self.cell(sender_id)?;
        let receiver_cell = self.cell(receiver_id)?;

        let (mut sender, mut receiver) = if sender_id < receiver_id {
            let s = sender_cell.lock();
            (s, receiver_cell.lock())
        } else {
            let r = receiver_cell.lock();
            (sender_cell.lock(), r)
        };

        if sender.revoked {
            return Err(RemaError::AccountRevoked(sender.public_key));
        }
        if receiver.revoked {
            return Err(RemaError::AccountRevoked(receiver.public_key));
        }

        let claim = match self.guard.claim(&payment.uuid, &payment.nonce) {
            Ok(claim) => claim,
            Err(ClaimConflict::Duplicate(prior)) => return Ok(CommitOutcome::Duplicate(prior)),
            Err(ClaimConflict::Replayed(original)) => {
                return Ok(CommitOutcome::Replayed(original));
            }
        };

        let mut sender_next = sender.balance;
        sender_next.total_atomic = sender_next.total_atomic.checked_sub(amount).ok_or(
            RemaError::InsufficientFunds {
                needed: amount,
                available: sender.balance.total_atomic,
            },
        )?;
        let reserve_deducted = sender_next.reserved_atomic.min(amount);
        sender_next.reserved_atomic -= reserve_deducted;
        if !sender_next.invariant_holds() {
            return Err(RemaError::ReserveInvariantViolation(sender_id));
        }
        let mut receiver_next = receiver.balance;
        receiver_next.total_atomic = receiver_next
            .total_atomic
            .checked_add(amount)
            .ok_or(RemaError::BalanceOverflow)?;

        let entry = self.journal.append(NewEntry::offline_payment(
            payment,
            amount,
            sender.as_counterparty(),
            receiver.as_counterparty(),
            TxStatus::Completed,
        ));
        sender.balance = sender_next;
        receiver.balance = receiver_next;
        claim.commit(entry.seq);

        debug!(
            uuid = %payment.uuid,
            seq = %entry.seq,
            amount,
            reserve_deducted,
            "Offline payment settled"
        );
        Ok(CommitOutcome::Applied(AppliedPayment {
            entry,
            reserve_deducted,
            sender: sender_next,
            receiver: receiver_next,
        }))
    }

    /// Journal a rejected attempt for forensics, once per uuid.
    ///
    /// The uuid slot is claimed first; `build` runs only if it is vacant, so
    /// side effects inside it (strike counting) happen once per uuid as well.
    /// The nonce is never indexed, so a rejected attempt cannot block an
    /// honest payment re-signed under a fresh uuid. Never moves money.
    ///
    /// # Errors
    /// Returns [`RemaError::Internal`] if the built entry is `COMPLETED` or
    /// carries a different uuid.
    pub fn record_rejection<F>(&self, uuid: &TxUuid, build: F) -> Result<RejectionOutcome>
    where
        F: FnOnce() -> NewEntry,
    {
        let claim = match self.guard.claim_uuid(uuid) {
            Ok(claim) => claim,
            Err(prior) => {
                debug!(uuid = %uuid, seq = %prior.seq, status = %prior.status, "Rejection already journaled");
                return Ok(RejectionOutcome::Duplicate(prior));
            }
        };
        let entry = build();
        if entry.status.is_completed() {
            return Err(RemaError::Internal(
                "rejections must not be journaled as COMPLETED".into(),
            ));
        }
        if entry.uuid != *uuid {
            return Err(RemaError::Internal(format!(
                "rejection for {uuid} built with uuid {}",
                entry.uuid
            )));
        }
        let entry = self.journal.append(entry);
        claim.commit(entry.seq, entry.status);
        debug!(uuid = %entry.uuid, status = %entry.status, seq = %entry.seq, "Rejection journaled");
        Ok(RejectionOutcome::Journaled(entry))
    }

    // -----------------------------------------------------------------
    // Recovery and audit support
    // -----------------------------------------------------------------

    /// Zero the reserve, revoke the key and journal the release, all under
    /// the account lock. `authorize` runs under the same lock, after the
    /// revocation check, and may veto.
    ///
    /// # Errors
    /// - `AccountRevoked` if the account is already revoked
    /// - whatever `authorize` returns
    pub fn release_and_revoke<F>(&self, id: AccountId, authorize: F) -> Result<Released>
    where
        F: FnOnce(&Account) -> Result<()>,
    {
        let cell = self.cell(id)?;
        let mut account = cell.lock();
        if account.revoked {
            return Err(RemaError::AccountRevoked(account.public_key));
        }
        authorize(&account)?;

        let released = account.balance.reserved_atomic;
        let entry = self.journal.append(NewEntry::reserve_release(
            account.as_counterparty(),
            released,
            self.config.default_currency_code,
        ));
        account.balance.reserved_atomic = 0;
        account.revoked = true;
        self.registry.revoke(account.public_key);

        warn!(account = %id, key = %account.public_key, released, "Key revoked, reserve released");
        Ok(Released {
            account: account.clone(),
            released,
            entry,
        })
    }

    /// Set the audit flag on the journal entry for `uuid`: the completed one
    /// if it settled, else the latest rejected attempt.
    ///
    /// # Errors
    /// Returns [`RemaError::EntryNotFound`] if nothing was journaled under `uuid`.
    pub fn flag(&self, uuid: &TxUuid) -> Result<JournalEntry> {
        let entries = self.journal.find(uuid);
        let target = entries
            .iter()
            .find(|e| e.status.is_completed())
            .or_else(|| entries.last())
            .ok_or_else(|| RemaError::EntryNotFound(uuid.clone()))?;
        self.journal.flag(target.seq)?;
        warn!(uuid = %uuid, seq = %target.seq, "Transaction flagged as suspicious");
        let mut flagged = target.clone();
        flagged.flagged = true;
        Ok(flagged)
    }

    /// Check the hash chain and that folding the journal reproduces every
    /// materialized balance. Run on a quiescent ledger.
    ///
    /// # Errors
    /// `JournalChainBroken` or `ReconciliationMismatch`.
    pub fn verify_materialized(&self) -> Result<()> {
        self.journal.verify_chain()?;
        let folded = fold(&self.journal.entries())?;
        let accounts = self.accounts();
        check_balances(&accounts, &folded)
    }

    /// Σ total balances == Σ grants. Run on a quiescent ledger.
    ///
    /// # Errors
    /// Returns [`RemaError::ConservationViolation`] on mismatch.
    pub fn verify_conservation(&self) -> Result<()> {
        let actual: u128 = self
            .accounts()
            .iter()
            .map(|a| u128::from(a.balance.total_atomic))
            .sum();
        self.supply
            .lock()
            .verify(self.config.default_currency_code, actual)
    }

    // -----------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------

    /// Copy of accounts and journal. Take it on a quiescent ledger.
    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot::new(self.accounts(), self.journal.entries())
    }

    /// Rebuild a ledger from a snapshot: verify the hash chain, check every
    /// balance against the journal fold, then rebuild identity and replay
    /// indices and the conservation totals.
    ///
    /// # Errors
    /// `Configuration`, `JournalChainBroken` or `ReconciliationMismatch`.
    pub fn restore(config: EngineConfig, snapshot: LedgerSnapshot) -> Result<Self> {
        config.validate()?;
        let journal = Journal::from_entries(snapshot.journal)?;
        let entries = journal.entries();
        let folded = fold(&entries)?;
        check_balances(&snapshot.accounts, &folded)?;

        let ledger = Self::with_journal(config, journal);
        for account in snapshot.accounts {
            let revoked_at = entries
                .iter()
                .rev()
                .find(|e| e.kind == TxKind::ReserveRelease && e.sender.account_id() == Some(account.id))
                .map_or(account.created_at, |e| e.recorded_at);
            ledger.registry.restore(&account, revoked_at);
            ledger
                .accounts
                .insert(account.id, Arc::new(Mutex::new(account)));
        }

        {
            let mut supply = ledger.supply.lock();
            for entry in &entries {
                match (entry.kind, entry.status) {
                    (TxKind::Grant, TxStatus::Completed) => {
                        supply.record_grant(entry.currency_code, entry.amount_atomic);
                    }
                    (TxKind::OfflinePayment, status) => {
                        ledger.guard.restore(
                            entry.uuid.clone(),
                            entry.nonce.clone(),
                            Recorded {
                                seq: entry.seq,
                                status,
                            },
                        );
                        if status == TxStatus::RejectedReplay {
                            if let Some(key) = entry.sender.public_key() {
                                ledger.guard.record_strike(key);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        info!(
            accounts = ledger.accounts.len(),
            entries = entries.len(),
            "Ledger restored from snapshot"
        );
        Ok(ledger)
    }
}

fn positive(amount_atomic: i64) -> Result<u64> {
    u64::try_from(amount_atomic)
        .ok()
        .filter(|a| *a > 0)
        .ok_or(RemaError::NonPositiveAmount(amount_atomic))
}

fn check_balances(
    accounts: &[Account],
    folded: &HashMap<AccountId, BalanceEntry>,
) -> Result<()> {
    for account in accounts {
        let expected = folded.get(&account.id).copied().unwrap_or_default();
        if account.balance != expected {
            return Err(RemaError::ReconciliationMismatch {
                reason: format!(
                    "{}: recorded total={} reserved={}, journal total={} reserved={}",
                    account.id,
                    account.balance.total_atomic,
                    account.balance.reserved_atomic,
                    expected.total_atomic,
                    expected.reserved_atomic,
                ),
            });
        }
    }
    if let Some(orphan) = folded
        .keys()
        .find(|id| !accounts.iter().any(|a| a.id == **id))
    {
        return Err(RemaError::ReconciliationMismatch {
            reason: format!("journal moves money for unknown account {orphan}"),
        });
    }
    Ok(())
}
