//! Reserve reconciliation, fraud annotation and lost-device recovery.
//!
//! The journal says what an account's offline reserve *should* be:
//!
//! ```text
//! theoretical_reserved = Σ locks − Σ settled offline spends − Σ releases
//! discrepancy          = recorded_reserved − theoretical_reserved
//! ```
//!
//! A non-zero discrepancy is surfaced, never corrected. Positive means the
//! wallet may still hold unsynced offline spends; negative means the sender
//! spent past its reserve.

use std::sync::Arc;

use chrono::Utc;
use rema_ledger::{Ledger, fold_account};
use rema_types::{
    Account, AccountId, AccountRef, AuditReport, JournalEntry, JournalSeq, RecoveryProof,
    RecoveryReceipt, RecoveryRequest, RemaError, Result, TxKind, TxUuid,
};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Recovery authority
// ---------------------------------------------------------------------------

/// Decides whether out-of-band evidence is enough to recover an account.
///
/// Runs under the account lock, so implementations must not call back into
/// the ledger.
pub trait RecoveryAuthority: Send + Sync {
    /// # Errors
    /// Returns [`RemaError::RecoveryProofRejected`] to veto the recovery.
    fn authorize(&self, account: &Account, proof: &RecoveryProof) -> Result<()>;
}

/// Accepts a proof whose phone matches the enrolled phone.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhoneMatchAuthority;

impl RecoveryAuthority for PhoneMatchAuthority {
    fn authorize(&self, account: &Account, proof: &RecoveryProof) -> Result<()> {
        if proof.phone.trim() == account.phone {
            Ok(())
        } else {
            Err(RemaError::RecoveryProofRejected(account.id))
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Reconcile one account's reserve against its journal history.
#[must_use]
pub fn reconcile(account: &Account, history: &[JournalEntry]) -> AuditReport {
    let mut locked_total: u64 = 0;
    let mut settled_total: u64 = 0;
    let mut released_total: u64 = 0;

    for entry in history.iter().filter(|e| e.status.is_completed()) {
        let credited = entry.receiver.account_id() == Some(account.id);
        let debited = entry.sender.account_id() == Some(account.id);
        match entry.kind {
            TxKind::ReserveLock if credited => {
                locked_total = locked_total.saturating_add(entry.amount_atomic);
            }
            TxKind::OfflinePayment if debited => {
                settled_total = settled_total.saturating_add(entry.amount_atomic);
            }
            TxKind::ReserveRelease if debited => {
                released_total = released_total.saturating_add(entry.amount_atomic);
            }
            _ => {}
        }
    }

    let theoretical_reserved =
        i128::from(locked_total) - i128::from(settled_total) - i128::from(released_total);
    let discrepancy = i128::from(account.balance.reserved_atomic) - theoretical_reserved;

    AuditReport {
        account: account.id,
        public_key: account.public_key,
        recorded_total: account.balance.total_atomic,
        recorded_reserved: account.balance.reserved_atomic,
        locked_total,
        settled_total,
        released_total,
        theoretical_reserved,
        discrepancy,
        revoked: account.revoked,
        audited_at: Utc::now(),
    }
}

/// Out-of-band audit and recovery over a shared ledger.
#[derive(Clone)]
pub struct AuditEngine {
    ledger: Arc<Ledger>,
}

impl AuditEngine {
    #[must_use]
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Reserve reconciliation for one account.
    ///
    /// # Errors
    /// `AccountNotFound` for unknown references.
    pub fn audit(&self, reference: &AccountRef) -> Result<AuditReport> {
        let id = self.ledger.registry().resolve(reference)?;
        self.audit_id(id)
    }

    fn audit_id(&self, id: AccountId) -> Result<AuditReport> {
        let (account, history) = self.ledger.account_with_history(id)?;
        let report = reconcile(&account, &history);
        if !report.is_clean() {
            warn!(
                account = %id,
                recorded = report.recorded_reserved,
                theoretical = %report.theoretical_reserved,
                discrepancy = %report.discrepancy,
                "Reserve discrepancy"
            );
        }
        Ok(report)
    }

    /// Audit every account and return only the non-clean reports.
    ///
    /// # Errors
    /// Propagates lookup failures, which mean the ledger is inconsistent.
    pub fn sweep(&self) -> Result<Vec<AuditReport>> {
        let mut dirty = Vec::new();
        for account in self.ledger.accounts() {
            let report = self.audit_id(account.id)?;
            if !report.is_clean() {
                dirty.push(report);
            }
        }
        info!(flagged = dirty.len(), "Audit sweep complete");
        Ok(dirty)
    }

    /// Check that one account's recorded counters equal the fold of its own
    /// journal history.
    ///
    /// # Errors
    /// `ReconciliationMismatch` on any difference.
    pub fn verify_account(&self, reference: &AccountRef) -> Result<()> {
        let id = self.ledger.registry().resolve(reference)?;
        let (account, history) = self.ledger.account_with_history(id)?;
        let folded = fold_account(id, &history)?;
        if folded != account.balance {
            return Err(RemaError::ReconciliationMismatch {
                reason: format!(
                    "{id}: recorded total={} reserved={}, journal total={} reserved={}",
                    account.balance.total_atomic,
                    account.balance.reserved_atomic,
                    folded.total_atomic,
                    folded.reserved_atomic,
                ),
            });
        }
        Ok(())
    }

    /// Whole-ledger integrity: hash chain, every balance against the fold,
    /// and money conservation.
    ///
    /// # Errors
    /// `JournalChainBroken`, `ReconciliationMismatch` or
    /// `ConservationViolation`.
    pub fn verify_ledger(&self) -> Result<()> {
        self.ledger.verify_materialized()?;
        self.ledger.verify_conservation()
    }

    /// Mark the journal entry for `uuid` as suspicious.
    ///
    /// # Errors
    /// `EntryNotFound` if nothing was journaled under `uuid`.
    pub fn flag_transaction(&self, uuid: &TxUuid) -> Result<JournalEntry> {
        self.ledger.flag(uuid)
    }

    /// Lost-device recovery: hand the outstanding reserve back to the
    /// spendable balance and permanently revoke the wallet key.
    ///
    /// # Errors
    /// - `AccountNotFound` for unknown references
    /// - `AccountRevoked` if the account was already recovered
    /// - `RecoveryProofRejected` if `authority` vetoes
    pub fn recover(
        &self,
        request: &RecoveryRequest,
        authority: &dyn RecoveryAuthority,
    ) -> Result<RecoveryReceipt> {
        let id = self.ledger.registry().resolve(&request.account)?;
        let released = self
            .ledger
            .release_and_revoke(id, |account| authority.authorize(account, &request.proof))?;

        let (account, history) = self.ledger.account_with_history(id)?;
        let before_release: Vec<JournalEntry> = history
            .into_iter()
            .filter(|e| e.seq < released.entry.seq)
            .collect();
        let theoretical_reserved = reconcile(&account, &before_release).theoretical_reserved;
        if theoretical_reserved != i128::from(released.released) {
            warn!(
                account = %id,
                released = released.released,
                theoretical = %theoretical_reserved,
                "Recovered reserve differs from journal expectation"
            );
        }

        info!(
            account = %id,
            key = %released.account.public_key,
            refunded = released.released,
            reference = request.proof.reference.as_deref().unwrap_or("-"),
            "Lost-device recovery complete"
        );
        Ok(RecoveryReceipt {
            status: "RECOVERED".into(),
            account: id,
            revoked_key: released.account.public_key,
            refunded_amount: released.released,
            theoretical_reserved,
            new_total_atomic: released.account.balance.total_atomic,
        })
    }

    /// Sequence of the release entry journaled by a past recovery, if any.
    #[must_use]
    pub fn recovery_seq(&self, id: AccountId) -> Option<JournalSeq> {
        self.ledger
            .journal()
            .history(id)
            .iter()
            .rev()
            .find(|e| e.kind == TxKind::ReserveRelease)
            .map(|e| e.seq)
    }
}
