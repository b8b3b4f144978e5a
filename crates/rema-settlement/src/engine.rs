//! Per-transaction settlement.
//!
//! Every uploaded item walks the same pipeline:
//!
//! ```text
//! RECEIVED
//!   → uuid already journaled?      DUPLICATE (no-op, prior status)
//!   → validate (amount, encodings, version, currency, receiver)
//!   → sender revoked / unknown?    error (unknown senders journaled unattributed)
//!   → nonce already settled?       REPLAYED (journaled, strike counted)
//!   → signature valid?             SIGNATURE_INVALID (journaled)
//!   → atomic ledger commit         SETTLED (or InsufficientFunds)
//! ```
//!
//! Every journaled uuid, settled or rejected, is recorded once: re-uploading a
//! rejected item reports the recorded status without a new entry or strike.
//! The early duplicate and nonce checks are fast paths only; uniqueness is
//! enforced again when the ledger claims the uuid slot, so two concurrent
//! uploads of one item are journaled once.

use std::sync::Arc;

use rema_ledger::{CommitOutcome, Ledger, RejectionOutcome};
use rema_types::{
    Account, Counterparty, NewEntry, OfflinePayment, PaymentTarget, PublicKey, RemaError, Result,
    SettlementOutcome, TxStatus, TxUuid, constants,
};
use tracing::{debug, info, warn};

use crate::verifier::SignedMessage;

/// An item that passed validation.
struct Validated {
    amount: u64,
    signed: SignedMessage,
}

/// Applies single offline payments to the ledger.
#[derive(Clone)]
pub struct SettlementEngine {
    ledger: Arc<Ledger>,
}

impl SettlementEngine {
    #[must_use]
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Settle a payment whose receiver is resolved from its signed target.
    ///
    /// # Errors
    /// Everything [`SettlementEngine::settle_for`] returns, plus
    /// `AccountNotFound` / `AccountRevoked` for the receiver.
    pub fn settle(&self, payment: &OfflinePayment) -> Result<SettlementOutcome> {
        let receiver = match payment.target()? {
            PaymentTarget::Key(key) => self.ledger.account_by_key(&key)?,
            PaymentTarget::System => return Err(system_target()),
        };
        if receiver.revoked {
            return Err(RemaError::AccountRevoked(receiver.public_key));
        }
        self.settle_for(payment, &receiver)
    }

    /// Settle a payment uploaded by `receiver`.
    ///
    /// Rejections that are part of the normal outcome set (`REPLAYED`,
    /// `SIGNATURE_INVALID`, `DUPLICATE`) come back as `Ok`; everything that
    /// stops an item before or at the ledger is an `Err`.
    ///
    /// # Errors
    /// - validation: `NonPositiveAmount`, `InvalidEncoding`,
    ///   `UnsupportedProtocolVersion`, `CurrencyMismatch`, `ReceiverMismatch`,
    ///   `SelfPayment`, `InvalidRequest`
    /// - `AccountRevoked` for a revoked sender, `AccountNotFound` for an
    ///   unknown one
    /// - `InsufficientFunds` if the sender's total cannot cover the amount
    pub fn settle_for(
        &self,
        payment: &OfflinePayment,
        receiver: &Account,
    ) -> Result<SettlementOutcome> {
        // 1. Known uuid: harmless re-upload of a settled or rejected item.
        if let Some(prior) = self.ledger.replay_guard().recorded(&payment.uuid) {
            debug!(uuid = %payment.uuid, seq = %prior.seq, status = %prior.status, "Duplicate upload ignored");
            return Ok(duplicate(prior.status));
        }

        // 2. Validation, before any signature work.
        let Validated { amount, signed } = self.validate(payment, receiver)?;

        // 3. Sender identity.
        if self.ledger.registry().is_revoked(&signed.public_key) {
            warn!(uuid = %payment.uuid, sender = %signed.public_key, "Payment from revoked key");
            return Err(RemaError::AccountRevoked(signed.public_key));
        }
        let sender = match self.ledger.account_by_key(&signed.public_key) {
            Ok(sender) => sender,
            Err(err @ RemaError::AccountNotFound(_)) => {
                return match self.record_unattributed(payment, amount, signed.public_key, receiver)? {
                    RejectionOutcome::Journaled(_) => Err(err),
                    RejectionOutcome::Duplicate(prior) => Ok(duplicate(prior.status)),
                };
            }
            Err(err) => return Err(err),
        };

        // 4. Nonce reuse.
        if let Some(original) = self.ledger.replay_guard().nonce_owner(&payment.nonce) {
            return self.reject_replay(payment, amount, &sender, receiver, &original);
        }

        // 5. Signature.
        if !signed.verify() {
            let recorded = self.ledger.record_rejection(&payment.uuid, || {
                warn!(uuid = %payment.uuid, sender = %sender.public_key, "Signature verification failed");
                NewEntry::offline_payment(
                    payment,
                    amount,
                    sender.as_counterparty(),
                    receiver.as_counterparty(),
                    TxStatus::RejectedSignature,
                )
            })?;
            return Ok(match recorded {
                RejectionOutcome::Journaled(_) => SettlementOutcome::SignatureInvalid,
                RejectionOutcome::Duplicate(prior) => duplicate(prior.status),
            });
        }

        // 6. Atomic commit.
        match self
            .ledger
            .commit_payment(payment, amount, sender.id, receiver.id)?
        {
            CommitOutcome::Applied(applied) => {
                info!(
                    uuid = %payment.uuid,
                    seq = %applied.entry.seq,
                    amount,
                    from = %sender.id,
                    to = %receiver.id,
                    reserve_deducted = applied.reserve_deducted,
                    "Offline payment settled"
                );
                Ok(SettlementOutcome::Settled {
                    seq: applied.entry.seq,
                    reserve_deducted: applied.reserve_deducted,
                    sender_total: applied.sender.total_atomic,
                    sender_reserved: applied.sender.reserved_atomic,
                    receiver_total: applied.receiver.total_atomic,
                })
            }
            CommitOutcome::Duplicate(prior) => {
                debug!(uuid = %payment.uuid, seq = %prior.seq, status = %prior.status, "Duplicate journaled concurrently");
                Ok(duplicate(prior.status))
            }
            CommitOutcome::Replayed(original) => {
                self.reject_replay(payment, amount, &sender, receiver, &original)
            }
        }
    }

    fn validate(&self, payment: &OfflinePayment, receiver: &Account) -> Result<Validated> {
        if payment.uuid.as_str().trim().is_empty() || payment.nonce.as_str().trim().is_empty() {
            return Err(RemaError::InvalidRequest {
                reason: "uuid and nonce must not be empty".into(),
            });
        }
        // The signed message joins fields with the delimiter; a uuid or nonce
        // carrying it could shift the boundary under the same signature.
        for (field, value) in [("uuid", payment.uuid.as_str()), ("nonce", payment.nonce.as_str())] {
            if value.contains(constants::MESSAGE_DELIMITER) {
                return Err(RemaError::InvalidEncoding {
                    field: field.to_string(),
                    reason: format!("must not contain '{}'", constants::MESSAGE_DELIMITER),
                });
            }
        }
        let amount = payment.positive_amount()?;

        let config = self.ledger.config();
        if !config.accepts_version(payment.protocol_version) {
            return Err(RemaError::UnsupportedProtocolVersion(payment.protocol_version));
        }
        if payment.currency_code != config.default_currency_code {
            return Err(RemaError::CurrencyMismatch {
                expected: config.default_currency_code,
                actual: payment.currency_code,
            });
        }

        match payment.target()? {
            PaymentTarget::System => return Err(system_target()),
            PaymentTarget::Key(key) if key != receiver.public_key => {
                return Err(RemaError::ReceiverMismatch {
                    item: key.to_string(),
                    batch: receiver.public_key.to_string(),
                });
            }
            PaymentTarget::Key(_) => {}
        }

        let signed = SignedMessage::from_payment(payment)?;
        if signed.public_key == receiver.public_key {
            return Err(RemaError::SelfPayment);
        }
        Ok(Validated { amount, signed })
    }

    fn reject_replay(
        &self,
        payment: &OfflinePayment,
        amount: u64,
        sender: &Account,
        receiver: &Account,
        original: &TxUuid,
    ) -> Result<SettlementOutcome> {
        // Strikes are counted under the uuid slot, once per journaled attempt.
        let recorded = self.ledger.record_rejection(&payment.uuid, || {
            let strikes = self.ledger.replay_guard().record_strike(sender.public_key);
            let entry = NewEntry::offline_payment(
                payment,
                amount,
                sender.as_counterparty(),
                receiver.as_counterparty(),
                TxStatus::RejectedReplay,
            );
            if strikes >= self.ledger.config().replay_flag_threshold {
                warn!(
                    uuid = %payment.uuid,
                    nonce = %payment.nonce,
                    sender = %sender.public_key,
                    strikes,
                    "Repeated replay attempts, flagging"
                );
                entry.flagged()
            } else {
                warn!(
                    uuid = %payment.uuid,
                    nonce = %payment.nonce,
                    original = %original,
                    "Replay rejected"
                );
                entry
            }
        })?;
        Ok(match recorded {
            RejectionOutcome::Journaled(_) => SettlementOutcome::Replayed,
            RejectionOutcome::Duplicate(prior) => duplicate(prior.status),
        })
    }

    fn record_unattributed(
        &self,
        payment: &OfflinePayment,
        amount: u64,
        sender_key: PublicKey,
        receiver: &Account,
    ) -> Result<RejectionOutcome> {
        self.ledger.record_rejection(&payment.uuid, || {
            warn!(uuid = %payment.uuid, sender = %sender_key, "Payment from unknown key");
            NewEntry::offline_payment(
                payment,
                amount,
                Counterparty::Unattributed {
                    public_key: sender_key,
                },
                receiver.as_counterparty(),
                TxStatus::RejectedUnattributed,
            )
        })
    }
}

fn duplicate(prior_status: TxStatus) -> SettlementOutcome {
    SettlementOutcome::Duplicate { prior_status }
}

fn system_target() -> RemaError {
    RemaError::InvalidRequest {
        reason: "payments to SYSTEM are not settled from offline batches".into(),
    }
}
