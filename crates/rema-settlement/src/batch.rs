//! Merchant batch sync.
//!
//! A merchant device reconnects and uploads every offline payment it
//! collected. The receiving party is resolved once; if it is unknown or
//! revoked the whole batch fails. Otherwise items run through the
//! [`SettlementEngine`] in submission order and failures are collected per
//! item without stopping the batch.

use rema_types::{
    BatchReport, BatchSettlementRequest, ItemError, ItemReport, PublicKey, RemaError, Result,
    SettlementOutcome,
};
use tracing::{info, warn};

use crate::engine::SettlementEngine;

/// Applies whole merchant batches.
#[derive(Clone)]
pub struct BatchProcessor {
    engine: SettlementEngine,
}

impl BatchProcessor {
    #[must_use]
    pub fn new(engine: SettlementEngine) -> Self {
        Self { engine }
    }

    #[must_use]
    pub fn engine(&self) -> &SettlementEngine {
        &self.engine
    }

    /// Settle every item of `request`, in order.
    ///
    /// # Errors
    /// Whole-batch failures only:
    /// - `InvalidRequest` for an empty batch id or an oversized batch
    /// - `InvalidEncoding` for a malformed merchant key
    /// - `AccountNotFound` / `AccountRevoked` for the receiving party
    pub fn process(&self, request: &BatchSettlementRequest) -> Result<BatchReport> {
        let ledger = self.engine.ledger();
        if request.batch_id.trim().is_empty() {
            return Err(RemaError::InvalidRequest {
                reason: "batch_id must not be empty".into(),
            });
        }
        let max = ledger.config().max_batch_items;
        if request.items.len() > max {
            return Err(RemaError::InvalidRequest {
                reason: format!("batch has {} items, limit is {max}", request.items.len()),
            });
        }

        let merchant_key = PublicKey::from_hex("merchant_public_key", &request.merchant_public_key)?;
        let merchant = ledger.account_by_key(&merchant_key)?;
        if merchant.revoked {
            return Err(RemaError::AccountRevoked(merchant.public_key));
        }
        if let Some(device) = &request.device_id {
            if ledger.registry().resolve_device(device).is_some_and(|id| id != merchant.id) {
                warn!(
                    batch = %request.batch_id,
                    device = %device,
                    "Batch uploaded from a device bound to another account"
                );
            }
        }

        let mut processed = 0;
        let mut rejected = 0;
        let mut duplicates = 0;
        let mut errors = Vec::new();
        let mut items = Vec::with_capacity(request.items.len());

        for item in &request.items {
            let status = match self.engine.settle_for(item, &merchant) {
                Ok(outcome) => {
                    match &outcome {
                        SettlementOutcome::Settled { .. } => processed += 1,
                        SettlementOutcome::Duplicate { prior_status } => {
                            match prior_status.rejection_reason() {
                                None => duplicates += 1,
                                Some(reason) => {
                                    rejected += 1;
                                    errors.push(ItemError {
                                        uuid: item.uuid.clone(),
                                        reason: reason.to_string(),
                                        detail: format!("already journaled as {prior_status}"),
                                    });
                                }
                            }
                        }
                        SettlementOutcome::Replayed | SettlementOutcome::SignatureInvalid => {
                            rejected += 1;
                            errors.push(ItemError {
                                uuid: item.uuid.clone(),
                                reason: outcome.label().to_string(),
                                detail: if matches!(outcome, SettlementOutcome::Replayed) {
                                    format!("nonce {} already used", item.nonce)
                                } else {
                                    "signature does not verify".to_string()
                                },
                            });
                        }
                    }
                    outcome.label().to_string()
                }
                Err(err) => {
                    rejected += 1;
                    let reason = err.reason_code().to_string();
                    errors.push(ItemError {
                        uuid: item.uuid.clone(),
                        reason: reason.clone(),
                        detail: err.to_string(),
                    });
                    reason
                }
            };
            items.push(ItemReport {
                uuid: item.uuid.clone(),
                status,
            });
        }

        let receiving_party_new_total = ledger.account(merchant.id)?.balance.total_atomic;
        info!(
            batch = %request.batch_id,
            merchant = %merchant.id,
            processed,
            rejected,
            duplicates,
            new_total = receiving_party_new_total,
            "Batch settled"
        );

        Ok(BatchReport {
            batch_id: request.batch_id.clone(),
            processed,
            rejected,
            duplicates,
            errors,
            receiving_party_new_total,
            items,
        })
    }
}
