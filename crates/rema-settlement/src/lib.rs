//! # rema-settlement
//!
//! **Finality plane**: signature verification, per-item settlement, merchant
//! batch sync, reserve audit, lost-device recovery and the revocation feed.
//!
//! ## Architecture
//!
//! Everything here works over a shared `Arc<Ledger>` from `rema-ledger`:
//! 1. [`SignedMessage`] rebuilds the canonical message and checks the
//!    ed25519 signature
//! 2. [`SettlementEngine`] walks one payment through dedupe, validation,
//!    replay, signature and the atomic ledger commit
//! 3. [`BatchProcessor`] applies a merchant upload item by item
//! 4. [`AuditEngine`] reconciles reserves against the journal and recovers
//!    lost devices
//! 5. [`RevocationDistributor`] publishes revoked keys; [`OfflineGate`]
//!    screens payments against the last feed a device saw

pub mod audit;
pub mod batch;
pub mod engine;
pub mod revocation;
pub mod verifier;

pub use audit::{AuditEngine, PhoneMatchAuthority, RecoveryAuthority, reconcile};
pub use batch::BatchProcessor;
pub use engine::SettlementEngine;
pub use revocation::{OfflineGate, RevocationDistributor, Screened, feed_digest};
pub use verifier::{SignedMessage, verify_raw};
