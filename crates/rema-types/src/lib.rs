//! # rema-types
//!
//! Shared types, errors, and configuration for the **REMA** offline-payment
//! settlement engine.
//!
//! This crate is the leaf dependency of the workspace: every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`AccountId`], [`TxUuid`], [`Nonce`], [`PublicKey`], [`JournalSeq`]
//! - **Account model**: [`Account`], [`AccountKind`], [`AccountRef`]
//! - **Balance model**: [`BalanceEntry`], [`to_major_units`]
//! - **Transaction model**: [`OfflinePayment`], [`MessageLayout`], [`JournalEntry`], [`TxKind`], [`TxStatus`]
//! - **Boundary types**: [`BatchSettlementRequest`], [`BatchReport`], [`LockReceipt`], [`RecoveryReceipt`], [`AuditReport`], [`RevocationFeed`]
//! - **Configuration**: [`EngineConfig`]
//! - **Errors**: [`RemaError`] with `REMA_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod account;
pub mod balance;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod report;
pub mod transaction;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testkit;

pub use account::*;
pub use balance::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use report::*;
pub use transaction::*;

// Constants are accessed via `rema_types::constants::FOO`
// (not re-exported to avoid name collisions).
