//! # rema-ledger
//!
//! **Ledger plane**: identity bindings, replay protection, the hash-chained
//! journal and the two-tier account balances.
//!
//! ## Architecture
//!
//! 1. **IdentityRegistry**: public key / phone / device → account, plus the
//!    permanent revocation set
//! 2. **ReplayGuard**: uuid and nonce uniqueness with claim-then-commit
//! 3. **Journal**: append-only, SHA-256 chained, the source of truth
//! 4. **Ledger**: per-account locked cells and the atomic primitives
//!    (grant, reserve lock, payment commit, release-and-revoke)
//! 5. **SupplyConservation**: Σ balances == Σ grants
//!
//! ## Balance model
//!
//! ```text
//! total_atomic      everything the account owns
//! reserved_atomic   portion of total locked for offline spending
//! available         total - reserved
//! ```
//!
//! Every balance can be re-derived by folding the journal; snapshots are
//! verified this way on load.

pub mod conservation;
pub mod journal;
pub mod ledger;
pub mod registry;
pub mod replay_guard;
pub mod snapshot;

pub use conservation::SupplyConservation;
pub use journal::{Journal, fold, fold_account};
pub use ledger::{AppliedPayment, CommitOutcome, Ledger, RejectionOutcome, Released};
pub use registry::IdentityRegistry;
pub use replay_guard::{Claim, ClaimConflict, Recorded, ReplayGuard, UuidClaim};
pub use snapshot::LedgerSnapshot;
