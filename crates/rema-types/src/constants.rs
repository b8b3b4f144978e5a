//! System-wide constants for the REMA settlement engine.

/// Ed25519 public key length in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 signature length in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// Delimiter between fields of the canonical signing message.
pub const MESSAGE_DELIMITER: char = '|';

/// Target identifier used in signed messages when the receiver is the system.
pub const SYSTEM_TARGET: &str = "SYSTEM";

/// Domain tag that opens every v2 canonical message.
pub const V2_DOMAIN_TAG: &str = "rema:tx:v2";

/// Protocol versions accepted out of the box.
pub const DEFAULT_PROTOCOL_VERSIONS: [u8; 2] = [1, 2];

/// Onboarding grant credited at enrollment (atomic units).
pub const DEFAULT_ONBOARDING_GRANT: u64 = 50_000;

/// ISO 4217 numeric code for XOF (West African CFA franc).
pub const DEFAULT_CURRENCY_CODE: u16 = 952;

/// XOF has no minor unit, so one atomic unit is one franc.
pub const DEFAULT_CURRENCY_DECIMALS: u32 = 0;

/// Replay strikes per sender key before rejected attempts get flagged.
pub const DEFAULT_REPLAY_FLAG_THRESHOLD: u32 = 3;

/// Maximum items accepted in a single settlement batch.
pub const DEFAULT_MAX_BATCH_ITEMS: usize = 10_000;

/// Hash chain anchor for the first journal entry.
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "REMA";
