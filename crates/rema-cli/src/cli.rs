//! Command-line surface of the `rema` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rema_types::{AccountKind, PublicKey};

use crate::logging::LogFormat;

/// Operator tool for a REMA offline-payment settlement node.
///
/// State lives in a single JSON snapshot that is re-verified on every load.
#[derive(Parser, Debug)]
#[command(name = "rema", version, propagate_version = true)]
pub struct RemaCli {
    /// Ledger snapshot file.
    #[arg(long, short = 's', global = true, env = "REMA_STATE", default_value = "rema-state.json")]
    pub state: PathBuf,

    /// Engine configuration (JSON). Defaults apply when omitted.
    #[arg(long, short = 'c', global = true, env = "REMA_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, env = "REMA_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an empty ledger snapshot.
    Init {
        /// Overwrite an existing snapshot.
        #[arg(long)]
        force: bool,
    },
    /// Enroll a wallet and credit the onboarding grant.
    Enroll(EnrollArgs),
    /// Credit an account from the system.
    Credit(AmountArgs),
    /// Move spendable balance into the offline reserve.
    Lock(AmountArgs),
    /// Apply a merchant batch file (`BatchSettlementRequest` JSON).
    Settle {
        batch: PathBuf,
    },
    /// Show an account and its balances.
    Balance {
        account: String,
    },
    /// Journal entries touching an account.
    History {
        account: String,
    },
    /// Reconcile one account's reserve against the journal.
    Audit {
        account: String,
    },
    /// Audit every account, listing only discrepancies.
    Sweep,
    /// Mark a transaction as suspicious.
    Flag {
        uuid: String,
    },
    /// Lost-device recovery: release the reserve and revoke the key.
    Recover(RecoverArgs),
    /// Print the revocation feed.
    Revocations,
    /// Check the hash chain, every balance, and money conservation.
    Verify,
}

#[derive(Args, Debug)]
pub struct EnrollArgs {
    #[arg(long)]
    pub phone: String,
    /// Wallet public key, 64 hex characters.
    #[arg(long)]
    pub public_key: PublicKey,
    #[arg(long)]
    pub device: Option<String>,
    #[arg(long, value_enum, default_value_t = KindArg::User)]
    pub kind: KindArg,
}

#[derive(Args, Debug)]
pub struct AmountArgs {
    /// Phone, public key hex, or `acct:<uuid>`.
    pub account: String,
    /// Atomic units.
    pub amount: i64,
}

#[derive(Args, Debug)]
pub struct RecoverArgs {
    pub account: String,
    /// Phone number presented during out-of-band verification.
    #[arg(long)]
    pub phone: String,
    /// Support ticket or KYC reference.
    #[arg(long)]
    pub reference: Option<String>,
}

/// Enrollable account kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    User,
    Merchant,
}

impl From<KindArg> for AccountKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::User => AccountKind::User,
            KindArg::Merchant => AccountKind::Merchant,
        }
    }
}

impl Commands {
    /// Whether the command changes ledger state and needs a save.
    pub fn mutates(&self) -> bool {
        matches!(
            self,
            Self::Enroll(_)
                | Self::Credit(_)
                | Self::Lock(_)
                | Self::Settle { .. }
                | Self::Flag { .. }
                | Self::Recover(_)
        )
    }
}
