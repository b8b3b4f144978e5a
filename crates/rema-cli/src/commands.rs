//! Subcommand execution against a loaded ledger.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use rema_ledger::{Ledger, LedgerSnapshot};
use rema_settlement::{
    AuditEngine, BatchProcessor, PhoneMatchAuthority, RevocationDistributor, SettlementEngine,
};
use rema_types::{
    AccountRef, BatchSettlementRequest, EngineConfig, RecoveryProof, RecoveryRequest, TxUuid,
    to_major_units,
};
use serde_json::{Value, json};
use tracing::info;

use crate::cli::Commands;

/// Engine configuration from `path`, or defaults.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// Restore the ledger from its snapshot, re-verifying everything.
pub fn load_ledger(config: EngineConfig, state: &Path) -> Result<Ledger> {
    if !state.exists() {
        bail!("no ledger at {}; run `rema init` first", state.display());
    }
    let snapshot = LedgerSnapshot::load(state)
        .with_context(|| format!("failed to read snapshot {}", state.display()))?;
    let ledger = Ledger::restore(config, snapshot)
        .with_context(|| format!("snapshot {} failed verification", state.display()))?;
    info!(
        path = %state.display(),
        accounts = ledger.registry().len(),
        entries = ledger.journal().len(),
        "Ledger restored"
    );
    Ok(ledger)
}

pub fn save_ledger(ledger: &Ledger, state: &Path) -> Result<()> {
    ledger
        .snapshot()
        .save(state)
        .with_context(|| format!("failed to write snapshot {}", state.display()))
}

/// Write an empty ledger to `state`.
pub fn init(config: EngineConfig, state: &Path, force: bool) -> Result<Value> {
    if state.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", state.display());
    }
    let ledger = Ledger::new(config)?;
    save_ledger(&ledger, state)?;
    Ok(json!({ "status": "INITIALIZED", "state": state.display().to_string() }))
}

/// Run every command except `init` against `ledger`.
pub fn execute(ledger: &Arc<Ledger>, command: &Commands) -> Result<Value> {
    let audit = AuditEngine::new(Arc::clone(ledger));
    let value = match command {
        Commands::Init { .. } => bail!("init does not run against a loaded ledger"),
        Commands::Enroll(args) => {
            let account = ledger.enroll(
                &args.phone,
                args.public_key,
                args.device.clone(),
                args.kind.into(),
            )?;
            serde_json::to_value(account)?
        }
        Commands::Credit(args) => {
            let id = ledger.resolve(&AccountRef::parse(&args.account))?.id;
            serde_json::to_value(ledger.credit(id, args.amount)?)?
        }
        Commands::Lock(args) => {
            let id = ledger.resolve(&AccountRef::parse(&args.account))?.id;
            serde_json::to_value(ledger.lock_reserve(id, args.amount)?)?
        }
        Commands::Settle { batch } => {
            let raw = std::fs::read_to_string(batch)
                .with_context(|| format!("failed to read batch {}", batch.display()))?;
            let request: BatchSettlementRequest = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a settlement batch", batch.display()))?;
            let processor = BatchProcessor::new(SettlementEngine::new(Arc::clone(ledger)));
            serde_json::to_value(processor.process(&request)?)?
        }
        Commands::Balance { account } => {
            let account = ledger.resolve(&AccountRef::parse(account))?;
            let decimals = ledger.config().currency_decimals;
            json!({
                "account": account,
                "available_atomic": account.balance.available(),
                "total": to_major_units(account.balance.total_atomic, decimals).to_string(),
                "reserved": to_major_units(account.balance.reserved_atomic, decimals).to_string(),
            })
        }
        Commands::History { account } => {
            let id = ledger.resolve(&AccountRef::parse(account))?.id;
            let (_, history) = ledger.account_with_history(id)?;
            serde_json::to_value(history)?
        }
        Commands::Audit { account } => {
            serde_json::to_value(audit.audit(&AccountRef::parse(account))?)?
        }
        Commands::Sweep => serde_json::to_value(audit.sweep()?)?,
        Commands::Flag { uuid } => {
            serde_json::to_value(audit.flag_transaction(&TxUuid::from(uuid.as_str()))?)?
        }
        Commands::Recover(args) => {
            let request = RecoveryRequest {
                account: AccountRef::parse(&args.account),
                proof: RecoveryProof {
                    phone: args.phone.clone(),
                    reference: args.reference.clone(),
                },
            };
            serde_json::to_value(audit.recover(&request, &PhoneMatchAuthority)?)?
        }
        Commands::Revocations => {
            serde_json::to_value(RevocationDistributor::new(Arc::clone(ledger)).feed())?
        }
        Commands::Verify => {
            audit.verify_ledger()?;
            json!({
                "status": "OK",
                "accounts": ledger.registry().len(),
                "entries": ledger.journal().len(),
            })
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use rema_types::testkit::TestWallet;

    use super::*;
    use crate::cli::{AmountArgs, EnrollArgs, KindArg, RecoverArgs};

    fn enroll(ledger: &Arc<Ledger>, phone: &str, wallet: &TestWallet, kind: KindArg) {
        execute(
            ledger,
            &Commands::Enroll(EnrollArgs {
                phone: phone.into(),
                public_key: wallet.public_key(),
                device: None,
                kind,
            }),
        )
        .unwrap();
    }

    #[test]
    fn init_refuses_to_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json");
        init(EngineConfig::default(), &state, false).unwrap();
        assert!(init(EngineConfig::default(), &state, false).is_err());
        assert!(init(EngineConfig::default(), &state, true).is_ok());
    }

    #[test]
    fn missing_state_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_ledger(EngineConfig::default(), &dir.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("rema init"));
    }

    #[test]
    fn session_round_trips_through_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json");
        init(EngineConfig::default(), &state, false).unwrap();

        let alice = TestWallet::generate();
        let shop = TestWallet::generate();
        let ledger = Arc::new(load_ledger(EngineConfig::default(), &state).unwrap());
        enroll(&ledger, "+22997000001", &alice, KindArg::User);
        enroll(&ledger, "+22997000002", &shop, KindArg::Merchant);
        let lock = execute(
            &ledger,
            &Commands::Lock(AmountArgs {
                account: "+22997000001".into(),
                amount: 20_000,
            }),
        )
        .unwrap();
        assert_eq!(lock["new_reserved_atomic"], 20_000);

        let batch = BatchSettlementRequest {
            merchant_public_key: shop.public_key().to_hex(),
            batch_id: "b1".into(),
            device_id: None,
            items: vec![alice.pay("t1", "n1", shop.public_key(), 12_000)],
        };
        let batch_path = dir.path().join("batch.json");
        std::fs::write(&batch_path, serde_json::to_string(&batch).unwrap()).unwrap();
        let report = execute(&ledger, &Commands::Settle { batch: batch_path }).unwrap();
        assert_eq!(report["processed"], 1);
        save_ledger(&ledger, &state).unwrap();

        // Fresh process: everything is re-derived from the snapshot.
        let ledger = Arc::new(load_ledger(EngineConfig::default(), &state).unwrap());
        let audit = execute(&ledger, &Commands::Audit { account: alice.public_key().to_hex() }).unwrap();
        assert_eq!(audit["theoretical_reserved"], 8_000);
        let receipt = execute(
            &ledger,
            &Commands::Recover(RecoverArgs {
                account: "+22997000001".into(),
                phone: "+22997000001".into(),
                reference: None,
            }),
        )
        .unwrap();
        assert_eq!(receipt["refunded_amount"], 8_000);
        assert_eq!(receipt["new_total_atomic"], 38_000);

        let feed = execute(&ledger, &Commands::Revocations).unwrap();
        assert_eq!(feed["revoked_keys"][0], alice.public_key().to_hex());
        assert_eq!(execute(&ledger, &Commands::Verify).unwrap()["status"], "OK");
        assert!(execute(&ledger, &Commands::Sweep).unwrap().as_array().unwrap().is_empty());
    }

    #[test]
    fn balance_shows_major_units() {
        let ledger = Arc::new(Ledger::new(EngineConfig::default()).unwrap());
        let alice = TestWallet::generate();
        enroll(&ledger, "+22997000001", &alice, KindArg::User);
        let out = execute(&ledger, &Commands::Balance { account: "+22997000001".into() }).unwrap();
        assert_eq!(out["total"], "50000");
        assert_eq!(out["available_atomic"], 50_000);
    }
}
