//! Full settlement flows: lock, offline spend, batch sync, audit, recovery.

use std::sync::Arc;
use std::thread;

use rema_ledger::Ledger;
use rema_settlement::{
    AuditEngine, BatchProcessor, OfflineGate, PhoneMatchAuthority, RevocationDistributor,
    SettlementEngine, SignedMessage,
};
use rema_types::testkit::TestWallet;
use rema_types::{
    Account, AccountKind, AccountRef, BatchSettlementRequest, EngineConfig, OfflinePayment,
    RecoveryProof, RecoveryRequest, RemaError, SettlementOutcome, TxStatus,
};

struct Node {
    ledger: Arc<Ledger>,
    batches: BatchProcessor,
    audit: AuditEngine,
    revocations: RevocationDistributor,
}

impl Node {
    fn new() -> Self {
        let ledger = Arc::new(Ledger::new(EngineConfig::default()).unwrap());
        Self {
            batches: BatchProcessor::new(SettlementEngine::new(Arc::clone(&ledger))),
            audit: AuditEngine::new(Arc::clone(&ledger)),
            revocations: RevocationDistributor::new(Arc::clone(&ledger)),
            ledger,
        }
    }

    fn enroll(&self, phone: &str, kind: AccountKind) -> (TestWallet, Account) {
        let wallet = TestWallet::generate();
        let account = self
            .ledger
            .enroll(phone, wallet.public_key(), None, kind)
            .unwrap();
        (wallet, account)
    }

    fn upload(&self, merchant: &TestWallet, batch_id: &str, items: Vec<OfflinePayment>) -> rema_types::BatchReport {
        self.batches
            .process(&BatchSettlementRequest {
                merchant_public_key: merchant.public_key().to_hex(),
                batch_id: batch_id.into(),
                device_id: None,
                items,
            })
            .unwrap()
    }

    fn balance(&self, account: &Account) -> (u64, u64) {
        let b = self.ledger.account(account.id).unwrap().balance;
        (b.total_atomic, b.reserved_atomic)
    }
}

#[test]
fn lock_then_over_lock() {
    let node = Node::new();
    let (_, a) = node.enroll("+22997000001", AccountKind::User);

    let receipt = node.ledger.lock_reserve(a.id, 20_000).unwrap();
    assert_eq!(receipt.status, "LOCKED");
    assert_eq!(receipt.new_reserved_atomic, 20_000);
    assert_eq!(node.balance(&a), (50_000, 20_000));

    let err = node.ledger.lock_reserve(a.id, 40_000).unwrap_err();
    assert!(matches!(err, RemaError::InsufficientFunds { .. }));
    assert_eq!(node.balance(&a), (50_000, 20_000));
}

#[test]
fn settle_duplicate_then_replay() {
    let node = Node::new();
    let (aw, a) = node.enroll("+22997000001", AccountKind::User);
    let (mw, m) = node.enroll("+22997000002", AccountKind::Merchant);
    node.ledger.lock_reserve(a.id, 20_000).unwrap();

    let t1 = aw.pay("t1", "n1", mw.public_key(), 5_000);
    let first = node.upload(&mw, "b1", vec![t1.clone()]);
    assert_eq!(first.processed, 1);
    assert_eq!(first.items[0].status, "SETTLED");
    assert_eq!(first.receiving_party_new_total, 55_000);
    assert_eq!(node.balance(&a), (45_000, 15_000));

    let again = node.upload(&mw, "b1", vec![t1]);
    assert_eq!(again.duplicates, 1);
    assert_eq!(again.items[0].status, "DUPLICATE");
    assert_eq!(node.balance(&a), (45_000, 15_000));
    assert_eq!(node.balance(&m), (55_000, 0));

    let replay = node.upload(&mw, "b2", vec![aw.pay("t2", "n1", mw.public_key(), 5_000)]);
    assert_eq!(replay.rejected, 1);
    assert_eq!(replay.errors[0].reason, "REPLAYED");
    assert_eq!(node.balance(&a), (45_000, 15_000));
    assert_eq!(node.balance(&m), (55_000, 0));

    let t2 = node.ledger.journal().find(&"t2".into());
    assert_eq!(t2.len(), 1);
    assert_eq!(t2[0].status, TxStatus::RejectedReplay);
    assert!(node.audit.verify_ledger().is_ok());
}

#[test]
fn shifted_uuid_nonce_boundary_cannot_reuse_a_signature() {
    let node = Node::new();
    let (aw, a) = node.enroll("+22997000001", AccountKind::User);
    let (mw, m) = node.enroll("+22997000002", AccountKind::Merchant);

    let joined = aw.pay("a|b", "c", mw.public_key(), 5_000);
    let mut shifted = joined.clone();
    shifted.uuid = "a".into();
    shifted.nonce = "b|c".into();

    let report = node.upload(&mw, "b1", vec![joined, shifted]);
    assert_eq!((report.processed, report.rejected), (0, 2));
    assert!(report.errors.iter().all(|e| e.reason == "VALIDATION"));
    assert_eq!(node.balance(&a), (50_000, 0));
    assert_eq!(node.balance(&m), (50_000, 0));
    assert!(node.ledger.journal().find(&"a".into()).is_empty());
    assert!(node.ledger.journal().find(&"a|b".into()).is_empty());
}

#[test]
fn resending_a_batch_journals_each_rejection_once() {
    let node = Node::new();
    let (aw, a) = node.enroll("+22997000001", AccountKind::User);
    let (mw, _) = node.enroll("+22997000002", AccountKind::Merchant);
    let mut forged = aw.pay("t9", "n9", mw.public_key(), 1);
    forged.amount_atomic = 5_000;
    let items = vec![
        aw.pay("t1", "n1", mw.public_key(), 5_000),
        aw.pay("t2", "n1", mw.public_key(), 5_000),
        forged,
    ];

    let first = node.upload(&mw, "b1", items.clone());
    assert_eq!((first.processed, first.rejected), (1, 2));
    let journal_len = node.ledger.journal().len();

    for attempt in 0..3 {
        let report = node.upload(&mw, &format!("b1-retry-{attempt}"), items.clone());
        assert_eq!((report.processed, report.rejected, report.duplicates), (0, 2, 1));
        assert_eq!(node.ledger.journal().len(), journal_len);
        assert_eq!(node.ledger.replay_guard().strikes(&a.public_key), 1);
    }
    for uuid in ["t1", "t2", "t9"] {
        assert_eq!(node.ledger.journal().find(&uuid.into()).len(), 1, "{uuid}");
    }
    assert!(node.ledger.journal().entries().iter().all(|e| !e.flagged));
    assert_eq!(node.balance(&a), (45_000, 0));

    // Restarting from a snapshot keeps the recorded statuses.
    let restored = Ledger::restore(EngineConfig::default(), node.ledger.snapshot()).unwrap();
    let engine = SettlementEngine::new(Arc::new(restored));
    assert_eq!(
        engine.settle(&items[1]).unwrap(),
        SettlementOutcome::Duplicate {
            prior_status: TxStatus::RejectedReplay
        }
    );
    assert_eq!(engine.ledger().journal().len(), journal_len);
    assert_eq!(engine.ledger().replay_guard().strikes(&a.public_key), 1);
}

#[test]
fn concurrent_resubmissions_of_a_replay_strike_once() {
    let node = Node::new();
    let (aw, a) = node.enroll("+22997000001", AccountKind::User);
    let (mw, _) = node.enroll("+22997000002", AccountKind::Merchant);
    node.upload(&mw, "b0", vec![aw.pay("t1", "n1", mw.public_key(), 100)]);
    let replay = aw.pay("t2", "n1", mw.public_key(), 100);
    let node_ref = &node;

    let reports: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let items = vec![replay.clone()];
                let mw = &mw;
                s.spawn(move || node_ref.upload(mw, &format!("b{i}"), items))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let fresh = reports.iter().filter(|r| r.items[0].status == "REPLAYED").count();
    assert_eq!(fresh, 1);
    assert!(reports.iter().all(|r| r.rejected == 1 && r.errors[0].reason == "REPLAYED"));
    assert_eq!(node.ledger.journal().find(&"t2".into()).len(), 1);
    assert_eq!(node.ledger.replay_guard().strikes(&a.public_key), 1);
}

#[test]
fn resubmitted_unattributed_item_is_journaled_once() {
    let node = Node::new();
    let (mw, m) = node.enroll("+22997000002", AccountKind::Merchant);
    let stranger = TestWallet::generate();
    let item = stranger.pay("t1", "n1", mw.public_key(), 700);

    let first = node.upload(&mw, "b1", vec![item.clone()]);
    assert_eq!(first.errors[0].reason, "UNRESOLVED_PARTY");
    assert_eq!(first.items[0].status, "UNRESOLVED_PARTY");

    let again = node.upload(&mw, "b2", vec![item]);
    assert_eq!(again.rejected, 1);
    assert_eq!(again.errors[0].reason, "UNRESOLVED_PARTY");
    assert_eq!(again.items[0].status, "DUPLICATE");

    let entries = node.ledger.journal().find(&"t1".into());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, TxStatus::RejectedUnattributed);
    assert_eq!(node.balance(&m), (50_000, 0));
    assert!(node.audit.verify_ledger().is_ok());
}

#[test]
fn lost_device_recovery() {
    let node = Node::new();
    let (aw, a) = node.enroll("+22997000001", AccountKind::User);
    let (mw, _) = node.enroll("+22997000002", AccountKind::Merchant);
    node.ledger.lock_reserve(a.id, 15_000).unwrap();
    node.ledger.lock_reserve(a.id, 5_000).unwrap();
    node.upload(
        &mw,
        "b1",
        vec![
            aw.pay("t1", "n1", mw.public_key(), 7_000),
            aw.pay("t2", "n2", mw.public_key(), 5_000),
        ],
    );

    let report = node.audit.audit(&AccountRef::Id(a.id)).unwrap();
    assert_eq!(report.locked_total, 20_000);
    assert_eq!(report.settled_total, 12_000);
    assert_eq!(report.theoretical_reserved, 8_000);
    assert!(report.is_clean());
    let (total_before, _) = node.balance(&a);
    assert_eq!(total_before, 38_000);

    let receipt = node
        .audit
        .recover(
            &RecoveryRequest {
                account: AccountRef::PublicKey(a.public_key),
                proof: RecoveryProof {
                    phone: "+22997000001".into(),
                    reference: None,
                },
            },
            &PhoneMatchAuthority,
        )
        .unwrap();
    assert_eq!(receipt.refunded_amount, 8_000);
    assert_eq!(receipt.new_total_atomic, total_before);
    assert_eq!(node.balance(&a), (38_000, 0));

    // The old key is dead for good: online, and on the offline feed.
    let late = node.upload(&mw, "b2", vec![aw.pay("t3", "n3", mw.public_key(), 100)]);
    assert_eq!(late.rejected, 1);
    assert_eq!(late.errors[0].reason, "REVOKED");
    let gate = OfflineGate::new(node.revocations.feed()).unwrap();
    assert!(!gate.admits(&aw.pay("t4", "n4", mw.public_key(), 100)));
    assert!(matches!(
        node.ledger.lock_reserve(a.id, 1).unwrap_err(),
        RemaError::AccountRevoked(_)
    ));
}

#[test]
fn any_single_byte_mutation_breaks_the_signature() {
    let a = TestWallet::generate();
    let b = TestWallet::generate();
    let payment = a.pay("t1", "n1", b.public_key(), 5_000);
    let signed = SignedMessage::from_payment(&payment).unwrap();
    assert!(signed.verify());

    for i in 0..signed.message.len() {
        let mut m = signed.clone();
        m.message[i] ^= 0x01;
        assert!(!m.verify(), "message byte {i}");
    }
    for i in 0..signed.signature.len() {
        let mut m = signed.clone();
        m.signature[i] ^= 0x01;
        assert!(!m.verify(), "signature byte {i}");
    }
    let mut other = signed.clone();
    other.public_key = b.public_key();
    assert!(!other.verify());
}

#[test]
fn invariant_holds_after_mixed_traffic() {
    let node = Node::new();
    let (aw, a) = node.enroll("+22997000001", AccountKind::User);
    let (bw, b) = node.enroll("+22997000002", AccountKind::User);
    let (mw, m) = node.enroll("+22997000003", AccountKind::Merchant);
    node.ledger.lock_reserve(a.id, 10_000).unwrap();
    node.ledger.lock_reserve(b.id, 50_000).unwrap();

    let mut forged = bw.pay("t5", "n5", mw.public_key(), 1);
    forged.amount_atomic = 1_000;
    let report = node.upload(
        &mw,
        "b1",
        vec![
            aw.pay("t1", "n1", mw.public_key(), 12_000),
            bw.pay("t2", "n2", mw.public_key(), 49_000),
            bw.pay("t3", "n3", mw.public_key(), 2_000),
            aw.pay("t4", "n1", mw.public_key(), 1),
            forged,
        ],
    );
    assert_eq!(report.processed, 2);
    assert_eq!(report.rejected, 3);

    for account in [&a, &b, &m] {
        let (total, reserved) = node.balance(account);
        assert!(reserved <= total, "{} reserved {reserved} > total {total}", account.id);
    }
    assert_eq!(node.balance(&a), (38_000, 0));
    assert_eq!(node.balance(&b), (1_000, 1_000));
    // Alice overspent her reserve by 2_000; the audit says so.
    let dirty = node.audit.sweep().unwrap();
    assert_eq!(dirty.len(), 1);
    assert_eq!(dirty[0].discrepancy, 2_000);
    assert!(node.audit.verify_ledger().is_ok());
}

#[test]
fn batches_from_different_merchants_run_concurrently() {
    let node = Node::new();
    let shops: Vec<_> = (0..4)
        .map(|i| {
            let (payer_w, payer) = node.enroll(&format!("+2299700{i:04}"), AccountKind::User);
            let (shop_w, shop) = node.enroll(&format!("+2299800{i:04}"), AccountKind::Merchant);
            node.ledger.lock_reserve(payer.id, 20_000).unwrap();
            (payer_w, payer, shop_w, shop)
        })
        .collect();
    let node_ref = &node;

    let reports: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = shops
            .iter()
            .enumerate()
            .map(|(i, (payer_w, _, shop_w, _))| {
                s.spawn(move || {
                    let items = (0..25)
                        .map(|j| {
                            payer_w.pay(&format!("s{i}-t{j}"), &format!("s{i}-n{j}"), shop_w.public_key(), 100)
                        })
                        .collect();
                    node_ref.upload(shop_w, &format!("batch-{i}"), items)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (report, (_, payer, _, shop)) in reports.iter().zip(&shops) {
        assert_eq!(report.processed, 25);
        assert_eq!(report.receiving_party_new_total, 52_500);
        assert_eq!(node.balance(payer), (47_500, 17_500));
        assert_eq!(node.balance(shop), (52_500, 0));
    }
    assert!(node.audit.sweep().unwrap().is_empty());
    assert!(node.audit.verify_ledger().is_ok());
}

#[test]
fn outcome_of_direct_settle_matches_batch_label() {
    let node = Node::new();
    let (aw, _) = node.enroll("+22997000001", AccountKind::User);
    let (mw, _) = node.enroll("+22997000002", AccountKind::Merchant);
    let outcome = node
        .batches
        .engine()
        .settle(&aw.pay("t1", "n1", mw.public_key(), 10))
        .unwrap();
    assert!(matches!(outcome, SettlementOutcome::Settled { .. }));
    assert_eq!(outcome.label(), "SETTLED");
}
