//! Revocation feed for offline screening.
//!
//! Recovered wallets are revoked forever, but devices that stay offline only
//! learn that through the feed they last downloaded. The feed carries a
//! digest so a device can tell a truncated or tampered copy from a stale one.

use std::sync::Arc;

use chrono::Utc;
use rema_ledger::Ledger;
use rema_types::{OfflinePayment, PublicKey, RemaError, Result, RevocationFeed};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

const FEED_DOMAIN: &[u8] = b"REMA_REVOCATIONS_V1";

/// SHA-256 over the domain tag and every key, in the order given.
#[must_use]
pub fn feed_digest(keys: &[PublicKey]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(FEED_DOMAIN);
    hasher.update((keys.len() as u64).to_le_bytes());
    for key in keys {
        hasher.update(key.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Publishes the revoked-key set held by the identity registry.
#[derive(Clone)]
pub struct RevocationDistributor {
    ledger: Arc<Ledger>,
}

impl RevocationDistributor {
    #[must_use]
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Current feed, keys sorted ascending.
    #[must_use]
    pub fn feed(&self) -> RevocationFeed {
        let revoked_keys = self.ledger.registry().revoked_keys();
        let digest = feed_digest(&revoked_keys);
        debug!(keys = revoked_keys.len(), digest = %digest, "Revocation feed generated");
        RevocationFeed {
            generated_at: Utc::now(),
            revoked_keys,
            digest,
        }
    }

    #[must_use]
    pub fn is_revoked(&self, key: &PublicKey) -> bool {
        self.ledger.registry().is_revoked(key)
    }
}

/// Payments split by an [`OfflineGate`].
#[derive(Debug, Default)]
pub struct Screened {
    pub admitted: Vec<OfflinePayment>,
    pub refused: Vec<OfflinePayment>,
}

/// Device-side screen: refuses payments from keys on the last feed it saw.
#[derive(Debug, Clone)]
pub struct OfflineGate {
    feed: RevocationFeed,
}

impl OfflineGate {
    /// # Errors
    /// `InvalidRequest` if the feed is unsorted or its digest does not match.
    pub fn new(feed: RevocationFeed) -> Result<Self> {
        check_feed(&feed)?;
        Ok(Self { feed })
    }

    #[must_use]
    pub fn feed(&self) -> &RevocationFeed {
        &self.feed
    }

    /// Install `feed` if it is valid and not older than the current one.
    /// Returns whether it was installed.
    pub fn refresh(&mut self, feed: RevocationFeed) -> bool {
        if check_feed(&feed).is_err() || feed.generated_at < self.feed.generated_at {
            return false;
        }
        self.feed = feed;
        true
    }

    #[must_use]
    pub fn admits(&self, payment: &OfflinePayment) -> bool {
        payment
            .sender_key()
            .is_ok_and(|key| !self.feed.contains(&key))
    }

    /// Partition `payments` into admitted and refused. Malformed sender keys
    /// are refused.
    #[must_use]
    pub fn screen(&self, payments: Vec<OfflinePayment>) -> Screened {
        let (admitted, refused): (Vec<_>, Vec<_>) =
            payments.into_iter().partition(|p| self.admits(p));
        if !refused.is_empty() {
            info!(refused = refused.len(), "Offline payments refused by revocation screen");
        }
        Screened { admitted, refused }
    }
}

fn check_feed(feed: &RevocationFeed) -> Result<()> {
    if !feed.revoked_keys.is_sorted() {
        return Err(RemaError::InvalidRequest {
            reason: "revocation feed keys are not sorted".into(),
        });
    }
    if feed_digest(&feed.revoked_keys) != feed.digest {
        return Err(RemaError::InvalidRequest {
            reason: "revocation feed digest mismatch".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rema_types::testkit::TestWallet;
    use rema_types::{AccountKind, AccountRef, EngineConfig, RecoveryProof, RecoveryRequest};

    use super::*;
    use crate::audit::{AuditEngine, PhoneMatchAuthority};

    fn setup() -> (Arc<Ledger>, TestWallet, TestWallet) {
        let ledger = Arc::new(Ledger::new(EngineConfig::default()).unwrap());
        let alice = TestWallet::generate();
        let bob = TestWallet::generate();
        ledger
            .enroll("+22997000001", alice.public_key(), None, AccountKind::User)
            .unwrap();
        ledger
            .enroll("+22997000002", bob.public_key(), None, AccountKind::User)
            .unwrap();
        (ledger, alice, bob)
    }

    fn recover(ledger: &Arc<Ledger>, phone: &str) {
        AuditEngine::new(Arc::clone(ledger))
            .recover(
                &RecoveryRequest {
                    account: AccountRef::Phone(phone.into()),
                    proof: RecoveryProof {
                        phone: phone.into(),
                        reference: None,
                    },
                },
                &PhoneMatchAuthority,
            )
            .unwrap();
    }

    #[test]
    fn feed_lists_recovered_keys() {
        let (ledger, alice, bob) = setup();
        let distributor = RevocationDistributor::new(Arc::clone(&ledger));
        assert!(distributor.feed().revoked_keys.is_empty());

        recover(&ledger, "+22997000001");
        let feed = distributor.feed();
        assert_eq!(feed.revoked_keys, vec![alice.public_key()]);
        assert_eq!(feed.digest, feed_digest(&feed.revoked_keys));
        assert!(distributor.is_revoked(&alice.public_key()));
        assert!(!distributor.is_revoked(&bob.public_key()));
    }

    #[test]
    fn digest_depends_on_the_key_set() {
        let a = PublicKey([1; 32]);
        let b = PublicKey([2; 32]);
        assert_ne!(feed_digest(&[]), feed_digest(&[a]));
        assert_ne!(feed_digest(&[a]), feed_digest(&[a, b]));
        assert_eq!(feed_digest(&[a, b]).len(), 64);
    }

    #[test]
    fn gate_refuses_revoked_senders() {
        let (ledger, alice, bob) = setup();
        recover(&ledger, "+22997000001");
        let gate = OfflineGate::new(RevocationDistributor::new(ledger).feed()).unwrap();

        let mut malformed = bob.pay("t3", "n3", alice.public_key(), 1);
        malformed.sender_public_key = "zz".into();
        let screened = gate.screen(vec![
            alice.pay("t1", "n1", bob.public_key(), 100),
            bob.pay("t2", "n2", alice.public_key(), 100),
            malformed,
        ]);
        assert_eq!(screened.admitted.len(), 1);
        assert_eq!(screened.admitted[0].uuid.as_str(), "t2");
        assert_eq!(screened.refused.len(), 2);
    }

    #[test]
    fn tampered_feed_is_rejected() {
        let (ledger, _, bob) = setup();
        recover(&ledger, "+22997000001");
        let mut feed = RevocationDistributor::new(ledger).feed();
        feed.revoked_keys.clear();
        assert!(OfflineGate::new(feed.clone()).is_err());

        feed.revoked_keys = vec![bob.public_key()];
        assert!(matches!(
            OfflineGate::new(feed).unwrap_err(),
            RemaError::InvalidRequest { .. }
        ));
    }

    #[test]
    fn refresh_only_moves_forward() {
        let (ledger, alice, _) = setup();
        let distributor = RevocationDistributor::new(Arc::clone(&ledger));
        let first = distributor.feed();
        let mut gate = OfflineGate::new(first.clone()).unwrap();

        recover(&ledger, "+22997000001");
        let second = distributor.feed();
        assert!(gate.refresh(second));
        assert!(gate.feed().contains(&alice.public_key()));

        let mut stale = first;
        stale.generated_at -= Duration::hours(1);
        assert!(!gate.refresh(stale));
        assert!(gate.feed().contains(&alice.public_key()));
    }
}
