//! Identity registry: public key, phone and device bindings.
//!
//! Every index is a sharded map so lookups from concurrent settlements never
//! contend on a global lock. Revocation is permanent: a revoked key stays in
//! the revoked set forever and can never be enrolled again.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rema_types::{Account, AccountId, AccountRef, PublicKey, RemaError, Result};

/// Maps wallet keys, phones and device fingerprints to account ids.
pub struct IdentityRegistry {
    by_key: DashMap<PublicKey, AccountId>,
    by_phone: DashMap<String, AccountId>,
    by_device: DashMap<String, AccountId>,
    /// Revoked keys and when they were revoked.
    revoked: DashMap<PublicKey, DateTime<Utc>>,
}

impl IdentityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_key: DashMap::new(),
            by_phone: DashMap::new(),
            by_device: DashMap::new(),
            revoked: DashMap::new(),
        }
    }

    /// Bind a freshly created account's phone, key and device.
    ///
    /// Phone and key are claimed together: if either is taken nothing is
    /// written.
    ///
    /// # Errors
    /// Returns [`RemaError::AlreadyEnrolled`] if the phone or key is bound,
    /// or if the key was ever revoked.
    pub fn register(&self, account: &Account) -> Result<()> {
        if self.revoked.contains_key(&account.public_key) {
            return Err(RemaError::AlreadyEnrolled(format!(
                "{} (revoked)",
                account.public_key
            )));
        }

        let phone_slot = match self.by_phone.entry(account.phone.clone()) {
            Entry::Occupied(_) => {
                return Err(RemaError::AlreadyEnrolled(format!("phone {}", account.phone)));
            }
            Entry::Vacant(v) => v,
        };
        let key_slot = match self.by_key.entry(account.public_key) {
            Entry::Occupied(_) => {
                return Err(RemaError::AlreadyEnrolled(account.public_key.to_string()));
            }
            Entry::Vacant(v) => v,
        };

        key_slot.insert(account.id);
        phone_slot.insert(account.id);
        if let Some(device) = &account.device_fingerprint {
            // A re-provisioned device moves to the newest account.
            self.by_device.insert(device.clone(), account.id);
        }
        Ok(())
    }

    /// Restore bindings from a snapshot, revocations included.
    pub(crate) fn restore(&self, account: &Account, revoked_at: DateTime<Utc>) {
        self.by_key.insert(account.public_key, account.id);
        self.by_phone.insert(account.phone.clone(), account.id);
        if let Some(device) = &account.device_fingerprint {
            self.by_device.insert(device.clone(), account.id);
        }
        if account.revoked {
            self.revoked.insert(account.public_key, revoked_at);
        }
    }

    /// # Errors
    /// Returns [`RemaError::AccountNotFound`] for unknown keys.
    pub fn resolve_key(&self, key: &PublicKey) -> Result<AccountId> {
        self.by_key
            .get(key)
            .map(|r| *r.value())
            .ok_or_else(|| RemaError::AccountNotFound(key.to_string()))
    }

    /// # Errors
    /// Returns [`RemaError::AccountNotFound`] for unknown phones.
    pub fn resolve_phone(&self, phone: &str) -> Result<AccountId> {
        self.by_phone
            .get(phone.trim())
            .map(|r| *r.value())
            .ok_or_else(|| RemaError::AccountNotFound(format!("phone {phone}")))
    }

    #[must_use]
    pub fn resolve_device(&self, fingerprint: &str) -> Option<AccountId> {
        self.by_device.get(fingerprint).map(|r| *r.value())
    }

    /// Resolve any caller-supplied reference. `Id` passes through unchecked;
    /// the ledger verifies it exists when it loads the account.
    ///
    /// # Errors
    /// Returns [`RemaError::AccountNotFound`] for unknown phones or keys.
    pub fn resolve(&self, reference: &AccountRef) -> Result<AccountId> {
        match reference {
            AccountRef::Id(id) => Ok(*id),
            AccountRef::Phone(phone) => self.resolve_phone(phone),
            AccountRef::PublicKey(key) => self.resolve_key(key),
        }
    }

    /// Permanently revoke `key`. Idempotent; the first revocation time wins.
    pub fn revoke(&self, key: PublicKey) {
        self.revoked.entry(key).or_insert_with(Utc::now);
    }

    #[must_use]
    pub fn is_revoked(&self, key: &PublicKey) -> bool {
        self.revoked.contains_key(key)
    }

    /// When `key` was revoked, if it was.
    #[must_use]
    pub fn revoked_at(&self, key: &PublicKey) -> Option<DateTime<Utc>> {
        self.revoked.get(key).map(|r| *r.value())
    }

    /// Every revoked key, sorted ascending.
    #[must_use]
    pub fn revoked_keys(&self) -> Vec<PublicKey> {
        let mut keys: Vec<PublicKey> = self.revoked.iter().map(|r| *r.key()).collect();
        keys.sort_unstable();
        keys
    }

    /// Number of enrolled accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use rema_types::AccountKind;

    use super::*;

    fn account(phone: &str, key: u8) -> Account {
        Account::new(phone, PublicKey([key; 32]), Some(format!("dev-{key}")), AccountKind::User)
    }

    #[test]
    fn register_and_resolve_all_indices() {
        let reg = IdentityRegistry::new();
        let a = account("+22997000001", 1);
        reg.register(&a).unwrap();

        assert_eq!(reg.resolve_key(&PublicKey([1; 32])).unwrap(), a.id);
        assert_eq!(reg.resolve_phone("+22997000001").unwrap(), a.id);
        assert_eq!(reg.resolve_device("dev-1"), Some(a.id));
        assert_eq!(reg.resolve(&AccountRef::Id(a.id)).unwrap(), a.id);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn duplicate_phone_rejected_without_binding_key() {
        let reg = IdentityRegistry::new();
        reg.register(&account("+22997000001", 1)).unwrap();

        let err = reg.register(&account("+22997000001", 2)).unwrap_err();
        assert!(matches!(err, RemaError::AlreadyEnrolled(_)));
        assert!(reg.resolve_key(&PublicKey([2; 32])).is_err());
    }

    #[test]
    fn duplicate_key_rejected_without_binding_phone() {
        let reg = IdentityRegistry::new();
        reg.register(&account("+22997000001", 1)).unwrap();

        assert!(reg.register(&account("+22997000002", 1)).is_err());
        assert!(reg.resolve_phone("+22997000002").is_err());
    }

    #[test]
    fn revoked_key_can_never_enroll() {
        let reg = IdentityRegistry::new();
        reg.revoke(PublicKey([7; 32]));
        let err = reg.register(&account("+22997000009", 7)).unwrap_err();
        assert!(err.to_string().contains("revoked"));
    }

    #[test]
    fn revocation_is_idempotent_and_sorted() {
        let reg = IdentityRegistry::new();
        reg.revoke(PublicKey([9; 32]));
        let first = reg.revoked_at(&PublicKey([9; 32])).unwrap();
        reg.revoke(PublicKey([9; 32]));
        reg.revoke(PublicKey([3; 32]));

        assert_eq!(reg.revoked_at(&PublicKey([9; 32])), Some(first));
        assert_eq!(reg.revoked_keys(), vec![PublicKey([3; 32]), PublicKey([9; 32])]);
        assert!(reg.is_revoked(&PublicKey([3; 32])));
    }

    #[test]
    fn unknown_lookups_are_not_found() {
        let reg = IdentityRegistry::new();
        let err = reg.resolve(&AccountRef::PublicKey(PublicKey([4; 32]))).unwrap_err();
        assert_eq!(err.reason_code(), "UNRESOLVED_PARTY");
        assert!(reg.resolve_device("nope").is_none());
    }
}
