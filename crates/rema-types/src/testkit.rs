//! Signing fixtures for tests. **Never use in production.**
//!
//! A [`TestWallet`] plays the phone: it holds an ed25519 key and produces
//! correctly signed [`OfflinePayment`]s.

use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

use crate::{Nonce, OfflinePayment, PaymentTarget, PublicKey, TxUuid, constants};

/// An in-memory wallet key.
pub struct TestWallet {
    signing_key: SigningKey,
}

impl TestWallet {
    /// Fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Random 24-byte nonce as hex, like the mobile SDK.
    #[must_use]
    pub fn fresh_nonce() -> Nonce {
        Nonce::new(hex::encode(rand::random::<[u8; 24]>()))
    }

    /// A v1 payment to `receiver`, signed.
    #[must_use]
    pub fn pay(&self, uuid: &str, nonce: &str, receiver: PublicKey, amount_atomic: i64) -> OfflinePayment {
        let mut payment = OfflinePayment {
            uuid: TxUuid::from(uuid),
            nonce: Nonce::from(nonce),
            protocol_version: 1,
            sender_public_key: self.public_key().to_hex(),
            receiver_public_key: PaymentTarget::Key(receiver).as_message_field(),
            amount_atomic,
            currency_code: constants::DEFAULT_CURRENCY_CODE,
            signature: String::new(),
            timestamp: 1_700_000_000_000,
            metadata: None,
        };
        self.sign(&mut payment);
        payment
    }

    /// (Re)sign `payment` in place over its canonical message.
    pub fn sign(&self, payment: &mut OfflinePayment) {
        let message = payment
            .canonical_message()
            .expect("test payment must have a valid canonical message");
        payment.signature = hex::encode(self.signing_key.sign(&message).to_bytes());
    }
}
