//! Ed25519 verification of offline payments.
//!
//! Decoding and verification are split: [`SignedMessage::from_payment`]
//! rejects malformed hex, wrong lengths and unknown protocol versions as
//! validation errors before any curve arithmetic, and
//! [`SignedMessage::verify`] is a plain pass/fail.
//!
//! Verification is strict (`verify_strict`): small-order keys and
//! non-canonical signature encodings fail.

use ed25519_dalek::{Signature, VerifyingKey};
use rema_types::constants::SIGNATURE_LEN;
use rema_types::{OfflinePayment, PublicKey, Result};

/// A payment's decoded key, canonical message and signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub public_key: PublicKey,
    pub message: Vec<u8>,
    pub signature: [u8; SIGNATURE_LEN],
}

impl SignedMessage {
    /// Decode everything verification needs from a wire item.
    ///
    /// # Errors
    /// - `InvalidEncoding` for malformed key or signature hex
    /// - `UnsupportedProtocolVersion` for unknown message layouts
    pub fn from_payment(payment: &OfflinePayment) -> Result<Self> {
        Ok(Self {
            public_key: payment.sender_key()?,
            message: payment.canonical_message()?,
            signature: payment.signature_bytes()?,
        })
    }

    /// Whether the signature verifies under the sender key.
    #[must_use]
    pub fn verify(&self) -> bool {
        verify_raw(self.public_key.as_bytes(), &self.message, &self.signature)
    }
}

/// Verify raw wire bytes. Keys that are not valid curve points fail like
/// any other bad signature.
#[must_use]
pub fn verify_raw(public_key: &[u8; 32], message: &[u8], signature: &[u8; SIGNATURE_LEN]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let signature = Signature::from_bytes(signature);
    key.verify_strict(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use rema_types::testkit::TestWallet;
    use rema_types::RemaError;

    use super::*;

    fn signed() -> (TestWallet, OfflinePayment) {
        let wallet = TestWallet::generate();
        let payment = wallet.pay("t1", "n1", PublicKey([7; 32]), 5_000);
        (wallet, payment)
    }

    #[test]
    fn valid_signature_verifies() {
        let (_, payment) = signed();
        assert!(SignedMessage::from_payment(&payment).unwrap().verify());
    }

    #[test]
    fn any_message_byte_flip_fails() {
        let (_, payment) = signed();
        let original = SignedMessage::from_payment(&payment).unwrap();
        for i in 0..original.message.len() {
            let mut tampered = original.clone();
            tampered.message[i] ^= 0x01;
            assert!(!tampered.verify(), "flip at message byte {i} still verified");
        }
    }

    #[test]
    fn any_signature_byte_flip_fails() {
        let (_, payment) = signed();
        let original = SignedMessage::from_payment(&payment).unwrap();
        for i in 0..SIGNATURE_LEN {
            let mut tampered = original.clone();
            tampered.signature[i] ^= 0x80;
            assert!(!tampered.verify(), "flip at signature byte {i} still verified");
        }
    }

    #[test]
    fn different_signer_fails() {
        let (_, mut payment) = signed();
        let impostor = TestWallet::generate();
        payment.sender_public_key = impostor.public_key().to_hex();
        assert!(!SignedMessage::from_payment(&payment).unwrap().verify());
    }

    #[test]
    fn amount_change_fails() {
        let (_, mut payment) = signed();
        payment.amount_atomic = 50_000;
        assert!(!SignedMessage::from_payment(&payment).unwrap().verify());
    }

    #[test]
    fn v2_layout_verifies_and_binds_currency() {
        let (wallet, mut payment) = signed();
        payment.protocol_version = 2;
        wallet.sign(&mut payment);
        assert!(SignedMessage::from_payment(&payment).unwrap().verify());

        payment.currency_code = 840;
        assert!(!SignedMessage::from_payment(&payment).unwrap().verify());
    }

    #[test]
    fn uppercase_hex_is_accepted() {
        let (_, mut payment) = signed();
        payment.sender_public_key = payment.sender_public_key.to_uppercase();
        payment.signature = payment.signature.to_uppercase();
        assert!(SignedMessage::from_payment(&payment).unwrap().verify());
    }

    #[test]
    fn malformed_encodings_fail_before_verification() {
        let (_, mut payment) = signed();
        payment.signature = "zz".repeat(64);
        assert!(matches!(
            SignedMessage::from_payment(&payment).unwrap_err(),
            RemaError::InvalidEncoding { .. }
        ));

        let (_, mut payment) = signed();
        payment.sender_public_key = "ab".repeat(31);
        assert!(matches!(
            SignedMessage::from_payment(&payment).unwrap_err(),
            RemaError::InvalidEncoding { .. }
        ));
    }

    #[test]
    fn non_curve_key_is_plain_failure() {
        assert!(!verify_raw(&[0xff; 32], b"msg", &[0u8; SIGNATURE_LEN]));
    }
}
