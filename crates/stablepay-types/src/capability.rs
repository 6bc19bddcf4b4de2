//! Capabilities the settlement core consumes from the host chain.
//!
//! Each trait is the narrowest interface the engines need. The host wires
//! in its bank, compliance and account modules; tests wire in-memory
//! doubles.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::{Address, ChannelId, Coin, Result, channel::claim_digest};

/// Balance transfer, mint and burn.
///
/// Every method either moves the full amount or returns an error with no
/// balance changed. None of them panic.
pub trait BankKeeper {
    fn balance(&self, addr: &Address, denom: &str) -> Coin;

    fn send_coins(&mut self, from: &Address, to: &Address, amount: &Coin) -> Result<()>;

    fn send_coins_from_account_to_module(
        &mut self,
        from: &Address,
        module: &str,
        amount: &Coin,
    ) -> Result<()>;

    fn send_coins_from_module_to_account(
        &mut self,
        module: &str,
        to: &Address,
        amount: &Coin,
    ) -> Result<()>;

    fn send_coins_from_module_to_module(
        &mut self,
        from_module: &str,
        to_module: &str,
        amount: &Coin,
    ) -> Result<()>;

    fn mint_coins(&mut self, module: &str, amount: &Coin) -> Result<()>;

    fn burn_coins(&mut self, module: &str, amount: &Coin) -> Result<()>;
}

/// Sanctions / allow-list gate.
pub trait ComplianceKeeper {
    /// # Errors
    /// Returns `ComplianceCheckFailed` for blocked addresses.
    fn assert_compliant(&self, addr: &Address) -> Result<()>;
}

/// Registered public keys.
pub trait AccountKeeper {
    /// Raw public key bytes registered for `addr`, if any.
    fn pub_key(&self, addr: &Address) -> Option<Vec<u8>>;
}

/// Channel claim signature check.
///
/// The channel engine knows nothing about the signature scheme; it hands
/// the claim tuple, the signature and the sender's key to this capability.
pub trait ClaimVerifier {
    fn verify_claim(
        &self,
        channel_id: ChannelId,
        recipient: &Address,
        amount: u128,
        nonce: u64,
        signature: &[u8],
        sender_pub_key: &[u8],
    ) -> bool;
}

/// Ed25519 over the SHA-256 claim digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519ClaimVerifier;

impl ClaimVerifier for Ed25519ClaimVerifier {
    fn verify_claim(
        &self,
        channel_id: ChannelId,
        recipient: &Address,
        amount: u128,
        nonce: u64,
        signature: &[u8],
        sender_pub_key: &[u8],
    ) -> bool {
        let Ok(key_bytes) = <[u8; 32]>::try_from(sender_pub_key) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        let digest = claim_digest(channel_id, recipient, amount, nonce);
        key.verify(&digest, &sig).is_ok()
    }
}

/// Produce the voucher signature a channel sender hands to the recipient.
#[must_use]
pub fn sign_claim(
    key: &SigningKey,
    channel_id: ChannelId,
    recipient: &Address,
    amount: u128,
    nonce: u64,
) -> Vec<u8> {
    let digest = claim_digest(channel_id, recipient, amount, nonce);
    key.sign(&digest).to_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn signed_claim_verifies() {
        let key = SigningKey::generate(&mut OsRng);
        let bob = Address::parse("stable1bob").unwrap();
        let sig = sign_claim(&key, ChannelId(1), &bob, 300_000, 1);
        let pk = key.verifying_key().to_bytes();
        assert!(Ed25519ClaimVerifier.verify_claim(ChannelId(1), &bob, 300_000, 1, &sig, &pk));
    }

    #[test]
    fn tampered_claim_fails() {
        let key = SigningKey::generate(&mut OsRng);
        let bob = Address::parse("stable1bob").unwrap();
        let sig = sign_claim(&key, ChannelId(1), &bob, 300_000, 1);
        let pk = key.verifying_key().to_bytes();
        let v = Ed25519ClaimVerifier;
        assert!(!v.verify_claim(ChannelId(1), &bob, 300_001, 1, &sig, &pk));
        assert!(!v.verify_claim(ChannelId(1), &bob, 300_000, 2, &sig, &pk));
        assert!(!v.verify_claim(ChannelId(2), &bob, 300_000, 1, &sig, &pk));
    }

    #[test]
    fn wrong_key_or_garbage_fails() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let bob = Address::parse("stable1bob").unwrap();
        let sig = sign_claim(&key, ChannelId(1), &bob, 10, 1);
        let v = Ed25519ClaimVerifier;
        let other_pk = other.verifying_key().to_bytes();
        assert!(!v.verify_claim(ChannelId(1), &bob, 10, 1, &sig, &other_pk));
        assert!(!v.verify_claim(ChannelId(1), &bob, 10, 1, &sig, &[1, 2, 3]));
        let pk = key.verifying_key().to_bytes();
        assert!(!v.verify_claim(ChannelId(1), &bob, 10, 1, &[0u8; 10], &pk));
    }
}
