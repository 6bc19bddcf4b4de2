//! # PaymentChannel: deposit-backed off-chain payments
//!
//! ## State Machine
//!
//! ```text
//!        claim (nonce ↑, balance ↓)
//!          ┌──────┐
//!          ▼      │
//!   ┌──────────┐  │      close after expiry / sweep   ┌────────┐
//!   │   OPEN   ├──┴──────────────────────────────────▶│ CLOSED │
//!   └──────────┘                                      └────────┘
//! ```
//!
//! ## Security Properties
//!
//! - **Nonce-bound**: every accepted claim carries a nonce strictly greater
//!   than the last one, so a voucher can never be replayed
//! - **Signature-bound**: vouchers are signed by the sender's registered key
//! - **Conservation**: `balance == deposit - spent` after every mutation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Address, ChannelId, Coin, Result, StablepayError, constants};

/// A unidirectional payment channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentChannel {
    pub id: ChannelId,
    pub sender: Address,
    pub recipient: Address,
    /// Original funding.
    pub deposit: Coin,
    /// Cumulative amount claimed by the recipient.
    pub spent: Coin,
    /// Always `deposit - spent`.
    pub balance: Coin,
    pub is_open: bool,
    pub opened_height: u64,
    pub opened_at: DateTime<Utc>,
    pub closed_height: Option<u64>,
    pub closed_at: Option<DateTime<Utc>>,
    pub expires_at_height: u64,
    /// Highest accepted claim nonce. Starts at 0.
    pub nonce: u64,
}

impl PaymentChannel {
    /// Apply a claim of `amount` at `nonce`.
    ///
    /// # Errors
    /// - `ChannelClosed` if the channel is closed
    /// - `InvalidNonce` if `nonce <= self.nonce`
    /// - `ClaimExceedsBalance` if `amount > balance`
    pub fn apply_claim(&mut self, amount: &Coin, nonce: u64) -> Result<()> {
        self.ensure_open()?;
        if nonce <= self.nonce {
            return Err(StablepayError::InvalidNonce {
                got: nonce,
                current: self.nonce,
            });
        }
        if amount.amount > self.balance.amount {
            return Err(StablepayError::ClaimExceedsBalance {
                amount: amount.amount,
                balance: self.balance.amount,
            });
        }
        self.spent = self.spent.checked_add(amount)?;
        self.balance = self.balance.checked_sub(amount)?;
        self.nonce = nonce;
        Ok(())
    }

    /// Close the channel, returning the balance that goes back to the sender.
    ///
    /// # Errors
    /// Returns `ChannelClosed` if already closed.
    pub fn close(&mut self, height: u64, time: DateTime<Utc>) -> Result<Coin> {
        self.ensure_open()?;
        self.is_open = false;
        self.closed_height = Some(height);
        self.closed_at = Some(time);
        Ok(self.balance.clone())
    }

    /// A channel is expired once the chain has moved past its expiry height.
    #[must_use]
    pub fn is_expired_at(&self, height: u64) -> bool {
        height > self.expires_at_height
    }

    /// # Errors
    /// Returns `ChannelClosed` if the channel is closed.
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_open {
            Ok(())
        } else {
            Err(StablepayError::ChannelClosed(self.id))
        }
    }

    /// `balance == deposit - spent`.
    #[must_use]
    pub fn is_conserved(&self) -> bool {
        self.deposit
            .checked_sub(&self.spent)
            .is_ok_and(|expected| expected == self.balance)
    }
}

/// Canonical signing payload for a channel claim.
///
/// Format: `"stablepay:channel_claim:v1:" || channel_id_be || recipient || amount_be || nonce_be`
#[must_use]
pub fn claim_signing_payload(
    channel_id: ChannelId,
    recipient: &Address,
    amount: u128,
    nonce: u64,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(128);
    payload.extend_from_slice(constants::CHANNEL_CLAIM_DOMAIN);
    payload.extend_from_slice(&channel_id.to_key());
    payload.extend_from_slice(recipient.as_bytes());
    payload.extend_from_slice(&amount.to_be_bytes());
    payload.extend_from_slice(&nonce.to_be_bytes());
    payload
}

/// SHA-256 digest of [`claim_signing_payload`]; this is what the sender signs.
#[must_use]
pub fn claim_digest(channel_id: ChannelId, recipient: &Address, amount: u128, nonce: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(claim_signing_payload(channel_id, recipient, amount, nonce));
    hasher.finalize().into()
}
