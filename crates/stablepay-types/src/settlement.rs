//! # Settlement: the payment record
//!
//! Every value movement through the module produces exactly one
//! [`Settlement`]. Records are never deleted.
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐  release / batch settle  ┌───────────┐
//!   │ PENDING ├─────────────────────────▶│ COMPLETED │
//!   └──┬───┬──┘                          └───────────┘
//!      │   │ refund by recipient         ┌──────────┐
//!      │   └────────────────────────────▶│ REFUNDED │
//!      │ expiry sweep                    └──────────┘
//!      ▼
//!   ┌───────────┐
//!   │ CANCELLED │
//!   └───────────┘
//! ```
//!
//! Instant transfers are created directly in COMPLETED. COMPLETED,
//! REFUNDED and CANCELLED are terminal for the escrow state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Address, BatchId, Coin, Result, SettlementId, StablepayError};

/// What kind of payment produced a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementType {
    #[serde(rename = "SETTLEMENT_TYPE_INSTANT")]
    Instant,
    #[serde(rename = "SETTLEMENT_TYPE_ESCROW")]
    Escrow,
    #[serde(rename = "SETTLEMENT_TYPE_BATCH")]
    Batch,
    #[serde(rename = "SETTLEMENT_TYPE_RECURRING")]
    Recurring,
}

impl SettlementType {
    /// Wire string preserved from existing chain state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Instant => "SETTLEMENT_TYPE_INSTANT",
            Self::Escrow => "SETTLEMENT_TYPE_ESCROW",
            Self::Batch => "SETTLEMENT_TYPE_BATCH",
            Self::Recurring => "SETTLEMENT_TYPE_RECURRING",
        }
    }
}

impl fmt::Display for SettlementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementStatus {
    #[serde(rename = "SETTLEMENT_STATUS_PENDING")]
    Pending,
    #[serde(rename = "SETTLEMENT_STATUS_PROCESSING")]
    Processing,
    #[serde(rename = "SETTLEMENT_STATUS_COMPLETED")]
    Completed,
    #[serde(rename = "SETTLEMENT_STATUS_FAILED")]
    Failed,
    #[serde(rename = "SETTLEMENT_STATUS_REFUNDED")]
    Refunded,
    #[serde(rename = "SETTLEMENT_STATUS_CANCELLED")]
    Cancelled,
}

impl SettlementStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "SETTLEMENT_STATUS_PENDING",
            Self::Processing => "SETTLEMENT_STATUS_PROCESSING",
            Self::Completed => "SETTLEMENT_STATUS_COMPLETED",
            Self::Failed => "SETTLEMENT_STATUS_FAILED",
            Self::Refunded => "SETTLEMENT_STATUS_REFUNDED",
            Self::Cancelled => "SETTLEMENT_STATUS_CANCELLED",
        }
    }

    /// Completed, refunded and cancelled settlements never change status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Refunded | Self::Cancelled)
    }

    /// Can a settlement in this status move to `target`?
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (
                Self::Pending,
                Self::Processing
                    | Self::Completed
                    | Self::Failed
                    | Self::Refunded
                    | Self::Cancelled
            ) | (Self::Processing, Self::Completed | Self::Failed)
                | (Self::Failed, Self::Pending)
        )
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: SettlementId,
    pub settlement_type: SettlementType,
    pub sender: Address,
    pub recipient: Address,
    /// Gross amount debited from the sender.
    pub amount: Coin,
    pub fee: Coin,
    /// Always `amount - fee`.
    pub net_amount: Coin,
    pub status: SettlementStatus,
    /// Free-text external id supplied by the caller.
    pub reference: String,
    /// Free-text metadata; lifecycle notes are appended as `key=value`.
    pub metadata: String,
    pub created_height: u64,
    pub created_at: DateTime<Utc>,
    pub settled_height: Option<u64>,
    pub settled_at: Option<DateTime<Utc>>,
    /// Escrow only.
    pub expires_at: Option<DateTime<Utc>>,
    pub batch_id: Option<BatchId>,
    /// Cumulative amount returned to the sender via partial refunds.
    pub refunded_amount: Coin,
}

impl Settlement {
    /// Move to `target`, stamping the settle height/time on terminal states.
    ///
    /// # Errors
    /// Returns `InvalidSettlementStatus` if the transition is not allowed.
    pub fn transition(&mut self, target: SettlementStatus, height: u64, time: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(StablepayError::InvalidSettlementStatus {
                id: self.id,
                expected: SettlementStatus::Pending,
                actual: self.status,
            });
        }
        self.status = target;
        if target.is_terminal() {
            self.settled_height = Some(height);
            self.settled_at = Some(time);
        }
        Ok(())
    }

    /// Require the settlement to be PENDING.
    ///
    /// # Errors
    /// Returns `InvalidSettlementStatus` otherwise.
    pub fn ensure_pending(&self) -> Result<()> {
        if self.status == SettlementStatus::Pending {
            Ok(())
        } else {
            Err(StablepayError::InvalidSettlementStatus {
                id: self.id,
                expected: SettlementStatus::Pending,
                actual: self.status,
            })
        }
    }

    /// Append a `key=value` note to the metadata.
    pub fn annotate(&mut self, key: &str, value: &str) {
        if !self.metadata.is_empty() {
            self.metadata.push(';');
        }
        self.metadata.push_str(key);
        self.metadata.push('=');
        self.metadata.push_str(value);
    }

    /// `amount == fee + net_amount`.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.fee
            .checked_add(&self.net_amount)
            .is_ok_and(|sum| sum == self.amount)
    }
}

/// One entry of the refund trail written by a partial refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecord {
    pub settlement_id: SettlementId,
    /// Position in this settlement's trail, starting at 0.
    pub index: u32,
    pub amount: Coin,
    pub reason: String,
    pub authority: Address,
    pub height: u64,
    pub time: DateTime<Utc>,
}

/// Dummy settlement for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Settlement {
    /// Pending escrow of `amount` ssusd at the default 50 bps.
    pub fn dummy_escrow(id: u64, amount: u128) -> Self {
        let gross = Coin::new(crate::constants::DEFAULT_STABLECOIN_DENOM, amount);
        let fee = gross.fee_at_bps(crate::constants::DEFAULT_FEE_RATE_BPS);
        let net = Coin::new(gross.denom.clone(), amount - fee.amount);
        let now = Utc::now();
        Self {
            id: SettlementId(id),
            settlement_type: SettlementType::Escrow,
            sender: Address::parse("stable1sender").expect("valid address"),
            recipient: Address::parse("stable1recipient").expect("valid address"),
            refunded_amount: Coin::zero(gross.denom.clone()),
            amount: gross,
            fee,
            net_amount: net,
            status: SettlementStatus::Pending,
            reference: String::new(),
            metadata: String::new(),
            created_height: 1,
            created_at: now,
            settled_height: None,
            settled_at: None,
            expires_at: Some(now + chrono::Duration::days(1)),
            batch_id: None,
        }
    }
}
