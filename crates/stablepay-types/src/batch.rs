//! Batch settlement aggregate.
//!
//! A batch groups many sender → single-merchant settlements. It is created
//! PENDING with no funds moved, and settled all-or-nothing.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Address, BatchId, Coin, SettlementId};

/// Lifecycle status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    #[serde(rename = "BATCH_STATUS_PENDING")]
    Pending,
    #[serde(rename = "BATCH_STATUS_COMPLETED")]
    Completed,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "BATCH_STATUS_PENDING"),
            Self::Completed => write!(f, "BATCH_STATUS_COMPLETED"),
        }
    }
}

/// Aggregation of N settlements paying one merchant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettlement {
    pub id: BatchId,
    pub merchant: Address,
    /// Member settlements in creation order.
    pub settlement_ids: Vec<SettlementId>,
    /// Σ member amounts.
    pub total_amount: Coin,
    /// Σ member fees.
    pub total_fees: Coin,
    /// `total_amount - total_fees`.
    pub net_amount: Coin,
    pub count: u32,
    pub status: BatchStatus,
    pub created_height: u64,
    pub created_at: DateTime<Utc>,
    pub settled_height: Option<u64>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl BatchSettlement {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == BatchStatus::Pending
    }

    /// `count == settlement_ids.len()`.
    #[must_use]
    pub fn count_matches(&self) -> bool {
        usize::try_from(self.count).is_ok_and(|c| c == self.settlement_ids.len())
    }
}
