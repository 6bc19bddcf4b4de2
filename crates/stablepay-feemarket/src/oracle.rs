//! Congestion level, gas price suggestion and fee estimation.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stablepay_types::{Context, Result};

use crate::keeper::FeeMarketKeeper;
use crate::params::FeeMarketParams;

/// Latest-gas / target ratio below which the network is lightly used.
const LOW_CONGESTION_RATIO: Decimal = Decimal::from_parts(7, 0, 0, false, 1); // 0.7
/// Ratio at or above which the network is congested.
const HIGH_CONGESTION_RATIO: Decimal = Decimal::from_parts(12, 0, 0, false, 1); // 1.2
/// Cap on both the congestion and the priority multiplier.
const MAX_PREMIUM: Decimal = Decimal::from_parts(5, 0, 0, false, 1); // 0.5

/// Requested inclusion priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    /// Anything the client did not spell as low/medium/high.
    #[default]
    Default,
}

impl Priority {
    /// Multiplier added on top of 1 in the suggested price.
    #[must_use]
    pub fn premium(self) -> Decimal {
        match self {
            Self::Low => Decimal::ZERO,
            Self::Medium => Decimal::new(25, 2),
            Self::High => MAX_PREMIUM,
            Self::Default => Decimal::new(10, 2),
        }
    }
}

impl From<&str> for Priority {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::Default,
        }
    }
}

/// Coarse congestion bucket of the last processed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionLevel {
    Low,
    Medium,
    High,
    Unknown,
}

impl CongestionLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CongestionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breakdown returned by [`FeeMarketKeeper::estimate_fee`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub gas_limit: u64,
    pub priority: Priority,
    pub base_fee: Decimal,
    pub gas_price: Decimal,
    /// `base_fee * gas_limit`.
    pub base_fee_component: Decimal,
    /// `total_fee - base_fee_component`.
    pub priority_fee_component: Decimal,
    /// `gas_price * gas_limit`.
    pub total_fee: Decimal,
    pub congestion: CongestionLevel,
}

fn gas_ratio(latest_gas: u64, target_gas: u64) -> Option<Decimal> {
    if target_gas == 0 {
        return None;
    }
    Decimal::from(latest_gas).checked_div(Decimal::from(target_gas))
}

/// Bucket `latest_gas` against the configured target. A zero target gives
/// [`CongestionLevel::Unknown`].
#[must_use]
pub fn congestion_level(params: &FeeMarketParams, latest_gas: u64) -> CongestionLevel {
    match gas_ratio(latest_gas, params.target_gas) {
        None => CongestionLevel::Unknown,
        Some(r) if r < LOW_CONGESTION_RATIO => CongestionLevel::Low,
        Some(r) if r < HIGH_CONGESTION_RATIO => CongestionLevel::Medium,
        Some(_) => CongestionLevel::High,
    }
}

/// `min(0.5, max(0, (ratio - 1) * 0.5))`, zero when the target is unset.
#[must_use]
pub fn congestion_premium(params: &FeeMarketParams, latest_gas: u64) -> Decimal {
    let Some(ratio) = gas_ratio(latest_gas, params.target_gas) else {
        return Decimal::ZERO;
    };
    let raw = (ratio - Decimal::ONE)
        .checked_mul(MAX_PREMIUM)
        .unwrap_or(MAX_PREMIUM);
    raw.max(Decimal::ZERO).min(MAX_PREMIUM)
}

/// Pure gas price suggestion from the stored fee market state.
#[must_use]
pub fn suggest_gas_price(
    params: &FeeMarketParams,
    base_fee: Decimal,
    latest_gas: u64,
    priority: Priority,
) -> Decimal {
    if !params.enabled {
        return params.min_base_fee;
    }
    let congestion = Decimal::ONE + congestion_premium(params, latest_gas);
    let prio = Decimal::ONE + priority.premium();
    // Both factors are at most 1.5, so this cannot overflow for any
    // representable base fee below Decimal::MAX / 2.25.
    let price = base_fee
        .checked_mul(congestion)
        .and_then(|p| p.checked_mul(prio))
        .unwrap_or(Decimal::MAX);
    params.clamp(price)
}

impl FeeMarketKeeper {
    pub fn congestion_level(&self, ctx: &Context<'_>) -> Result<CongestionLevel> {
        let params = self.params(ctx)?;
        Ok(congestion_level(&params, self.latest_gas(ctx)?))
    }

    /// Suggested price per gas unit for `priority`.
    pub fn suggest_gas_price(&self, ctx: &Context<'_>, priority: Priority) -> Result<Decimal> {
        let params = self.params(ctx)?;
        let base_fee = self.base_fee(ctx)?;
        let latest = self.latest_gas(ctx)?;
        let price = suggest_gas_price(&params, base_fee, latest, priority);
        tracing::debug!(%base_fee, %price, ?priority, latest_gas = latest, "Gas price suggested");
        Ok(price)
    }

    pub fn estimate_fee(
        &self,
        ctx: &Context<'_>,
        gas_limit: u64,
        priority: Priority,
    ) -> Result<FeeEstimate> {
        let params = self.params(ctx)?;
        let base_fee = self.base_fee(ctx)?;
        let latest = self.latest_gas(ctx)?;
        let gas_price = suggest_gas_price(&params, base_fee, latest, priority);

        let gas = Decimal::from(gas_limit);
        let base_fee_component = base_fee.checked_mul(gas).unwrap_or(Decimal::MAX);
        let total_fee = gas_price.checked_mul(gas).unwrap_or(Decimal::MAX);

        Ok(FeeEstimate {
            gas_limit,
            priority,
            base_fee,
            gas_price,
            base_fee_component,
            priority_fee_component: total_fee - base_fee_component,
            total_fee,
            congestion: congestion_level(&params, latest),
        })
    }
}
