//! Fee market parameters.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stablepay_types::{Result, StablepayError, constants};

/// Target gas used when neither the params nor the block gas limit give one.
pub const DEFAULT_TARGET_GAS: u64 = 10_000_000;

/// Fee market configuration, stored under `feemarket/params`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeMarketParams {
    /// When false the base fee is frozen and the oracle returns `min_base_fee`.
    pub enabled: bool,
    /// Bounds the per-block change to `1 / denominator` of the base fee.
    pub base_fee_change_denominator: u32,
    /// `max_block_gas / elasticity_multiplier` is the target when
    /// `target_gas` is 0.
    pub elasticity_multiplier: u32,
    /// Explicit per-block gas target. 0 derives it from the block limit.
    pub target_gas: u64,
    pub initial_base_fee: Decimal,
    pub min_base_fee: Decimal,
    /// 0 means unbounded.
    pub max_base_fee: Decimal,
    pub priority_fee_floor: Decimal,
    /// Number of `(height, base_fee, gas_used)` entries retained.
    pub max_fee_history: u32,
    /// Denom fees are paid in.
    pub fee_denom: String,
}

impl Default for FeeMarketParams {
    fn default() -> Self {
        Self {
            enabled: true,
            base_fee_change_denominator: 8,
            elasticity_multiplier: 2,
            target_gas: 0,
            initial_base_fee: Decimal::new(25, 3),   // 0.025
            min_base_fee: Decimal::new(1, 2),        // 0.01
            max_base_fee: Decimal::new(10, 0),       // 10
            priority_fee_floor: Decimal::new(1, 3),  // 0.001
            max_fee_history: 100,
            fee_denom: constants::DEFAULT_STABLECOIN_DENOM.to_string(),
        }
    }
}

impl FeeMarketParams {
    /// # Errors
    /// Returns [`StablepayError::InvalidFeeMarketParams`] describing the
    /// first inconsistency.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| StablepayError::InvalidFeeMarketParams { reason };

        if self.base_fee_change_denominator == 0 {
            return Err(invalid("base fee change denominator must be positive".into()));
        }
        if self.elasticity_multiplier == 0 {
            return Err(invalid("elasticity multiplier must be positive".into()));
        }
        for (name, value) in [
            ("initial_base_fee", self.initial_base_fee),
            ("min_base_fee", self.min_base_fee),
            ("max_base_fee", self.max_base_fee),
            ("priority_fee_floor", self.priority_fee_floor),
        ] {
            if value.is_sign_negative() {
                return Err(invalid(format!("{name} must not be negative")));
            }
        }
        if !self.max_base_fee.is_zero() && self.min_base_fee > self.max_base_fee {
            return Err(invalid(format!(
                "min base fee {} exceeds max {}",
                self.min_base_fee, self.max_base_fee
            )));
        }
        if self.initial_base_fee < self.min_base_fee
            || (!self.max_base_fee.is_zero() && self.initial_base_fee > self.max_base_fee)
        {
            return Err(invalid(format!(
                "initial base fee {} outside [{}, {}]",
                self.initial_base_fee, self.min_base_fee, self.max_base_fee
            )));
        }
        if self.max_fee_history == 0 {
            return Err(invalid("max fee history must be positive".into()));
        }
        stablepay_types::validate_denom(&self.fee_denom).map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }

    /// Clamp a candidate base fee into `[min_base_fee, max_base_fee]`.
    #[must_use]
    pub fn clamp(&self, fee: Decimal) -> Decimal {
        let mut fee = fee.max(Decimal::ZERO);
        if fee < self.min_base_fee {
            fee = self.min_base_fee;
        }
        if !self.max_base_fee.is_zero() && fee > self.max_base_fee {
            fee = self.max_base_fee;
        }
        fee
    }
}
