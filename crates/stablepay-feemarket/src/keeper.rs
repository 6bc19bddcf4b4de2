//! Fee market state and the per-block base fee update.
//!
//! The next base fee is a pure function of the current fee, the gas used by
//! the previous block, the target, and the params:
//!
//! ```text
//! change = current / (target * denominator) * (gas_used - target)
//! next   = clamp(current + change, min_base_fee, max_base_fee)
//! ```
//!
//! Every node computing the same inputs produces the same base fee.

use std::cmp::Ordering;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stablepay_types::{
    Address, Context, Event, KvStore, Result, StablepayError, decode_json, get_json, join_key,
    set_json,
};

use crate::params::{DEFAULT_TARGET_GAS, FeeMarketParams};

const PARAMS_KEY: &[u8] = b"feemarket/params";
const BASE_FEE_KEY: &[u8] = b"feemarket/base_fee";
const LATEST_GAS_KEY: &[u8] = b"feemarket/latest_gas";
const HISTORY_PREFIX: &[u8] = b"feemarket/history/";

/// Decimal places kept on the stored base fee.
const BASE_FEE_SCALE: u32 = 18;

/// One block's fee market outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeHistoryEntry {
    pub height: u64,
    pub base_fee: Decimal,
    pub gas_used: u64,
}

/// Gas target for a block: explicit param, else `max_block_gas /
/// elasticity`, else [`DEFAULT_TARGET_GAS`].
#[must_use]
pub fn effective_target_gas(params: &FeeMarketParams, max_block_gas: u64) -> u64 {
    if params.target_gas != 0 {
        return params.target_gas;
    }
    let derived = max_block_gas
        .checked_div(u64::from(params.elasticity_multiplier))
        .unwrap_or(0);
    if derived == 0 { DEFAULT_TARGET_GAS } else { derived }
}

/// Pure EIP-1559 step. A zero `target` cannot adjust and returns the
/// clamped current fee.
#[must_use]
pub fn compute_next_base_fee(
    current: Decimal,
    gas_used: u64,
    target: u64,
    params: &FeeMarketParams,
) -> Decimal {
    if target == 0 || params.base_fee_change_denominator == 0 {
        return params.clamp(current);
    }
    let used = Decimal::from(gas_used);
    let target_dec = Decimal::from(target);
    let divisor = target_dec.checked_mul(Decimal::from(params.base_fee_change_denominator));
    // Divide first so large fees stay inside Decimal's range.
    let next = divisor
        .and_then(|d| current.checked_div(d))
        .and_then(|per_gas| per_gas.checked_mul(used - target_dec))
        .and_then(|change| current.checked_add(change))
        .unwrap_or_else(|| match gas_used.cmp(&target) {
            Ordering::Greater => Decimal::MAX,
            Ordering::Less => Decimal::ZERO,
            Ordering::Equal => current,
        });
    params.clamp(next).round_dp(BASE_FEE_SCALE)
}

/// Owns the `feemarket/` key namespace.
#[derive(Debug, Clone)]
pub struct FeeMarketKeeper {
    authority: Address,
}

impl FeeMarketKeeper {
    #[must_use]
    pub fn new(authority: Address) -> Self {
        Self { authority }
    }

    #[must_use]
    pub fn authority(&self) -> &Address {
        &self.authority
    }

    /// Store validated params and seed the base fee.
    ///
    /// # Errors
    /// `InvalidFeeMarketParams` if the params fail validation.
    pub fn init_genesis(&self, ctx: &mut Context<'_>, params: &FeeMarketParams) -> Result<()> {
        params.validate()?;
        set_json(ctx.store_mut(), PARAMS_KEY, params)?;
        self.set_base_fee(ctx, params.initial_base_fee)?;
        set_json(ctx.store_mut(), LATEST_GAS_KEY, &0u64)?;
        Ok(())
    }

    /// Current params, defaults if never set.
    pub fn params(&self, ctx: &Context<'_>) -> Result<FeeMarketParams> {
        Ok(get_json(ctx.store(), PARAMS_KEY)?.unwrap_or_default())
    }

    /// Replace the params. Authority only.
    ///
    /// # Errors
    /// `Unauthorized` for any other caller, `InvalidFeeMarketParams` for
    /// bad params.
    pub fn update_params(
        &self,
        ctx: &mut Context<'_>,
        caller: &Address,
        params: &FeeMarketParams,
    ) -> Result<()> {
        if caller != &self.authority {
            return Err(StablepayError::unauthorized(format!(
                "{caller} is not the fee market authority"
            )));
        }
        params.validate()?;
        set_json(ctx.store_mut(), PARAMS_KEY, params)?;
        // Re-clamp so a tightened window takes effect immediately.
        let current = self.base_fee(ctx)?;
        if !current.is_zero() {
            self.set_base_fee(ctx, params.clamp(current))?;
        }
        ctx.emit(Event::new("feemarket_update_params").attr("authority", caller));
        tracing::info!(authority = %caller, "Fee market params updated");
        Ok(())
    }

    /// Stored base fee (zero before genesis).
    pub fn base_fee(&self, ctx: &Context<'_>) -> Result<Decimal> {
        Ok(get_json(ctx.store(), BASE_FEE_KEY)?.unwrap_or(Decimal::ZERO))
    }

    fn set_base_fee(&self, ctx: &mut Context<'_>, fee: Decimal) -> Result<()> {
        set_json(ctx.store_mut(), BASE_FEE_KEY, &fee)
    }

    /// Gas consumed by the last processed block.
    pub fn latest_gas(&self, ctx: &Context<'_>) -> Result<u64> {
        Ok(get_json(ctx.store(), LATEST_GAS_KEY)?.unwrap_or(0))
    }

    /// Block-end base fee update.
    ///
    /// Disabled markets return the current fee untouched. A zero current fee
    /// bootstraps from `initial_base_fee` before the step is applied.
    pub fn update_base_fee(
        &self,
        ctx: &mut Context<'_>,
        gas_used: u64,
        max_block_gas: u64,
    ) -> Result<Decimal> {
        let params = self.params(ctx)?;
        let mut current = self.base_fee(ctx)?;
        if !params.enabled {
            return Ok(current);
        }
        if current.is_zero() {
            current = params.initial_base_fee;
        }

        let target = effective_target_gas(&params, max_block_gas);
        let next = compute_next_base_fee(current, gas_used, target, &params);

        self.set_base_fee(ctx, next)?;
        set_json(ctx.store_mut(), LATEST_GAS_KEY, &gas_used)?;
        self.record_history(ctx, &params, next, gas_used)?;

        ctx.emit(
            Event::new("fee_market")
                .attr("base_fee", next)
                .attr("gas_used", gas_used)
                .attr("target_gas", target),
        );
        tracing::debug!(
            height = ctx.height(),
            previous = %current,
            base_fee = %next,
            gas_used,
            target,
            "Base fee updated"
        );
        Ok(next)
    }

    fn record_history(
        &self,
        ctx: &mut Context<'_>,
        params: &FeeMarketParams,
        base_fee: Decimal,
        gas_used: u64,
    ) -> Result<()> {
        let height = ctx.height();
        let entry = FeeHistoryEntry {
            height,
            base_fee,
            gas_used,
        };
        set_json(ctx.store_mut(), &join_key(HISTORY_PREFIX, &height.to_be_bytes()), &entry)?;

        let keys: Vec<Vec<u8>> = ctx
            .store()
            .prefix_iter(HISTORY_PREFIX)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        let keep = usize::try_from(params.max_fee_history).unwrap_or(usize::MAX);
        let excess = keys.len().saturating_sub(keep);
        for key in keys.into_iter().take(excess) {
            ctx.store_mut().delete(&key);
        }
        Ok(())
    }

    /// Up to `count` most recent entries, newest first.
    pub fn fee_history(&self, ctx: &Context<'_>, count: usize) -> Result<Vec<FeeHistoryEntry>> {
        ctx.store()
            .prefix_iter(HISTORY_PREFIX)
            .into_iter()
            .rev()
            .take(count)
            .map(|(_, v)| decode_json(&v))
            .collect()
    }
}
