//! Transaction fee check run before message execution.

use rust_decimal::{Decimal, prelude::FromPrimitive};
use stablepay_types::{Coin, Context, Result, StablepayError};

use crate::keeper::FeeMarketKeeper;

/// Validator-local fee floor combined with the chain base fee.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeeChecker {
    /// Minimum price per gas this validator accepts.
    pub min_gas_price: Decimal,
}

impl FeeChecker {
    #[must_use]
    pub fn new(min_gas_price: Decimal) -> Self {
        Self { min_gas_price }
    }

    /// Price per gas the attached fee must cover. The base fee only counts
    /// while the market is enabled.
    pub fn required_gas_price(&self, keeper: &FeeMarketKeeper, ctx: &Context<'_>) -> Result<Decimal> {
        let params = keeper.params(ctx)?;
        let base_fee = if params.enabled {
            keeper.base_fee(ctx)?
        } else {
            Decimal::ZERO
        };
        Ok(base_fee.max(self.min_gas_price))
    }

    /// Reject a fee that is zero, in the wrong denom, or below
    /// `max(base_fee, min_gas_price) * gas`. Returns the required amount.
    ///
    /// # Errors
    /// `InvalidDenom`, `ZeroFee` or `InsufficientFee`.
    pub fn check_tx_fee(
        &self,
        keeper: &FeeMarketKeeper,
        ctx: &Context<'_>,
        fee: &Coin,
        gas: u64,
    ) -> Result<Decimal> {
        let params = keeper.params(ctx)?;
        if fee.denom != params.fee_denom {
            return Err(StablepayError::InvalidDenom {
                expected: params.fee_denom,
                actual: fee.denom.clone(),
            });
        }

        let price = self.required_gas_price(keeper, ctx)?;
        let required = price
            .checked_mul(Decimal::from(gas))
            .unwrap_or(Decimal::MAX);

        if fee.is_zero() {
            tracing::warn!(%required, gas, "Rejected zero-fee transaction");
            return Err(StablepayError::ZeroFee { required });
        }
        // Amounts past Decimal's 96-bit range cover any representable requirement.
        let provided = Decimal::from_u128(fee.amount).unwrap_or(Decimal::MAX);
        if provided < required {
            tracing::warn!(%required, provided = fee.amount, gas, "Rejected underpriced transaction");
            return Err(StablepayError::InsufficientFee {
                required,
                provided: fee.amount,
            });
        }
        Ok(required)
    }
}
