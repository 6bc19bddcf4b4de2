//! Genesis state for both modules.

use serde::{Deserialize, Serialize};
use stablepay_feemarket::FeeMarketParams;
use stablepay_types::{
    AccountKeeper, BankKeeper, ClaimVerifier, ComplianceKeeper, Context, Params, Result,
};

use crate::router::Router;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisState {
    pub settlement: Params,
    pub fee_market: FeeMarketParams,
}

impl GenesisState {
    /// # Errors
    /// `InvalidParams` or `InvalidFeeMarketParams`.
    pub fn validate(&self) -> Result<()> {
        self.settlement.validate()?;
        self.fee_market.validate()
    }
}

impl<B, C, A, V> Router<B, C, A, V>
where
    B: BankKeeper,
    C: ComplianceKeeper,
    A: AccountKeeper,
    V: ClaimVerifier,
{
    /// Validate and store both parameter sets, seeding the base fee.
    ///
    /// # Errors
    /// Any validation error; nothing is written in that case.
    pub fn init_genesis(&mut self, ctx: &mut Context<'_>, genesis: &GenesisState) -> Result<()> {
        genesis.validate()?;
        let (settlement, fee_market) = (&self.settlement, &self.fee_market);
        ctx.branch(|inner| {
            settlement.init_genesis(inner, &genesis.settlement)?;
            fee_market.init_genesis(inner, &genesis.fee_market)
        })
    }

    /// # Errors
    /// `Serialization` if stored params do not decode.
    pub fn export_genesis(&self, ctx: &Context<'_>) -> Result<GenesisState> {
        Ok(GenesisState {
            settlement: self.settlement.params(ctx)?,
            fee_market: self.fee_market.params(ctx)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use stablepay_types::StablepayError;

    use super::*;

    #[test]
    fn default_genesis_is_valid() {
        assert!(GenesisState::default().validate().is_ok());
    }

    #[test]
    fn genesis_round_trips_through_json() {
        let genesis = GenesisState::default();
        let json = serde_json::to_string(&genesis).unwrap();
        let back: GenesisState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, genesis);
    }

    #[test]
    fn bad_section_rejected() {
        let mut genesis = GenesisState::default();
        genesis.fee_market.base_fee_change_denominator = 0;
        assert!(matches!(
            genesis.validate(),
            Err(StablepayError::InvalidFeeMarketParams { .. })
        ));

        let mut genesis = GenesisState::default();
        genesis.settlement.stablecoin_denom = String::new();
        assert!(matches!(
            genesis.validate(),
            Err(StablepayError::InvalidParams { .. })
        ));
    }
}
