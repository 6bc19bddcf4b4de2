//! Block-end hook.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stablepay_types::{AccountKeeper, BankKeeper, ClaimVerifier, ComplianceKeeper, Context, Result};

use crate::router::Router;

/// What `end_block` did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndBlockSummary {
    pub gas_used: u64,
    pub base_fee: Decimal,
    pub expired_escrows: usize,
    pub closed_channels: usize,
}

impl<B, C, A, V> Router<B, C, A, V>
where
    B: BankKeeper,
    C: ComplianceKeeper,
    A: AccountKeeper,
    V: ClaimVerifier,
{
    /// Close the block: adjust the base fee from the gas delivered since
    /// the last call, then sweep expired escrows and channels.
    ///
    /// The block gas counter resets and both sweeps run even when the base
    /// fee update fails.
    ///
    /// # Errors
    /// Only a failed base fee update, reported after the sweeps have been
    /// applied; sweep items log and skip.
    pub fn end_block(&mut self, ctx: &mut Context<'_>, max_block_gas: u64) -> Result<EndBlockSummary> {
        let gas_used = std::mem::take(&mut self.block_gas);
        let fee_market = &self.fee_market;
        let fee_update = ctx.branch(|inner| fee_market.update_base_fee(inner, gas_used, max_block_gas));

        let expired_escrows = self.settlement.process_expired_escrows(ctx);
        let closed_channels = self.settlement.process_expired_channels(ctx);

        let base_fee = fee_update.inspect_err(|err| {
            tracing::error!(
                height = ctx.height(),
                gas_used,
                expired_escrows,
                closed_channels,
                error = %err,
                "Base fee update failed"
            );
        })?;

        tracing::info!(
            height = ctx.height(),
            gas_used,
            %base_fee,
            expired_escrows,
            closed_channels,
            "Block ended"
        );
        Ok(EndBlockSummary {
            gas_used,
            base_fee,
            expired_escrows,
            closed_channels,
        })
    }
}
