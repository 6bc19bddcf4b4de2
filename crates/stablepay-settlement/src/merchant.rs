//! Merchant registry.

use stablepay_types::{
    AccountKeeper, Address, BankKeeper, ClaimVerifier, ComplianceKeeper, Context, Event,
    MerchantConfig, MerchantUpdate, Result, StablepayError,
};

use crate::keeper::SettlementKeeper;

impl<B, C, A, V> SettlementKeeper<B, C, A, V>
where
    B: BankKeeper,
    C: ComplianceKeeper,
    A: AccountKeeper,
    V: ClaimVerifier,
{
    fn ensure_merchant_caller(&self, caller: &Address, merchant: &Address) -> Result<()> {
        if caller == merchant || caller == self.authority() {
            Ok(())
        } else {
            Err(StablepayError::unauthorized(format!(
                "{caller} may not manage merchant {merchant}"
            )))
        }
    }

    /// Register a merchant. The caller must be the merchant itself or the
    /// authority. The stored record is active and stamped with the block
    /// time regardless of what `config` says.
    ///
    /// # Errors
    /// `Unauthorized`, `MerchantAlreadyExists`, or a validation error from
    /// [`MerchantConfig::validate`].
    pub fn register_merchant(
        &mut self,
        ctx: &mut Context<'_>,
        caller: &Address,
        mut config: MerchantConfig,
    ) -> Result<()> {
        self.ensure_merchant_caller(caller, &config.address)?;
        if Self::find_merchant(ctx, &config.address)?.is_some() {
            return Err(StablepayError::MerchantAlreadyExists(config.address.to_string()));
        }
        config.validate()?;
        config.is_active = true;
        config.registered_at = ctx.block_time();
        Self::save_merchant(ctx, &config)?;

        ctx.emit(
            Event::new("merchant_registered")
                .attr("merchant", &config.address)
                .attr("name", &config.name),
        );
        tracing::info!(merchant = %config.address, name = %config.name, "Merchant registered");
        Ok(())
    }

    /// Apply a patch to a registered merchant.
    ///
    /// # Errors
    /// `Unauthorized`, `MerchantNotFound`, `InvalidField` for an empty
    /// patch, or a validation error on the patched record (which is then
    /// left unchanged).
    pub fn update_merchant(
        &mut self,
        ctx: &mut Context<'_>,
        caller: &Address,
        address: &Address,
        update: &MerchantUpdate,
    ) -> Result<MerchantConfig> {
        self.ensure_merchant_caller(caller, address)?;
        let mut merchant = Self::find_merchant(ctx, address)?
            .ok_or_else(|| StablepayError::MerchantNotFound(address.to_string()))?;
        if update.is_empty() {
            return Err(StablepayError::InvalidField {
                field: "update",
                reason: "no fields to update".into(),
            });
        }
        merchant.apply(update)?;
        Self::save_merchant(ctx, &merchant)?;

        ctx.emit(
            Event::new("merchant_updated")
                .attr("merchant", address)
                .attr("is_active", merchant.is_active),
        );
        tracing::info!(merchant = %address, active = merchant.is_active, "Merchant updated");
        Ok(merchant)
    }
}
