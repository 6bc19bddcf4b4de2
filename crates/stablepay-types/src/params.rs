//! Module-wide settlement parameters.

use serde::{Deserialize, Serialize};

use crate::{Address, Result, StablepayError, coin::validate_denom, constants, merchant};

/// Singleton settlement parameters, stored under the `params` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// The only denom settlements may use.
    pub stablecoin_denom: String,
    pub default_fee_rate_bps: u32,
    /// Fees go here when set, otherwise to the fee collector module account.
    pub fee_collector: Option<Address>,
    pub min_settlement_amount: u128,
    /// 0 disables the global upper bound.
    pub max_settlement_amount: u128,
    /// Seconds.
    pub default_escrow_expiration: u64,
    /// Seconds.
    pub max_escrow_expiration: u64,
    /// Blocks.
    pub min_channel_expiration: u64,
    /// Blocks.
    pub max_channel_expiration: u64,
    pub max_batch_size: u32,
    pub max_query_page_size: u32,
    pub instant_enabled: bool,
    pub escrow_enabled: bool,
    pub channels_enabled: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            stablecoin_denom: constants::DEFAULT_STABLECOIN_DENOM.to_string(),
            default_fee_rate_bps: constants::DEFAULT_FEE_RATE_BPS,
            fee_collector: None,
            min_settlement_amount: constants::DEFAULT_MIN_SETTLEMENT,
            max_settlement_amount: constants::DEFAULT_MAX_SETTLEMENT,
            default_escrow_expiration: constants::DEFAULT_ESCROW_EXPIRATION_SECS,
            max_escrow_expiration: constants::MAX_ESCROW_EXPIRATION_SECS,
            min_channel_expiration: constants::DEFAULT_MIN_CHANNEL_EXPIRATION,
            max_channel_expiration: constants::DEFAULT_MAX_CHANNEL_EXPIRATION,
            max_batch_size: constants::DEFAULT_MAX_BATCH_SIZE,
            max_query_page_size: constants::DEFAULT_MAX_QUERY_PAGE_SIZE,
            instant_enabled: true,
            escrow_enabled: true,
            channels_enabled: true,
        }
    }
}

impl Params {
    /// Check internal consistency.
    ///
    /// # Errors
    /// Returns [`StablepayError::InvalidParams`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| StablepayError::InvalidParams { reason };

        validate_denom(&self.stablecoin_denom)
            .map_err(|_| invalid(format!("bad stablecoin denom {:?}", self.stablecoin_denom)))?;
        merchant::validate_fee_rate(self.default_fee_rate_bps)
            .map_err(|e| invalid(e.to_string()))?;
        if self.max_settlement_amount != 0 && self.min_settlement_amount > self.max_settlement_amount {
            return Err(invalid(format!(
                "min settlement {} exceeds max {}",
                self.min_settlement_amount, self.max_settlement_amount
            )));
        }
        if self.default_escrow_expiration == 0 || self.max_escrow_expiration == 0 {
            return Err(invalid("escrow expirations must be positive".into()));
        }
        if self.default_escrow_expiration > self.max_escrow_expiration {
            return Err(invalid(format!(
                "default escrow expiration {}s exceeds max {}s",
                self.default_escrow_expiration, self.max_escrow_expiration
            )));
        }
        if self.min_channel_expiration == 0 || self.min_channel_expiration > self.max_channel_expiration {
            return Err(invalid(format!(
                "channel expiration window [{}, {}] is empty",
                self.min_channel_expiration, self.max_channel_expiration
            )));
        }
        if self.max_batch_size == 0 {
            return Err(invalid("max batch size must be positive".into()));
        }
        if self.max_query_page_size == 0 {
            return Err(invalid("max query page size must be positive".into()));
        }
        Ok(())
    }
}
