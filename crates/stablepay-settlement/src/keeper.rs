//! Settlement keeper: owns the capabilities and the module key space.
//!
//! Every engine (ledger, batch, channel, merchant, queries) is an `impl`
//! block on [`SettlementKeeper`] in its own module. This file holds what
//! they share: key layout, id sequences, params, record load/save and fee
//! routing.

use chrono::{DateTime, Utc};
use stablepay_types::{
    AccountKeeper, Address, BankKeeper, BatchId, BatchSettlement, ChannelId, ClaimVerifier, Coin,
    ComplianceKeeper, Context, Ed25519ClaimVerifier, Event, KvStore, MerchantConfig, Params,
    PaymentChannel, Result, Settlement, SettlementId, StablepayError, constants, get_json,
    set_json,
};

/// Store key layout. Numeric ids are big-endian so prefix iteration is in
/// id order.
pub mod keys {
    use stablepay_types::{Address, BatchId, ChannelId, SettlementId, join_key};

    pub const PARAMS: &[u8] = b"params";
    pub const SETTLEMENT_PREFIX: &[u8] = b"settlement/";
    pub const BATCH_PREFIX: &[u8] = b"batch/";
    pub const CHANNEL_PREFIX: &[u8] = b"channel/";
    pub const MERCHANT_PREFIX: &[u8] = b"merchant/";
    pub const REFUND_PREFIX: &[u8] = b"refund/";

    pub const SEQ_SETTLEMENT: &[u8] = b"seq/settlement";
    pub const SEQ_BATCH: &[u8] = b"seq/batch";
    pub const SEQ_CHANNEL: &[u8] = b"seq/channel";

    /// `idx/escrow_expiry/<unix_secs_be><settlement_id_be>`
    pub const ESCROW_EXPIRY_PREFIX: &[u8] = b"idx/escrow_expiry/";
    /// `idx/channel_expiry/<height_be><channel_id_be>`
    pub const CHANNEL_EXPIRY_PREFIX: &[u8] = b"idx/channel_expiry/";
    /// `idx/sender/<address>/<settlement_id_be>`
    pub const SENDER_PREFIX: &[u8] = b"idx/sender/";

    pub fn settlement(id: SettlementId) -> Vec<u8> {
        join_key(SETTLEMENT_PREFIX, &id.to_key())
    }

    pub fn batch(id: BatchId) -> Vec<u8> {
        join_key(BATCH_PREFIX, &id.to_key())
    }

    pub fn channel(id: ChannelId) -> Vec<u8> {
        join_key(CHANNEL_PREFIX, &id.to_key())
    }

    pub fn merchant(addr: &Address) -> Vec<u8> {
        join_key(MERCHANT_PREFIX, addr.as_bytes())
    }

    pub fn refund_prefix(id: SettlementId) -> Vec<u8> {
        join_key(REFUND_PREFIX, &id.to_key())
    }

    pub fn refund(id: SettlementId, index: u32) -> Vec<u8> {
        join_key(&refund_prefix(id), &index.to_be_bytes())
    }

    pub fn escrow_expiry(expires_at_secs: u64, id: SettlementId) -> Vec<u8> {
        let mut key = join_key(ESCROW_EXPIRY_PREFIX, &expires_at_secs.to_be_bytes());
        key.extend_from_slice(&id.to_key());
        key
    }

    pub fn channel_expiry(expires_at_height: u64, id: ChannelId) -> Vec<u8> {
        let mut key = join_key(CHANNEL_EXPIRY_PREFIX, &expires_at_height.to_be_bytes());
        key.extend_from_slice(&id.to_key());
        key
    }

    /// Addresses never contain `/`, so the trailing separator keeps one
    /// sender's range from overlapping another's.
    pub fn sender_prefix(addr: &Address) -> Vec<u8> {
        let mut key = join_key(SENDER_PREFIX, addr.as_bytes());
        key.push(b'/');
        key
    }

    pub fn sender(addr: &Address, id: SettlementId) -> Vec<u8> {
        join_key(&sender_prefix(addr), &id.to_key())
    }

    /// Split an expiry index key into its `(sort_key, id)` parts.
    pub fn split_expiry(prefix: &[u8], key: &[u8]) -> Option<(u64, u64)> {
        let rest = key.strip_prefix(prefix)?;
        if rest.len() != 16 {
            return None;
        }
        let (sort, id) = rest.split_at(8);
        Some((
            u64::from_be_bytes(sort.try_into().ok()?),
            u64::from_be_bytes(id.try_into().ok()?),
        ))
    }
}

/// Seconds since the epoch for index keys. Pre-1970 times sort first.
pub(crate) fn unix_secs(time: DateTime<Utc>) -> u64 {
    u64::try_from(time.timestamp()).unwrap_or(0)
}

/// The settlement module keeper.
///
/// Generic over the host capabilities so tests can plug in the in-memory
/// doubles from [`crate::mock`].
pub struct SettlementKeeper<B, C, A, V = Ed25519ClaimVerifier> {
    authority: Address,
    pub(crate) bank: B,
    pub(crate) compliance: C,
    pub(crate) accounts: A,
    pub(crate) verifier: V,
}

impl<B, C, A> SettlementKeeper<B, C, A, Ed25519ClaimVerifier>
where
    B: BankKeeper,
    C: ComplianceKeeper,
    A: AccountKeeper,
{
    /// Keeper with the default Ed25519 claim verifier.
    pub fn new(authority: Address, bank: B, compliance: C, accounts: A) -> Self {
        Self::with_verifier(authority, bank, compliance, accounts, Ed25519ClaimVerifier)
    }
}

impl<B, C, A, V> SettlementKeeper<B, C, A, V>
where
    B: BankKeeper,
    C: ComplianceKeeper,
    A: AccountKeeper,
    V: ClaimVerifier,
{
    pub fn with_verifier(authority: Address, bank: B, compliance: C, accounts: A, verifier: V) -> Self {
        Self {
            authority,
            bank,
            compliance,
            accounts,
            verifier,
        }
    }

    #[must_use]
    pub fn authority(&self) -> &Address {
        &self.authority
    }

    pub fn bank(&self) -> &B {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut B {
        &mut self.bank
    }

    pub fn compliance_mut(&mut self) -> &mut C {
        &mut self.compliance
    }

    pub fn accounts_mut(&mut self) -> &mut A {
        &mut self.accounts
    }

    pub(crate) fn ensure_authority(&self, caller: &Address, action: &str) -> Result<()> {
        if caller == &self.authority {
            Ok(())
        } else {
            Err(StablepayError::unauthorized(format!(
                "{caller} may not {action}: authority only"
            )))
        }
    }

    // -----------------------------------------------------------------
    // Params
    // -----------------------------------------------------------------

    /// Store validated params. Called once from genesis.
    ///
    /// # Errors
    /// `InvalidParams` if validation fails.
    pub fn init_genesis(&self, ctx: &mut Context<'_>, params: &Params) -> Result<()> {
        params.validate()?;
        set_json(ctx.store_mut(), keys::PARAMS, params)?;
        tracing::info!(denom = %params.stablecoin_denom, "Settlement module initialised");
        Ok(())
    }

    /// Current params, defaults before genesis.
    pub fn params(&self, ctx: &Context<'_>) -> Result<Params> {
        Ok(get_json(ctx.store(), keys::PARAMS)?.unwrap_or_default())
    }

    /// Replace the params. Authority only.
    ///
    /// # Errors
    /// `Unauthorized` or `InvalidParams`.
    pub fn update_params(&self, ctx: &mut Context<'_>, caller: &Address, params: &Params) -> Result<()> {
        self.ensure_authority(caller, "update settlement params")?;
        params.validate()?;
        set_json(ctx.store_mut(), keys::PARAMS, params)?;
        ctx.emit(Event::new("settlement_update_params").attr("authority", caller));
        tracing::info!(authority = %caller, "Settlement params updated");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Sequences
    // -----------------------------------------------------------------

    /// Bump and return the counter under `key`. The first id is 1.
    pub(crate) fn next_sequence(ctx: &mut Context<'_>, key: &[u8]) -> Result<u64> {
        let last: u64 = get_json(ctx.store(), key)?.unwrap_or(0);
        let next = last
            .checked_add(1)
            .ok_or_else(|| StablepayError::Internal("sequence exhausted".into()))?;
        set_json(ctx.store_mut(), key, &next)?;
        Ok(next)
    }

    // -----------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------

    pub(crate) fn load_settlement(ctx: &Context<'_>, id: SettlementId) -> Result<Settlement> {
        get_json(ctx.store(), &keys::settlement(id))?.ok_or(StablepayError::SettlementNotFound(id))
    }

    pub(crate) fn save_settlement(ctx: &mut Context<'_>, settlement: &Settlement) -> Result<()> {
        set_json(ctx.store_mut(), &keys::settlement(settlement.id), settlement)
    }

    /// Write a new settlement and its sender index entry.
    pub(crate) fn insert_settlement(ctx: &mut Context<'_>, settlement: &Settlement) -> Result<()> {
        Self::save_settlement(ctx, settlement)?;
        ctx.store_mut()
            .set(&keys::sender(&settlement.sender, settlement.id), Vec::new());
        Ok(())
    }

    pub(crate) fn load_batch(ctx: &Context<'_>, id: BatchId) -> Result<BatchSettlement> {
        get_json(ctx.store(), &keys::batch(id))?.ok_or(StablepayError::BatchNotFound(id))
    }

    pub(crate) fn save_batch(ctx: &mut Context<'_>, batch: &BatchSettlement) -> Result<()> {
        set_json(ctx.store_mut(), &keys::batch(batch.id), batch)
    }

    pub(crate) fn load_channel(ctx: &Context<'_>, id: ChannelId) -> Result<PaymentChannel> {
        get_json(ctx.store(), &keys::channel(id))?.ok_or(StablepayError::ChannelNotFound(id))
    }

    pub(crate) fn save_channel(ctx: &mut Context<'_>, channel: &PaymentChannel) -> Result<()> {
        set_json(ctx.store_mut(), &keys::channel(channel.id), channel)
    }

    pub(crate) fn find_merchant(ctx: &Context<'_>, addr: &Address) -> Result<Option<MerchantConfig>> {
        get_json(ctx.store(), &keys::merchant(addr))
    }

    pub(crate) fn save_merchant(ctx: &mut Context<'_>, merchant: &MerchantConfig) -> Result<()> {
        set_json(ctx.store_mut(), &keys::merchant(&merchant.address), merchant)
    }

    // -----------------------------------------------------------------
    // Fees
    // -----------------------------------------------------------------

    /// Fee rate for payments to `recipient`: an active merchant's override,
    /// else the module default.
    pub(crate) fn fee_rate_for(ctx: &Context<'_>, params: &Params, recipient: &Address) -> Result<u32> {
        let rate = Self::find_merchant(ctx, recipient)?
            .filter(|m| m.is_active)
            .and_then(|m| m.fee_rate_bps)
            .unwrap_or(params.default_fee_rate_bps);
        Ok(rate)
    }

    /// Split `amount` into `(fee, net)` at `bps`.
    pub(crate) fn split_fee(amount: &Coin, bps: u32) -> Result<(Coin, Coin)> {
        let fee = amount.fee_at_bps(bps);
        let net = amount.checked_sub(&fee)?;
        Ok((fee, net))
    }

    /// Pay a fee straight from an account.
    pub(crate) fn collect_fee_from_account(&mut self, params: &Params, from: &Address, fee: &Coin) -> Result<()> {
        if fee.is_zero() {
            return Ok(());
        }
        match &params.fee_collector {
            Some(collector) => self.bank.send_coins(from, collector, fee),
            None => self.bank.send_coins_from_account_to_module(
                from,
                constants::FEE_COLLECTOR_MODULE_ACCOUNT,
                fee,
            ),
        }
    }

    /// Pay a fee out of the escrow module account.
    pub(crate) fn collect_fee_from_escrow(&mut self, params: &Params, fee: &Coin) -> Result<()> {
        if fee.is_zero() {
            return Ok(());
        }
        match &params.fee_collector {
            Some(collector) => self.bank.send_coins_from_module_to_account(
                constants::SETTLEMENT_MODULE_ACCOUNT,
                collector,
                fee,
            ),
            None => self.bank.send_coins_from_module_to_module(
                constants::SETTLEMENT_MODULE_ACCOUNT,
                constants::FEE_COLLECTOR_MODULE_ACCOUNT,
                fee,
            ),
        }
    }

    /// Move escrowed funds to an account. Zero amounts are skipped.
    pub(crate) fn pay_from_escrow(&mut self, to: &Address, amount: &Coin) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.bank
            .send_coins_from_module_to_account(constants::SETTLEMENT_MODULE_ACCOUNT, to, amount)
    }

    /// Pull funds from an account into escrow.
    pub(crate) fn pull_into_escrow(&mut self, from: &Address, amount: &Coin) -> Result<()> {
        self.bank
            .send_coins_from_account_to_module(from, constants::SETTLEMENT_MODULE_ACCOUNT, amount)
    }

    /// Fail fast with `InsufficientFunds` before any transfer starts.
    pub(crate) fn ensure_balance(&self, addr: &Address, amount: &Coin) -> Result<()> {
        let available = self.bank.balance(addr, &amount.denom);
        if available.amount < amount.amount {
            return Err(StablepayError::InsufficientFunds {
                needed: amount.amount,
                available: available.amount,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn expiry_keys_sort_by_time_then_id() {
        let a = keys::escrow_expiry(100, SettlementId(9));
        let b = keys::escrow_expiry(101, SettlementId(1));
        let c = keys::escrow_expiry(101, SettlementId(2));
        assert!(a < b && b < c);
        assert_eq!(
            keys::split_expiry(keys::ESCROW_EXPIRY_PREFIX, &c),
            Some((101, 2))
        );
        assert_eq!(keys::split_expiry(keys::ESCROW_EXPIRY_PREFIX, b"idx/escrow_expiry/short"), None);
    }

    #[test]
    fn sender_prefixes_do_not_overlap() {
        let ab = Address::parse("stable1ab0").unwrap();
        let abc = Address::parse("stable1ab0c").unwrap();
        let key = keys::sender(&abc, SettlementId(1));
        assert!(!key.starts_with(&keys::sender_prefix(&ab)));
        assert!(key.starts_with(&keys::sender_prefix(&abc)));
    }

    #[test]
    fn unix_secs_clamps_pre_epoch() {
        let before = Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(unix_secs(before), 0);
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(unix_secs(after), 1_704_067_200);
    }
}
