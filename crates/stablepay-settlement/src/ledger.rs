//! Settlement ledger: instant transfers, escrow lifecycle, partial refunds,
//! checkout and the escrow expiry sweep.
//!
//! Every operation validates fully before the first bank transfer, so a
//! rejected call leaves both the store and the bank untouched.

use serde::{Deserialize, Serialize};
use stablepay_types::{
    AccountKeeper, Address, BankKeeper, ClaimVerifier, Coin, ComplianceKeeper, Context, Event,
    KvStore, Params, RefundRecord, Result, Settlement, SettlementId, SettlementStatus,
    SettlementType, StablepayError, constants, set_json,
};

use crate::keeper::{SettlementKeeper, keys, unix_secs};

/// One checkout line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub sku: String,
    pub quantity: u32,
    #[serde(with = "amount_str")]
    pub unit_price: u128,
}

mod amount_str {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(v: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        String::deserialize(d)?.parse().map_err(D::Error::custom)
    }
}

/// Outcome of [`SettlementKeeper::instant_checkout`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutResult {
    pub settlement_id: SettlementId,
    pub net_amount: Coin,
    pub fee: Coin,
    pub escrowed: bool,
}

/// Checkout parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkout {
    pub customer: Address,
    pub merchant: Address,
    pub amount: Coin,
    pub order_reference: String,
    pub use_escrow: bool,
    #[serde(default)]
    pub items: Vec<CheckoutItem>,
    #[serde(default)]
    pub metadata: String,
}

/// Sum of `quantity * unit_price` over `items`.
///
/// # Errors
/// `AmountOverflow` if the total does not fit.
pub fn items_total(items: &[CheckoutItem]) -> Result<u128> {
    items.iter().try_fold(0u128, |acc, item| {
        u128::from(item.quantity)
            .checked_mul(item.unit_price)
            .and_then(|line| acc.checked_add(line))
            .ok_or(StablepayError::AmountOverflow)
    })
}

pub(crate) fn check_text(field: &'static str, value: &str, max: usize) -> Result<()> {
    if value.len() > max {
        return Err(StablepayError::InvalidField {
            field,
            reason: format!("{} bytes exceeds {max}", value.len()),
        });
    }
    Ok(())
}

impl<B, C, A, V> SettlementKeeper<B, C, A, V>
where
    B: BankKeeper,
    C: ComplianceKeeper,
    A: AccountKeeper,
    V: ClaimVerifier,
{
    /// Checks shared by instant transfers and escrows. Returns `(fee, net)`.
    fn check_payment(
        &self,
        ctx: &Context<'_>,
        params: &Params,
        sender: &Address,
        recipient: &Address,
        amount: &Coin,
    ) -> Result<(Coin, Coin)> {
        if sender == recipient {
            return Err(StablepayError::InvalidRecipient);
        }
        amount.require_denom(&params.stablecoin_denom)?;
        if amount.amount < params.min_settlement_amount {
            return Err(StablepayError::SettlementTooSmall {
                amount: amount.amount,
                min: params.min_settlement_amount,
            });
        }
        if params.max_settlement_amount != 0 && amount.amount > params.max_settlement_amount {
            return Err(StablepayError::SettlementTooLarge {
                amount: amount.amount,
                max: params.max_settlement_amount,
            });
        }
        if let Some(merchant) = Self::find_merchant(ctx, recipient)?.filter(|m| m.is_active) {
            if amount.amount < merchant.min_settlement {
                return Err(StablepayError::SettlementTooSmall {
                    amount: amount.amount,
                    min: merchant.min_settlement,
                });
            }
            if merchant.max_settlement != 0 && amount.amount > merchant.max_settlement {
                return Err(StablepayError::SettlementTooLarge {
                    amount: amount.amount,
                    max: merchant.max_settlement,
                });
            }
        }
        self.compliance.assert_compliant(sender)?;
        self.ensure_balance(sender, amount)?;

        let bps = Self::fee_rate_for(ctx, params, recipient)?;
        Self::split_fee(amount, bps)
    }

    #[allow(clippy::too_many_arguments)]
    fn new_settlement(
        ctx: &mut Context<'_>,
        settlement_type: SettlementType,
        sender: &Address,
        recipient: &Address,
        amount: &Coin,
        fee: Coin,
        net_amount: Coin,
        reference: &str,
        metadata: &str,
    ) -> Result<Settlement> {
        let id = SettlementId(Self::next_sequence(ctx, keys::SEQ_SETTLEMENT)?);
        Ok(Settlement {
            id,
            settlement_type,
            sender: sender.clone(),
            recipient: recipient.clone(),
            amount: amount.clone(),
            fee,
            net_amount,
            status: SettlementStatus::Pending,
            reference: reference.to_string(),
            metadata: metadata.to_string(),
            created_height: ctx.height(),
            created_at: ctx.block_time(),
            settled_height: None,
            settled_at: None,
            expires_at: None,
            batch_id: None,
            refunded_amount: Coin::zero(amount.denom.clone()),
        })
    }

    /// Pay `recipient` immediately, less the fee.
    ///
    /// # Errors
    /// `FeatureDisabled`, `InvalidRecipient`, `InvalidDenom`,
    /// `InvalidAmount`, `SettlementTooSmall`, `SettlementTooLarge`,
    /// `ComplianceCheckFailed` or `InsufficientFunds`.
    pub fn instant_transfer(
        &mut self,
        ctx: &mut Context<'_>,
        sender: &Address,
        recipient: &Address,
        amount: &Coin,
        reference: &str,
        metadata: &str,
    ) -> Result<SettlementId> {
        let params = self.params(ctx)?;
        if !params.instant_enabled {
            return Err(StablepayError::FeatureDisabled("instant transfers"));
        }
        check_text("reference", reference, constants::MAX_REFERENCE_LEN)?;
        check_text("metadata", metadata, constants::MAX_METADATA_LEN)?;
        let (fee, net) = self.check_payment(ctx, &params, sender, recipient, amount)?;

        // Balance was checked above, so neither leg can fail halfway.
        self.bank.send_coins(sender, recipient, &net)?;
        self.collect_fee_from_account(&params, sender, &fee)?;

        let mut settlement = Self::new_settlement(
            ctx,
            SettlementType::Instant,
            sender,
            recipient,
            amount,
            fee,
            net,
            reference,
            metadata,
        )?;
        settlement.transition(SettlementStatus::Completed, ctx.height(), ctx.block_time())?;
        Self::insert_settlement(ctx, &settlement)?;

        ctx.emit(
            Event::new("instant_transfer")
                .attr("settlement_id", settlement.id.0)
                .attr("sender", sender)
                .attr("recipient", recipient)
                .attr("amount", &settlement.amount)
                .attr("fee", &settlement.fee)
                .attr("reference", reference),
        );
        tracing::info!(
            id = settlement.id.0,
            sender = %sender,
            recipient = %recipient,
            amount = %settlement.amount,
            fee = %settlement.fee,
            "Instant transfer settled"
        );
        Ok(settlement.id)
    }

    /// Lock funds in the module escrow account until release, refund or
    /// expiry. `expiration_secs == 0` uses the module default.
    ///
    /// # Errors
    /// As [`Self::instant_transfer`], plus `InvalidEscrowExpiration`.
    #[allow(clippy::too_many_arguments)]
    pub fn create_escrow(
        &mut self,
        ctx: &mut Context<'_>,
        sender: &Address,
        recipient: &Address,
        amount: &Coin,
        reference: &str,
        metadata: &str,
        expiration_secs: u64,
    ) -> Result<SettlementId> {
        let params = self.params(ctx)?;
        if !params.escrow_enabled {
            return Err(StablepayError::FeatureDisabled("escrow"));
        }
        check_text("reference", reference, constants::MAX_REFERENCE_LEN)?;
        check_text("metadata", metadata, constants::MAX_METADATA_LEN)?;

        let secs = if expiration_secs == 0 {
            params.default_escrow_expiration
        } else {
            expiration_secs
        };
        if secs > params.max_escrow_expiration {
            return Err(StablepayError::InvalidEscrowExpiration {
                reason: format!("{secs}s exceeds maximum {}s", params.max_escrow_expiration),
            });
        }
        let expires_at = i64::try_from(secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .and_then(|delta| ctx.block_time().checked_add_signed(delta))
            .ok_or_else(|| StablepayError::InvalidEscrowExpiration {
                reason: format!("{secs}s is out of range"),
            })?;

        let (fee, net) = self.check_payment(ctx, &params, sender, recipient, amount)?;
        self.pull_into_escrow(sender, amount)?;

        let mut settlement = Self::new_settlement(
            ctx,
            SettlementType::Escrow,
            sender,
            recipient,
            amount,
            fee,
            net,
            reference,
            metadata,
        )?;
        settlement.expires_at = Some(expires_at);
        Self::insert_settlement(ctx, &settlement)?;
        ctx.store_mut()
            .set(&keys::escrow_expiry(unix_secs(expires_at), settlement.id), Vec::new());

        ctx.emit(
            Event::new("escrow_created")
                .attr("settlement_id", settlement.id.0)
                .attr("sender", sender)
                .attr("recipient", recipient)
                .attr("amount", amount)
                .attr("expires_at", expires_at.to_rfc3339()),
        );
        tracing::info!(
            id = settlement.id.0,
            sender = %sender,
            recipient = %recipient,
            amount = %amount,
            %expires_at,
            "Escrow created"
        );
        Ok(settlement.id)
    }

    fn load_escrow(ctx: &Context<'_>, id: SettlementId) -> Result<Settlement> {
        let settlement = Self::load_settlement(ctx, id)?;
        if settlement.settlement_type != SettlementType::Escrow {
            return Err(StablepayError::InvalidSettlementType {
                id,
                reason: format!("expected escrow, got {}", settlement.settlement_type),
            });
        }
        Ok(settlement)
    }

    fn drop_escrow_index(ctx: &mut Context<'_>, settlement: &Settlement) {
        if let Some(expires_at) = settlement.expires_at {
            ctx.store_mut()
                .delete(&keys::escrow_expiry(unix_secs(expires_at), settlement.id));
        }
    }

    /// Pay out a pending escrow. Original sender only.
    ///
    /// # Errors
    /// `SettlementNotFound`, `InvalidSettlementType`, `Unauthorized` or
    /// `InvalidSettlementStatus`.
    pub fn release_escrow(&mut self, ctx: &mut Context<'_>, id: SettlementId, caller: &Address) -> Result<()> {
        let mut settlement = Self::load_escrow(ctx, id)?;
        if caller != &settlement.sender {
            return Err(StablepayError::unauthorized(format!(
                "only the sender may release {id}"
            )));
        }
        settlement.ensure_pending()?;
        let params = self.params(ctx)?;

        self.pay_from_escrow(&settlement.recipient, &settlement.net_amount)?;
        self.collect_fee_from_escrow(&params, &settlement.fee)?;

        settlement.transition(SettlementStatus::Completed, ctx.height(), ctx.block_time())?;
        Self::drop_escrow_index(ctx, &settlement);
        Self::save_settlement(ctx, &settlement)?;

        ctx.emit(
            Event::new("escrow_released")
                .attr("settlement_id", id.0)
                .attr("recipient", &settlement.recipient)
                .attr("net_amount", &settlement.net_amount)
                .attr("fee", &settlement.fee),
        );
        tracing::info!(id = id.0, recipient = %settlement.recipient, net = %settlement.net_amount, "Escrow released");
        Ok(())
    }

    /// Return a pending escrow to its sender. Original recipient only.
    ///
    /// # Errors
    /// `SettlementNotFound`, `InvalidSettlementType`, `Unauthorized` or
    /// `InvalidSettlementStatus`.
    pub fn refund_escrow(
        &mut self,
        ctx: &mut Context<'_>,
        id: SettlementId,
        caller: &Address,
        reason: &str,
    ) -> Result<()> {
        check_text("reason", reason, constants::MAX_REFERENCE_LEN)?;
        let mut settlement = Self::load_escrow(ctx, id)?;
        if caller != &settlement.recipient {
            return Err(StablepayError::unauthorized(format!(
                "only the recipient may refund {id}"
            )));
        }
        settlement.ensure_pending()?;

        self.pay_from_escrow(&settlement.sender, &settlement.amount)?;

        settlement.transition(SettlementStatus::Refunded, ctx.height(), ctx.block_time())?;
        settlement.annotate("refund_reason", reason);
        Self::drop_escrow_index(ctx, &settlement);
        Self::save_settlement(ctx, &settlement)?;

        ctx.emit(
            Event::new("escrow_refunded")
                .attr("settlement_id", id.0)
                .attr("sender", &settlement.sender)
                .attr("amount", &settlement.amount)
                .attr("reason", reason),
        );
        tracing::info!(id = id.0, sender = %settlement.sender, amount = %settlement.amount, reason, "Escrow refunded");
        Ok(())
    }

    /// Return part of a settlement to its sender. Authority only.
    ///
    /// Completed settlements are refunded out of the recipient's balance;
    /// pending escrows out of the escrow account. The refund may not exceed
    /// the remaining net amount.
    ///
    /// # Errors
    /// `Unauthorized`, `SettlementNotFound`, `InvalidSettlementStatus`,
    /// `InvalidDenom`, `InvalidAmount`, `RefundExceedsRemaining` or
    /// `InsufficientFunds` when the recipient has already spent the funds.
    pub fn partial_refund(
        &mut self,
        ctx: &mut Context<'_>,
        caller: &Address,
        id: SettlementId,
        refund: &Coin,
        reason: &str,
    ) -> Result<RefundRecord> {
        self.ensure_authority(caller, "issue partial refunds")?;
        check_text("reason", reason, constants::MAX_REFERENCE_LEN)?;
        let mut settlement = Self::load_settlement(ctx, id)?;

        let escrowed = match (settlement.status, settlement.settlement_type) {
            (SettlementStatus::Completed, _) => false,
            (SettlementStatus::Pending, SettlementType::Escrow) => true,
            (status, _) => {
                return Err(StablepayError::InvalidSettlementStatus {
                    id,
                    expected: SettlementStatus::Completed,
                    actual: status,
                });
            }
        };
        refund.require_denom(&settlement.amount.denom)?;
        if refund.amount > settlement.net_amount.amount {
            return Err(StablepayError::RefundExceedsRemaining {
                amount: refund.amount,
                remaining: settlement.net_amount.amount,
            });
        }

        settlement.net_amount = settlement.net_amount.checked_sub(refund)?;
        settlement.amount = settlement.amount.checked_sub(refund)?;
        let mut returned = refund.clone();
        let exhausted = settlement.net_amount.is_zero();
        if escrowed && exhausted {
            // Nothing left to release, so the held fee goes back too.
            returned = returned.checked_add(&settlement.fee)?;
            settlement.amount = settlement.amount.checked_sub(&settlement.fee)?;
            settlement.fee = Coin::zero(settlement.fee.denom.clone());
        }

        if escrowed {
            self.pay_from_escrow(&settlement.sender, &returned)?;
        } else {
            self.bank.send_coins(&settlement.recipient, &settlement.sender, &returned)?;
        }

        settlement.refunded_amount = settlement.refunded_amount.checked_add(&returned)?;
        if exhausted {
            settlement.status = SettlementStatus::Refunded;
            settlement.settled_height = Some(ctx.height());
            settlement.settled_at = Some(ctx.block_time());
            if escrowed {
                Self::drop_escrow_index(ctx, &settlement);
            }
        }

        let index = u32::try_from(ctx.store().prefix_iter(&keys::refund_prefix(id)).len())
            .map_err(|_| StablepayError::Internal("refund trail too long".into()))?;
        let record = RefundRecord {
            settlement_id: id,
            index,
            amount: returned,
            reason: reason.to_string(),
            authority: caller.clone(),
            height: ctx.height(),
            time: ctx.block_time(),
        };
        set_json(ctx.store_mut(), &keys::refund(id, index), &record)?;
        Self::save_settlement(ctx, &settlement)?;

        ctx.emit(
            Event::new("partial_refund")
                .attr("settlement_id", id.0)
                .attr("amount", &record.amount)
                .attr("remaining", &settlement.net_amount)
                .attr("status", settlement.status)
                .attr("reason", reason),
        );
        tracing::info!(
            id = id.0,
            refunded = %record.amount,
            remaining = %settlement.net_amount,
            status = %settlement.status,
            "Partial refund issued"
        );
        Ok(record)
    }

    /// Pay a registered, active merchant, instantly or through escrow.
    ///
    /// # Errors
    /// `MerchantNotFound`, `MerchantInactive`, `InvalidCheckoutItems`, or
    /// any error of the underlying transfer.
    pub fn instant_checkout(&mut self, ctx: &mut Context<'_>, checkout: &Checkout) -> Result<CheckoutResult> {
        let merchant = Self::find_merchant(ctx, &checkout.merchant)?
            .ok_or_else(|| StablepayError::MerchantNotFound(checkout.merchant.to_string()))?;
        if !merchant.is_active {
            return Err(StablepayError::MerchantInactive(checkout.merchant.to_string()));
        }
        if !checkout.items.is_empty() {
            let total = items_total(&checkout.items)?;
            if total != checkout.amount.amount {
                return Err(StablepayError::InvalidCheckoutItems {
                    reason: format!("items total {total} != amount {}", checkout.amount.amount),
                });
            }
        }

        let id = if checkout.use_escrow {
            self.create_escrow(
                ctx,
                &checkout.customer,
                &checkout.merchant,
                &checkout.amount,
                &checkout.order_reference,
                &checkout.metadata,
                0,
            )?
        } else {
            self.instant_transfer(
                ctx,
                &checkout.customer,
                &checkout.merchant,
                &checkout.amount,
                &checkout.order_reference,
                &checkout.metadata,
            )?
        };
        let settlement = Self::load_settlement(ctx, id)?;
        ctx.emit(
            Event::new("checkout")
                .attr("settlement_id", id.0)
                .attr("merchant", &checkout.merchant)
                .attr("order_reference", &checkout.order_reference)
                .attr("escrow", checkout.use_escrow),
        );
        Ok(CheckoutResult {
            settlement_id: id,
            net_amount: settlement.net_amount,
            fee: settlement.fee,
            escrowed: checkout.use_escrow,
        })
    }

    /// Cancel every pending escrow whose expiry is at or before the block
    /// time and return the funds to the sender. Returns how many expired.
    ///
    /// Each escrow runs on its own store branch: a failure is logged and
    /// the sweep moves on.
    pub fn process_expired_escrows(&mut self, ctx: &mut Context<'_>) -> usize {
        let now = unix_secs(ctx.block_time());
        let due: Vec<(Vec<u8>, SettlementId)> = ctx
            .store()
            .prefix_iter(keys::ESCROW_EXPIRY_PREFIX)
            .into_iter()
            .filter_map(|(key, _)| {
                let (expires, id) = keys::split_expiry(keys::ESCROW_EXPIRY_PREFIX, &key)?;
                Some((key, expires, SettlementId(id)))
            })
            .take_while(|(_, expires, _)| *expires <= now)
            .map(|(key, _, id)| (key, id))
            .collect();
        tracing::debug!(candidates = due.len(), "Scanning expired escrows");

        let mut expired = 0;
        for (key, id) in due {
            match ctx.branch(|inner| self.expire_escrow(inner, &key, id)) {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(id = id.0, error = %err, "Failed to expire escrow, skipping");
                }
            }
        }
        expired
    }

    fn expire_escrow(&mut self, ctx: &mut Context<'_>, index_key: &[u8], id: SettlementId) -> Result<bool> {
        let mut settlement = Self::load_settlement(ctx, id)?;
        if settlement.status != SettlementStatus::Pending {
            // Stale index entry.
            ctx.store_mut().delete(index_key);
            return Ok(false);
        }
        let expires_at = settlement.expires_at.ok_or_else(|| {
            StablepayError::StoreCorruption(format!("{id} indexed for expiry without expires_at"))
        })?;
        if expires_at > ctx.block_time() {
            return Ok(false);
        }

        self.pay_from_escrow(&settlement.sender, &settlement.amount)?;
        settlement.transition(SettlementStatus::Cancelled, ctx.height(), ctx.block_time())?;
        settlement.annotate("expired", &ctx.block_time().to_rfc3339());
        ctx.store_mut().delete(index_key);
        Self::save_settlement(ctx, &settlement)?;

        ctx.emit(
            Event::new("escrow_expired")
                .attr("settlement_id", id.0)
                .attr("sender", &settlement.sender)
                .attr("amount", &settlement.amount),
        );
        tracing::info!(id = id.0, sender = %settlement.sender, amount = %settlement.amount, "Escrow expired");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};
    use stablepay_types::{BlockHeader, MemStore};

    use super::*;
    use crate::mock::{MemAccounts, MemBank, StaticCompliance};

    type Keeper = SettlementKeeper<MemBank, StaticCompliance, MemAccounts>;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn ssusd(n: u128) -> Coin {
        Coin::new("ssusd", n)
    }

    fn setup(store: &mut MemStore) -> Keeper {
        let mut keeper = Keeper::new(addr("stable1gov"), MemBank::new(), StaticCompliance::new(), MemAccounts::new());
        keeper.bank_mut().fund(&addr("stable1alice"), &ssusd(10_000_000));
        let mut ctx = Context::new(BlockHeader::new("stablepay-test", 1, Utc::now()), store);
        keeper.init_genesis(&mut ctx, &Params::default()).unwrap();
        keeper
    }

    #[test]
    fn instant_transfer_splits_fee() {
        let mut store = MemStore::new();
        let mut keeper = setup(&mut store);
        let mut ctx = Context::new(BlockHeader::new("stablepay-test", 2, Utc::now()), &mut store);
        let alice = addr("stable1alice");
        let bob = addr("stable1bob");

        let id = keeper
            .instant_transfer(&mut ctx, &alice, &bob, &ssusd(1_000_000), "REF1", "")
            .unwrap();
        assert_eq!(id, SettlementId(1));

        let s = Keeper::load_settlement(&ctx, id).unwrap();
        assert_eq!(s.fee.amount, 5_000);
        assert_eq!(s.net_amount.amount, 995_000);
        assert_eq!(s.status, SettlementStatus::Completed);
        assert_eq!(s.settled_height, Some(2));
        assert!(s.is_balanced());
        assert_eq!(keeper.bank().balance(&bob, "ssusd").amount, 995_000);
        assert_eq!(
            keeper.bank().module_balance(constants::FEE_COLLECTOR_MODULE_ACCOUNT, "ssusd"),
            5_000
        );
    }

    #[test]
    fn instant_transfer_rejections_leave_no_trace() {
        let mut store = MemStore::new();
        let mut keeper = setup(&mut store);
        let mut ctx = Context::new(BlockHeader::new("stablepay-test", 2, Utc::now()), &mut store);
        let alice = addr("stable1alice");
        let bob = addr("stable1bob");

        assert_eq!(
            keeper.instant_transfer(&mut ctx, &alice, &alice, &ssusd(5_000), "", ""),
            Err(StablepayError::InvalidRecipient)
        );
        assert!(matches!(
            keeper.instant_transfer(&mut ctx, &alice, &bob, &Coin::new("uatom", 5_000), "", ""),
            Err(StablepayError::InvalidDenom { .. })
        ));
        assert!(matches!(
            keeper.instant_transfer(&mut ctx, &alice, &bob, &ssusd(999), "", ""),
            Err(StablepayError::SettlementTooSmall { min: 1_000, .. })
        ));
        assert!(matches!(
            keeper.instant_transfer(&mut ctx, &alice, &bob, &ssusd(20_000_000), "", ""),
            Err(StablepayError::InsufficientFunds { .. })
        ));
        keeper.compliance_mut().block(&alice);
        assert!(matches!(
            keeper.instant_transfer(&mut ctx, &alice, &bob, &ssusd(5_000), "", ""),
            Err(StablepayError::ComplianceCheckFailed { .. })
        ));

        assert_eq!(keeper.bank().balance(&alice, "ssusd").amount, 10_000_000);
        assert!(ctx.store().prefix_iter(keys::SETTLEMENT_PREFIX).is_empty());
    }

    #[test]
    fn disabled_feature_is_rejected() {
        let mut store = MemStore::new();
        let mut keeper = setup(&mut store);
        let mut ctx = Context::new(BlockHeader::new("stablepay-test", 2, Utc::now()), &mut store);
        let params = Params {
            instant_enabled: false,
            escrow_enabled: false,
            ..Params::default()
        };
        keeper.update_params(&mut ctx, &addr("stable1gov"), &params).unwrap();
        let (alice, bob) = (addr("stable1alice"), addr("stable1bob"));
        assert!(matches!(
            keeper.instant_transfer(&mut ctx, &alice, &bob, &ssusd(5_000), "", ""),
            Err(StablepayError::FeatureDisabled(_))
        ));
        assert!(matches!(
            keeper.create_escrow(&mut ctx, &alice, &bob, &ssusd(5_000), "", "", 0),
            Err(StablepayError::FeatureDisabled(_))
        ));
    }

    #[test]
    fn escrow_expiration_window() {
        let mut store = MemStore::new();
        let mut keeper = setup(&mut store);
        let now = Utc::now();
        let mut ctx = Context::new(BlockHeader::new("stablepay-test", 2, now), &mut store);
        let (alice, bob) = (addr("stable1alice"), addr("stable1bob"));

        let err = keeper
            .create_escrow(&mut ctx, &alice, &bob, &ssusd(5_000), "", "", constants::MAX_ESCROW_EXPIRATION_SECS + 1)
            .unwrap_err();
        assert!(matches!(err, StablepayError::InvalidEscrowExpiration { .. }));

        let id = keeper.create_escrow(&mut ctx, &alice, &bob, &ssusd(5_000), "", "", 0).unwrap();
        let s = Keeper::load_settlement(&ctx, id).unwrap();
        let default = TimeDelta::seconds(i64::try_from(constants::DEFAULT_ESCROW_EXPIRATION_SECS).unwrap());
        assert_eq!(s.expires_at, Some(now + default));
        assert_eq!(s.status, SettlementStatus::Pending);
        assert_eq!(keeper.bank().module_balance(constants::SETTLEMENT_MODULE_ACCOUNT, "ssusd"), 5_000);
    }

    #[test]
    fn release_and_refund_are_role_gated() {
        let mut store = MemStore::new();
        let mut keeper = setup(&mut store);
        let mut ctx = Context::new(BlockHeader::new("stablepay-test", 2, Utc::now()), &mut store);
        let (alice, bob) = (addr("stable1alice"), addr("stable1bob"));
        let id = keeper.create_escrow(&mut ctx, &alice, &bob, &ssusd(10_000), "", "", 60).unwrap();

        assert!(matches!(
            keeper.release_escrow(&mut ctx, id, &bob),
            Err(StablepayError::Unauthorized { .. })
        ));
        assert!(matches!(
            keeper.refund_escrow(&mut ctx, id, &alice, "changed my mind"),
            Err(StablepayError::Unauthorized { .. })
        ));

        keeper.refund_escrow(&mut ctx, id, &bob, "out of stock").unwrap();
        let s = Keeper::load_settlement(&ctx, id).unwrap();
        assert_eq!(s.status, SettlementStatus::Refunded);
        assert!(s.metadata.contains("out of stock"));
        assert_eq!(keeper.bank().balance(&alice, "ssusd").amount, 10_000_000);
        assert!(ctx.store().prefix_iter(keys::ESCROW_EXPIRY_PREFIX).is_empty());

        // Terminal: neither path works again.
        assert!(matches!(
            keeper.release_escrow(&mut ctx, id, &alice),
            Err(StablepayError::InvalidSettlementStatus { .. })
        ));
        assert!(matches!(
            keeper.refund_escrow(&mut ctx, id, &bob, "again"),
            Err(StablepayError::InvalidSettlementStatus { .. })
        ));
    }

    #[test]
    fn release_rejects_non_escrow() {
        let mut store = MemStore::new();
        let mut keeper = setup(&mut store);
        let mut ctx = Context::new(BlockHeader::new("stablepay-test", 2, Utc::now()), &mut store);
        let (alice, bob) = (addr("stable1alice"), addr("stable1bob"));
        let id = keeper.instant_transfer(&mut ctx, &alice, &bob, &ssusd(5_000), "", "").unwrap();
        assert!(matches!(
            keeper.release_escrow(&mut ctx, id, &alice),
            Err(StablepayError::InvalidSettlementType { .. })
        ));
        assert!(matches!(
            keeper.release_escrow(&mut ctx, SettlementId(99), &alice),
            Err(StablepayError::SettlementNotFound(SettlementId(99)))
        ));
    }

    #[test]
    fn partial_refund_of_completed_transfer() {
        let mut store = MemStore::new();
        let mut keeper = setup(&mut store);
        let mut ctx = Context::new(BlockHeader::new("stablepay-test", 2, Utc::now()), &mut store);
        let (gov, alice, bob) = (addr("stable1gov"), addr("stable1alice"), addr("stable1bob"));
        let id = keeper.instant_transfer(&mut ctx, &alice, &bob, &ssusd(100_000), "", "").unwrap();

        assert!(matches!(
            keeper.partial_refund(&mut ctx, &alice, id, &ssusd(10), "x"),
            Err(StablepayError::Unauthorized { .. })
        ));
        assert!(matches!(
            keeper.partial_refund(&mut ctx, &gov, id, &ssusd(99_501), "x"),
            Err(StablepayError::RefundExceedsRemaining { remaining: 99_500, .. })
        ));

        let rec = keeper.partial_refund(&mut ctx, &gov, id, &ssusd(40_000), "damaged").unwrap();
        assert_eq!(rec.index, 0);
        let s = Keeper::load_settlement(&ctx, id).unwrap();
        assert_eq!(s.status, SettlementStatus::Completed);
        assert_eq!(s.net_amount.amount, 59_500);
        assert_eq!(s.refunded_amount.amount, 40_000);
        assert!(s.is_balanced());

        let rec = keeper.partial_refund(&mut ctx, &gov, id, &ssusd(59_500), "returned").unwrap();
        assert_eq!(rec.index, 1);
        let s = Keeper::load_settlement(&ctx, id).unwrap();
        assert_eq!(s.status, SettlementStatus::Refunded);
        assert_eq!(keeper.bank().balance(&bob, "ssusd").amount, 0);
        assert_eq!(keeper.bank().balance(&alice, "ssusd").amount, 10_000_000 - 500);
    }

    #[test]
    fn partial_refund_of_escrow_returns_fee_when_exhausted() {
        let mut store = MemStore::new();
        let mut keeper = setup(&mut store);
        let mut ctx = Context::new(BlockHeader::new("stablepay-test", 2, Utc::now()), &mut store);
        let (gov, alice, bob) = (addr("stable1gov"), addr("stable1alice"), addr("stable1bob"));
        let id = keeper.create_escrow(&mut ctx, &alice, &bob, &ssusd(100_000), "", "", 0).unwrap();

        keeper.partial_refund(&mut ctx, &gov, id, &ssusd(99_500), "cancelled").unwrap();
        let s = Keeper::load_settlement(&ctx, id).unwrap();
        assert_eq!(s.status, SettlementStatus::Refunded);
        assert_eq!(s.refunded_amount.amount, 100_000);
        assert!(s.is_balanced());
        assert_eq!(keeper.bank().balance(&alice, "ssusd").amount, 10_000_000);
        assert_eq!(keeper.bank().module_balance(constants::SETTLEMENT_MODULE_ACCOUNT, "ssusd"), 0);
        assert!(ctx.store().prefix_iter(keys::ESCROW_EXPIRY_PREFIX).is_empty());
    }

    #[test]
    fn checkout_requires_active_merchant_and_matching_items() {
        let mut store = MemStore::new();
        let mut keeper = setup(&mut store);
        let mut ctx = Context::new(BlockHeader::new("stablepay-test", 2, Utc::now()), &mut store);
        let shop = addr("stable1shop");
        let mut checkout = Checkout {
            customer: addr("stable1alice"),
            merchant: shop.clone(),
            amount: ssusd(30_000),
            order_reference: "ORDER-7".into(),
            use_escrow: false,
            items: vec![
                CheckoutItem { sku: "mug".into(), quantity: 2, unit_price: 10_000 },
                CheckoutItem { sku: "tea".into(), quantity: 1, unit_price: 10_000 },
            ],
            metadata: String::new(),
        };
        assert!(matches!(
            keeper.instant_checkout(&mut ctx, &checkout),
            Err(StablepayError::MerchantNotFound(_))
        ));

        let config = stablepay_types::MerchantConfig {
            address: shop.clone(),
            name: "Corner Shop".into(),
            fee_rate_bps: Some(100),
            min_settlement: 0,
            max_settlement: 0,
            batch_enabled: false,
            batch_threshold: 0,
            webhook_url: None,
            is_active: false,
            registered_at: Utc::now(),
        };
        keeper.register_merchant(&mut ctx, &shop, config).unwrap();
        let res = keeper.instant_checkout(&mut ctx, &checkout).unwrap();
        assert_eq!(res.fee.amount, 300);
        assert_eq!(res.net_amount.amount, 29_700);
        assert!(!res.escrowed);

        checkout.items[1].quantity = 2;
        assert!(matches!(
            keeper.instant_checkout(&mut ctx, &checkout),
            Err(StablepayError::InvalidCheckoutItems { .. })
        ));
    }

    #[test]
    fn sweep_expires_only_due_escrows() {
        let mut store = MemStore::new();
        let mut keeper = setup(&mut store);
        let t0 = Utc::now();
        let (alice, bob) = (addr("stable1alice"), addr("stable1bob"));
        let (short, long) = {
            let mut ctx = Context::new(BlockHeader::new("stablepay-test", 2, t0), &mut store);
            (
                keeper.create_escrow(&mut ctx, &alice, &bob, &ssusd(5_000), "", "", 60).unwrap(),
                keeper.create_escrow(&mut ctx, &alice, &bob, &ssusd(7_000), "", "", 3_600).unwrap(),
            )
        };

        let mut ctx = Context::new(BlockHeader::new("stablepay-test", 3, t0 + TimeDelta::seconds(60)), &mut store);
        assert_eq!(keeper.process_expired_escrows(&mut ctx), 1);
        let s = Keeper::load_settlement(&ctx, short).unwrap();
        assert_eq!(s.status, SettlementStatus::Cancelled);
        assert!(s.metadata.contains("expired"));
        assert_eq!(Keeper::load_settlement(&ctx, long).unwrap().status, SettlementStatus::Pending);
        assert_eq!(keeper.bank().balance(&alice, "ssusd").amount, 10_000_000 - 7_000);

        // Nothing left to do at the same time.
        assert_eq!(keeper.process_expired_escrows(&mut ctx), 0);
    }
}
