//! Payment channel engine.
//!
//! A sender escrows a deposit for a fixed number of blocks. The recipient
//! redeems signed vouchers against it, each with a strictly larger nonce.
//! After expiry the sender (or the block-end sweep) closes the channel
//! and whatever is left goes back to the sender.

use stablepay_types::{
    AccountKeeper, Address, BankKeeper, ChannelId, ClaimVerifier, Coin, ComplianceKeeper, Context,
    Event, KvStore, PaymentChannel, Result, StablepayError,
};

use crate::keeper::{SettlementKeeper, keys};

/// A signed voucher presented by the channel recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim<'a> {
    pub channel_id: ChannelId,
    pub recipient: &'a Address,
    /// Incremental amount paid out by this claim.
    pub amount: &'a Coin,
    pub nonce: u64,
    pub signature: &'a [u8],
}

impl<B, C, A, V> SettlementKeeper<B, C, A, V>
where
    B: BankKeeper,
    C: ComplianceKeeper,
    A: AccountKeeper,
    V: ClaimVerifier,
{
    /// Escrow `deposit` into a new channel expiring `expires_in_blocks`
    /// after the current height.
    ///
    /// # Errors
    /// `FeatureDisabled`, `InvalidRecipient`, `InvalidDenom`,
    /// `InvalidAmount`, `InvalidChannelExpiration`, `ComplianceCheckFailed`
    /// or `InsufficientFunds`.
    pub fn open_channel(
        &mut self,
        ctx: &mut Context<'_>,
        sender: &Address,
        recipient: &Address,
        deposit: &Coin,
        expires_in_blocks: u64,
    ) -> Result<ChannelId> {
        let params = self.params(ctx)?;
        if !params.channels_enabled {
            return Err(StablepayError::FeatureDisabled("payment channels"));
        }
        if sender == recipient {
            return Err(StablepayError::InvalidRecipient);
        }
        deposit.require_denom(&params.stablecoin_denom)?;
        if expires_in_blocks == 0 {
            return Err(StablepayError::InvalidChannelExpiration {
                reason: "expiration must be positive".into(),
            });
        }
        if expires_in_blocks < params.min_channel_expiration
            || expires_in_blocks > params.max_channel_expiration
        {
            return Err(StablepayError::InvalidChannelExpiration {
                reason: format!(
                    "{expires_in_blocks} blocks outside [{}, {}]",
                    params.min_channel_expiration, params.max_channel_expiration
                ),
            });
        }
        let expires_at_height = ctx.height().checked_add(expires_in_blocks).ok_or_else(|| {
            StablepayError::InvalidChannelExpiration {
                reason: "expiry height overflows".into(),
            }
        })?;
        self.compliance.assert_compliant(sender)?;
        self.ensure_balance(sender, deposit)?;

        self.pull_into_escrow(sender, deposit)?;

        let id = ChannelId(Self::next_sequence(ctx, keys::SEQ_CHANNEL)?);
        let channel = PaymentChannel {
            id,
            sender: sender.clone(),
            recipient: recipient.clone(),
            deposit: deposit.clone(),
            spent: Coin::zero(deposit.denom.clone()),
            balance: deposit.clone(),
            is_open: true,
            opened_height: ctx.height(),
            opened_at: ctx.block_time(),
            closed_height: None,
            closed_at: None,
            expires_at_height,
            nonce: 0,
        };
        Self::save_channel(ctx, &channel)?;
        ctx.store_mut()
            .set(&keys::channel_expiry(expires_at_height, id), Vec::new());

        ctx.emit(
            Event::new("channel_opened")
                .attr("channel_id", id.0)
                .attr("sender", sender)
                .attr("recipient", recipient)
                .attr("deposit", deposit)
                .attr("expires_at_height", expires_at_height),
        );
        tracing::info!(
            channel = id.0,
            sender = %sender,
            recipient = %recipient,
            deposit = %deposit,
            expires_at_height,
            "Channel opened"
        );
        Ok(id)
    }

    /// Redeem a signed voucher. Pays `amount` to the recipient.
    ///
    /// # Errors
    /// `ChannelNotFound`, `Unauthorized` (not the recipient),
    /// `ChannelClosed`, `InvalidNonce`, `InvalidAmount`,
    /// `ClaimExceedsBalance`, `PubKeyNotFound` or `InvalidSignature`.
    pub fn claim_channel(&mut self, ctx: &mut Context<'_>, claim: &Claim<'_>) -> Result<PaymentChannel> {
        let mut channel = Self::load_channel(ctx, claim.channel_id)?;
        if claim.recipient != &channel.recipient {
            return Err(StablepayError::unauthorized(format!(
                "{} is not the recipient of {}",
                claim.recipient, channel.id
            )));
        }
        channel.ensure_open()?;
        if claim.nonce <= channel.nonce {
            tracing::warn!(channel = channel.id.0, got = claim.nonce, current = channel.nonce, "Replayed channel claim");
            return Err(StablepayError::InvalidNonce {
                got: claim.nonce,
                current: channel.nonce,
            });
        }
        claim.amount.require_denom(&channel.deposit.denom)?;

        let mut next = channel.clone();
        next.apply_claim(claim.amount, claim.nonce)?;

        let pub_key = self
            .accounts
            .pub_key(&channel.sender)
            .ok_or_else(|| StablepayError::PubKeyNotFound(channel.sender.to_string()))?;
        let valid = self.verifier.verify_claim(
            channel.id,
            claim.recipient,
            claim.amount.amount,
            claim.nonce,
            claim.signature,
            &pub_key,
        );
        if !valid {
            tracing::warn!(
                channel = channel.id.0,
                signature = %hex::encode(claim.signature),
                "Channel claim signature rejected"
            );
            return Err(StablepayError::InvalidSignature);
        }

        self.pay_from_escrow(&channel.recipient, claim.amount)?;
        channel = next;
        Self::save_channel(ctx, &channel)?;

        ctx.emit(
            Event::new("channel_claimed")
                .attr("channel_id", channel.id.0)
                .attr("recipient", &channel.recipient)
                .attr("amount", claim.amount)
                .attr("nonce", claim.nonce)
                .attr("balance", &channel.balance)
                .attr("signature", hex::encode(claim.signature)),
        );
        tracing::info!(
            channel = channel.id.0,
            amount = %claim.amount,
            nonce = claim.nonce,
            balance = %channel.balance,
            "Channel claim paid"
        );
        Ok(channel)
    }

    /// Close an expired channel and refund the remainder. Sender only.
    ///
    /// # Errors
    /// `ChannelNotFound`, `Unauthorized`, `ChannelClosed` or
    /// `ChannelNotExpired`.
    pub fn close_channel(&mut self, ctx: &mut Context<'_>, id: ChannelId, caller: &Address) -> Result<Coin> {
        let channel = Self::load_channel(ctx, id)?;
        if caller != &channel.sender {
            return Err(StablepayError::unauthorized(format!(
                "only the sender may close {id}"
            )));
        }
        channel.ensure_open()?;
        if !channel.is_expired_at(ctx.height()) {
            return Err(StablepayError::ChannelNotExpired {
                id,
                height: ctx.height(),
                expires_at: channel.expires_at_height,
            });
        }
        let refunded = self.settle_close(ctx, channel)?;
        tracing::info!(channel = id.0, refunded = %refunded, "Channel closed by sender");
        Ok(refunded)
    }

    fn settle_close(&mut self, ctx: &mut Context<'_>, mut channel: PaymentChannel) -> Result<Coin> {
        let refund = channel.balance.clone();
        self.pay_from_escrow(&channel.sender, &refund)?;
        channel.close(ctx.height(), ctx.block_time())?;
        ctx.store_mut()
            .delete(&keys::channel_expiry(channel.expires_at_height, channel.id));
        Self::save_channel(ctx, &channel)?;

        ctx.emit(
            Event::new("channel_closed")
                .attr("channel_id", channel.id.0)
                .attr("sender", &channel.sender)
                .attr("refunded", &refund)
                .attr("spent", &channel.spent),
        );
        Ok(refund)
    }

    /// Force-close every open channel whose expiry height is below the
    /// current height. Returns how many closed. Failures are logged and
    /// skipped.
    pub fn process_expired_channels(&mut self, ctx: &mut Context<'_>) -> usize {
        let height = ctx.height();
        let due: Vec<(Vec<u8>, ChannelId)> = ctx
            .store()
            .prefix_iter(keys::CHANNEL_EXPIRY_PREFIX)
            .into_iter()
            .filter_map(|(key, _)| {
                let (expires, id) = keys::split_expiry(keys::CHANNEL_EXPIRY_PREFIX, &key)?;
                Some((key, expires, ChannelId(id)))
            })
            .take_while(|(_, expires, _)| *expires < height)
            .map(|(key, _, id)| (key, id))
            .collect();
        tracing::debug!(height, candidates = due.len(), "Scanning expired channels");

        let mut closed = 0;
        for (key, id) in due {
            let outcome = ctx.branch(|inner| {
                let channel = Self::load_channel(inner, id)?;
                if !channel.is_open {
                    inner.store_mut().delete(&key);
                    return Ok(None);
                }
                self.settle_close(inner, channel).map(Some)
            });
            match outcome {
                Ok(Some(refund)) => {
                    closed += 1;
                    tracing::info!(channel = id.0, refunded = %refund, "Expired channel force-closed");
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(channel = id.0, error = %err, "Failed to close expired channel, skipping");
                }
            }
        }
        closed
    }
}
