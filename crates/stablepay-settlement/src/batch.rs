//! Batch settlement engine.
//!
//! A batch is created up front with one pending settlement per payer and
//! no funds moving. Settling it pulls every payer's amount into escrow,
//! then pays the merchant and the fee collector in one step:
//!
//! ```text
//! CreateBatch ──▶ PENDING ──SettleBatch──▶ pull all ──ok──▶ pay out ──▶ COMPLETED
//!                    ▲                        │
//!                    └──── refund pulled ◀────┘ any pull fails
//! ```

use stablepay_types::{
    AccountKeeper, Address, BankKeeper, BatchId, BatchSettlement, BatchStatus, ClaimVerifier,
    Coin, ComplianceKeeper, Context, Event, Result, Settlement, SettlementId, SettlementStatus,
    SettlementType, StablepayError,
};

use crate::keeper::{SettlementKeeper, keys};
use crate::ledger::check_text;

/// Sum the gross, fee and net columns of `members`.
fn totals(denom: &str, members: &[Settlement]) -> Result<(Coin, Coin, Coin)> {
    let zero = Coin::zero(denom);
    members.iter().try_fold(
        (zero.clone(), zero.clone(), zero),
        |(amount, fee, net), s| {
            Ok((
                amount.checked_add(&s.amount)?,
                fee.checked_add(&s.fee)?,
                net.checked_add(&s.net_amount)?,
            ))
        },
    )
}

impl<B, C, A, V> SettlementKeeper<B, C, A, V>
where
    B: BankKeeper,
    C: ComplianceKeeper,
    A: AccountKeeper,
    V: ClaimVerifier,
{
    /// Record a pending batch of payments from `senders` to `merchant`.
    /// Authority only. `references` may be empty, otherwise it must line up
    /// with `senders`.
    ///
    /// # Errors
    /// `Unauthorized`, `InvalidBatch`, `InvalidDenom` or `InvalidAmount`.
    pub fn create_batch(
        &mut self,
        ctx: &mut Context<'_>,
        caller: &Address,
        merchant: &Address,
        senders: &[Address],
        amounts: &[Coin],
        references: &[String],
    ) -> Result<(BatchId, Vec<SettlementId>)> {
        self.ensure_authority(caller, "create batches")?;
        let params = self.params(ctx)?;

        let invalid = |reason: String| StablepayError::InvalidBatch { reason };
        if senders.is_empty() {
            return Err(invalid("batch is empty".into()));
        }
        if senders.len() != amounts.len() {
            return Err(invalid(format!(
                "{} senders but {} amounts",
                senders.len(),
                amounts.len()
            )));
        }
        if !references.is_empty() && references.len() != senders.len() {
            return Err(invalid(format!(
                "{} senders but {} references",
                senders.len(),
                references.len()
            )));
        }
        let max = usize::try_from(params.max_batch_size).unwrap_or(usize::MAX);
        if senders.len() > max {
            return Err(invalid(format!(
                "{} entries exceeds maximum {max}",
                senders.len()
            )));
        }
        for (sender, amount) in senders.iter().zip(amounts) {
            if sender == merchant {
                return Err(invalid(format!("merchant {merchant} cannot pay itself")));
            }
            amount.require_denom(&params.stablecoin_denom)?;
        }
        for reference in references {
            check_text("reference", reference, stablepay_types::constants::MAX_REFERENCE_LEN)?;
        }

        let bps = Self::fee_rate_for(ctx, &params, merchant)?;
        let batch_id = BatchId(Self::next_sequence(ctx, keys::SEQ_BATCH)?);
        let mut members = Vec::with_capacity(senders.len());
        for (i, (sender, amount)) in senders.iter().zip(amounts).enumerate() {
            let (fee, net) = Self::split_fee(amount, bps)?;
            let id = SettlementId(Self::next_sequence(ctx, keys::SEQ_SETTLEMENT)?);
            let settlement = Settlement {
                id,
                settlement_type: SettlementType::Batch,
                sender: sender.clone(),
                recipient: merchant.clone(),
                amount: amount.clone(),
                fee,
                net_amount: net,
                status: SettlementStatus::Pending,
                reference: references.get(i).cloned().unwrap_or_default(),
                metadata: String::new(),
                created_height: ctx.height(),
                created_at: ctx.block_time(),
                settled_height: None,
                settled_at: None,
                expires_at: None,
                batch_id: Some(batch_id),
                refunded_amount: Coin::zero(amount.denom.clone()),
            };
            Self::insert_settlement(ctx, &settlement)?;
            members.push(settlement);
        }

        let (total_amount, total_fees, net_amount) = totals(&params.stablecoin_denom, &members)?;
        let ids: Vec<SettlementId> = members.iter().map(|s| s.id).collect();
        let batch = BatchSettlement {
            id: batch_id,
            merchant: merchant.clone(),
            settlement_ids: ids.clone(),
            total_amount,
            total_fees,
            net_amount,
            count: u32::try_from(ids.len()).map_err(|_| invalid("batch too large".into()))?,
            status: BatchStatus::Pending,
            created_height: ctx.height(),
            created_at: ctx.block_time(),
            settled_height: None,
            settled_at: None,
        };
        Self::save_batch(ctx, &batch)?;

        ctx.emit(
            Event::new("batch_created")
                .attr("batch_id", batch_id.0)
                .attr("merchant", merchant)
                .attr("count", batch.count)
                .attr("total_amount", &batch.total_amount),
        );
        tracing::info!(
            batch = batch_id.0,
            merchant = %merchant,
            count = batch.count,
            total = %batch.total_amount,
            "Batch created"
        );
        Ok((batch_id, ids))
    }

    /// Collect and pay out a pending batch. Authority only.
    ///
    /// If any payer cannot be charged, every amount already pulled is
    /// returned and the batch stays pending for a later retry.
    ///
    /// # Errors
    /// `Unauthorized`, `BatchNotFound`, `BatchAlreadySettled`, or the
    /// compliance / funds error of the first payer that failed.
    pub fn settle_batch(&mut self, ctx: &mut Context<'_>, batch_id: BatchId, caller: &Address) -> Result<BatchSettlement> {
        self.ensure_authority(caller, "settle batches")?;
        let mut batch = Self::load_batch(ctx, batch_id)?;
        if !batch.is_pending() {
            return Err(StablepayError::BatchAlreadySettled(batch_id));
        }
        let params = self.params(ctx)?;
        let members = batch
            .settlement_ids
            .iter()
            .map(|id| Self::load_settlement(ctx, *id))
            .collect::<Result<Vec<_>>>()?;
        for member in &members {
            member.ensure_pending()?;
        }

        let mut pulled: Vec<&Settlement> = Vec::with_capacity(members.len());
        for member in &members {
            let charged = self
                .compliance
                .assert_compliant(&member.sender)
                .and_then(|()| self.pull_into_escrow(&member.sender, &member.amount));
            if let Err(err) = charged {
                tracing::warn!(
                    batch = batch_id.0,
                    settlement = member.id.0,
                    sender = %member.sender,
                    error = %err,
                    "Batch member could not be charged, unwinding"
                );
                for done in pulled.iter().rev() {
                    if let Err(undo) = self.pay_from_escrow(&done.sender, &done.amount) {
                        tracing::error!(
                            batch = batch_id.0,
                            settlement = done.id.0,
                            error = %undo,
                            "Failed to return pulled batch funds"
                        );
                    }
                }
                return Err(err);
            }
            pulled.push(member);
        }

        let (total_amount, total_fees, net_amount) = totals(&batch.total_amount.denom, &members)?;
        self.pay_from_escrow(&batch.merchant, &net_amount)?;
        self.collect_fee_from_escrow(&params, &total_fees)?;

        let (height, time) = (ctx.height(), ctx.block_time());
        for mut member in members {
            member.transition(SettlementStatus::Completed, height, time)?;
            Self::save_settlement(ctx, &member)?;
        }
        batch.total_amount = total_amount;
        batch.total_fees = total_fees;
        batch.net_amount = net_amount;
        batch.status = BatchStatus::Completed;
        batch.settled_height = Some(height);
        batch.settled_at = Some(time);
        Self::save_batch(ctx, &batch)?;

        ctx.emit(
            Event::new("batch_settled")
                .attr("batch_id", batch_id.0)
                .attr("merchant", &batch.merchant)
                .attr("net_amount", &batch.net_amount)
                .attr("total_fees", &batch.total_fees),
        );
        tracing::info!(
            batch = batch_id.0,
            merchant = %batch.merchant,
            net = %batch.net_amount,
            fees = %batch.total_fees,
            "Batch settled"
        );
        Ok(batch)
    }
}
