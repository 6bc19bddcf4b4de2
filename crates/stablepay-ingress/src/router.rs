//! Transaction router.
//!
//! Every transaction goes through the same gate:
//!
//! ```text
//! Tx → MsgRegistry.decode() → validate_basic() → FeeChecker.check_tx_fee()
//!    → ctx.branch(execute) → TxResult
//! ```
//!
//! Execution runs on a cached branch of the store, so a failing message
//! leaves no writes and no events behind. Fee deduction itself belongs to
//! the host's auth layer; the router only enforces the price floor and
//! counts the gas toward the block total used by [`Router::end_block`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use stablepay_feemarket::{FeeChecker, FeeMarketKeeper};
use stablepay_settlement::{Claim, SettlementKeeper};
use stablepay_types::{
    AccountKeeper, Address, BankKeeper, ClaimVerifier, Coin, ComplianceKeeper, Context,
    Ed25519ClaimVerifier, Event, Result,
};

use crate::msgs::{AnyMsg, parse_addr};
use crate::registry::MsgRegistry;

/// A signed transaction as handed over by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub type_url: String,
    /// JSON-encoded message body.
    pub value: Vec<u8>,
    pub fee: Coin,
    pub gas_limit: u64,
}

impl Tx {
    /// Wrap an encoded message.
    ///
    /// # Errors
    /// `Serialization` if `msg` does not encode.
    pub fn new<M: Serialize>(type_url: &str, msg: &M, fee: Coin, gas_limit: u64) -> Result<Self> {
        Ok(Self {
            type_url: type_url.to_string(),
            value: serde_json::to_vec(msg)?,
            fee,
            gas_limit,
        })
    }

    /// Hex SHA-256 over the type URL and body.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"stablepay:tx:v1:");
        hasher.update(self.type_url.as_bytes());
        hasher.update([0u8]);
        hasher.update(&self.value);
        hex::encode(hasher.finalize())
    }
}

/// Outcome of a delivered transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResult {
    pub tx_hash: String,
    pub type_url: String,
    /// Minimum fee the transaction had to carry.
    pub required_fee: Decimal,
    /// Message-specific response.
    pub data: Value,
    pub events: Vec<Event>,
}

/// Owns the keepers and dispatches messages to them.
pub struct Router<B, C, A, V = Ed25519ClaimVerifier> {
    pub(crate) settlement: SettlementKeeper<B, C, A, V>,
    pub(crate) fee_market: FeeMarketKeeper,
    fee_checker: FeeChecker,
    registry: MsgRegistry,
    /// Gas counted toward the current block.
    pub(crate) block_gas: u64,
}

impl<B, C, A, V> Router<B, C, A, V>
where
    B: BankKeeper,
    C: ComplianceKeeper,
    A: AccountKeeper,
    V: ClaimVerifier,
{
    #[must_use]
    pub fn new(settlement: SettlementKeeper<B, C, A, V>, fee_market: FeeMarketKeeper, fee_checker: FeeChecker) -> Self {
        Self {
            settlement,
            fee_market,
            fee_checker,
            registry: MsgRegistry::new(),
            block_gas: 0,
        }
    }

    pub fn settlement(&self) -> &SettlementKeeper<B, C, A, V> {
        &self.settlement
    }

    pub fn settlement_mut(&mut self) -> &mut SettlementKeeper<B, C, A, V> {
        &mut self.settlement
    }

    pub fn fee_market(&self) -> &FeeMarketKeeper {
        &self.fee_market
    }

    pub fn registry(&self) -> &MsgRegistry {
        &self.registry
    }

    pub fn block_gas(&self) -> u64 {
        self.block_gas
    }

    /// Decode, check and execute one transaction.
    ///
    /// Gas is counted once the fee check passes, whether or not execution
    /// then succeeds.
    ///
    /// # Errors
    /// Decode errors, the first `validate_basic` failure, fee errors, or
    /// the engine's error. On any error the store is untouched.
    pub fn deliver_tx(&mut self, ctx: &mut Context<'_>, tx: &Tx) -> Result<TxResult> {
        let tx_hash = tx.hash();
        let msg = self.registry.decode(&tx.type_url, &tx.value)?;
        msg.validate_basic()?;
        let required_fee = self
            .fee_checker
            .check_tx_fee(&self.fee_market, ctx, &tx.fee, tx.gas_limit)?;
        self.block_gas = self.block_gas.saturating_add(tx.gas_limit);

        let mark = ctx.events().len();
        match ctx.branch(|inner| self.execute(inner, &msg)) {
            Ok(data) => {
                tracing::debug!(tx = %tx_hash, msg = msg.type_url(), "Transaction delivered");
                Ok(TxResult {
                    tx_hash,
                    type_url: tx.type_url.clone(),
                    required_fee,
                    data,
                    events: ctx.events()[mark..].to_vec(),
                })
            }
            Err(err) => {
                tracing::warn!(tx = %tx_hash, msg = msg.type_url(), signer = msg.signer(), error = %err, "Transaction failed");
                Err(err)
            }
        }
    }

    /// Execute an already-decoded message on a store branch.
    ///
    /// # Errors
    /// The first `validate_basic` failure or the engine's error.
    pub fn deliver_msg(&mut self, ctx: &mut Context<'_>, msg: &AnyMsg) -> Result<Value> {
        msg.validate_basic()?;
        ctx.branch(|inner| self.execute(inner, msg))
    }

    fn execute(&mut self, ctx: &mut Context<'_>, msg: &AnyMsg) -> Result<Value> {
        let keeper = &mut self.settlement;
        match msg {
            AnyMsg::InstantTransfer(m) => {
                let id = keeper.instant_transfer(
                    ctx,
                    &parse_addr(&m.sender)?,
                    &parse_addr(&m.recipient)?,
                    &m.amount,
                    &m.reference,
                    &m.metadata,
                )?;
                Ok(json!({ "settlement_id": id }))
            }
            AnyMsg::CreateEscrow(m) => {
                let id = keeper.create_escrow(
                    ctx,
                    &parse_addr(&m.sender)?,
                    &parse_addr(&m.recipient)?,
                    &m.amount,
                    &m.reference,
                    &m.metadata,
                    m.expiration_secs,
                )?;
                Ok(json!({ "settlement_id": id }))
            }
            AnyMsg::ReleaseEscrow(m) => {
                keeper.release_escrow(ctx, m.settlement_id, &parse_addr(&m.sender)?)?;
                Ok(json!({}))
            }
            AnyMsg::RefundEscrow(m) => {
                keeper.refund_escrow(ctx, m.settlement_id, &parse_addr(&m.recipient)?, &m.reason)?;
                Ok(json!({}))
            }
            AnyMsg::PartialRefund(m) => {
                let record = keeper.partial_refund(
                    ctx,
                    &parse_addr(&m.authority)?,
                    m.settlement_id,
                    &m.amount,
                    &m.reason,
                )?;
                Ok(serde_json::to_value(record)?)
            }
            AnyMsg::InstantCheckout(m) => {
                let result = keeper.instant_checkout(ctx, &m.to_checkout()?)?;
                Ok(serde_json::to_value(result)?)
            }
            AnyMsg::CreateBatch(m) => {
                let senders = m
                    .senders
                    .iter()
                    .map(|s| parse_addr(s))
                    .collect::<Result<Vec<Address>>>()?;
                let (batch_id, settlement_ids) = keeper.create_batch(
                    ctx,
                    &parse_addr(&m.authority)?,
                    &parse_addr(&m.merchant)?,
                    &senders,
                    &m.amounts,
                    &m.references,
                )?;
                Ok(json!({ "batch_id": batch_id, "settlement_ids": settlement_ids }))
            }
            AnyMsg::SettleBatch(m) => {
                let batch = keeper.settle_batch(ctx, m.batch_id, &parse_addr(&m.authority)?)?;
                Ok(serde_json::to_value(batch)?)
            }
            AnyMsg::OpenChannel(m) => {
                let id = keeper.open_channel(
                    ctx,
                    &parse_addr(&m.sender)?,
                    &parse_addr(&m.recipient)?,
                    &m.deposit,
                    m.expires_in_blocks,
                )?;
                Ok(json!({ "channel_id": id }))
            }
            AnyMsg::CloseChannel(m) => {
                let refunded = keeper.close_channel(ctx, m.channel_id, &parse_addr(&m.sender)?)?;
                Ok(json!({ "refunded": refunded }))
            }
            AnyMsg::ClaimChannel(m) => {
                let recipient = parse_addr(&m.recipient)?;
                let signature = m.signature_bytes()?;
                let channel = keeper.claim_channel(
                    ctx,
                    &Claim {
                        channel_id: m.channel_id,
                        recipient: &recipient,
                        amount: &m.amount,
                        nonce: m.nonce,
                        signature: &signature,
                    },
                )?;
                Ok(serde_json::to_value(channel)?)
            }
            AnyMsg::RegisterMerchant(m) => {
                keeper.register_merchant(ctx, &parse_addr(&m.signer)?, m.to_config()?)?;
                Ok(json!({}))
            }
            AnyMsg::UpdateMerchant(m) => {
                let config = keeper.update_merchant(
                    ctx,
                    &parse_addr(&m.signer)?,
                    &parse_addr(&m.merchant)?,
                    &m.update,
                )?;
                Ok(serde_json::to_value(config)?)
            }
            AnyMsg::UpdateParams(m) => {
                keeper.update_params(ctx, &parse_addr(&m.authority)?, &m.params)?;
                Ok(json!({}))
            }
            AnyMsg::UpdateFeeMarketParams(m) => {
                self.fee_market
                    .update_params(ctx, &parse_addr(&m.authority)?, &m.params)?;
                Ok(json!({}))
            }
        }
    }
}
