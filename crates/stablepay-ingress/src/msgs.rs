//! Transaction messages and their stateless checks.
//!
//! Messages carry addresses as plain strings, the way they arrive on the
//! wire. [`validate_basic`](TypedMsg::validate_basic) rejects anything
//! malformed before the router touches state: bad addresses, zero or
//! malformed coins, oversize text, mismatched batch vectors. Everything
//! that needs the store (balances, params, record status) is left to the
//! engines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stablepay_feemarket::FeeMarketParams;
use stablepay_settlement::{Checkout, CheckoutItem, items_total};
use stablepay_types::{
    Address, BatchId, ChannelId, Coin, MerchantConfig, MerchantUpdate, Params, Result,
    SettlementId, StablepayError, constants, validate_fee_rate, validate_webhook_url,
};

/// Ed25519 signature length in bytes.
const SIGNATURE_LEN: usize = 64;

/// A message the router knows how to decode and execute.
pub trait TypedMsg: Into<AnyMsg> + serde::de::DeserializeOwned {
    /// Registry key the message is decoded under.
    const TYPE_URL: &'static str;

    /// Address that authorised the message.
    fn signer(&self) -> &str;

    /// Stateless shape checks.
    ///
    /// # Errors
    /// The first malformed field.
    fn validate_basic(&self) -> Result<()>;
}

/// Parse an address field.
pub(crate) fn parse_addr(raw: &str) -> Result<Address> {
    Address::parse(raw)
}

fn check_text(field: &'static str, value: &str, max: usize) -> Result<()> {
    if value.len() > max {
        return Err(StablepayError::InvalidField {
            field,
            reason: format!("longer than {max} bytes"),
        });
    }
    Ok(())
}

fn check_id(field: &'static str, id: u64) -> Result<()> {
    if id == 0 {
        return Err(StablepayError::InvalidField {
            field,
            reason: "ids start at 1".into(),
        });
    }
    Ok(())
}

fn distinct(sender: &str, recipient: &str) -> Result<()> {
    if sender == recipient {
        return Err(StablepayError::InvalidRecipient);
    }
    Ok(())
}

// =============================================================================
// Ledger
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgInstantTransfer {
    pub sender: String,
    pub recipient: String,
    pub amount: Coin,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub metadata: String,
}

impl TypedMsg for MsgInstantTransfer {
    const TYPE_URL: &'static str = "/stablepay.settlement.v1.MsgInstantTransfer";

    fn signer(&self) -> &str {
        &self.sender
    }

    fn validate_basic(&self) -> Result<()> {
        parse_addr(&self.sender)?;
        parse_addr(&self.recipient)?;
        distinct(&self.sender, &self.recipient)?;
        self.amount.validate()?;
        check_text("reference", &self.reference, constants::MAX_REFERENCE_LEN)?;
        check_text("metadata", &self.metadata, constants::MAX_METADATA_LEN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreateEscrow {
    pub sender: String,
    pub recipient: String,
    pub amount: Coin,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub metadata: String,
    /// Seconds until expiry; 0 uses the module default.
    #[serde(default)]
    pub expiration_secs: u64,
}

impl TypedMsg for MsgCreateEscrow {
    const TYPE_URL: &'static str = "/stablepay.settlement.v1.MsgCreateEscrow";

    fn signer(&self) -> &str {
        &self.sender
    }

    fn validate_basic(&self) -> Result<()> {
        parse_addr(&self.sender)?;
        parse_addr(&self.recipient)?;
        distinct(&self.sender, &self.recipient)?;
        self.amount.validate()?;
        check_text("reference", &self.reference, constants::MAX_REFERENCE_LEN)?;
        check_text("metadata", &self.metadata, constants::MAX_METADATA_LEN)?;
        if self.expiration_secs > constants::MAX_ESCROW_EXPIRATION_SECS {
            return Err(StablepayError::InvalidEscrowExpiration {
                reason: format!(
                    "{}s exceeds hard limit {}s",
                    self.expiration_secs,
                    constants::MAX_ESCROW_EXPIRATION_SECS
                ),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgReleaseEscrow {
    pub sender: String,
    pub settlement_id: SettlementId,
}

impl TypedMsg for MsgReleaseEscrow {
    const TYPE_URL: &'static str = "/stablepay.settlement.v1.MsgReleaseEscrow";

    fn signer(&self) -> &str {
        &self.sender
    }

    fn validate_basic(&self) -> Result<()> {
        parse_addr(&self.sender)?;
        check_id("settlement_id", self.settlement_id.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgRefundEscrow {
    /// The escrow's recipient.
    pub recipient: String,
    pub settlement_id: SettlementId,
    #[serde(default)]
    pub reason: String,
}

impl TypedMsg for MsgRefundEscrow {
    const TYPE_URL: &'static str = "/stablepay.settlement.v1.MsgRefundEscrow";

    fn signer(&self) -> &str {
        &self.recipient
    }

    fn validate_basic(&self) -> Result<()> {
        parse_addr(&self.recipient)?;
        check_id("settlement_id", self.settlement_id.0)?;
        check_text("reason", &self.reason, constants::MAX_REFERENCE_LEN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgPartialRefund {
    pub authority: String,
    pub settlement_id: SettlementId,
    pub amount: Coin,
    #[serde(default)]
    pub reason: String,
}

impl TypedMsg for MsgPartialRefund {
    const TYPE_URL: &'static str = "/stablepay.settlement.v1.MsgPartialRefund";

    fn signer(&self) -> &str {
        &self.authority
    }

    fn validate_basic(&self) -> Result<()> {
        parse_addr(&self.authority)?;
        check_id("settlement_id", self.settlement_id.0)?;
        self.amount.validate()?;
        check_text("reason", &self.reason, constants::MAX_REFERENCE_LEN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgInstantCheckout {
    pub customer: String,
    pub merchant: String,
    pub amount: Coin,
    #[serde(default)]
    pub order_reference: String,
    #[serde(default)]
    pub use_escrow: bool,
    #[serde(default)]
    pub items: Vec<CheckoutItem>,
    #[serde(default)]
    pub metadata: String,
}

impl MsgInstantCheckout {
    /// # Errors
    /// `InvalidAddress` for either party.
    pub fn to_checkout(&self) -> Result<Checkout> {
        Ok(Checkout {
            customer: parse_addr(&self.customer)?,
            merchant: parse_addr(&self.merchant)?,
            amount: self.amount.clone(),
            order_reference: self.order_reference.clone(),
            use_escrow: self.use_escrow,
            items: self.items.clone(),
            metadata: self.metadata.clone(),
        })
    }
}

impl TypedMsg for MsgInstantCheckout {
    const TYPE_URL: &'static str = "/stablepay.settlement.v1.MsgInstantCheckout";

    fn signer(&self) -> &str {
        &self.customer
    }

    fn validate_basic(&self) -> Result<()> {
        self.to_checkout()?;
        distinct(&self.customer, &self.merchant)?;
        self.amount.validate()?;
        check_text("order_reference", &self.order_reference, constants::MAX_REFERENCE_LEN)?;
        check_text("metadata", &self.metadata, constants::MAX_METADATA_LEN)?;
        if !self.items.is_empty() {
            let total = items_total(&self.items)?;
            if total != self.amount.amount {
                return Err(StablepayError::InvalidCheckoutItems {
                    reason: format!("items total {total} != amount {}", self.amount.amount),
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Batches
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreateBatch {
    pub authority: String,
    pub merchant: String,
    pub senders: Vec<String>,
    pub amounts: Vec<Coin>,
    #[serde(default)]
    pub references: Vec<String>,
}

impl TypedMsg for MsgCreateBatch {
    const TYPE_URL: &'static str = "/stablepay.settlement.v1.MsgCreateBatch";

    fn signer(&self) -> &str {
        &self.authority
    }

    fn validate_basic(&self) -> Result<()> {
        let invalid = |reason: String| StablepayError::InvalidBatch { reason };
        parse_addr(&self.authority)?;
        parse_addr(&self.merchant)?;
        if self.senders.is_empty() {
            return Err(invalid("batch is empty".into()));
        }
        if self.senders.len() != self.amounts.len() {
            return Err(invalid(format!(
                "{} senders but {} amounts",
                self.senders.len(),
                self.amounts.len()
            )));
        }
        if !self.references.is_empty() && self.references.len() != self.senders.len() {
            return Err(invalid(format!(
                "{} senders but {} references",
                self.senders.len(),
                self.references.len()
            )));
        }
        for (sender, amount) in self.senders.iter().zip(&self.amounts) {
            parse_addr(sender)?;
            if sender == &self.merchant {
                return Err(invalid(format!("merchant {sender} cannot pay itself")));
            }
            amount.validate()?;
        }
        for reference in &self.references {
            check_text("references", reference, constants::MAX_REFERENCE_LEN)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSettleBatch {
    pub authority: String,
    pub batch_id: BatchId,
}

impl TypedMsg for MsgSettleBatch {
    const TYPE_URL: &'static str = "/stablepay.settlement.v1.MsgSettleBatch";

    fn signer(&self) -> &str {
        &self.authority
    }

    fn validate_basic(&self) -> Result<()> {
        parse_addr(&self.authority)?;
        check_id("batch_id", self.batch_id.0)
    }
}

// =============================================================================
// Channels
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgOpenChannel {
    pub sender: String,
    pub recipient: String,
    pub deposit: Coin,
    pub expires_in_blocks: u64,
}

impl TypedMsg for MsgOpenChannel {
    const TYPE_URL: &'static str = "/stablepay.settlement.v1.MsgOpenChannel";

    fn signer(&self) -> &str {
        &self.sender
    }

    fn validate_basic(&self) -> Result<()> {
        parse_addr(&self.sender)?;
        parse_addr(&self.recipient)?;
        distinct(&self.sender, &self.recipient)?;
        self.deposit.validate()?;
        if self.expires_in_blocks == 0 {
            return Err(StablepayError::InvalidChannelExpiration {
                reason: "must be at least one block".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCloseChannel {
    pub sender: String,
    pub channel_id: ChannelId,
}

impl TypedMsg for MsgCloseChannel {
    const TYPE_URL: &'static str = "/stablepay.settlement.v1.MsgCloseChannel";

    fn signer(&self) -> &str {
        &self.sender
    }

    fn validate_basic(&self) -> Result<()> {
        parse_addr(&self.sender)?;
        check_id("channel_id", self.channel_id.0)
    }
}

/// Redeem a claim signed off-chain by the channel sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgClaimChannel {
    pub recipient: String,
    pub channel_id: ChannelId,
    pub amount: Coin,
    pub nonce: u64,
    /// Hex-encoded ed25519 signature.
    pub signature: String,
}

impl MsgClaimChannel {
    /// # Errors
    /// `InvalidSignature` unless the field is 64 bytes of hex.
    pub fn signature_bytes(&self) -> Result<Vec<u8>> {
        let bytes = hex::decode(&self.signature).map_err(|_| StablepayError::InvalidSignature)?;
        if bytes.len() != SIGNATURE_LEN {
            return Err(StablepayError::InvalidSignature);
        }
        Ok(bytes)
    }
}

impl TypedMsg for MsgClaimChannel {
    const TYPE_URL: &'static str = "/stablepay.settlement.v1.MsgClaimChannel";

    fn signer(&self) -> &str {
        &self.recipient
    }

    fn validate_basic(&self) -> Result<()> {
        parse_addr(&self.recipient)?;
        check_id("channel_id", self.channel_id.0)?;
        self.amount.validate()?;
        if self.nonce == 0 {
            return Err(StablepayError::InvalidNonce { got: 0, current: 0 });
        }
        self.signature_bytes().map(|_| ())
    }
}

// =============================================================================
// Merchants
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgRegisterMerchant {
    /// The merchant itself or the authority.
    pub signer: String,
    pub merchant: String,
    pub name: String,
    #[serde(default)]
    pub fee_rate_bps: Option<u32>,
    #[serde(default)]
    pub min_settlement: u128,
    #[serde(default)]
    pub max_settlement: u128,
    #[serde(default)]
    pub batch_enabled: bool,
    #[serde(default)]
    pub batch_threshold: u32,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl MsgRegisterMerchant {
    /// The record to register. Activation and the registration time are
    /// stamped by the registry.
    ///
    /// # Errors
    /// `InvalidAddress` for the merchant.
    pub fn to_config(&self) -> Result<MerchantConfig> {
        Ok(MerchantConfig {
            address: parse_addr(&self.merchant)?,
            name: self.name.clone(),
            fee_rate_bps: self.fee_rate_bps,
            min_settlement: self.min_settlement,
            max_settlement: self.max_settlement,
            batch_enabled: self.batch_enabled,
            batch_threshold: self.batch_threshold,
            webhook_url: self.webhook_url.clone(),
            is_active: true,
            registered_at: DateTime::<Utc>::UNIX_EPOCH,
        })
    }
}

impl TypedMsg for MsgRegisterMerchant {
    const TYPE_URL: &'static str = "/stablepay.settlement.v1.MsgRegisterMerchant";

    fn signer(&self) -> &str {
        &self.signer
    }

    fn validate_basic(&self) -> Result<()> {
        parse_addr(&self.signer)?;
        self.to_config()?.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgUpdateMerchant {
    pub signer: String,
    pub merchant: String,
    pub update: MerchantUpdate,
}

impl TypedMsg for MsgUpdateMerchant {
    const TYPE_URL: &'static str = "/stablepay.settlement.v1.MsgUpdateMerchant";

    fn signer(&self) -> &str {
        &self.signer
    }

    fn validate_basic(&self) -> Result<()> {
        parse_addr(&self.signer)?;
        parse_addr(&self.merchant)?;
        if self.update.is_empty() {
            return Err(StablepayError::InvalidField {
                field: "update",
                reason: "no fields to change".into(),
            });
        }
        if let Some(Some(bps)) = self.update.fee_rate_bps {
            validate_fee_rate(bps)?;
        }
        if let Some(Some(url)) = &self.update.webhook_url {
            validate_webhook_url(url)?;
        }
        Ok(())
    }
}

// =============================================================================
// Governance
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgUpdateParams {
    pub authority: String,
    pub params: Params,
}

impl TypedMsg for MsgUpdateParams {
    const TYPE_URL: &'static str = "/stablepay.settlement.v1.MsgUpdateParams";

    fn signer(&self) -> &str {
        &self.authority
    }

    fn validate_basic(&self) -> Result<()> {
        parse_addr(&self.authority)?;
        self.params.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgUpdateFeeMarketParams {
    pub authority: String,
    pub params: FeeMarketParams,
}

impl TypedMsg for MsgUpdateFeeMarketParams {
    const TYPE_URL: &'static str = "/stablepay.feemarket.v1.MsgUpdateParams";

    fn signer(&self) -> &str {
        &self.authority
    }

    fn validate_basic(&self) -> Result<()> {
        parse_addr(&self.authority)?;
        self.params.validate()
    }
}

// =============================================================================
// AnyMsg
// =============================================================================

macro_rules! any_msg {
    ($($variant:ident($msg:ident)),+ $(,)?) => {
        /// Any decoded message.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum AnyMsg {
            $($variant($msg),)+
        }

        impl AnyMsg {
            #[must_use]
            pub fn type_url(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => $msg::TYPE_URL,)+
                }
            }

            #[must_use]
            pub fn signer(&self) -> &str {
                match self {
                    $(Self::$variant(m) => m.signer(),)+
                }
            }

            /// # Errors
            /// The first malformed field of the wrapped message.
            pub fn validate_basic(&self) -> Result<()> {
                match self {
                    $(Self::$variant(m) => m.validate_basic(),)+
                }
            }
        }

        $(
            impl From<$msg> for AnyMsg {
                fn from(msg: $msg) -> Self {
                    Self::$variant(msg)
                }
            }
        )+
    };
}

any_msg! {
    InstantTransfer(MsgInstantTransfer),
    CreateEscrow(MsgCreateEscrow),
    ReleaseEscrow(MsgReleaseEscrow),
    RefundEscrow(MsgRefundEscrow),
    PartialRefund(MsgPartialRefund),
    InstantCheckout(MsgInstantCheckout),
    CreateBatch(MsgCreateBatch),
    SettleBatch(MsgSettleBatch),
    OpenChannel(MsgOpenChannel),
    CloseChannel(MsgCloseChannel),
    ClaimChannel(MsgClaimChannel),
    RegisterMerchant(MsgRegisterMerchant),
    UpdateMerchant(MsgUpdateMerchant),
    UpdateParams(MsgUpdateParams),
    UpdateFeeMarketParams(MsgUpdateFeeMarketParams),
}
