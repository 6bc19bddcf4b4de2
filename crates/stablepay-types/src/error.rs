//! Error types for the StablePay settlement core.
//!
//! All errors use the `SP_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by category:
//! - 1xx: Input / validation errors
//! - 2xx: State precondition errors
//! - 3xx: Authorization errors
//! - 4xx: Compliance errors
//! - 5xx: Resource errors
//! - 6xx: Fee market errors
//! - 9xx: General / internal errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{BatchId, ChannelId, SettlementId, SettlementStatus};

/// Central error enum for all StablePay operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StablepayError {
    // =================================================================
    // Input / Validation Errors (1xx)
    // =================================================================
    /// An address failed format validation.
    #[error("SP_ERR_100: Invalid address: {reason}")]
    InvalidAddress { reason: String },

    /// The coin denomination is not the configured stablecoin.
    #[error("SP_ERR_101: Invalid denom: expected {expected}, got {actual}")]
    InvalidDenom { expected: String, actual: String },

    /// Amount is zero or otherwise malformed.
    #[error("SP_ERR_102: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// Sender and recipient are the same account.
    #[error("SP_ERR_103: Invalid recipient: sender and recipient must differ")]
    InvalidRecipient,

    /// Amount is below the global or merchant-specific minimum.
    #[error("SP_ERR_104: Settlement too small: {amount} < minimum {min}")]
    SettlementTooSmall { amount: u128, min: u128 },

    /// Amount is above the global or merchant-specific maximum.
    #[error("SP_ERR_105: Settlement too large: {amount} > maximum {max}")]
    SettlementTooLarge { amount: u128, max: u128 },

    /// Escrow expiration falls outside the allowed window.
    #[error("SP_ERR_106: Invalid escrow expiration: {reason}")]
    InvalidEscrowExpiration { reason: String },

    /// Channel expiration falls outside the allowed window.
    #[error("SP_ERR_107: Invalid channel expiration: {reason}")]
    InvalidChannelExpiration { reason: String },

    /// Batch input arrays are malformed (empty, mismatched, too large).
    #[error("SP_ERR_108: Invalid batch: {reason}")]
    InvalidBatch { reason: String },

    /// A required text field is missing or too long.
    #[error("SP_ERR_109: Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Merchant webhook URL rejected.
    #[error("SP_ERR_110: Invalid webhook URL: {reason}")]
    InvalidWebhookUrl { reason: String },

    /// Fee rate exceeds 100%.
    #[error("SP_ERR_111: Invalid fee rate: {bps} bps exceeds 10000")]
    InvalidFeeRate { bps: u32 },

    /// Module parameters failed validation.
    #[error("SP_ERR_112: Invalid params: {reason}")]
    InvalidParams { reason: String },

    /// Checkout line items do not add up to the requested amount.
    #[error("SP_ERR_113: Invalid checkout items: {reason}")]
    InvalidCheckoutItems { reason: String },

    /// No message handler is registered for the type URL.
    #[error("SP_ERR_114: Unknown message type: {0}")]
    UnknownMessage(String),

    // =================================================================
    // State Precondition Errors (2xx)
    // =================================================================
    /// The requested settlement does not exist.
    #[error("SP_ERR_200: Settlement not found: {0}")]
    SettlementNotFound(SettlementId),

    /// The settlement is in the wrong status for the operation.
    #[error("SP_ERR_201: Invalid settlement status for {id}: expected {expected}, got {actual}")]
    InvalidSettlementStatus {
        id: SettlementId,
        expected: SettlementStatus,
        actual: SettlementStatus,
    },

    /// The settlement is of the wrong type for the operation.
    #[error("SP_ERR_202: Invalid settlement type for {id}: {reason}")]
    InvalidSettlementType { id: SettlementId, reason: String },

    /// The requested batch does not exist.
    #[error("SP_ERR_203: Batch not found: {0}")]
    BatchNotFound(BatchId),

    /// The batch has already been settled.
    #[error("SP_ERR_204: Batch already settled: {0}")]
    BatchAlreadySettled(BatchId),

    /// The requested channel does not exist.
    #[error("SP_ERR_205: Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    /// The channel is closed.
    #[error("SP_ERR_206: Channel closed: {0}")]
    ChannelClosed(ChannelId),

    /// The channel cannot be closed before its expiry height.
    #[error("SP_ERR_207: Channel {id} not expired: current height {height} <= expiry {expires_at}")]
    ChannelNotExpired {
        id: ChannelId,
        height: u64,
        expires_at: u64,
    },

    /// Claim nonce is not strictly greater than the stored nonce.
    #[error("SP_ERR_208: Invalid nonce: got {got}, must be greater than {current}")]
    InvalidNonce { got: u64, current: u64 },

    /// Claim exceeds the channel's remaining balance.
    #[error("SP_ERR_209: Claim exceeds channel balance: {amount} > {balance}")]
    ClaimExceedsBalance { amount: u128, balance: u128 },

    /// The channel claim signature did not verify.
    #[error("SP_ERR_210: Invalid channel claim signature")]
    InvalidSignature,

    /// The merchant does not exist.
    #[error("SP_ERR_211: Merchant not found: {0}")]
    MerchantNotFound(String),

    /// A merchant with this address already exists.
    #[error("SP_ERR_212: Merchant already exists: {0}")]
    MerchantAlreadyExists(String),

    /// The merchant is deactivated.
    #[error("SP_ERR_213: Merchant inactive: {0}")]
    MerchantInactive(String),

    /// A feature toggle in params disables this operation.
    #[error("SP_ERR_214: Feature disabled: {0}")]
    FeatureDisabled(&'static str),

    /// Refund exceeds the remaining settled amount.
    #[error("SP_ERR_215: Refund exceeds remaining amount: {amount} > {remaining}")]
    RefundExceedsRemaining { amount: u128, remaining: u128 },

    /// No public key is registered for the account.
    #[error("SP_ERR_216: Public key not found for {0}")]
    PubKeyNotFound(String),

    // =================================================================
    // Authorization Errors (3xx)
    // =================================================================
    /// Caller is not permitted to perform this operation.
    #[error("SP_ERR_300: Unauthorized: {reason}")]
    Unauthorized { reason: String },

    // =================================================================
    // Compliance Errors (4xx)
    // =================================================================
    /// The address failed the compliance check.
    #[error("SP_ERR_400: Compliance check failed for {address}: {reason}")]
    ComplianceCheckFailed { address: String, reason: String },

    // =================================================================
    // Resource Errors (5xx)
    // =================================================================
    /// Not enough balance to cover the transfer.
    #[error("SP_ERR_500: Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u128, available: u128 },

    /// Arithmetic overflowed a coin amount.
    #[error("SP_ERR_501: Amount overflow")]
    AmountOverflow,

    // =================================================================
    // Fee Market Errors (6xx)
    // =================================================================
    /// The transaction carries no fee.
    #[error("SP_ERR_600: Zero fee: transactions must pay at least {required}")]
    ZeroFee { required: Decimal },

    /// The attached fee is below `max(base fee, min gas price) * gas`.
    #[error("SP_ERR_601: Insufficient fee: need {required}, got {provided}")]
    InsufficientFee { required: Decimal, provided: u128 },

    /// Fee market parameters failed validation.
    #[error("SP_ERR_602: Invalid fee market params: {reason}")]
    InvalidFeeMarketParams { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("SP_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("SP_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// A stored record is missing or corrupted.
    #[error("SP_ERR_902: Store corruption: {0}")]
    StoreCorruption(String),
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, StablepayError>;

impl From<serde_json::Error> for StablepayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl StablepayError {
    /// Shorthand for an [`StablepayError::Unauthorized`] with a reason.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`StablepayError::InvalidAmount`] with a reason.
    pub fn invalid_amount(reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            reason: reason.into(),
        }
    }

    /// Numeric code parsed from the `SP_ERR_NNN` prefix.
    #[must_use]
    pub fn code(&self) -> u16 {
        let msg = self.to_string();
        msg.get(7..10)
            .and_then(|digits| digits.parse().ok())
            .unwrap_or(900)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = StablepayError::SettlementNotFound(SettlementId(7));
        let msg = format!("{err}");
        assert!(msg.starts_with("SP_ERR_200"), "Got: {msg}");
        assert!(msg.contains('7'));
    }

    #[test]
    fn insufficient_funds_display() {
        let err = StablepayError::InsufficientFunds {
            needed: 100,
            available: 50,
        };
        let msg = format!("{err}");
        assert!(msg.contains("SP_ERR_500"));
        assert!(msg.contains("100"));
        assert!(msg.contains("50"));
    }

    #[test]
    fn status_error_uses_wire_names() {
        let err = StablepayError::InvalidSettlementStatus {
            id: SettlementId(1),
            expected: SettlementStatus::Pending,
            actual: SettlementStatus::Completed,
        };
        let msg = format!("{err}");
        assert!(msg.contains("SETTLEMENT_STATUS_PENDING"));
        assert!(msg.contains("SETTLEMENT_STATUS_COMPLETED"));
    }

    #[test]
    fn code_is_parsed_from_prefix() {
        assert_eq!(StablepayError::InvalidRecipient.code(), 103);
        assert_eq!(
            StablepayError::InvalidNonce { got: 1, current: 1 }.code(),
            208
        );
        assert_eq!(StablepayError::Internal("x".into()).code(), 900);
    }

    #[test]
    fn all_errors_have_sp_err_prefix() {
        let errors: Vec<StablepayError> = vec![
            StablepayError::InvalidRecipient,
            StablepayError::InvalidSignature,
            StablepayError::BatchAlreadySettled(BatchId(3)),
            StablepayError::ChannelClosed(ChannelId(4)),
            StablepayError::unauthorized("not the sender"),
            StablepayError::Internal("test".into()),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("SP_ERR_"),
                "Error missing SP_ERR_ prefix: {msg}"
            );
        }
    }
}
