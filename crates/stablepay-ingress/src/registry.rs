//! Type URL → decoder table, built once at start-up.

use std::collections::BTreeMap;
use std::fmt;

use stablepay_types::{Result, StablepayError, decode_json};

use crate::msgs::{
    AnyMsg, MsgClaimChannel, MsgCloseChannel, MsgCreateBatch, MsgCreateEscrow, MsgInstantCheckout,
    MsgInstantTransfer, MsgOpenChannel, MsgPartialRefund, MsgRefundEscrow, MsgRegisterMerchant,
    MsgReleaseEscrow, MsgSettleBatch, MsgUpdateFeeMarketParams, MsgUpdateMerchant, MsgUpdateParams,
    TypedMsg,
};

type Decoder = fn(&[u8]) -> Result<AnyMsg>;

fn decode_as<M: TypedMsg>(bytes: &[u8]) -> Result<AnyMsg> {
    decode_json::<M>(bytes).map(Into::into)
}

/// Maps each message type URL to its JSON decoder.
#[derive(Clone)]
pub struct MsgRegistry {
    decoders: BTreeMap<&'static str, Decoder>,
}

impl MsgRegistry {
    /// A registry holding every message the router executes.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            decoders: BTreeMap::new(),
        };
        registry.register::<MsgInstantTransfer>();
        registry.register::<MsgCreateEscrow>();
        registry.register::<MsgReleaseEscrow>();
        registry.register::<MsgRefundEscrow>();
        registry.register::<MsgPartialRefund>();
        registry.register::<MsgInstantCheckout>();
        registry.register::<MsgCreateBatch>();
        registry.register::<MsgSettleBatch>();
        registry.register::<MsgOpenChannel>();
        registry.register::<MsgCloseChannel>();
        registry.register::<MsgClaimChannel>();
        registry.register::<MsgRegisterMerchant>();
        registry.register::<MsgUpdateMerchant>();
        registry.register::<MsgUpdateParams>();
        registry.register::<MsgUpdateFeeMarketParams>();
        registry
    }

    fn register<M: TypedMsg>(&mut self) {
        let previous = self.decoders.insert(M::TYPE_URL, decode_as::<M>);
        debug_assert!(previous.is_none(), "duplicate type url {}", M::TYPE_URL);
    }

    /// # Errors
    /// `UnknownMessage` for an unregistered URL, `Serialization` when the
    /// payload does not decode.
    pub fn decode(&self, type_url: &str, bytes: &[u8]) -> Result<AnyMsg> {
        let decoder = self
            .decoders
            .get(type_url)
            .ok_or_else(|| StablepayError::UnknownMessage(type_url.to_string()))?;
        decoder(bytes)
    }

    pub fn type_urls(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.decoders.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

impl fmt::Debug for MsgRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}

impl Default for MsgRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use stablepay_types::{Coin, SettlementId};

    use super::*;

    #[test]
    fn every_message_is_registered_once() {
        let registry = MsgRegistry::new();
        assert_eq!(registry.len(), 15);
        assert!(registry.type_urls().all(|url| url.starts_with("/stablepay.")));
    }

    #[test]
    fn decode_by_url() {
        let registry = MsgRegistry::new();
        let msg = MsgReleaseEscrow {
            sender: "stable1alice".into(),
            settlement_id: SettlementId(4),
        };
        let bytes = serde_json::to_vec(&msg).unwrap();
        let decoded = registry.decode(MsgReleaseEscrow::TYPE_URL, &bytes).unwrap();
        assert_eq!(decoded, AnyMsg::ReleaseEscrow(msg));
    }

    #[test]
    fn unknown_url_and_bad_payload() {
        let registry = MsgRegistry::new();
        assert!(matches!(
            registry.decode("/cosmos.bank.v1beta1.MsgSend", b"{}"),
            Err(StablepayError::UnknownMessage(_))
        ));
        assert!(matches!(
            registry.decode(MsgInstantTransfer::TYPE_URL, b"{\"sender\": 7}"),
            Err(StablepayError::Serialization(_))
        ));

        // Amounts travel as strings.
        let raw = br#"{"sender":"stable1alice","recipient":"stable1bob","amount":{"denom":"ssusd","amount":"42"}}"#;
        let decoded = registry.decode(MsgInstantTransfer::TYPE_URL, raw).unwrap();
        let AnyMsg::InstantTransfer(transfer) = decoded else {
            panic!("wrong variant");
        };
        assert_eq!(transfer.amount, Coin::new("ssusd", 42));
        assert!(transfer.reference.is_empty());
    }
}
