//! Sequence-assigned identifiers used throughout StablePay.
//!
//! Every entity id is a `u64` drawn from a per-entity counter in the store.
//! Ids are encoded big-endian in store keys so prefix iteration yields them
//! in ascending order.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! sequence_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Big-endian key bytes, used as the store key suffix.
            #[must_use]
            pub fn to_key(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }

            /// Decode an id from big-endian key bytes.
            #[must_use]
            pub fn from_key(bytes: &[u8]) -> Option<Self> {
                let arr: [u8; 8] = bytes.try_into().ok()?;
                Some(Self(u64::from_be_bytes(arr)))
            }

            #[must_use]
            pub fn next(self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, ":{}"), self.0)
            }
        }
    };
}

sequence_id!(
    /// Identifier of a [`crate::Settlement`]. The first settlement is `1`.
    SettlementId,
    "settlement"
);

sequence_id!(
    /// Identifier of a [`crate::BatchSettlement`].
    BatchId,
    "batch"
);

sequence_id!(
    /// Identifier of a [`crate::PaymentChannel`].
    ChannelId,
    "channel"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_encoding_is_big_endian() {
        assert_eq!(SettlementId(1).to_key(), [0, 0, 0, 0, 0, 0, 0, 1]);
        assert!(SettlementId(1).to_key() < SettlementId(256).to_key());
    }

    #[test]
    fn from_key_rejects_wrong_length() {
        assert_eq!(BatchId::from_key(&[1, 2, 3]), None);
        assert_eq!(BatchId::from_key(&BatchId(42).to_key()), Some(BatchId(42)));
    }

    #[test]
    fn next_increments() {
        assert_eq!(ChannelId(5).next(), ChannelId(6));
    }

    #[test]
    fn display_is_labelled() {
        assert_eq!(SettlementId(9).to_string(), "settlement:9");
        assert_eq!(ChannelId(2).to_string(), "channel:2");
    }

    #[test]
    fn serde_is_transparent() {
        let json = serde_json::to_string(&SettlementId(12)).unwrap();
        assert_eq!(json, "12");
    }
}
