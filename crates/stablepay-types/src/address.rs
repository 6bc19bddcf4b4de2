//! Account addresses.
//!
//! Addresses are bech32-style strings carrying the [`ADDRESS_PREFIX`]
//! human readable part followed by a lowercase alphanumeric payload.
//! The core never decodes them further; checksum verification belongs to
//! the host chain's account module.
//!
//! [`ADDRESS_PREFIX`]: crate::constants::ADDRESS_PREFIX

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, StablepayError, constants};

/// Minimum payload length after the prefix.
const MIN_PAYLOAD_LEN: usize = 3;

/// Maximum total address length.
const MAX_ADDRESS_LEN: usize = 90;

/// A validated account address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and validate an address string.
    ///
    /// # Errors
    /// Returns [`StablepayError::InvalidAddress`] if the prefix, length or
    /// character set is wrong.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let invalid = |reason: &str| StablepayError::InvalidAddress {
            reason: format!("{raw:?}: {reason}"),
        };

        let Some(payload) = raw.strip_prefix(constants::ADDRESS_PREFIX) else {
            return Err(invalid("missing prefix"));
        };
        if payload.len() < MIN_PAYLOAD_LEN {
            return Err(invalid("payload too short"));
        }
        if raw.len() > MAX_ADDRESS_LEN {
            return Err(invalid("address too long"));
        }
        if !payload
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        {
            return Err(invalid("payload must be lowercase alphanumeric"));
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw bytes, used when addresses form part of a store key or a
    /// signing payload.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = StablepayError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl std::str::FromStr for Address {
    type Err = StablepayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_address_parses() {
        let addr = Address::parse("stable1alice").unwrap();
        assert_eq!(addr.as_str(), "stable1alice");
        assert_eq!(addr.to_string(), "stable1alice");
    }

    #[test]
    fn wrong_prefix_rejected() {
        let err = Address::parse("cosmos1alice").unwrap_err();
        assert!(matches!(err, StablepayError::InvalidAddress { .. }));
    }

    #[test]
    fn short_payload_rejected() {
        assert!(Address::parse("stable1ab").is_err());
        assert!(Address::parse("stable1").is_err());
    }

    #[test]
    fn uppercase_rejected() {
        assert!(Address::parse("stable1Alice").is_err());
        assert!(Address::parse("stable1al ice").is_err());
    }

    #[test]
    fn serde_validates_on_decode() {
        let ok: Address = serde_json::from_str("\"stable1bob\"").unwrap();
        assert_eq!(ok.as_str(), "stable1bob");
        assert!(serde_json::from_str::<Address>("\"bob\"").is_err());
    }
}
