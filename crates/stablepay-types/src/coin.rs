//! Fungible coin amounts.
//!
//! Amounts are unsigned integers in the smallest unit of the denom. All
//! fee arithmetic is integer arithmetic with truncation toward zero, so
//! `fee + net == amount` holds exactly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, StablepayError, constants};

/// A single-denom amount.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    #[serde(with = "amount_as_string")]
    pub amount: u128,
}

impl Coin {
    #[must_use]
    pub fn new(denom: impl Into<String>, amount: u128) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }

    /// Zero amount of `denom`.
    #[must_use]
    pub fn zero(denom: impl Into<String>) -> Self {
        Self::new(denom, 0)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }

    /// Stateless shape check: denom is well-formed and amount is positive.
    ///
    /// # Errors
    /// Returns `InvalidAmount` for zero amounts or malformed denoms.
    pub fn validate(&self) -> Result<()> {
        validate_denom(&self.denom)?;
        if self.is_zero() {
            return Err(StablepayError::invalid_amount("amount must be positive"));
        }
        Ok(())
    }

    /// Require the coin to be a positive amount of `denom`.
    ///
    /// # Errors
    /// `InvalidDenom` if the denom differs, `InvalidAmount` if zero.
    pub fn require_denom(&self, denom: &str) -> Result<()> {
        if self.denom != denom {
            return Err(StablepayError::InvalidDenom {
                expected: denom.to_string(),
                actual: self.denom.clone(),
            });
        }
        self.validate()
    }

    /// Same-denom addition.
    ///
    /// # Errors
    /// `InvalidDenom` on mismatch, `AmountOverflow` on overflow.
    pub fn checked_add(&self, other: &Coin) -> Result<Coin> {
        self.same_denom(other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or(StablepayError::AmountOverflow)?;
        Ok(Coin::new(self.denom.clone(), amount))
    }

    /// Same-denom subtraction.
    ///
    /// # Errors
    /// `InvalidDenom` on mismatch, `InsufficientFunds` on underflow.
    pub fn checked_sub(&self, other: &Coin) -> Result<Coin> {
        self.same_denom(other)?;
        let amount =
            self.amount
                .checked_sub(other.amount)
                .ok_or(StablepayError::InsufficientFunds {
                    needed: other.amount,
                    available: self.amount,
                })?;
        Ok(Coin::new(self.denom.clone(), amount))
    }

    /// `amount * bps / 10000`, truncated.
    #[must_use]
    pub fn fee_at_bps(&self, bps: u32) -> Coin {
        let fee = self.amount.saturating_mul(u128::from(bps)) / constants::BPS_DENOMINATOR;
        Coin::new(self.denom.clone(), fee)
    }

    fn same_denom(&self, other: &Coin) -> Result<()> {
        if self.denom == other.denom {
            Ok(())
        } else {
            Err(StablepayError::InvalidDenom {
                expected: self.denom.clone(),
                actual: other.denom.clone(),
            })
        }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// Denoms are 3-128 characters, start with a letter, and contain only
/// alphanumerics and `/:._-`.
///
/// # Errors
/// Returns `InvalidAmount` describing the malformed denom.
pub fn validate_denom(denom: &str) -> Result<()> {
    let ok_len = (3..=128).contains(&denom.len());
    let ok_start = denom.bytes().next().is_some_and(|b| b.is_ascii_alphabetic());
    let ok_chars = denom
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b"/:._-".contains(&b));
    if ok_len && ok_start && ok_chars {
        Ok(())
    } else {
        Err(StablepayError::invalid_amount(format!(
            "malformed denom {denom:?}"
        )))
    }
}

/// Amounts exceed JSON's safe integer range, so they travel as strings.
mod amount_as_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(amount: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(D::Error::custom)
    }
}
