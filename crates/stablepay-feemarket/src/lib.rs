//! # stablepay-feemarket
//!
//! **EIP-1559-style fee market for the StablePay chain.**
//!
//! The base fee moves once per block toward the gas target: up when the
//! previous block ran above target, down when it ran below, never outside
//! `[min_base_fee, max_base_fee]`. On top of that this crate provides:
//!
//! - **Oracle**: congestion bucket, gas price suggestion and fee estimates
//! - **Ante check**: rejects transactions whose fee does not cover
//!   `max(base_fee, validator floor) * gas`
//! - **History**: a bounded ring of recent `(height, base_fee, gas_used)`
//!
//! All arithmetic is `rust_decimal`, so every node agrees on the result.

pub mod ante;
pub mod keeper;
pub mod oracle;
pub mod params;

pub use ante::FeeChecker;
pub use keeper::{FeeHistoryEntry, FeeMarketKeeper, compute_next_base_fee, effective_target_gas};
pub use oracle::{CongestionLevel, FeeEstimate, Priority};
pub use params::{DEFAULT_TARGET_GAS, FeeMarketParams};
