//! # stablepay-types
//!
//! Shared types, errors, and capability seams for the **StablePay**
//! settlement core.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`SettlementId`], [`BatchId`], [`ChannelId`], [`Address`]
//! - **Money**: [`Coin`] with integer amounts in a single stablecoin denom
//! - **Settlement model**: [`Settlement`], [`SettlementType`], [`SettlementStatus`], [`RefundRecord`]
//! - **Batch model**: [`BatchSettlement`], [`BatchStatus`]
//! - **Channel model**: [`PaymentChannel`], [`claim_signing_payload`]
//! - **Merchant model**: [`MerchantConfig`], [`MerchantUpdate`]
//! - **Configuration**: [`Params`]
//! - **Execution context**: [`Context`], [`BlockHeader`], [`Event`]
//! - **Storage**: [`KvStore`], [`MemStore`], [`CacheStore`]
//! - **Capabilities**: [`BankKeeper`], [`ComplianceKeeper`], [`AccountKeeper`], [`ClaimVerifier`]
//! - **Errors**: [`StablepayError`] with `SP_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod address;
pub mod batch;
pub mod capability;
pub mod channel;
pub mod coin;
pub mod constants;
pub mod context;
pub mod error;
pub mod ids;
pub mod merchant;
pub mod params;
pub mod settlement;
pub mod store;

// Re-export all primary types at crate root for ergonomic imports:
//   use stablepay_types::{Settlement, Coin, Context, ...};

pub use address::*;
pub use batch::*;
pub use capability::*;
pub use channel::*;
pub use coin::*;
pub use context::*;
pub use error::*;
pub use ids::*;
pub use merchant::*;
pub use params::*;
pub use settlement::*;
pub use store::*;

// Constants are accessed via `stablepay_types::constants::FOO`
// (not re-exported to avoid name collisions).
