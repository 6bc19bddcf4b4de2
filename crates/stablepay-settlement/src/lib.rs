//! # stablepay-settlement
//!
//! **Settlement engines** for the StablePay chain: everything that moves
//! stablecoins on behalf of users.
//!
//! ## Engines
//!
//! - **Ledger**: instant transfers, escrow create/release/refund, partial
//!   refunds, merchant checkout, escrow expiry sweep
//! - **Batch**: authority-driven batches of payments to one merchant
//! - **Channels**: deposit-backed payment channels redeemed with signed,
//!   nonce-ordered claims, plus the channel expiry sweep
//! - **Merchants**: registry of merchant policy (fee override, bounds,
//!   webhook)
//! - **Queries**: paged reads over every record
//!
//! All engines are methods on [`SettlementKeeper`], which owns the host
//! capabilities (bank, compliance, accounts, claim verifier) and reads and
//! writes through the [`Context`](stablepay_types::Context) it is handed.
//!
//! ## Fund flow
//!
//! Escrowed funds (escrows, batches being settled, channel deposits) sit
//! in the `settlement` module account. Fees go to `Params::fee_collector`
//! when set, otherwise to the `fee_collector` module account.

pub mod batch;
pub mod channel;
pub mod keeper;
pub mod ledger;
pub mod merchant;
pub mod query;

#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

pub use channel::Claim;
pub use keeper::SettlementKeeper;
pub use ledger::{Checkout, CheckoutItem, CheckoutResult, items_total};
pub use query::{Page, PageRequest};
