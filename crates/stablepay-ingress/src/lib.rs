//! # stablepay-ingress
//!
//! **Transaction ingress** for the StablePay settlement core: the single
//! path by which messages reach the engines.
//!
//! ## Flow
//!
//! ```text
//! Tx → MsgRegistry.decode() → validate_basic() → FeeChecker → ctx.branch(engine call)
//! end of block → Router.end_block() → base fee update + expiry sweeps
//! ```
//!
//! 1. **Messages** ([`msgs`]): one struct per operation, addresses as wire
//!    strings, stateless `validate_basic`
//! 2. **Registry** ([`MsgRegistry`]): type URL → decoder, built once
//! 3. **Router** ([`Router`]): fee floor check, then atomic dispatch to
//!    the settlement and fee market keepers
//! 4. **Block end** ([`Router::end_block`]) and **genesis**
//!    ([`GenesisState`])

pub mod abci;
pub mod genesis;
pub mod msgs;
pub mod registry;
pub mod router;

pub use abci::EndBlockSummary;
pub use genesis::GenesisState;
pub use msgs::{AnyMsg, TypedMsg};
pub use registry::MsgRegistry;
pub use router::{Router, Tx, TxResult};
