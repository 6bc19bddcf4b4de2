//! System-wide constants for the StablePay settlement core.

/// Denomination of the settlement stablecoin (micro-units).
pub const DEFAULT_STABLECOIN_DENOM: &str = "ssusd";

/// Bech32-style human readable prefix every account address carries.
pub const ADDRESS_PREFIX: &str = "stable1";

/// Name of the module account holding escrowed funds and channel deposits.
pub const SETTLEMENT_MODULE_ACCOUNT: &str = "settlement";

/// Name of the module account that collects fees when no collector is set.
pub const FEE_COLLECTOR_MODULE_ACCOUNT: &str = "fee_collector";

/// 100% expressed in basis points.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Default settlement fee rate: 0.5%.
pub const DEFAULT_FEE_RATE_BPS: u32 = 50;

/// Smallest settlement accepted by default (0.001 ssusd).
pub const DEFAULT_MIN_SETTLEMENT: u128 = 1_000;

/// Largest settlement accepted by default (1,000,000 ssusd).
pub const DEFAULT_MAX_SETTLEMENT: u128 = 1_000_000_000_000;

/// Default escrow lifetime: 7 days.
pub const DEFAULT_ESCROW_EXPIRATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Maximum escrow lifetime: 30 days.
pub const MAX_ESCROW_EXPIRATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Minimum payment channel lifetime in blocks.
pub const DEFAULT_MIN_CHANNEL_EXPIRATION: u64 = 100;

/// Maximum payment channel lifetime in blocks.
pub const DEFAULT_MAX_CHANNEL_EXPIRATION: u64 = 1_000_000;

/// Maximum number of settlements in one batch.
pub const DEFAULT_MAX_BATCH_SIZE: u32 = 100;

/// Maximum number of records returned by a single paginated query.
pub const DEFAULT_MAX_QUERY_PAGE_SIZE: u32 = 100;

/// Maximum length of free-text reference fields.
pub const MAX_REFERENCE_LEN: usize = 256;

/// Maximum length of free-text metadata fields.
pub const MAX_METADATA_LEN: usize = 4096;

/// Maximum length of a merchant display name.
pub const MAX_MERCHANT_NAME_LEN: usize = 128;

/// Maximum length of a webhook URL.
pub const MAX_WEBHOOK_URL_LEN: usize = 512;

/// Domain separator for channel claim signatures.
pub const CHANNEL_CLAIM_DOMAIN: &[u8] = b"stablepay:channel_claim:v1:";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Module name used in events and logs.
pub const MODULE_NAME: &str = "settlement";
