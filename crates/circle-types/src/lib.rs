//! Shared types for the ROSCA circle client
//!
//! This crate contains type definitions that mirror the ledger program's
//! entry points and read accessors, plus the token-ledger calls the client
//! depends on. Raw accessor results keep the ledger's fixed positional order;
//! the aggregator in `circle-core` turns them into typed snapshots.

pub mod address;
pub mod call;
pub mod circle;
pub mod error;
pub mod token;

pub use address::{Address, TxHash};
pub use call::{LedgerCall, LedgerRead, ReadValue, Receipt, ReceiptStatus};
pub use circle::{
    CircleId, CircleLimits, CircleParams, CircleState, RawCircleDetails, RawCircleInfo,
    RawMemberInfo, Round,
};
pub use error::{ErrorCategory, GatewayError, ParamsError};
pub use token::{format_units, parse_units, TokenInfo, TokenRegistry, UnitsError};

/// Token amount in base units (ledger integer width abstracted to u128)
pub type Amount = u128;

/// Block height
pub type BlockHeight = u64;

/// Unix timestamp in seconds
pub type Timestamp = u64;

/// Seconds in a day
pub const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Period duration presets (seconds)
pub const PERIOD_WEEKLY: u64 = 7 * SECONDS_PER_DAY;
pub const PERIOD_BIWEEKLY: u64 = 14 * SECONDS_PER_DAY;
pub const PERIOD_MONTHLY: u64 = 30 * SECONDS_PER_DAY;
pub const PERIOD_QUARTERLY: u64 = 90 * SECONDS_PER_DAY;
