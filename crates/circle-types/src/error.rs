//! Gateway and parameter errors

use crate::{Address, TxHash};
use thiserror::Error;

/// Failure classes a ledger interaction can end in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The signer declined the request
    SignatureRejected,
    /// Rejected before inclusion (insufficient allowance, failed precondition)
    Validation,
    /// Included in a block but marked failed
    Reverted,
    /// Network or RPC failure while submitting or awaiting confirmation
    Transport,
    /// A read was not available yet (partial batch failure, stale data)
    StaleRead,
}

/// Errors raised by a ledger gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("User rejected the request")]
    SignatureRejected,

    #[error("Execution reverted: {reason}")]
    Validation { reason: String },

    #[error("Transaction {hash} reverted: {reason}")]
    Reverted { hash: TxHash, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{what} is not available yet")]
    Unavailable { what: String },

    #[error("Unknown transaction {0}")]
    UnknownTransaction(TxHash),
}

impl GatewayError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::SignatureRejected => ErrorCategory::SignatureRejected,
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Reverted { .. } => ErrorCategory::Reverted,
            Self::Transport(_) | Self::UnknownTransaction(_) => ErrorCategory::Transport,
            Self::Unavailable { .. } => ErrorCategory::StaleRead,
        }
    }

    /// Stale reads are retried on the next block and never shown to the user
    pub fn is_user_facing(&self) -> bool {
        self.category() != ErrorCategory::StaleRead
    }

    /// Short message suitable for a notification
    pub fn short_message(&self) -> String {
        match self {
            Self::SignatureRejected => "User rejected the request".to_string(),
            Self::Validation { reason } => reason.clone(),
            Self::Reverted { reason, .. } => format!("Transaction reverted: {}", reason),
            Self::Transport(msg) => format!("Network error: {}", msg),
            Self::Unavailable { what } => format!("{} is not available yet", what),
            Self::UnknownTransaction(_) => "Transaction not found".to_string(),
        }
    }
}

/// `createCircle` parameter validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamsError {
    #[error("Circle name is required")]
    EmptyName,

    #[error("Circle description is required")]
    EmptyDescription,

    #[error("Max members {value} outside {min}..={max}")]
    MemberCount { value: u64, min: u64, max: u64 },

    #[error("Period of {value}s outside {min}..={max}")]
    Period { value: u64, min: u64, max: u64 },

    #[error("Collateral factor {value} outside {min}..={max}")]
    CollateralFactor { value: u64, min: u64, max: u64 },

    #[error("Contribution must be between {min} and {max} tokens")]
    Contribution { min: u64, max: u64 },

    #[error("Unsupported token decimals {0}")]
    Decimals(u8),

    #[error("Payout order has {len} entries but only {max_members} members fit")]
    PayoutOrderTooLong { len: usize, max_members: u64 },

    #[error("Address {0} appears twice in the payout order")]
    DuplicatePayoutEntry(Address),
}
