//! ROSCA program errors (surface as revert reasons)

use thiserror::Error;

/// Reasons the simulated program rejects a call
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramError {
    #[error("Circle does not exist")]
    CircleNotFound,

    #[error("Circle is not open")]
    CircleNotOpen,

    #[error("Circle is not active")]
    CircleNotActive,

    #[error("Circle is full")]
    CircleFull,

    #[error("Already a member")]
    AlreadyMember,

    #[error("Not a member")]
    NotMember,

    #[error("Already contributed this round")]
    AlreadyContributed,

    #[error("Round has not expired")]
    RoundNotExpired,

    #[error("No pending payout")]
    NoPendingPayout,

    #[error("Circle has not ended")]
    CircleNotEnded,

    #[error("No collateral to withdraw")]
    NoCollateral,

    #[error("ERC20: insufficient allowance")]
    InsufficientAllowance,

    #[error("ERC20: transfer amount exceeds balance")]
    InsufficientBalance,

    #[error("Invalid circle parameters")]
    InvalidParams,

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,
}
