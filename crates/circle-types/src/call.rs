//! Ledger entry points, read accessors and receipts

use crate::{
    circle::{CircleId, CircleParams, RawCircleDetails, RawCircleInfo, RawMemberInfo, Round},
    error::GatewayError,
    Address, Amount, BlockHeight, TxHash,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mutating entry points (ROSCA program and token ledger)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum LedgerCall {
    /// Create a circle in state Open
    CreateCircle(CircleParams),

    /// Join an Open circle; pulls collateral + insurance via allowance
    JoinCircle { circle_id: CircleId },

    /// Pay this round's contribution; pulls the contribution via allowance
    Contribute { circle_id: CircleId },

    /// Claim a pending payout
    ClaimPayout { circle_id: CircleId },

    /// Close an expired round (callable by any address)
    FinalizeRoundIfExpired { circle_id: CircleId },

    /// Withdraw remaining collateral from a Completed/Cancelled circle
    WithdrawCollateral { circle_id: CircleId },

    /// Token ledger: authorize `spender` to pull up to `amount`
    Approve {
        token: Address,
        spender: Address,
        amount: Amount,
    },

    /// Token ledger test faucet
    Mint { token: Address, amount: Amount },
}

impl LedgerCall {
    /// Entry point name as the ledger spells it
    pub fn method(&self) -> &'static str {
        match self {
            Self::CreateCircle(_) => "createCircle",
            Self::JoinCircle { .. } => "joinCircle",
            Self::Contribute { .. } => "contribute",
            Self::ClaimPayout { .. } => "claimPayout",
            Self::FinalizeRoundIfExpired { .. } => "finalizeRoundIfExpired",
            Self::WithdrawCollateral { .. } => "withdrawCollateral",
            Self::Approve { .. } => "approve",
            Self::Mint { .. } => "mint",
        }
    }

    /// Circle targeted by the call, if any
    pub fn circle_id(&self) -> Option<CircleId> {
        match self {
            Self::JoinCircle { circle_id }
            | Self::Contribute { circle_id }
            | Self::ClaimPayout { circle_id }
            | Self::FinalizeRoundIfExpired { circle_id }
            | Self::WithdrawCollateral { circle_id } => Some(*circle_id),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateCircle(p) => write!(f, "createCircle({:?})", p.name),
            Self::Approve {
                spender, amount, ..
            } => write!(f, "approve({}, {})", spender, amount),
            Self::Mint { token, amount } => write!(f, "mint({}, {})", token, amount),
            other => match other.circle_id() {
                Some(id) => write!(f, "{}({})", other.method(), id),
                None => f.write_str(other.method()),
            },
        }
    }
}

/// Read-only accessors
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LedgerRead {
    NextCircleId,
    CircleInfo(CircleId),
    CircleDetails(CircleId),
    Members(CircleId),
    PayoutOrder(CircleId),
    InsurancePool(CircleId),
    MemberInfo(CircleId, Address),
    PendingPayout(CircleId, Address),
    RoundDeposited(CircleId, Round, Address),
    Allowance {
        token: Address,
        owner: Address,
        spender: Address,
    },
    BalanceOf {
        token: Address,
        owner: Address,
    },
}

/// Accessor results
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ReadValue {
    CircleId(CircleId),
    CircleInfo(RawCircleInfo),
    CircleDetails(RawCircleDetails),
    Addresses(Vec<Address>),
    Amount(Amount),
    MemberInfo(RawMemberInfo),
    Bool(bool),
}

fn shape_mismatch(expected: &str, got: &ReadValue) -> GatewayError {
    GatewayError::Transport(format!("expected {} response, got {:?}", expected, got))
}

impl ReadValue {
    pub fn into_circle_id(self) -> Result<CircleId, GatewayError> {
        match self {
            Self::CircleId(id) => Ok(id),
            other => Err(shape_mismatch("circle id", &other)),
        }
    }

    pub fn into_circle_info(self) -> Result<RawCircleInfo, GatewayError> {
        match self {
            Self::CircleInfo(info) => Ok(info),
            other => Err(shape_mismatch("circle info", &other)),
        }
    }

    pub fn into_circle_details(self) -> Result<RawCircleDetails, GatewayError> {
        match self {
            Self::CircleDetails(details) => Ok(details),
            other => Err(shape_mismatch("circle details", &other)),
        }
    }

    pub fn into_addresses(self) -> Result<Vec<Address>, GatewayError> {
        match self {
            Self::Addresses(list) => Ok(list),
            other => Err(shape_mismatch("address list", &other)),
        }
    }

    pub fn into_amount(self) -> Result<Amount, GatewayError> {
        match self {
            Self::Amount(amount) => Ok(amount),
            other => Err(shape_mismatch("amount", &other)),
        }
    }

    pub fn into_member_info(self) -> Result<RawMemberInfo, GatewayError> {
        match self {
            Self::MemberInfo(info) => Ok(info),
            other => Err(shape_mismatch("member info", &other)),
        }
    }

    pub fn into_bool(self) -> Result<bool, GatewayError> {
        match self {
            Self::Bool(value) => Ok(value),
            other => Err(shape_mismatch("bool", &other)),
        }
    }
}

/// Final status of an included transaction
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted { reason: String },
}

/// Confirmation of an included transaction
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub hash: TxHash,
    pub block: BlockHeight,
    pub status: ReceiptStatus,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }

    /// Turn a reverted receipt into the matching error
    pub fn into_result(self) -> Result<Receipt, GatewayError> {
        match self.status {
            ReceiptStatus::Success => Ok(self),
            ReceiptStatus::Reverted { reason } => Err(GatewayError::Reverted {
                hash: self.hash,
                reason,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_display() {
        assert_eq!(LedgerCall::JoinCircle { circle_id: 3 }.to_string(), "joinCircle(3)");
        assert_eq!(
            LedgerCall::FinalizeRoundIfExpired { circle_id: 1 }.method(),
            "finalizeRoundIfExpired"
        );
        assert_eq!(LedgerCall::Contribute { circle_id: 9 }.circle_id(), Some(9));
    }

    #[test]
    fn test_read_value_shape_mismatch() {
        let err = ReadValue::Bool(true).into_amount().unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
        assert_eq!(ReadValue::Amount(5).into_amount().unwrap(), 5);
    }

    #[test]
    fn test_reverted_receipt_into_error() {
        let receipt = Receipt {
            hash: TxHash([1u8; 32]),
            block: 7,
            status: ReceiptStatus::Reverted {
                reason: "round not expired".to_string(),
            },
        };
        assert!(!receipt.is_success());
        match receipt.into_result() {
            Err(GatewayError::Reverted { reason, .. }) => assert_eq!(reason, "round not expired"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
