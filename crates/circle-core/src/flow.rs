//! Flow identity and state

use circle_types::{Address, Amount, CircleId, TxHash};
use serde::{Deserialize, Serialize};
use std::fmt;

/// User-triggered action backed by a flow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowKind {
    Join,
    Contribute,
    ClaimPayout,
    FinalizeRound,
    WithdrawCollateral,
    CreateCircle,
    Mint,
}

impl FlowKind {
    /// Flows that may need a token approval before the primary call
    pub fn needs_allowance(self) -> bool {
        matches!(self, Self::Join | Self::Contribute)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Join => "join-circle",
            Self::Contribute => "contribute",
            Self::ClaimPayout => "claim-payout",
            Self::FinalizeRound => "finalize-round",
            Self::WithdrawCollateral => "withdraw-collateral",
            Self::CreateCircle => "create-circle",
            Self::Mint => "mint",
        }
    }

    /// Progressive verb for the primary call
    fn doing(self) -> &'static str {
        match self {
            Self::Join => "Joining",
            Self::Contribute => "Contributing",
            Self::ClaimPayout => "Claiming payout",
            Self::FinalizeRound => "Finalizing round",
            Self::WithdrawCollateral => "Withdrawing collateral",
            Self::CreateCircle => "Creating circle",
            Self::Mint => "Minting",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a flow acts on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowTarget {
    Circle(CircleId),
    Token(Address),
    /// Not tied to an existing object (circle creation)
    New,
}

/// One flow instance per (kind, target)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub kind: FlowKind,
    pub target: FlowTarget,
}

impl FlowKey {
    pub fn circle(kind: FlowKind, circle_id: CircleId) -> Self {
        Self {
            kind,
            target: FlowTarget::Circle(circle_id),
        }
    }

    pub fn circle_id(&self) -> Option<CircleId> {
        match self.target {
            FlowTarget::Circle(id) => Some(id),
            _ => None,
        }
    }

    /// Notification key, e.g. `join-circle-4` or `mint-0x…05dc`
    pub fn notification_key(&self) -> String {
        match self.target {
            FlowTarget::Circle(id) => format!("{}-{}", self.kind.label(), id),
            FlowTarget::Token(token) => format!("{}-{}", self.kind.label(), token),
            FlowTarget::New => self.kind.label().to_string(),
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.notification_key())
    }
}

/// Step of a flow's state machine
///
/// `Idle -> CheckingAllowance -> [Approving ->] Executing -> Completed | Failed -> Idle`;
/// single-step flows go straight to `Executing`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStep {
    Idle,
    CheckingAllowance,
    Approving,
    Executing,
    Completed,
    Failed { message: String },
}

impl FlowStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle) && !self.is_terminal()
    }

    /// Human description for `kind` in this step
    pub fn describe(&self, kind: FlowKind) -> String {
        match self {
            Self::Idle => "Idle".to_string(),
            Self::CheckingAllowance => "Checking allowance".to_string(),
            Self::Approving => "Approving".to_string(),
            Self::Executing => kind.doing().to_string(),
            Self::Completed => "Completed".to_string(),
            Self::Failed { message } => format!("Failed: {}", message),
        }
    }
}

/// Local tracking state of one flow instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    /// Distinguishes successive instances under the same key
    pub instance: u64,
    pub key: FlowKey,
    pub caller: Address,
    /// Amount that must be approved (allowance flows only)
    pub required_amount: Option<Amount>,
    pub step: FlowStep,
    pub approval_tx: Option<TxHash>,
    pub tx: Option<TxHash>,
}

impl FlowRecord {
    pub fn new(instance: u64, key: FlowKey, caller: Address, required_amount: Option<Amount>) -> Self {
        Self {
            instance,
            key,
            caller,
            required_amount,
            step: FlowStep::Idle,
            approval_tx: None,
            tx: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_keys() {
        assert_eq!(
            FlowKey::circle(FlowKind::Join, 4).notification_key(),
            "join-circle-4"
        );
        assert_eq!(
            FlowKey::circle(FlowKind::FinalizeRound, 1).notification_key(),
            "finalize-round-1"
        );
        let create = FlowKey {
            kind: FlowKind::CreateCircle,
            target: FlowTarget::New,
        };
        assert_eq!(create.notification_key(), "create-circle");
        assert_eq!(create.circle_id(), None);
    }

    #[test]
    fn test_step_classification() {
        assert!(FlowStep::Approving.is_active());
        assert!(!FlowStep::Idle.is_active());
        assert!(FlowStep::Completed.is_terminal());
        let failed = FlowStep::Failed {
            message: "nope".into(),
        };
        assert!(failed.is_terminal());
        assert_eq!(FlowStep::Executing.describe(FlowKind::Join), "Joining");
    }

    #[test]
    fn test_allowance_kinds() {
        assert!(FlowKind::Join.needs_allowance());
        assert!(FlowKind::Contribute.needs_allowance());
        assert!(!FlowKind::ClaimPayout.needs_allowance());
    }
}
