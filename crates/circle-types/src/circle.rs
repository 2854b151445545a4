//! Circle state as the ledger program exposes it

use crate::{error::ParamsError, Address, Amount, Timestamp, SECONDS_PER_DAY};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Circle identifier (the ledger numbers circles from 1)
pub type CircleId = u64;

/// Round number (1-based while Active)
pub type Round = u64;

/// Circle lifecycle state (matches the ledger's enum ordinal)
///
/// Transitions: Open -> Active -> Completed, or -> Cancelled from Open/Active.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CircleState {
    Open,
    Active,
    Completed,
    Cancelled,
}

impl CircleState {
    /// Decode the ledger's ordinal
    pub fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Open),
            1 => Some(Self::Active),
            2 => Some(Self::Completed),
            3 => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn ordinal(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Active => 1,
            Self::Completed => 2,
            Self::Cancelled => 3,
        }
    }

    /// Completed or Cancelled
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether the ledger allows moving from `self` to `next`
    pub fn can_transition_to(self, next: CircleState) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Active)
                | (Self::Active, Self::Completed)
                | (Self::Open, Self::Cancelled)
                | (Self::Active, Self::Cancelled)
        )
    }
}

impl fmt::Display for CircleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Open => "Open",
            Self::Active => "Active",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(label)
    }
}

/// `getCircleInfo` result in the ledger's fixed positional order:
/// creator, token, contributionAmount, periodDuration, maxMembers,
/// collateralFactor, insuranceFee, startTimestamp, currentRound, roundStart, state
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RawCircleInfo(
    pub Address,
    pub Address,
    pub Amount,
    pub u64,
    pub u64,
    pub u64,
    pub Amount,
    pub Timestamp,
    pub Round,
    pub Timestamp,
    pub u8,
);

/// `getCircleDetails` result: (name, description)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RawCircleDetails(pub String, pub String);

/// `getMemberInfo` result: (collateralLocked, defaults, isMember)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct RawMemberInfo(pub Amount, pub u32, pub bool);

/// Arguments of the `createCircle` entry point (amounts in base units)
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CircleParams {
    pub name: String,
    pub description: String,
    pub token: Address,
    pub contribution_amount: Amount,
    pub period_duration: u64,
    pub max_members: u64,
    pub collateral_factor: u64,
    pub insurance_fee: Amount,
    pub initial_payout_order: Vec<Address>,
}

/// Client-side limits applied before `createCircle` is submitted
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CircleLimits {
    pub min_members: u64,
    pub max_members: u64,
    pub min_period_secs: u64,
    pub max_period_secs: u64,
    /// Whole tokens
    pub min_contribution: u64,
    /// Whole tokens
    pub max_contribution: u64,
    pub min_collateral_factor: u64,
    pub max_collateral_factor: u64,
}

impl Default for CircleLimits {
    fn default() -> Self {
        Self {
            min_members: 2,
            max_members: 100,
            min_period_secs: 60 * 60,
            max_period_secs: 90 * SECONDS_PER_DAY,
            min_contribution: 1,
            max_contribution: 10_000,
            min_collateral_factor: 1,
            max_collateral_factor: 10,
        }
    }
}

impl CircleLimits {
    /// Check creation parameters; `decimals` scales the whole-token bounds
    pub fn validate(&self, params: &CircleParams, decimals: u8) -> Result<(), ParamsError> {
        if params.name.trim().is_empty() {
            return Err(ParamsError::EmptyName);
        }
        if params.description.trim().is_empty() {
            return Err(ParamsError::EmptyDescription);
        }
        if params.max_members < self.min_members || params.max_members > self.max_members {
            return Err(ParamsError::MemberCount {
                value: params.max_members,
                min: self.min_members,
                max: self.max_members,
            });
        }
        if params.period_duration < self.min_period_secs
            || params.period_duration > self.max_period_secs
        {
            return Err(ParamsError::Period {
                value: params.period_duration,
                min: self.min_period_secs,
                max: self.max_period_secs,
            });
        }
        if params.collateral_factor < self.min_collateral_factor
            || params.collateral_factor > self.max_collateral_factor
        {
            return Err(ParamsError::CollateralFactor {
                value: params.collateral_factor,
                min: self.min_collateral_factor,
                max: self.max_collateral_factor,
            });
        }

        let unit = 10u128
            .checked_pow(decimals as u32)
            .ok_or(ParamsError::Decimals(decimals))?;
        let min = self.min_contribution as u128 * unit;
        let max = self.max_contribution as u128 * unit;
        if params.contribution_amount < min || params.contribution_amount > max {
            return Err(ParamsError::Contribution {
                min: self.min_contribution,
                max: self.max_contribution,
            });
        }

        if params.initial_payout_order.len() as u64 > params.max_members {
            return Err(ParamsError::PayoutOrderTooLong {
                len: params.initial_payout_order.len(),
                max_members: params.max_members,
            });
        }
        let mut seen = std::collections::HashSet::new();
        for addr in &params.initial_payout_order {
            if !seen.insert(*addr) {
                return Err(ParamsError::DuplicatePayoutEntry(*addr));
            }
        }

        Ok(())
    }
}
