//! Typed snapshots normalized from the ledger's positional tuples

use crate::eligibility::Eligibility;
use circle_types::{
    format_units, Address, Amount, CircleId, CircleState, GatewayError, RawCircleDetails,
    RawCircleInfo, RawMemberInfo, Round, Timestamp, TokenRegistry,
};
use serde::{Deserialize, Serialize};

/// Read-only copy of one circle at a given block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleSnapshot {
    pub id: CircleId,
    pub creator: Address,
    pub token: Address,
    pub token_symbol: String,
    pub token_decimals: u8,
    /// Base units
    pub contribution_amount: Amount,
    /// Contribution scaled by the token's decimals
    pub contribution_display: String,
    pub period_duration: u64,
    pub max_members: u64,
    pub collateral_factor: u64,
    pub insurance_fee: Amount,
    pub insurance_fee_display: String,
    pub start_timestamp: Timestamp,
    pub current_round: Round,
    pub round_start: Timestamp,
    pub state: CircleState,
    pub name: String,
    pub description: String,
    pub members: Vec<Address>,
}

impl CircleSnapshot {
    /// Build from `getCircleInfo`, `getCircleDetails` and `getMembers`
    pub fn from_raw(
        id: CircleId,
        info: RawCircleInfo,
        details: RawCircleDetails,
        members: Vec<Address>,
        tokens: &TokenRegistry,
    ) -> Result<Self, GatewayError> {
        let RawCircleInfo(
            creator,
            token,
            contribution_amount,
            period_duration,
            max_members,
            collateral_factor,
            insurance_fee,
            start_timestamp,
            current_round,
            round_start,
            state,
        ) = info;
        let RawCircleDetails(name, description) = details;

        let state = CircleState::from_ordinal(state).ok_or_else(|| {
            GatewayError::Transport(format!("circle {} reports unknown state {}", id, state))
        })?;
        let decimals = tokens.decimals(&token);

        Ok(Self {
            id,
            creator,
            token,
            token_symbol: tokens.symbol(&token),
            token_decimals: decimals,
            contribution_amount,
            contribution_display: format_units(contribution_amount, decimals),
            period_duration,
            max_members,
            collateral_factor,
            insurance_fee,
            insurance_fee_display: format_units(insurance_fee, decimals),
            start_timestamp,
            current_round,
            round_start,
            state,
            name,
            description,
            members,
        })
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_member(&self, addr: &Address) -> bool {
        self.members.contains(addr)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() as u64 >= self.max_members
    }

    /// End of the current round (only meaningful while Active)
    pub fn round_deadline(&self) -> Timestamp {
        self.round_start.saturating_add(self.period_duration)
    }

    /// Base-unit amount rendered in this circle's token
    pub fn display_amount(&self, amount: Amount) -> String {
        format_units(amount, self.token_decimals)
    }
}

/// Result of one identifier inside a batched read
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircleEntry {
    Ready(CircleSnapshot),
    /// Not available at this block; retried on the next refresh
    Unavailable { circle_id: CircleId, reason: String },
}

impl CircleEntry {
    pub fn circle_id(&self) -> CircleId {
        match self {
            Self::Ready(snapshot) => snapshot.id,
            Self::Unavailable { circle_id, .. } => *circle_id,
        }
    }

    pub fn snapshot(&self) -> Option<&CircleSnapshot> {
        match self {
            Self::Ready(snapshot) => Some(snapshot),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn into_snapshot(self) -> Option<CircleSnapshot> {
        match self {
            Self::Ready(snapshot) => Some(snapshot),
            Self::Unavailable { .. } => None,
        }
    }
}

/// Member-specific facts for the calling address
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFacts {
    pub is_member: bool,
    /// Collateral still locked
    pub collateral: Amount,
    pub defaults: u32,
    pub pending_payout: Amount,
    /// Deposited in the current round
    pub deposited_this_round: bool,
}

impl MemberFacts {
    pub fn from_raw(
        info: RawMemberInfo,
        pending_payout: Amount,
        deposited_this_round: bool,
    ) -> Self {
        let RawMemberInfo(collateral, defaults, is_member) = info;
        Self {
            is_member,
            collateral,
            defaults,
            pending_payout,
            deposited_this_round,
        }
    }
}

/// Circle detail page data for one caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircleView {
    pub circle: CircleSnapshot,
    pub caller: Address,
    pub payout_order: Vec<Address>,
    pub insurance_pool: Amount,
    pub caller_facts: MemberFacts,
    /// Whether each member has deposited in the current round, in member order
    pub round_deposits: Vec<(Address, bool)>,
}

impl CircleView {
    /// `payoutOrder[currentRound - 1]`, falling back to join order
    pub fn current_recipient(&self) -> Option<Address> {
        if self.circle.state != CircleState::Active || self.circle.current_round == 0 {
            return None;
        }
        let order = if self.payout_order.is_empty() {
            &self.circle.members
        } else {
            &self.payout_order
        };
        order.get((self.circle.current_round - 1) as usize).copied()
    }

    /// Members that have deposited this round
    pub fn paid_count(&self) -> usize {
        self.round_deposits.iter().filter(|(_, paid)| *paid).count()
    }

    /// Fraction of this round's contributions received, in percent
    pub fn progress_percent(&self) -> u8 {
        let total = self.circle.member_count();
        if total == 0 {
            return 0;
        }
        ((self.paid_count() * 100) / total) as u8
    }

    pub fn eligibility(&self, expired: bool) -> Eligibility {
        Eligibility::evaluate(&self.circle, &self.caller_facts, &self.caller, expired)
    }
}

/// A value together with its load status, as handed to presentation code
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loadable<T> {
    pub data: Option<T>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl<T> Loadable<T> {
    pub fn loading() -> Self {
        Self {
            data: None,
            is_loading: true,
            error: None,
        }
    }

    pub fn ready(data: T) -> Self {
        Self {
            data: Some(data),
            is_loading: false,
            error: None,
        }
    }

    /// Failed load; previously loaded data stays visible
    pub fn failed(previous: Option<T>, error: &GatewayError) -> Self {
        Self {
            data: previous,
            is_loading: false,
            error: Some(error.short_message()),
        }
    }

    pub fn from_result(result: Result<T, GatewayError>) -> Self {
        match result {
            Ok(data) => Self::ready(data),
            Err(e) => Self::failed(None, &e),
        }
    }
}

impl<T> Default for Loadable<T> {
    fn default() -> Self {
        Self::loading()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_from_raw_scales_amounts() {
        let snap = snapshot(CircleState::Open, vec![]);
        assert_eq!(snap.token_symbol, "USDC");
        assert_eq!(snap.contribution_display, "100");
        assert_eq!(snap.insurance_fee_display, "5");
        assert_eq!(snap.name, "Savers");
    }

    #[test]
    fn test_unknown_state_is_rejected() {
        let info = RawCircleInfo(
            Address::ZERO,
            usdc(),
            1,
            1,
            2,
            1,
            0,
            0,
            0,
            0,
            9,
        );
        let result = CircleSnapshot::from_raw(
            4,
            info,
            RawCircleDetails(String::new(), String::new()),
            vec![],
            &TokenRegistry::default(),
        );
        assert!(matches!(result, Err(GatewayError::Transport(_))));
    }

    #[test]
    fn test_current_recipient_falls_back_to_join_order() {
        let a = Address::from_low_u64(10);
        let b = Address::from_low_u64(11);
        let mut view = CircleView {
            circle: snapshot(CircleState::Active, vec![a, b]),
            caller: a,
            payout_order: vec![],
            insurance_pool: 0,
            caller_facts: MemberFacts::default(),
            round_deposits: vec![(a, true), (b, false)],
        };
        assert_eq!(view.current_recipient(), Some(a));
        assert_eq!(view.paid_count(), 1);
        assert_eq!(view.progress_percent(), 50);

        view.payout_order = vec![b, a];
        assert_eq!(view.current_recipient(), Some(b));

        view.circle.state = CircleState::Completed;
        assert_eq!(view.current_recipient(), None);
    }

    #[test]
    fn test_loadable_keeps_previous_data_on_error() {
        let failed = Loadable::failed(Some(3u32), &GatewayError::Transport("down".into()));
        assert_eq!(failed.data, Some(3));
        assert!(!failed.is_loading);
        assert_eq!(failed.error.as_deref(), Some("Network error: down"));
    }
}
