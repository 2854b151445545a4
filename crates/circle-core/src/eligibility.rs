//! Eligibility Evaluator
//!
//! Pure predicates over a snapshot, the caller's member facts and the
//! round-expired flag. They never fail: any input yields a boolean or a
//! derived amount.

use crate::{
    flow::FlowKind,
    snapshot::{CircleSnapshot, MemberFacts},
};
use circle_types::{Address, Amount, CircleState};
use serde::{Deserialize, Serialize};

/// `contributionAmount × collateralFactor + insuranceFee`; `None` on overflow
pub fn required_join_deposit(circle: &CircleSnapshot) -> Option<Amount> {
    circle
        .contribution_amount
        .checked_mul(circle.collateral_factor as Amount)
        .and_then(|collateral| collateral.checked_add(circle.insurance_fee))
}

pub fn required_contribution(circle: &CircleSnapshot) -> Amount {
    circle.contribution_amount
}

pub fn can_join(circle: &CircleSnapshot, caller: &Address) -> bool {
    circle.state == CircleState::Open
        && !circle.is_member(caller)
        && !circle.is_full()
        && required_join_deposit(circle).is_some()
}

pub fn can_contribute(circle: &CircleSnapshot, caller: &Address, deposited_this_round: bool) -> bool {
    circle.state == CircleState::Active && circle.is_member(caller) && !deposited_this_round
}

/// Anyone may finalize an expired round
pub fn can_finalize_round(circle: &CircleSnapshot, expired: bool) -> bool {
    circle.state == CircleState::Active && expired
}

pub fn can_withdraw_collateral(circle: &CircleSnapshot, caller: &Address) -> bool {
    circle.state.is_terminal() && circle.is_member(caller)
}

pub fn has_pending_payout(pending_payout: Amount) -> bool {
    pending_payout > 0
}

/// Actions currently open to one caller on one circle
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub can_join: bool,
    pub can_contribute: bool,
    pub can_finalize_round: bool,
    pub can_withdraw_collateral: bool,
    pub has_pending_payout: bool,
    /// Amount to approve and deposit when joining
    pub join_deposit: Option<Amount>,
    /// Amount to approve and deposit per round
    pub contribution: Amount,
}

impl Eligibility {
    pub fn evaluate(
        circle: &CircleSnapshot,
        facts: &MemberFacts,
        caller: &Address,
        expired: bool,
    ) -> Self {
        Self {
            can_join: can_join(circle, caller),
            can_contribute: can_contribute(circle, caller, facts.deposited_this_round),
            can_finalize_round: can_finalize_round(circle, expired),
            can_withdraw_collateral: can_withdraw_collateral(circle, caller),
            has_pending_payout: has_pending_payout(facts.pending_payout),
            join_deposit: required_join_deposit(circle),
            contribution: required_contribution(circle),
        }
    }

    /// Whether a flow of `kind` may start on this circle
    pub fn permits(&self, kind: FlowKind) -> bool {
        match kind {
            FlowKind::Join => self.can_join,
            FlowKind::Contribute => self.can_contribute,
            FlowKind::ClaimPayout => self.has_pending_payout,
            FlowKind::FinalizeRound => self.can_finalize_round,
            FlowKind::WithdrawCollateral => self.can_withdraw_collateral,
            FlowKind::CreateCircle | FlowKind::Mint => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::fixtures::snapshot;
    use crate::timer::round_time;
    use circle_types::PERIOD_WEEKLY;

    fn addr(n: u64) -> Address {
        Address::from_low_u64(n)
    }

    #[test]
    fn test_can_join() {
        let open = snapshot(CircleState::Open, vec![addr(10)]);
        assert!(can_join(&open, &addr(11)));
        assert!(!can_join(&open, &addr(10)));

        let full = snapshot(CircleState::Open, vec![addr(10), addr(11), addr(12)]);
        assert!(!can_join(&full, &addr(13)));

        let active = snapshot(CircleState::Active, vec![addr(10)]);
        assert!(!can_join(&active, &addr(11)));
    }

    #[test]
    fn test_join_deposit_overflow_blocks_joining() {
        let mut open = snapshot(CircleState::Open, vec![]);
        assert_eq!(required_join_deposit(&open), Some(205_000_000));

        open.contribution_amount = Amount::MAX;
        assert_eq!(required_join_deposit(&open), None);
        assert!(!can_join(&open, &addr(11)));
    }

    #[test]
    fn test_can_contribute_once_per_round() {
        let active = snapshot(CircleState::Active, vec![addr(10), addr(11), addr(12)]);
        assert!(can_contribute(&active, &addr(10), false));
        assert!(!can_contribute(&active, &addr(10), true));
        assert!(!can_contribute(&active, &addr(99), false));

        let open = snapshot(CircleState::Open, vec![addr(10)]);
        assert!(!can_contribute(&open, &addr(10), false));
    }

    #[test]
    fn test_finalize_at_weekly_boundary() {
        let active = snapshot(CircleState::Active, vec![addr(10), addr(11), addr(12)]);
        let t = active.round_start;

        let before = round_time(t, PERIOD_WEEKLY, t + 604_799);
        assert!(!can_finalize_round(&active, before.expired));

        let at = round_time(t, PERIOD_WEEKLY, t + 604_800);
        assert!(can_finalize_round(&active, at.expired));

        let completed = snapshot(CircleState::Completed, vec![addr(10)]);
        assert!(!can_finalize_round(&completed, true));
    }

    #[test]
    fn test_withdraw_only_after_end() {
        for state in [CircleState::Completed, CircleState::Cancelled] {
            let circle = snapshot(state, vec![addr(10)]);
            assert!(can_withdraw_collateral(&circle, &addr(10)));
            assert!(!can_withdraw_collateral(&circle, &addr(11)));
        }
        let active = snapshot(CircleState::Active, vec![addr(10)]);
        assert!(!can_withdraw_collateral(&active, &addr(10)));
    }

    #[test]
    fn test_evaluate_and_permits() {
        let active = snapshot(CircleState::Active, vec![addr(10), addr(11), addr(12)]);
        let facts = MemberFacts {
            is_member: true,
            pending_payout: 7,
            ..Default::default()
        };
        let eligibility = Eligibility::evaluate(&active, &facts, &addr(10), false);
        assert!(eligibility.permits(FlowKind::Contribute));
        assert!(eligibility.permits(FlowKind::ClaimPayout));
        assert!(!eligibility.permits(FlowKind::FinalizeRound));
        assert!(!eligibility.permits(FlowKind::Join));
        assert_eq!(eligibility.contribution, 100_000_000);
        assert!(!has_pending_payout(0));
    }
}
